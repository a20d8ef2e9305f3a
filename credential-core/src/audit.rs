//! Durable audit trail for every issuance and validation attempt.
//!
//! Events flow through a bounded queue into a background worker that
//! posts them to an external sink, retrying with exponential backoff
//! and falling back to a local append-only JSON-lines log when the
//! sink stays down. Recording never blocks or fails the operation
//! being audited, and no path loses an event: each one ends acked by
//! the sink or written to the fallback log.

use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::types::Protocol;

/// How a credential operation concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Error => "error",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of operation an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CredentialAccess,
    TokenValidation,
}

/// One audit record. Carries resource identifiers and outcome only,
/// never secret values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub event_type: EventKind,
    pub protocol: Protocol,
    pub agent_id: String,
    pub resource: String,
    pub outcome: Outcome,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn new(
        event_type: EventKind,
        protocol: Protocol,
        agent_id: impl Into<String>,
        resource: impl Into<String>,
        outcome: Outcome,
    ) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            event_type,
            protocol,
            agent_id: agent_id.into(),
            resource: resource.into(),
            outcome,
            source: crate::types::TOKEN_ISSUER.to_string(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("audit sink error: {0}")]
pub struct SinkError(pub String);

/// External events endpoint the trail submits to.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn post_event(&self, event: &AuditEvent) -> Result<(), SinkError>;
}

/// Posts events as JSON to `{base}/events` with bearer auth.
#[derive(Clone)]
pub struct HttpAuditSink {
    base_url: reqwest::Url,
    client: reqwest::Client,
    token: String,
    timeout: Duration,
}

impl HttpAuditSink {
    pub fn new(base_url: impl AsRef<str>, token: impl Into<String>) -> Result<Self, SinkError> {
        let url =
            reqwest::Url::parse(base_url.as_ref()).map_err(|err| SinkError(err.to_string()))?;
        let client = reqwest::Client::builder()
            .user_agent("credential-broker/0.1")
            .build()
            .map_err(|err| SinkError(err.to_string()))?;
        Ok(Self {
            base_url: url,
            client,
            token: token.into(),
            timeout: Duration::from_secs(10),
        })
    }
}

#[async_trait]
impl AuditSink for HttpAuditSink {
    async fn post_event(&self, event: &AuditEvent) -> Result<(), SinkError> {
        let url = self
            .base_url
            .join("events")
            .map_err(|err| SinkError(err.to_string()))?;
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .bearer_auth(&self.token)
            .json(event)
            .send()
            .await
            .map_err(|err| SinkError(err.to_string()))?;
        match response.status() {
            status if status.is_success() => Ok(()),
            status => Err(SinkError(format!("events endpoint returned {status}"))),
        }
    }
}

/// Local append-only JSON-lines store used when the sink is down.
#[derive(Clone)]
struct FallbackLog {
    path: Arc<PathBuf>,
}

impl FallbackLog {
    fn new(path: PathBuf) -> Self {
        Self {
            path: Arc::new(path),
        }
    }

    /// Append one event. Disk failures are logged and absorbed; at
    /// this point there is nowhere left to escalate.
    fn append(&self, event: &AuditEvent) {
        if let Err(err) = self.try_append(event) {
            error!(error = %err, path = %self.path.display(), "failed to write audit fallback log");
        }
    }

    fn try_append(&self, event: &AuditEvent) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(event)
            .map_err(|err| std::io::Error::other(err.to_string()))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_ref())?;
        writeln!(file, "{line}")?;
        file.sync_all()
    }
}

#[derive(Debug, Clone)]
pub struct AuditTrailConfig {
    pub queue_capacity: usize,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub fallback_path: PathBuf,
}

impl Default for AuditTrailConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            fallback_path: PathBuf::from("logs/audit.log"),
        }
    }
}

/// Fire-and-forget audit writer backed by a bounded queue and one
/// worker task.
pub struct AuditTrail {
    sender: Mutex<Option<mpsc::Sender<AuditEvent>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    fallback: FallbackLog,
}

impl AuditTrail {
    /// Start the background worker. `sink: None` runs in local-only
    /// mode where every event goes straight to the fallback log.
    pub fn spawn<S>(sink: Option<S>, config: AuditTrailConfig) -> Self
    where
        S: AuditSink + 'static,
    {
        let (sender, mut receiver) = mpsc::channel::<AuditEvent>(config.queue_capacity);
        let fallback = FallbackLog::new(config.fallback_path.clone());

        let worker_fallback = fallback.clone();
        let worker = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                match &sink {
                    Some(sink) => deliver(sink, &config, &worker_fallback, event).await,
                    None => worker_fallback.append(&event),
                }
            }
        });

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            fallback,
        }
    }

    /// Enqueue an event. Infallible from the caller's perspective: a
    /// full queue or an already-drained trail writes the event to the
    /// fallback log instead of dropping it.
    pub async fn record(&self, event: AuditEvent) {
        let sender = self.sender.lock().await.clone();
        match sender {
            Some(sender) => {
                if let Err(rejected) = sender.try_send(event) {
                    warn!("audit queue full, writing event to fallback log");
                    self.fallback.append(&rejected.into_inner());
                }
            }
            None => {
                warn!("audit trail shut down, writing event to fallback log");
                self.fallback.append(&event);
            }
        }
    }

    /// Close the queue and wait for the worker to drain every queued
    /// event to a terminal state.
    pub async fn shutdown(&self) {
        self.sender.lock().await.take();
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                error!(error = %err, "audit worker terminated abnormally");
            }
        }
    }
}

/// Drive one event to a terminal state: acked by the sink, or written
/// to the fallback log after retries are exhausted.
async fn deliver<S>(sink: &S, config: &AuditTrailConfig, fallback: &FallbackLog, event: AuditEvent)
where
    S: AuditSink,
{
    let mut attempt: u32 = 0;
    loop {
        match sink.post_event(&event).await {
            Ok(()) => {
                debug!(event_type = ?event.event_type, "audit event acked by sink");
                return;
            }
            Err(err) if attempt < config.max_retries => {
                let delay = config.retry_base_delay * 2u32.pow(attempt);
                warn!(
                    error = %err,
                    attempt = attempt + 1,
                    delay_secs = delay.as_secs_f64(),
                    "audit sink submission failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                warn!(error = %err, "audit sink retries exhausted, writing fallback log");
                fallback.append(&event);
                return;
            }
        }
    }
}
