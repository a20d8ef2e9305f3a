use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use credential_core::{
    AuditEvent, AuditSink, AuditTrail, AuditTrailConfig, CredentialOrchestrator, CredentialPayload,
    EventKind, HttpAuditSink, IssueError, KeyMaterial, MemoryVault, Outcome, Protocol,
    ResourceDescriptor, ResourceType, SinkError, TokenError, TokenIssuer, VaultAdapter, VaultError,
};
use tempfile::TempDir;

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

// Local wrapper so the sink handle can stay shared with assertions
// while the trail owns an `AuditSink` of its own.
struct SharedSink(Arc<RecordingSink>);

#[async_trait]
impl AuditSink for SharedSink {
    async fn post_event(&self, event: &AuditEvent) -> Result<(), SinkError> {
        self.0.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

struct DeadSink;

#[async_trait]
impl AuditSink for DeadSink {
    async fn post_event(&self, _event: &AuditEvent) -> Result<(), SinkError> {
        Err(SinkError("connection refused".into()))
    }
}

struct DownVault;

#[async_trait]
impl VaultAdapter for DownVault {
    async fn fetch(&self, _descriptor: &ResourceDescriptor) -> Result<CredentialPayload, VaultError> {
        Err(VaultError::Unavailable("dial tcp: connection refused".into()))
    }
}

struct StallingVault;

#[async_trait]
impl VaultAdapter for StallingVault {
    async fn fetch(&self, _descriptor: &ResourceDescriptor) -> Result<CredentialPayload, VaultError> {
        std::future::pending().await
    }
}

fn issuer() -> TokenIssuer {
    let keys = KeyMaterial::derive("integration-test-secret", "integration-test-salt")
        .expect("key derivation");
    TokenIssuer::new(keys)
}

fn trail_config(dir: &TempDir) -> AuditTrailConfig {
    AuditTrailConfig {
        fallback_path: dir.path().join("audit.log"),
        ..AuditTrailConfig::default()
    }
}

fn orchestrator_with_sink(
    vault: Arc<dyn VaultAdapter>,
    dir: &TempDir,
) -> (CredentialOrchestrator, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let trail = AuditTrail::spawn(Some(SharedSink(sink.clone())), trail_config(dir));
    (CredentialOrchestrator::new(vault, issuer(), trail), sink)
}

async fn seeded_vault() -> Arc<MemoryVault> {
    let vault = Arc::new(MemoryVault::new());
    vault
        .insert(
            ResourceType::Database,
            "prod-postgres",
            BTreeMap::from([
                ("host".to_string(), "db.internal".to_string()),
                ("username".to_string(), "app_rw".to_string()),
                ("password".to_string(), "s3cr3t!".to_string()),
            ]),
        )
        .await;
    vault
}

fn fallback_events(dir: &TempDir) -> Vec<AuditEvent> {
    match std::fs::read_to_string(dir.path().join("audit.log")) {
        Ok(contents) => contents
            .lines()
            .map(|line| serde_json::from_str(line).expect("fallback line parses"))
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[tokio::test]
async fn issues_token_and_returns_exact_vault_fields() {
    let dir = TempDir::new().unwrap();
    let vault = seeded_vault().await;
    let (orchestrator, sink) = orchestrator_with_sink(vault.clone(), &dir);

    let issued = orchestrator
        .issue_token(Protocol::Mcp, "database", "prod-postgres", "agent-1", Some(5))
        .await
        .expect("issue");

    assert_eq!(issued.resource, "database/prod-postgres");
    assert_eq!(issued.expires_in_seconds, 300);
    assert_eq!(issued.expires_at - issued.issued_at, 300);
    assert_eq!(issued.ttl_minutes, 5);

    let fields = orchestrator
        .credentials_from_token(Protocol::Mcp, &issued.token)
        .await
        .expect("decrypt");
    let expected = vault
        .fetch(&ResourceDescriptor::new(ResourceType::Database, "prod-postgres"))
        .await
        .unwrap();
    assert_eq!(fields, expected);

    orchestrator.shutdown().await;
    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, EventKind::CredentialAccess);
    assert_eq!(events[0].outcome, Outcome::Success);
    assert_eq!(events[0].resource, "database/prod-postgres");
    assert_eq!(events[0].agent_id, "agent-1");
    assert_eq!(events[1].event_type, EventKind::TokenValidation);
    assert_eq!(events[1].outcome, Outcome::Success);
}

#[tokio::test]
async fn omitted_ttl_defaults_to_five_minutes() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, _sink) = orchestrator_with_sink(seeded_vault().await, &dir);

    let issued = orchestrator
        .issue_token(Protocol::Rest, "database", "prod-postgres", "agent-1", None)
        .await
        .expect("issue");
    assert_eq!(issued.ttl_minutes, 5);
    assert_eq!(issued.expires_in_seconds, 300);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn out_of_range_ttl_is_rejected_before_any_io() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, sink) = orchestrator_with_sink(seeded_vault().await, &dir);

    for minutes in [0u32, 16] {
        let err = orchestrator
            .issue_token(Protocol::Mcp, "database", "prod-postgres", "agent-1", Some(minutes))
            .await
            .unwrap_err();
        assert_eq!(err, IssueError::TtlOutOfRange { minutes });
        assert!(err.is_validation());
    }

    orchestrator.shutdown().await;
    assert!(sink.events().is_empty(), "validation rejects must not be audited");
    assert!(fallback_events(&dir).is_empty());
}

#[tokio::test]
async fn unknown_resource_type_is_rejected_before_any_io() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, sink) = orchestrator_with_sink(seeded_vault().await, &dir);

    let err = orchestrator
        .issue_token(Protocol::Mcp, "s3-bucket", "assets", "agent-1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, IssueError::InvalidResourceType { .. }));

    orchestrator.shutdown().await;
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn missing_resource_yields_not_found_and_one_failure_event() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, sink) = orchestrator_with_sink(seeded_vault().await, &dir);

    let err = orchestrator
        .issue_token(Protocol::A2a, "ssh", "ghost-server", "agent-1", Some(5))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        IssueError::NotFound {
            resource: "ssh/ghost-server".to_string()
        }
    );

    orchestrator.shutdown().await;
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].outcome, Outcome::Failure);
    assert_eq!(events[0].resource, "ssh/ghost-server");
    assert_eq!(events[0].protocol, Protocol::A2a);
}

#[tokio::test]
async fn unavailable_vault_yields_error_outcome() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, sink) = orchestrator_with_sink(Arc::new(DownVault), &dir);

    let err = orchestrator
        .issue_token(Protocol::Acp, "api", "payments", "agent-2", None)
        .await
        .unwrap_err();
    assert!(matches!(err, IssueError::Unavailable(_)));

    orchestrator.shutdown().await;
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].outcome, Outcome::Error);
}

#[tokio::test(start_paused = true)]
async fn slow_vault_fetch_hits_the_deadline() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::default());
    let trail = AuditTrail::spawn(Some(SharedSink(sink.clone())), trail_config(&dir));
    let orchestrator = CredentialOrchestrator::new(Arc::new(StallingVault), issuer(), trail)
        .with_fetch_timeout(Duration::from_millis(250));

    let err = orchestrator
        .issue_token(Protocol::Mcp, "database", "prod-postgres", "agent-1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, IssueError::Unavailable(_)));

    orchestrator.shutdown().await;
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].outcome, Outcome::Error);
}

#[tokio::test(start_paused = true)]
async fn token_is_issued_even_when_the_audit_sink_is_down() {
    let dir = TempDir::new().unwrap();
    let trail = AuditTrail::spawn(Some(DeadSink), trail_config(&dir));
    let orchestrator = CredentialOrchestrator::new(seeded_vault().await, issuer(), trail);

    let issued = orchestrator
        .issue_token(Protocol::Mcp, "database", "prod-postgres", "agent-1", Some(3))
        .await
        .expect("issuance must not depend on the audit sink");
    assert_eq!(issued.expires_in_seconds, 180);

    orchestrator.shutdown().await;
    let recovered = fallback_events(&dir);
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].outcome, Outcome::Success);
    assert_eq!(recovered[0].resource, "database/prod-postgres");
}

#[tokio::test]
async fn validate_token_returns_claims_without_secret_material() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, sink) = orchestrator_with_sink(seeded_vault().await, &dir);

    let issued = orchestrator
        .issue_token(Protocol::Rest, "database", "prod-postgres", "agent-1", Some(5))
        .await
        .expect("issue");
    let validated = orchestrator
        .validate_token(Protocol::Rest, &issued.token)
        .await
        .expect("validate");

    assert_eq!(validated.subject, "agent-1");
    assert_eq!(validated.resource_type, ResourceType::Database);
    assert_eq!(validated.resource_name, "prod-postgres");
    assert_eq!(validated.issued_at, issued.issued_at);
    assert_eq!(validated.expires_at, issued.expires_at);

    let as_json = serde_json::to_string(&validated).unwrap();
    assert!(!as_json.contains("s3cr3t!"));
    assert!(!as_json.contains("credentials"));

    orchestrator.shutdown().await;
    assert_eq!(sink.events().len(), 2);
}

#[tokio::test]
async fn tampered_token_fails_validation_with_audit_trace() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, sink) = orchestrator_with_sink(seeded_vault().await, &dir);

    let issued = orchestrator
        .issue_token(Protocol::Mcp, "database", "prod-postgres", "agent-1", None)
        .await
        .expect("issue");
    let mut bytes = issued.token.clone().into_bytes();
    bytes[10] = if bytes[10] == b'A' { b'B' } else { b'A' };
    let tampered = String::from_utf8(bytes).unwrap();

    let err = orchestrator
        .validate_token(Protocol::Mcp, &tampered)
        .await
        .unwrap_err();
    assert_eq!(err, TokenError::InvalidSignature);

    orchestrator.shutdown().await;
    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].event_type, EventKind::TokenValidation);
    assert_eq!(events[1].outcome, Outcome::Failure);
}

#[tokio::test]
async fn concurrent_issues_produce_independent_tokens() {
    let dir = TempDir::new().unwrap();
    let vault = seeded_vault().await;
    let (orchestrator, sink) = orchestrator_with_sink(vault, &dir);
    let orchestrator = Arc::new(orchestrator);

    let (a, b) = tokio::join!(
        orchestrator.issue_token(Protocol::Mcp, "database", "prod-postgres", "agent-1", Some(5)),
        orchestrator.issue_token(Protocol::Mcp, "database", "prod-postgres", "agent-1", Some(5)),
    );
    let a = a.expect("issue a");
    let b = b.expect("issue b");

    assert_ne!(a.token, b.token, "nonces make each ciphertext distinct");
    assert!(orchestrator.validate_token(Protocol::Mcp, &a.token).await.is_ok());
    assert!(orchestrator.validate_token(Protocol::Mcp, &b.token).await.is_ok());

    orchestrator.shutdown().await;
    let issuance_events = sink
        .events()
        .into_iter()
        .filter(|event| event.event_type == EventKind::CredentialAccess)
        .count();
    assert_eq!(issuance_events, 2);
}

#[tokio::test]
async fn local_only_trail_still_records_every_operation() {
    let dir = TempDir::new().unwrap();
    let trail = AuditTrail::spawn(None::<HttpAuditSink>, trail_config(&dir));
    let orchestrator = CredentialOrchestrator::new(seeded_vault().await, issuer(), trail);

    orchestrator
        .issue_token(Protocol::Rest, "database", "prod-postgres", "agent-1", None)
        .await
        .expect("issue");
    let _ = orchestrator
        .issue_token(Protocol::Rest, "ssh", "ghost-server", "agent-1", None)
        .await;

    orchestrator.shutdown().await;
    let recovered = fallback_events(&dir);
    assert_eq!(recovered.len(), 2);
    assert_eq!(recovered[0].outcome, Outcome::Success);
    assert_eq!(recovered[1].outcome, Outcome::Failure);
}
