//! Orchestration of the issue/validate/decrypt flows: input
//! validation, vault fetch under a deadline, token construction, and
//! exactly one audit event per operation that reaches I/O.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::audit::{AuditEvent, AuditTrail, EventKind, Outcome};
use crate::errors::{IssueError, IssueResult, TokenError, TokenResult};
use crate::token::TokenIssuer;
use crate::types::{
    CredentialPayload, IssuedToken, Protocol, ResourceDescriptor, ResourceType, ValidatedToken,
    resolve_ttl,
};
use crate::vault::{VaultAdapter, VaultError};

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Front door of the engine. Construct with injected collaborators;
/// holds no mutable state of its own.
pub struct CredentialOrchestrator {
    vault: Arc<dyn VaultAdapter>,
    issuer: TokenIssuer,
    audit: AuditTrail,
    fetch_timeout: Duration,
}

impl CredentialOrchestrator {
    pub fn new(vault: Arc<dyn VaultAdapter>, issuer: TokenIssuer, audit: AuditTrail) -> Self {
        Self {
            vault,
            issuer,
            audit,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Deadline for the vault fetch; a slower vault surfaces as
    /// [`IssueError::Unavailable`].
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Fetch credentials for a resource and wrap them in a signed,
    /// expiring token. Validation failures are rejected before any
    /// I/O and leave no trace; every attempt that reaches the vault
    /// produces exactly one audit event, and no failure path returns
    /// a token.
    pub async fn issue_token(
        &self,
        protocol: Protocol,
        resource_type: &str,
        resource_name: &str,
        agent_id: &str,
        ttl_minutes: Option<u32>,
    ) -> IssueResult<IssuedToken> {
        let resource_type: ResourceType = resource_type.parse()?;
        let ttl = resolve_ttl(ttl_minutes)?;
        let descriptor = ResourceDescriptor::new(resource_type, resource_name);
        let resource = descriptor.to_string();

        let payload = match tokio::time::timeout(self.fetch_timeout, self.vault.fetch(&descriptor))
            .await
        {
            Ok(Ok(payload)) => payload,
            Ok(Err(VaultError::NotFound)) => {
                warn!(%resource, agent_id, "resource not found in vault");
                self.record_access(
                    protocol,
                    agent_id,
                    &resource,
                    Outcome::Failure,
                    json!({ "reason": "resource_not_found" }),
                )
                .await;
                return Err(IssueError::NotFound { resource });
            }
            Ok(Err(VaultError::Unavailable(message))) => {
                warn!(%resource, agent_id, error = %message, "vault unavailable");
                self.record_access(
                    protocol,
                    agent_id,
                    &resource,
                    Outcome::Error,
                    json!({ "reason": "vault_unavailable" }),
                )
                .await;
                return Err(IssueError::Unavailable(message));
            }
            Err(_) => {
                warn!(%resource, agent_id, "vault fetch deadline exceeded");
                self.record_access(
                    protocol,
                    agent_id,
                    &resource,
                    Outcome::Error,
                    json!({ "reason": "vault_timeout" }),
                )
                .await;
                return Err(IssueError::Unavailable(format!(
                    "vault fetch exceeded {}s deadline",
                    self.fetch_timeout.as_secs()
                )));
            }
        };

        let (token, claims) = match self.issuer.issue(agent_id, &payload, &descriptor, ttl) {
            Ok(issued) => issued,
            Err(err) => {
                self.record_access(
                    protocol,
                    agent_id,
                    &resource,
                    Outcome::Error,
                    json!({ "reason": "encryption_failed" }),
                )
                .await;
                return Err(err);
            }
        };

        self.record_access(
            protocol,
            agent_id,
            &resource,
            Outcome::Success,
            json!({ "ttl_minutes": ttl }),
        )
        .await;

        info!(%resource, agent_id, ttl_minutes = ttl, "issued ephemeral token");

        Ok(IssuedToken {
            token,
            expires_in_seconds: u64::from(ttl) * 60,
            resource,
            issued_at: claims.iat,
            expires_at: claims.exp,
            ttl_minutes: ttl,
        })
    }

    /// Verify a token and return its claims without secret material.
    /// Records one validation audit event either way.
    pub async fn validate_token(&self, protocol: Protocol, token: &str) -> TokenResult<ValidatedToken> {
        match self.issuer.verify(token) {
            Ok(claims) => {
                let validated = ValidatedToken::from(&claims);
                self.record_validation(protocol, &claims.sub, &claims.resource(), Outcome::Success, None)
                    .await;
                Ok(validated)
            }
            Err(err) => {
                self.record_validation(
                    protocol,
                    "unknown",
                    "unknown",
                    Outcome::Failure,
                    Some(json!({ "reason": err.to_string() })),
                )
                .await;
                Err(err)
            }
        }
    }

    /// Verify a token and decrypt its embedded credential payload.
    /// Expiry is checked ahead of the signature so an expired token
    /// reports `Expired` even when it is also damaged.
    pub async fn credentials_from_token(
        &self,
        protocol: Protocol,
        token: &str,
    ) -> TokenResult<CredentialPayload> {
        if let Some(exp) = self.issuer.peek_expiry(token) {
            if OffsetDateTime::now_utc().unix_timestamp() >= exp {
                self.record_validation(
                    protocol,
                    "unknown",
                    "unknown",
                    Outcome::Failure,
                    Some(json!({ "reason": "token_expired" })),
                )
                .await;
                return Err(TokenError::Expired);
            }
        }

        match self.issuer.verify_and_decrypt(token) {
            Ok((claims, payload)) => {
                self.record_validation(protocol, &claims.sub, &claims.resource(), Outcome::Success, None)
                    .await;
                Ok(payload)
            }
            Err(err) => {
                self.record_validation(
                    protocol,
                    "unknown",
                    "unknown",
                    Outcome::Failure,
                    Some(json!({ "reason": err.to_string() })),
                )
                .await;
                Err(err)
            }
        }
    }

    /// Drain the audit queue; call on process shutdown.
    pub async fn shutdown(&self) {
        self.audit.shutdown().await;
    }

    async fn record_access(
        &self,
        protocol: Protocol,
        agent_id: &str,
        resource: &str,
        outcome: Outcome,
        metadata: serde_json::Value,
    ) {
        self.audit
            .record(
                AuditEvent::new(EventKind::CredentialAccess, protocol, agent_id, resource, outcome)
                    .with_metadata(metadata),
            )
            .await;
    }

    async fn record_validation(
        &self,
        protocol: Protocol,
        agent_id: &str,
        resource: &str,
        outcome: Outcome,
        metadata: Option<serde_json::Value>,
    ) {
        let mut event =
            AuditEvent::new(EventKind::TokenValidation, protocol, agent_id, resource, outcome);
        if let Some(metadata) = metadata {
            event = event.with_metadata(metadata);
        }
        self.audit.record(event).await;
    }
}
