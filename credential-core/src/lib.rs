//! Ephemeral credential issuance engine: fetches raw secret material
//! from a vault, seals it into signed short-lived tokens, and records
//! every attempt to a durable audit trail.

pub mod audit;
pub mod crypto;
pub mod errors;
pub mod orchestrator;
pub mod token;
pub mod types;
pub mod vault;

pub use audit::{AuditEvent, AuditSink, AuditTrail, AuditTrailConfig, EventKind, HttpAuditSink, Outcome, SinkError};
pub use crypto::KeyMaterial;
pub use errors::{IssueError, IssueResult, KeySetupError, TokenError, TokenResult};
pub use orchestrator::CredentialOrchestrator;
pub use token::TokenIssuer;
pub use types::{
    CredentialPayload, DEFAULT_TTL_MINUTES, IssuedToken, MAX_TTL_MINUTES, MIN_TTL_MINUTES,
    Protocol, ResourceDescriptor, ResourceType, TOKEN_ISSUER, TokenClaims, ValidatedToken,
    resolve_ttl,
};
pub use vault::{HttpVaultAdapter, MemoryVault, VaultAdapter, VaultError};
