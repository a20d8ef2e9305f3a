use thiserror::Error;

use crate::types::{MAX_TTL_MINUTES, MIN_TTL_MINUTES};

pub type IssueResult<T> = std::result::Result<T, IssueError>;
pub type TokenResult<T> = std::result::Result<T, TokenError>;

/// Failures on the issuance path. Validation variants are rejected
/// before any I/O; the rest abort issuance after an audit record is
/// emitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IssueError {
    #[error("invalid resource_type '{value}': must be one of database, api, ssh, generic")]
    InvalidResourceType { value: String },
    #[error(
        "ttl_minutes {minutes} out of range: must be between {MIN_TTL_MINUTES} and {MAX_TTL_MINUTES}"
    )]
    TtlOutOfRange { minutes: u32 },
    #[error("resource '{resource}' not found")]
    NotFound { resource: String },
    #[error("upstream unavailable: {0}")]
    Unavailable(String),
    #[error("encryption failed: {0}")]
    Encryption(String),
}

impl IssueError {
    /// True for caller-fault rejections that happen before any I/O.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            IssueError::InvalidResourceType { .. } | IssueError::TtlOutOfRange { .. }
        )
    }
}

/// Failures on the validation/decryption path. `Expired` and
/// `InvalidSignature` are kept distinct so callers can tell
/// "ask again" apart from tampering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("decryption failed: {0}")]
    Decryption(String),
}

/// Key-material setup failures; construction-time only, never on the
/// request path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeySetupError {
    #[error("master secret must not be empty")]
    EmptySecret,
    #[error("kdf salt must not be empty")]
    EmptySalt,
    #[error("key derivation failed")]
    Derivation,
}
