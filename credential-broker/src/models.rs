use credential_core::{CredentialPayload, IssuedToken, ValidatedToken};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct IssueTokenRequest {
    pub resource_type: String,
    pub resource_name: String,
    pub agent_id: String,
    #[serde(default)]
    pub ttl_minutes: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    pub expires_in_seconds: u64,
    pub resource: String,
    pub issued_at: i64,
    pub expires_at: i64,
    pub ttl_minutes: u32,
}

impl From<IssuedToken> for TokenResponse {
    fn from(value: IssuedToken) -> Self {
        Self {
            token: value.token,
            expires_in_seconds: value.expires_in_seconds,
            resource: value.resource,
            issued_at: value.issued_at,
            expires_at: value.expires_at,
            ttl_minutes: value.ttl_minutes,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidateTokenRequest {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedTokenResponse {
    pub valid: bool,
    pub subject: String,
    pub resource_type: String,
    pub resource_name: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

impl From<ValidatedToken> for ValidatedTokenResponse {
    fn from(value: ValidatedToken) -> Self {
        Self {
            valid: true,
            subject: value.subject,
            resource_type: value.resource_type.to_string(),
            resource_name: value.resource_name,
            issued_at: value.issued_at,
            expires_at: value.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsResponse {
    pub fields: CredentialPayload,
}
