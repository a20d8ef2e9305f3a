use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::IssueError;

/// Shortest TTL a caller may request, in whole minutes.
pub const MIN_TTL_MINUTES: u32 = 1;
/// Longest TTL a caller may request, in whole minutes.
pub const MAX_TTL_MINUTES: u32 = 15;
/// TTL applied when the caller omits one.
pub const DEFAULT_TTL_MINUTES: u32 = 5;

/// `iss` claim stamped into every issued token.
pub const TOKEN_ISSUER: &str = "credential-broker";

/// Flat field map fetched from the vault; lives only in memory during
/// issuance and inside the encrypted token payload afterwards.
pub type CredentialPayload = BTreeMap<String, String>;

/// Kinds of resources the broker issues credentials for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Database,
    Api,
    Ssh,
    Generic,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Database => "database",
            ResourceType::Api => "api",
            ResourceType::Ssh => "ssh",
            ResourceType::Generic => "generic",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = IssueError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "database" => Ok(ResourceType::Database),
            "api" => Ok(ResourceType::Api),
            "ssh" => Ok(ResourceType::Ssh),
            "generic" => Ok(ResourceType::Generic),
            other => Err(IssueError::InvalidResourceType {
                value: other.to_string(),
            }),
        }
    }
}

/// Identifies the vault entry a request targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub resource_type: ResourceType,
    pub name: String,
}

impl ResourceDescriptor {
    pub fn new(resource_type: ResourceType, name: impl Into<String>) -> Self {
        Self {
            resource_type,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.name)
    }
}

/// Protocol surface a request arrived on; carried into audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Mcp,
    A2a,
    Acp,
    Rest,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Mcp => "mcp",
            Protocol::A2a => "a2a",
            Protocol::Acp => "acp",
            Protocol::Rest => "rest",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claim set embedded in a signed token. Timestamps are UTC epoch
/// seconds; `credentials` is the base64 AEAD ciphertext of the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub credentials: String,
    pub resource_type: ResourceType,
    pub resource_name: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub ttl_minutes: u32,
}

impl TokenClaims {
    /// Audit/resource identifier in `type/name` form.
    pub fn resource(&self) -> String {
        format!("{}/{}", self.resource_type, self.resource_name)
    }
}

/// Successful issuance result returned to protocol adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_in_seconds: u64,
    pub resource: String,
    pub issued_at: i64,
    pub expires_at: i64,
    pub ttl_minutes: u32,
}

/// Claims view returned by validation; never carries secret material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedToken {
    pub subject: String,
    pub resource_type: ResourceType,
    pub resource_name: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

impl From<&TokenClaims> for ValidatedToken {
    fn from(claims: &TokenClaims) -> Self {
        Self {
            subject: claims.sub.clone(),
            resource_type: claims.resource_type,
            resource_name: claims.resource_name.clone(),
            issued_at: claims.iat,
            expires_at: claims.exp,
        }
    }
}

/// Validate a caller-supplied TTL, applying the default when omitted.
/// Out-of-range values are rejected, never clamped.
pub fn resolve_ttl(ttl_minutes: Option<u32>) -> Result<u32, IssueError> {
    match ttl_minutes {
        None => Ok(DEFAULT_TTL_MINUTES),
        Some(minutes) if (MIN_TTL_MINUTES..=MAX_TTL_MINUTES).contains(&minutes) => Ok(minutes),
        Some(minutes) => Err(IssueError::TtlOutOfRange { minutes }),
    }
}
