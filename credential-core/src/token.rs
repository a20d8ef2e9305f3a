//! Signed, expiring token construction and verification.
//!
//! Tokens are compact HS256 JWTs assembled by hand: the credential
//! payload is AEAD-encrypted into the `credentials` claim, the claim
//! set is signed with the dedicated HMAC key, and verification
//! recomputes the MAC over the received bytes before anything else is
//! trusted.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use ring::hmac;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::crypto::KeyMaterial;
use crate::errors::{IssueError, IssueResult, TokenError, TokenResult};
use crate::types::{CredentialPayload, ResourceDescriptor, TOKEN_ISSUER, TokenClaims};

const TOKEN_ALG: &str = "HS256";

#[derive(Debug, Serialize, Deserialize)]
struct TokenHeader {
    alg: String,
    typ: String,
}

impl TokenHeader {
    fn hs256() -> Self {
        Self {
            alg: TOKEN_ALG.to_string(),
            typ: "JWT".to_string(),
        }
    }
}

/// Issues and verifies signed tokens carrying encrypted credentials.
pub struct TokenIssuer {
    keys: KeyMaterial,
}

impl TokenIssuer {
    pub fn new(keys: KeyMaterial) -> Self {
        Self { keys }
    }

    /// Encrypt a credential payload into the opaque `credentials`
    /// claim value (base64 of `nonce || ciphertext || tag`).
    pub fn encrypt_payload(&self, payload: &CredentialPayload) -> IssueResult<String> {
        // BTreeMap keys serialize sorted, so the byte form is canonical.
        let plaintext = serde_json::to_vec(payload)
            .map_err(|err| IssueError::Encryption(err.to_string()))?;
        let sealed = self.keys.seal(&plaintext)?;
        Ok(STANDARD.encode(sealed))
    }

    /// Decrypt a `credentials` claim value back into the payload map.
    pub fn decrypt_payload(&self, credentials: &str) -> TokenResult<CredentialPayload> {
        let sealed = STANDARD
            .decode(credentials.as_bytes())
            .map_err(|_| TokenError::Decryption("invalid ciphertext encoding".into()))?;
        let plaintext = self.keys.open(&sealed)?;
        serde_json::from_slice(&plaintext)
            .map_err(|err| TokenError::Decryption(err.to_string()))
    }

    /// Build and sign a token for `subject`, embedding the encrypted
    /// payload. `ttl_minutes` must already be validated by the caller.
    pub fn issue(
        &self,
        subject: &str,
        payload: &CredentialPayload,
        descriptor: &ResourceDescriptor,
        ttl_minutes: u32,
    ) -> IssueResult<(String, TokenClaims)> {
        self.issue_at(OffsetDateTime::now_utc(), subject, payload, descriptor, ttl_minutes)
    }

    pub(crate) fn issue_at(
        &self,
        now: OffsetDateTime,
        subject: &str,
        payload: &CredentialPayload,
        descriptor: &ResourceDescriptor,
        ttl_minutes: u32,
    ) -> IssueResult<(String, TokenClaims)> {
        let credentials = self.encrypt_payload(payload)?;
        let iat = now.unix_timestamp();
        let claims = TokenClaims {
            sub: subject.to_string(),
            credentials,
            resource_type: descriptor.resource_type,
            resource_name: descriptor.name.clone(),
            iat,
            exp: iat + i64::from(ttl_minutes) * 60,
            iss: TOKEN_ISSUER.to_string(),
            ttl_minutes,
        };
        let token = self.sign(&claims)?;
        Ok((token, claims))
    }

    fn sign(&self, claims: &TokenClaims) -> IssueResult<String> {
        let header = serde_json::to_vec(&TokenHeader::hs256())
            .map_err(|err| IssueError::Encryption(err.to_string()))?;
        let payload = serde_json::to_vec(claims)
            .map_err(|err| IssueError::Encryption(err.to_string()))?;
        let signing_input = format!(
            "{header}.{payload}",
            header = URL_SAFE_NO_PAD.encode(header),
            payload = URL_SAFE_NO_PAD.encode(payload),
        );
        let tag = hmac::sign(&self.keys.hmac_key(), signing_input.as_bytes());
        Ok(format!(
            "{signing_input}.{signature}",
            signature = URL_SAFE_NO_PAD.encode(tag.as_ref())
        ))
    }

    /// Verify the MAC and expiry of a token and return its claims.
    ///
    /// The MAC is checked over the received bytes before any segment
    /// is decoded, so a flipped byte anywhere surfaces as
    /// [`TokenError::InvalidSignature`], never as a wrong decode.
    /// Expiry is only consulted once the signature holds.
    pub fn verify(&self, token: &str) -> TokenResult<TokenClaims> {
        self.verify_at(OffsetDateTime::now_utc(), token)
    }

    pub(crate) fn verify_at(&self, now: OffsetDateTime, token: &str) -> TokenResult<TokenClaims> {
        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 {
            // No signature segment to check; treat as unsigned.
            return Err(TokenError::InvalidSignature);
        }
        let (header_b64, claims_b64, signature_b64) = (segments[0], segments[1], segments[2]);

        let signing_input = &token[..header_b64.len() + 1 + claims_b64.len()];
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64.as_bytes())
            .map_err(|_| TokenError::InvalidSignature)?;
        hmac::verify(&self.keys.hmac_key(), signing_input.as_bytes(), &signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header_b64.as_bytes())
            .map_err(|_| TokenError::Malformed("invalid token header".into()))?;
        let header: TokenHeader = serde_json::from_slice(&header_bytes)
            .map_err(|_| TokenError::Malformed("invalid token header".into()))?;
        if header.alg != TOKEN_ALG {
            return Err(TokenError::InvalidSignature);
        }

        let claims_bytes = URL_SAFE_NO_PAD
            .decode(claims_b64.as_bytes())
            .map_err(|_| TokenError::Malformed("invalid claims encoding".into()))?;
        let claims: TokenClaims = serde_json::from_slice(&claims_bytes)
            .map_err(|_| TokenError::Malformed("invalid claims".into()))?;

        if now.unix_timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    /// Verify a token and decrypt its embedded payload in one step.
    pub fn verify_and_decrypt(&self, token: &str) -> TokenResult<(TokenClaims, CredentialPayload)> {
        let claims = self.verify(token)?;
        let payload = self.decrypt_payload(&claims.credentials)?;
        Ok((claims, payload))
    }

    /// Read the `exp` claim without verifying the signature. Used to
    /// report a precise expiry error before the signature check on the
    /// credentials path; nothing else may be trusted from the result.
    pub fn peek_expiry(&self, token: &str) -> Option<i64> {
        let claims_b64 = token.split('.').nth(1)?;
        let bytes = URL_SAFE_NO_PAD.decode(claims_b64.as_bytes()).ok()?;
        let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
        value.get("exp")?.as_i64()
    }
}
