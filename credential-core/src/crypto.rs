//! Key derivation and authenticated encryption for token payloads.
//!
//! A single configured master secret is stretched once at startup with
//! PBKDF2-HMAC-SHA256 (100k rounds, per-deployment salt) and split via
//! HKDF into two independent 256-bit keys: one for AES-256-GCM payload
//! encryption, one for HMAC token signing.

use std::num::NonZeroU32;

use hkdf::Hkdf;
use rand::RngCore;
use ring::{aead, hmac, pbkdf2};
use sha2::Sha256;

use crate::errors::{IssueError, KeySetupError, TokenError};

const PBKDF2_ITERATIONS: NonZeroU32 = NonZeroU32::new(100_000).unwrap();
const ENCRYPTION_INFO: &[u8] = b"credential-broker/encryption";
const SIGNING_INFO: &[u8] = b"credential-broker/signing";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Derived encryption and signing keys, immutable for the process
/// lifetime and shared read-only across requests.
#[derive(Clone)]
pub struct KeyMaterial {
    encryption_key: [u8; 32],
    signing_key: [u8; 32],
}

impl KeyMaterial {
    /// Stretch `secret` with PBKDF2 under the configured `salt`, then
    /// expand into the two working keys. Expensive; call once at
    /// startup.
    pub fn derive(secret: &str, salt: &str) -> Result<Self, KeySetupError> {
        if secret.trim().is_empty() {
            return Err(KeySetupError::EmptySecret);
        }
        if salt.trim().is_empty() {
            return Err(KeySetupError::EmptySalt);
        }

        let mut master = [0u8; 32];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            PBKDF2_ITERATIONS,
            salt.as_bytes(),
            secret.as_bytes(),
            &mut master,
        );

        let hkdf = Hkdf::<Sha256>::new(Some(salt.as_bytes()), &master);
        let mut encryption_key = [0u8; 32];
        let mut signing_key = [0u8; 32];
        hkdf.expand(ENCRYPTION_INFO, &mut encryption_key)
            .map_err(|_| KeySetupError::Derivation)?;
        hkdf.expand(SIGNING_INFO, &mut signing_key)
            .map_err(|_| KeySetupError::Derivation)?;

        Ok(Self {
            encryption_key,
            signing_key,
        })
    }

    pub(crate) fn hmac_key(&self) -> hmac::Key {
        hmac::Key::new(hmac::HMAC_SHA256, &self.signing_key)
    }

    /// AES-256-GCM encrypt; output is `nonce || ciphertext || tag`.
    /// Fails closed, never returning partial output.
    pub(crate) fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, IssueError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);

        let key = aead::UnboundKey::new(&aead::AES_256_GCM, &self.encryption_key)
            .map_err(|_| IssueError::Encryption("invalid encryption key".into()))?;
        let key = aead::LessSafeKey::new(key);

        let mut in_out = plaintext.to_vec();
        in_out.reserve(TAG_LEN);
        key.seal_in_place_append_tag(
            aead::Nonce::assume_unique_for_key(nonce),
            aead::Aad::empty(),
            &mut in_out,
        )
        .map_err(|_| IssueError::Encryption("seal failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&in_out);
        Ok(out)
    }

    /// Inverse of [`KeyMaterial::seal`]. Tag mismatch or truncated
    /// input is rejected outright; there is no best-effort decode.
    pub(crate) fn open(&self, data: &[u8]) -> Result<Vec<u8>, TokenError> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(TokenError::Decryption("ciphertext too short".into()));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);

        let key = aead::UnboundKey::new(&aead::AES_256_GCM, &self.encryption_key)
            .map_err(|_| TokenError::Decryption("invalid encryption key".into()))?;
        let key = aead::LessSafeKey::new(key);

        let nonce = aead::Nonce::try_assume_unique_for_key(nonce)
            .map_err(|_| TokenError::Decryption("invalid nonce".into()))?;
        let mut buffer = ciphertext.to_vec();
        let plaintext = key
            .open_in_place(nonce, aead::Aad::empty(), &mut buffer)
            .map_err(|_| TokenError::Decryption("authentication tag mismatch".into()))?;

        Ok(plaintext.to_vec())
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key bytes stay out of Debug output.
        f.debug_struct("KeyMaterial").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material() -> KeyMaterial {
        KeyMaterial::derive("unit-test-master-secret", "unit-test-salt").expect("derive")
    }

    #[test]
    fn seal_open_roundtrip() {
        let keys = material();
        let sealed = keys.seal(b"username=svc;password=hunter2").expect("seal");
        let opened = keys.open(&sealed).expect("open");
        assert_eq!(opened, b"username=svc;password=hunter2");
    }

    #[test]
    fn sealing_twice_produces_distinct_ciphertext() {
        let keys = material();
        let a = keys.seal(b"payload").expect("seal");
        let b = keys.seal(b"payload").expect("seal");
        assert_ne!(a, b, "nonce must differ per encryption");
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let keys = material();
        let mut sealed = keys.seal(b"payload").expect("seal");
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        let err = keys.open(&sealed).unwrap_err();
        assert!(matches!(err, TokenError::Decryption(_)));
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let keys = material();
        let err = keys.open(&[0u8; NONCE_LEN + TAG_LEN - 1]).unwrap_err();
        assert!(matches!(err, TokenError::Decryption(_)));
    }

    #[test]
    fn derivation_is_deterministic_per_secret_and_salt() {
        let a = KeyMaterial::derive("secret", "salt-a").expect("derive");
        let b = KeyMaterial::derive("secret", "salt-a").expect("derive");
        let c = KeyMaterial::derive("secret", "salt-b").expect("derive");
        let sealed = a.seal(b"cross-check").expect("seal");
        assert_eq!(b.open(&sealed).expect("open"), b"cross-check");
        assert!(c.open(&sealed).is_err(), "different salt, different keys");
    }

    #[test]
    fn empty_inputs_are_rejected() {
        assert_eq!(
            KeyMaterial::derive("", "salt").unwrap_err(),
            KeySetupError::EmptySecret
        );
        assert_eq!(
            KeyMaterial::derive("secret", "  ").unwrap_err(),
            KeySetupError::EmptySalt
        );
    }
}
