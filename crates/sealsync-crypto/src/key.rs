//! Encryption key loading
//!
//! Configuration may carry the key as 32 raw bytes, as base64, or as a
//! passphrase that is hashed with SHA-256. `auto` tries them in that order.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};

use sealsync_core::config::KeyFormat;

use crate::CryptoError;

/// Key length for AES-256
pub const KEY_LEN: usize = 32;

/// A 256-bit symmetric key
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    /// Wrap raw key bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Build a key from configuration material
    ///
    /// # Errors
    /// Returns `CryptoError::InvalidKey` if the material is empty or does not
    /// match the requested format.
    pub fn from_material(material: &str, format: KeyFormat) -> Result<Self, CryptoError> {
        if material.is_empty() {
            return Err(CryptoError::InvalidKey("key material is empty".to_string()));
        }

        match format {
            KeyFormat::Raw => Self::from_raw(material).ok_or_else(|| {
                CryptoError::InvalidKey(format!(
                    "raw key must be exactly {KEY_LEN} bytes, got {}",
                    material.len()
                ))
            }),
            KeyFormat::Base64 => Self::from_base64(material),
            KeyFormat::Passphrase => Ok(Self::from_passphrase(material)),
            KeyFormat::Auto => {
                if let Some(key) = Self::from_raw(material) {
                    tracing::debug!("Using raw encryption key");
                    return Ok(key);
                }
                if let Ok(key) = Self::from_base64(material) {
                    tracing::debug!("Using base64 encryption key");
                    return Ok(key);
                }
                tracing::debug!("Deriving encryption key from passphrase");
                Ok(Self::from_passphrase(material))
            }
        }
    }

    /// Key bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    fn from_raw(material: &str) -> Option<Self> {
        <[u8; KEY_LEN]>::try_from(material.as_bytes()).ok().map(Self)
    }

    fn from_base64(material: &str) -> Result<Self, CryptoError> {
        let decoded = BASE64
            .decode(material.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("invalid base64: {e}")))?;
        let bytes = <[u8; KEY_LEN]>::try_from(decoded.as_slice()).map_err(|_| {
            CryptoError::InvalidKey(format!(
                "base64 key must decode to {KEY_LEN} bytes, got {}",
                decoded.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    fn from_passphrase(material: &str) -> Self {
        Self(Sha256::digest(material.as_bytes()).into())
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}
