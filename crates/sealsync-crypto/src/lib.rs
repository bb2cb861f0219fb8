//! SealSync Crypto - File encryption adapter
//!
//! Implements the [`IFileCipher`](sealsync_core::ports::IFileCipher) port
//! with AES-256-GCM. Encrypted files hold a random nonce prefix followed by
//! a STREAM of authenticated 64 KiB frames.
//!
//! ## Modules
//!
//! - [`key`] - Loading the 256-bit key from configuration material
//! - [`cipher`] - Streaming file encryption and decryption

pub mod cipher;
pub mod key;

use std::path::PathBuf;

use thiserror::Error;

pub use cipher::AesGcmFileCipher;
pub use key::EncryptionKey;

/// Errors that can occur while loading keys or transforming files
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key material could not be turned into a 32-byte key
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Input is shorter than a nonce prefix plus one authentication tag
    #[error("Encrypted file too short ({len} bytes): {path}")]
    Truncated {
        /// Offending file
        path: PathBuf,
        /// Its length in bytes
        len: u64,
    },

    /// Authentication failed: wrong key or corrupted data
    #[error("Decryption failed for {0}")]
    Authentication(PathBuf),

    /// The AEAD refused to seal the plaintext
    #[error("Encryption failed for {0}")]
    Seal(PathBuf),

    /// Reading or writing a file failed
    #[error("IO error on {path}: {source}")]
    Io {
        /// File being read or written
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CryptoError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
