//! File cipher port (driven/secondary port)
//!
//! Symmetric authenticated encryption of whole files. The output starts with
//! the nonce material, followed by the ciphertext; the key is held by the
//! adapter.
//!
//! Methods are synchronous; async callers run them on a blocking thread.

use std::path::Path;

/// Port trait for file encryption
pub trait IFileCipher: Send + Sync {
    /// Encrypt `input` into a new file at `output`
    fn encrypt_file(&self, input: &Path, output: &Path) -> anyhow::Result<()>;

    /// Decrypt `input` (as produced by `encrypt_file`) into `output`
    fn decrypt_file(&self, input: &Path, output: &Path) -> anyhow::Result<()>;
}
