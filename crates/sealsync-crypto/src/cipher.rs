//! AES-256-GCM file cipher
//!
//! Files are sealed as a STREAM of authenticated frames so neither side
//! holds more than two frames in memory:
//!
//! ```text
//! nonce prefix (7) | frame 0 | frame 1 | ... | last frame
//!                    └ 64 KiB plaintext + 16-byte tag, the last one shorter
//! ```
//!
//! Each frame's nonce is the prefix, a 32-bit big-endian counter and a
//! last-frame flag, so dropped, reordered or truncated frames fail to open.
//! A fresh random prefix is drawn for every encryption.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::stream::{DecryptorBE32, EncryptorBE32};
use aes_gcm::aead::{KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key};

use sealsync_core::ports::IFileCipher;

use crate::key::EncryptionKey;
use crate::CryptoError;

/// Random nonce prefix written at the start of every sealed file
pub const NONCE_PREFIX_LEN: usize = 7;

/// Authentication tag length for AES-GCM
pub const TAG_LEN: usize = 16;

/// Plaintext bytes per frame
pub const CHUNK_LEN: usize = 64 * 1024;

const FRAME_LEN: usize = CHUNK_LEN + TAG_LEN;

/// [`IFileCipher`] adapter backed by AES-256-GCM
#[derive(Clone)]
pub struct AesGcmFileCipher {
    cipher: Aes256Gcm,
}

impl AesGcmFileCipher {
    #[must_use]
    pub fn new(key: &EncryptionKey) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypt `input` into `output`
    ///
    /// # Errors
    /// Returns an error if either file cannot be accessed.
    pub fn seal_file(&self, input: &Path, output: &Path) -> Result<(), CryptoError> {
        let source = File::open(input).map_err(|e| CryptoError::io(input, e))?;
        let target = File::create(output).map_err(|e| CryptoError::io(output, e))?;
        let mut reader = BufReader::new(source);
        let mut writer = BufWriter::new(target);

        let mut prefix = [0u8; NONCE_PREFIX_LEN];
        OsRng.fill_bytes(&mut prefix);
        writer
            .write_all(&prefix)
            .map_err(|e| CryptoError::io(output, e))?;
        let mut encryptor =
            EncryptorBE32::from_aead(self.cipher.clone(), GenericArray::from_slice(&prefix));

        let seal_failed = || CryptoError::Seal(input.to_path_buf());
        let mut current = vec![0u8; CHUNK_LEN];
        let mut next = vec![0u8; CHUNK_LEN];
        let mut filled = read_full(&mut reader, &mut current).map_err(|e| CryptoError::io(input, e))?;
        let mut bytes = filled as u64;

        loop {
            let ahead = if filled == CHUNK_LEN {
                read_full(&mut reader, &mut next).map_err(|e| CryptoError::io(input, e))?
            } else {
                0
            };
            if ahead == 0 {
                let frame = encryptor
                    .encrypt_last(&current[..filled])
                    .map_err(|_| seal_failed())?;
                writer
                    .write_all(&frame)
                    .map_err(|e| CryptoError::io(output, e))?;
                break;
            }

            let frame = encryptor
                .encrypt_next(&current[..filled])
                .map_err(|_| seal_failed())?;
            writer
                .write_all(&frame)
                .map_err(|e| CryptoError::io(output, e))?;
            std::mem::swap(&mut current, &mut next);
            filled = ahead;
            bytes += ahead as u64;
        }
        writer.flush().map_err(|e| CryptoError::io(output, e))?;

        tracing::debug!(
            input = %input.display(),
            output = %output.display(),
            bytes,
            "Encrypted file"
        );
        Ok(())
    }

    /// Decrypt `input` into `output`
    ///
    /// The plaintext is written to a sibling `.part` file and renamed into
    /// place, so `output` never holds a partial or unauthenticated result.
    ///
    /// # Errors
    /// Returns an error on I/O failure, truncated input, or failed
    /// authentication of any frame.
    pub fn open_file(&self, input: &Path, output: &Path) -> Result<(), CryptoError> {
        let source = File::open(input).map_err(|e| CryptoError::io(input, e))?;
        let len = source
            .metadata()
            .map_err(|e| CryptoError::io(input, e))?
            .len();
        if len < (NONCE_PREFIX_LEN + TAG_LEN) as u64 {
            return Err(CryptoError::Truncated {
                path: input.to_path_buf(),
                len,
            });
        }

        let partial = partial_path(output);
        let opened = self.open_into(input, BufReader::new(source), &partial);
        let bytes = match opened {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = fs::remove_file(&partial);
                return Err(e);
            }
        };
        if let Err(e) = fs::rename(&partial, output) {
            let _ = fs::remove_file(&partial);
            return Err(CryptoError::io(output, e));
        }

        tracing::debug!(
            input = %input.display(),
            output = %output.display(),
            bytes,
            "Decrypted file"
        );
        Ok(())
    }

    /// Authenticate and decrypt every frame of `reader` into `partial`
    fn open_into(
        &self,
        input: &Path,
        mut reader: impl Read,
        partial: &Path,
    ) -> Result<u64, CryptoError> {
        let mut prefix = [0u8; NONCE_PREFIX_LEN];
        reader
            .read_exact(&mut prefix)
            .map_err(|e| CryptoError::io(input, e))?;
        let mut decryptor =
            DecryptorBE32::from_aead(self.cipher.clone(), GenericArray::from_slice(&prefix));

        let target = File::create(partial).map_err(|e| CryptoError::io(partial, e))?;
        let mut writer = BufWriter::new(target);
        let rejected = || CryptoError::Authentication(input.to_path_buf());

        let mut current = vec![0u8; FRAME_LEN];
        let mut next = vec![0u8; FRAME_LEN];
        let mut filled = read_full(&mut reader, &mut current).map_err(|e| CryptoError::io(input, e))?;
        let mut bytes = 0u64;

        loop {
            let ahead = if filled == FRAME_LEN {
                read_full(&mut reader, &mut next).map_err(|e| CryptoError::io(input, e))?
            } else {
                0
            };
            if ahead == 0 {
                let plain = decryptor
                    .decrypt_last(&current[..filled])
                    .map_err(|_| rejected())?;
                writer
                    .write_all(&plain)
                    .map_err(|e| CryptoError::io(partial, e))?;
                bytes += plain.len() as u64;
                break;
            }

            let plain = decryptor
                .decrypt_next(&current[..filled])
                .map_err(|_| rejected())?;
            writer
                .write_all(&plain)
                .map_err(|e| CryptoError::io(partial, e))?;
            bytes += plain.len() as u64;
            std::mem::swap(&mut current, &mut next);
            filled = ahead;
        }

        writer.flush().map_err(|e| CryptoError::io(partial, e))?;
        Ok(bytes)
    }
}

impl IFileCipher for AesGcmFileCipher {
    fn encrypt_file(&self, input: &Path, output: &Path) -> anyhow::Result<()> {
        Ok(self.seal_file(input, output)?)
    }

    fn decrypt_file(&self, input: &Path, output: &Path) -> anyhow::Result<()> {
        Ok(self.open_file(input, output)?)
    }
}

/// Fill `buf` unless the reader ends first; returns the bytes read
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn partial_path(output: &Path) -> PathBuf {
    let mut raw = output.as_os_str().to_owned();
    raw.push(".part");
    PathBuf::from(raw)
}
