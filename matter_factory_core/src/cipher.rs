//! Length-preserving AES-256-CTR encryption of serialized records.

use crate::{tool, ProvisionError};
use aes::cipher::{KeyIvInit, StreamCipher};
use aes::Aes256;
use core::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

type Aes256Ctr128BE = ctr::Ctr128BE<Aes256>;

/// AES-256 key and the IV (initial counter block). Both are always explicit.
#[derive(Clone, PartialEq, Eq)]
pub struct CipherKey {
    pub key: [u8; 32],
    pub iv: [u8; 16],
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherKey")
            .field("key", &"<redacted>")
            .field("iv", &hex::encode(self.iv))
            .finish()
    }
}

/// Encrypts a serialized record. Implementations must be length preserving.
pub trait RecordCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProvisionError>;
}

/// In-process AES-256-CTR with a 128-bit big-endian counter, the same mode as
/// `openssl enc -aes-256-ctr`.
#[derive(Debug, Clone)]
pub struct Aes256Ctr {
    key: CipherKey,
}

impl Aes256Ctr {
    pub fn new(key: CipherKey) -> Self {
        Self { key }
    }

    fn apply(&self, data: &[u8]) -> Vec<u8> {
        let mut buf = data.to_vec();
        let mut cipher = Aes256Ctr128BE::new((&self.key.key).into(), (&self.key.iv).into());
        cipher.apply_keystream(&mut buf);
        buf
    }

    /// CTR decryption is the same keystream application as encryption.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Vec<u8> {
        self.apply(ciphertext)
    }
}

impl RecordCipher for Aes256Ctr {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProvisionError> {
        Ok(self.apply(plaintext))
    }
}

/// Encrypts by running `openssl enc -aes-256-ctr` on scratch files.
#[derive(Debug, Clone)]
pub struct OpensslCipher {
    pub path: PathBuf,
    key: CipherKey,
    pub timeout: Duration,
}

impl OpensslCipher {
    pub fn new(path: impl Into<PathBuf>, key: CipherKey) -> Self {
        Self {
            path: path.into(),
            key,
            timeout: tool::DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl RecordCipher for OpensslCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProvisionError> {
        let name = self.path.display().to_string();
        let scratch = tempfile::tempdir().map_err(|e| {
            ProvisionError::external_tool(&name, format!("unable to create scratch dir: {}", e))
        })?;
        let input = scratch.path().join("factory_data.bin");
        let output = scratch.path().join("factory_data.bin.enc");
        std::fs::write(&input, plaintext).map_err(|e| {
            ProvisionError::external_tool(&name, format!("unable to write cipher input: {}", e))
        })?;

        let mut cmd = Command::new(&self.path);
        cmd.args(["enc", "-aes-256-ctr", "-e", "-in"])
            .arg(&input)
            .arg("-out")
            .arg(&output)
            .arg("-K")
            .arg(hex::encode(self.key.key))
            .arg("-iv")
            .arg(hex::encode(self.key.iv));
        tool::run(cmd, self.timeout)?;

        std::fs::read(&output).map_err(|e| {
            ProvisionError::external_tool(&name, format!("unable to read cipher output: {}", e))
        })
    }
}
