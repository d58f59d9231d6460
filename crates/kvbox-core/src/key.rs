use std::fmt;

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use zeroize::Zeroizing;

/// Length in bytes of a box encryption key (256 bits).
pub const KEY_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("decode error: {0}")]
    Decode(String),
    #[error("expected {KEY_LEN} bytes, got {0}")]
    Length(usize),
}

/// Key material handed to the box engine while a box is being opened.
/// The bytes are wiped when the value is dropped and never printed.
pub struct EncryptionKey {
    bytes: Zeroizing<[u8; KEY_LEN]>,
}

impl EncryptionKey {
    pub fn generate() -> Self {
        Self::from_bytes(generate_secure_key())
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    /// Parse the base64url text form kept in the secret store.
    pub fn decode(encoded: &str) -> Result<Self, KeyError> {
        let raw = Zeroizing::new(
            URL_SAFE
                .decode(encoded.trim())
                .map_err(|e| KeyError::Decode(e.to_string()))?,
        );

        if raw.len() != KEY_LEN {
            return Err(KeyError::Length(raw.len()));
        }

        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        bytes.copy_from_slice(&raw);
        Ok(Self { bytes })
    }

    pub fn encode(&self) -> Zeroizing<String> {
        Zeroizing::new(URL_SAFE.encode(&*self.bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Fresh 256-bit key from the operating system CSPRNG.
pub fn generate_secure_key() -> [u8; KEY_LEN] {
    let mut bytes = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut bytes);
    bytes
}
