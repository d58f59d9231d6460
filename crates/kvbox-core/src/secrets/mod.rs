//! Contract for the platform secret store that holds the box encryption key.

mod memory;

pub use memory::InMemorySecretStore;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecretStoreError {
    /// The platform keystore refused access or returned unreadable data.
    #[error("secret store platform error: {reason}")]
    Platform { reason: String },
    #[error("secret store failure: {reason}")]
    Storage { reason: String },
}

/// Small-secret storage (OS keychain in production; memory in tests).
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// `Ok(None)` when nothing is stored under `name`.
    async fn read(&self, name: &str) -> Result<Option<String>, SecretStoreError>;

    async fn write(&self, name: &str, value: &str) -> Result<(), SecretStoreError>;

    /// Remove every secret this store manages.
    async fn delete_all(&self) -> Result<(), SecretStoreError>;
}
