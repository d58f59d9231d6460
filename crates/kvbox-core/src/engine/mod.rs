//! Contract for the persistent box engine that stores raw entries.

mod memory;

pub use memory::InMemoryBoxEngine;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::key::EncryptionKey;

/// Errors produced by box engine implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The on-disk structure could not be read back.
    #[error("box {name} is corrupted: {reason}")]
    Corrupted { name: String, reason: String },
    /// The box exists but was written under different (or no) key material.
    #[error("box {name} cannot be opened with the supplied key")]
    KeyMismatch { name: String },
    /// The handle outlived a delete-from-disk.
    #[error("box {name} was deleted from disk")]
    Deleted { name: String },
    /// Underlying storage failure.
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

/// Opens named boxes, optionally encrypted.
#[async_trait]
pub trait BoxEngine: Send + Sync {
    /// Open (creating if missing) the box called `name`.
    async fn open(
        &self,
        name: &str,
        key: Option<&EncryptionKey>,
    ) -> Result<Box<dyn BoxHandle>, EngineError>;

    /// Remove the box from disk without opening it. Missing boxes are not an error.
    async fn delete_from_disk(&self, name: &str) -> Result<(), EngineError>;
}

/// An open box. Every mutation is durable when the call returns.
///
/// Implementations serialize access internally; calls may arrive from several
/// blocking worker threads at once.
pub trait BoxHandle: Send + Sync {
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> Result<Option<Value>, EngineError>;

    fn put(&self, key: &str, value: Value) -> Result<(), EngineError>;

    /// Remove a key (idempotent).
    fn delete(&self, key: &str) -> Result<(), EngineError>;

    fn clear(&self) -> Result<(), EngineError>;

    fn contains_key(&self, key: &str) -> Result<bool, EngineError>;

    fn keys(&self) -> Result<Vec<String>, EngineError>;

    /// Discard the box and everything in it. The handle is unusable afterwards.
    fn delete_from_disk(&self) -> Result<(), EngineError>;
}
