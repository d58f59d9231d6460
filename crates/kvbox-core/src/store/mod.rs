//! Named key-value stores layered over a [`BoxEngine`](crate::engine::BoxEngine).
//!
//! Both stores expose the same [`Store`] surface. Initialization is the only
//! fallible step visible to callers; once a store exists, failures are logged
//! and reported as `false` or `None`.

mod access;
mod plain;
mod secure;

pub use plain::PlainStore;
pub use secure::{SecureStore, ENCRYPTION_KEY_NAME};

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::{
    codec,
    engine::EngineError,
    secrets::SecretStoreError,
};

/// Identity of a store: the box it owns and the label used in its log lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub name: String,
    pub log_prefix: String,
}

impl StoreOptions {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            log_prefix: name.clone(),
            name,
        }
    }

    pub fn with_log_prefix(mut self, log_prefix: impl Into<String>) -> Self {
        self.log_prefix = log_prefix.into();
        self
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The box could not be opened even after it was discarded.
    #[error("failed to open box {name}: {source}")]
    Open {
        name: String,
        #[source]
        source: EngineError,
    },
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Secret(#[from] SecretStoreError),
    #[error("blocking worker failed: {reason}")]
    Worker { reason: String },
}

/// Operations shared by the plain and secure stores.
#[async_trait]
pub trait Store: Send + Sync {
    /// Name of the owned box.
    fn name(&self) -> &str;

    /// Read and decode a value. Never fails: absent keys and internal errors both give `None`.
    fn get(&self, key: &str) -> Option<Value>;

    /// Write `value` verbatim. `false` when the write did not complete.
    async fn set(&self, key: &str, value: Value) -> bool;

    async fn contains(&self, key: &str) -> bool;

    async fn delete(&self, key: &str) -> bool;

    async fn clear(&self) -> bool;

    /// Every entry, decoded with the same rule as [`Store::get`].
    async fn get_all(&self) -> BTreeMap<String, Value>;

    /// Bordered dump of all entries. Diagnostic output, not a format to parse.
    async fn as_string(&self) -> String;

    /// Emit [`Store::as_string`] at debug level.
    async fn log(&self);
}

/// Typed helpers built on the JSON codec.
#[async_trait]
pub trait StoreExt: Store {
    /// Encode `value` as JSON text and store the string.
    async fn set_encoded<T>(&self, key: &str, value: &T) -> bool
    where
        T: Serialize + Sync + ?Sized,
    {
        match codec::encode(value) {
            Ok(text) => self.set(key, Value::String(text)).await,
            Err(err) => {
                warn!(store = self.name(), key, %err, "encode failed");
                false
            }
        }
    }

    fn get_decoded<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|value| codec::decode_into(value).ok())
    }
}

impl<S: Store + ?Sized> StoreExt for S {}
