use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{
    access::{open_with_recovery, BoxAccess},
    Store, StoreError, StoreOptions,
};
use crate::engine::BoxEngine;

/// Store over an unencrypted box.
///
/// Plain data is not security critical, so a box that cannot be opened is
/// wiped and recreated empty rather than blocking startup.
pub struct PlainStore {
    access: BoxAccess,
}

impl PlainStore {
    #[instrument(skip_all, fields(name = %options.name))]
    pub async fn init(engine: &dyn BoxEngine, options: StoreOptions) -> Result<Self, StoreError> {
        let handle = open_with_recovery(engine, &options, None).await?;
        debug!(prefix = %options.log_prefix, "plain store ready");
        Ok(Self {
            access: BoxAccess::new(handle, options.log_prefix),
        })
    }

    fn header(&self) -> String {
        format!("{} (box '{}')", self.access.log_prefix(), self.access.name())
    }
}

#[async_trait]
impl Store for PlainStore {
    fn name(&self) -> &str {
        self.access.name()
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.access.get(key)
    }

    async fn set(&self, key: &str, value: Value) -> bool {
        self.access.set(key, value).await
    }

    async fn contains(&self, key: &str) -> bool {
        self.access.contains(key).await
    }

    async fn delete(&self, key: &str) -> bool {
        self.access.delete(key).await
    }

    async fn clear(&self) -> bool {
        self.access.clear().await
    }

    async fn get_all(&self) -> BTreeMap<String, Value> {
        self.access.get_all().await
    }

    async fn as_string(&self) -> String {
        self.access.dump(&self.header()).await
    }

    async fn log(&self) {
        self.access.log(&self.header()).await;
    }
}
