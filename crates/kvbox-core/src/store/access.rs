use std::{collections::BTreeMap, sync::Arc};

use serde_json::Value;
use tracing::{debug, warn};

use super::{StoreError, StoreOptions};
use crate::{
    codec,
    engine::{BoxEngine, BoxHandle, EngineError},
    key::{EncryptionKey, KeyError},
};

const RULE: &str = "────────────────────────────────────────";

/// Key material for an encrypted open. A key that failed to decode is still
/// passed through so the attempt fails and the box is recovered like any other
/// unopenable box.
pub(crate) type BoxKey<'a> = Option<Result<&'a EncryptionKey, &'a KeyError>>;

/// Open `options.name`; if that fails, discard the box and open it exactly once more.
/// The second failure is returned to the caller.
pub(crate) async fn open_with_recovery(
    engine: &dyn BoxEngine,
    options: &StoreOptions,
    key: BoxKey<'_>,
) -> Result<Box<dyn BoxHandle>, StoreError> {
    let err = match open_once(engine, options, key).await {
        Ok(handle) => return Ok(handle),
        Err(err) => err,
    };
    warn!(
        prefix = %options.log_prefix,
        box_name = %options.name,
        %err,
        "open failed, discarding box"
    );

    discard_box(engine, options).await;

    open_once(engine, options, key)
        .await
        .map_err(|source| StoreError::Open {
            name: options.name.clone(),
            source,
        })
}

async fn open_once(
    engine: &dyn BoxEngine,
    options: &StoreOptions,
    key: BoxKey<'_>,
) -> Result<Box<dyn BoxHandle>, EngineError> {
    match key {
        None => engine.open(&options.name, None).await,
        Some(Ok(key)) => engine.open(&options.name, Some(key)).await,
        Some(Err(err)) => {
            debug!(prefix = %options.log_prefix, %err, "stored key does not decode");
            Err(EngineError::KeyMismatch {
                name: options.name.clone(),
            })
        }
    }
}

/// Best-effort removal of a box: open it without a key and delete it, or fall
/// back to deleting by name when it cannot be opened. Failures are only logged.
pub(crate) async fn discard_box(engine: &dyn BoxEngine, options: &StoreOptions) {
    let deleted = match engine.open(&options.name, None).await {
        Ok(handle) => handle.delete_from_disk(),
        Err(err) => Err(err),
    };

    if let Err(err) = deleted {
        debug!(prefix = %options.log_prefix, %err, "raw open for deletion failed");
        if let Err(err) = engine.delete_from_disk(&options.name).await {
            warn!(prefix = %options.log_prefix, %err, "could not delete box from disk");
        }
    }
}

/// The open box behind a store. Blocking engine calls for async operations
/// are moved onto the tokio blocking pool.
pub(crate) struct BoxAccess {
    handle: Arc<dyn BoxHandle>,
    log_prefix: String,
}

impl BoxAccess {
    pub(crate) fn new(handle: Box<dyn BoxHandle>, log_prefix: String) -> Self {
        Self {
            handle: Arc::from(handle),
            log_prefix,
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.handle.name()
    }

    pub(crate) fn log_prefix(&self) -> &str {
        &self.log_prefix
    }

    pub(crate) fn get(&self, key: &str) -> Option<Value> {
        match self.handle.get(key) {
            Ok(raw) => raw.map(codec::decode_stored),
            Err(err) => {
                warn!(prefix = %self.log_prefix, key, %err, "get failed");
                None
            }
        }
    }

    pub(crate) async fn set(&self, key: &str, value: Value) -> bool {
        let owned = key.to_string();
        let result = self.run(move |handle| handle.put(&owned, value)).await;
        self.settle("set", Some(key), result).is_some()
    }

    pub(crate) async fn contains(&self, key: &str) -> bool {
        let owned = key.to_string();
        let result = self.run(move |handle| handle.contains_key(&owned)).await;
        self.settle("contains", Some(key), result).unwrap_or(false)
    }

    pub(crate) async fn delete(&self, key: &str) -> bool {
        let owned = key.to_string();
        let result = self.run(move |handle| handle.delete(&owned)).await;
        self.settle("delete", Some(key), result).is_some()
    }

    pub(crate) async fn clear(&self) -> bool {
        let result = self.run(|handle| handle.clear()).await;
        self.settle("clear", None, result).is_some()
    }

    pub(crate) async fn get_all(&self) -> BTreeMap<String, Value> {
        let result = self
            .run(|handle| {
                let mut entries = BTreeMap::new();
                for key in handle.keys()? {
                    match handle.get(&key) {
                        Ok(Some(raw)) => {
                            entries.insert(key, codec::decode_stored(raw));
                        }
                        Ok(None) => {}
                        Err(err) => debug!(key = %key, %err, "skipping unreadable entry"),
                    }
                }
                Ok(entries)
            })
            .await;
        self.settle("get_all", None, result).unwrap_or_default()
    }

    pub(crate) async fn dump(&self, header: &str) -> String {
        let entries = self.get_all().await;
        render_dump(header, &entries)
    }

    pub(crate) async fn log(&self, header: &str) {
        let dump = self.dump(header).await;
        debug!(prefix = %self.log_prefix, "\n{dump}");
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&dyn BoxHandle) -> Result<T, EngineError> + Send + 'static,
        T: Send + 'static,
    {
        let handle = Arc::clone(&self.handle);
        tokio::task::spawn_blocking(move || op(handle.as_ref()))
            .await
            .map_err(|err| StoreError::Worker {
                reason: err.to_string(),
            })?
            .map_err(StoreError::from)
    }

    fn settle<T>(&self, op: &str, key: Option<&str>, result: Result<T, StoreError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(prefix = %self.log_prefix, op, key, %err, "box operation failed");
                None
            }
        }
    }
}

fn render_dump(header: &str, entries: &BTreeMap<String, Value>) -> String {
    let mut lines = vec![format!("┌{RULE}"), format!("│ {header}"), format!("├{RULE}")];
    if entries.is_empty() {
        lines.push("│ (empty)".to_string());
    }
    for (key, value) in entries {
        lines.push(format!("│ {key}: {value}"));
    }
    lines.push(format!("└{RULE}"));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::engine::InMemoryBoxEngine;

    #[test]
    fn dump_lists_entries_inside_border() {
        let mut entries = BTreeMap::new();
        entries.insert("a".to_string(), json!(1));
        entries.insert("b".to_string(), json!("x"));

        let dump = render_dump("prefs", &entries);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines[1], "│ prefs");
        assert_eq!(lines[3], "│ a: 1");
        assert_eq!(lines[4], "│ b: \"x\"");
        assert!(lines[0].starts_with('┌') && lines[5].starts_with('└'));
    }

    #[test]
    fn dump_marks_empty_box() {
        let dump = render_dump("prefs", &BTreeMap::new());
        assert!(dump.contains("│ (empty)"));
    }

    #[tokio::test]
    async fn discard_falls_back_to_delete_by_name() {
        let engine = InMemoryBoxEngine::new();
        let key = EncryptionKey::generate();
        engine.open("vault", Some(&key)).await.expect("open");

        discard_box(&engine, &StoreOptions::new("vault")).await;
        assert!(!engine.contains_box("vault"));
    }

    #[tokio::test]
    async fn recovery_gives_up_after_second_failure() {
        let engine = InMemoryBoxEngine::new();
        engine.fail_next_opens(3);

        let err = open_with_recovery(&engine, &StoreOptions::new("prefs"), None)
            .await
            .err()
            .expect("should fail");
        assert!(matches!(err, StoreError::Open { ref name, .. } if name == "prefs"));
    }

    #[tokio::test]
    async fn undecodable_key_discards_box_and_fails_open() {
        let engine = InMemoryBoxEngine::new();
        let handle = engine.open("vault", None).await.expect("open");
        handle.put("stale", json!(true)).expect("put");
        drop(handle);

        let bad = EncryptionKey::decode("").expect_err("empty key");
        let err = open_with_recovery(&engine, &StoreOptions::new("vault"), Some(Err(&bad)))
            .await
            .err()
            .expect("should fail");

        assert!(matches!(
            err,
            StoreError::Open {
                source: EngineError::KeyMismatch { .. },
                ..
            }
        ));
        assert!(!engine.contains_box("vault"));
    }
}
