use std::{
    collections::{BTreeMap, HashMap, HashSet},
    hash::{DefaultHasher, Hash, Hasher},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use async_trait::async_trait;
use serde_json::Value;

use super::{BoxEngine, BoxHandle, EngineError};
use crate::key::EncryptionKey;

/// In-memory box engine for tests and ephemeral sessions.
///
/// Boxes live as long as the engine (clones share them), so reopening a name
/// behaves like reopening a file after a restart. Key material is reduced to a
/// non-cryptographic fingerprint and only used to reject mismatched opens.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBoxEngine {
    inner: Arc<Mutex<EngineState>>,
}

#[derive(Debug, Default)]
struct EngineState {
    boxes: HashMap<String, Arc<MemoryBox>>,
    corrupted: HashSet<String>,
    pending_open_failures: usize,
    fail_all_opens: bool,
}

#[derive(Debug)]
struct MemoryBox {
    key_fingerprint: Option<u64>,
    entries: Mutex<BTreeMap<String, Value>>,
    removed: AtomicBool,
}

impl InMemoryBoxEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every open of `name` fail until the box is deleted from disk.
    pub fn corrupt(&self, name: &str) {
        self.knobs().corrupted.insert(name.to_string());
    }

    /// Fail the next `count` opens regardless of name.
    pub fn fail_next_opens(&self, count: usize) {
        self.knobs().pending_open_failures = count;
    }

    pub fn fail_all_opens(&self, fail: bool) {
        self.knobs().fail_all_opens = fail;
    }

    pub fn contains_box(&self, name: &str) -> bool {
        self.knobs().boxes.contains_key(name)
    }

    fn knobs(&self) -> MutexGuard<'_, EngineState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove_box(&self, name: &str, only: Option<&Arc<MemoryBox>>) -> Result<(), EngineError> {
        let mut state = self.inner.lock().map_err(poisoned)?;
        let is_current = match (state.boxes.get(name), only) {
            (Some(current), Some(expected)) => Arc::ptr_eq(current, expected),
            _ => true,
        };
        if is_current {
            if let Some(removed) = state.boxes.remove(name) {
                removed.removed.store(true, Ordering::Release);
            }
            state.corrupted.remove(name);
        }
        Ok(())
    }
}

#[async_trait]
impl BoxEngine for InMemoryBoxEngine {
    async fn open(
        &self,
        name: &str,
        key: Option<&EncryptionKey>,
    ) -> Result<Box<dyn BoxHandle>, EngineError> {
        let fingerprint = key.map(fingerprint);
        let mut state = self.inner.lock().map_err(poisoned)?;

        if state.fail_all_opens {
            return Err(injected_failure());
        }
        if state.pending_open_failures > 0 {
            state.pending_open_failures -= 1;
            return Err(injected_failure());
        }
        if state.corrupted.contains(name) {
            return Err(EngineError::Corrupted {
                name: name.to_string(),
                reason: "simulated corruption".to_string(),
            });
        }

        let contents = match state.boxes.get(name) {
            Some(existing) if existing.key_fingerprint != fingerprint => {
                return Err(EngineError::KeyMismatch {
                    name: name.to_string(),
                });
            }
            Some(existing) => Arc::clone(existing),
            None => {
                let created = Arc::new(MemoryBox {
                    key_fingerprint: fingerprint,
                    entries: Mutex::new(BTreeMap::new()),
                    removed: AtomicBool::new(false),
                });
                state.boxes.insert(name.to_string(), Arc::clone(&created));
                created
            }
        };

        Ok(Box::new(MemoryBoxHandle {
            name: name.to_string(),
            contents,
            engine: self.clone(),
        }))
    }

    async fn delete_from_disk(&self, name: &str) -> Result<(), EngineError> {
        self.remove_box(name, None)
    }
}

struct MemoryBoxHandle {
    name: String,
    contents: Arc<MemoryBox>,
    engine: InMemoryBoxEngine,
}

impl MemoryBoxHandle {
    fn entries(&self) -> Result<MutexGuard<'_, BTreeMap<String, Value>>, EngineError> {
        if self.contents.removed.load(Ordering::Acquire) {
            return Err(EngineError::Deleted {
                name: self.name.clone(),
            });
        }
        self.contents.entries.lock().map_err(poisoned)
    }
}

impl BoxHandle for MemoryBoxHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Result<Option<Value>, EngineError> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: Value) -> Result<(), EngineError> {
        self.entries()?.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), EngineError> {
        self.entries()?.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), EngineError> {
        self.entries()?.clear();
        Ok(())
    }

    fn contains_key(&self, key: &str) -> Result<bool, EngineError> {
        Ok(self.entries()?.contains_key(key))
    }

    fn keys(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.entries()?.keys().cloned().collect())
    }

    fn delete_from_disk(&self) -> Result<(), EngineError> {
        self.entries()?.clear();
        self.contents.removed.store(true, Ordering::Release);
        self.engine.remove_box(&self.name, Some(&self.contents))
    }
}

fn fingerprint(key: &EncryptionKey) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.as_bytes().hash(&mut hasher);
    hasher.finish()
}

fn injected_failure() -> EngineError {
    EngineError::Storage {
        reason: "injected open failure".to_string(),
    }
}

fn poisoned<T>(err: PoisonError<T>) -> EngineError {
    EngineError::Storage {
        reason: format!("lock poisoned: {err}"),
    }
}
