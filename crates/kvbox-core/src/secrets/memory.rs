use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;

use super::{SecretStore, SecretStoreError};

/// In-memory secret store with failure injection, for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemorySecretStore {
    inner: Arc<Mutex<SecretState>>,
}

#[derive(Debug, Default)]
struct SecretState {
    secrets: HashMap<String, String>,
    pending_read_failures: VecDeque<SecretStoreError>,
    fail_writes: bool,
    wipes: usize,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a secret directly, bypassing failure injection.
    pub fn insert(&self, name: &str, value: &str) {
        self.knobs()
            .secrets
            .insert(name.to_string(), value.to_string());
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.knobs().secrets.clone()
    }

    /// Make the next `count` reads fail with a platform error.
    pub fn fail_next_reads(&self, count: usize) {
        let failures = &mut self.knobs().pending_read_failures;
        failures.clear();
        failures.extend((0..count).map(|_| SecretStoreError::Platform {
            reason: "injected read failure".to_string(),
        }));
    }

    /// Make the next read fail with a local storage error instead of a platform one.
    pub fn break_next_read(&self) {
        self.knobs()
            .pending_read_failures
            .push_back(SecretStoreError::Storage {
                reason: "injected storage failure".to_string(),
            });
    }

    pub fn fail_writes(&self, fail: bool) {
        self.knobs().fail_writes = fail;
    }

    /// Number of `delete_all` calls served so far.
    pub fn wipes(&self) -> usize {
        self.knobs().wipes
    }

    fn knobs(&self) -> MutexGuard<'_, SecretState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> Result<MutexGuard<'_, SecretState>, SecretStoreError> {
        self.inner.lock().map_err(|err| SecretStoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn read(&self, name: &str) -> Result<Option<String>, SecretStoreError> {
        let mut state = self.state()?;
        if let Some(err) = state.pending_read_failures.pop_front() {
            return Err(err);
        }
        Ok(state.secrets.get(name).cloned())
    }

    async fn write(&self, name: &str, value: &str) -> Result<(), SecretStoreError> {
        let mut state = self.state()?;
        if state.fail_writes {
            return Err(SecretStoreError::Platform {
                reason: "injected write failure".to_string(),
            });
        }
        state.secrets.insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), SecretStoreError> {
        let mut state = self.state()?;
        state.secrets.clear();
        state.wipes += 1;
        Ok(())
    }
}
