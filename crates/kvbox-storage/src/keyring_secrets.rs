use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use kvbox_core::{store::ENCRYPTION_KEY_NAME, SecretStore, SecretStoreError};
use tracing::{instrument, warn};

/// Account holding the JSON list of names this store has written.
const INDEX_ACCOUNT: &str = "kvbox.secret-index";

/// OS keyring-backed secret store. Every secret is an entry under `service`.
///
/// The keyring cannot enumerate entries, so written names are tracked in an
/// index entry that `delete_all` walks. Entries are built once per name and
/// reused, so a credential written through this store is read back through the
/// same handle.
pub struct KeyringSecretStore {
    service: String,
    entries: Mutex<HashMap<String, Arc<keyring::Entry>>>,
}

impl KeyringSecretStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, name: &str) -> Result<Arc<keyring::Entry>, SecretStoreError> {
        let mut entries = self.entries.lock().map_err(|_| SecretStoreError::Storage {
            reason: "keyring entry cache lock poisoned".to_string(),
        })?;
        if let Some(entry) = entries.get(name) {
            return Ok(Arc::clone(entry));
        }
        let entry = Arc::new(keyring::Entry::new(&self.service, name).map_err(platform_err)?);
        entries.insert(name.to_string(), Arc::clone(&entry));
        Ok(entry)
    }

    fn load_index(&self) -> Result<BTreeSet<String>, SecretStoreError> {
        match lookup(self.entry(INDEX_ACCOUNT)?.get_password())? {
            Some(text) => parse_index(&text),
            None => Ok(BTreeSet::new()),
        }
    }

    fn save_index(&self, names: &BTreeSet<String>) -> Result<(), SecretStoreError> {
        let text = serde_json::to_string(names).map_err(|e| SecretStoreError::Storage {
            reason: format!("index encode failed: {e}"),
        })?;
        self.entry(INDEX_ACCOUNT)?
            .set_password(&text)
            .map_err(platform_err)
    }
}

#[async_trait]
impl SecretStore for KeyringSecretStore {
    // Keyring operations are synchronous; wrapped in async for trait compatibility.
    #[instrument(skip_all, fields(name = %name))]
    async fn read(&self, name: &str) -> Result<Option<String>, SecretStoreError> {
        lookup(self.entry(name)?.get_password())
    }

    #[instrument(skip_all, fields(name = %name))]
    async fn write(&self, name: &str, value: &str) -> Result<(), SecretStoreError> {
        self.entry(name)?
            .set_password(value)
            .map_err(platform_err)?;

        if let Some(index) = indexed_with(self.load_index(), name) {
            self.save_index(&index)?;
        }
        Ok(())
    }

    #[instrument(skip_all)]
    async fn delete_all(&self) -> Result<(), SecretStoreError> {
        let mut names = self.load_index().unwrap_or_else(|err| {
            warn!(%err, "secret index unreadable, deleting known names only");
            BTreeSet::new()
        });
        names.insert(ENCRYPTION_KEY_NAME.to_string());
        names.insert(INDEX_ACCOUNT.to_string());

        let mut first_failure = None;
        for name in &names {
            let deleted = self
                .entry(name)
                .and_then(|entry| forget(entry.delete_credential()));
            if let Err(err) = deleted {
                warn!(name = %name, %err, "failed to delete secret");
                first_failure.get_or_insert(err);
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Index to save after writing `name`, if it changed. An unreadable index is
/// left untouched rather than replaced by one that forgets earlier names.
fn indexed_with(
    loaded: Result<BTreeSet<String>, SecretStoreError>,
    name: &str,
) -> Option<BTreeSet<String>> {
    let mut index = match loaded {
        Ok(index) => index,
        Err(err) => {
            warn!(%err, name = %name, "secret index unreadable, leaving it as is");
            return None;
        }
    };
    index.insert(name.to_string()).then_some(index)
}

/// Map a keyring read: a missing entry is `None`, anything else is a platform failure.
fn lookup(result: keyring::Result<String>) -> Result<Option<String>, SecretStoreError> {
    match result {
        Ok(secret) => Ok(Some(secret)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => Err(platform_err(err)),
    }
}

/// Deleting an entry that does not exist is fine.
fn forget(result: keyring::Result<()>) -> Result<(), SecretStoreError> {
    match result {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(err) => Err(platform_err(err)),
    }
}

fn parse_index(text: &str) -> Result<BTreeSet<String>, SecretStoreError> {
    serde_json::from_str(text).map_err(|e| SecretStoreError::Platform {
        reason: format!("index decode failed: {e}"),
    })
}

fn platform_err(err: keyring::Error) -> SecretStoreError {
    SecretStoreError::Platform {
        reason: err.to_string(),
    }
}
