use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

use super::{
    access::{open_with_recovery, BoxAccess},
    Store, StoreError, StoreOptions,
};
use crate::{
    engine::BoxEngine,
    key::EncryptionKey,
    secrets::{SecretStore, SecretStoreError},
};

/// Secret-store entry holding the base64url box key. Shared by every secure box.
pub const ENCRYPTION_KEY_NAME: &str = "kvbox.encryption-key";

/// Store over a box encrypted with a key kept in a [`SecretStore`].
///
/// The key is provisioned before the box is opened. If the secret store cannot
/// be read at all, every secret in it is discarded and a new key is issued,
/// which also makes the old box unreadable and therefore discarded.
pub struct SecureStore {
    access: BoxAccess,
}

impl SecureStore {
    #[instrument(skip_all, fields(name = %options.name))]
    pub async fn init(
        engine: &dyn BoxEngine,
        secrets: &dyn SecretStore,
        options: StoreOptions,
    ) -> Result<Self, StoreError> {
        provision_key(secrets, &options.log_prefix).await?;

        let encoded = read_key(secrets, &options.log_prefix).await;
        let key = EncryptionKey::decode(&encoded);
        drop(encoded);

        let handle = open_with_recovery(engine, &options, Some(key.as_ref())).await?;
        drop(key);

        debug!(prefix = %options.log_prefix, "secure store ready");
        Ok(Self {
            access: BoxAccess::new(handle, options.log_prefix),
        })
    }

    fn header(&self) -> String {
        format!(
            "{} (encrypted box '{}')",
            self.access.log_prefix(),
            self.access.name()
        )
    }
}

/// Make sure a key exists under [`ENCRYPTION_KEY_NAME`], wiping the secret
/// store first when the platform denies access. Local failures are returned.
async fn provision_key(secrets: &dyn SecretStore, prefix: &str) -> Result<(), StoreError> {
    let present = match secrets.read(ENCRYPTION_KEY_NAME).await {
        Ok(existing) => existing
            .map(Zeroizing::new)
            .is_some_and(|value| !value.trim().is_empty()),
        Err(err @ SecretStoreError::Platform { .. }) => {
            warn!(prefix, %err, "secret store unreadable, deleting all secrets");
            if let Err(err) = secrets.delete_all().await {
                warn!(prefix, %err, "failed to delete secrets");
            }
            false
        }
        Err(err) => return Err(err.into()),
    };
    if present {
        return Ok(());
    }

    let key = EncryptionKey::generate();
    secrets.write(ENCRYPTION_KEY_NAME, &key.encode()).await?;
    info!(prefix, "issued new box encryption key");
    Ok(())
}

/// Empty when the key still cannot be read; the open then fails on the empty key.
async fn read_key(secrets: &dyn SecretStore, prefix: &str) -> Zeroizing<String> {
    match secrets.read(ENCRYPTION_KEY_NAME).await {
        Ok(Some(value)) => Zeroizing::new(value),
        Ok(None) => {
            warn!(prefix, "encryption key missing after provisioning");
            Zeroizing::new(String::new())
        }
        Err(err) => {
            warn!(prefix, %err, "encryption key unreadable after provisioning");
            Zeroizing::new(String::new())
        }
    }
}

#[async_trait]
impl Store for SecureStore {
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

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        engine::{EngineError, InMemoryBoxEngine},
        key::KEY_LEN,
        secrets::InMemorySecretStore,
        store::StoreExt,
    };

    fn options() -> StoreOptions {
        StoreOptions::new("vault").with_log_prefix("Vault")
    }

    async fn open(engine: &InMemoryBoxEngine, secrets: &InMemorySecretStore) -> SecureStore {
        SecureStore::init(engine, secrets, options())
            .await
            .expect("init")
    }

    fn stored_key(secrets: &InMemorySecretStore) -> String {
        secrets
            .snapshot()
            .get(ENCRYPTION_KEY_NAME)
            .cloned()
            .expect("key should be stored")
    }

    #[tokio::test]
    async fn first_init_provisions_a_key() {
        let secrets = InMemorySecretStore::new();
        let store = open(&InMemoryBoxEngine::new(), &secrets).await;

        let key = EncryptionKey::decode(&stored_key(&secrets)).expect("valid key");
        assert_eq!(key.as_bytes().len(), KEY_LEN);
        assert_eq!(store.name(), "vault");
        assert_eq!(store.get("anything"), None);
    }

    #[tokio::test]
    async fn restart_reuses_key_and_data() {
        let engine = InMemoryBoxEngine::new();
        let secrets = InMemorySecretStore::new();

        let first = open(&engine, &secrets).await;
        assert!(first.set_encoded("token", &json!({"sub": "ada"})).await);
        let key_after_first = stored_key(&secrets);
        drop(first);

        let second = open(&engine, &secrets).await;
        assert_eq!(stored_key(&secrets), key_after_first);
        assert_eq!(second.get("token"), Some(json!({"sub": "ada"})));
    }

    #[tokio::test]
    async fn unreadable_secret_store_is_wiped_and_rekeyed() {
        let engine = InMemoryBoxEngine::new();
        let secrets = InMemorySecretStore::new();
        let first = open(&engine, &secrets).await;
        assert!(first.set("k", json!(1)).await);
        drop(first);

        let old_key = stored_key(&secrets);
        secrets.insert("unrelated", "secret");
        secrets.fail_next_reads(1);

        let store = open(&engine, &secrets).await;
        let remaining = secrets.snapshot();
        assert_eq!(secrets.wipes(), 1);
        assert!(!remaining.contains_key("unrelated"));
        assert_ne!(remaining.get(ENCRYPTION_KEY_NAME), Some(&old_key));

        // The box was written under the old key, so it is discarded.
        assert!(store.get_all().await.is_empty());
        assert!(store.set("k", json!(2)).await);
        assert_eq!(store.get("k"), Some(json!(2)));
    }

    #[tokio::test]
    async fn empty_stored_key_is_replaced() {
        let secrets = InMemorySecretStore::new();
        secrets.insert(ENCRYPTION_KEY_NAME, "");

        open(&InMemoryBoxEngine::new(), &secrets).await;
        assert!(EncryptionKey::decode(&stored_key(&secrets)).is_ok());
    }

    #[tokio::test]
    async fn malformed_stored_key_fails_open() {
        let engine = InMemoryBoxEngine::new();
        let secrets = InMemorySecretStore::new();
        secrets.insert(ENCRYPTION_KEY_NAME, "dG9vLXNob3J0");

        let result = SecureStore::init(&engine, &secrets, options()).await;
        assert!(matches!(
            result,
            Err(StoreError::Open {
                source: EngineError::KeyMismatch { .. },
                ..
            })
        ));
    }

    #[tokio::test]
    async fn key_unreadable_after_provisioning_fails_open() {
        let engine = InMemoryBoxEngine::new();
        let plain = engine.open("vault", None).await.expect("plain open");
        plain.put("old", json!(1)).expect("put");
        drop(plain);

        let secrets = InMemorySecretStore::new();
        secrets.fail_next_reads(2);

        let result = SecureStore::init(&engine, &secrets, options()).await;
        assert!(matches!(result, Err(StoreError::Open { ref name, .. }) if name == "vault"));
        assert_eq!(secrets.wipes(), 1);
        assert!(EncryptionKey::decode(&stored_key(&secrets)).is_ok());
        assert!(!engine.contains_box("vault"));
    }

    #[tokio::test]
    async fn local_secret_store_failure_is_fatal_without_wipe() {
        let secrets = InMemorySecretStore::new();
        secrets.insert(ENCRYPTION_KEY_NAME, &EncryptionKey::generate().encode());
        secrets.insert("unrelated", "secret");
        secrets.break_next_read();

        let result = SecureStore::init(&InMemoryBoxEngine::new(), &secrets, options()).await;
        assert!(matches!(
            result,
            Err(StoreError::Secret(SecretStoreError::Storage { .. }))
        ));
        assert_eq!(secrets.wipes(), 0);
        assert_eq!(secrets.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn key_write_failure_is_fatal() {
        let secrets = InMemorySecretStore::new();
        secrets.fail_writes(true);

        let result = SecureStore::init(&InMemoryBoxEngine::new(), &secrets, options()).await;
        assert!(matches!(result, Err(StoreError::Secret(_))));
    }

    #[tokio::test]
    async fn corrupted_box_recovers_when_retry_succeeds() {
        let engine = InMemoryBoxEngine::new();
        let secrets = InMemorySecretStore::new();
        let first = open(&engine, &secrets).await;
        assert!(first.set("k", json!("v")).await);
        drop(first);
        engine.corrupt("vault");

        let store = open(&engine, &secrets).await;
        assert!(store.get_all().await.is_empty());
    }

    #[tokio::test]
    async fn init_fails_when_retry_after_wipe_fails() {
        let engine = InMemoryBoxEngine::new();
        let secrets = InMemorySecretStore::new();
        engine.fail_all_opens(true);

        let result = SecureStore::init(&engine, &secrets, options()).await;
        assert!(matches!(result, Err(StoreError::Open { .. })));
    }

    #[tokio::test]
    async fn plain_box_under_same_name_is_replaced() {
        let engine = InMemoryBoxEngine::new();
        let plain = engine.open("vault", None).await.expect("plain open");
        plain.put("leak", json!("plaintext")).expect("put");
        drop(plain);

        let store = open(&engine, &InMemorySecretStore::new()).await;
        assert!(!store.contains("leak").await);
    }

    #[tokio::test]
    async fn as_string_marks_box_as_encrypted() {
        let store = open(&InMemoryBoxEngine::new(), &InMemorySecretStore::new()).await;
        assert!(store.set("a", json!(true)).await);

        let dump = store.as_string().await;
        assert!(dump.contains("Vault (encrypted box 'vault')"));
        assert!(dump.contains("│ a: true"));
    }
}
