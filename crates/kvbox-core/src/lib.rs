//! Core of kvbox: box engine and secret store contracts, the JSON value codec,
//! and the plain and secure stores built on them.
//! Concrete on-disk and OS keyring backends live in `kvbox-storage`.

pub mod codec;
pub mod engine;
pub mod key;
pub mod secrets;
pub mod store;

pub use engine::{BoxEngine, BoxHandle, EngineError, InMemoryBoxEngine};
pub use key::{generate_secure_key, EncryptionKey, KeyError};
pub use secrets::{InMemorySecretStore, SecretStore, SecretStoreError};
pub use store::{PlainStore, SecureStore, Store, StoreError, StoreExt, StoreOptions};
