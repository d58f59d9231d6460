//! Concrete kvbox backends: an AES-GCM file box engine and an OS keyring
//! secret store.

pub mod file_engine;
pub mod keyring_secrets;

pub use file_engine::FileBoxEngine;
pub use keyring_secrets::KeyringSecretStore;
