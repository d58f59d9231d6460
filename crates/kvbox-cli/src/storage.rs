use std::path::PathBuf;

use crate::config::Config;
use color_eyre::Result;
use dirs::data_dir;
use kvbox_core::{PlainStore, SecureStore, Store, StoreOptions};
use kvbox_storage::{FileBoxEngine, KeyringSecretStore};
use tracing::debug;

/// Resolve the default data directory for kvbox.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("kvbox"))
}

/// Build the file engine, honoring the config's data directory override.
pub fn engine_from_config(config: &Config) -> Result<FileBoxEngine> {
    let root = match &config.data_dir {
        Some(root) => root.clone(),
        None => default_data_dir()?,
    };
    debug!(?root, "using box directory");
    Ok(FileBoxEngine::new(root))
}

pub fn options_for(config: &Config, box_name: Option<&str>) -> StoreOptions {
    StoreOptions::new(box_name.unwrap_or(config.box_name())).with_log_prefix(config.log_prefix())
}

/// Open the requested store; the secure variant pulls its key from the OS keyring.
pub async fn open_store(
    config: &Config,
    secure: bool,
    box_name: Option<&str>,
) -> Result<Box<dyn Store>> {
    let engine = engine_from_config(config)?;
    let options = options_for(config, box_name);

    if secure {
        let secrets = KeyringSecretStore::new(config.secret_service());
        let store = SecureStore::init(&engine, &secrets, options).await?;
        return Ok(Box::new(store));
    }

    let store = PlainStore::init(&engine, options).await?;
    Ok(Box::new(store))
}
