use std::{
    fs,
    path::{Path, PathBuf},
};

use color_eyre::Result;
use dirs::config_dir;
use serde::{Deserialize, Serialize};

const DEFAULT_BOX: &str = "default";
const DEFAULT_LOG_PREFIX: &str = "kvbox";
const DEFAULT_SECRET_SERVICE: &str = "kvbox";

/// User-level configuration loaded from `~/.config/kvbox/config.toml` (platform-specific).
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Override for the directory holding box files.
    pub data_dir: Option<PathBuf>,
    /// Box opened when `--box` is not given.
    pub box_name: Option<String>,
    /// Label attached to store log lines.
    pub log_prefix: Option<String>,
    /// Keyring service under which the encryption key is stored.
    pub secret_service: Option<String>,
}

impl Config {
    pub fn box_name(&self) -> &str {
        self.box_name.as_deref().unwrap_or(DEFAULT_BOX)
    }

    pub fn log_prefix(&self) -> &str {
        self.log_prefix.as_deref().unwrap_or(DEFAULT_LOG_PREFIX)
    }

    pub fn secret_service(&self) -> &str {
        self.secret_service
            .as_deref()
            .unwrap_or(DEFAULT_SECRET_SERVICE)
    }
}

/// Load config from the default path; if missing, return defaults.
pub fn load() -> Result<Config> {
    let path = default_path()?;
    load_from_path(path)
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("kvbox").join("config.toml"))
}

/// Write the config to the default path unless a file is already there.
pub fn write_default_if_missing(config: &Config) -> Result<PathBuf> {
    write_if_missing(config, &default_path()?)
}

fn write_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_default_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = load_from_path(dir.path().join("config.toml")).expect("load");
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.box_name(), "default");
        assert_eq!(cfg.secret_service(), "kvbox");
    }

    #[test]
    fn parses_custom_config() {
        let contents = r#"
            data_dir = "/tmp/kvbox-data"
            box_name = "settings"
            log_prefix = "Settings"
            secret_service = "com.example.app"
        "#;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, contents).expect("write temp config");

        let cfg = load_from_path(&path).expect("load");
        assert_eq!(
            cfg,
            Config {
                data_dir: Some(PathBuf::from("/tmp/kvbox-data")),
                box_name: Some("settings".into()),
                log_prefix: Some("Settings".into()),
                secret_service: Some("com.example.app".into()),
            }
        );
        assert_eq!(cfg.log_prefix(), "Settings");
    }

    #[test]
    fn write_creates_file_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        let cfg = Config {
            box_name: Some("prefs".into()),
            ..Config::default()
        };

        write_if_missing(&cfg, &path).expect("write should succeed");
        let other = Config {
            box_name: Some("clobbered".into()),
            ..Config::default()
        };
        let second = write_if_missing(&other, &path).expect("second write ok");
        assert_eq!(second, path);

        let loaded = load_from_path(&path).expect("load");
        assert_eq!(loaded, cfg);
    }
}
