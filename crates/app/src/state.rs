use std::{fs, path::PathBuf};

use common::crypto::SecretKey;
use serde::{Deserialize, Serialize};

use crate::database::{Database, DatabaseSetupError};

pub const APP_NAME: &str = "draftsync";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DB_FILE_NAME: &str = "db.sqlite";
pub const KEY_FILE_NAME: &str = "node.pem";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// TCP port the daemon accepts peer connections on
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Simultaneous peer sessions allowed per project
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,
    /// Default log filter when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Peers (`host:port`) the daemon dials for every project
    #[serde(default)]
    pub connect: Vec<String>,
}

fn default_listen_port() -> u16 {
    7450
}

fn default_max_peers() -> usize {
    common::peer::DEFAULT_MAX_PEERS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            max_peers: default_max_peers(),
            log_level: default_log_level(),
            connect: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the state directory (~/.draftsync)
    pub app_dir: PathBuf,
    /// Path to the SQLite database
    pub db_path: PathBuf,
    /// Path to the node key PEM file
    pub key_path: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the state directory path (custom or default ~/.draftsync)
    pub fn app_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Initialize a new state directory
    pub fn init(custom_path: Option<PathBuf>, config: Option<AppConfig>) -> Result<Self, StateError> {
        let app_dir = Self::app_dir(custom_path)?;
        if app_dir.join(CONFIG_FILE_NAME).exists() {
            return Err(StateError::AlreadyInitialized);
        }
        fs::create_dir_all(&app_dir)?;

        // the node key identifies this device to peers
        let key = SecretKey::generate();
        let key_path = app_dir.join(KEY_FILE_NAME);
        fs::write(&key_path, key.to_pem())?;

        let config = config.unwrap_or_default();
        let config_path = app_dir.join(CONFIG_FILE_NAME);
        fs::write(&config_path, toml::to_string_pretty(&config)?)?;

        // the schema is applied on first connect
        let db_path = app_dir.join(DB_FILE_NAME);
        fs::write(&db_path, "")?;

        Ok(Self {
            app_dir,
            db_path,
            key_path,
            config_path,
            config,
        })
    }

    /// Load existing state from the state directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let app_dir = Self::app_dir(custom_path)?;
        if !app_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let db_path = app_dir.join(DB_FILE_NAME);
        let key_path = app_dir.join(KEY_FILE_NAME);
        let config_path = app_dir.join(CONFIG_FILE_NAME);

        for (path, name) in [
            (&db_path, DB_FILE_NAME),
            (&key_path, KEY_FILE_NAME),
            (&config_path, CONFIG_FILE_NAME),
        ] {
            if !path.exists() {
                return Err(StateError::MissingFile(name.to_string()));
            }
        }

        let config: AppConfig = toml::from_str(&fs::read_to_string(&config_path)?)?;

        Ok(Self {
            app_dir,
            db_path,
            key_path,
            config_path,
            config,
        })
    }

    /// Load the node key from the key file
    pub fn load_key(&self) -> Result<SecretKey, StateError> {
        let pem = fs::read_to_string(&self.key_path)?;
        SecretKey::from_pem(&pem).map_err(|e| StateError::InvalidKey(e.to_string()))
    }

    pub async fn database(&self) -> Result<Database, StateError> {
        Ok(Database::connect(&self.db_path).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("draftsync directory not initialized. Run 'draftsync init' first")]
    NotInitialized,

    #[error("draftsync directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("database error: {0}")]
    Database(#[from] DatabaseSetupError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_init_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state");
        let config = AppConfig {
            connect: vec!["127.0.0.1:7451".to_string()],
            ..AppConfig::default()
        };

        let created = AppState::init(Some(path.clone()), Some(config.clone())).unwrap();
        let loaded = AppState::load(Some(path.clone())).unwrap();
        assert_eq!(loaded.config, config);
        assert_eq!(
            loaded.load_key().unwrap().public(),
            created.load_key().unwrap().public()
        );
        assert!(matches!(
            AppState::init(Some(path), None),
            Err(StateError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: AppConfig = toml::from_str("listen_port = 9000").unwrap();
        assert_eq!(config.listen_port, 9000);
        assert_eq!(config.max_peers, 3);
        assert_eq!(config.log_level, "info");
        assert!(config.connect.is_empty());
    }

    #[test]
    fn test_load_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AppState::load(Some(dir.path().join("nope"))),
            Err(StateError::NotInitialized)
        ));
    }
}
