//! Persisted tunnel settings.
//!
//! Settings live in a flat JSON object. Loading applies one precedence rule to
//! every field: built-in default first, then the persisted value if present.
//! Handles:
//! - Unknown keys (ignored)
//! - Malformed files (defaults plus a surfaced warning, never fatal)
//! - The 32-byte encryption key gate on save

pub mod form;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::engine::Mode;

/// Required length of the encryption key in bytes (UTF-8 encoded).
pub const ENCRYPTION_KEY_LEN: usize = 32;

/// Errors raised while reading, validating, or writing settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("settings file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed settings file: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("encryption key must be exactly {ENCRYPTION_KEY_LEN} bytes, got {actual}")]
    KeyLength { actual: usize },

    #[error("invalid value for {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

/// Messaging platform that carries the tunnel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Telegram,
    Vk,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Telegram => "telegram",
            TransportKind::Vk => "vk",
        }
    }
}

impl std::str::FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "telegram" | "tg" => Ok(TransportKind::Telegram),
            "vk" => Ok(TransportKind::Vk),
            _ => Err(ConfigError::InvalidField {
                field: "transport_type",
                value: s.to_string(),
            }),
        }
    }
}

/// Flat settings record shared by the engine and the control surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transport_type: TransportKind,

    // Telegram transport
    pub api_id: i64,
    pub api_hash: String,
    pub bot_token: String,
    #[serde(deserialize_with = "string_or_number")]
    pub chat_id: String,

    // VK transport
    pub vk_login: String,
    pub vk_token: String,
    #[serde(deserialize_with = "string_or_number")]
    pub vk_peer_id: String,
    pub vk_app_id: i64,

    // Network
    pub tap_interface_name: String,
    pub server_ip: String,
    pub client_ip: String,
    pub netmask: String,
    pub mtu: u32,
    pub subnet: String,
    pub encryption_key: String,
    /// Trades bandwidth for latency: true saves traffic, false lowers ping.
    pub compression_enabled: bool,

    // Batching
    /// Seconds the engine waits to coalesce packets into one message.
    pub batch_interval: f64,
    pub max_batch_size: u64,

    /// Networks routed around the tunnel so the transport itself stays reachable.
    #[serde(alias = "telegram_subnets")]
    pub bypass_subnets: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport_type: TransportKind::Telegram,
            api_id: 0,
            api_hash: String::new(),
            bot_token: String::new(),
            chat_id: String::new(),
            vk_login: String::new(),
            vk_token: String::new(),
            vk_peer_id: String::new(),
            vk_app_id: 0,
            tap_interface_name: "Ethernet 5".to_string(),
            server_ip: String::new(),
            client_ip: String::new(),
            netmask: String::new(),
            mtu: 0,
            subnet: String::new(),
            encryption_key: String::new(),
            compression_enabled: false,
            batch_interval: 0.05,
            max_batch_size: 524_288,
            bypass_subnets: default_bypass_subnets(),
        }
    }
}

impl Config {
    /// Local tunnel address shown for the given mode.
    pub fn ip_for_mode(&self, mode: Mode) -> &str {
        match mode {
            Mode::Server => &self.server_ip,
            Mode::Client => &self.client_ip,
        }
    }

    /// Check the invariants that must hold before the record is persisted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let actual = self.encryption_key.len();
        if actual != ENCRYPTION_KEY_LEN {
            return Err(ConfigError::KeyLength { actual });
        }
        Ok(())
    }
}

/// Telegram and VK/Mail.ru networks that must bypass the tunnel.
pub fn default_bypass_subnets() -> Vec<String> {
    [
        // Telegram
        "91.108.4.0/22",
        "91.108.8.0/22",
        "91.108.12.0/22",
        "91.108.16.0/22",
        "91.108.56.0/22",
        "149.154.160.0/20",
        "149.154.164.0/22",
        "149.154.168.0/22",
        "149.154.172.0/22",
        // VK and Mail.ru group
        "87.240.128.0/18",
        "93.186.224.0/20",
        "95.142.192.0/20",
        "185.32.248.0/22",
        "188.93.56.0/24",
        "128.140.168.0/21",
        "195.218.169.0/24",
        "79.137.183.0/24",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Chat and peer ids are often written as bare JSON numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
    })
}

/// Result of loading settings: the record to use plus any recovered problem.
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: Config,
    /// Set when the file existed but could not be used; `config` is then the defaults.
    pub warning: Option<ConfigError>,
}

/// Reads and writes the settings file at a fixed path.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings, falling back to defaults if the file is missing or malformed.
    pub fn load(&self) -> LoadedConfig {
        if !self.path.exists() {
            tracing::info!(
                "No settings file at {}, using defaults",
                self.path.display()
            );
            return LoadedConfig {
                config: Config::default(),
                warning: None,
            };
        }

        match self.read() {
            Ok(config) => {
                tracing::info!("Settings loaded from {}", self.path.display());
                LoadedConfig {
                    config,
                    warning: None,
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to read settings from {}: {e}. Falling back to defaults.",
                    self.path.display()
                );
                LoadedConfig {
                    config: Config::default(),
                    warning: Some(e),
                }
            }
        }
    }

    fn read(&self) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Persist settings. Rejected without touching the file if validation fails.
    pub fn save(&self, config: &Config) -> Result<(), ConfigError> {
        config.validate()?;

        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        config.serialize(&mut ser)?;

        // Write beside the target and rename so a crash never leaves a half-written file.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &buf)?;
        std::fs::rename(&tmp, &self.path)?;

        tracing::info!(
            "Settings saved to {} (transport: {})",
            self.path.display(),
            config.transport_type.as_str()
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const VALID_KEY: &str = "0123456789abcdef0123456789abcdef";

    pub(crate) fn make_config() -> Config {
        Config {
            transport_type: TransportKind::Vk,
            api_id: 123456,
            api_hash: "hash".into(),
            bot_token: "123:token".into(),
            chat_id: "-1001".into(),
            vk_login: "user@example.com".into(),
            vk_token: "vk1.a.token".into(),
            vk_peer_id: "2000000001".into(),
            vk_app_id: 6121396,
            tap_interface_name: "tap0".into(),
            server_ip: "10.8.0.1".into(),
            client_ip: "10.8.0.2".into(),
            netmask: "255.255.255.0".into(),
            mtu: 1400,
            subnet: "10.8.0.0/24".into(),
            encryption_key: VALID_KEY.into(),
            compression_enabled: true,
            batch_interval: 0.1,
            max_batch_size: 65536,
            bypass_subnets: vec!["1.2.3.0/24".into()],
        }
    }

    pub(crate) fn temp_store() -> (tempfile::TempDir, ConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.json"));
        (dir, store)
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let (_dir, store) = temp_store();
        let config = make_config();

        store.save(&config).unwrap();
        let loaded = store.load();

        assert!(loaded.warning.is_none());
        assert_eq!(loaded.config, config);
    }

    #[test]
    fn test_missing_file_yields_defaults_without_warning() {
        let (_dir, store) = temp_store();
        let loaded = store.load();
        assert!(loaded.warning.is_none());
        assert_eq!(loaded.config, Config::default());
    }

    #[test]
    fn test_malformed_file_yields_defaults_with_warning() {
        let (_dir, store) = temp_store();
        std::fs::write(store.path(), "{ not json").unwrap();

        let loaded = store.load();
        assert!(matches!(loaded.warning, Some(ConfigError::Malformed(_))));
        assert_eq!(loaded.config, Config::default());
    }

    #[test]
    fn test_wrong_type_yields_defaults_with_warning() {
        let (_dir, store) = temp_store();
        std::fs::write(store.path(), r#"{"api_id": "not a number"}"#).unwrap();

        let loaded = store.load();
        assert!(loaded.warning.is_some());
        assert_eq!(loaded.config.api_id, 0);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let (_dir, store) = temp_store();
        std::fs::write(
            store.path(),
            r#"{"server_ip": "10.0.0.1", "favourite_colour": "green"}"#,
        )
        .unwrap();

        let loaded = store.load();
        assert!(loaded.warning.is_none());
        assert_eq!(loaded.config.server_ip, "10.0.0.1");
    }

    #[test]
    fn test_legacy_telegram_subnets_key_is_read() {
        let (_dir, store) = temp_store();
        std::fs::write(
            store.path(),
            r#"{"server_ip": "10.0.0.1", "telegram_subnets": ["149.154.160.0/20"]}"#,
        )
        .unwrap();

        let loaded = store.load();
        assert!(loaded.warning.is_none());
        assert_eq!(loaded.config.bypass_subnets, vec!["149.154.160.0/20".to_string()]);

        // Saving writes the current key name.
        store.save(&Config {
            encryption_key: VALID_KEY.into(),
            ..loaded.config
        })
        .unwrap();
        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(text.contains("\"bypass_subnets\""));
        assert!(!text.contains("telegram_subnets"));
    }

    #[test]
    fn test_absent_keys_take_defaults() {
        let (_dir, store) = temp_store();
        std::fs::write(store.path(), r#"{"mtu": 1280}"#).unwrap();

        let config = store.load().config;
        assert_eq!(config.mtu, 1280);
        assert_eq!(config.batch_interval, 0.05);
        assert_eq!(config.max_batch_size, 524_288);
        assert_eq!(config.tap_interface_name, "Ethernet 5");
        assert_eq!(config.bypass_subnets, default_bypass_subnets());
    }

    #[test]
    fn test_every_field_prefers_persisted_value() {
        // Fields that used to be hardcoded regardless of the file follow the same rule.
        let (_dir, store) = temp_store();
        std::fs::write(
            store.path(),
            r#"{"tap_interface_name": "tap9", "compression_enabled": true, "transport_type": "vk"}"#,
        )
        .unwrap();

        let config = store.load().config;
        assert_eq!(config.tap_interface_name, "tap9");
        assert!(config.compression_enabled);
        assert_eq!(config.transport_type, TransportKind::Vk);
    }

    #[test]
    fn test_numeric_chat_and_peer_ids_are_accepted() {
        let (_dir, store) = temp_store();
        std::fs::write(
            store.path(),
            r#"{"chat_id": -1001234, "vk_peer_id": 2000000001}"#,
        )
        .unwrap();

        let loaded = store.load();
        assert!(loaded.warning.is_none());
        assert_eq!(loaded.config.chat_id, "-1001234");
        assert_eq!(loaded.config.vk_peer_id, "2000000001");
    }

    #[test]
    fn test_save_rejects_short_and_long_keys() {
        let (_dir, store) = temp_store();
        let original = make_config();
        store.save(&original).unwrap();
        let before = std::fs::read_to_string(store.path()).unwrap();

        for len in [31, 33] {
            let mut config = make_config();
            config.encryption_key = "k".repeat(len);
            config.server_ip = "192.168.1.1".into();

            let err = store.save(&config).unwrap_err();
            assert!(matches!(err, ConfigError::KeyLength { actual } if actual == len));
            assert_eq!(std::fs::read_to_string(store.path()).unwrap(), before);
        }
    }

    #[test]
    fn test_save_rejected_key_writes_nothing_when_no_file_exists() {
        let (_dir, store) = temp_store();
        let mut config = make_config();
        config.encryption_key = "short".into();

        assert!(store.save(&config).is_err());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_key_length_counts_utf8_bytes() {
        let mut config = make_config();
        // 16 two-byte characters = 32 bytes.
        config.encryption_key = "ж".repeat(16);
        assert!(config.validate().is_ok());

        config.encryption_key = "ж".repeat(32);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::KeyLength { actual: 64 })
        ));
    }

    #[test]
    fn test_saved_file_uses_four_space_indent() {
        let (_dir, store) = temp_store();
        store.save(&make_config()).unwrap();
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\n    \"api_id\": 123456"));
    }

    #[test]
    fn test_ip_for_mode() {
        let config = make_config();
        assert_eq!(config.ip_for_mode(Mode::Server), "10.8.0.1");
        assert_eq!(config.ip_for_mode(Mode::Client), "10.8.0.2");
    }

    #[test]
    fn test_transport_kind_parses_aliases() {
        assert_eq!("Telegram".parse::<TransportKind>().unwrap(), TransportKind::Telegram);
        assert_eq!("vk".parse::<TransportKind>().unwrap(), TransportKind::Vk);
        assert!("smtp".parse::<TransportKind>().is_err());
    }
}
