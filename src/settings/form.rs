//! The settings-save operation.
//!
//! A `SettingsForm` holds user-edited text for the common fields plus one group
//! per transport. Saving copies the common fields and only the selected
//! transport's group onto the current `Config`, then persists the result.

use super::{Config, ConfigError, ConfigStore, TransportKind};

/// VK application id used when the form value is not a number.
pub const DEFAULT_VK_APP_ID: i64 = 6121396;

/// Field names accepted by [`SettingsForm::set_field`].
pub const FORM_FIELDS: &[&str] = &[
    "transport",
    "tap",
    "key",
    "compression",
    "api_id",
    "api_hash",
    "bot_token",
    "chat_id",
    "vk_token",
    "vk_login",
    "vk_peer_id",
    "vk_app_id",
];

/// Editable copy of the user-facing settings, kept as raw text until saved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsForm {
    pub transport: TransportKind,
    pub tap_interface_name: String,
    pub encryption_key: String,
    pub compression_enabled: bool,

    pub api_id: String,
    pub api_hash: String,
    pub bot_token: String,
    pub chat_id: String,

    pub vk_token: String,
    pub vk_login: String,
    pub vk_peer_id: String,
    pub vk_app_id: String,
}

impl SettingsForm {
    /// Populate the form from the current settings.
    pub fn from_config(config: &Config) -> Self {
        Self {
            transport: config.transport_type,
            tap_interface_name: config.tap_interface_name.clone(),
            encryption_key: config.encryption_key.clone(),
            compression_enabled: config.compression_enabled,
            api_id: config.api_id.to_string(),
            api_hash: config.api_hash.clone(),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
            vk_token: config.vk_token.clone(),
            vk_login: config.vk_login.clone(),
            vk_peer_id: config.vk_peer_id.clone(),
            vk_app_id: config.vk_app_id.to_string(),
        }
    }

    /// Update one field by name. Unknown names and unparsable flags are rejected.
    pub fn set_field(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match name {
            "transport" => self.transport = value.parse()?,
            "tap" => self.tap_interface_name = value.to_string(),
            "key" => self.encryption_key = value.to_string(),
            "compression" => self.compression_enabled = parse_flag(value)?,
            "api_id" => self.api_id = value.to_string(),
            "api_hash" => self.api_hash = value.to_string(),
            "bot_token" => self.bot_token = value.to_string(),
            "chat_id" => self.chat_id = value.to_string(),
            "vk_token" => self.vk_token = value.to_string(),
            "vk_login" => self.vk_login = value.to_string(),
            "vk_peer_id" => self.vk_peer_id = value.to_string(),
            "vk_app_id" => self.vk_app_id = value.to_string(),
            _ => {
                return Err(ConfigError::InvalidField {
                    field: "name",
                    value: name.to_string(),
                })
            }
        }
        Ok(())
    }

    /// Produce the settings that saving this form would persist.
    ///
    /// Only the selected transport's group is copied; the other group keeps
    /// whatever `base` holds. The key gate runs last.
    pub fn apply(&self, base: &Config) -> Result<Config, ConfigError> {
        let mut config = base.clone();
        config.transport_type = self.transport;
        config.tap_interface_name = self.tap_interface_name.clone();
        config.encryption_key = self.encryption_key.clone();
        config.compression_enabled = self.compression_enabled;

        match self.transport {
            TransportKind::Telegram => {
                config.api_id =
                    self.api_id
                        .trim()
                        .parse()
                        .map_err(|_| ConfigError::InvalidField {
                            field: "api_id",
                            value: self.api_id.clone(),
                        })?;
                config.api_hash = self.api_hash.clone();
                config.bot_token = self.bot_token.clone();
                config.chat_id = self.chat_id.clone();
            }
            TransportKind::Vk => {
                config.vk_token = self.vk_token.clone();
                config.vk_login = self.vk_login.clone();
                config.vk_peer_id = self.vk_peer_id.clone();
                config.vk_app_id = self.vk_app_id.trim().parse().unwrap_or_else(|_| {
                    tracing::debug!(
                        "VK app id {:?} is not a number, using {DEFAULT_VK_APP_ID}",
                        self.vk_app_id
                    );
                    DEFAULT_VK_APP_ID
                });
            }
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_flag(value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidField {
            field: "compression",
            value: value.to_string(),
        }),
    }
}

/// Apply the form and persist the result. On any error nothing is written and
/// the caller keeps its current settings.
pub fn save_settings(
    store: &ConfigStore,
    current: &Config,
    form: &SettingsForm,
) -> Result<Config, ConfigError> {
    let updated = form.apply(current)?;
    store.save(&updated)?;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::super::tests::{make_config, temp_store, VALID_KEY};
    use super::*;

    #[test]
    fn test_form_round_trips_current_config() {
        let config = make_config();
        let form = SettingsForm::from_config(&config);
        assert_eq!(form.apply(&config).unwrap(), config);
    }

    #[test]
    fn test_telegram_save_leaves_vk_group_untouched() {
        let base = make_config();
        let mut form = SettingsForm::from_config(&base);
        form.set_field("transport", "telegram").unwrap();
        form.set_field("api_id", "777").unwrap();
        form.set_field("vk_login", "someone-else").unwrap();

        let updated = form.apply(&base).unwrap();
        assert_eq!(updated.transport_type, TransportKind::Telegram);
        assert_eq!(updated.api_id, 777);
        assert_eq!(updated.vk_login, base.vk_login);
    }

    #[test]
    fn test_vk_save_leaves_telegram_group_untouched() {
        let base = make_config();
        let mut form = SettingsForm::from_config(&base);
        form.set_field("transport", "vk").unwrap();
        form.set_field("api_id", "not-a-number").unwrap();
        form.set_field("vk_peer_id", "42").unwrap();

        let updated = form.apply(&base).unwrap();
        assert_eq!(updated.api_id, base.api_id);
        assert_eq!(updated.vk_peer_id, "42");
    }

    #[test]
    fn test_non_numeric_api_id_aborts_telegram_save() {
        let base = make_config();
        let mut form = SettingsForm::from_config(&base);
        form.set_field("transport", "telegram").unwrap();
        form.set_field("api_id", "12ab").unwrap();

        let err = form.apply(&base).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { field: "api_id", .. }));
    }

    #[test]
    fn test_non_numeric_vk_app_id_falls_back() {
        let base = make_config();
        let mut form = SettingsForm::from_config(&base);
        form.set_field("transport", "vk").unwrap();
        form.set_field("vk_app_id", "").unwrap();

        assert_eq!(form.apply(&base).unwrap().vk_app_id, DEFAULT_VK_APP_ID);
    }

    #[test]
    fn test_compression_flag_parsing() {
        let mut form = SettingsForm::default();
        form.set_field("compression", "on").unwrap();
        assert!(form.compression_enabled);
        form.set_field("compression", "false").unwrap();
        assert!(!form.compression_enabled);
        assert!(form.set_field("compression", "maybe").is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut form = SettingsForm::default();
        assert!(form.set_field("mtu", "1400").is_err());
    }

    #[test]
    fn test_every_listed_field_is_settable() {
        let mut form = SettingsForm::default();
        for name in FORM_FIELDS {
            let value = match *name {
                "transport" => "vk",
                "compression" => "off",
                _ => "1",
            };
            assert!(form.set_field(name, value).is_ok(), "field {name} rejected");
        }
    }

    #[test]
    fn test_save_settings_persists_and_returns_updated() {
        let (_dir, store) = temp_store();
        let base = make_config();
        let mut form = SettingsForm::from_config(&base);
        form.set_field("tap", "tap7").unwrap();

        let updated = save_settings(&store, &base, &form).unwrap();
        assert_eq!(updated.tap_interface_name, "tap7");
        assert_eq!(store.load().config, updated);
    }

    #[test]
    fn test_save_settings_with_bad_key_keeps_file() {
        let (_dir, store) = temp_store();
        let base = make_config();
        store.save(&base).unwrap();

        let mut form = SettingsForm::from_config(&base);
        form.set_field("key", &VALID_KEY[..31]).unwrap();

        let err = save_settings(&store, &base, &form).unwrap_err();
        assert!(matches!(err, ConfigError::KeyLength { actual: 31 }));
        assert_eq!(store.load().config, base);
    }
}
