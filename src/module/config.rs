//! Module configuration handed to [`ModuleContract::init`](super::ModuleContract::init).

use std::collections::HashMap;

/// Key for a JSON-encoded module configuration document.
pub const CONFIG_JSON_KEY: &str = "config_json";

/// Configuration for a module.
///
/// Holds string settings and, optionally, the raw TOML section the module
/// was configured from.
#[derive(Debug, Clone, Default)]
pub struct ModuleConfig {
    values: HashMap<String, String>,
    raw: Option<String>,
}

impl ModuleConfig {
    /// Creates a new empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration carrying a JSON document under `config_json`.
    #[must_use]
    pub fn from_json(json: impl Into<String>) -> Self {
        let mut config = Self::new();
        config.set_string(CONFIG_JSON_KEY, json);
        config
    }

    /// Creates a configuration from a raw TOML string.
    #[must_use]
    pub fn from_raw(raw: String) -> Self {
        Self {
            values: HashMap::new(),
            raw: Some(raw),
        }
    }

    /// Sets a string value.
    pub fn set_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Gets a string value.
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// The JSON configuration document, if any.
    #[must_use]
    pub fn json(&self) -> Option<&str> {
        self.get_string(CONFIG_JSON_KEY)
    }

    /// Gets the raw configuration string.
    #[must_use]
    pub fn raw_config(&self) -> Option<&str> {
        self.raw.as_deref()
    }
}
