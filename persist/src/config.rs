use serde::Deserialize;

/// Serializer settings, usually loaded from a `[persist]`-style TOML file.
///
/// Every key is optional:
///
/// ```toml
/// pretty = true
/// strict_types = false
/// reconnect_live_entities = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    /// Write indented, multi-line RON.
    pub pretty: bool,
    /// Fail the load on a field of the wrong type instead of keeping the
    /// field's previous value.
    pub strict_types: bool,
    /// Seed each load's reference table with live entities that already
    /// carry a runtime reference, so references reconnect to them instead of
    /// spawning new template instances.
    pub reconnect_live_entities: bool,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            pretty: true,
            strict_types: false,
            reconnect_live_entities: false,
        }
    }
}

impl PersistConfig {
    /// Parses a config from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| format!("failed to parse persist config: {e}"))
    }

    /// Loads a config file, falling back to defaults if it is missing or
    /// invalid.
    pub fn load_or_default(path: &std::path::Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                log::info!("No persist config at {} ({e}), using defaults", path.display());
                return Self::default();
            }
        };
        match Self::from_toml_str(&text) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("{e}; using defaults");
                Self::default()
            }
        }
    }
}
