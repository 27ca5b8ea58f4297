//! Key/value configuration loaded from JSON or TOML files.
//!
//! Values live in one [`serde_json::Value`] tree regardless of the source
//! format; TOML input is routed through serde so tables and arrays map onto
//! the same tree shape. Lookups are by top-level key with typed accessors,
//! plus [`Config::section`] for nested tables.

use std::fmt;
use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    root: Value,
}

impl Config {
    /// Load a config from a `.json` or `.toml` file, selected by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content),
            Some("toml") => Self::from_toml_str(&content),
            _ => Err(Error::UnsupportedConfigFormat(path.display().to_string())),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(Self {
            root: serde_json::from_str(json)?,
        })
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let value: toml::Value = toml::from_str(toml_str)?;
        Ok(Self {
            root: serde_json::to_value(value)?,
        })
    }

    /// Write the config as pretty-printed JSON.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.root)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Raw value lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.root.get(key)?.as_str()
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.root.get(key)?.as_i64()
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.root.get(key)?.as_u64()
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.root.get(key)?.as_f64()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.root.get(key)?.as_bool()
    }

    pub fn get_array(&self, key: &str) -> Option<&Vec<Value>> {
        self.root.get(key)?.as_array()
    }

    /// A nested table as its own `Config`.
    pub fn section(&self, key: &str) -> Option<Config> {
        let value = self.root.get(key)?;
        value.is_object().then(|| Config { root: value.clone() })
    }

    /// String lookup that fails loudly, for keys a caller cannot do without.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.get_str(key)
            .ok_or_else(|| Error::InvalidConfig(format!("missing or non-string key '{}'", key)))
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string_pretty(&self.root) {
            Ok(json) => f.write_str(&json),
            Err(_) => f.write_str("{}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_lookups() {
        let config = Config::from_json_str(
            r#"{"type":"demo","period_ms":250,"rate":0.5,"enabled":true,"tags":["a","b"]}"#,
        )
        .unwrap();
        assert_eq!(config.get_str("type"), Some("demo"));
        assert_eq!(config.get_u64("period_ms"), Some(250));
        assert_eq!(config.get_f64("rate"), Some(0.5));
        assert_eq!(config.get_bool("enabled"), Some(true));
        assert_eq!(config.get_array("tags").map(Vec::len), Some(2));
    }

    #[test]
    fn toml_maps_onto_the_same_tree() {
        let from_toml = Config::from_toml_str(
            "type = \"demo\"\nperiod_ms = 250\n\n[net]\nport = 7500\n",
        )
        .unwrap();
        assert_eq!(from_toml.get_str("type"), Some("demo"));
        assert_eq!(from_toml.get_u64("period_ms"), Some(250));
        let net = from_toml.section("net").expect("nested table");
        assert_eq!(net.get_u64("port"), Some(7500));
    }

    #[test]
    fn missing_keys_are_none() {
        let config = Config::from_json_str(r#"{"type":"demo"}"#).unwrap();
        assert_eq!(config.get_str("absent"), None);
        assert_eq!(config.get_u64("type"), None);
        assert!(config.section("type").is_none());
    }

    #[test]
    fn require_str_reports_the_key() {
        let config = Config::from_json_str("{}").unwrap();
        let err = config.require_str("type").unwrap_err();
        assert!(err.to_string().contains("type"));
    }

    #[test]
    fn unsupported_extension_is_an_error() {
        let dir = std::env::temp_dir();
        let path = dir.join("lanbus_config_test.yaml");
        fs::write(&path, "a: 1").unwrap();
        let result = Config::from_file(&path);
        let _ = fs::remove_file(&path);
        assert!(matches!(result, Err(Error::UnsupportedConfigFormat(_))));
    }
}
