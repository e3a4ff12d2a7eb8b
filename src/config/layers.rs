//! Loading and merging configuration layers.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Number, Value};
use thiserror::Error;
use tracing::warn;

use super::params::StoreParams;

/// Name of the TOML table holding store options.
const STORE_TABLE: &str = "store";

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(String),

    #[error("invalid parameter '{0}': expected Key=Value")]
    InvalidParam(String),

    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}

/// Split `Key=Value`. A bare `Key` is shorthand for `Key=true`.
pub fn parse_param(text: &str) -> Result<(String, String), ConfigError> {
    let text = text.trim().trim_start_matches('-');
    let (key, value) = match text.split_once('=') {
        Some((key, value)) => (key.trim(), value.trim()),
        None => (text, "true"),
    };
    if key.is_empty() {
        return Err(ConfigError::InvalidParam(text.to_string()));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Merge defaults, an optional TOML file and `Key=Value` parameters.
pub fn load_layers(config_file: Option<&Path>, params: &[String]) -> Result<StoreParams, ConfigError> {
    let defaults = serde_json::to_value(StoreParams::default())
        .map_err(|e| ConfigError::Parse(e.to_string()))?;
    let mut merged = defaults.as_object().cloned().unwrap_or_default();

    if let Some(path) = config_file {
        merged.extend(load_toml_file(path)?);
    }

    let mut overrides = Map::new();
    for param in params {
        for token in param.split(|c: char| c.is_whitespace() || c == ',') {
            if token.is_empty() {
                continue;
            }
            let (key, value) = parse_param(token)?;
            let Some((name, default)) = find_option(&defaults, &key) else {
                warn!(option = %key, "ignoring unknown store option");
                continue;
            };
            overrides.insert(name.clone(), typed_value(&name, default, &value)?);
        }
    }
    merged.extend(overrides);

    serde_json::from_value(Value::Object(merged)).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// The `[store]` table of a TOML file; a file without one contributes nothing.
fn load_toml_file(path: &Path) -> Result<Map<String, Value>, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let document: toml::Table = toml::from_str(&contents)
        .map_err(|e| ConfigError::Parse(format!("TOML parse error in {}: {e}", path.display())))?;
    match document.get(STORE_TABLE) {
        Some(toml::Value::Table(table)) => match serde_json::to_value(table) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Ok(Map::new()),
            Err(e) => Err(ConfigError::Parse(e.to_string())),
        },
        Some(_) => Err(ConfigError::Parse(format!(
            "[{STORE_TABLE}] in {} is not a table",
            path.display()
        ))),
        None => Ok(Map::new()),
    }
}

/// Case-insensitive lookup of an option name among the defaults.
fn find_option<'a>(defaults: &'a Value, key: &str) -> Option<(String, &'a Value)> {
    defaults
        .as_object()?
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .map(|(name, value)| (name.clone(), value))
}

/// Convert a parameter string to the JSON type of the option's default.
fn typed_value(key: &str, default: &Value, text: &str) -> Result<Value, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        key: key.to_string(),
        value: text.to_string(),
    };
    match default {
        Value::Bool(_) => match text.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
            "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
            _ => Err(invalid()),
        },
        Value::Number(_) => parse_number(text).ok_or_else(invalid),
        Value::Null => Ok(parse_number(text).unwrap_or_else(|| Value::String(text.to_string()))),
        _ => Ok(Value::String(text.to_string())),
    }
}

fn parse_number(text: &str) -> Option<Value> {
    if let Ok(integer) = text.parse::<u64>() {
        return Some(Value::Number(integer.into()));
    }
    text.parse::<f64>().ok().and_then(Number::from_f64).map(Value::Number)
}
