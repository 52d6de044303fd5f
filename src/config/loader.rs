//! Configuration loading and default/user merging.
//!
//! The built-in default configuration is embedded in the binary. When a
//! user file is given, its sections merge over the defaults:
//!
//! - a `null` value deletes the entry from the defaults
//! - `filters` action lists *append* to the default list for that pattern
//! - `preprocessors` and `compressors` entries replace wholesale
//!
//! Scalar filter values are accepted and normalized to one-element lists.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;

use super::schema::{CompressorConfig, Config, PreprocessorConfig};

/// Built-in defaults, merged under any user configuration.
const DEFAULT_CONFIG: &str = include_str!("defaults.json");

/// Configuration loading error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// User configuration file does not exist
    #[error("{0} cannot be opened")]
    Missing(PathBuf),
    /// File I/O error
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// JSON parsing error
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    /// Structural error (wrong JSON shape)
    #[error("invalid config: {0}")]
    Invalid(String),
    /// Validation error
    #[error("config validation failed:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Validation(Vec<String>),
}

fn defaults_value() -> Value {
    serde_json::from_str(DEFAULT_CONFIG).expect("embedded default configuration is valid JSON")
}

/// Load configuration, merging an optional user file over the defaults.
///
/// A `Some` path that does not exist is fatal; `None` means defaults only.
pub fn load_config(user_path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut merged = defaults_value();

    if let Some(path) = user_path {
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        let contents = fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&contents)?;
        merge_user(&mut merged, &user)?;
    }

    finalize(merged)
}

/// The built-in default configuration.
pub fn default_config() -> Config {
    finalize(defaults_value()).expect("embedded default configuration is valid")
}

/// Merge a user configuration value over the defaults, in place.
fn merge_user(defaults: &mut Value, user: &Value) -> Result<(), ConfigError> {
    let user_obj = user
        .as_object()
        .ok_or_else(|| ConfigError::Invalid("top level must be an object".to_string()))?;

    for section in ["preprocessors", "compressors", "filters"] {
        let Some(user_section) = user_obj.get(section) else {
            continue;
        };
        let user_map = user_section.as_object().ok_or_else(|| {
            ConfigError::Invalid(format!("section '{}' must be an object", section))
        })?;

        let default_section = defaults
            .as_object_mut()
            .and_then(|o| {
                o.entry(section)
                    .or_insert_with(|| Value::Object(Map::new()))
                    .as_object_mut()
            })
            .ok_or_else(|| {
                ConfigError::Invalid(format!("section '{}' must be an object", section))
            })?;

        for (key, value) in user_map {
            if value.is_null() {
                default_section.remove(key);
            } else if section == "filters" {
                let mut actions = action_list(default_section.get(key), key)?;
                actions.extend(action_list(Some(value), key)?);
                default_section.insert(
                    key.clone(),
                    Value::Array(actions.into_iter().map(Value::String).collect()),
                );
            } else {
                default_section.insert(key.clone(), value.clone());
            }
        }
    }

    Ok(())
}

/// Normalize a filter value (scalar string or string array) to a list.
fn action_list(value: Option<&Value>, pattern: &str) -> Result<Vec<String>, ConfigError> {
    match value {
        None => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "filter '{}' actions must be strings",
                        pattern
                    ))
                })
            })
            .collect(),
        Some(_) => Err(ConfigError::Invalid(format!(
            "filter '{}' must be a string or list of strings",
            pattern
        ))),
    }
}

/// Decode the merged JSON into the typed configuration and validate it.
fn finalize(merged: Value) -> Result<Config, ConfigError> {
    let obj = merged
        .as_object()
        .ok_or_else(|| ConfigError::Invalid("top level must be an object".to_string()))?;

    let preprocessors: BTreeMap<String, PreprocessorConfig> = match obj.get("preprocessors") {
        Some(value) => serde_json::from_value(value.clone())?,
        None => BTreeMap::new(),
    };

    let compressors: CompressorConfig = match obj.get("compressors") {
        Some(value) => serde_json::from_value(value.clone())?,
        None => serde_json::from_value(Value::Object(Map::new()))?,
    };

    let mut filters = Vec::new();
    if let Some(section) = obj.get("filters") {
        let map = section
            .as_object()
            .ok_or_else(|| ConfigError::Invalid("section 'filters' must be an object".to_string()))?;
        for (pattern, value) in map {
            filters.push((pattern.clone(), action_list(Some(value), pattern)?));
        }
    }

    let config = Config {
        preprocessors,
        compressors,
        filters,
    };

    let errors = config.validate();
    if !errors.is_empty() {
        return Err(ConfigError::Validation(errors));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_user_config(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("treeprep.json");
        let mut file = fs::File::create(&path).expect("should create config file");
        file.write_all(contents.as_bytes())
            .expect("should write config content");
        path
    }

    fn filter_actions<'a>(config: &'a Config, pattern: &str) -> Option<&'a Vec<String>> {
        config
            .filters
            .iter()
            .find(|(p, _)| p == pattern)
            .map(|(_, actions)| actions)
    }

    #[test]
    fn test_default_config_loads() {
        let config = default_config();
        assert!(config.preprocessors.contains_key("terser"));
        assert_eq!(config.compressors.gzip.level, 9);
        assert_eq!(config.compressors.heatshrink.window_sz2, 11);
        assert!(filter_actions(&config, "*").is_some());
    }

    #[test]
    fn test_default_scalar_filters_normalized() {
        let config = default_config();
        assert_eq!(
            filter_actions(&config, "*.js"),
            Some(&vec!["terser".to_string()])
        );
    }

    #[test]
    fn test_load_config_missing_file() {
        let temp = TempDir::new().expect("should create temp dir");
        let path = temp.path().join("nonexistent.json");
        let result = load_config(Some(&path));
        assert!(matches!(result, Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_load_config_invalid_json() {
        let temp = TempDir::new().expect("should create temp dir");
        let path = write_user_config(&temp, "this is not json {{{");
        let result = load_config(Some(&path));
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_user_filters_append() {
        let temp = TempDir::new().expect("should create temp dir");
        let path = write_user_config(&temp, r#"{"filters": {"*.js": ["no-terser"]}}"#);
        let config = load_config(Some(&path)).expect("should load");
        assert_eq!(
            filter_actions(&config, "*.js"),
            Some(&vec!["terser".to_string(), "no-terser".to_string()])
        );
    }

    #[test]
    fn test_user_filter_scalar_appends() {
        let temp = TempDir::new().expect("should create temp dir");
        let path = write_user_config(&temp, r#"{"filters": {"*.js": "cache"}}"#);
        let config = load_config(Some(&path)).expect("should load");
        assert_eq!(
            filter_actions(&config, "*.js"),
            Some(&vec!["terser".to_string(), "cache".to_string()])
        );
    }

    #[test]
    fn test_user_null_deletes_filter() {
        let temp = TempDir::new().expect("should create temp dir");
        let path = write_user_config(&temp, r#"{"filters": {"*.js": null}}"#);
        let config = load_config(Some(&path)).expect("should load");
        assert!(filter_actions(&config, "*.js").is_none());
    }

    #[test]
    fn test_user_null_deletes_preprocessor() {
        let temp = TempDir::new().expect("should create temp dir");
        let path = write_user_config(&temp, r#"{"preprocessors": {"terser": null}}"#);
        let config = load_config(Some(&path)).expect("should load");
        assert!(!config.preprocessors.contains_key("terser"));
    }

    #[test]
    fn test_user_compressor_replaces() {
        let temp = TempDir::new().expect("should create temp dir");
        let path = write_user_config(&temp, r#"{"compressors": {"gzip": {"level": 6}}}"#);
        let config = load_config(Some(&path)).expect("should load");
        assert_eq!(config.compressors.gzip.level, 6);
        // untouched section keeps its defaults
        assert_eq!(config.compressors.heatshrink.lookahead_sz2, 4);
    }

    #[test]
    fn test_user_new_preprocessor_and_filter() {
        let temp = TempDir::new().expect("should create temp dir");
        let path = write_user_config(
            &temp,
            r#"{
                "preprocessors": {"upper": {"command": ["tr", "a-z", "A-Z"]}},
                "filters": {"*.txt": ["upper"]}
            }"#,
        );
        let config = load_config(Some(&path)).expect("should load");
        assert_eq!(
            config.preprocessors["upper"].command,
            vec!["tr", "a-z", "A-Z"]
        );
        assert_eq!(
            filter_actions(&config, "*.txt"),
            Some(&vec!["upper".to_string()])
        );
    }

    #[test]
    fn test_user_filter_declaration_order_preserved() {
        let temp = TempDir::new().expect("should create temp dir");
        let path = write_user_config(
            &temp,
            r#"{"filters": {"zz/*": ["cache"], "aa/*": ["discard"]}}"#,
        );
        let config = load_config(Some(&path)).expect("should load");
        let zz = config.filters.iter().position(|(p, _)| p == "zz/*");
        let aa = config.filters.iter().position(|(p, _)| p == "aa/*");
        assert!(zz.expect("zz/* present") < aa.expect("aa/* present"));
    }

    #[test]
    fn test_validation_error_surfaces() {
        let temp = TempDir::new().expect("should create temp dir");
        let path = write_user_config(&temp, r#"{"compressors": {"gzip": {"level": 42}}}"#);
        let result = load_config(Some(&path));
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_invalid_filter_value_shape() {
        let temp = TempDir::new().expect("should create temp dir");
        let path = write_user_config(&temp, r#"{"filters": {"*.js": 42}}"#);
        let result = load_config(Some(&path));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
