//! Typed configuration schema.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Fully merged and decoded configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Named external tool definitions
    pub preprocessors: BTreeMap<String, PreprocessorConfig>,
    /// Codec parameters carried through to the downstream image builder
    pub compressors: CompressorConfig,
    /// Filter rules in declaration order (sorted later by the rule table)
    pub filters: Vec<(String, Vec<String>)>,
}

impl Config {
    /// Validate the configuration, returning a list of problems.
    ///
    /// Filter action tokens are checked separately when the rule table is
    /// built, since decoding them needs the set of preprocessor names.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (name, preprocessor) in &self.preprocessors {
            if preprocessor.command.is_empty() {
                errors.push(format!("preprocessor '{}' has an empty command", name));
            }
        }

        if self.compressors.gzip.level > 9 {
            errors.push(format!(
                "gzip level must be 0-9, got {}",
                self.compressors.gzip.level
            ));
        }

        let hs = &self.compressors.heatshrink;
        if !(4..=15).contains(&hs.window_sz2) {
            errors.push(format!(
                "heatshrink window_sz2 must be 4-15, got {}",
                hs.window_sz2
            ));
        }
        if hs.lookahead_sz2 < 2 || hs.lookahead_sz2 >= hs.window_sz2 {
            errors.push(format!(
                "heatshrink lookahead_sz2 must be 2-{}, got {}",
                hs.window_sz2.saturating_sub(1),
                hs.lookahead_sz2
            ));
        }

        errors
    }
}

/// External tool definition for one named preprocessor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessorConfig {
    /// Command template; input arrives on stdin, output is read from stdout
    pub command: Vec<String>,
    /// Optional command that provisions the tool, run in the build root
    #[serde(default)]
    pub install: Option<Vec<String>>,
    /// Path relative to the build root whose existence means the tool is
    /// already provisioned
    #[serde(default)]
    pub creates: Option<PathBuf>,
}

/// Codec parameters persisted verbatim for the downstream image builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressorConfig {
    #[serde(default)]
    pub gzip: GzipConfig,
    #[serde(default)]
    pub heatshrink: HeatshrinkConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GzipConfig {
    pub level: u32,
}

impl Default for GzipConfig {
    fn default() -> Self {
        Self { level: 9 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatshrinkConfig {
    pub window_sz2: u8,
    pub lookahead_sz2: u8,
}

impl Default for HeatshrinkConfig {
    fn default() -> Self {
        Self {
            window_sz2: 11,
            lookahead_sz2: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            preprocessors: BTreeMap::new(),
            compressors: CompressorConfig {
                gzip: GzipConfig::default(),
                heatshrink: HeatshrinkConfig::default(),
            },
            filters: Vec::new(),
        }
    }

    #[test]
    fn test_validate_ok() {
        assert!(valid_config().validate().is_empty());
    }

    #[test]
    fn test_validate_empty_command() {
        let mut config = valid_config();
        config.preprocessors.insert(
            "broken".to_string(),
            PreprocessorConfig {
                command: vec![],
                install: None,
                creates: None,
            },
        );
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("broken"));
    }

    #[test]
    fn test_validate_gzip_level() {
        let mut config = valid_config();
        config.compressors.gzip.level = 12;
        assert!(!config.validate().is_empty());
    }

    #[test]
    fn test_validate_heatshrink_bounds() {
        let mut config = valid_config();
        config.compressors.heatshrink.window_sz2 = 3;
        assert!(!config.validate().is_empty());

        let mut config = valid_config();
        config.compressors.heatshrink.lookahead_sz2 = 11;
        assert!(!config.validate().is_empty());
    }
}
