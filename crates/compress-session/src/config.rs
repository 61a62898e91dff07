use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Session tuning parameters.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Early end-of-stream delay sent to the gapless module, in milliseconds.
    pub early_eos_delay_ms: u32,
    /// Platform-wide gapless capability used when the resource manager has no opinion.
    pub gapless_supported: bool,
    /// Codec descriptor defaults used before a stream supplies its own media config.
    pub codec_defaults: CodecDefaults,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CodecDefaults {
    pub channels: u32,
    pub sample_rate: u32,
    pub bit_width: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            early_eos_delay_ms: 150,
            gapless_supported: true,
            codec_defaults: CodecDefaults::default(),
        }
    }
}

impl Default for CodecDefaults {
    /// Two-channel 48 kHz 16-bit, the descriptor a fresh session starts with.
    fn default() -> Self {
        Self {
            channels: 2,
            sample_rate: 48_000,
            bit_width: 16,
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("parse session config")
    }

    /// Load a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("load config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let cfg = SessionConfig::from_toml_str("early_eos_delay_ms = 90\n").unwrap();
        assert_eq!(cfg.early_eos_delay_ms, 90);
        assert!(cfg.gapless_supported);
        assert_eq!(cfg.codec_defaults, CodecDefaults::default());
    }

    #[test]
    fn nested_codec_defaults_parse() {
        let raw = r#"
gapless_supported = false

[codec_defaults]
sample_rate = 44100
"#;
        let cfg = SessionConfig::from_toml_str(raw).unwrap();
        assert!(!cfg.gapless_supported);
        assert_eq!(cfg.codec_defaults.sample_rate, 44_100);
        assert_eq!(cfg.codec_defaults.channels, 2);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(SessionConfig::from_toml_str("early_eos_delay_ms = \"soon\"").is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = SessionConfig::load(Path::new("/nonexistent/session.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("read config"));
    }
}
