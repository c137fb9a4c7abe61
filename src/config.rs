//! Per-device test configuration.
//!
//! The configuration is a TOML document with one table per device type, keyed
//! `"vendor:model"`. Lookups never fail: absent or malformed keys resolve to
//! `None` and the caller picks the default.

use crate::traits::DeviceIdentity;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Configuration bundled with the binary.
pub const DEFAULT_CONFIGURATION: &str = include_str!("../data/default.toml");

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read {path}: {source}")]
    FileRead {
        /// Path of the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML of the expected shape.
    #[error("Failed to parse {path}: {message}")]
    Parse {
        /// Path of the file, or `<bundled>`.
        path: PathBuf,
        /// Parser message.
        message: String,
    },
}

#[derive(Debug, Default, Deserialize)]
struct DeviceSection {
    #[serde(default)]
    comments: BTreeMap<String, String>,
    #[serde(flatten)]
    settings: toml::Table,
}

/// Test settings for every known device type.
#[derive(Debug, Default)]
pub struct TestConfig {
    devices: BTreeMap<String, DeviceSection>,
}

impl TestConfig {
    /// Load the bundled configuration.
    pub fn bundled() -> Result<Self, ConfigError> {
        Self::parse(DEFAULT_CONFIGURATION, Path::new("<bundled>"))
    }

    /// Load a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents, path)
    }

    /// Parse a configuration document; `origin` only labels errors.
    pub fn parse(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        let devices: BTreeMap<String, DeviceSection> =
            toml::from_str(contents).map_err(|e: toml::de::Error| ConfigError::Parse {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?;
        debug!(n_devices = devices.len(), origin = %origin.display(), "Configuration loaded");
        Ok(Self { devices })
    }

    /// Settings of one device type.
    pub fn device(&self, identity: &DeviceIdentity) -> DeviceSettings<'_> {
        let key = identity.vendor_model();
        DeviceSettings {
            section: self.devices.get(&key),
            key,
        }
    }

    /// Device types the configuration knows about.
    pub fn device_keys(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }
}

/// Typed view over the settings of one device type.
#[derive(Debug, Clone)]
pub struct DeviceSettings<'a> {
    key: String,
    section: Option<&'a DeviceSection>,
}

impl<'a> DeviceSettings<'a> {
    /// Settings with no keys at all.
    pub fn empty(key: &str) -> Self {
        Self {
            key: key.to_owned(),
            section: None,
        }
    }

    /// `vendor:model` key of the device type.
    pub fn key(&self) -> &str {
        &self.key
    }

    fn value(&self, name: &str) -> Option<&'a toml::Value> {
        let value = self.section?.settings.get(name);
        if value.is_none() {
            debug!(device = %self.key, key = name, "Configuration key not set");
        }
        value
    }

    /// Floating-point value; integers are accepted.
    #[allow(clippy::cast_precision_loss)]
    pub fn double(&self, name: &str) -> Option<f64> {
        match self.value(name)? {
            toml::Value::Float(value) => Some(*value),
            toml::Value::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// Integer value.
    pub fn int64(&self, name: &str) -> Option<i64> {
        self.value(name)?.as_integer()
    }

    /// Boolean value.
    pub fn boolean(&self, name: &str) -> Option<bool> {
        self.value(name)?.as_bool()
    }

    /// String value.
    pub fn string(&self, name: &str) -> Option<&'a str> {
        self.value(name)?.as_str()
    }

    /// List of strings, from a TOML array or a space-separated string.
    pub fn string_list(&self, name: &str) -> Option<Vec<String>> {
        match self.value(name)? {
            toml::Value::String(value) => {
                Some(value.split_whitespace().map(str::to_owned).collect())
            }
            toml::Value::Array(items) => items
                .iter()
                .map(|item| item.as_str().map(str::to_owned))
                .collect(),
            _ => None,
        }
    }

    /// List of integers, from a TOML array or a space-separated string.
    pub fn integer_list(&self, name: &str) -> Option<Vec<i64>> {
        match self.value(name)? {
            toml::Value::String(value) => value
                .split_whitespace()
                .map(|item| item.parse().ok())
                .collect(),
            toml::Value::Array(items) => items.iter().map(toml::Value::as_integer).collect(),
            _ => None,
        }
    }

    /// Free-form comment attached to a test.
    pub fn comment(&self, test: &str) -> Option<&'a str> {
        self.section?.comments.get(test).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    const SAMPLE: &str = r#"
["Acme:Cam"]
FrameRateA = 20
FrameRateB = 2.5
UseSystemTimestamp = true
SensorSize = [640, 480]
Multipart = "Intensity Range"
ChunkList = ["Width", "Gain"]
Chunks = false
BadList = [1, "two"]

["Acme:Cam".comments]
Chunks = "Firmware drops chunk data"
"#;

    fn identity(vendor: &str, model: &str) -> DeviceIdentity {
        DeviceIdentity {
            id: "0".to_owned(),
            vendor: vendor.to_owned(),
            model: model.to_owned(),
        }
    }

    fn sample() -> TestConfig {
        TestConfig::parse(SAMPLE, Path::new("sample")).expect("sample should parse")
    }

    #[test]
    fn test_typed_lookups() {
        let config = sample();
        let settings = config.device(&identity("Acme", "Cam"));

        assert_eq!(settings.double("FrameRateA"), Some(20.0));
        assert_eq!(settings.double("FrameRateB"), Some(2.5));
        assert_eq!(settings.boolean("UseSystemTimestamp"), Some(true));
        assert_eq!(settings.boolean("Chunks"), Some(false));
        assert_eq!(settings.integer_list("SensorSize"), Some(vec![640, 480]));
        assert_eq!(
            settings.string_list("Multipart"),
            Some(vec!["Intensity".to_owned(), "Range".to_owned()])
        );
        assert_eq!(
            settings.string_list("ChunkList"),
            Some(vec!["Width".to_owned(), "Gain".to_owned()])
        );
        assert_eq!(settings.comment("Chunks"), Some("Firmware drops chunk data"));
    }

    #[test]
    fn test_malformed_and_absent_keys_are_none() {
        let config = sample();
        let settings = config.device(&identity("Acme", "Cam"));

        assert_eq!(settings.boolean("FrameRateA"), None);
        assert_eq!(settings.int64("FrameRateB"), None);
        assert_eq!(settings.string_list("BadList"), None);
        assert_eq!(settings.double("Missing"), None);
        assert_eq!(settings.comment("Multipart"), None);
    }

    #[test]
    fn test_unknown_device_has_no_settings() {
        let config = sample();
        let settings = config.device(&identity("Other", "Cam"));
        assert_eq!(settings.key(), "Other:Cam");
        assert_eq!(settings.double("FrameRateA"), None);
    }

    #[test]
    fn test_bundled_configuration_parses() {
        let config = TestConfig::bundled().expect("bundled configuration should parse");
        assert!(config.device_keys().any(|key| key == "PiCam:Simulated"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file should be created");
        file.write_all(SAMPLE.as_bytes()).expect("write should succeed");

        let config = TestConfig::from_file(file.path()).expect("file should load");
        assert_eq!(config.device_keys().count(), 1);
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let err = TestConfig::from_file(&dir.path().join("absent.toml"))
            .expect_err("missing file should fail");
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let err = TestConfig::parse("[unterminated", Path::new("bad"))
            .expect_err("invalid document should fail");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
