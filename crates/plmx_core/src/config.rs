//! Run configuration, read from an optional TOML file.
//!
//! ```toml
//! unit_scale = 100.0       # meters -> centimeters
//! up_axis = "y"
//! placeholder_size = 0.1
//! proxy_extension = "proxy.json"
//! flush_interval = 25
//! checkpoint_interval = 100
//!
//! [material_tolerance]
//! color = 0.10
//! roughness = 0.15
//! metalness = 0.15
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use plmx_math::{TransformComposer, UpAxis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::convert::ConvertSettings;
use crate::geometry::DEFAULT_PLACEHOLDER_SIZE;
use crate::material::MaterialTolerance;

/// Errors that can occur while reading a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Every tunable of a conversion run. Missing keys keep their defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Factor applied to source translations (source is meters)
    pub unit_scale: f64,
    pub up_axis: UpAxis,
    /// Edge length of placeholder boxes
    pub placeholder_size: f32,
    /// Extension of proxy artifacts, appended to the geometry base name
    pub proxy_extension: String,
    /// GeometryRefs between scene flushes (0 disables)
    pub flush_interval: usize,
    /// GeometryRefs between checkpoints (0 disables)
    pub checkpoint_interval: usize,
    pub material_tolerance: MaterialTolerance,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            unit_scale: 1.0,
            up_axis: UpAxis::Y,
            placeholder_size: DEFAULT_PLACEHOLDER_SIZE,
            proxy_extension: "proxy.json".to_string(),
            flush_interval: 25,
            checkpoint_interval: 100,
            material_tolerance: MaterialTolerance::default(),
        }
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.unit_scale.is_finite() && self.unit_scale > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "unit_scale must be positive, got {}",
                self.unit_scale
            )));
        }
        if !(self.placeholder_size.is_finite() && self.placeholder_size > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "placeholder_size must be positive, got {}",
                self.placeholder_size
            )));
        }
        if self.proxy_extension.trim_matches('.').is_empty() {
            return Err(ConfigError::Invalid("proxy_extension is empty".to_string()));
        }
        Ok(())
    }

    pub fn composer(&self) -> TransformComposer {
        TransformComposer::new(self.unit_scale, self.up_axis)
    }

    /// Driver settings, checkpointing to `checkpoint_path` if given.
    pub fn convert_settings(&self, checkpoint_path: Option<PathBuf>) -> ConvertSettings {
        ConvertSettings {
            composer: self.composer(),
            tolerance: self.material_tolerance,
            flush_interval: self.flush_interval,
            checkpoint_interval: self.checkpoint_interval,
            checkpoint_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.unit_scale, 1.0);
        assert_eq!(config.up_axis, UpAxis::Y);
        assert_eq!(config.proxy_extension, "proxy.json");
    }

    #[test]
    fn test_partial_override() {
        let config = Config::from_toml_str(
            r#"
            unit_scale = 100.0
            up_axis = "z"

            [material_tolerance]
            color = 0.05
            "#,
        )
        .unwrap();

        assert_eq!(config.unit_scale, 100.0);
        assert_eq!(config.up_axis, UpAxis::Z);
        assert_eq!(config.flush_interval, 25);
        assert_eq!(config.material_tolerance.color, 0.05);
        assert_eq!(config.material_tolerance.roughness, 0.15);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            Config::from_toml_str("unit_scale = 0.0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_toml_str("up_axis = \"x\""),
            Err(ConfigError::Toml(_))
        ));
        assert!(matches!(
            Config::from_toml_str("unit_scale = \"big\""),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_settings_carry_values() {
        let config = Config {
            flush_interval: 3,
            ..Default::default()
        };
        let settings = config.convert_settings(Some(PathBuf::from("a.checkpoint.json")));
        assert_eq!(settings.flush_interval, 3);
        assert_eq!(settings.checkpoint_interval, 100);
        assert_eq!(settings.composer.unit_scale(), 1.0);
    }
}
