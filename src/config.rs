use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::activity_detector::ActivityConfig;
use crate::classifier::ClassifierWindowConfig;
use crate::feature_extractor::FeatureConfig;
use crate::rep_detector::RepConfig;
use crate::session::SessionConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Configuración completa del pipeline. Cada parte usa sus valores por
/// defecto para los campos que el JSON no nombre.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub features: FeatureConfig,
    pub activity: ActivityConfig,
    pub reps: RepConfig,
    pub session: SessionConfig,
    pub classifier: ClassifierWindowConfig,
}

impl TrackerConfig {
    /// Configuración para sesiones en vivo (sensor a 100 Hz)
    pub fn live() -> Self {
        Self {
            features: FeatureConfig {
                target_hz: crate::types::LIVE_TARGET_HZ,
                ..FeatureConfig::default()
            },
            ..Self::default()
        }
    }

    /// Carga y valida un archivo JSON
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: TrackerConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Rechaza configuraciones degeneradas
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.features.validate()?;
        self.activity.validate()?;
        self.reps.validate()?;
        self.session.validate()?;
        self.classifier.validate()?;
        Ok(())
    }
}

pub(crate) fn check_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("must be a positive number, got {}", value),
        })
    }
}

pub(crate) fn check_non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("must be a non-negative number, got {}", value),
        })
    }
}

pub(crate) fn check_unit(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("must be within [0, 1], got {}", value),
        })
    }
}

/// `lower` no puede superar a `upper`
pub(crate) fn check_order(
    field: &'static str,
    lower: f64,
    upper: f64,
    reason: &str,
) -> Result<(), ConfigError> {
    if lower <= upper {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("{} ({} > {})", reason, lower, upper),
        })
    }
}

pub(crate) fn check_count(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value > 0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: "must be greater than zero".to_string(),
        })
    }
}
