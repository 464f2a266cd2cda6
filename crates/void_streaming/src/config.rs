//! Streaming configuration
//!
//! Loaded from JSON or built in code. The quality hint scales every scene's
//! distance window, so a weaker device keeps less content resident.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use void_asset::LoadQueueConfig;

/// Quality/performance hint supplied by the render layer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityHint {
    #[default]
    High,
    Medium,
    Low,
}

/// Distance multipliers per quality level
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityScales {
    pub high: f32,
    pub medium: f32,
    pub low: f32,
}

impl Default for QualityScales {
    fn default() -> Self {
        Self {
            high: 1.0,
            medium: 0.8,
            low: 0.6,
        }
    }
}

impl QualityScales {
    /// Multiplier for a quality level
    pub fn scale_for(&self, quality: QualityHint) -> f32 {
        match quality {
            QualityHint::High => self.high,
            QualityHint::Medium => self.medium,
            QualityHint::Low => self.low,
        }
    }
}

/// Configuration for the progressive loader
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Maximum concurrent producer invocations
    pub max_concurrent_loads: usize,

    /// Initial quality hint
    pub quality: QualityHint,

    /// Recent completions used for the time-remaining estimate
    pub throughput_window: usize,

    /// Window multipliers per quality level
    pub quality_scales: QualityScales,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_loads: 4,
            quality: QualityHint::High,
            throughput_window: 16,
            quality_scales: QualityScales::default(),
        }
    }
}

impl StreamingConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the loader cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_loads == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_concurrent_loads must be at least 1".into(),
            ));
        }
        let scales = &self.quality_scales;
        for (name, scale) in [("high", scales.high), ("medium", scales.medium), ("low", scales.low)] {
            if !(scale.is_finite() && scale > 0.0) {
                return Err(ConfigError::InvalidConfig(format!(
                    "quality scale '{}' must be positive, got {}",
                    name, scale
                )));
            }
        }
        Ok(())
    }

    /// Distance multiplier for the configured quality
    pub fn distance_scale(&self) -> f32 {
        self.quality_scales.scale_for(self.quality)
    }

    /// Settings for the underlying load queue
    pub fn queue_config(&self) -> LoadQueueConfig {
        LoadQueueConfig {
            max_concurrent_loads: self.max_concurrent_loads,
            throughput_window: self.throughput_window,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StreamingConfig::default();
        assert_eq!(config.max_concurrent_loads, 4);
        assert_eq!(config.quality, QualityHint::High);
        assert_eq!(config.distance_scale(), 1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = StreamingConfig::from_json(r#"{ "max_concurrent_loads": 2, "quality": "low" }"#)
            .unwrap();
        assert_eq!(config.max_concurrent_loads, 2);
        assert_eq!(config.quality, QualityHint::Low);
        assert_eq!(config.throughput_window, 16);
        assert_eq!(config.distance_scale(), 0.6);
        assert_eq!(config.queue_config().max_concurrent_loads, 2);
    }

    #[test]
    fn test_from_json_rejects_bad_values() {
        assert!(matches!(
            StreamingConfig::from_json(r#"{ "max_concurrent_loads": 0 }"#),
            Err(ConfigError::InvalidConfig(_))
        ));
        assert!(matches!(
            StreamingConfig::from_json(r#"{ "quality_scales": { "low": -1.0 } }"#),
            Err(ConfigError::InvalidConfig(_))
        ));
        assert!(StreamingConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = StreamingConfig {
            quality: QualityHint::Medium,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"medium\""));
        assert_eq!(StreamingConfig::from_json(&json).unwrap(), config);
    }
}
