// Pipeline configuration
// Policy constants for extraction, telemetry normalization and lap mapping

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Result, TrackError};

/// Signals kept from long-format telemetry
pub const DEFAULT_SIGNALS: [&str; 12] = [
    "speed",
    "aps",
    "pbrake_f",
    "pbrake_r",
    "Steering_Angle",
    "gear",
    "nmot",
    "accx_can",
    "accy_can",
    "VBOX_Lat_Min",
    "VBOX_Long_Minutes",
    "Laptrigger_lapdist_dls",
];

/// How pixel coordinates are converted to meters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleReference {
    /// The longer side of the outline's bounding box spans this many meters.
    /// Without a surveyed reference this is an estimate.
    LongestSide { meters: f64 },
    /// Explicit map scale
    MetersPerPixel(f64),
}

impl Default for ScaleReference {
    fn default() -> Self {
        ScaleReference::LongestSide { meters: 4000.0 }
    }
}

/// Windowed heading-change corner detection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CornerConfig {
    /// Index offset between the three points compared at each location
    pub window: usize,
    /// Minimum absolute heading change (radians) to flag a corner
    pub threshold_rad: f64,
}

impl Default for CornerConfig {
    fn default() -> Self {
        Self {
            window: 10,
            threshold_rad: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Douglas-Peucker tolerance as a fraction of the contour perimeter
    pub simplify_ratio: f64,
    /// Number of points sampled from the periodic spline
    pub sample_count: usize,
    pub scale: ScaleReference,
    pub corners: CornerConfig,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            simplify_ratio: 0.001,
            sample_count: 1000,
            scale: ScaleReference::default(),
            corners: CornerConfig::default(),
        }
    }
}

impl ExtractionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.simplify_ratio > 0.0) {
            return Err(TrackError::InvalidConfig(format!(
                "simplify_ratio must be positive, got {}",
                self.simplify_ratio
            )));
        }
        if self.sample_count < 4 {
            return Err(TrackError::InvalidConfig(format!(
                "sample_count must be at least 4, got {}",
                self.sample_count
            )));
        }
        match self.scale {
            ScaleReference::LongestSide { meters } if !(meters > 0.0 && meters.is_finite()) => {
                return Err(TrackError::InvalidConfig(format!(
                    "track length must be positive, got {}",
                    meters
                )));
            }
            ScaleReference::MetersPerPixel(scale) if !(scale > 0.0 && scale.is_finite()) => {
                return Err(TrackError::InvalidConfig(format!(
                    "meters per pixel must be positive, got {}",
                    scale
                )));
            }
            _ => {}
        }
        if self.corners.window == 0 {
            return Err(TrackError::InvalidConfig("corner window must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Signal names kept when pivoting long-format telemetry
    pub signals: Vec<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            signals: DEFAULT_SIGNALS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Laps with fewer rows than this are skipped
    pub min_samples: usize,
    /// Map (vehicle, lap) groups on the rayon thread pool
    pub parallel: bool,
    /// Append the centerline curvature as a feature column
    pub append_curvature: bool,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            min_samples: 100,
            parallel: true,
            append_curvature: false,
        }
    }
}

/// Complete configuration, loadable from a JSON file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub extraction: ExtractionConfig,
    pub telemetry: TelemetryConfig,
    pub mapping: MappingConfig,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&data)?;
        config.extraction.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy_constants() {
        let config = PipelineConfig::default();
        assert_eq!(config.extraction.sample_count, 1000);
        assert_eq!(config.extraction.simplify_ratio, 0.001);
        assert_eq!(
            config.extraction.scale,
            ScaleReference::LongestSide { meters: 4000.0 }
        );
        assert_eq!(config.extraction.corners.window, 10);
        assert_eq!(config.mapping.min_samples, 100);
        assert_eq!(config.telemetry.signals.len(), 12);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let json = r#"{
            "extraction": { "scale": { "meters_per_pixel": 2.5 } },
            "mapping": { "min_samples": 20 }
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.extraction.scale, ScaleReference::MetersPerPixel(2.5));
        assert_eq!(config.extraction.sample_count, 1000);
        assert_eq!(config.mapping.min_samples, 20);
        assert!(config.mapping.parallel);
    }

    #[test]
    fn non_positive_scale_is_rejected() {
        let config = ExtractionConfig {
            scale: ScaleReference::LongestSide { meters: 0.0 },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TrackError::InvalidConfig(_))));
    }

    #[test]
    fn load_reads_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        fs::write(&path, r#"{"extraction":{"sample_count":500}}"#).unwrap();
        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.extraction.sample_count, 500);
    }
}
