//! Track map centerline extraction and telemetry-to-track mapping
//!
//! A scanned track map becomes a closed, arc-length indexed [`Centerline`];
//! per-lap telemetry is then resampled onto that centerline's distance grid.

pub mod calibration;
pub mod config;
pub mod curvature;
pub mod error;
pub mod export_centerline;
pub mod export_telemetry;
pub mod mapping;
pub mod overlay;
pub mod segmentation;
pub mod smoothing;
pub mod telemetry;
pub mod track;

pub use config::{ExtractionConfig, MappingConfig, PipelineConfig, ScaleReference, TelemetryConfig};
pub use error::{Result, TrackError};
pub use mapping::{LapMapper, MappedLapProfile, MappedTelemetry};
pub use telemetry::{RawTable, TelemetryFrame};
pub use track::{extract_centerline, TrackExtraction};
pub use trackmap_common::{Centerline, Corner, TrackPoint};
