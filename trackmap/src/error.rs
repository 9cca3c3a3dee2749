//! Error types for trackmap

use std::path::PathBuf;

use thiserror::Error;

/// Pipeline error type
///
/// Every variant aborts the current run. Sparse laps and degenerate
/// curvature samples are recovered where they occur and never show up here.
#[derive(Error, Debug)]
pub enum TrackError {
    #[error("Failed to decode track map image {}: {source}", .path.display())]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("No contours found in track map")]
    NoContours,

    #[error("Degenerate track outline: {0}")]
    DegenerateContour(String),

    #[error("No distance column found in telemetry header {0:?}")]
    MissingDistanceColumn(Vec<String>),

    #[error("No lap column found in telemetry header {0:?}")]
    MissingLapColumn(Vec<String>),

    #[error("Telemetry is missing required column '{0}'")]
    MissingColumn(String),

    #[error("Invalid centerline: {0}")]
    InvalidCenterline(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Could not map telemetry (no valid laps)")]
    NoValidLaps,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, TrackError>;
