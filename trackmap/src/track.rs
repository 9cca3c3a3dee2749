// Track extraction pipeline
// Image -> outline -> periodic spline -> metric centerline with corners

use std::path::Path;

use image::DynamicImage;
use tracing::info;
use trackmap_common::{Centerline, Contour};

use crate::calibration::{build_centerline, calculate_calibration, ScaleCalibration};
use crate::config::ExtractionConfig;
use crate::curvature::detect_corners;
use crate::error::{Result, TrackError};
use crate::segmentation::{extract_track_outline, TrackOutline};
use crate::smoothing::smooth_track_outline;

/// Everything produced while extracting a centerline
#[derive(Debug, Clone)]
pub struct TrackExtraction {
    pub centerline: Centerline,
    pub outline: TrackOutline,
    /// Spline samples in pixels, index-aligned with the centerline points
    pub smoothed: Contour,
    pub calibration: ScaleCalibration,
}

pub fn load_track_map(path: &Path) -> Result<DynamicImage> {
    let image = image::open(path).map_err(|source| TrackError::ImageDecode {
        path: path.to_path_buf(),
        source,
    })?;
    info!(
        "Loaded track map {} ({}x{})",
        path.display(),
        image.width(),
        image.height()
    );
    Ok(image)
}

pub fn extract_centerline(image: &DynamicImage, config: &ExtractionConfig) -> Result<TrackExtraction> {
    config.validate()?;

    info!("Step 1: Segmenting track outline...");
    let outline = extract_track_outline(image, config.simplify_ratio)?;

    info!("Step 2: Smoothing with periodic spline...");
    let smoothed = smooth_track_outline(&outline.simplified, config.sample_count)?;

    info!("Step 3: Scaling to world coordinates...");
    let calibration = calculate_calibration(&smoothed.points, config.scale)?;
    let centerline = build_centerline(&smoothed.points, &calibration);

    info!("Step 4: Detecting corners...");
    let corners = detect_corners(&centerline, &config.corners);
    let centerline = centerline.with_corners(corners);

    Ok(TrackExtraction {
        centerline,
        outline,
        smoothed,
        calibration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn invalid_config_is_rejected_before_work() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(10, 10, Luma([255])));
        let config = ExtractionConfig {
            sample_count: 2,
            ..ExtractionConfig::default()
        };
        let err = extract_centerline(&image, &config).unwrap_err();
        assert!(matches!(err, TrackError::InvalidConfig(_)));
    }

    #[test]
    fn unreadable_image_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.png");
        std::fs::write(&path, b"not a png").unwrap();
        let err = load_track_map(&path).unwrap_err();
        assert!(matches!(err, TrackError::ImageDecode { .. }));
        assert!(err.to_string().contains("map.png"), "{}", err);
    }
}
