// Scale calibration module
// Converts the smoothed pixel-space outline into a metric, arc-length indexed centerline

use tracing::info;
use trackmap_common::{Centerline, PixelPoint, TrackPoint};

use crate::config::ScaleReference;
use crate::error::{Result, TrackError};

/// Mapping from pixel coordinates to world meters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleCalibration {
    pub meters_per_pixel: f64,
    /// Bounding-box center in pixels; becomes the world origin
    pub center_px: (f64, f64),
    /// Bounding-box size in pixels
    pub extent_px: (f64, f64),
}

impl ScaleCalibration {
    /// Pixel X maps to world X, pixel Y to world Z
    pub fn to_world(&self, p: &PixelPoint) -> (f64, f64) {
        (
            (p.x - self.center_px.0) * self.meters_per_pixel,
            (p.y - self.center_px.1) * self.meters_per_pixel,
        )
    }
}

/// Calculate calibration from the bounding box of the outline
pub fn calculate_calibration(points: &[PixelPoint], reference: ScaleReference) -> Result<ScaleCalibration> {
    if points.is_empty() {
        return Err(TrackError::DegenerateContour("no points to calibrate".into()));
    }

    let min_x = points.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
    let min_y = points.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
    let max_x = points.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
    let max_y = points.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);

    let width = max_x - min_x;
    let height = max_y - min_y;
    let longest = width.max(height);

    let meters_per_pixel = match reference {
        ScaleReference::LongestSide { meters } => {
            if !(longest > 0.0) {
                return Err(TrackError::DegenerateContour(format!(
                    "outline bounding box has zero extent ({}x{} px)",
                    width, height
                )));
            }
            meters / longest
        }
        ScaleReference::MetersPerPixel(scale) => scale,
    };

    if !(meters_per_pixel > 0.0 && meters_per_pixel.is_finite()) {
        return Err(TrackError::InvalidConfig(format!(
            "scale must be positive, got {} m/px",
            meters_per_pixel
        )));
    }

    info!(
        "Outline bounds {:.1} x {:.1} px, scale {:.4} m/px ({:?})",
        width, height, meters_per_pixel, reference
    );

    Ok(ScaleCalibration {
        meters_per_pixel,
        center_px: ((min_x + max_x) / 2.0, (min_y + max_y) / 2.0),
        extent_px: (width, height),
    })
}

/// Walk the outline once, converting to meters and accumulating arc length
pub fn build_centerline(points: &[PixelPoint], calibration: &ScaleCalibration) -> Centerline {
    let mut track_points = Vec::with_capacity(points.len());
    let mut total_dist = 0.0;
    let mut prev: Option<(f64, f64)> = None;

    for p in points {
        let (x, z) = calibration.to_world(p);
        if let Some((px, pz)) = prev {
            total_dist += ((x - px).powi(2) + (z - pz).powi(2)).sqrt();
        }
        track_points.push(TrackPoint::on_ground(x, z, total_dist));
        prev = Some((x, z));
    }

    let centerline = Centerline::new(track_points);
    info!(
        "Centerline: {} points, length {:.1} m",
        centerline.len(),
        centerline.length
    );
    centerline
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rectangle() -> Vec<PixelPoint> {
        vec![
            PixelPoint::new(10.0, 20.0),
            PixelPoint::new(210.0, 20.0),
            PixelPoint::new(210.0, 120.0),
            PixelPoint::new(10.0, 120.0),
            PixelPoint::new(10.0, 20.0),
        ]
    }

    #[test]
    fn longest_side_maps_to_reference_length() {
        let cal = calculate_calibration(&rectangle(), ScaleReference::LongestSide { meters: 4000.0 }).unwrap();
        assert_relative_eq!(cal.meters_per_pixel, 20.0);
        assert_eq!(cal.center_px, (110.0, 70.0));
    }

    #[test]
    fn explicit_scale_overrides_bounding_box() {
        let cal = calculate_calibration(&rectangle(), ScaleReference::MetersPerPixel(0.5)).unwrap();
        assert_eq!(cal.meters_per_pixel, 0.5);
    }

    #[test]
    fn outline_is_centered_and_y_becomes_z() {
        let points = rectangle();
        let cal = calculate_calibration(&points, ScaleReference::LongestSide { meters: 4000.0 }).unwrap();
        let cl = build_centerline(&points, &cal);
        assert_relative_eq!(cl.points[0].x, -2000.0);
        assert_relative_eq!(cl.points[0].z, -1000.0);
        assert!(cl.points.iter().all(|p| p.y == 0.0));
    }

    #[test]
    fn dist_accumulates_perimeter() {
        let points = rectangle();
        let cal = calculate_calibration(&points, ScaleReference::MetersPerPixel(1.0)).unwrap();
        let cl = build_centerline(&points, &cal);
        let dists = cl.distances();
        assert_eq!(dists, vec![0.0, 200.0, 300.0, 500.0, 600.0]);
        assert_eq!(cl.length, 600.0);
        assert!(cl.check_invariants().is_ok());
    }

    #[test]
    fn single_point_outline_is_degenerate() {
        let err = calculate_calibration(&[PixelPoint::new(3.0, 3.0)], ScaleReference::default());
        assert!(matches!(err, Err(TrackError::DegenerateContour(_))));
    }
}
