use serde::{Deserialize, Serialize};
use std::fmt;

/// 2D point in image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &PixelPoint) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Contour represented as a sequence of points in pixels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contour {
    pub points: Vec<PixelPoint>,
    /// Whether the contour is closed
    pub closed: bool,
}

impl Contour {
    pub fn closed(points: Vec<PixelPoint>) -> Self {
        Self { points, closed: true }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// One sample of the track centerline in world meters
///
/// The map is assumed flat, so `y` is always 0 and the ground plane is X/Z.
/// `dist` is the cumulative arc length from the first point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub dist: f64,
}

impl TrackPoint {
    pub fn on_ground(x: f64, z: f64, dist: f64) -> Self {
        Self { x, y: 0.0, z, dist }
    }
}

/// Turn direction of a corner, from the sign of the heading change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CornerDirection {
    Left,
    Right,
}

impl fmt::Display for CornerDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CornerDirection::Left => write!(f, "left"),
            CornerDirection::Right => write!(f, "right"),
        }
    }
}

/// A detected corner: a run of centerline indices with a significant
/// heading change, collapsed onto its sharpest point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Corner {
    pub apex_index: usize,
    /// A corner spanning the start line has `start_index > end_index`
    pub start_index: usize,
    pub end_index: usize,
    pub apex_dist: f64,
    pub start_dist: f64,
    pub end_dist: f64,
    /// Signed heading change at the apex in radians, in (-π, π]
    pub angle_rad: f64,
    pub direction: CornerDirection,
}

impl Corner {
    /// Absolute heading change at the apex
    pub fn severity(&self) -> f64 {
        self.angle_rad.abs()
    }
}

/// Arc-length parametrized reference geometry of a closed circuit
///
/// Serialized as `{ points, length, corners }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Centerline {
    pub points: Vec<TrackPoint>,
    /// Total arc length; equals the `dist` of the last point
    pub length: f64,
    #[serde(default)]
    pub corners: Vec<Corner>,
}

impl Centerline {
    /// Build a centerline from points whose `dist` is already accumulated
    pub fn new(points: Vec<TrackPoint>) -> Self {
        let length = points.last().map(|p| p.dist).unwrap_or(0.0);
        Self {
            points,
            length,
            corners: Vec::new(),
        }
    }

    pub fn with_corners(mut self, corners: Vec<Corner>) -> Self {
        self.corners = corners;
        self
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn distances(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.dist).collect()
    }

    pub fn xs(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.x).collect()
    }

    pub fn zs(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.z).collect()
    }

    /// Check the arc-length invariants: starts at 0, never decreases,
    /// and `length` matches the last point
    pub fn check_invariants(&self) -> Result<(), String> {
        let Some(first) = self.points.first() else {
            return Err("centerline has no points".to_string());
        };
        if first.dist != 0.0 {
            return Err(format!("first dist is {} (expected 0)", first.dist));
        }
        for (i, pair) in self.points.windows(2).enumerate() {
            if !(pair[1].dist >= pair[0].dist) {
                return Err(format!(
                    "dist decreases at index {} ({} -> {})",
                    i + 1,
                    pair[0].dist,
                    pair[1].dist
                ));
            }
        }
        let last = self.points[self.points.len() - 1].dist;
        if (self.length - last).abs() > 1e-6 * last.abs().max(1.0) {
            return Err(format!("length {} does not match last dist {}", self.length, last));
        }
        Ok(())
    }
}

/// Layout of a telemetry table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TelemetryLayout {
    /// One row per (timestamp, signal name, value)
    Long,
    /// One row per sample with one column per signal
    Wide,
}

impl fmt::Display for TelemetryLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryLayout::Long => write!(f, "long (name/value pairs)"),
            TelemetryLayout::Wide => write!(f, "wide (column per signal)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(dists: &[f64]) -> Centerline {
        Centerline::new(
            dists
                .iter()
                .map(|&d| TrackPoint::on_ground(d, 0.0, d))
                .collect(),
        )
    }

    #[test]
    fn length_tracks_last_point() {
        let cl = line(&[0.0, 1.5, 4.0]);
        assert_eq!(cl.length, 4.0);
        assert!(cl.check_invariants().is_ok());
    }

    #[test]
    fn decreasing_dist_is_rejected() {
        let cl = line(&[0.0, 2.0, 1.0]);
        assert!(cl.check_invariants().is_err());
    }

    #[test]
    fn nonzero_start_is_rejected() {
        let cl = line(&[0.5, 2.0]);
        assert!(cl.check_invariants().is_err());
    }

    #[test]
    fn json_shape_matches_centerline_file() {
        let cl = line(&[0.0, 3.0]);
        let value = serde_json::to_value(&cl).unwrap();
        assert!(value.get("points").unwrap().is_array());
        assert_eq!(value["length"], 3.0);
        assert_eq!(value["points"][1]["dist"], 3.0);
        assert_eq!(value["points"][1]["y"], 0.0);
        assert!(value["corners"].as_array().unwrap().is_empty());
    }

    #[test]
    fn corners_field_is_optional_on_load() {
        let json = r#"{"points":[{"x":0,"y":0,"z":0,"dist":0}],"length":0}"#;
        let cl: Centerline = serde_json::from_str(json).unwrap();
        assert!(cl.corners.is_empty());
    }
}
