// Track outline segmentation module
// Binarizes the track map and extracts the outer boundary of the track drawing

use image::{DynamicImage, GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::contrast::otsu_level;
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::point::Point;
use tracing::{debug, info};
use trackmap_common::{Contour, PixelPoint};

use crate::error::{Result, TrackError};

/// Largest external contour of a track map, raw and simplified
#[derive(Debug, Clone)]
pub struct TrackOutline {
    /// Border pixels as traced
    pub contour: Contour,
    /// Douglas-Peucker simplified polygon
    pub simplified: Contour,
    pub area: f64,
    pub perimeter: f64,
}

/// Otsu threshold, inverted: dark markings become foreground (255)
pub fn binarize(gray: &GrayImage) -> GrayImage {
    let mut binary = GrayImage::new(gray.width(), gray.height());

    // A uniform image has nothing drawn on it
    let (min, max) = gray
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
    if min >= max {
        return binary;
    }

    let level = otsu_level(gray);
    debug!("Otsu threshold level: {}", level);

    for (x, y, pixel) in gray.enumerate_pixels() {
        let value = if pixel[0] > level { 0 } else { 255 };
        binary.put_pixel(x, y, Luma([value]));
    }
    binary
}

/// Find the track outline in a track map image
///
/// The track is assumed to be the largest connected foreground region;
/// smaller regions such as labels and logos are discarded.
pub fn extract_track_outline(image: &DynamicImage, simplify_ratio: f64) -> Result<TrackOutline> {
    let gray = image.to_luma8();
    info!("Segmenting track map ({}x{})...", gray.width(), gray.height());

    let binary = binarize(&gray);

    // Only top-level outer borders, the equivalent of external retrieval
    let external: Vec<Vec<Point<i32>>> = find_contours::<i32>(&binary)
        .into_iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer) && c.parent.is_none())
        .map(|c| c.points)
        .collect();

    info!("Found {} external contours", external.len());

    let (largest, area) = external
        .into_iter()
        .map(|points| {
            let area = contour_area(&points);
            (points, area)
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .ok_or(TrackError::NoContours)?;

    let perimeter = arc_length(&largest, true);
    if !(perimeter > 0.0) {
        return Err(TrackError::DegenerateContour(format!(
            "largest contour has {} point(s) and no perimeter",
            largest.len()
        )));
    }

    let epsilon = simplify_ratio * perimeter;
    let approx = approximate_polygon_dp(&largest, epsilon, true);
    let approx = prune_seam(to_pixel_points(&approx), epsilon);

    info!(
        "  Track contour: {} points, area = {:.1} px², perimeter = {:.1} px",
        largest.len(),
        area,
        perimeter
    );
    info!("  Simplified to {} vertices (epsilon = {:.3} px)", approx.len(), epsilon);

    Ok(TrackOutline {
        contour: Contour::closed(to_pixel_points(&largest)),
        simplified: Contour::closed(approx),
        area,
        perimeter,
    })
}

fn to_pixel_points(points: &[Point<i32>]) -> Vec<PixelPoint> {
    points
        .iter()
        .map(|p| PixelPoint::new(f64::from(p.x), f64::from(p.y)))
        .collect()
}

/// Remove the closing duplicate and a spurious vertex at the seam
///
/// Douglas-Peucker keeps both ends of the traced border, and those sit next
/// to each other on a closed contour. Only these two vertices are checked,
/// each once against its neighbours' chord; interior vertices are left as
/// the simplification placed them.
fn prune_seam(mut points: Vec<PixelPoint>, epsilon: f64) -> Vec<PixelPoint> {
    points.dedup();
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }

    // End of the trace
    if points.len() > 3 {
        let n = points.len();
        if distance_to_chord(points[n - 1], points[n - 2], points[0]) <= epsilon {
            points.pop();
        }
    }
    // Start of the trace
    if points.len() > 3 {
        let n = points.len();
        if distance_to_chord(points[0], points[n - 1], points[1]) <= epsilon {
            points.remove(0);
        }
    }
    points
}

fn distance_to_chord(p: PixelPoint, a: PixelPoint, b: PixelPoint) -> f64 {
    let len = a.distance_to(&b);
    if len == 0.0 {
        return p.distance_to(&a);
    }
    ((b.x - a.x) * (a.y - p.y) - (a.x - p.x) * (b.y - a.y)).abs() / len
}

/// Calculate the area of a closed contour using the shoelace formula
fn contour_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }

    let n = points.len();
    let mut area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        area += f64::from(points[i].x) * f64::from(points[j].y);
        area -= f64::from(points[j].x) * f64::from(points[i].y);
    }

    (area / 2.0).abs()
}
