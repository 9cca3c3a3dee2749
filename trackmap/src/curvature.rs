// Curvature analysis module
// Discrete curvature along point sequences and windowed corner detection

use std::f64::consts::PI;

use tracing::{debug, info};
use trackmap_common::{Centerline, Corner, CornerDirection, TrackPoint};

use crate::config::CornerConfig;

/// Finite-difference derivative with respect to index
///
/// Central differences inside, one-sided first differences at both ends.
pub fn gradient(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    match n {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => {
            let mut out = Vec::with_capacity(n);
            out.push(values[1] - values[0]);
            for i in 1..n - 1 {
                out.push((values[i + 1] - values[i - 1]) / 2.0);
            }
            out.push(values[n - 1] - values[n - 2]);
            out
        }
    }
}

/// Signed curvature of an (x, z) sequence assumed roughly evenly spaced:
/// k = (x' z'' - z' x'') / (x'^2 + z'^2)^1.5
///
/// Non-finite samples (zero speed, repeated points) are reported as 0.
pub fn curvature(xs: &[f64], zs: &[f64]) -> Vec<f64> {
    let n = xs.len().min(zs.len());
    let dx = gradient(&xs[..n]);
    let dz = gradient(&zs[..n]);
    let ddx = gradient(&dx);
    let ddz = gradient(&dz);

    (0..n)
        .map(|i| {
            let k = (dx[i] * ddz[i] - dz[i] * ddx[i]) / (dx[i].powi(2) + dz[i].powi(2)).powf(1.5);
            if k.is_finite() {
                k
            } else {
                0.0
            }
        })
        .collect()
}

pub fn centerline_curvature(centerline: &Centerline) -> Vec<f64> {
    curvature(&centerline.xs(), &centerline.zs())
}

/// Wrap an angle into (-π, π]
pub fn normalize_angle(mut angle: f64) -> f64 {
    while angle <= -PI {
        angle += 2.0 * PI;
    }
    while angle > PI {
        angle -= 2.0 * PI;
    }
    angle
}

/// Distinct samples of a centerline whose last point returns to its first
fn loop_period(centerline: &Centerline) -> Option<usize> {
    let points = &centerline.points;
    let (first, last) = (points.first()?, points.last()?);
    let gap = ((last.x - first.x).powi(2) + (last.z - first.z).powi(2)).sqrt();
    (points.len() > 2 && gap <= 1e-6 * centerline.length.max(1.0)).then(|| points.len() - 1)
}

fn heading_change(p1: &TrackPoint, p2: &TrackPoint, p3: &TrackPoint) -> f64 {
    let heading1 = (p2.z - p1.z).atan2(p2.x - p1.x);
    let heading2 = (p3.z - p2.z).atan2(p3.x - p2.x);
    normalize_angle(heading2 - heading1)
}

/// Heading change between the segments (i - window -> i) and (i -> i + window)
///
/// On a closed centerline every distinct sample is examined and the window
/// wraps across the start line. An open one only yields the interior
/// indices `[window, len - window)`.
pub fn heading_changes(centerline: &Centerline, window: usize) -> Vec<(usize, f64)> {
    let points = &centerline.points;
    if window == 0 {
        return Vec::new();
    }

    if let Some(m) = loop_period(centerline) {
        if m <= 2 * window {
            return Vec::new();
        }
        return (0..m)
            .map(|i| {
                let p1 = &points[(i + m - window) % m];
                let p3 = &points[(i + window) % m];
                (i, heading_change(p1, &points[i], p3))
            })
            .collect();
    }

    if points.len() <= 2 * window {
        return Vec::new();
    }
    (window..points.len() - window)
        .map(|i| (i, heading_change(&points[i - window], &points[i], &points[i + window])))
        .collect()
}

/// Detect corners by thresholding the windowed heading change
///
/// Consecutive flagged indices form a single corner whose apex is the index
/// with the largest absolute change (earliest on ties). On a closed
/// centerline a run touching both ends of the index range is one corner.
pub fn detect_corners(centerline: &Centerline, config: &CornerConfig) -> Vec<Corner> {
    let changes = heading_changes(centerline, config.window);
    let mut runs: Vec<Vec<(usize, f64)>> = Vec::new();
    let mut run: Vec<(usize, f64)> = Vec::new();

    for &(i, angle) in &changes {
        let flagged = angle.abs() > config.threshold_rad;
        let contiguous = run.last().map(|&(last, _)| last + 1 == i).unwrap_or(true);

        if flagged && contiguous {
            run.push((i, angle));
            continue;
        }
        if !run.is_empty() {
            runs.push(std::mem::take(&mut run));
        }
        if flagged {
            run.push((i, angle));
        }
    }
    if !run.is_empty() {
        runs.push(run);
    }

    if let Some(m) = loop_period(centerline) {
        let wraps = runs.len() > 1
            && runs[0][0].0 == 0
            && runs.last().and_then(|r| r.last()).map(|&(i, _)| i) == Some(m - 1);
        if wraps {
            if let Some(mut tail) = runs.pop() {
                tail.append(&mut runs[0]);
                runs[0] = tail;
            }
        }
    }

    let mut corners: Vec<Corner> = runs.iter().map(|r| corner_from_run(centerline, r)).collect();
    corners.sort_by_key(|c| c.apex_index);

    info!(
        "Detected {} corner(s) (window {}, threshold {:.3} rad)",
        corners.len(),
        config.window,
        config.threshold_rad
    );
    for corner in &corners {
        debug!(
            "  {} corner at {:.1} m ({:.1}..{:.1} m), {:.1}°",
            corner.direction,
            corner.apex_dist,
            corner.start_dist,
            corner.end_dist,
            corner.severity().to_degrees()
        );
    }

    corners
}

fn corner_from_run(centerline: &Centerline, run: &[(usize, f64)]) -> Corner {
    let mut apex = run[0];
    for &candidate in &run[1..] {
        if candidate.1.abs() > apex.1.abs() {
            apex = candidate;
        }
    }
    let start = run[0].0;
    let end = run[run.len() - 1].0;
    let points = &centerline.points;

    Corner {
        apex_index: apex.0,
        start_index: start,
        end_index: end,
        apex_dist: points[apex.0].dist,
        start_dist: points[start].dist,
        end_dist: points[end].dist,
        angle_rad: apex.1,
        direction: if apex.1 >= 0.0 {
            CornerDirection::Left
        } else {
            CornerDirection::Right
        },
    }
}
