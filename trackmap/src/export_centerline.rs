// Centerline export module
// Writes the centerline as JSON, as an OBJ polyline and as a curvature feature table

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use tracing::info;
use trackmap_common::Centerline;

use crate::curvature::centerline_curvature;
use crate::error::{Result, TrackError};
use crate::telemetry::format_value;

/// Save as `{ points, length, corners }`
pub fn save_centerline_json(centerline: &Centerline, output_path: &Path) -> Result<()> {
    let writer = BufWriter::new(File::create(output_path)?);
    serde_json::to_writer_pretty(writer, centerline)?;

    info!(
        "Saved centerline ({} points, {:.1} m, {} corners) to {}",
        centerline.len(),
        centerline.length,
        centerline.corners.len(),
        output_path.display()
    );
    Ok(())
}

/// Load a centerline and check its arc-length invariants
pub fn load_centerline_json(input_path: &Path) -> Result<Centerline> {
    let reader = BufReader::new(File::open(input_path)?);
    let centerline: Centerline = serde_json::from_reader(reader)?;
    centerline
        .check_invariants()
        .map_err(|reason| TrackError::InvalidCenterline(format!("{}: {}", input_path.display(), reason)))?;

    info!(
        "Loaded centerline with {} points ({:.1} m) from {}",
        centerline.len(),
        centerline.length,
        input_path.display()
    );
    Ok(centerline)
}

/// Wavefront OBJ: one vertex per point and a single polyline through them
pub fn write_obj<W: Write>(centerline: &Centerline, mut out: W) -> Result<()> {
    writeln!(out, "o Track")?;
    for p in &centerline.points {
        writeln!(out, "v {} {} {}", p.x, p.y, p.z)?;
    }

    if !centerline.is_empty() {
        // OBJ indices are 1-based
        write!(out, "l")?;
        for i in 1..=centerline.len() {
            write!(out, " {}", i)?;
        }
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

pub fn export_obj(centerline: &Centerline, output_path: &Path) -> Result<()> {
    write_obj(centerline, BufWriter::new(File::create(output_path)?))?;
    info!("Exported track mesh to OBJ: {}", output_path.display());
    Ok(())
}

/// Per-point geometric features: Distance, x, z, curvature
pub fn write_curvature_csv<W: Write>(centerline: &Centerline, out: W) -> Result<()> {
    let curvature = centerline_curvature(centerline);
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(["Distance", "x", "z", "curvature"])?;

    for (p, k) in centerline.points.iter().zip(&curvature) {
        writer.write_record([
            format_value(p.dist),
            format_value(p.x),
            format_value(p.z),
            format_value(*k),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn export_curvature_csv(centerline: &Centerline, output_path: &Path) -> Result<()> {
    write_curvature_csv(centerline, File::create(output_path)?)?;
    info!(
        "Exported curvature for {} points to {}",
        centerline.len(),
        output_path.display()
    );
    Ok(())
}
