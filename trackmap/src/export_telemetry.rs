// Telemetry export module
// Writes mapped lap profiles and canonical telemetry as CSV

use std::fs::File;
use std::io::Write;
use std::path::Path;

use tracing::info;

use crate::error::Result;
use crate::mapping::MappedTelemetry;
use crate::telemetry::{format_value, RawTable, TelemetryFrame, DISTANCE, LAP, VEHICLE};

/// Mapped profiles, concatenated: one row per (vehicle, lap, centerline point)
///
/// Columns: Distance, Lap, VehicleNumber, x, z, signals..., [curvature].
/// Unmeasured values are left empty.
pub fn write_mapped<W: Write>(mapped: &MappedTelemetry, out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);

    let mut header: Vec<&str> = vec![DISTANCE, LAP, VEHICLE, "x", "z"];
    header.extend(mapped.signals.iter().map(String::as_str));
    if mapped.has_curvature {
        header.push("curvature");
    }
    writer.write_record(&header)?;

    for profile in &mapped.profiles {
        let lap = profile.lap.to_string();
        let vehicle = profile.vehicle.to_string();
        for i in 0..profile.len() {
            let mut record = vec![
                format_value(profile.distance[i]),
                lap.clone(),
                vehicle.clone(),
                format_value(profile.x[i]),
                format_value(profile.z[i]),
            ];
            record.extend(profile.signals.iter().map(|s| format_value(s.values[i])));
            if mapped.has_curvature {
                let k = profile.curvature.as_ref().map(|k| k[i]).unwrap_or(f64::NAN);
                record.push(format_value(k));
            }
            writer.write_record(&record)?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn export_mapped(mapped: &MappedTelemetry, output_path: &Path) -> Result<()> {
    write_mapped(mapped, File::create(output_path)?)?;
    info!(
        "Saved mapped telemetry ({} laps, {} rows) to {}",
        mapped.profiles.len(),
        mapped.row_count(),
        output_path.display()
    );
    Ok(())
}

pub fn write_table<W: Write>(table: &RawTable, out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(&table.headers)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Canonical telemetry: Distance, Lap, [VehicleNumber,] signals...
pub fn export_canonical(frame: &TelemetryFrame, output_path: &Path) -> Result<()> {
    write_table(&frame.to_table(), File::create(output_path)?)?;
    info!(
        "Saved canonical telemetry ({} rows, {} signals) to {}",
        frame.rows.len(),
        frame.signals.len(),
        output_path.display()
    );
    Ok(())
}
