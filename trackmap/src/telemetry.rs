// Telemetry normalization module
// Converts long (name/value) and wide (column per signal) tables to one canonical schema

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::{debug, info, warn};
use trackmap_common::TelemetryLayout;

use crate::config::TelemetryConfig;
use crate::error::{Result, TrackError};

pub const DISTANCE: &str = "Distance";
pub const LAP: &str = "Lap";
pub const VEHICLE: &str = "VehicleNumber";

/// Distance channel published by the lap trigger
pub const DISTANCE_TRIGGER: &str = "Laptrigger_lapdist_dls";

const LONG_NAME: &str = "telemetry_name";
const LONG_VALUE: &str = "telemetry_value";
const LONG_TIMESTAMP: &str = "timestamp";
const LONG_LAP: &str = "lap";
const LONG_VEHICLE: &str = "vehicle_number";

/// Column names that never become signals
const RESERVED: [&str; 6] = [DISTANCE, DISTANCE_TRIGGER, LAP, LONG_LAP, VEHICLE, LONG_VEHICLE];

/// Telemetry table as read, every cell kept as text
///
/// Reading projects the file onto the columns normalization consumes. Long
/// layouts keep the five pivot columns and only whitelisted channel rows;
/// wide layouts keep the resolved distance, lap and vehicle columns plus the
/// numeric signal columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn from_reader<R: Read>(reader: R, config: &TelemetryConfig) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let source: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();

        let mut projection = Projection::new(&source, config);
        let mut table = RawTable {
            headers: projection.columns.iter().map(|&c| source[c].clone()).collect(),
            rows: Vec::new(),
        };

        let mut record = csv::StringRecord::new();
        let mut filtered = 0usize;
        while rdr.read_record(&mut record)? {
            if !projection.keeps(&record) {
                filtered += 1;
                continue;
            }
            projection.push_row(&record, &mut table.rows);
        }
        projection.finish(&mut table);

        debug!(
            "Kept {} of {} columns, filtered {} rows outside the signal whitelist",
            table.headers.len(),
            source.len(),
            filtered
        );
        Ok(table)
    }

    pub fn from_path(path: &Path, config: &TelemetryConfig) -> Result<Self> {
        let table = Self::from_reader(File::open(path)?, config)?;
        info!(
            "Loaded {} rows x {} columns from {}",
            table.rows.len(),
            table.headers.len(),
            path.display()
        );
        Ok(table)
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    fn cell(&self, row: usize, col: usize) -> &str {
        self.rows[row].get(col).map(String::as_str).unwrap_or("")
    }

    /// A column is numeric when every non-empty cell parses as a number
    fn is_numeric_column(&self, col: usize) -> bool {
        (0..self.rows.len()).all(|r| {
            let cell = self.cell(r, col).trim();
            cell.is_empty() || cell.parse::<f64>().is_ok()
        })
    }
}

/// Which source columns and rows survive reading
struct Projection {
    /// Source column of each kept column, in source order
    columns: Vec<usize>,
    /// Long layout: source name column and the names worth keeping
    names: Option<(usize, BTreeSet<String>)>,
    /// Kept columns that must stay numeric to be kept at all
    candidate: Vec<bool>,
    /// Candidates that have shown a non-numeric cell
    text: Vec<bool>,
}

impl Projection {
    fn new(headers: &[String], config: &TelemetryConfig) -> Self {
        let find = |name: &str| headers.iter().position(|h| h == name);

        match detect_layout(headers) {
            TelemetryLayout::Long => {
                let mut columns: Vec<usize> = [
                    find(LONG_TIMESTAMP),
                    find(LONG_LAP).or_else(|| find(LAP)),
                    find(LONG_VEHICLE).or_else(|| find(VEHICLE)),
                    find(LONG_NAME),
                    find(LONG_VALUE),
                ]
                .into_iter()
                .flatten()
                .collect();
                columns.sort_unstable();
                columns.dedup();

                let names = find(LONG_NAME).map(|c| (c, config.signals.iter().cloned().collect()));
                let n = columns.len();
                Self {
                    columns,
                    names,
                    candidate: vec![false; n],
                    text: vec![false; n],
                }
            }
            TelemetryLayout::Wide => {
                let resolved = [
                    find(DISTANCE_TRIGGER).or_else(|| find(DISTANCE)),
                    find(LONG_LAP).or_else(|| find(LAP)),
                    find(VEHICLE).or_else(|| find(LONG_VEHICLE)),
                ];

                let mut columns = Vec::new();
                let mut candidate = Vec::new();
                for (c, header) in headers.iter().enumerate() {
                    let signal = !RESERVED.contains(&header.as_str());
                    if signal || resolved.contains(&Some(c)) {
                        columns.push(c);
                        candidate.push(signal);
                    }
                }

                let n = columns.len();
                Self {
                    columns,
                    names: None,
                    candidate,
                    text: vec![false; n],
                }
            }
        }
    }

    fn keeps(&self, record: &csv::StringRecord) -> bool {
        match &self.names {
            Some((col, wanted)) => wanted.contains(record.get(*col).unwrap_or("").trim()),
            None => true,
        }
    }

    fn push_row(&mut self, record: &csv::StringRecord, rows: &mut Vec<Vec<String>>) {
        let mut row = Vec::with_capacity(self.columns.len());
        for (k, &c) in self.columns.iter().enumerate() {
            let cell = record.get(c).unwrap_or("");
            if self.text[k] {
                row.push(String::new());
                continue;
            }
            if self.candidate[k] && parse_number(cell).is_none() && !cell.trim().is_empty() {
                // Text column: release what was already read
                self.text[k] = true;
                for earlier in rows.iter_mut() {
                    earlier[k] = String::new();
                }
                row.push(String::new());
                continue;
            }
            row.push(cell.to_string());
        }
        rows.push(row);
    }

    /// Drop the candidate columns that turned out to hold text
    fn finish(&self, table: &mut RawTable) {
        if !self.text.contains(&true) {
            return;
        }
        retain_columns(&mut table.headers, &self.text);
        for row in &mut table.rows {
            retain_columns(row, &self.text);
        }
    }
}

fn retain_columns(cells: &mut Vec<String>, text: &[bool]) {
    let mut dropped = text.iter();
    cells.retain(|_| !dropped.next().copied().unwrap_or(false));
}

/// One canonical sample
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRow {
    pub distance: f64,
    pub lap: i64,
    pub vehicle: Option<i64>,
    /// Index-aligned with `TelemetryFrame::signals`; NaN when not sampled
    pub values: Vec<f64>,
}

/// Canonical wide telemetry: Distance, Lap, VehicleNumber, signals...
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryFrame {
    pub signals: Vec<String>,
    pub has_vehicle: bool,
    pub rows: Vec<TelemetryRow>,
}

impl TelemetryFrame {
    /// Render back to a table with canonical column names
    pub fn to_table(&self) -> RawTable {
        let mut headers = vec![DISTANCE.to_string(), LAP.to_string()];
        if self.has_vehicle {
            headers.push(VEHICLE.to_string());
        }
        headers.extend(self.signals.iter().cloned());

        let rows = self
            .rows
            .iter()
            .map(|row| {
                let mut cells = vec![format_value(row.distance), row.lap.to_string()];
                if self.has_vehicle {
                    cells.push(row.vehicle.map(|v| v.to_string()).unwrap_or_default());
                }
                cells.extend(row.values.iter().map(|v| format_value(*v)));
                cells
            })
            .collect();

        RawTable { headers, rows }
    }
}

/// NaN is written as an empty cell
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}

fn parse_number(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    cell.parse::<f64>().ok()
}

/// Laps may be written as "3" or "3.0"
fn parse_integer(cell: &str) -> Option<i64> {
    let value = parse_number(cell)?;
    if value.is_finite() && value.fract() == 0.0 {
        Some(value as i64)
    } else {
        None
    }
}

/// Long layout is recognized by its name/value column pair
pub fn detect_layout(headers: &[String]) -> TelemetryLayout {
    let has = |name: &str| headers.iter().any(|h| h == name);
    if has(LONG_NAME) && has(LONG_VALUE) {
        TelemetryLayout::Long
    } else {
        TelemetryLayout::Wide
    }
}

/// Normalize any supported telemetry table into the canonical frame
pub fn normalize(table: &RawTable, config: &TelemetryConfig) -> Result<TelemetryFrame> {
    let layout = detect_layout(&table.headers);
    info!("Detected {} telemetry layout", layout);

    let frame = match layout {
        TelemetryLayout::Long => normalize_long(table, &config.signals)?,
        TelemetryLayout::Wide => normalize_wide(table)?,
    };

    info!(
        "Normalized telemetry: {} rows, signals {:?}",
        frame.rows.len(),
        frame.signals
    );
    Ok(frame)
}

/// Long layout pivoted on (timestamp, lap, vehicle)
#[derive(Debug, Clone, PartialEq)]
pub struct PivotTable {
    /// Alphabetical
    pub signals: Vec<String>,
    /// Ordered by (timestamp, lap, vehicle)
    pub rows: Vec<PivotRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PivotRow {
    pub timestamp: String,
    pub lap: i64,
    pub vehicle: Option<i64>,
    pub values: Vec<f64>,
}

type PivotKey = (String, i64, Option<i64>);

/// Pivot name/value rows into one row per (timestamp, lap, vehicle)
///
/// Only whitelisted signal names are kept. When a key sees the same signal
/// twice the first value wins.
pub fn pivot_long(table: &RawTable, whitelist: &[String]) -> Result<PivotTable> {
    let name_col = table
        .column(LONG_NAME)
        .ok_or_else(|| TrackError::MissingColumn(LONG_NAME.into()))?;
    let value_col = table
        .column(LONG_VALUE)
        .ok_or_else(|| TrackError::MissingColumn(LONG_VALUE.into()))?;
    let ts_col = table
        .column(LONG_TIMESTAMP)
        .ok_or_else(|| TrackError::MissingColumn(LONG_TIMESTAMP.into()))?;
    let lap_col = table
        .column(LONG_LAP)
        .or_else(|| table.column(LAP))
        .ok_or_else(|| TrackError::MissingLapColumn(table.headers.clone()))?;
    let vehicle_col = table.column(LONG_VEHICLE).or_else(|| table.column(VEHICLE));

    let wanted: BTreeSet<&str> = whitelist.iter().map(String::as_str).collect();
    let mut grouped: BTreeMap<PivotKey, BTreeMap<String, f64>> = BTreeMap::new();
    let mut names: BTreeSet<String> = BTreeSet::new();
    let mut skipped = 0usize;

    for r in 0..table.rows.len() {
        let name = table.cell(r, name_col).trim();
        if !wanted.contains(name) {
            continue;
        }
        let (Some(lap), Some(value)) = (
            parse_integer(table.cell(r, lap_col)),
            parse_number(table.cell(r, value_col)),
        ) else {
            skipped += 1;
            continue;
        };
        let vehicle = vehicle_col.and_then(|c| parse_integer(table.cell(r, c)));
        let key = (table.cell(r, ts_col).trim().to_string(), lap, vehicle);

        names.insert(name.to_string());
        grouped
            .entry(key)
            .or_default()
            .entry(name.to_string())
            .or_insert(value);
    }

    if skipped > 0 {
        warn!("Skipped {} long-format rows with unparsable lap or value", skipped);
    }

    let signals: Vec<String> = names.into_iter().collect();
    let rows = grouped
        .into_iter()
        .map(|((timestamp, lap, vehicle), samples)| PivotRow {
            timestamp,
            lap,
            vehicle,
            values: signals
                .iter()
                .map(|s| samples.get(s).copied().unwrap_or(f64::NAN))
                .collect(),
        })
        .collect();

    Ok(PivotTable { signals, rows })
}

fn normalize_long(table: &RawTable, whitelist: &[String]) -> Result<TelemetryFrame> {
    info!("Pivoting long-format telemetry ({} rows)...", table.rows.len());
    let pivot = pivot_long(table, whitelist)?;
    info!("Pivoted to {} rows", pivot.rows.len());

    let dist_idx = pivot
        .signals
        .iter()
        .position(|s| s == DISTANCE_TRIGGER || s == DISTANCE)
        .ok_or_else(|| TrackError::MissingDistanceColumn(pivot.signals.clone()))?;

    let signals: Vec<String> = pivot
        .signals
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != dist_idx)
        .map(|(_, s)| s.clone())
        .collect();

    let rows = pivot
        .rows
        .into_iter()
        .map(|row| TelemetryRow {
            distance: row.values[dist_idx],
            lap: row.lap,
            vehicle: row.vehicle,
            values: row
                .values
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != dist_idx)
                .map(|(_, v)| *v)
                .collect(),
        })
        .collect();

    Ok(TelemetryFrame {
        signals,
        has_vehicle: table.column(LONG_VEHICLE).is_some() || table.column(VEHICLE).is_some(),
        rows,
    })
}

fn normalize_wide(table: &RawTable) -> Result<TelemetryFrame> {
    let dist_col = table
        .column(DISTANCE_TRIGGER)
        .or_else(|| table.column(DISTANCE))
        .ok_or_else(|| TrackError::MissingDistanceColumn(table.headers.clone()))?;
    let lap_col = table
        .column(LONG_LAP)
        .or_else(|| table.column(LAP))
        .ok_or_else(|| TrackError::MissingLapColumn(table.headers.clone()))?;
    let vehicle_col = table.column(VEHICLE).or_else(|| table.column(LONG_VEHICLE));

    debug!(
        "Wide layout: distance = '{}', lap = '{}', vehicle = {:?}",
        table.headers[dist_col],
        table.headers[lap_col],
        vehicle_col.map(|c| table.headers[c].as_str())
    );

    let signal_cols: Vec<usize> = (0..table.headers.len())
        .filter(|&c| !RESERVED.contains(&table.headers[c].as_str()))
        .filter(|&c| table.is_numeric_column(c))
        .collect();

    let mut rows = Vec::with_capacity(table.rows.len());
    let mut dropped = 0usize;
    for r in 0..table.rows.len() {
        let Some(lap) = parse_integer(table.cell(r, lap_col)) else {
            dropped += 1;
            continue;
        };
        rows.push(TelemetryRow {
            distance: parse_number(table.cell(r, dist_col)).unwrap_or(f64::NAN),
            lap,
            vehicle: vehicle_col.and_then(|c| parse_integer(table.cell(r, c))),
            values: signal_cols
                .iter()
                .map(|&c| parse_number(table.cell(r, c)).unwrap_or(f64::NAN))
                .collect(),
        });
    }

    if dropped > 0 {
        warn!("Dropped {} rows without an integer lap number", dropped);
    }

    Ok(TelemetryFrame {
        signals: signal_cols.iter().map(|&c| table.headers[c].clone()).collect(),
        has_vehicle: vehicle_col.is_some(),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(csv: &str) -> RawTable {
        RawTable::from_reader(csv.as_bytes(), &TelemetryConfig::default()).unwrap()
    }

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn layout_detection_needs_both_long_columns() {
        assert_eq!(
            detect_layout(&headers(&["timestamp", "telemetry_name", "telemetry_value"])),
            TelemetryLayout::Long
        );
        assert_eq!(
            detect_layout(&headers(&["timestamp", "telemetry_name"])),
            TelemetryLayout::Wide
        );
        assert_eq!(detect_layout(&headers(&["Distance", "Lap"])), TelemetryLayout::Wide);
    }

    #[test]
    fn long_pivot_produces_one_row_per_key() {
        let t = table(
            "timestamp,lap,vehicle_number,telemetry_name,telemetry_value\n\
             t1,1,7,speed,100\n\
             t1,1,7,nmot,6000\n\
             t2,1,7,speed,110\n\
             t2,1,7,nmot,6100\n\
             t2,1,7,ignored_channel,1\n\
             t3,1,7,nmot,6200\n\
             t3,1,7,speed,120\n",
        );
        let whitelist = TelemetryConfig::default().signals;
        let pivot = pivot_long(&t, &whitelist).unwrap();

        assert_eq!(pivot.signals, vec!["nmot".to_string(), "speed".to_string()]);
        assert_eq!(pivot.rows.len(), 3);
        assert_eq!(pivot.rows[0].timestamp, "t1");
        assert_eq!(pivot.rows[0].values, vec![6000.0, 100.0]);
        assert_eq!(pivot.rows[2].values, vec![6200.0, 120.0]);
        assert_eq!(pivot.rows[1].vehicle, Some(7));
    }

    #[test]
    fn long_pivot_keeps_first_duplicate() {
        let t = table(
            "timestamp,lap,vehicle_number,telemetry_name,telemetry_value\n\
             t1,1,7,speed,100\n\
             t1,1,7,speed,999\n",
        );
        let pivot = pivot_long(&t, &headers(&["speed"])).unwrap();
        assert_eq!(pivot.rows.len(), 1);
        assert_eq!(pivot.rows[0].values, vec![100.0]);
    }

    #[test]
    fn long_pivot_separates_vehicles_and_laps() {
        let t = table(
            "timestamp,lap,vehicle_number,telemetry_name,telemetry_value\n\
             t1,1,7,speed,100\n\
             t1,1,8,speed,90\n\
             t1,2,7,speed,80\n",
        );
        let pivot = pivot_long(&t, &headers(&["speed"])).unwrap();
        assert_eq!(pivot.rows.len(), 3);
    }

    #[test]
    fn long_layout_maps_lap_trigger_to_distance() {
        let t = table(
            "timestamp,lap,vehicle_number,telemetry_name,telemetry_value\n\
             t1,2,7,speed,100\n\
             t1,2,7,Laptrigger_lapdist_dls,15.5\n\
             t2,2,7,speed,101\n\
             t2,2,7,Laptrigger_lapdist_dls,16.0\n",
        );
        let frame = normalize(&t, &TelemetryConfig::default()).unwrap();
        assert_eq!(frame.signals, vec!["speed".to_string()]);
        assert!(frame.has_vehicle);
        assert_eq!(frame.rows[0].distance, 15.5);
        assert_eq!(frame.rows[1].lap, 2);
        assert_eq!(frame.rows[1].values, vec![101.0]);
    }

    #[test]
    fn long_layout_without_distance_fails() {
        let t = table(
            "timestamp,lap,vehicle_number,telemetry_name,telemetry_value\n\
             t1,1,7,speed,100\n",
        );
        let err = normalize(&t, &TelemetryConfig::default()).unwrap_err();
        assert!(matches!(err, TrackError::MissingDistanceColumn(_)));
    }

    #[test]
    fn wide_aliases_are_renamed() {
        let t = table(
            "Laptrigger_lapdist_dls,lap,speed,driver\n\
             10.0,1,150,alice\n\
             20.0,1,155,alice\n",
        );
        let frame = normalize(&t, &TelemetryConfig::default()).unwrap();
        assert_eq!(frame.signals, vec!["speed".to_string()]);
        assert!(!frame.has_vehicle);
        assert_eq!(frame.rows[1].distance, 20.0);
        assert_eq!(frame.rows[1].lap, 1);

        let out = frame.to_table();
        assert_eq!(out.headers, headers(&["Distance", "Lap", "speed"]));
    }

    #[test]
    fn lap_trigger_shadows_plain_distance_column() {
        let t = table("Distance,Laptrigger_lapdist_dls,Lap,speed\n1.0,5.0,1,100\n");
        let frame = normalize(&t, &TelemetryConfig::default()).unwrap();
        assert_eq!(frame.rows[0].distance, 5.0);
        assert_eq!(frame.signals, vec!["speed".to_string()]);
    }

    #[test]
    fn wide_without_distance_fails() {
        let t = table("lap,speed\n1,100\n");
        let err = normalize(&t, &TelemetryConfig::default()).unwrap_err();
        assert!(matches!(err, TrackError::MissingDistanceColumn(_)));
    }

    #[test]
    fn wide_without_lap_fails() {
        let t = table("Distance,speed\n1,100\n");
        let err = normalize(&t, &TelemetryConfig::default()).unwrap_err();
        assert!(matches!(err, TrackError::MissingLapColumn(_)));
    }

    #[test]
    fn empty_cells_become_nan_and_bad_laps_are_dropped() {
        let t = table(
            "Distance,Lap,VehicleNumber,speed,aps\n\
             1.0,1,3,100,\n\
             2.0,,3,101,50\n\
             3.0,1.0,3,,55\n",
        );
        let frame = normalize(&t, &TelemetryConfig::default()).unwrap();
        assert_eq!(frame.rows.len(), 2);
        assert!(frame.rows[0].values[1].is_nan());
        assert!(frame.rows[1].values[0].is_nan());
        assert_eq!(frame.rows[1].lap, 1);
        assert_eq!(frame.rows[1].vehicle, Some(3));
    }

    #[test]
    fn canonical_table_is_a_fixed_point() {
        let t = table(
            "Distance,Lap,VehicleNumber,speed,gear\n\
             0.5,1,12,101.25,3\n\
             1.5,1,12,102.5,3\n\
             2.5,2,12,99.75,4\n",
        );
        let once = normalize(&t, &TelemetryConfig::default()).unwrap();
        let twice = normalize(&once.to_table(), &TelemetryConfig::default()).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once.to_table(), t);
    }

    #[test]
    fn long_reading_keeps_pivot_columns_and_whitelisted_rows() {
        let t = table(
            "expire_at,lap,meta_event,meta_session,meta_source,meta_time,original_vehicle_id,\
             outing,telemetry_name,telemetry_value,timestamp,vehicle_id,vehicle_number\n\
             ,3,I_R06,R1,kafka,m1,GR86-002-7,0,speed,100,t1,GR86-002-7,7\n\
             ,3,I_R06,R1,kafka,m1,GR86-002-7,0,unused_channel,1,t1,GR86-002-7,7\n\
             ,3,I_R06,R1,kafka,m1,GR86-002-7,0,Laptrigger_lapdist_dls,12.5,t1,GR86-002-7,7\n",
        );
        assert_eq!(
            t.headers,
            headers(&["lap", "telemetry_name", "telemetry_value", "timestamp", "vehicle_number"])
        );
        assert_eq!(t.rows.len(), 2);
        assert!(t.rows.iter().all(|r| r.len() == 5));
        assert_eq!(t.rows[0], headers(&["3", "speed", "100", "t1", "7"]));
        assert!(t.rows.iter().all(|r| r[1] != "unused_channel"));

        let frame = normalize(&t, &TelemetryConfig::default()).unwrap();
        assert_eq!(frame.rows[0].distance, 12.5);
        assert_eq!(frame.signals, vec!["speed".to_string()]);
    }

    #[test]
    fn wide_reading_keeps_resolved_and_numeric_columns() {
        let t = table(
            "Distance,Laptrigger_lapdist_dls,Lap,lap,driver,speed,gear,timestamp\n\
             1.0,5.0,1,1,alice,100,3,2025-01-01T00:00:00Z\n\
             2.0,6.0,1,1,alice,101,N,2025-01-01T00:00:01Z\n",
        );
        assert_eq!(t.headers, headers(&["Laptrigger_lapdist_dls", "lap", "speed"]));
        assert_eq!(t.rows, vec![headers(&["5.0", "1", "100"]), headers(&["6.0", "1", "101"])]);
    }
}
