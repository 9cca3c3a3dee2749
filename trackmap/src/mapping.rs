// Lap distance mapping module
// Resamples each (vehicle, lap) of canonical telemetry onto the centerline distance grid

use std::collections::BTreeMap;
use std::fmt;

use rayon::prelude::*;
use tracing::{debug, info, warn};
use trackmap_common::Centerline;

use crate::config::MappingConfig;
use crate::curvature::centerline_curvature;
use crate::error::{Result, TrackError};
use crate::telemetry::{TelemetryFrame, TelemetryRow};

/// Vehicle id used when the telemetry has no vehicle column
pub const DEFAULT_VEHICLE: i64 = 0;

/// Linear interpolation over strictly increasing `xp`
///
/// No extrapolation: anything outside `[xp[0], xp[last]]` is NaN.
pub fn interpolate(xp: &[f64], fp: &[f64], x: f64) -> f64 {
    let n = xp.len().min(fp.len());
    if n == 0 || !(x >= xp[0] && x <= xp[n - 1]) {
        return f64::NAN;
    }

    let upper = xp[..n].partition_point(|&v| v <= x);
    if upper == n {
        return fp[n - 1];
    }
    let lower = upper - 1;
    if xp[lower] == x {
        return fp[lower];
    }

    let t = (x - xp[lower]) / (xp[upper] - xp[lower]);
    fp[lower] + t * (fp[upper] - fp[lower])
}

/// One signal resampled onto the centerline
#[derive(Debug, Clone, PartialEq)]
pub struct SignalTrace {
    pub name: String,
    pub values: Vec<f64>,
}

/// A lap's telemetry on the centerline's distance grid
///
/// Every array is index-aligned with the centerline points.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedLapProfile {
    pub vehicle: i64,
    pub lap: i64,
    pub distance: Vec<f64>,
    pub x: Vec<f64>,
    pub z: Vec<f64>,
    pub signals: Vec<SignalTrace>,
    pub curvature: Option<Vec<f64>>,
}

impl MappedLapProfile {
    pub fn len(&self) -> usize {
        self.distance.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distance.is_empty()
    }

    pub fn signal(&self, name: &str) -> Option<&[f64]> {
        self.signals
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.values.as_slice())
    }
}

/// All surviving profiles, ordered by vehicle then lap
#[derive(Debug, Clone, PartialEq)]
pub struct MappedTelemetry {
    pub signals: Vec<String>,
    pub has_curvature: bool,
    pub profiles: Vec<MappedLapProfile>,
}

impl MappedTelemetry {
    pub fn row_count(&self) -> usize {
        self.profiles.iter().map(MappedLapProfile::len).sum()
    }
}

/// Why a lap produced no profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LapSkip {
    /// Lap number zero or negative
    OutLap,
    TooSparse { samples: usize, minimum: usize },
}

impl fmt::Display for LapSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LapSkip::OutLap => write!(f, "out-lap"),
            LapSkip::TooSparse { samples, minimum } => {
                write!(f, "only {} samples (minimum {})", samples, minimum)
            }
        }
    }
}

/// Rows of one (vehicle, lap)
#[derive(Debug, Clone)]
pub struct LapGroup<'a> {
    pub vehicle: i64,
    pub lap: i64,
    rows: Vec<&'a TelemetryRow>,
}

impl<'a> LapGroup<'a> {
    pub fn sample_count(&self) -> usize {
        self.rows.len()
    }

    pub fn check(&self, min_samples: usize) -> Option<LapSkip> {
        if self.lap <= 0 {
            Some(LapSkip::OutLap)
        } else if self.rows.len() < min_samples {
            Some(LapSkip::TooSparse {
                samples: self.rows.len(),
                minimum: min_samples,
            })
        } else {
            None
        }
    }

    /// Placeable rows sorted by distance, repeated distances removed (first kept)
    fn ordered_rows(&self) -> Vec<&'a TelemetryRow> {
        let mut rows: Vec<&'a TelemetryRow> = self
            .rows
            .iter()
            .copied()
            .filter(|r| r.distance.is_finite())
            .collect();
        rows.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        rows.dedup_by(|later, earlier| later.distance == earlier.distance);
        rows
    }

    /// Interpolate every signal at each centerline distance
    pub fn map_onto(&self, signals: &[String], centerline: &Centerline) -> MappedLapProfile {
        let rows = self.ordered_rows();
        let grid = centerline.distances();

        let traces = signals
            .iter()
            .enumerate()
            .map(|(s, name)| {
                let (xp, fp): (Vec<f64>, Vec<f64>) = rows
                    .iter()
                    .filter(|r| r.values[s].is_finite())
                    .map(|r| (r.distance, r.values[s]))
                    .unzip();
                SignalTrace {
                    name: name.clone(),
                    values: grid.iter().map(|&d| interpolate(&xp, &fp, d)).collect(),
                }
            })
            .collect();

        MappedLapProfile {
            vehicle: self.vehicle,
            lap: self.lap,
            distance: grid,
            x: centerline.xs(),
            z: centerline.zs(),
            signals: traces,
            curvature: None,
        }
    }
}

/// Split telemetry into (vehicle, lap) groups in ascending order
///
/// Every row of a lap counts toward its sample total. Rows without a finite
/// distance stay in the group but are never placed on the track.
pub fn group_laps(frame: &TelemetryFrame) -> Vec<LapGroup<'_>> {
    let mut grouped: BTreeMap<(i64, i64), Vec<&TelemetryRow>> = BTreeMap::new();

    for row in &frame.rows {
        let vehicle = row.vehicle.unwrap_or(DEFAULT_VEHICLE);
        grouped.entry((vehicle, row.lap)).or_default().push(row);
    }

    let unplaced = frame.rows.iter().filter(|r| !r.distance.is_finite()).count();
    if unplaced > 0 {
        debug!("{} rows have no distance and will not be placed", unplaced);
    }

    grouped
        .into_iter()
        .map(|((vehicle, lap), rows)| LapGroup { vehicle, lap, rows })
        .collect()
}

/// Maps a telemetry frame onto one centerline
pub struct LapMapper<'a> {
    frame: &'a TelemetryFrame,
    centerline: &'a Centerline,
    config: MappingConfig,
    curvature: Option<Vec<f64>>,
}

impl<'a> LapMapper<'a> {
    pub fn new(frame: &'a TelemetryFrame, centerline: &'a Centerline, config: &MappingConfig) -> Self {
        let curvature = config
            .append_curvature
            .then(|| centerline_curvature(centerline));
        Self {
            frame,
            centerline,
            config: config.clone(),
            curvature,
        }
    }

    pub fn groups(&self) -> Vec<LapGroup<'a>> {
        group_laps(self.frame)
    }

    pub fn map_lap(&self, group: &LapGroup<'_>) -> std::result::Result<MappedLapProfile, LapSkip> {
        if let Some(skip) = group.check(self.config.min_samples) {
            return Err(skip);
        }
        let mut profile = group.map_onto(&self.frame.signals, self.centerline);
        profile.curvature = self.curvature.clone();
        Ok(profile)
    }

    /// Lazily map each group in order, skipping laps that do not qualify.
    /// Calling again starts over.
    pub fn profiles(&self) -> Box<dyn Iterator<Item = MappedLapProfile> + '_> {
        Box::new(self.groups().into_iter().filter_map(move |group| {
            self.map_lap(&group)
                .map_err(|skip| log_skip(&group, skip))
                .ok()
        }))
    }

    /// Map every group and concatenate the profiles in group order
    pub fn map_all(&self) -> Result<MappedTelemetry> {
        let groups = self.groups();
        info!(
            "Mapping {} (vehicle, lap) groups onto {} centerline points{}",
            groups.len(),
            self.centerline.len(),
            if self.config.parallel { " in parallel" } else { "" }
        );

        let results: Vec<std::result::Result<MappedLapProfile, LapSkip>> = if self.config.parallel {
            groups.par_iter().map(|g| self.map_lap(g)).collect()
        } else {
            groups.iter().map(|g| self.map_lap(g)).collect()
        };

        let mut profiles = Vec::with_capacity(results.len());
        for (group, result) in groups.iter().zip(results) {
            match result {
                Ok(profile) => {
                    debug!(
                        "  Vehicle {} lap {}: {} samples mapped",
                        group.vehicle,
                        group.lap,
                        group.sample_count()
                    );
                    profiles.push(profile);
                }
                Err(skip) => log_skip(group, skip),
            }
        }

        if profiles.is_empty() {
            return Err(TrackError::NoValidLaps);
        }

        info!("Mapped {} lap(s)", profiles.len());
        Ok(MappedTelemetry {
            signals: self.frame.signals.clone(),
            has_curvature: self.curvature.is_some(),
            profiles,
        })
    }
}

fn log_skip(group: &LapGroup<'_>, skip: LapSkip) {
    match skip {
        LapSkip::OutLap => debug!("  Vehicle {} lap {}: skipped ({})", group.vehicle, group.lap, skip),
        LapSkip::TooSparse { .. } => {
            warn!("  Vehicle {} lap {}: skipped ({})", group.vehicle, group.lap, skip)
        }
    }
}
