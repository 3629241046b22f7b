//! Views over stored data
//!
//! Turns database rows into display-ready structures:
//!
//! - **Activity list**: one line per activity with formatted distance and time
//! - **Activity detail**: the session summary plus the GPS track
//! - **Charts**: see [`chart`]
//! - **Totals**: lifetime distance, time and calories per sport
//! - **Manual stats**: hand-entered VO2 max, weight, height and age
//!
//! Every view is `Serialize`, so `--json` output is the same structure the
//! text output is printed from.

pub mod chart;

pub use chart::{
    daily_stress_breakdown, ChartPoint, ChartSeries, Metric, StressBand, StressBreakdown,
};

use crate::convert::{format_count, format_date, format_distance, format_duration};
use crate::db::{
    from_db_time, ActivityFile, ActivitySampleRow, ManualStatsRow, SessionRow, SportTotalsRow,
};
use crate::error::IngestError;
use crate::ingest::ImportReport;
use crate::profile::FileKind;
use serde::Serialize;
use std::io::{self, Write};

fn display_time(stored: &str) -> String {
    from_db_time(stored)
        .map(|t| format_date(&t))
        .unwrap_or_else(|| stored.to_string())
}

/// One row of `localfit activities`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityListEntry {
    pub filename: String,
    pub activity_type: String,
    pub activity_category: String,
    pub start_time: String,
    pub start_location: Option<String>,
    pub distance: Option<String>,
    pub elapsed_time: Option<String>,
    pub calories: Option<String>,
}

impl ActivityListEntry {
    pub fn from_rows(file: &ActivityFile, session: &SessionRow) -> Self {
        Self {
            filename: file.filename.clone(),
            activity_type: file.activity_type.clone(),
            activity_category: file.activity_category.clone(),
            start_time: display_time(&session.start_time_utc),
            start_location: file.start_location.clone(),
            distance: session.total_distance.map(|d| format_distance(d, 2)),
            elapsed_time: session.total_elapsed_time.map(format_duration),
            calories: session.total_calories.map(format_count),
        }
    }
}

/// A coordinate in the shape map widgets expect
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackPoint {
    pub lat: f64,
    pub lng: f64,
}

/// `localfit show`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityDetail {
    #[serde(flatten)]
    pub summary: ActivityListEntry,
    pub total_strides: Option<i64>,
    pub avg_heart_rate: Option<i64>,
    pub max_heart_rate: Option<i64>,
    pub total_ascent: Option<i64>,
    pub total_descent: Option<i64>,
    pub start_position: Option<TrackPoint>,
    pub linked: bool,
    pub samples: usize,
    pub track: Vec<TrackPoint>,
}

impl ActivityDetail {
    /// Rows logged before the GPS fix have no position and are left off the track
    pub fn build(file: &ActivityFile, session: &SessionRow, samples: &[ActivitySampleRow]) -> Self {
        let track = samples
            .iter()
            .filter_map(|s| {
                Some(TrackPoint {
                    lat: s.position_lat_deg?,
                    lng: s.position_long_deg?,
                })
            })
            .collect();

        let start_position = match (
            session.start_position_lat_deg,
            session.start_position_long_deg,
        ) {
            (Some(lat), Some(lng)) => Some(TrackPoint { lat, lng }),
            _ => None,
        };

        Self {
            summary: ActivityListEntry::from_rows(file, session),
            total_strides: session.total_strides,
            avg_heart_rate: session.avg_heart_rate,
            max_heart_rate: session.max_heart_rate,
            total_ascent: session.total_ascent,
            total_descent: session.total_descent,
            start_position,
            linked: file.secondary_file_id.is_some(),
            samples: samples.len(),
            track,
        }
    }
}

/// One row of `localfit totals`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TotalsEntry {
    pub sport: String,
    pub distance: Option<String>,
    pub timer_time: Option<String>,
    pub calories: Option<String>,
    pub updated: String,
}

impl TotalsEntry {
    pub fn from_row(row: &SportTotalsRow) -> Self {
        Self {
            sport: row.sport.clone(),
            distance: row.distance.map(|d| format_distance(d, 0)),
            timer_time: row.timer_time.map(format_duration),
            calories: row.calories.map(format_count),
            updated: display_time(&row.updated_at),
        }
    }
}

/// Fitness band for a VO2 max reading (ml/kg/min)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Vo2Range {
    Poor,
    Fair,
    Good,
    Excellent,
    Superior,
}

impl Vo2Range {
    /// Bands use fixed cutoffs of 35, 40, 45 and 50; age and sex are not considered
    pub fn from_vo2_max(vo2_max: f64) -> Self {
        match vo2_max {
            v if v >= 50.0 => Vo2Range::Superior,
            v if v >= 45.0 => Vo2Range::Excellent,
            v if v >= 40.0 => Vo2Range::Good,
            v if v >= 35.0 => Vo2Range::Fair,
            _ => Vo2Range::Poor,
        }
    }
}

impl std::fmt::Display for Vo2Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Vo2Range::Poor => "poor",
            Vo2Range::Fair => "fair",
            Vo2Range::Good => "good",
            Vo2Range::Excellent => "excellent",
            Vo2Range::Superior => "superior",
        };
        write!(f, "{}", label)
    }
}

/// One row of `localfit stats`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManualStatsEntry {
    pub recorded: String,
    pub vo2_max: Option<f64>,
    pub vo2_range: Option<Vo2Range>,
    pub weight_lbs: Option<f64>,
    pub height_inches: Option<i32>,
    pub age: Option<i32>,
}

impl ManualStatsEntry {
    pub fn from_row(row: &ManualStatsRow) -> Self {
        Self {
            recorded: display_time(&row.recorded_at),
            vo2_max: row.vo2_max,
            vo2_range: row.vo2_max.map(Vo2Range::from_vo2_max),
            weight_lbs: row.weight_lbs,
            height_inches: row.height_inches,
            age: row.age,
        }
    }
}

/// Outcome counts for a batch import
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub total: usize,
    pub activities: usize,
    pub monitors: usize,
    pub totals: usize,
    pub duplicates: usize,
    pub failed: usize,
}

impl ImportSummary {
    pub fn from_outcomes<'a, I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = &'a Result<ImportReport, IngestError>>,
    {
        let mut summary = Self::default();
        for outcome in outcomes {
            summary.total += 1;
            match outcome {
                Ok(r) => match r.kind {
                    FileKind::Activity => summary.activities += 1,
                    FileKind::Monitoring => summary.monitors += 1,
                    FileKind::Totals => summary.totals += 1,
                },
                Err(IngestError::DuplicateFile(_)) => summary.duplicates += 1,
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }

    pub fn imported(&self) -> usize {
        self.activities + self.monitors + self.totals
    }

    /// Duplicates count as failures for the exit status
    pub fn has_failures(&self) -> bool {
        self.failed + self.duplicates > 0
    }
}

/// Write any view as pretty JSON followed by a newline
pub fn write_json<W: Write, T: Serialize + ?Sized>(out: &mut W, value: &T) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)
}
