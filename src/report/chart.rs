//! Time series shaped for charting
//!
//! A [`ChartSeries`] is a list of `(t, y)` points plus its time bounds. The
//! CLI renders it as a sparkline; `--json` emits it as-is.

use crate::db::{from_db_time, ActivitySampleRow, HeartRateRow, RestingMetabolicRateRow, StressRow};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

const SPARK_LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    HeartRate,
    Altitude,
    Speed,
    Stress,
    RestingMetabolicRate,
}

impl Metric {
    pub fn label(&self) -> &'static str {
        match self {
            Metric::HeartRate => "Heart rate",
            Metric::Altitude => "Altitude",
            Metric::Speed => "Speed",
            Metric::Stress => "Stress",
            Metric::RestingMetabolicRate => "Resting metabolic rate",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::HeartRate => "bpm",
            Metric::Altitude => "m",
            Metric::Speed => "m/s",
            Metric::Stress => "",
            Metric::RestingMetabolicRate => "kcal/day",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChartPoint {
    pub t: DateTime<Utc>,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSeries {
    pub metric: Metric,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub points: Vec<ChartPoint>,
}

impl ChartSeries {
    pub fn new(metric: Metric, points: Vec<ChartPoint>) -> Self {
        Self {
            metric,
            start_time: points.first().map(|p| p.t),
            end_time: points.last().map(|p| p.t),
            points,
        }
    }

    /// Chart one metric of an activity. Rows without that metric are skipped.
    pub fn from_activity(metric: Metric, rows: &[ActivitySampleRow]) -> Self {
        let points = rows
            .iter()
            .filter_map(|r| {
                let y = match metric {
                    Metric::HeartRate => r.heart_rate.map(|v| v as f64),
                    Metric::Altitude => r.enhanced_altitude.or(r.altitude),
                    Metric::Speed => r.enhanced_speed.or(r.speed),
                    Metric::Stress | Metric::RestingMetabolicRate => None,
                }?;
                Some(ChartPoint { t: from_db_time(&r.timestamp_utc)?, y })
            })
            .collect();
        Self::new(metric, points)
    }

    pub fn from_heart_rate(rows: &[HeartRateRow]) -> Self {
        let points = rows
            .iter()
            .filter_map(|r| {
                Some(ChartPoint {
                    t: from_db_time(&r.timestamp_utc)?,
                    y: r.heart_rate as f64,
                })
            })
            .collect();
        Self::new(Metric::HeartRate, points)
    }

    /// Negative stress values are the device's "could not measure" marker
    /// and chart as 0.
    pub fn from_stress(rows: &[StressRow]) -> Self {
        let points = rows
            .iter()
            .filter_map(|r| {
                let value = r.stress_level_value?;
                Some(ChartPoint {
                    t: from_db_time(&r.stress_level_time_utc)?,
                    y: value.max(0) as f64,
                })
            })
            .collect();
        Self::new(Metric::Stress, points)
    }

    pub fn from_resting_metabolic_rate(rows: &[RestingMetabolicRateRow]) -> Self {
        let points = rows
            .iter()
            .filter_map(|r| {
                Some(ChartPoint {
                    t: from_db_time(&r.timestamp_utc)?,
                    y: r.resting_metabolic_rate? as f64,
                })
            })
            .collect();
        Self::new(Metric::RestingMetabolicRate, points)
    }

    pub fn min(&self) -> Option<f64> {
        self.points.iter().map(|p| p.y).reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.points.iter().map(|p| p.y).reduce(f64::max)
    }

    pub fn mean(&self) -> Option<f64> {
        if self.points.is_empty() {
            return None;
        }
        Some(self.points.iter().map(|p| p.y).sum::<f64>() / self.points.len() as f64)
    }

    /// Render at most `width` columns, each the mean of its bucket of points
    pub fn sparkline(&self, width: usize) -> String {
        let (Some(lo), Some(hi)) = (self.min(), self.max()) else {
            return String::new();
        };
        let width = width.max(1).min(self.points.len());
        let span = hi - lo;

        (0..width)
            .map(|col| {
                let start = col * self.points.len() / width;
                let end = ((col + 1) * self.points.len() / width).max(start + 1);
                let bucket = &self.points[start..end];
                let avg = bucket.iter().map(|p| p.y).sum::<f64>() / bucket.len() as f64;
                let level = if span > 0.0 {
                    (((avg - lo) / span) * (SPARK_LEVELS.len() - 1) as f64).round() as usize
                } else {
                    0
                };
                SPARK_LEVELS[level.min(SPARK_LEVELS.len() - 1)]
            })
            .collect()
    }
}

// ============================================================================
// Stress bands
// ============================================================================

/// Garmin's stress bands over the 0-100 scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StressBand {
    Rest,
    Low,
    Med,
    High,
}

impl StressBand {
    /// `None` for the negative "no reading" markers
    pub fn of(value: i64) -> Option<Self> {
        match value {
            0..=25 => Some(StressBand::Rest),
            26..=50 => Some(StressBand::Low),
            51..=75 => Some(StressBand::Med),
            76.. => Some(StressBand::High),
            _ => None,
        }
    }
}

/// Samples per stress band on one UTC day
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StressBreakdown {
    pub date: Option<NaiveDate>,
    pub rest: usize,
    pub low: usize,
    pub med: usize,
    pub high: usize,
}

impl StressBreakdown {
    fn add(&mut self, band: StressBand) {
        match band {
            StressBand::Rest => self.rest += 1,
            StressBand::Low => self.low += 1,
            StressBand::Med => self.med += 1,
            StressBand::High => self.high += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.rest + self.low + self.med + self.high
    }
}

/// Count stress samples per band, one entry per day, oldest first
pub fn daily_stress_breakdown(rows: &[StressRow]) -> Vec<StressBreakdown> {
    let mut days: BTreeMap<NaiveDate, StressBreakdown> = BTreeMap::new();
    for row in rows {
        let (Some(t), Some(band)) = (
            from_db_time(&row.stress_level_time_utc),
            row.stress_level_value.and_then(StressBand::of),
        ) else {
            continue;
        };
        let date = t.date_naive();
        days.entry(date)
            .or_insert_with(|| StressBreakdown {
                date: Some(date),
                ..Default::default()
            })
            .add(band);
    }
    days.into_values().collect()
}
