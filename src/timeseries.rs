//! Per-sample series
//!
//! Each builder walks one message kind in stream order, runs the extractor
//! and emits one typed sample per message. The [`TimestampCursor`] is carried
//! through a `try_fold` so 16-bit timestamps resolve against the latest full
//! timestamp before them.

use crate::decode::{DecodedMessage, MessageSource};
use crate::error::{IngestError, Result};
use crate::extract::{extract, Attributes, Position, TimestampCursor};
use crate::profile::{IngestionProfile, RoleTable, MONITORING, MONITORING_INFO, STRESS};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One activity `record`.
///
/// Everything except the timestamp is optional. Rows logged before the
/// device has a fix carry only the timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivitySample {
    pub timestamp: DateTime<Utc>,
    pub position: Option<Position>,
    pub distance: Option<f64>,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub heart_rate: Option<i64>,
    pub cadence: Option<i64>,
    pub fractional_cadence: Option<f64>,
    pub enhanced_altitude: Option<f64>,
    pub enhanced_speed: Option<f64>,
    pub power: Option<i64>,
}

impl ActivitySample {
    fn from_attributes(attrs: &Attributes, index: usize) -> Result<Self> {
        Ok(Self {
            timestamp: required_time(attrs, "record", index, "timestamp")?,
            position: Position::from_attributes(attrs, "position_lat", "position_long"),
            distance: attrs.float("distance"),
            altitude: attrs.float("altitude"),
            speed: attrs.float("speed"),
            heart_rate: attrs.integer("heart_rate"),
            cadence: attrs.integer("cadence"),
            fractional_cadence: attrs.float("fractional_cadence"),
            enhanced_altitude: attrs.float("enhanced_altitude"),
            enhanced_speed: attrs.float("enhanced_speed"),
            power: attrs.integer("power"),
        })
    }

    /// Whether anything besides the timestamp was recorded
    pub fn has_data(&self) -> bool {
        self.position.is_some()
            || self.distance.is_some()
            || self.altitude.is_some()
            || self.speed.is_some()
            || self.heart_rate.is_some()
            || self.cadence.is_some()
            || self.fractional_cadence.is_some()
            || self.enhanced_altitude.is_some()
            || self.enhanced_speed.is_some()
            || self.power.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeartRateSample {
    pub timestamp: DateTime<Utc>,
    pub heart_rate: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StressSample {
    pub timestamp: DateTime<Utc>,
    pub stress_level: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RestingMetabolicRateSample {
    pub timestamp: DateTime<Utc>,
    pub resting_metabolic_rate: Option<i64>,
}

fn required_time(
    attrs: &Attributes,
    message: &str,
    index: usize,
    field: &str,
) -> Result<DateTime<Utc>> {
    attrs
        .time(&format!("{}_utc", field))
        .ok_or_else(|| IngestError::MissingField {
            message: message.to_string(),
            index,
            field: field.to_string(),
        })
}

/// Run the extractor over every message, threading the cursor
fn extract_all(
    messages: &[&DecodedMessage],
    roles: &RoleTable,
) -> Result<Vec<(usize, Attributes)>> {
    let (rows, _) = messages.iter().enumerate().try_fold(
        (Vec::with_capacity(messages.len()), TimestampCursor::default()),
        |(mut rows, cursor), (index, message)| {
            let (attrs, cursor) = extract(message, index, roles, cursor)?;
            rows.push((index, attrs));
            Ok::<_, IngestError>((rows, cursor))
        },
    )?;
    Ok(rows)
}

// ============================================================================
// Activity records
// ============================================================================

/// One sample per `record` message, in stream order
pub fn build_activity_samples(
    source: &dyn MessageSource,
    profile: &IngestionProfile,
) -> Result<Vec<ActivitySample>> {
    let messages = source.messages("record");
    let mut samples = Vec::with_capacity(messages.len());
    let mut previous: Option<DateTime<Utc>> = None;

    for (index, attrs) in extract_all(&messages, &profile.samples)? {
        let sample = ActivitySample::from_attributes(&attrs, index)?;
        if let Some(prev) = previous {
            if sample.timestamp < prev {
                tracing::warn!(
                    index,
                    previous = %prev,
                    timestamp = %sample.timestamp,
                    "Record timestamp went backwards"
                );
            }
        }
        previous = Some(sample.timestamp);
        samples.push(sample);
    }

    tracing::debug!(
        samples = samples.len(),
        without_data = samples.iter().filter(|s| !s.has_data()).count(),
        "Built activity samples"
    );
    Ok(samples)
}

// ============================================================================
// Monitoring streams
// ============================================================================

/// The three series carried by a monitoring file
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonitorSeries {
    pub heart_rate: Vec<HeartRateSample>,
    pub stress: Vec<StressSample>,
    pub resting_metabolic_rate: Vec<RestingMetabolicRateSample>,
}

impl MonitorSeries {
    pub fn len(&self) -> usize {
        self.heart_rate.len() + self.stress.len() + self.resting_metabolic_rate.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Heart rate from `monitoring` messages.
///
/// Rows without a reading are dropped. A reading of 0 is the device's
/// placeholder for "no reading" and is dropped too.
pub fn build_heart_rate_samples(source: &dyn MessageSource) -> Result<Vec<HeartRateSample>> {
    let messages = source.messages("monitoring");
    let roles = RoleTable::new(&MONITORING);
    let mut samples: Vec<HeartRateSample> = Vec::new();
    let mut dropped = 0usize;

    for (index, attrs) in extract_all(&messages, &roles)? {
        let heart_rate = match attrs.integer("heart_rate") {
            Some(hr) if hr > 0 => hr,
            _ => {
                dropped += 1;
                continue;
            }
        };
        let timestamp = required_time(&attrs, "monitoring", index, "timestamp")?;
        if let Some(last) = samples.last().map(|s| s.timestamp) {
            if timestamp < last {
                tracing::warn!(index, "Monitoring timestamp went backwards");
            }
        }
        samples.push(HeartRateSample { timestamp, heart_rate });
    }

    tracing::debug!(samples = samples.len(), dropped, "Built heart rate samples");
    Ok(samples)
}

/// Stress from `stress_level` messages; the value may be absent
pub fn build_stress_samples(source: &dyn MessageSource) -> Result<Vec<StressSample>> {
    let messages = source.messages("stress_level");
    extract_all(&messages, &RoleTable::new(&STRESS))?
        .into_iter()
        .map(|(index, attrs)| {
            Ok(StressSample {
                timestamp: required_time(&attrs, "stress_level", index, "stress_level_time")?,
                stress_level: attrs.integer("stress_level_value"),
            })
        })
        .collect()
}

/// Resting metabolic rate from `monitoring_info` messages
pub fn build_resting_metabolic_rate_samples(
    source: &dyn MessageSource,
) -> Result<Vec<RestingMetabolicRateSample>> {
    let messages = source.messages("monitoring_info");
    extract_all(&messages, &RoleTable::new(&MONITORING_INFO))?
        .into_iter()
        .map(|(index, attrs)| {
            Ok(RestingMetabolicRateSample {
                timestamp: required_time(&attrs, "monitoring_info", index, "timestamp")?,
                resting_metabolic_rate: attrs.integer("resting_metabolic_rate"),
            })
        })
        .collect()
}

/// All monitoring series of one file
pub fn build_monitor_series(source: &dyn MessageSource) -> Result<MonitorSeries> {
    Ok(MonitorSeries {
        heart_rate: build_heart_rate_samples(source)?,
        stress: build_stress_samples(source)?,
        resting_metabolic_rate: build_resting_metabolic_rate_samples(source)?,
    })
}
