//! Session summary and lifetime totals
//!
//! An activity file has one `session` message holding the aggregate numbers
//! for the whole recording. A totals file has one `totals` message per sport.

use crate::decode::MessageSource;
use crate::error::{IngestError, Result};
use crate::extract::{extract, Attributes, Position, TimestampCursor};
use crate::profile::{IngestionProfile, RoleTable, TOTALS};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Aggregate metrics of one recorded activity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub start_time: DateTime<Utc>,
    pub start_position: Option<Position>,
    pub total_elapsed_time: Option<f64>,
    pub total_timer_time: Option<f64>,
    pub total_distance: Option<f64>,
    pub total_strides: Option<i64>,
    pub total_cycles: Option<i64>,
    pub total_calories: Option<i64>,
    pub enhanced_avg_speed: Option<f64>,
    pub avg_speed: Option<f64>,
    pub enhanced_max_speed: Option<f64>,
    pub max_speed: Option<f64>,
    pub avg_power: Option<i64>,
    pub max_power: Option<i64>,
    pub total_ascent: Option<i64>,
    pub total_descent: Option<i64>,
    pub avg_heart_rate: Option<i64>,
    pub max_heart_rate: Option<i64>,
}

impl SessionSummary {
    fn from_attributes(attrs: &Attributes, index: usize) -> Result<Self> {
        let start_time = attrs.time("start_time_utc").ok_or_else(|| IngestError::MissingField {
            message: "session".to_string(),
            index,
            field: "start_time".to_string(),
        })?;

        Ok(Self {
            start_time,
            start_position: Position::from_attributes(
                attrs,
                "start_position_lat",
                "start_position_long",
            ),
            total_elapsed_time: attrs.float("total_elapsed_time"),
            total_timer_time: attrs.float("total_timer_time"),
            total_distance: attrs.float("total_distance"),
            total_strides: attrs.integer("total_strides"),
            total_cycles: attrs.integer("total_cycles"),
            total_calories: attrs.integer("total_calories"),
            enhanced_avg_speed: attrs.float("enhanced_avg_speed"),
            avg_speed: attrs.float("avg_speed"),
            enhanced_max_speed: attrs.float("enhanced_max_speed"),
            max_speed: attrs.float("max_speed"),
            avg_power: attrs.integer("avg_power"),
            max_power: attrs.integer("max_power"),
            total_ascent: attrs.integer("total_ascent"),
            total_descent: attrs.integer("total_descent"),
            avg_heart_rate: attrs.integer("avg_heart_rate"),
            max_heart_rate: attrs.integer("max_heart_rate"),
        })
    }
}

/// Build the session summary. The first `session` message wins.
pub fn build_session(
    source: &dyn MessageSource,
    profile: &IngestionProfile,
) -> Result<SessionSummary> {
    let sessions = source.messages("session");
    let first = sessions.first().ok_or(IngestError::MissingSessionRecord)?;
    if sessions.len() > 1 {
        tracing::warn!(count = sessions.len(), "Multiple session messages, using the first");
    }

    let (attrs, _) = extract(first, 0, &profile.session, TimestampCursor::default())?;
    let summary = SessionSummary::from_attributes(&attrs, 0)?;

    tracing::debug!(
        start = %summary.start_time,
        has_position = summary.start_position.is_some(),
        "Built session summary"
    );
    Ok(summary)
}

// ============================================================================
// Lifetime totals
// ============================================================================

/// Per-sport lifetime aggregates kept by the device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SportTotals {
    pub sport: String,
    pub distance: Option<f64>,
    pub calories: Option<i64>,
    pub timer_time: Option<f64>,
}

/// Build one [`SportTotals`] per `totals` message
pub fn build_totals(source: &dyn MessageSource) -> Result<Vec<SportTotals>> {
    let roles = RoleTable::new(&TOTALS);
    source
        .messages("totals")
        .into_iter()
        .enumerate()
        .map(|(index, message)| {
            let (attrs, _) = extract(message, index, &roles, TimestampCursor::default())?;
            let sport = attrs
                .text("sport")
                .map(str::to_string)
                .or_else(|| attrs.integer("sport").map(|code| code.to_string()))
                .ok_or_else(|| IngestError::MissingField {
                    message: "totals".to_string(),
                    index,
                    field: "sport".to_string(),
                })?;

            Ok(SportTotals {
                sport,
                distance: attrs.float("distance"),
                calories: attrs.integer("calories"),
                timer_time: attrs.float("timer_time"),
            })
        })
        .collect()
}
