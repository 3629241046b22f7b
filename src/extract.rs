//! Field extraction against a role table
//!
//! One generic routine turns a [`DecodedMessage`] into a normalized
//! [`Attributes`] map. What each field becomes is decided entirely by the
//! [`RoleTable`] picked at classification time.
//!
//! Reconciling 16-bit timestamps needs the last full timestamp seen earlier in
//! the stream. That state is a [`TimestampCursor`] passed in and handed back,
//! so a builder can thread it through a fold over the messages.

use crate::convert::{ant_to_utc, reconcile_timestamp_16, semicircles_to_degrees};
use crate::decode::{DecodedMessage, Field, Value};
use crate::error::{IngestError, Result};
use crate::profile::{FieldRole, RoleTable};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// A normalized attribute value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttrValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Time(DateTime<Utc>),
    Bool(bool),
    List(Vec<Value>),
    Other(serde_json::Value),
}

impl From<&Value> for AttrValue {
    fn from(v: &Value) -> Self {
        match v {
            Value::Integer(i) => AttrValue::Integer(*i),
            Value::Float(f) => AttrValue::Float(*f),
            Value::Text(s) => AttrValue::Text(s.clone()),
            Value::Bool(b) => AttrValue::Bool(*b),
            Value::List(items) => AttrValue::List(items.clone()),
            Value::Other(v) => AttrValue::Other(v.clone()),
        }
    }
}

/// Normalized attributes of one message.
///
/// A key mapped to `None` means the field was present with no value; a key
/// that is missing means the field never appeared. Both read back as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Attributes {
    values: BTreeMap<String, Option<AttrValue>>,
}

impl Attributes {
    pub fn insert(&mut self, key: String, value: Option<AttrValue>) {
        self.values.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.values.get(key).and_then(Option::as_ref)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            AttrValue::Integer(i) => Some(*i as f64),
            AttrValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn integer(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            AttrValue::Integer(i) => Some(*i),
            AttrValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn time(&self, key: &str) -> Option<DateTime<Utc>> {
        match self.get(key)? {
            AttrValue::Time(t) => Some(*t),
            _ => None,
        }
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Last full 32-bit ANT timestamp seen in the stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimestampCursor {
    pub last_full: Option<u32>,
}

impl TimestampCursor {
    pub fn observe(self, full: u32) -> Self {
        Self { last_full: Some(full) }
    }

    pub fn reconcile(&self, suffix: u16) -> Option<u32> {
        self.last_full.map(|last| reconcile_timestamp_16(last, suffix))
    }
}

/// Extract one message's fields.
///
/// `index` is the message's position among messages of its kind and only
/// feeds error reports. Full timestamps are applied before 16-bit suffixes so
/// a message carrying both reconciles against its own full time.
pub fn extract(
    message: &DecodedMessage,
    index: usize,
    roles: &RoleTable,
    cursor: TimestampCursor,
) -> Result<(Attributes, TimestampCursor)> {
    let mut attrs = Attributes::default();
    let mut cursor = cursor;
    let mut suffixes = Vec::new();

    for field in &message.fields {
        match roles.role(&field.name) {
            FieldRole::Ignored => {}
            FieldRole::Generic => {
                attrs.insert(field.name.clone(), field.value.as_ref().map(AttrValue::from));
            }
            FieldRole::Time => {
                let key = format!("{}_utc", field.name);
                match ant_seconds(field)? {
                    Some(ant) => {
                        cursor = cursor.observe(ant);
                        attrs.insert(key, Some(AttrValue::Time(ant_to_utc(ant))));
                    }
                    None => attrs.insert(key, None),
                }
            }
            FieldRole::Time16 => suffixes.push(field),
            FieldRole::Gps => {
                let (sem, deg) = match semicircles(field)? {
                    Some(s) => (
                        Some(AttrValue::Integer(i64::from(s))),
                        Some(AttrValue::Float(semicircles_to_degrees(s))),
                    ),
                    None => (None, None),
                };
                attrs.insert(format!("{}_sem", field.name), sem);
                attrs.insert(format!("{}_deg", field.name), deg);
            }
        }
    }

    for field in suffixes {
        let base = field.name.strip_suffix("_16").unwrap_or(&field.name);
        let key = format!("{}_utc", base);
        let suffix = match field.raw_integer() {
            Some(raw) => u16::try_from(raw).map_err(|_| IngestError::InvalidFieldValue {
                field: field.name.clone(),
                value: raw,
            })?,
            None => {
                // A full timestamp on the same message already filled the key
                if !attrs.contains_key(&key) {
                    attrs.insert(key, None);
                }
                continue;
            }
        };

        let full = cursor
            .reconcile(suffix)
            .ok_or_else(|| IngestError::MalformedTimestampSequence {
                message: message.kind.clone(),
                index,
            })?;
        attrs.insert(key, Some(AttrValue::Time(ant_to_utc(full))));
    }

    Ok((attrs, cursor))
}

fn ant_seconds(field: &Field) -> Result<Option<u32>> {
    field
        .raw_integer()
        .map(|raw| {
            u32::try_from(raw).map_err(|_| IngestError::InvalidFieldValue {
                field: field.name.clone(),
                value: raw,
            })
        })
        .transpose()
}

fn semicircles(field: &Field) -> Result<Option<i32>> {
    field
        .integer()
        .map(|raw| {
            i32::try_from(raw).map_err(|_| IngestError::InvalidFieldValue {
                field: field.name.clone(),
                value: raw,
            })
        })
        .transpose()
}

/// A coordinate pair in both stored forms
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub lat_semicircles: i32,
    pub long_semicircles: i32,
    pub lat_degrees: f64,
    pub long_degrees: f64,
}

impl Position {
    /// Read `<lat>_sem`/`<lat>_deg` and `<long>_sem`/`<long>_deg`.
    ///
    /// Returns `None` unless both coordinates are present.
    pub fn from_attributes(attrs: &Attributes, lat: &str, long: &str) -> Option<Self> {
        let lat_sem = attrs.integer(&format!("{}_sem", lat))?;
        let long_sem = attrs.integer(&format!("{}_sem", long))?;
        Some(Self {
            lat_semicircles: i32::try_from(lat_sem).ok()?,
            long_semicircles: i32::try_from(long_sem).ok()?,
            lat_degrees: attrs.float(&format!("{}_deg", lat))?,
            long_degrees: attrs.float(&format!("{}_deg", long))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::ANT_EPOCH_OFFSET;
    use crate::profile::{HEART_RATE_SAMPLES, MONITORING, MOVING_SAMPLES};

    const T0: u32 = 925_913_000;

    fn moving() -> RoleTable {
        RoleTable::new(&MOVING_SAMPLES)
    }

    // ==========================================================================
    // ROLE DISPATCH TESTS
    // ==========================================================================

    #[test]
    fn test_generic_copied_verbatim() {
        let msg = DecodedMessage::new("record")
            .with("heart_rate", 92)
            .with_raw("speed", 1.372, 1372);
        let (attrs, _) = extract(&msg, 0, &moving(), TimestampCursor::default()).unwrap();
        assert_eq!(attrs.integer("heart_rate"), Some(92));
        assert_eq!(attrs.float("speed"), Some(1.372));
    }

    #[test]
    fn test_unknown_fields_dropped() {
        let msg = DecodedMessage::new("record")
            .with("heart_rate", 92)
            .with("unknown_88", 5)
            .with("temperature", 21);
        let (attrs, _) = extract(&msg, 0, &moving(), TimestampCursor::default()).unwrap();
        assert_eq!(attrs.keys().collect::<Vec<_>>(), vec!["heart_rate"]);
    }

    #[test]
    fn test_null_stays_absent() {
        let msg = DecodedMessage::new("record").with_null("heart_rate").with_null("cadence");
        let (attrs, _) = extract(&msg, 0, &moving(), TimestampCursor::default()).unwrap();
        assert!(attrs.contains_key("heart_rate"));
        assert_eq!(attrs.get("heart_rate"), None);
        assert_eq!(attrs.integer("cadence"), None, "null must not become zero");
    }

    #[test]
    fn test_non_numeric_values_read_as_absent() {
        let msg = DecodedMessage::new("record")
            .with("heart_rate", true)
            .with("position_lat", false)
            .with("position_long", -1_046_016_545);
        let (attrs, _) = extract(&msg, 0, &moving(), TimestampCursor::default()).unwrap();
        assert_eq!(attrs.get("heart_rate"), Some(&AttrValue::Bool(true)));
        assert_eq!(attrs.integer("heart_rate"), None);
        assert_eq!(attrs.float("heart_rate"), None);
        assert_eq!(attrs.integer("position_lat_sem"), None);
        assert!(Position::from_attributes(&attrs, "position_lat", "position_long").is_none());
    }

    #[test]
    fn test_time_field_converted_and_renamed() {
        let msg = DecodedMessage::new("record").with_raw("timestamp", "2019-05-04 14:03:20", T0);
        let (attrs, cursor) = extract(&msg, 0, &moving(), TimestampCursor::default()).unwrap();
        let at = attrs.time("timestamp_utc").unwrap();
        assert_eq!(at.timestamp(), i64::from(T0) + ANT_EPOCH_OFFSET);
        assert!(!attrs.contains_key("timestamp"));
        assert_eq!(cursor.last_full, Some(T0));
    }

    #[test]
    fn test_gps_pair_stored_in_both_forms() {
        let msg = DecodedMessage::new("record")
            .with("position_lat", 493_499_921)
            .with("position_long", -1_046_016_545);
        let (attrs, _) = extract(&msg, 0, &moving(), TimestampCursor::default()).unwrap();
        assert_eq!(attrs.integer("position_lat_sem"), Some(493_499_921));
        assert_eq!(attrs.float("position_lat_deg"), Some(41.364686));
        assert!(attrs.float("position_long_deg").unwrap() < 0.0);
    }

    #[test]
    fn test_gps_null_gives_neither_form() {
        let msg = DecodedMessage::new("record").with_null("position_lat");
        let (attrs, _) = extract(&msg, 0, &moving(), TimestampCursor::default()).unwrap();
        assert_eq!(attrs.get("position_lat_sem"), None);
        assert_eq!(attrs.get("position_lat_deg"), None);
    }

    #[test]
    fn test_gps_ignored_for_heart_rate_profile() {
        let msg = DecodedMessage::new("record").with("position_lat", 1).with("heart_rate", 80);
        let (attrs, _) =
            extract(&msg, 0, &RoleTable::new(&HEART_RATE_SAMPLES), TimestampCursor::default())
                .unwrap();
        assert!(!attrs.contains_key("position_lat_sem"));
        assert_eq!(attrs.integer("heart_rate"), Some(80));
    }

    // ==========================================================================
    // INVALID VALUE TESTS
    // ==========================================================================

    #[test]
    fn test_negative_ant_seconds_rejected() {
        let msg = DecodedMessage::new("record").with("timestamp", -1);
        let err = extract(&msg, 0, &moving(), TimestampCursor::default()).unwrap_err();
        assert!(matches!(
            err,
            IngestError::InvalidFieldValue { ref field, value: -1 } if field == "timestamp"
        ));
    }

    #[test]
    fn test_semicircles_outside_i32_rejected() {
        let msg = DecodedMessage::new("record").with("position_lat", i64::from(i32::MAX) + 1);
        assert!(matches!(
            extract(&msg, 0, &moving(), TimestampCursor::default()),
            Err(IngestError::InvalidFieldValue { .. })
        ));
    }

    // ==========================================================================
    // 16-BIT TIMESTAMP TESTS
    // ==========================================================================
    //
    // Monitoring messages carry either a full `timestamp` or a 16-bit
    // `timestamp_16`. Both land on `timestamp_utc`. The cursor only moves on
    // full timestamps.
    // ==========================================================================

    #[test]
    fn test_suffix_reconciled_against_cursor() {
        let roles = RoleTable::new(&MONITORING);
        let first = DecodedMessage::new("monitoring").with("timestamp", T0);
        let (_, cursor) = extract(&first, 0, &roles, TimestampCursor::default()).unwrap();

        let suffix = ((T0 + 60) & 0xFFFF) as i64;
        let second = DecodedMessage::new("monitoring")
            .with("timestamp_16", suffix)
            .with("heart_rate", 61);
        let (attrs, after) = extract(&second, 1, &roles, cursor).unwrap();

        assert_eq!(
            attrs.time("timestamp_utc").unwrap().timestamp(),
            i64::from(T0 + 60) + ANT_EPOCH_OFFSET
        );
        assert!(!attrs.contains_key("timestamp_16_utc"));
        assert_eq!(after, cursor, "suffixes do not advance the cursor");
    }

    #[test]
    fn test_suffix_before_full_timestamp_fails() {
        let roles = RoleTable::new(&MONITORING);
        let msg = DecodedMessage::new("monitoring").with("timestamp_16", 100);
        let err = extract(&msg, 3, &roles, TimestampCursor::default()).unwrap_err();
        assert!(matches!(
            err,
            IngestError::MalformedTimestampSequence {
                ref message,
                index: 3,
            } if message == "monitoring"
        ));
    }

    #[test]
    fn test_full_timestamp_wins_on_same_message() {
        let roles = RoleTable::new(&MONITORING);
        let msg = DecodedMessage::new("monitoring")
            .with_null("timestamp_16")
            .with("timestamp", T0);
        let (attrs, _) = extract(&msg, 0, &roles, TimestampCursor::default()).unwrap();
        assert!(attrs.time("timestamp_utc").is_some());
    }

    // ==========================================================================
    // POSITION TESTS
    // ==========================================================================

    #[test]
    fn test_position_requires_both_coordinates() {
        let both = DecodedMessage::new("record")
            .with("position_lat", 493_499_921)
            .with("position_long", -1_046_016_545);
        let (attrs, _) = extract(&both, 0, &moving(), TimestampCursor::default()).unwrap();
        let pos = Position::from_attributes(&attrs, "position_lat", "position_long").unwrap();
        assert_eq!(pos.lat_semicircles, 493_499_921);
        assert_eq!(pos.lat_degrees, 41.364686);

        let one = DecodedMessage::new("record").with("position_lat", 493_499_921);
        let (attrs, _) = extract(&one, 0, &moving(), TimestampCursor::default()).unwrap();
        assert!(Position::from_attributes(&attrs, "position_lat", "position_long").is_none());
    }
}
