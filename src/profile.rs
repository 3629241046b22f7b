//! Ingestion profiles and record classification
//!
//! An activity file says what it recorded through one `sport` message holding
//! a (sport, sub_sport) code pair. That pair picks an [`IngestionProfile`]:
//! the activity label to store plus two role tables, one for the per-sample
//! `record` messages and one for the `session` summary.
//!
//! Profiles are plain data. Supporting a new activity means adding a row to
//! [`PROFILES`], not writing new extraction code.
//!
//! # Field roles
//!
//! | Role | Stored as |
//! |------|-----------|
//! | `Generic` | converted value under its own name |
//! | `Time` | ANT seconds → UTC under `<name>_utc` |
//! | `Time16` | 16-bit suffix, reconciled → UTC under `<base>_utc` |
//! | `Gps` | semicircles under `<name>_sem`, degrees under `<name>_deg` |
//! | `Ignored` | dropped |

use crate::decode::{DecodedMessage, MessageSource};
use crate::error::{IngestError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// How a named field is copied out of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    Generic,
    Time,
    Time16,
    Gps,
    Ignored,
}

/// Field names per role, as written in the profile table
#[derive(Debug, Clone, Copy)]
pub struct RoleSpec {
    pub generic: &'static [&'static str],
    pub time: &'static [&'static str],
    pub time_16: &'static [&'static str],
    pub gps: &'static [&'static str],
}

/// A [`RoleSpec`] resolved into a name → role lookup
#[derive(Debug, Clone, PartialEq)]
pub struct RoleTable {
    roles: HashMap<&'static str, FieldRole>,
}

impl RoleTable {
    pub fn new(spec: &RoleSpec) -> Self {
        let mut roles = HashMap::new();
        let groups = [
            (spec.generic, FieldRole::Generic),
            (spec.time, FieldRole::Time),
            (spec.time_16, FieldRole::Time16),
            (spec.gps, FieldRole::Gps),
        ];
        for (names, role) in groups {
            for name in names {
                roles.insert(*name, role);
            }
        }
        Self { roles }
    }

    /// Role for a field name; anything not listed is ignored
    pub fn role(&self, name: &str) -> FieldRole {
        self.roles.get(name).copied().unwrap_or(FieldRole::Ignored)
    }
}

// ============================================================================
// Role sets
// ============================================================================

/// Per-sample fields for activities that move (GPS track, speed, distance)
pub const MOVING_SAMPLES: RoleSpec = RoleSpec {
    generic: &[
        "distance",
        "altitude",
        "speed",
        "heart_rate",
        "cadence",
        "fractional_cadence",
        "enhanced_altitude",
        "enhanced_speed",
        "power",
    ],
    time: &["timestamp"],
    time_16: &[],
    gps: &["position_lat", "position_long"],
};

pub const MOVING_SESSION: RoleSpec = RoleSpec {
    generic: &[
        "total_elapsed_time",
        "total_timer_time",
        "total_distance",
        "total_strides",
        "total_cycles",
        "total_calories",
        "enhanced_avg_speed",
        "avg_speed",
        "enhanced_max_speed",
        "max_speed",
        "avg_power",
        "max_power",
        "total_ascent",
        "total_descent",
        "avg_heart_rate",
        "max_heart_rate",
    ],
    time: &["start_time"],
    time_16: &[],
    gps: &["start_position_lat", "start_position_long"],
};

/// Per-sample fields for stationary activities (yoga, stair machine, cardio)
pub const HEART_RATE_SAMPLES: RoleSpec = RoleSpec {
    generic: &["heart_rate"],
    time: &["timestamp"],
    time_16: &[],
    gps: &[],
};

pub const HEART_RATE_SESSION: RoleSpec = RoleSpec {
    generic: &[
        "total_elapsed_time",
        "total_timer_time",
        "total_calories",
        "avg_heart_rate",
        "max_heart_rate",
    ],
    time: &["start_time"],
    time_16: &[],
    gps: &[],
};

/// Background heart-rate monitoring (`monitoring` messages)
pub const MONITORING: RoleSpec = RoleSpec {
    generic: &["heart_rate"],
    time: &["timestamp"],
    time_16: &["timestamp_16"],
    gps: &[],
};

/// All-day stress (`stress_level` messages)
pub const STRESS: RoleSpec = RoleSpec {
    generic: &["stress_level_value"],
    time: &["stress_level_time"],
    time_16: &[],
    gps: &[],
};

/// Resting metabolic rate (`monitoring_info` messages)
pub const MONITORING_INFO: RoleSpec = RoleSpec {
    generic: &["resting_metabolic_rate"],
    time: &["timestamp"],
    time_16: &[],
    gps: &[],
};

/// Lifetime totals (`totals` messages)
pub const TOTALS: RoleSpec = RoleSpec {
    generic: &["sport", "distance", "calories", "timer_time"],
    time: &[],
    time_16: &[],
    gps: &[],
};

// ============================================================================
// Profile table
// ============================================================================

/// Category assigned to files recorded by a device
pub const RECORDED: &str = "recorded";

/// One row of the classification table
#[derive(Debug, Clone, Copy)]
pub struct ProfileEntry {
    pub sport: i64,
    pub sub_sport: i64,
    pub activity_type: &'static str,
    pub samples: &'static RoleSpec,
    pub session: &'static RoleSpec,
}

/// (sport, sub_sport) → activity profile
pub const PROFILES: &[ProfileEntry] = &[
    ProfileEntry {
        sport: 1,
        sub_sport: 0,
        activity_type: "run",
        samples: &MOVING_SAMPLES,
        session: &MOVING_SESSION,
    },
    ProfileEntry {
        sport: 1,
        sub_sport: 1,
        activity_type: "treadmill",
        samples: &MOVING_SAMPLES,
        session: &MOVING_SESSION,
    },
    ProfileEntry {
        sport: 4,
        sub_sport: 15,
        activity_type: "elliptical",
        samples: &MOVING_SAMPLES,
        session: &MOVING_SESSION,
    },
    ProfileEntry {
        sport: 4,
        sub_sport: 16,
        activity_type: "stair_climbing",
        samples: &HEART_RATE_SAMPLES,
        session: &HEART_RATE_SESSION,
    },
    ProfileEntry {
        sport: 10,
        sub_sport: 26,
        activity_type: "cardio",
        samples: &HEART_RATE_SAMPLES,
        session: &HEART_RATE_SESSION,
    },
    ProfileEntry {
        sport: 10,
        sub_sport: 43,
        activity_type: "yoga",
        samples: &HEART_RATE_SAMPLES,
        session: &HEART_RATE_SESSION,
    },
    ProfileEntry {
        sport: 11,
        sub_sport: 0,
        activity_type: "walk",
        samples: &MOVING_SAMPLES,
        session: &MOVING_SESSION,
    },
];

/// Raw (sport, sub_sport) codes from a sport descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SportCode {
    pub sport: i64,
    pub sub_sport: i64,
}

impl fmt::Display for SportCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.sport, self.sub_sport)
    }
}

/// Everything needed to ingest one activity file, fixed at classification
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionProfile {
    pub code: SportCode,
    pub activity_type: &'static str,
    pub category: &'static str,
    pub samples: RoleTable,
    pub session: RoleTable,
}

impl IngestionProfile {
    /// Exact-match lookup in [`PROFILES`]
    pub fn lookup(code: SportCode) -> Option<Self> {
        PROFILES
            .iter()
            .find(|p| p.sport == code.sport && p.sub_sport == code.sub_sport)
            .map(|p| Self {
                code,
                activity_type: p.activity_type,
                category: RECORDED,
                samples: RoleTable::new(p.samples),
                session: RoleTable::new(p.session),
            })
    }
}

/// Read the (sport, sub_sport) pair from a sport descriptor message.
///
/// A missing `sub_sport` means the generic refinement (0).
pub fn sport_code(message: &DecodedMessage) -> Result<SportCode> {
    let sport = message
        .field("sport")
        .and_then(|f| f.raw_integer())
        .ok_or_else(|| IngestError::MalformedFile("sport message has no sport code".to_string()))?;
    let sub_sport = message
        .field("sub_sport")
        .and_then(|f| f.raw_integer())
        .unwrap_or(0);
    Ok(SportCode { sport, sub_sport })
}

/// Pick the ingestion profile for an activity file
pub fn classify(source: &dyn MessageSource) -> Result<IngestionProfile> {
    let descriptors = source.messages("sport");
    let descriptor = match descriptors.as_slice() {
        [] => return Err(IngestError::MissingSportDescriptor),
        [one] => *one,
        many => {
            return Err(IngestError::MalformedFile(format!(
                "expected one sport message, found {}",
                many.len()
            )))
        }
    };

    let code = sport_code(descriptor)?;
    let profile = IngestionProfile::lookup(code).ok_or(IngestError::UnsupportedActivityType {
        sport: code.sport,
        sub_sport: code.sub_sport,
    })?;

    tracing::debug!(code = %code, activity_type = profile.activity_type, "Classified activity");
    Ok(profile)
}

// ============================================================================
// File kinds
// ============================================================================

/// Which ingestion path a decoded file takes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Activity,
    Monitoring,
    Totals,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Activity => "activity",
            FileKind::Monitoring => "monitoring",
            FileKind::Totals => "totals",
        }
    }

    fn from_code(code: i64) -> Option<Self> {
        match code {
            4 => Some(FileKind::Activity),
            10 => Some(FileKind::Totals),
            15 | 28 | 32 => Some(FileKind::Monitoring),
            _ => None,
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        match label {
            "activity" => Some(FileKind::Activity),
            "totals" => Some(FileKind::Totals),
            "monitoring_a" | "monitoring_b" | "monitoring_daily" => Some(FileKind::Monitoring),
            _ => None,
        }
    }

    /// Detect the kind from the `file_id` message's `type` field.
    ///
    /// Dumps without a `file_id` are judged by which messages they carry.
    pub fn detect(source: &dyn MessageSource) -> Result<Self> {
        if let Some(file_id) = source.messages("file_id").first() {
            let field = file_id
                .field("type")
                .ok_or_else(|| IngestError::MalformedFile("file_id has no type".to_string()))?;

            let by_code = field.raw_integer().and_then(Self::from_code);
            let by_label = field
                .value
                .as_ref()
                .and_then(|v| v.as_str())
                .and_then(Self::from_label);

            return by_code.or(by_label).ok_or_else(|| {
                let shown = field
                    .value
                    .as_ref()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .or_else(|| field.raw_integer().map(|c| c.to_string()))
                    .unwrap_or_else(|| "unknown".to_string());
                IngestError::UnsupportedFileKind(shown)
            });
        }

        if !source.messages("sport").is_empty() || !source.messages("session").is_empty() {
            Ok(FileKind::Activity)
        } else if !source.messages("monitoring").is_empty()
            || !source.messages("stress_level").is_empty()
        {
            Ok(FileKind::Monitoring)
        } else if !source.messages("totals").is_empty() {
            Ok(FileKind::Totals)
        } else {
            Err(IngestError::UnsupportedFileKind("no file_id message".to_string()))
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::DecodedFile;

    fn sport_file(sport: i64, sub_sport: i64) -> DecodedFile {
        DecodedFile::new(vec![DecodedMessage::new("sport")
            .with_raw("sport", "whatever", sport)
            .with_raw("sub_sport", "whatever", sub_sport)])
    }

    // ==========================================================================
    // CLASSIFICATION TESTS
    // ==========================================================================

    #[test]
    fn test_known_pairs() {
        let cases = [
            ((11, 0), "walk"),
            ((1, 0), "run"),
            ((10, 43), "yoga"),
            ((4, 16), "stair_climbing"),
            ((1, 1), "treadmill"),
            ((4, 15), "elliptical"),
            ((10, 26), "cardio"),
        ];
        for ((sport, sub), label) in cases {
            let profile = classify(&sport_file(sport, sub)).unwrap();
            assert_eq!(profile.activity_type, label);
            assert_eq!(profile.category, RECORDED);
            assert_eq!(profile.code, SportCode { sport, sub_sport: sub });
        }
    }

    #[test]
    fn test_unknown_pair_carries_codes() {
        let err = classify(&sport_file(2, 7)).unwrap_err();
        match err {
            IngestError::UnsupportedActivityType { sport, sub_sport } => {
                assert_eq!((sport, sub_sport), (2, 7));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_sub_sport_must_match_exactly() {
        // Running (1) with trail sub-sport (3) is not in the table
        assert!(matches!(
            classify(&sport_file(1, 3)),
            Err(IngestError::UnsupportedActivityType { .. })
        ));
    }

    #[test]
    fn test_missing_descriptor() {
        let file = DecodedFile::new(vec![DecodedMessage::new("session")]);
        assert!(matches!(classify(&file), Err(IngestError::MissingSportDescriptor)));
    }

    #[test]
    fn test_multiple_descriptors_malformed() {
        let mut file = sport_file(11, 0);
        file.messages.push(file.messages[0].clone());
        assert!(matches!(classify(&file), Err(IngestError::MalformedFile(_))));
    }

    #[test]
    fn test_missing_sub_sport_is_generic() {
        let file =
            DecodedFile::new(vec![DecodedMessage::new("sport").with_raw("sport", "walking", 11)]);
        assert_eq!(classify(&file).unwrap().activity_type, "walk");
    }

    #[test]
    fn test_missing_sport_field_malformed() {
        let file = DecodedFile::new(vec![DecodedMessage::new("sport").with("sub_sport", 0)]);
        assert!(matches!(classify(&file), Err(IngestError::MalformedFile(_))));
    }

    // ==========================================================================
    // ROLE TABLE TESTS
    // ==========================================================================

    #[test]
    fn test_role_lookup() {
        let table = RoleTable::new(&MOVING_SAMPLES);
        assert_eq!(table.role("heart_rate"), FieldRole::Generic);
        assert_eq!(table.role("timestamp"), FieldRole::Time);
        assert_eq!(table.role("position_lat"), FieldRole::Gps);
        assert_eq!(table.role("vendor_blob"), FieldRole::Ignored);

        let monitoring = RoleTable::new(&MONITORING);
        assert_eq!(monitoring.role("timestamp_16"), FieldRole::Time16);
    }

    #[test]
    fn test_heart_rate_profiles_have_no_gps() {
        let profile = IngestionProfile::lookup(SportCode { sport: 10, sub_sport: 43 }).unwrap();
        assert_eq!(profile.samples.role("position_lat"), FieldRole::Ignored);
        assert_eq!(profile.session.role("start_position_lat"), FieldRole::Ignored);
        assert_eq!(profile.samples.role("heart_rate"), FieldRole::Generic);
    }

    #[test]
    fn test_profile_table_has_unique_keys() {
        for (i, a) in PROFILES.iter().enumerate() {
            for b in &PROFILES[i + 1..] {
                assert!(
                    (a.sport, a.sub_sport) != (b.sport, b.sub_sport),
                    "duplicate profile key ({}, {})",
                    a.sport,
                    a.sub_sport
                );
            }
        }
    }

    // ==========================================================================
    // FILE KIND TESTS
    // ==========================================================================

    #[test]
    fn test_file_kind_by_code() {
        let file = DecodedFile::new(vec![
            DecodedMessage::new("file_id").with_raw("type", "monitoring_b", 32)
        ]);
        assert_eq!(FileKind::detect(&file).unwrap(), FileKind::Monitoring);

        let file =
            DecodedFile::new(vec![DecodedMessage::new("file_id").with_raw("type", "activity", 4)]);
        assert_eq!(FileKind::detect(&file).unwrap(), FileKind::Activity);
    }

    #[test]
    fn test_file_kind_by_label() {
        let file = DecodedFile::new(vec![DecodedMessage::new("file_id").with("type", "totals")]);
        assert_eq!(FileKind::detect(&file).unwrap(), FileKind::Totals);
    }

    #[test]
    fn test_unsupported_file_kind() {
        let file =
            DecodedFile::new(vec![DecodedMessage::new("file_id").with_raw("type", "settings", 2)]);
        assert!(matches!(
            FileKind::detect(&file),
            Err(IngestError::UnsupportedFileKind(label)) if label == "settings"
        ));
    }

    #[test]
    fn test_file_kind_without_file_id() {
        let file = DecodedFile::new(vec![DecodedMessage::new("monitoring").with("heart_rate", 60)]);
        assert_eq!(FileKind::detect(&file).unwrap(), FileKind::Monitoring);

        let empty = DecodedFile::default();
        assert!(FileKind::detect(&empty).is_err());
    }
}
