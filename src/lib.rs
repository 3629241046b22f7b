//! Localfit - Keep your fitness-tracker data in a local database
//!
//! Localfit imports decoded FIT files (activity recordings, all-day
//! monitoring logs and lifetime totals) into SQLite, so they can be listed,
//! charted and queried without a vendor cloud account.
//!
//! # Overview
//!
//! A FIT file is a stream of tagged messages. Localfit reads that stream as
//! a JSON dump (see [`decode::json`]) and, depending on what kind of file it
//! is, stores:
//!
//! - **Activities**: the session summary plus every per-second sample
//! - **Monitoring**: heart rate, stress and resting metabolic rate series
//! - **Totals**: lifetime distance, time and calories per sport
//!
//! VO2 max, weight, height and age, which no device records, can be entered by
//! hand (see [`Database::add_manual_stats`]).
//!
//! # Quick Start
//!
//! ```no_run
//! use localfit::{Database, Importer};
//! use std::path::Path;
//!
//! let db = Database::open_at("localfit.db").unwrap();
//! let report = Importer::new(&db)
//!     .import_file(Path::new("2019-05-04-walk.json"), None)
//!     .unwrap();
//!
//! println!("{} ({}): {} samples", report.filename, report.kind, report.rows);
//! ```
//!
//! # Supported Activities
//!
//! Only these (sport, sub_sport) pairs are imported:
//!
//! | Code | Activity | Category |
//! |------|----------|----------|
//! | (1, 0) | run | recorded |
//! | (1, 1) | treadmill | recorded |
//! | (4, 15) | elliptical | recorded |
//! | (4, 16) | stair_climbing | recorded |
//! | (10, 26) | cardio | recorded |
//! | (10, 43) | yoga | recorded |
//! | (11, 0) | walk | recorded |
//!
//! Anything else is rejected before a row is written.
//!
//! # Guarantees
//!
//! An import either commits everything it read or nothing at all. Importing
//! the same file twice fails with [`IngestError::DuplicateFile`].
//!
//! # Modules
//!
//! - [`decode`]: The tagged message stream and its JSON dump format
//! - [`profile`]: Activity classification and per-field roles
//! - [`extract`]: Field extraction with timestamp and coordinate conversion
//! - [`session`] / [`timeseries`]: Summary and sample records
//! - [`ingest`]: Transactional import
//! - [`db`]: SQLite storage and queries
//! - [`report`]: List, detail, chart and totals views

pub mod config;
pub mod convert;
pub mod db;
pub mod decode;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod profile;
pub mod report;
pub mod schema;
pub mod session;
pub mod timeseries;

pub use config::Config;
pub use db::{Database, DbError};
pub use decode::{DecodedFile, DecodedMessage, MessageSource};
pub use error::IngestError;
pub use ingest::{ImportReport, Importer};
pub use profile::{FileKind, IngestionProfile, SportCode};

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // PUBLIC API TESTS
    // ==========================================================================
    //
    // These tests verify the public API surface is reachable from the root.
    // ==========================================================================

    #[test]
    fn test_public_exports() {
        let db = Database::open_in_memory().unwrap();
        let _importer = Importer::new(&db);
        let _ = Config::default();
        let _ = DecodedFile::default();
    }

    #[test]
    fn test_profile_lookup_from_root() {
        let profile = IngestionProfile::lookup(SportCode { sport: 11, sub_sport: 0 }).unwrap();
        assert_eq!(profile.activity_type, "walk");
        assert!(IngestionProfile::lookup(SportCode { sport: 2, sub_sport: 7 }).is_none());
    }

    #[test]
    fn test_import_through_root_types() {
        let db = Database::open_in_memory().unwrap();
        let file = DecodedFile::new(vec![
            DecodedMessage::new("sport")
                .with_raw("sport", "walking", 11)
                .with_raw("sub_sport", "generic", 0),
            DecodedMessage::new("session").with("start_time", 925_913_000u32),
        ]);

        let report = Importer::new(&db)
            .import_source("walk", &file, Some(FileKind::Activity))
            .unwrap();
        assert_eq!(report.kind, FileKind::Activity);
        assert_eq!(report.rows, 0);

        let again = Importer::new(&db).import_source("walk", &file, Some(FileKind::Activity));
        assert!(matches!(again, Err(IngestError::DuplicateFile(_))));
    }
}
