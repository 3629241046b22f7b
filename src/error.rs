//! Error types for ingestion
//!
//! Every variant is fatal to the import attempt that raised it. Nothing is
//! retried here; re-importing is the caller's decision.

use crate::db::DbError;
use crate::ingest::IngestStage;
use thiserror::Error;

/// Errors raised while decoding, classifying or persisting one file
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Cannot read {path}: {reason}")]
    FileUnreadable { path: String, reason: String },

    #[error("File has no sport descriptor message")]
    MissingSportDescriptor,

    #[error("Malformed file: {0}")]
    MalformedFile(String),

    #[error("Unsupported activity type: sport={sport} sub_sport={sub_sport}")]
    UnsupportedActivityType { sport: i64, sub_sport: i64 },

    #[error("Unsupported file kind: {0}")]
    UnsupportedFileKind(String),

    #[error("File has no session record")]
    MissingSessionRecord,

    #[error("'{message}' message #{index} is missing required field '{field}'")]
    MissingField {
        message: String,
        index: usize,
        field: String,
    },

    #[error("Field '{field}' has out-of-range value {value}")]
    InvalidFieldValue { field: String, value: i64 },

    #[error("'{message}' message #{index} has a 16-bit timestamp before any full timestamp")]
    MalformedTimestampSequence { message: String, index: usize },

    #[error("File '{0}' has already been imported")]
    DuplicateFile(String),

    #[error("Storage failure while {stage}: {source}")]
    StorageFailure {
        stage: IngestStage,
        #[source]
        source: DbError,
    },
}

impl IngestError {
    /// Short machine-readable name of the failure class
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::FileUnreadable { .. } => "file_unreadable",
            IngestError::MissingSportDescriptor => "missing_sport_descriptor",
            IngestError::MalformedFile(_) => "malformed_file",
            IngestError::UnsupportedActivityType { .. } => "unsupported_activity_type",
            IngestError::UnsupportedFileKind(_) => "unsupported_file_kind",
            IngestError::MissingSessionRecord => "missing_session_record",
            IngestError::MissingField { .. } => "missing_field",
            IngestError::InvalidFieldValue { .. } => "invalid_field_value",
            IngestError::MalformedTimestampSequence { .. } => "malformed_timestamp_sequence",
            IngestError::DuplicateFile(_) => "duplicate_file",
            IngestError::StorageFailure { .. } => "storage_failure",
        }
    }
}

/// Errors from BEGIN/COMMIT themselves surface through diesel's transaction
/// wrapper, after every stage has run.
impl From<diesel::result::Error> for IngestError {
    fn from(e: diesel::result::Error) -> Self {
        IngestError::StorageFailure {
            stage: IngestStage::Committed,
            source: DbError::Query(e),
        }
    }
}

/// Pool checkout fails before any row is written
impl From<DbError> for IngestError {
    fn from(source: DbError) -> Self {
        IngestError::StorageFailure {
            stage: IngestStage::Validated,
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_pair_in_message() {
        let err = IngestError::UnsupportedActivityType { sport: 2, sub_sport: 7 };
        let msg = err.to_string();
        assert!(msg.contains("sport=2"), "{}", msg);
        assert!(msg.contains("sub_sport=7"), "{}", msg);
        assert_eq!(err.kind(), "unsupported_activity_type");
    }

    #[test]
    fn test_storage_failure_names_stage() {
        let err = IngestError::StorageFailure {
            stage: IngestStage::SessionCreated,
            source: DbError::Connection("gone".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Storage failure while creating session: Connection error: gone"
        );
    }

    #[test]
    fn test_diesel_error_maps_to_commit_stage() {
        let err: IngestError = diesel::result::Error::RollbackTransaction.into();
        assert!(matches!(
            err,
            IngestError::StorageFailure { stage: IngestStage::Committed, .. }
        ));
    }
}
