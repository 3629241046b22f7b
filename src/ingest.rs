//! Transactional import
//!
//! Importing a file has two halves:
//!
//! 1. **Prepare** ([`ImportPlan::prepare`]): detect the file kind, classify,
//!    build the session and every sample series. Pure; nothing is written,
//!    so every decoding or classification error fails here.
//! 2. **Write** ([`write_activity`], [`write_monitor`], [`write_totals`]):
//!    replay the plan against an [`IngestStore`] inside one transaction.
//!
//! ```text
//! Validated -> FileCreated -> SessionCreated -> SamplesAppended -> Committed
//!     \______________\______________\________________\__> Failed (rollback)
//! ```
//!
//! Monitoring files skip `SessionCreated`. A storage error names the stage
//! it happened in.

use crate::db::{Database, DbError};
use crate::decode::{json, MessageSource};
use crate::error::{IngestError, Result};
use crate::profile::{classify, FileKind, IngestionProfile};
use crate::session::{build_session, build_totals, SessionSummary, SportTotals};
use crate::timeseries::{
    build_activity_samples, build_monitor_series, ActivitySample, HeartRateSample, MonitorSeries,
    RestingMetabolicRateSample, StressSample,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Where an import is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IngestStage {
    Validated,
    FileCreated,
    SessionCreated,
    SamplesAppended,
    Committed,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IngestStage::Validated => "validating",
            IngestStage::FileCreated => "creating file",
            IngestStage::SessionCreated => "creating session",
            IngestStage::SamplesAppended => "appending samples",
            IngestStage::Committed => "committing",
        };
        f.write_str(s)
    }
}

/// Row id of a created file header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FileHandle(pub i32);

pub type StoreResult<T> = std::result::Result<T, DbError>;

/// Write side of the repository.
///
/// Every call made during one import runs inside the same transaction, so
/// implementations never commit on their own.
pub trait IngestStore {
    fn file_exists(&mut self, filename: &str) -> StoreResult<bool>;
    fn create_file(
        &mut self,
        filename: &str,
        profile: &IngestionProfile,
        start_time: DateTime<Utc>,
    ) -> StoreResult<FileHandle>;
    fn create_session(&mut self, file: FileHandle, session: &SessionSummary) -> StoreResult<()>;
    fn append_sample(
        &mut self,
        file: FileHandle,
        seq: usize,
        sample: &ActivitySample,
    ) -> StoreResult<()>;

    fn monitor_file_exists(&mut self, filename: &str) -> StoreResult<bool>;
    fn create_monitor_file(&mut self, filename: &str) -> StoreResult<FileHandle>;
    fn append_heart_rate(&mut self, file: FileHandle, sample: &HeartRateSample) -> StoreResult<()>;
    fn append_stress(&mut self, file: FileHandle, sample: &StressSample) -> StoreResult<()>;
    fn append_resting_metabolic_rate(
        &mut self,
        file: FileHandle,
        sample: &RestingMetabolicRateSample,
    ) -> StoreResult<()>;

    fn upsert_totals(&mut self, totals: &SportTotals) -> StoreResult<()>;
}

fn at(stage: IngestStage) -> impl Fn(DbError) -> IngestError {
    move |source| IngestError::StorageFailure { stage, source }
}

/// A failed header insert is a duplicate when the unique index fired
fn creating(filename: &str) -> impl Fn(DbError) -> IngestError + '_ {
    move |source| {
        if source.is_unique_violation() {
            IngestError::DuplicateFile(filename.to_string())
        } else {
            IngestError::StorageFailure {
                stage: IngestStage::FileCreated,
                source,
            }
        }
    }
}

// ============================================================================
// Plans
// ============================================================================

/// A classified activity ready to write
#[derive(Debug, Clone)]
pub struct ActivityPlan {
    pub filename: String,
    pub profile: IngestionProfile,
    pub session: SessionSummary,
    pub samples: Vec<ActivitySample>,
}

impl ActivityPlan {
    pub fn prepare(filename: &str, source: &dyn MessageSource) -> Result<Self> {
        let profile = classify(source)?;
        let session = build_session(source, &profile)?;
        let samples = build_activity_samples(source, &profile)?;
        Ok(Self {
            filename: filename.to_string(),
            profile,
            session,
            samples,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MonitorPlan {
    pub filename: String,
    pub series: MonitorSeries,
}

impl MonitorPlan {
    pub fn prepare(filename: &str, source: &dyn MessageSource) -> Result<Self> {
        Ok(Self {
            filename: filename.to_string(),
            series: build_monitor_series(source)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TotalsPlan {
    pub totals: Vec<SportTotals>,
}

impl TotalsPlan {
    pub fn prepare(source: &dyn MessageSource) -> Result<Self> {
        Ok(Self {
            totals: build_totals(source)?,
        })
    }
}

#[derive(Debug, Clone)]
pub enum ImportPlan {
    Activity(ActivityPlan),
    Monitor(MonitorPlan),
    Totals(TotalsPlan),
}

impl ImportPlan {
    /// Build the plan for one decoded file; `kind` overrides detection
    pub fn prepare(
        filename: &str,
        source: &dyn MessageSource,
        kind: Option<FileKind>,
    ) -> Result<Self> {
        let kind = match kind {
            Some(k) => k,
            None => FileKind::detect(source)?,
        };
        tracing::debug!(
            filename,
            kind = %kind,
            stage = %IngestStage::Validated,
            "Preparing import"
        );

        Ok(match kind {
            FileKind::Activity => ImportPlan::Activity(ActivityPlan::prepare(filename, source)?),
            FileKind::Monitoring => ImportPlan::Monitor(MonitorPlan::prepare(filename, source)?),
            FileKind::Totals => ImportPlan::Totals(TotalsPlan::prepare(source)?),
        })
    }

    pub fn kind(&self) -> FileKind {
        match self {
            ImportPlan::Activity(_) => FileKind::Activity,
            ImportPlan::Monitor(_) => FileKind::Monitoring,
            ImportPlan::Totals(_) => FileKind::Totals,
        }
    }
}

// ============================================================================
// Writers
// ============================================================================

/// Write an activity: header, session, then every sample in source order
pub fn write_activity<S: IngestStore + ?Sized>(
    store: &mut S,
    plan: &ActivityPlan,
) -> Result<FileHandle> {
    if store.file_exists(&plan.filename).map_err(at(IngestStage::Validated))? {
        return Err(IngestError::DuplicateFile(plan.filename.clone()));
    }

    let file = store
        .create_file(&plan.filename, &plan.profile, plan.session.start_time)
        .map_err(creating(&plan.filename))?;
    tracing::debug!(file = file.0, stage = %IngestStage::FileCreated, "Created activity file");

    store
        .create_session(file, &plan.session)
        .map_err(at(IngestStage::SessionCreated))?;
    tracing::debug!(file = file.0, stage = %IngestStage::SessionCreated, "Created session");

    for (seq, sample) in plan.samples.iter().enumerate() {
        store
            .append_sample(file, seq, sample)
            .map_err(at(IngestStage::SamplesAppended))?;
    }
    tracing::debug!(
        file = file.0,
        samples = plan.samples.len(),
        stage = %IngestStage::SamplesAppended,
        "Appended samples"
    );

    Ok(file)
}

/// Write a monitoring file header and its three series
pub fn write_monitor<S: IngestStore + ?Sized>(
    store: &mut S,
    plan: &MonitorPlan,
) -> Result<FileHandle> {
    if store.monitor_file_exists(&plan.filename).map_err(at(IngestStage::Validated))? {
        return Err(IngestError::DuplicateFile(plan.filename.clone()));
    }

    let file = store
        .create_monitor_file(&plan.filename)
        .map_err(creating(&plan.filename))?;

    let append = at(IngestStage::SamplesAppended);
    for sample in &plan.series.heart_rate {
        store.append_heart_rate(file, sample).map_err(&append)?;
    }
    for sample in &plan.series.stress {
        store.append_stress(file, sample).map_err(&append)?;
    }
    for sample in &plan.series.resting_metabolic_rate {
        store.append_resting_metabolic_rate(file, sample).map_err(&append)?;
    }
    tracing::debug!(
        file = file.0,
        heart_rate = plan.series.heart_rate.len(),
        stress = plan.series.stress.len(),
        resting_metabolic_rate = plan.series.resting_metabolic_rate.len(),
        stage = %IngestStage::SamplesAppended,
        "Appended monitoring samples"
    );

    Ok(file)
}

/// Overwrite each sport's lifetime totals
pub fn write_totals<S: IngestStore + ?Sized>(store: &mut S, plan: &TotalsPlan) -> Result<usize> {
    for totals in &plan.totals {
        store
            .upsert_totals(totals)
            .map_err(at(IngestStage::SamplesAppended))?;
    }
    Ok(plan.totals.len())
}

// ============================================================================
// Importer
// ============================================================================

/// What one successful import wrote
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportReport {
    pub filename: String,
    pub kind: FileKind,
    pub file_id: Option<i32>,
    pub activity_type: Option<String>,
    pub rows: usize,
}

/// The stored name of an input file: its name up to the first `.`
pub fn filename_for(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split('.').next())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .ok_or_else(|| IngestError::FileUnreadable {
            path: path.display().to_string(),
            reason: "no usable file name".to_string(),
        })
}

/// Imports decoded files into a [`Database`]
pub struct Importer<'a> {
    db: &'a Database,
}

impl<'a> Importer<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Load a JSON dump from disk and import it
    pub fn import_file(&self, path: &Path, kind: Option<FileKind>) -> Result<ImportReport> {
        let filename = filename_for(path)?;
        let source = json::load(path)?;
        self.import_source(&filename, &source, kind)
    }

    /// Import an already decoded file under `filename`
    pub fn import_source(
        &self,
        filename: &str,
        source: &dyn MessageSource,
        kind: Option<FileKind>,
    ) -> Result<ImportReport> {
        let plan = match ImportPlan::prepare(filename, source, kind) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(filename, error = %e, kind = e.kind(), "Rejected before writing");
                return Err(e);
            }
        };

        let kind = plan.kind();
        let report: Result<ImportReport> = self.db.transaction(|store| match &plan {
            ImportPlan::Activity(p) => {
                let file = write_activity(store, p)?;
                Ok(ImportReport {
                    filename: p.filename.clone(),
                    kind,
                    file_id: Some(file.0),
                    activity_type: Some(p.profile.activity_type.to_string()),
                    rows: p.samples.len(),
                })
            }
            ImportPlan::Monitor(p) => {
                let file = write_monitor(store, p)?;
                Ok(ImportReport {
                    filename: p.filename.clone(),
                    kind,
                    file_id: Some(file.0),
                    activity_type: None,
                    rows: p.series.len(),
                })
            }
            ImportPlan::Totals(p) => {
                let rows = write_totals(store, p)?;
                Ok(ImportReport {
                    filename: filename.to_string(),
                    kind,
                    file_id: None,
                    activity_type: None,
                    rows,
                })
            }
        });

        match &report {
            Ok(r) => tracing::info!(
                filename = %r.filename,
                kind = %r.kind,
                rows = r.rows,
                stage = %IngestStage::Committed,
                "Imported"
            ),
            Err(e) => tracing::warn!(filename, error = %e, kind = e.kind(), "Import rolled back"),
        }
        report
    }
}
