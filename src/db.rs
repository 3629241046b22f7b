//! SQLite database with Diesel ORM
//!
//! Stores imported activity files, their sessions and samples, monitoring
//! series and per-sport lifetime totals. Tables are created on open.
//!
//! Writes go through [`Database::transaction`], which hands an
//! [`SqliteStore`] to the import writers. Everything else here is the read
//! side used by the reports, plus the two user edits.

use crate::config::Config;
use crate::ingest::{FileHandle, IngestStore, StoreResult};
use crate::profile::IngestionProfile;
use crate::schema::*;
use crate::session::{SessionSummary, SportTotals};
use crate::timeseries::{ActivitySample, HeartRateSample, RestingMetabolicRateSample, StressSample};
use chrono::{DateTime, SecondsFormat, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::result::DatabaseErrorKind;
use diesel::sqlite::SqliteConnection;
use std::path::Path;
use std::time::Duration;

const IN_MEMORY: &str = ":memory:";

// ============================================================================
// Diesel Models
// ============================================================================

#[derive(Insertable)]
#[diesel(table_name = activity_files)]
pub struct NewActivityFile<'a> {
    pub filename: &'a str,
    pub activity_type: &'a str,
    pub activity_category: &'a str,
    pub start_time_utc: &'a str,
    pub imported_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = activity_files)]
pub struct ActivityFile {
    pub id: i32,
    pub filename: String,
    pub activity_type: String,
    pub activity_category: String,
    pub start_time_utc: String,
    pub start_location: Option<String>,
    pub secondary_file_id: Option<i32>,
    pub imported_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession<'a> {
    pub file_id: i32,
    pub start_time_utc: &'a str,
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
    pub start_position_lat_sem: Option<i32>,
    pub start_position_long_sem: Option<i32>,
    pub start_position_lat_deg: Option<f64>,
    pub start_position_long_deg: Option<f64>,
}

#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = sessions)]
pub struct SessionRow {
    pub id: i32,
    pub file_id: i32,
    pub start_time_utc: String,
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
    pub start_position_lat_sem: Option<i32>,
    pub start_position_long_sem: Option<i32>,
    pub start_position_lat_deg: Option<f64>,
    pub start_position_long_deg: Option<f64>,
}

#[derive(Insertable)]
#[diesel(table_name = activity_samples)]
pub struct NewActivitySample<'a> {
    pub file_id: i32,
    pub seq: i32,
    pub timestamp_utc: &'a str,
    pub position_lat_sem: Option<i32>,
    pub position_long_sem: Option<i32>,
    pub position_lat_deg: Option<f64>,
    pub position_long_deg: Option<f64>,
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

#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = activity_samples)]
pub struct ActivitySampleRow {
    pub id: i32,
    pub file_id: i32,
    pub seq: i32,
    pub timestamp_utc: String,
    pub position_lat_sem: Option<i32>,
    pub position_long_sem: Option<i32>,
    pub position_lat_deg: Option<f64>,
    pub position_long_deg: Option<f64>,
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

#[derive(Insertable)]
#[diesel(table_name = monitor_files)]
pub struct NewMonitorFile<'a> {
    pub filename: &'a str,
    pub imported_at: &'a str,
}

#[derive(Insertable)]
#[diesel(table_name = heart_rate_samples)]
pub struct NewHeartRateSample<'a> {
    pub file_id: i32,
    pub timestamp_utc: &'a str,
    pub heart_rate: i64,
}

#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = heart_rate_samples)]
pub struct HeartRateRow {
    pub id: i32,
    pub file_id: i32,
    pub timestamp_utc: String,
    pub heart_rate: i64,
}

#[derive(Insertable)]
#[diesel(table_name = stress_samples)]
pub struct NewStressSample<'a> {
    pub file_id: i32,
    pub stress_level_time_utc: &'a str,
    pub stress_level_value: Option<i64>,
}

#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = stress_samples)]
pub struct StressRow {
    pub id: i32,
    pub file_id: i32,
    pub stress_level_time_utc: String,
    pub stress_level_value: Option<i64>,
}

#[derive(Insertable)]
#[diesel(table_name = resting_metabolic_rate_samples)]
pub struct NewRestingMetabolicRateSample<'a> {
    pub file_id: i32,
    pub timestamp_utc: &'a str,
    pub resting_metabolic_rate: Option<i64>,
}

#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = resting_metabolic_rate_samples)]
pub struct RestingMetabolicRateRow {
    pub id: i32,
    pub file_id: i32,
    pub timestamp_utc: String,
    pub resting_metabolic_rate: Option<i64>,
}

/// Absent values leave the stored column as it was
#[derive(Insertable, AsChangeset)]
#[diesel(table_name = sport_totals)]
pub struct NewSportTotals<'a> {
    pub sport: &'a str,
    pub distance: Option<f64>,
    pub calories: Option<i64>,
    pub timer_time: Option<f64>,
    pub updated_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = sport_totals)]
pub struct SportTotalsRow {
    pub id: i32,
    pub sport: String,
    pub distance: Option<f64>,
    pub calories: Option<i64>,
    pub timer_time: Option<f64>,
    pub updated_at: String,
}

/// Body measurements the devices don't record
#[derive(Insertable, Debug, Clone, Default)]
#[diesel(table_name = manual_stats)]
pub struct NewManualStats<'a> {
    pub recorded_at: &'a str,
    pub vo2_max: Option<f64>,
    pub weight_lbs: Option<f64>,
    pub height_inches: Option<i32>,
    pub age: Option<i32>,
}

impl NewManualStats<'_> {
    pub fn is_empty(&self) -> bool {
        self.vo2_max.is_none()
            && self.weight_lbs.is_none()
            && self.height_inches.is_none()
            && self.age.is_none()
    }
}

#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = manual_stats)]
pub struct ManualStatsRow {
    pub id: i32,
    pub recorded_at: String,
    pub vo2_max: Option<f64>,
    pub weight_lbs: Option<f64>,
    pub height_inches: Option<i32>,
    pub age: Option<i32>,
}

/// User edits to an activity's classification; `None` leaves a field alone
#[derive(AsChangeset, Debug, Clone, Default)]
#[diesel(table_name = activity_files)]
pub struct ClassificationUpdate<'a> {
    pub activity_type: Option<&'a str>,
    pub activity_category: Option<&'a str>,
    pub start_location: Option<&'a str>,
}

impl ClassificationUpdate<'_> {
    pub fn is_empty(&self) -> bool {
        self.activity_type.is_none()
            && self.activity_category.is_none()
            && self.start_location.is_none()
    }
}

// ============================================================================
// Database Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Database connection wrapper with connection pool
pub struct Database {
    pool: DbPool,
}

/// Error type for database operations
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Invalid(String),
}

impl DbError {
    /// Whether a UNIQUE constraint rejected the write
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            DbError::Query(diesel::result::Error::DatabaseError(
                DatabaseErrorKind::UniqueViolation,
                _
            ))
        )
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Per-connection pragmas, applied whenever the pool opens a connection
#[derive(Debug, Clone, Copy)]
struct ConnectionOptions {
    busy_timeout_ms: u32,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(
        &self,
        conn: &mut SqliteConnection,
    ) -> std::result::Result<(), diesel::r2d2::Error> {
        diesel::sql_query(format!("PRAGMA busy_timeout = {}", self.busy_timeout_ms))
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;
        diesel::sql_query("PRAGMA foreign_keys = ON")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;
        Ok(())
    }
}

/// Table sizes, for tests and the backup summary
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct RowCounts {
    pub activity_files: i64,
    pub sessions: i64,
    pub activity_samples: i64,
    pub monitor_files: i64,
    pub heart_rate_samples: i64,
    pub stress_samples: i64,
    pub resting_metabolic_rate_samples: i64,
    pub sport_totals: i64,
}

impl RowCounts {
    pub fn total(&self) -> i64 {
        self.activity_files
            + self.sessions
            + self.activity_samples
            + self.monitor_files
            + self.heart_rate_samples
            + self.stress_samples
            + self.resting_metabolic_rate_samples
            + self.sport_totals
    }
}

/// Stored form of a timestamp: RFC 3339, UTC, whole seconds
pub fn to_db_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn from_db_time(stored: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(stored)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

impl Database {
    /// Open the database described by `config`
    pub fn open_with(config: &Config) -> Result<Self> {
        let path_str = config.db_path.to_string_lossy().to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(&path_str);
        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_customizer(Box::new(ConnectionOptions {
                busy_timeout_ms: config.busy_timeout_ms,
            }))
            .build(manager)
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.init_schema()?;
        tracing::debug!(path = %path_str, pool_size = config.pool_size, "Opened database");
        Ok(db)
    }

    /// Open database at specified path with default pool settings
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(&Config {
            db_path: path.as_ref().to_path_buf(),
            ..Config::default()
        })
    }

    /// A private in-memory database.
    ///
    /// Every SQLite connection to `:memory:` is its own database, so the pool
    /// holds exactly one connection and never recycles it.
    pub fn open_in_memory() -> Result<Self> {
        let manager = ConnectionManager::<SqliteConnection>::new(IN_MEMORY);
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_timeout(Duration::from_secs(5))
            .connection_customizer(Box::new(ConnectionOptions { busy_timeout_ms: 0 }))
            .build(manager)
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    fn get_conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.get_conn()?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS activity_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                filename TEXT NOT NULL UNIQUE,
                activity_type TEXT NOT NULL,
                activity_category TEXT NOT NULL,
                start_time_utc TEXT NOT NULL,
                start_location TEXT,
                secondary_file_id INTEGER REFERENCES activity_files(id) ON DELETE SET NULL,
                imported_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                file_id INTEGER NOT NULL UNIQUE REFERENCES activity_files(id) ON DELETE CASCADE,
                start_time_utc TEXT NOT NULL,
                total_elapsed_time REAL,
                total_timer_time REAL,
                total_distance REAL,
                total_strides INTEGER,
                total_cycles INTEGER,
                total_calories INTEGER,
                enhanced_avg_speed REAL,
                avg_speed REAL,
                enhanced_max_speed REAL,
                max_speed REAL,
                avg_power INTEGER,
                max_power INTEGER,
                total_ascent INTEGER,
                total_descent INTEGER,
                avg_heart_rate INTEGER,
                max_heart_rate INTEGER,
                start_position_lat_sem INTEGER,
                start_position_long_sem INTEGER,
                start_position_lat_deg REAL,
                start_position_long_deg REAL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS activity_samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                file_id INTEGER NOT NULL REFERENCES activity_files(id) ON DELETE CASCADE,
                seq INTEGER NOT NULL,
                timestamp_utc TEXT NOT NULL,
                position_lat_sem INTEGER,
                position_long_sem INTEGER,
                position_lat_deg REAL,
                position_long_deg REAL,
                distance REAL,
                altitude REAL,
                speed REAL,
                heart_rate INTEGER,
                cadence INTEGER,
                fractional_cadence REAL,
                enhanced_altitude REAL,
                enhanced_speed REAL,
                power INTEGER,
                UNIQUE (file_id, seq)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS monitor_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                filename TEXT NOT NULL UNIQUE,
                imported_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS heart_rate_samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                file_id INTEGER NOT NULL REFERENCES monitor_files(id) ON DELETE CASCADE,
                timestamp_utc TEXT NOT NULL,
                heart_rate INTEGER NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS stress_samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                file_id INTEGER NOT NULL REFERENCES monitor_files(id) ON DELETE CASCADE,
                stress_level_time_utc TEXT NOT NULL,
                stress_level_value INTEGER
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS resting_metabolic_rate_samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                file_id INTEGER NOT NULL REFERENCES monitor_files(id) ON DELETE CASCADE,
                timestamp_utc TEXT NOT NULL,
                resting_metabolic_rate INTEGER
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS sport_totals (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                sport TEXT NOT NULL UNIQUE,
                distance REAL,
                calories INTEGER,
                timer_time REAL,
                updated_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS manual_stats (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                recorded_at TEXT NOT NULL,
                vo2_max REAL,
                weight_lbs REAL,
                height_inches INTEGER,
                age INTEGER
            )
        "#).execute(&mut conn)?;

        // Create indexes
        for index in [
            "CREATE INDEX IF NOT EXISTS idx_activity_start ON activity_files(start_time_utc)",
            "CREATE INDEX IF NOT EXISTS idx_samples_file ON activity_samples(file_id, seq)",
            "CREATE INDEX IF NOT EXISTS idx_heart_rate_time ON heart_rate_samples(timestamp_utc)",
            "CREATE INDEX IF NOT EXISTS idx_stress_time ON stress_samples(stress_level_time_utc)",
            "CREATE INDEX IF NOT EXISTS idx_rmr_time \
             ON resting_metabolic_rate_samples(timestamp_utc)",
        ] {
            diesel::sql_query(index).execute(&mut conn)?;
        }

        Ok(())
    }

    /// Run `f` inside one `BEGIN IMMEDIATE` transaction.
    ///
    /// The write lock is taken up front, so a filename check made inside `f`
    /// cannot be invalidated by a concurrent importer before the insert. Any
    /// `Err` from `f` rolls everything back.
    pub fn transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut SqliteStore<'_>) -> std::result::Result<T, E>,
        E: From<diesel::result::Error> + From<DbError>,
    {
        let mut conn = self.get_conn()?;
        conn.immediate_transaction(|conn| f(&mut SqliteStore { conn }))
    }

    // ========================================================================
    // Activities
    // ========================================================================

    /// Every activity with its session, newest first
    pub fn list_activities(&self) -> Result<Vec<(ActivityFile, SessionRow)>> {
        let mut conn = self.get_conn()?;
        let rows = activity_files::table
            .inner_join(sessions::table)
            .select((ActivityFile::as_select(), SessionRow::as_select()))
            .order(activity_files::start_time_utc.desc())
            .load::<(ActivityFile, SessionRow)>(&mut conn)?;
        Ok(rows)
    }

    pub fn find_activity(&self, filename: &str) -> Result<Option<ActivityFile>> {
        let mut conn = self.get_conn()?;
        let file = activity_files::table
            .filter(activity_files::filename.eq(filename))
            .select(ActivityFile::as_select())
            .first::<ActivityFile>(&mut conn)
            .optional()?;
        Ok(file)
    }

    /// One activity and its session, looked up by filename
    pub fn activity_detail(&self, filename: &str) -> Result<Option<(ActivityFile, SessionRow)>> {
        let mut conn = self.get_conn()?;
        let row = activity_files::table
            .inner_join(sessions::table)
            .filter(activity_files::filename.eq(filename))
            .select((ActivityFile::as_select(), SessionRow::as_select()))
            .first::<(ActivityFile, SessionRow)>(&mut conn)
            .optional()?;
        Ok(row)
    }

    /// Samples of one activity in source order
    pub fn activity_samples(&self, file_id: i32) -> Result<Vec<ActivitySampleRow>> {
        let mut conn = self.get_conn()?;
        let rows = activity_samples::table
            .filter(activity_samples::file_id.eq(file_id))
            .order(activity_samples::seq.asc())
            .select(ActivitySampleRow::as_select())
            .load::<ActivitySampleRow>(&mut conn)?;
        Ok(rows)
    }

    // ========================================================================
    // Monitoring
    // ========================================================================

    pub fn heart_rate_between(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<HeartRateRow>> {
        let mut conn = self.get_conn()?;
        let mut query = heart_rate_samples::table
            .select(HeartRateRow::as_select())
            .into_boxed();
        if let Some(from) = from {
            query = query.filter(heart_rate_samples::timestamp_utc.ge(to_db_time(&from)));
        }
        if let Some(to) = to {
            query = query.filter(heart_rate_samples::timestamp_utc.lt(to_db_time(&to)));
        }
        let rows = query
            .order((heart_rate_samples::timestamp_utc.asc(), heart_rate_samples::id.asc()))
            .load::<HeartRateRow>(&mut conn)?;
        Ok(rows)
    }

    pub fn stress_between(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<StressRow>> {
        let mut conn = self.get_conn()?;
        let mut query = stress_samples::table
            .select(StressRow::as_select())
            .into_boxed();
        if let Some(from) = from {
            query = query.filter(stress_samples::stress_level_time_utc.ge(to_db_time(&from)));
        }
        if let Some(to) = to {
            query = query.filter(stress_samples::stress_level_time_utc.lt(to_db_time(&to)));
        }
        let rows = query
            .order((stress_samples::stress_level_time_utc.asc(), stress_samples::id.asc()))
            .load::<StressRow>(&mut conn)?;
        Ok(rows)
    }

    pub fn resting_metabolic_rate_between(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<RestingMetabolicRateRow>> {
        let mut conn = self.get_conn()?;
        let mut query = resting_metabolic_rate_samples::table
            .select(RestingMetabolicRateRow::as_select())
            .into_boxed();
        if let Some(from) = from {
            query =
                query.filter(resting_metabolic_rate_samples::timestamp_utc.ge(to_db_time(&from)));
        }
        if let Some(to) = to {
            query = query.filter(resting_metabolic_rate_samples::timestamp_utc.lt(to_db_time(&to)));
        }
        let rows = query
            .order((
                resting_metabolic_rate_samples::timestamp_utc.asc(),
                resting_metabolic_rate_samples::id.asc(),
            ))
            .load::<RestingMetabolicRateRow>(&mut conn)?;
        Ok(rows)
    }

    // ========================================================================
    // Totals
    // ========================================================================

    pub fn list_totals(&self) -> Result<Vec<SportTotalsRow>> {
        let mut conn = self.get_conn()?;
        let rows = sport_totals::table
            .order(sport_totals::sport.asc())
            .select(SportTotalsRow::as_select())
            .load::<SportTotalsRow>(&mut conn)?;
        Ok(rows)
    }

    // ========================================================================
    // Manual stats
    // ========================================================================

    /// Store a new set of measurements. At least one value must be present.
    pub fn add_manual_stats(&self, stats: &NewManualStats<'_>) -> Result<()> {
        if stats.is_empty() {
            return Err(DbError::Invalid("no measurements given".to_string()));
        }
        if from_db_time(stats.recorded_at).is_none() {
            return Err(DbError::Invalid(format!("bad timestamp '{}'", stats.recorded_at)));
        }
        let mut conn = self.get_conn()?;
        diesel::insert_into(manual_stats::table)
            .values(stats)
            .execute(&mut conn)?;
        Ok(())
    }

    /// Every stored set of measurements, newest first
    pub fn list_manual_stats(&self) -> Result<Vec<ManualStatsRow>> {
        let mut conn = self.get_conn()?;
        let rows = manual_stats::table
            .order((manual_stats::recorded_at.desc(), manual_stats::id.desc()))
            .select(ManualStatsRow::as_select())
            .load::<ManualStatsRow>(&mut conn)?;
        Ok(rows)
    }

    // ========================================================================
    // Edits
    // ========================================================================

    /// Change the user-editable classification of an activity.
    ///
    /// Returns `false` if no activity has that filename.
    pub fn update_classification(
        &self,
        filename: &str,
        update: &ClassificationUpdate<'_>,
    ) -> Result<bool> {
        let mut conn = self.get_conn()?;
        if update.is_empty() {
            let exists = activity_files::table
                .filter(activity_files::filename.eq(filename))
                .count()
                .get_result::<i64>(&mut conn)?;
            return Ok(exists > 0);
        }

        let target = activity_files::table.filter(activity_files::filename.eq(filename));
        let updated = diesel::update(target)
            .set(update)
            .execute(&mut conn)?;
        Ok(updated > 0)
    }

    /// Record that `secondary` is a second recording of the same activity as `primary`
    pub fn link_secondary(&self, primary: &str, secondary: &str) -> Result<()> {
        if primary == secondary {
            return Err(DbError::Invalid(format!("cannot link '{}' to itself", primary)));
        }
        let mut conn = self.get_conn()?;

        let secondary_id = activity_files::table
            .filter(activity_files::filename.eq(secondary))
            .select(activity_files::id)
            .first::<i32>(&mut conn)
            .optional()?
            .ok_or_else(|| DbError::NotFound(format!("activity '{}'", secondary)))?;

        let target = activity_files::table.filter(activity_files::filename.eq(primary));
        let updated = diesel::update(target)
            .set(activity_files::secondary_file_id.eq(Some(secondary_id)))
            .execute(&mut conn)?;
        if updated == 0 {
            return Err(DbError::NotFound(format!("activity '{}'", primary)));
        }
        Ok(())
    }

    // ========================================================================
    // Summary
    // ========================================================================

    pub fn row_counts(&self) -> Result<RowCounts> {
        let mut conn = self.get_conn()?;
        Ok(RowCounts {
            activity_files: activity_files::table.count().get_result(&mut conn)?,
            sessions: sessions::table.count().get_result(&mut conn)?,
            activity_samples: activity_samples::table.count().get_result(&mut conn)?,
            monitor_files: monitor_files::table.count().get_result(&mut conn)?,
            heart_rate_samples: heart_rate_samples::table.count().get_result(&mut conn)?,
            stress_samples: stress_samples::table.count().get_result(&mut conn)?,
            resting_metabolic_rate_samples: resting_metabolic_rate_samples::table
                .count()
                .get_result(&mut conn)?,
            sport_totals: sport_totals::table.count().get_result(&mut conn)?,
        })
    }
}

// ============================================================================
// Transactional store
// ============================================================================

/// [`IngestStore`] over a connection that is already inside a transaction
pub struct SqliteStore<'a> {
    conn: &'a mut SqliteConnection,
}

impl SqliteStore<'_> {
    fn last_insert_id(&mut self) -> StoreResult<FileHandle> {
        let id: i32 =
            diesel::select(diesel::dsl::sql::<diesel::sql_types::Integer>("last_insert_rowid()"))
                .first(self.conn)?;
        Ok(FileHandle(id))
    }
}

impl IngestStore for SqliteStore<'_> {
    fn file_exists(&mut self, filename: &str) -> StoreResult<bool> {
        let count: i64 = activity_files::table
            .filter(activity_files::filename.eq(filename))
            .count()
            .get_result(self.conn)?;
        Ok(count > 0)
    }

    fn create_file(
        &mut self,
        filename: &str,
        profile: &IngestionProfile,
        start_time: DateTime<Utc>,
    ) -> StoreResult<FileHandle> {
        let start = to_db_time(&start_time);
        let now = to_db_time(&Utc::now());
        diesel::insert_into(activity_files::table)
            .values(&NewActivityFile {
                filename,
                activity_type: profile.activity_type,
                activity_category: profile.category,
                start_time_utc: &start,
                imported_at: &now,
            })
            .execute(self.conn)?;
        self.last_insert_id()
    }

    fn create_session(&mut self, file: FileHandle, session: &SessionSummary) -> StoreResult<()> {
        let start = to_db_time(&session.start_time);
        let pos = session.start_position;
        diesel::insert_into(sessions::table)
            .values(&NewSession {
                file_id: file.0,
                start_time_utc: &start,
                total_elapsed_time: session.total_elapsed_time,
                total_timer_time: session.total_timer_time,
                total_distance: session.total_distance,
                total_strides: session.total_strides,
                total_cycles: session.total_cycles,
                total_calories: session.total_calories,
                enhanced_avg_speed: session.enhanced_avg_speed,
                avg_speed: session.avg_speed,
                enhanced_max_speed: session.enhanced_max_speed,
                max_speed: session.max_speed,
                avg_power: session.avg_power,
                max_power: session.max_power,
                total_ascent: session.total_ascent,
                total_descent: session.total_descent,
                avg_heart_rate: session.avg_heart_rate,
                max_heart_rate: session.max_heart_rate,
                start_position_lat_sem: pos.map(|p| p.lat_semicircles),
                start_position_long_sem: pos.map(|p| p.long_semicircles),
                start_position_lat_deg: pos.map(|p| p.lat_degrees),
                start_position_long_deg: pos.map(|p| p.long_degrees),
            })
            .execute(self.conn)?;
        Ok(())
    }

    fn append_sample(
        &mut self,
        file: FileHandle,
        seq: usize,
        sample: &ActivitySample,
    ) -> StoreResult<()> {
        let at = to_db_time(&sample.timestamp);
        let pos = sample.position;
        diesel::insert_into(activity_samples::table)
            .values(&NewActivitySample {
                file_id: file.0,
                seq: i32::try_from(seq).unwrap_or(i32::MAX),
                timestamp_utc: &at,
                position_lat_sem: pos.map(|p| p.lat_semicircles),
                position_long_sem: pos.map(|p| p.long_semicircles),
                position_lat_deg: pos.map(|p| p.lat_degrees),
                position_long_deg: pos.map(|p| p.long_degrees),
                distance: sample.distance,
                altitude: sample.altitude,
                speed: sample.speed,
                heart_rate: sample.heart_rate,
                cadence: sample.cadence,
                fractional_cadence: sample.fractional_cadence,
                enhanced_altitude: sample.enhanced_altitude,
                enhanced_speed: sample.enhanced_speed,
                power: sample.power,
            })
            .execute(self.conn)?;
        Ok(())
    }

    fn monitor_file_exists(&mut self, filename: &str) -> StoreResult<bool> {
        let count: i64 = monitor_files::table
            .filter(monitor_files::filename.eq(filename))
            .count()
            .get_result(self.conn)?;
        Ok(count > 0)
    }

    fn create_monitor_file(&mut self, filename: &str) -> StoreResult<FileHandle> {
        let now = to_db_time(&Utc::now());
        diesel::insert_into(monitor_files::table)
            .values(&NewMonitorFile {
                filename,
                imported_at: &now,
            })
            .execute(self.conn)?;
        self.last_insert_id()
    }

    fn append_heart_rate(&mut self, file: FileHandle, sample: &HeartRateSample) -> StoreResult<()> {
        let at = to_db_time(&sample.timestamp);
        diesel::insert_into(heart_rate_samples::table)
            .values(&NewHeartRateSample {
                file_id: file.0,
                timestamp_utc: &at,
                heart_rate: sample.heart_rate,
            })
            .execute(self.conn)?;
        Ok(())
    }

    fn append_stress(&mut self, file: FileHandle, sample: &StressSample) -> StoreResult<()> {
        let at = to_db_time(&sample.timestamp);
        diesel::insert_into(stress_samples::table)
            .values(&NewStressSample {
                file_id: file.0,
                stress_level_time_utc: &at,
                stress_level_value: sample.stress_level,
            })
            .execute(self.conn)?;
        Ok(())
    }

    fn append_resting_metabolic_rate(
        &mut self,
        file: FileHandle,
        sample: &RestingMetabolicRateSample,
    ) -> StoreResult<()> {
        let at = to_db_time(&sample.timestamp);
        diesel::insert_into(resting_metabolic_rate_samples::table)
            .values(&NewRestingMetabolicRateSample {
                file_id: file.0,
                timestamp_utc: &at,
                resting_metabolic_rate: sample.resting_metabolic_rate,
            })
            .execute(self.conn)?;
        Ok(())
    }

    fn upsert_totals(&mut self, totals: &SportTotals) -> StoreResult<()> {
        let now = to_db_time(&Utc::now());
        let row = NewSportTotals {
            sport: &totals.sport,
            distance: totals.distance,
            calories: totals.calories,
            timer_time: totals.timer_time,
            updated_at: &now,
        };
        diesel::insert_into(sport_totals::table)
            .values(&row)
            .on_conflict(sport_totals::sport)
            .do_update()
            .set(&row)
            .execute(self.conn)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Position;
    use crate::profile::SportCode;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_556_978_600 + secs, 0).unwrap()
    }

    fn walk() -> IngestionProfile {
        IngestionProfile::lookup(SportCode { sport: 11, sub_sport: 0 }).unwrap()
    }

    fn summary() -> SessionSummary {
        SessionSummary {
            start_time: at(0),
            start_position: Some(Position {
                lat_semicircles: 493_499_921,
                long_semicircles: -1_046_016_545,
                lat_degrees: 41.364686,
                long_degrees: -87.675,
            }),
            total_elapsed_time: Some(1830.5),
            total_timer_time: Some(1800.0),
            total_distance: Some(3120.4),
            total_strides: None,
            total_cycles: None,
            total_calories: Some(210),
            enhanced_avg_speed: None,
            avg_speed: None,
            enhanced_max_speed: None,
            max_speed: None,
            avg_power: None,
            max_power: None,
            total_ascent: None,
            total_descent: None,
            avg_heart_rate: Some(118),
            max_heart_rate: Some(141),
        }
    }

    fn insert_activity(db: &Database, filename: &str) -> FileHandle {
        db.transaction::<_, DbError, _>(|store| {
            let file = store.create_file(filename, &walk(), at(0))?;
            store.create_session(file, &summary())?;
            Ok(file)
        })
        .unwrap()
    }

    // ==========================================================================
    // TIME STORAGE TESTS
    // ==========================================================================

    #[test]
    fn test_db_time_round_trip() {
        let t = at(0);
        let stored = to_db_time(&t);
        assert_eq!(stored, "2019-05-04T14:03:20Z");
        assert_eq!(from_db_time(&stored), Some(t));
        assert_eq!(from_db_time("yesterday"), None);
    }

    #[test]
    fn test_db_time_sorts_lexically() {
        assert!(to_db_time(&at(59)) < to_db_time(&at(60)));
        assert!(to_db_time(&at(86_399)) < to_db_time(&at(86_400)));
    }

    // ==========================================================================
    // STORE TESTS
    // ==========================================================================

    #[test]
    fn test_create_and_read_back() {
        let db = Database::open_in_memory().unwrap();
        let file = insert_activity(&db, "walk");

        let rows = db.list_activities().unwrap();
        assert_eq!(rows.len(), 1);
        let (activity, session) = &rows[0];
        assert_eq!(activity.id, file.0);
        assert_eq!(activity.start_time_utc, "2019-05-04T14:03:20Z");
        assert_eq!(session.file_id, file.0);
        assert_eq!(session.start_position_lat_sem, Some(493_499_921));
        assert_eq!(session.start_position_lat_deg, Some(41.364686));
        assert_eq!(session.total_strides, None);
    }

    #[test]
    fn test_unique_violation_detected() {
        let db = Database::open_in_memory().unwrap();
        insert_activity(&db, "walk");
        let err = db
            .transaction::<_, DbError, _>(|store| store.create_file("walk", &walk(), at(0)))
            .unwrap_err();
        assert!(err.is_unique_violation(), "{}", err);
    }

    #[test]
    fn test_rollback_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result = db.transaction::<(), DbError, _>(|store| {
            store.create_file("walk", &walk(), at(0))?;
            Err(DbError::Connection("boom".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(db.row_counts().unwrap().total(), 0);
    }

    #[test]
    fn test_samples_ordered_by_seq() {
        let db = Database::open_in_memory().unwrap();
        let file = insert_activity(&db, "walk");
        db.transaction::<_, DbError, _>(|store| {
            for (seq, offset) in [(0usize, 10i64), (1, 5), (2, 20)] {
                let sample = ActivitySample {
                    timestamp: at(offset),
                    position: None,
                    distance: None,
                    altitude: None,
                    speed: None,
                    heart_rate: Some(90),
                    cadence: None,
                    fractional_cadence: None,
                    enhanced_altitude: None,
                    enhanced_speed: None,
                    power: None,
                };
                store.append_sample(file, seq, &sample)?;
            }
            Ok(())
        })
        .unwrap();

        let rows = db.activity_samples(file.0).unwrap();
        assert_eq!(rows.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(rows[1].timestamp_utc, to_db_time(&at(5)));
    }

    #[test]
    fn test_heart_rate_range_filter() {
        let db = Database::open_in_memory().unwrap();
        db.transaction::<_, DbError, _>(|store| {
            let file = store.create_monitor_file("monitor")?;
            for i in 0..5 {
                let sample = HeartRateSample {
                    timestamp: at(i * 60),
                    heart_rate: 60 + i,
                };
                store.append_heart_rate(file, &sample)?;
            }
            Ok(())
        })
        .unwrap();

        let all = db.heart_rate_between(None, None).unwrap();
        assert_eq!(all.len(), 5);

        let window = db.heart_rate_between(Some(at(60)), Some(at(180))).unwrap();
        assert_eq!(window.iter().map(|r| r.heart_rate).collect::<Vec<_>>(), vec![61, 62]);
    }

    #[test]
    fn test_totals_upsert_keeps_absent_values() {
        let db = Database::open_in_memory().unwrap();
        let first = SportTotals {
            sport: "running".to_string(),
            distance: Some(1000.0),
            calories: Some(500),
            timer_time: Some(3600.0),
        };
        let second = SportTotals {
            sport: "running".to_string(),
            distance: Some(2000.0),
            calories: None,
            timer_time: None,
        };
        db.transaction::<_, DbError, _>(|store| store.upsert_totals(&first)).unwrap();
        db.transaction::<_, DbError, _>(|store| store.upsert_totals(&second)).unwrap();

        let rows = db.list_totals().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].distance, Some(2000.0));
        assert_eq!(rows[0].calories, Some(500));
    }

    // ==========================================================================
    // MANUAL STATS TESTS
    // ==========================================================================

    #[test]
    fn test_manual_stats_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let older = NewManualStats {
            recorded_at: "2019-01-01T08:00:00Z",
            vo2_max: Some(41.5),
            weight_lbs: Some(180.2),
            ..Default::default()
        };
        let newer = NewManualStats {
            recorded_at: "2019-05-01T08:00:00Z",
            vo2_max: Some(43.0),
            age: Some(35),
            ..Default::default()
        };
        db.add_manual_stats(&newer).unwrap();
        db.add_manual_stats(&older).unwrap();

        let rows = db.list_manual_stats().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].vo2_max, Some(43.0));
        assert_eq!(rows[0].age, Some(35));
        assert_eq!(rows[0].weight_lbs, None);
        assert_eq!(rows[1].weight_lbs, Some(180.2));
    }

    #[test]
    fn test_manual_stats_rejects_empty_and_bad_time() {
        let db = Database::open_in_memory().unwrap();
        let empty = NewManualStats {
            recorded_at: "2019-05-01T08:00:00Z",
            ..Default::default()
        };
        assert!(matches!(db.add_manual_stats(&empty), Err(DbError::Invalid(_))));

        let bad_time = NewManualStats {
            recorded_at: "yesterday",
            age: Some(35),
            ..Default::default()
        };
        assert!(matches!(db.add_manual_stats(&bad_time), Err(DbError::Invalid(_))));
        assert!(db.list_manual_stats().unwrap().is_empty());
    }

    // ==========================================================================
    // EDIT TESTS
    // ==========================================================================
    //
    // Classification fields and the secondary-file link are the only columns
    // that change after import.
    // ==========================================================================

    #[test]
    fn test_update_classification() {
        let db = Database::open_in_memory().unwrap();
        insert_activity(&db, "walk");

        let update = ClassificationUpdate {
            activity_type: Some("hike"),
            start_location: Some("Rancho San Antonio"),
            ..Default::default()
        };
        assert!(db.update_classification("walk", &update).unwrap());

        let file = db.find_activity("walk").unwrap().unwrap();
        assert_eq!(file.activity_type, "hike");
        assert_eq!(file.activity_category, "recorded");
        assert_eq!(file.start_location.as_deref(), Some("Rancho San Antonio"));

        assert!(!db.update_classification("missing", &update).unwrap());
        assert!(db.update_classification("walk", &ClassificationUpdate::default()).unwrap());
    }

    #[test]
    fn test_link_secondary() {
        let db = Database::open_in_memory().unwrap();
        insert_activity(&db, "watch");
        let strap = insert_activity(&db, "strap");

        db.link_secondary("watch", "strap").unwrap();
        let file = db.find_activity("watch").unwrap().unwrap();
        assert_eq!(file.secondary_file_id, Some(strap.0));

        assert!(matches!(db.link_secondary("watch", "nope"), Err(DbError::NotFound(_))));
        assert!(matches!(db.link_secondary("nope", "strap"), Err(DbError::NotFound(_))));
        assert!(matches!(db.link_secondary("watch", "watch"), Err(DbError::Invalid(_))));
    }
}
