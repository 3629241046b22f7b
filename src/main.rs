use chrono::{DateTime, Local, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use localfit::db::{to_db_time, ClassificationUpdate, NewManualStats};
use localfit::decode::json;
use localfit::profile::classify;
use localfit::report::{
    daily_stress_breakdown, write_json, ActivityDetail, ActivityListEntry, ChartSeries,
    ImportSummary, ManualStatsEntry, Metric, TotalsEntry,
};
use localfit::{Config, Database, FileKind, ImportReport, Importer, IngestError};
use rayon::prelude::*;
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

const SPARKLINE_WIDTH: usize = 60;

#[derive(Parser, Debug)]
#[command(name = "localfit")]
#[command(author, version, about = "Import fitness-tracker files into a local activity database")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Database file (overrides LOCALFIT_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// More log output (-v info, -vv debug); LOCALFIT_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import decoded FIT dumps (.json); directories are searched recursively
    Import {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Treat every file as this kind instead of detecting it
        #[arg(long, value_enum, default_value = "auto")]
        kind: KindArg,

        /// Number of parallel workers (default: number of CPUs)
        #[arg(short, long)]
        jobs: Option<usize>,
    },

    /// Show what a dump contains without importing it
    Inspect { path: PathBuf },

    /// List imported activities, newest first
    Activities {
        #[arg(long)]
        json: bool,
    },

    /// Show one activity
    Show {
        name: String,

        #[arg(long)]
        json: bool,
    },

    /// Chart one metric of an activity
    Chart {
        name: String,

        #[arg(short, long, value_enum, default_value = "heart-rate")]
        metric: ActivityMetric,

        #[arg(long)]
        json: bool,
    },

    /// Chart all-day monitoring data
    Monitor {
        #[arg(value_enum)]
        series: MonitorMetric,

        /// Start date, inclusive (YYYY-MM-DD or RFC 3339)
        #[arg(long, value_parser = parse_when)]
        from: Option<DateTime<Utc>>,

        /// End date, exclusive (YYYY-MM-DD or RFC 3339)
        #[arg(long, value_parser = parse_when)]
        to: Option<DateTime<Utc>>,

        /// Per-day stress band counts instead of a chart (stress only)
        #[arg(long)]
        daily: bool,

        #[arg(long)]
        json: bool,
    },

    /// Lifetime totals per sport
    Totals {
        #[arg(long)]
        json: bool,
    },

    /// Edit an activity's classification
    Edit {
        name: String,

        #[arg(long)]
        activity_type: Option<String>,

        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        location: Option<String>,
    },

    /// Record body measurements, or list them when none are given
    Stats {
        /// VO2 max in ml/kg/min
        #[arg(long)]
        vo2_max: Option<f64>,

        /// Weight in pounds
        #[arg(long)]
        weight: Option<f64>,

        /// Height in inches
        #[arg(long)]
        height: Option<i32>,

        #[arg(long)]
        age: Option<i32>,

        /// When the measurements were taken (default: now)
        #[arg(long, value_parser = parse_when)]
        at: Option<DateTime<Utc>>,

        #[arg(long)]
        json: bool,
    },

    /// Mark SECONDARY as a second recording of PRIMARY
    Link { primary: String, secondary: String },

    /// Create a backup of the database
    Backup {
        /// Output path for backup (default: localfit_backup_<timestamp>.db)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Auto,
    Activity,
    Monitor,
    Totals,
}

impl KindArg {
    fn file_kind(self) -> Option<FileKind> {
        match self {
            KindArg::Auto => None,
            KindArg::Activity => Some(FileKind::Activity),
            KindArg::Monitor => Some(FileKind::Monitoring),
            KindArg::Totals => Some(FileKind::Totals),
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ActivityMetric {
    HeartRate,
    Altitude,
    Speed,
}

impl From<ActivityMetric> for Metric {
    fn from(m: ActivityMetric) -> Self {
        match m {
            ActivityMetric::HeartRate => Metric::HeartRate,
            ActivityMetric::Altitude => Metric::Altitude,
            ActivityMetric::Speed => Metric::Speed,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum MonitorMetric {
    HeartRate,
    Stress,
    RestingMetabolicRate,
}

fn parse_when(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
        .ok_or_else(|| format!("expected YYYY-MM-DD or an RFC 3339 timestamp, got '{}'", s))
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(db) = args.db {
        config.db_path = db;
    }

    match args.command {
        Command::Import { paths, kind, jobs } => run_import(&config, paths, kind.file_kind(), jobs),
        Command::Inspect { path } => run_inspect(path),
        Command::Backup { output } => run_backup(&config, output),
        other => {
            let db = open_db(&config);
            run_query(&db, other);
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("LOCALFIT_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn open_db(config: &Config) -> Database {
    match Database::open_with(config) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Failed to open database {}: {}", config.db_path.display(), e);
            std::process::exit(1);
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    if let Err(e) = write_json(&mut io::stdout().lock(), value) {
        eprintln!("Error writing JSON: {}", e);
        std::process::exit(1);
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

// ============================================================================
// import
// ============================================================================

fn collect_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter(|e| {
                    e.path()
                        .extension()
                        .and_then(|ext| ext.to_str())
                        .map(|ext| ext.eq_ignore_ascii_case("json"))
                        .unwrap_or(false)
                })
                .map(|e| e.path().to_path_buf())
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }
    files
}

fn run_import(config: &Config, paths: Vec<PathBuf>, kind: Option<FileKind>, jobs: Option<usize>) {
    if let Some(jobs) = jobs {
        rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build_global()
            .ok();
    }

    let files = collect_files(&paths);
    if files.is_empty() {
        eprintln!("No .json dumps found");
        std::process::exit(1);
    }

    let db = open_db(config);
    let importer = Importer::new(&db);

    let pb = if files.len() > 1 {
        let pb = ProgressBar::new(files.len() as u64);
        let template = "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}";
        if let Ok(style) = ProgressStyle::default_bar().template(template) {
            pb.set_style(style.progress_chars("=>-"));
        }
        Some(pb)
    } else {
        None
    };

    let outcomes: Vec<(PathBuf, Result<ImportReport, IngestError>)> = files
        .par_iter()
        .map(|path| {
            let outcome = importer.import_file(path, kind);
            if let Some(ref pb) = pb {
                pb.inc(1);
                pb.set_message(path.display().to_string());
            }
            (path.clone(), outcome)
        })
        .collect();

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    for (path, outcome) in &outcomes {
        match outcome {
            Ok(r) => println!(
                "\x1b[32m{:<10}\x1b[0m {:<14} {:>7} rows  {}",
                "[OK]",
                r.activity_type.as_deref().unwrap_or(r.kind.as_str()),
                r.rows,
                r.filename
            ),
            Err(IngestError::DuplicateFile(name)) => {
                println!("\x1b[33m{:<10}\x1b[0m {:<14} {:>12}  {}", "[DUP]", "-", "", name)
            }
            Err(e) => println!(
                "\x1b[31m{:<10}\x1b[0m {:<14} {:>12}  {}: {}",
                "[FAIL]",
                e.kind(),
                "",
                path.display(),
                truncate(&e.to_string(), 80)
            ),
        }
    }

    let summary = ImportSummary::from_outcomes(outcomes.iter().map(|(_, o)| o));
    eprintln!("\n{}", "─".repeat(70));
    eprintln!(
        "\x1b[1mSummary:\x1b[0m {} of {} file(s) imported",
        summary.imported(),
        summary.total
    );
    eprintln!("  \x1b[32m✓ Activities:\x1b[0m {}", summary.activities);
    eprintln!("  \x1b[32m✓ Monitoring:\x1b[0m {}", summary.monitors);
    eprintln!("  \x1b[32m✓ Totals:\x1b[0m     {}", summary.totals);
    if summary.duplicates > 0 {
        eprintln!("  \x1b[33m= Duplicates:\x1b[0m {}", summary.duplicates);
    }
    if summary.failed > 0 {
        eprintln!("  \x1b[31m✗ Failed:\x1b[0m     {}", summary.failed);
    }

    if summary.has_failures() {
        std::process::exit(1);
    }
}

// ============================================================================
// inspect
// ============================================================================

fn run_inspect(path: PathBuf) {
    let file = match json::load(&path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    println!("{}", path.display());
    println!("{}", "─".repeat(40));
    for (kind, count) in file.kind_counts() {
        println!("  {:<28} {:>8}", kind, count);
    }
    println!("{}", "─".repeat(40));

    match FileKind::detect(&file) {
        Ok(kind) => println!("Kind:     {}", kind),
        Err(e) => println!("Kind:     {}", e),
    }
    if !file.messages.iter().any(|m| m.kind == "sport") {
        return;
    }
    match classify(&file) {
        Ok(profile) => println!(
            "Activity: {} ({}) from code {}",
            profile.activity_type, profile.category, profile.code
        ),
        Err(e) => println!("Activity: {}", e),
    }
}

// ============================================================================
// Queries and edits
// ============================================================================

fn run_query(db: &Database, command: Command) {
    let result = match command {
        Command::Activities { json } => show_activities(db, json),
        Command::Show { name, json } => show_activity(db, &name, json),
        Command::Chart { name, metric, json } => show_chart(db, &name, metric.into(), json),
        Command::Monitor {
            series,
            from,
            to,
            daily,
            json,
        } => show_monitor(db, series, from, to, daily, json),
        Command::Totals { json } => show_totals(db, json),
        Command::Edit { name, activity_type, category, location } => {
            let update = ClassificationUpdate {
                activity_type: activity_type.as_deref(),
                activity_category: category.as_deref(),
                start_location: location.as_deref(),
            };
            db.update_classification(&name, &update).map(|found| {
                if found {
                    println!("Updated {}", name);
                } else {
                    eprintln!("No activity named '{}'", name);
                    std::process::exit(1);
                }
            })
        }
        Command::Stats {
            vo2_max,
            weight,
            height,
            age,
            at,
            json,
        } => {
            let recorded_at = to_db_time(&at.unwrap_or_else(Utc::now));
            let stats = NewManualStats {
                recorded_at: &recorded_at,
                vo2_max,
                weight_lbs: weight,
                height_inches: height,
                age,
            };
            if stats.is_empty() {
                show_manual_stats(db, json)
            } else {
                db.add_manual_stats(&stats).map(|()| println!("Recorded stats at {}", recorded_at))
            }
        }
        Command::Link { primary, secondary } => db
            .link_secondary(&primary, &secondary)
            .map(|()| println!("Linked {} -> {}", primary, secondary)),
        Command::Import { .. } | Command::Inspect { .. } | Command::Backup { .. } => Ok(()),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn show_activities(db: &Database, json: bool) -> localfit::db::Result<()> {
    let entries: Vec<ActivityListEntry> = db
        .list_activities()?
        .iter()
        .map(|(file, session)| ActivityListEntry::from_rows(file, session))
        .collect();

    if json {
        print_json(&entries);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No activities imported.");
        return Ok(());
    }

    println!(
        "{:<20} {:<15} {:<18} {:>10} {:>9} {:>7}",
        "START", "TYPE", "NAME", "DISTANCE", "TIME", "KCAL"
    );
    println!("{}", "-".repeat(84));
    for e in entries {
        println!(
            "{:<20} {:<15} {:<18} {:>10} {:>9} {:>7}",
            e.start_time,
            e.activity_type,
            truncate(&e.filename, 18),
            e.distance.unwrap_or_default(),
            e.elapsed_time.unwrap_or_default(),
            e.calories.unwrap_or_default()
        );
    }
    Ok(())
}

fn show_activity(db: &Database, name: &str, json: bool) -> localfit::db::Result<()> {
    let Some((file, session)) = db.activity_detail(name)? else {
        return Err(localfit::DbError::NotFound(format!("activity '{}'", name)));
    };
    let samples = db.activity_samples(file.id)?;
    let detail = ActivityDetail::build(&file, &session, &samples);

    if json {
        print_json(&detail);
        return Ok(());
    }

    let s = &detail.summary;
    println!("\x1b[1m{}\x1b[0m  {} ({})", s.filename, s.activity_type, s.activity_category);
    println!("{}", "─".repeat(50));
    println!("  Start:      {}", s.start_time);
    if let Some(ref location) = s.start_location {
        println!("  Location:   {}", location);
    }
    if let Some(p) = detail.start_position {
        println!("  Position:   {:.6}, {:.6}", p.lat, p.lng);
    }
    println!("  Distance:   {}", s.distance.as_deref().unwrap_or("-"));
    println!("  Time:       {}", s.elapsed_time.as_deref().unwrap_or("-"));
    println!("  Calories:   {}", s.calories.as_deref().unwrap_or("-"));
    if let (Some(avg), Some(max)) = (detail.avg_heart_rate, detail.max_heart_rate) {
        println!("  Heart rate: {} avg / {} max", avg, max);
    }
    if let Some(strides) = detail.total_strides {
        println!("  Strides:    {}", strides);
    }
    println!("  Samples:    {} ({} with GPS)", detail.samples, detail.track.len());
    if detail.linked {
        println!("  Linked to a second recording");
    }
    Ok(())
}

fn print_chart(series: &ChartSeries) {
    let (Some(start), Some(end)) = (series.start_time, series.end_time) else {
        println!("No {} data.", series.metric.label().to_lowercase());
        return;
    };
    let unit = series.metric.unit();
    println!(
        "{} ({} points, {} to {})",
        series.metric.label(),
        series.points.len(),
        start.format("%Y-%m-%d %H:%M"),
        end.format("%Y-%m-%d %H:%M")
    );
    println!("  {}", series.sparkline(SPARKLINE_WIDTH));
    println!(
        "  min {:.1}{u}  mean {:.1}{u}  max {:.1}{u}",
        series.min().unwrap_or_default(),
        series.mean().unwrap_or_default(),
        series.max().unwrap_or_default(),
        u = if unit.is_empty() { String::new() } else { format!(" {}", unit) }
    );
}

fn show_chart(db: &Database, name: &str, metric: Metric, json: bool) -> localfit::db::Result<()> {
    let Some(file) = db.find_activity(name)? else {
        return Err(localfit::DbError::NotFound(format!("activity '{}'", name)));
    };
    let series = ChartSeries::from_activity(metric, &db.activity_samples(file.id)?);
    if json {
        print_json(&series);
    } else {
        print_chart(&series);
    }
    Ok(())
}

fn show_monitor(
    db: &Database,
    series: MonitorMetric,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    daily: bool,
    json: bool,
) -> localfit::db::Result<()> {
    if daily {
        let MonitorMetric::Stress = series else {
            return Err(localfit::DbError::Invalid("--daily only applies to stress".to_string()));
        };
        let days = daily_stress_breakdown(&db.stress_between(from, to)?);
        if json {
            print_json(&days);
            return Ok(());
        }
        println!("{:<12} {:>6} {:>6} {:>6} {:>6}", "DATE", "REST", "LOW", "MED", "HIGH");
        println!("{}", "-".repeat(40));
        for d in days {
            println!(
                "{:<12} {:>6} {:>6} {:>6} {:>6}",
                d.date.map(|d| d.to_string()).unwrap_or_default(),
                d.rest,
                d.low,
                d.med,
                d.high
            );
        }
        return Ok(());
    }

    let chart = match series {
        MonitorMetric::HeartRate => ChartSeries::from_heart_rate(&db.heart_rate_between(from, to)?),
        MonitorMetric::Stress => ChartSeries::from_stress(&db.stress_between(from, to)?),
        MonitorMetric::RestingMetabolicRate => {
            ChartSeries::from_resting_metabolic_rate(&db.resting_metabolic_rate_between(from, to)?)
        }
    };
    if json {
        print_json(&chart);
    } else {
        print_chart(&chart);
    }
    Ok(())
}

fn show_totals(db: &Database, json: bool) -> localfit::db::Result<()> {
    let entries: Vec<TotalsEntry> = db.list_totals()?.iter().map(TotalsEntry::from_row).collect();
    if json {
        print_json(&entries);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No totals imported.");
        return Ok(());
    }

    println!("{:<16} {:>14} {:>12} {:>10}  {}", "SPORT", "DISTANCE", "TIME", "KCAL", "UPDATED");
    println!("{}", "-".repeat(76));
    for e in entries {
        println!(
            "{:<16} {:>14} {:>12} {:>10}  {}",
            e.sport,
            e.distance.unwrap_or_default(),
            e.timer_time.unwrap_or_default(),
            e.calories.unwrap_or_default(),
            e.updated
        );
    }
    Ok(())
}

fn show_manual_stats(db: &Database, json: bool) -> localfit::db::Result<()> {
    let entries: Vec<ManualStatsEntry> =
        db.list_manual_stats()?.iter().map(ManualStatsEntry::from_row).collect();
    if json {
        print_json(&entries);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No stats recorded.");
        return Ok(());
    }

    let show = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());
    println!(
        "{:<20} {:>8} {:<10} {:>8} {:>7} {:>4}",
        "RECORDED", "VO2", "RANGE", "LBS", "IN", "AGE"
    );
    println!("{}", "-".repeat(62));
    for e in entries {
        println!(
            "{:<20} {:>8} {:<10} {:>8} {:>7} {:>4}",
            e.recorded,
            show(e.vo2_max.map(|v| format!("{:.1}", v))),
            show(e.vo2_range.map(|r| r.to_string())),
            show(e.weight_lbs.map(|w| format!("{:.1}", w))),
            show(e.height_inches.map(|h| h.to_string())),
            show(e.age.map(|a| a.to_string())),
        );
    }
    Ok(())
}

// ============================================================================
// backup
// ============================================================================

fn run_backup(config: &Config, output: Option<PathBuf>) {
    let db_path = &config.db_path;
    if !db_path.exists() {
        eprintln!("No database found at {}", db_path.display());
        std::process::exit(1);
    }

    let backup_path = output.unwrap_or_else(|| {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        PathBuf::from(format!("localfit_backup_{}.db", timestamp))
    });

    match std::fs::copy(db_path, &backup_path) {
        Ok(bytes) => {
            println!("Backup created: {} ({} bytes)", backup_path.display(), bytes);
        }
        Err(e) => {
            eprintln!("Failed to create backup: {}", e);
            std::process::exit(1);
        }
    }
}
