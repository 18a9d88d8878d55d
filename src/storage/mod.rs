use crate::models::CourseOccurrence;
use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use duckdb::{params, Connection};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// ── Sink trait ────────────────────────────────────────────────────────────────

/// Receives the final schedule as one JSON array of courses. Called once per
/// import and never retried.
pub trait ScheduleSink {
    fn save_imported_courses(&self, courses_json: &str) -> Result<()>;
}

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS seq_import_runs START 1;

CREATE TABLE IF NOT EXISTS courses (
    institution     VARCHAR  NOT NULL,
    name            VARCHAR  NOT NULL,
    teacher         VARCHAR  NOT NULL,
    position        VARCHAR  NOT NULL,
    day             INTEGER  NOT NULL,
    start_section   INTEGER  NOT NULL,
    end_section     INTEGER  NOT NULL,
    -- ascending, comma-separated
    weeks           VARCHAR  NOT NULL,
    imported_at     TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS import_runs (
    id              BIGINT PRIMARY KEY DEFAULT nextval('seq_import_runs'),
    institution     VARCHAR NOT NULL,
    origin          VARCHAR NOT NULL,
    started_at      TIMESTAMP NOT NULL,
    finished_at     TIMESTAMP,
    status          VARCHAR NOT NULL DEFAULT 'running',
    rows_seen       INTEGER DEFAULT 0,
    rows_dropped    INTEGER DEFAULT 0,
    courses_saved   INTEGER DEFAULT 0,
    error_msg       VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_courses_institution ON courses (institution);
CREATE INDEX IF NOT EXISTS idx_courses_day         ON courses (institution, day);
"#;

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

/// Summary row of `import_runs`.
#[derive(Debug, Clone)]
pub struct ImportRun {
    pub id: i64,
    pub institution: String,
    pub origin: String,
    pub started_at: NaiveDateTime,
    pub status: String,
    pub courses_saved: i64,
}

/// Counters written when a run finishes.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome<'a> {
    pub status: &'a str,
    pub rows_seen: usize,
    pub rows_dropped: usize,
    pub courses_saved: usize,
    pub error: Option<&'a str>,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn.execute_batch(INDEXES).context("Index creation failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Courses ───────────────────────────────────────────────────────────────

    /// Replace every stored course of `institution` in one transaction.
    pub fn replace_courses(&self, institution: &str, courses: &[CourseOccurrence]) -> Result<usize> {
        let now = Utc::now().naive_utc();
        let tx = self.conn.unchecked_transaction()?;

        let removed = tx
            .execute("DELETE FROM courses WHERE institution = ?", params![institution])
            .with_context(|| format!("clear courses of {}", institution))?;
        debug!("{}: {} previous courses removed", institution, removed);

        for c in courses {
            tx.execute(
                r#"INSERT INTO courses
                       (institution, name, teacher, position, day, start_section, end_section, weeks, imported_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
                params![
                    institution,
                    c.name,
                    c.teacher,
                    c.position,
                    c.day,
                    c.start_section,
                    c.end_section,
                    c.weeks_label(),
                    now,
                ],
            )
            .with_context(|| format!("insert course {} ({})", c.name, institution))?;
        }

        tx.commit()?;
        Ok(courses.len())
    }

    pub fn list_courses(&self, institution: &str) -> Result<Vec<CourseOccurrence>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT name, teacher, position, day, start_section, end_section, weeks
               FROM courses WHERE institution = ?
               ORDER BY day, start_section, end_section, name"#,
        )?;
        let courses = stmt
            .query_map(params![institution], |r| {
                let weeks: String = r.get(6)?;
                Ok(CourseOccurrence {
                    name: r.get(0)?,
                    teacher: r.get(1)?,
                    position: r.get(2)?,
                    day: r.get(3)?,
                    start_section: r.get(4)?,
                    end_section: r.get(5)?,
                    weeks: parse_week_list(&weeks),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(courses)
    }

    pub fn course_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM courses")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn institution_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(DISTINCT institution) FROM courses")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    /// View of the repository that stores courses for one institution.
    pub fn sink_for<'a>(&'a self, institution: &str) -> InstitutionSink<'a> {
        InstitutionSink { repo: self, institution: institution.to_string() }
    }

    // ── Import run log ────────────────────────────────────────────────────────

    pub fn begin_import_run(&self, institution: &str, origin: &str) -> Result<i64> {
        let id: i64 = self.conn.query_row(
            r#"INSERT INTO import_runs (institution, origin, started_at, status)
               VALUES (?, ?, ?, 'running') RETURNING id"#,
            params![institution, origin, Utc::now().naive_utc()],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_import_run(&self, run_id: i64, outcome: &RunOutcome<'_>) -> Result<()> {
        self.conn.execute(
            r#"UPDATE import_runs SET
               finished_at = ?, status = ?,
               rows_seen = ?, rows_dropped = ?, courses_saved = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                outcome.status,
                outcome.rows_seen as i64,
                outcome.rows_dropped as i64,
                outcome.courses_saved as i64,
                outcome.error,
                run_id,
            ],
        )?;
        Ok(())
    }

    pub fn last_import(&self) -> Result<Option<ImportRun>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT id, institution, origin, started_at, status, courses_saved
               FROM import_runs ORDER BY id DESC LIMIT 1"#,
        )?;
        let run = stmt
            .query_map([], |r| {
                Ok(ImportRun {
                    id: r.get(0)?,
                    institution: r.get(1)?,
                    origin: r.get(2)?,
                    started_at: r.get(3)?,
                    status: r.get(4)?,
                    courses_saved: r.get::<_, Option<i64>>(5)?.unwrap_or(0),
                })
            })?
            .filter_map(|r| r.ok())
            .next();
        Ok(run)
    }
}

fn parse_week_list(text: &str) -> BTreeSet<u32> {
    text.split(',').filter_map(|w| w.trim().parse().ok()).collect()
}

// ── Sinks ─────────────────────────────────────────────────────────────────────

pub struct InstitutionSink<'a> {
    repo: &'a Repository,
    institution: String,
}

impl ScheduleSink for InstitutionSink<'_> {
    fn save_imported_courses(&self, courses_json: &str) -> Result<()> {
        let courses: Vec<CourseOccurrence> =
            serde_json::from_str(courses_json).context("course JSON does not match the course schema")?;
        let n = self.repo.replace_courses(&self.institution, &courses)?;
        info!("{}: {} courses stored", self.institution, n);
        Ok(())
    }
}

/// Writes the course list as pretty-printed JSON.
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ScheduleSink for JsonFileSink {
    fn save_imported_courses(&self, courses_json: &str) -> Result<()> {
        let value: serde_json::Value = serde_json::from_str(courses_json).context("invalid course JSON")?;
        let pretty = serde_json::to_string_pretty(&value)?;
        create_parent(&self.path)?;
        std::fs::write(&self.path, pretty).with_context(|| format!("Failed to write {:?}", self.path))?;
        info!("Schedule written to {:?}", self.path);
        Ok(())
    }
}

#[derive(Serialize)]
struct CsvRow<'a> {
    name: &'a str,
    teacher: &'a str,
    position: &'a str,
    day: u32,
    start_section: u32,
    end_section: u32,
    weeks: String,
}

pub fn write_csv(path: &Path, courses: &[CourseOccurrence]) -> Result<()> {
    create_parent(path)?;
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("Failed to create {:?}", path))?;
    for c in courses {
        writer.serialize(CsvRow {
            name: &c.name,
            teacher: &c.teacher,
            position: &c.position,
            day: c.day,
            start_section: c.start_section,
            end_section: c.end_section,
            weeks: c.weeks_label(),
        })?;
    }
    writer.flush()?;
    info!("{} rows exported to {:?}", courses.len(), path);
    Ok(())
}

fn create_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create dir {:?}", parent)),
        _ => Ok(()),
    }
}
