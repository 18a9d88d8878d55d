//! Pipeline orchestrator: payload → extract → clean → merge → sinks.
//!
//! ## Run modes
//!
//! `run_fetch()`: request the schedule from the institution's endpoint
//!   (one page per week for per-week portals) and import it.
//!
//! `run_files()`: import payloads saved to disk (portal JSON responses or a
//!   saved schedule page).
//!
//! Both end in `deliver()`, which hands the merged course list to every sink
//! once. An empty result is reported as "no data" and nothing is delivered.

use crate::config::{AppConfig, InstitutionConfig, PipelineConfig};
use crate::extract::{clean_records, extract};
use crate::fetcher::PayloadSource;
use crate::loader::{expand_inputs, load_payload};
use crate::merge::merge;
use crate::models::{
    CourseOccurrence, ImportOutcome, ImportReport, RawPayload, StructureStatus, TermSelection,
};
use crate::storage::{Repository, RunOutcome, ScheduleSink};
use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use tracing::{error, info, warn};

// ── Normalization core ────────────────────────────────────────────────────────

/// Turn one payload into the merged course list of `institution`.
/// Structural absence yields an empty list with `StructureStatus::Missing`.
pub fn normalize(institution: &InstitutionConfig, payload: &RawPayload, cfg: &PipelineConfig) -> ImportOutcome {
    let max_week = institution.max_week(cfg.max_week);

    let extraction = match extract(&institution.source, payload, &institution.weeks, max_week) {
        Ok(extraction) => extraction,
        Err(e) => {
            warn!("{}: {}", institution.name, e);
            return ImportOutcome::no_data(e.to_string());
        }
    };

    let rows_seen = extraction.rows_seen;
    let cleaned = clean_records(extraction.records, &cfg.fallbacks());
    let records_emitted = cleaned.len();
    let courses = merge(cleaned, &institution.merge);

    ImportOutcome {
        report: ImportReport {
            structure: StructureStatus::Found,
            rows_seen,
            rows_dropped: rows_seen.saturating_sub(records_emitted),
            records_emitted,
            records_merged: records_emitted - courses.len(),
        },
        courses,
    }
}

// ── Orchestration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Saved,
    NoData,
}

impl RunStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Saved => "success",
            RunStatus::NoData => "no_data",
        }
    }
}

#[derive(Debug)]
pub struct ImportStats {
    pub institution: String,
    pub status: RunStatus,
    pub report: ImportReport,
    pub courses: Vec<CourseOccurrence>,
}

pub struct Pipeline<'a> {
    config: AppConfig,
    source: Option<Box<dyn PayloadSource>>,
    run_log: Option<&'a Repository>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: AppConfig) -> Self {
        Self { config, source: None, run_log: None }
    }

    /// Source used by `run_fetch`.
    pub fn with_source(mut self, source: Box<dyn PayloadSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Record every run in `import_runs`.
    pub fn with_run_log(mut self, repo: &'a Repository) -> Self {
        self.run_log = Some(repo);
        self
    }

    pub async fn run_fetch(
        &self,
        institution_id: &str,
        selection: &TermSelection,
        sinks: &[&dyn ScheduleSink],
    ) -> Result<ImportStats> {
        let institution = self.institution(institution_id)?;
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| anyhow!("no payload source configured"))?;

        info!("=== Fetching {} ({} term {}) ===", institution.name, selection.year, selection.term);
        let run_id = self.begin_run(institution_id, "fetch");

        let payload = match source.fetch_payload(&institution, selection).await {
            Ok(payload) => payload,
            Err(e) => {
                self.fail_run(run_id, &e);
                return Err(e).with_context(|| format!("fetch for {} failed", institution_id));
            }
        };

        self.import(institution_id, &institution, payload, run_id, sinks)
    }

    pub async fn run_files(
        &self,
        institution_id: &str,
        inputs: &[PathBuf],
        sinks: &[&dyn ScheduleSink],
    ) -> Result<ImportStats> {
        let institution = self.institution(institution_id)?;
        let kind = institution.source.payload_kind();

        info!("=== Importing {} from {} input(s) ===", institution.name, inputs.len());
        let run_id = self.begin_run(institution_id, "files");

        let payload = match expand_inputs(inputs, kind).and_then(|files| load_payload(&files, kind)) {
            Ok(payload) => payload,
            Err(e) => {
                self.fail_run(run_id, &e);
                return Err(e);
            }
        };

        self.import(institution_id, &institution, payload, run_id, sinks)
    }

    fn import(
        &self,
        institution_id: &str,
        institution: &InstitutionConfig,
        payload: RawPayload,
        run_id: Option<i64>,
        sinks: &[&dyn ScheduleSink],
    ) -> Result<ImportStats> {
        let outcome = normalize(institution, &payload, &self.config.pipeline);
        let report = &outcome.report;
        info!(
            "{}: {} rows seen | {} dropped | {} merged | {} courses",
            institution_id,
            report.rows_seen,
            report.rows_dropped,
            report.records_merged,
            outcome.courses.len()
        );

        let status = match deliver(&outcome, sinks) {
            Ok(status) => status,
            Err(e) => {
                self.fail_run(run_id, &e);
                return Err(e);
            }
        };

        if let (Some(repo), Some(id)) = (self.run_log, run_id) {
            let error = match &outcome.report.structure {
                StructureStatus::Missing(reason) => Some(reason.as_str()),
                StructureStatus::Found => None,
            };
            repo.finish_import_run(
                id,
                &RunOutcome {
                    status: status.as_str(),
                    rows_seen: outcome.report.rows_seen,
                    rows_dropped: outcome.report.rows_dropped,
                    courses_saved: if status == RunStatus::Saved { outcome.courses.len() } else { 0 },
                    error,
                },
            )
            .ok();
        }

        Ok(ImportStats {
            institution: institution_id.to_string(),
            status,
            report: outcome.report,
            courses: outcome.courses,
        })
    }

    fn institution(&self, id: &str) -> Result<InstitutionConfig> {
        self.config.institution(id).ok_or_else(|| {
            anyhow!(
                "unknown institution `{}` (known: {})",
                id,
                self.config.institution_ids().join(", ")
            )
        })
    }

    fn begin_run(&self, institution_id: &str, origin: &str) -> Option<i64> {
        let repo = self.run_log?;
        match repo.begin_import_run(institution_id, origin) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Could not log import run: {:#}", e);
                None
            }
        }
    }

    fn fail_run(&self, run_id: Option<i64>, err: &anyhow::Error) {
        error!("Import failed: {:#}", err);
        if let (Some(repo), Some(id)) = (self.run_log, run_id) {
            let message = format!("{:#}", err);
            repo.finish_import_run(id, &RunOutcome { status: "error", error: Some(&message), ..Default::default() })
                .ok();
        }
    }
}

/// Serialize the course list and hand it to each sink once.
pub fn deliver(outcome: &ImportOutcome, sinks: &[&dyn ScheduleSink]) -> Result<RunStatus> {
    if outcome.courses.is_empty() {
        match &outcome.report.structure {
            StructureStatus::Missing(reason) => warn!("No schedule structure found: {}", reason),
            StructureStatus::Found => warn!("Schedule contained no courses"),
        }
        return Ok(RunStatus::NoData);
    }

    let json = serde_json::to_string(&outcome.courses).context("Failed to serialize courses")?;
    for sink in sinks {
        sink.save_imported_courses(&json)?;
    }
    Ok(RunStatus::Saved)
}
