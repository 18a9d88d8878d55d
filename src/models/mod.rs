use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ── Canonical output ──────────────────────────────────────────────────────────

/// One recurring class meeting: same course, teacher, room, weekday and
/// period range, repeating over `weeks`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct CourseOccurrence {
    pub name: String,
    pub teacher: String,
    pub position: String,   // may carry a "[Campus]" prefix
    pub day: u32,           // 1 = Monday
    pub start_section: u32,
    pub end_section: u32,
    pub weeks: BTreeSet<u32>,
}

impl CourseOccurrence {
    /// Exact-merge key: `(name, day, startSection, endSection, position)`.
    pub fn merge_key(&self) -> (&str, u32, u32, u32, &str) {
        (
            self.name.as_str(),
            self.day,
            self.start_section,
            self.end_section,
            self.position.as_str(),
        )
    }

    /// Same course context for adjacency coalescing (day is checked separately).
    pub fn same_context(&self, other: &CourseOccurrence) -> bool {
        self.name == other.name
            && self.teacher == other.teacher
            && self.position == other.position
            && self.weeks == other.weeks
    }

    pub fn weeks_label(&self) -> String {
        self.weeks
            .iter()
            .map(|w| w.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

// ── Sections ──────────────────────────────────────────────────────────────────

/// Parsed period expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionSpan {
    Range { start: u32, end: u32 },
    /// "1-2-3-4" style enumeration
    List(Vec<u32>),
}

impl SectionSpan {
    pub fn single(period: u32) -> Self {
        SectionSpan::Range { start: period, end: period }
    }

    /// `(start, end)`; a list yields `(min, max)`. An empty list has no bounds.
    pub fn bounds(&self) -> Option<(u32, u32)> {
        match self {
            SectionSpan::Range { start, end } => Some((*start, *end)),
            SectionSpan::List(periods) => {
                let min = periods.iter().min()?;
                let max = periods.iter().max()?;
                Some((*min, *max))
            }
        }
    }
}

impl Default for SectionSpan {
    fn default() -> Self {
        SectionSpan::single(1)
    }
}

// ── Raw extraction output ─────────────────────────────────────────────────────

/// Tuple pulled out of one JSON row or one HTML course block, before validation.
#[derive(Debug, Clone, Default)]
pub struct RawRecord {
    pub name: Option<String>,
    pub teacher: Option<String>,
    pub position: Option<String>,
    pub campus: Option<String>,
    pub day: Option<u32>,
    pub weeks: BTreeSet<u32>,
    pub sections: Option<SectionSpan>,
    /// Where the record came from, for diagnostics ("row 12", "r3c2#1").
    pub origin: String,
}

// ── Payloads ──────────────────────────────────────────────────────────────────

/// Raw portal response, already retrieved.
#[derive(Debug, Clone)]
pub enum RawPayload {
    /// One JSON document per fetched page (most portals return a single page).
    Json { pages: Vec<serde_json::Value> },
    Html(String),
}

impl RawPayload {
    pub fn json(value: serde_json::Value) -> Self {
        RawPayload::Json { pages: vec![value] }
    }

    pub fn kind(&self) -> PayloadKind {
        match self {
            RawPayload::Json { .. } => PayloadKind::Json,
            RawPayload::Html(_) => PayloadKind::Html,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Json,
    Html,
}

impl std::fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadKind::Json => f.write_str("json"),
            PayloadKind::Html => f.write_str("html"),
        }
    }
}

/// Year/term picked by whoever drives the import (CLI flags, config).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TermSelection {
    pub year: String,
    pub term: String,
}

// ── Reporting ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StructureStatus {
    #[default]
    Found,
    /// No table / row array where one was expected.
    Missing(String),
}

#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub structure: StructureStatus,
    pub rows_seen: usize,
    pub rows_dropped: usize,
    pub records_emitted: usize,
    pub records_merged: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ImportOutcome {
    pub courses: Vec<CourseOccurrence>,
    pub report: ImportReport,
}

impl ImportOutcome {
    pub fn no_data(reason: impl Into<String>) -> Self {
        Self {
            courses: Vec::new(),
            report: ImportReport {
                structure: StructureStatus::Missing(reason.into()),
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_course_serializes_camel_case() {
        let course = CourseOccurrence {
            name: "Calculus".into(),
            teacher: "Prof. X".into(),
            position: "Room 101".into(),
            day: 1,
            start_section: 1,
            end_section: 2,
            weeks: [3, 1, 2].into_iter().collect(),
        };
        let json = serde_json::to_value(&course).unwrap();
        assert_eq!(json["startSection"], 1);
        assert_eq!(json["endSection"], 2);
        assert_eq!(json["weeks"], serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn test_section_list_bounds() {
        assert_eq!(SectionSpan::List(vec![3, 1, 4, 2]).bounds(), Some((1, 4)));
        assert_eq!(SectionSpan::List(vec![]).bounds(), None);
        assert_eq!(SectionSpan::default().bounds(), Some((1, 1)));
    }
}
