//! Week-range expressions → ascending week sets.
//!
//! Accepted shapes (per segment, segments split on `,` `，` `、` `;` `；`):
//! `"5"`, `"1-16"`, `"1-16周"`, `"第3周"`, `"7-13周(双)"`, `"1到8"`, `"1-9单"`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

static RE_WEEK_TERM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)(?:\s*[-~～到至]\s*(\d+))?").expect("invalid regex: week term")
});

const SEGMENT_SEPARATORS: &[char] = &[',', '，', '、', ';', '；'];

/// Where an odd/even marker applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualifierScope {
    /// Marker applies to the segment it is written in; a digit-less segment
    /// holding only a marker applies to every unqualified segment.
    #[default]
    Segment,
    /// Any marker anywhere applies to every range ("1-16,18 双周").
    WholeString,
}

/// Per-institution week vocabulary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeekSyntax {
    #[serde(default)]
    pub qualifier_scope: QualifierScope,
}

impl WeekSyntax {
    pub fn whole_string() -> Self {
        Self { qualifier_scope: QualifierScope::WholeString }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    Odd,
    Even,
}

impl Parity {
    fn keeps(self, week: u32) -> bool {
        match self {
            Parity::Odd => week % 2 == 1,
            Parity::Even => week % 2 == 0,
        }
    }
}

/// Odd/even marker in `text`, if any. `单`/`odd` win over `双`/`even`
/// only because they are checked first; a text carrying both is malformed.
pub fn detect_parity(text: &str) -> Option<Parity> {
    let lower = text.to_lowercase();
    if text.contains('单') || lower.contains("odd") {
        Some(Parity::Odd)
    } else if text.contains('双') || lower.contains("even") {
        Some(Parity::Even)
    } else {
        None
    }
}

/// Expand a week expression into the weeks in `[1, max_week]` it names.
///
/// Missing, empty or malformed text yields an empty set; callers must treat
/// that as "discard the occurrence", never as "every week".
pub fn parse_weeks(text: Option<&str>, syntax: &WeekSyntax, max_week: u32) -> BTreeSet<u32> {
    let mut weeks = BTreeSet::new();

    let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
        return weeks;
    };

    let segments: Vec<&str> = text
        .split(SEGMENT_SEPARATORS)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let shared = match syntax.qualifier_scope {
        QualifierScope::WholeString => detect_parity(text),
        QualifierScope::Segment => segments
            .iter()
            .filter(|s| !s.chars().any(|c| c.is_ascii_digit()))
            .find_map(|s| detect_parity(s)),
    };

    for segment in segments {
        let parity = match syntax.qualifier_scope {
            QualifierScope::WholeString => shared,
            QualifierScope::Segment => detect_parity(segment).or(shared),
        };
        expand_segment(segment, parity, max_week, &mut weeks);
    }

    weeks
}

fn expand_segment(segment: &str, parity: Option<Parity>, max_week: u32, out: &mut BTreeSet<u32>) {
    for caps in RE_WEEK_TERM.captures_iter(segment) {
        let Some(start) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) else {
            continue;
        };

        match caps.get(2) {
            Some(end) => {
                let Ok(end) = end.as_str().parse::<u32>() else { continue };
                if start > end {
                    continue;
                }
                // Weeks past max_week are dropped anyway; don't walk them.
                let upper = end.min(max_week);
                out.extend(
                    (start.max(1)..=upper).filter(|w| parity.is_none_or(|p| p.keeps(*w))),
                );
            }
            None => {
                if (1..=max_week).contains(&start) {
                    out.insert(start);
                }
            }
        }
    }
}
