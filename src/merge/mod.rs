//! Duplicate and adjacency merging of course occurrences.
//!
//! `merge_by_key` unions the week sets of records sharing
//! `(name, day, startSection, endSection, position)`; `coalesce_adjacent`
//! joins period-level rows of one course into a multi-period record.
//! `merge` combines both and is idempotent.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::models::CourseOccurrence;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeOptions {
    /// Join records split across consecutive period rows (grid sources).
    #[serde(default)]
    pub coalesce_adjacent: bool,

    /// Sort by `(day, startSection, ...)` instead of keeping first-seen order.
    #[serde(default)]
    pub sort_output: bool,
}

// ── Exact-key merge ───────────────────────────────────────────────────────────

/// Union week sets per merge key. The first record seen for a key keeps its
/// teacher; output follows the order keys were first seen.
pub fn merge_by_key(records: Vec<CourseOccurrence>) -> Vec<CourseOccurrence> {
    let mut merged: Vec<CourseOccurrence> = Vec::with_capacity(records.len());
    let mut index: HashMap<(String, u32, u32, u32, String), usize> = HashMap::new();

    for record in records {
        let (name, day, start, end, position) = record.merge_key();
        let key = (name.to_string(), day, start, end, position.to_string());
        match index.get(&key) {
            Some(&slot) => {
                let first = &mut merged[slot];
                if first.teacher != record.teacher {
                    debug!(
                        "{} day {} {}-{}: teacher {:?} differs from {:?}, keeping first",
                        record.name, record.day, record.start_section, record.end_section,
                        record.teacher, first.teacher
                    );
                }
                first.weeks.extend(record.weeks);
            }
            None => {
                index.insert(key, merged.len());
                merged.push(record);
            }
        }
    }

    merged
}

// ── Adjacency coalescing ──────────────────────────────────────────────────────

/// Sort by `(day, name, teacher, position, weeks, startSection)` and join each
/// record into its predecessor when it continues it directly.
pub fn coalesce_adjacent(mut records: Vec<CourseOccurrence>) -> Vec<CourseOccurrence> {
    records.sort_by(|a, b| {
        a.day
            .cmp(&b.day)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.teacher.cmp(&b.teacher))
            .then_with(|| a.position.cmp(&b.position))
            .then_with(|| a.weeks.cmp(&b.weeks))
            .then_with(|| a.start_section.cmp(&b.start_section))
            .then_with(|| a.end_section.cmp(&b.end_section))
    });

    let mut result = Vec::with_capacity(records.len());
    let mut records = records.into_iter();
    let Some(mut current) = records.next() else {
        return result;
    };

    for next in records {
        let continues = current.same_context(&next)
            && next.day == current.day
            && current.end_section.checked_add(1) == Some(next.start_section);

        if continues {
            current.end_section = next.end_section;
        } else {
            result.push(std::mem::replace(&mut current, next));
        }
    }
    result.push(current);

    result
}

// ── Combined ──────────────────────────────────────────────────────────────────

pub fn merge(records: Vec<CourseOccurrence>, options: &MergeOptions) -> Vec<CourseOccurrence> {
    let mut merged = merge_by_key(records);

    if options.coalesce_adjacent {
        // A coalesced span can land on an existing key; repeat until stable.
        loop {
            let before = merged.len();
            merged = merge_by_key(coalesce_adjacent(merged));
            if merged.len() == before {
                break;
            }
        }
    }

    if options.sort_output {
        sort_for_presentation(&mut merged);
    }

    merged
}

pub fn sort_for_presentation(records: &mut [CourseOccurrence]) {
    records.sort_by(|a, b| {
        a.day
            .cmp(&b.day)
            .then_with(|| a.start_section.cmp(&b.start_section))
            .then_with(|| a.end_section.cmp(&b.end_section))
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.teacher.cmp(&b.teacher))
            .then_with(|| a.position.cmp(&b.position))
            .then_with(|| a.weeks.cmp(&b.weeks))
    });
}
