use tracing::debug;

use crate::models::{CourseOccurrence, RawRecord};

/// Sentinel texts used when a record carries no teacher or room.
#[derive(Debug, Clone)]
pub struct Fallbacks {
    pub teacher: String,
    pub room: String,
}

impl Default for Fallbacks {
    fn default() -> Self {
        Self {
            teacher: "未知教师".to_string(),
            room: "未知地点".to_string(),
        }
    }
}

// ── RawRecord → CourseOccurrence ──────────────────────────────────────────────

/// Validate one raw record. Records without a name, with an empty week set,
/// a weekday outside 1..=7 or an unusable section span are rejected.
pub fn clean_record(raw: RawRecord, fallbacks: &Fallbacks) -> Option<CourseOccurrence> {
    let Some(name) = non_blank(raw.name) else {
        return reject(&raw.origin, "no course name");
    };

    if raw.weeks.is_empty() {
        return reject(&raw.origin, "empty week set");
    }

    let day = match raw.day {
        Some(day) if (1..=7).contains(&day) => day,
        other => return reject(&raw.origin, &format!("weekday {:?} out of range", other)),
    };

    let Some((start_section, end_section)) = raw.sections.as_ref().and_then(|s| s.bounds()) else {
        return reject(&raw.origin, "no sections");
    };
    if start_section < 1 || start_section > end_section {
        return reject(
            &raw.origin,
            &format!("section span {}-{} invalid", start_section, end_section),
        );
    }

    let position = match non_blank(raw.position) {
        Some(room) => with_campus_prefix(room, raw.campus.as_deref()),
        None => fallbacks.room.clone(),
    };

    Some(CourseOccurrence {
        name,
        teacher: non_blank(raw.teacher).unwrap_or_else(|| fallbacks.teacher.clone()),
        position,
        day,
        start_section,
        end_section,
        weeks: raw.weeks,
    })
}

pub fn clean_records(raws: Vec<RawRecord>, fallbacks: &Fallbacks) -> Vec<CourseOccurrence> {
    raws.into_iter()
        .filter_map(|raw| clean_record(raw, fallbacks))
        .collect()
}

/// "[校本部]西校区0303": prefix the room with its campus unless it already
/// carries a bracketed prefix.
pub fn with_campus_prefix(room: String, campus: Option<&str>) -> String {
    match campus.map(str::trim).filter(|c| !c.is_empty()) {
        Some(campus) if !room.starts_with('[') => format!("[{}]{}", campus, room),
        _ => room,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn reject<T>(origin: &str, reason: &str) -> Option<T> {
    debug!("{}: dropped ({})", origin, reason);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SectionSpan;

    fn raw(day: u32) -> RawRecord {
        RawRecord {
            name: Some("高等数学".into()),
            teacher: Some("王".into()),
            position: Some("A101".into()),
            campus: None,
            day: Some(day),
            weeks: [1, 2, 3].into_iter().collect(),
            sections: Some(SectionSpan::Range { start: 1, end: 2 }),
            origin: "test".into(),
        }
    }

    #[test]
    fn test_valid_record_passes() {
        let course = clean_record(raw(3), &Fallbacks::default()).unwrap();
        assert_eq!(course.day, 3);
        assert_eq!((course.start_section, course.end_section), (1, 2));
    }

    #[test]
    fn test_weekday_bounds() {
        let fallbacks = Fallbacks::default();
        assert!(clean_record(raw(0), &fallbacks).is_none());
        assert!(clean_record(raw(8), &fallbacks).is_none());
        assert!(clean_record(raw(7), &fallbacks).is_some());
    }

    #[test]
    fn test_empty_weeks_rejected() {
        let mut record = raw(1);
        record.weeks.clear();
        assert!(clean_record(record, &Fallbacks::default()).is_none());
    }

    #[test]
    fn test_reversed_or_zero_sections_rejected() {
        let mut reversed = raw(1);
        reversed.sections = Some(SectionSpan::Range { start: 4, end: 2 });
        assert!(clean_record(reversed, &Fallbacks::default()).is_none());

        let mut zero = raw(1);
        zero.sections = Some(SectionSpan::Range { start: 0, end: 2 });
        assert!(clean_record(zero, &Fallbacks::default()).is_none());
    }

    #[test]
    fn test_blank_name_rejected() {
        let mut record = raw(1);
        record.name = Some("  ".into());
        assert!(clean_record(record, &Fallbacks::default()).is_none());
    }

    #[test]
    fn test_sentinels_fill_missing_teacher_and_room() {
        let mut record = raw(1);
        record.teacher = None;
        record.position = Some("".into());
        record.campus = Some("东校区".into());
        let course = clean_record(record, &Fallbacks::default()).unwrap();
        assert_eq!(course.teacher, "未知教师");
        // No campus prefix on the sentinel.
        assert_eq!(course.position, "未知地点");
    }

    #[test]
    fn test_campus_prefix() {
        assert_eq!(with_campus_prefix("西校区0303".into(), Some("校本部")), "[校本部]西校区0303");
        assert_eq!(with_campus_prefix("[东]101".into(), Some("校本部")), "[东]101");
        assert_eq!(with_campus_prefix("101".into(), Some(" ")), "101");
        assert_eq!(with_campus_prefix("101".into(), None), "101");
    }
}
