use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ExtractError;
use crate::models::{RawRecord, SectionSpan};
use crate::parsers::{parse_section_pair, parse_sections, parse_weeks, WeekSyntax};

use super::Extraction;

// ── Layout ────────────────────────────────────────────────────────────────────

/// Where the rows live in a JSON payload and what the portal calls each field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRowLayout {
    /// JSON pointer to the row array, e.g. `/kbList`.
    pub rows_pointer: String,

    /// When set, each element at `rows_pointer` is a group (e.g. one weekday)
    /// whose rows sit under this key. Missing row fields are read from the group.
    #[serde(default)]
    pub children_key: Option<String>,

    pub fields: JsonFieldMap,

    /// Skip rows lacking teacher or room instead of filling in sentinels.
    #[serde(default = "default_true")]
    pub require_all_fields: bool,

    #[serde(default = "default_teacher_separator")]
    pub teacher_separator: String,

    /// Campus used for the room prefix when the row carries none.
    #[serde(default)]
    pub default_campus: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonFieldMap {
    pub name: String,
    pub teacher: String,
    pub room: String,
    pub weekday: String,
    pub weeks: String,
    pub sections: SectionFields,
    #[serde(default)]
    pub campus: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionFields {
    /// Start and end period in two fields (`ps` / `pe`).
    Separate { start: String, end: String },
    /// One field holding "1-2", "0304", "3-4节", ...
    Combined(String),
}

fn default_true() -> bool {
    true
}
fn default_teacher_separator() -> String {
    "、".to_string()
}

// ── Extraction ────────────────────────────────────────────────────────────────

pub fn extract_rows(
    layout: &JsonRowLayout,
    pages: &[Value],
    syntax: &WeekSyntax,
    max_week: u32,
) -> Result<Extraction, ExtractError> {
    let mut extraction = Extraction::default();
    let mut found_rows = false;

    for (page_idx, page) in pages.iter().enumerate() {
        let Some(rows) = page.pointer(&layout.rows_pointer).and_then(Value::as_array) else {
            debug!("Page {}: nothing at {}", page_idx, layout.rows_pointer);
            continue;
        };
        found_rows = true;

        for (row_idx, row) in rows.iter().enumerate() {
            match &layout.children_key {
                Some(key) => {
                    let Some(children) = row.get(key).and_then(Value::as_array) else {
                        continue;
                    };
                    for (child_idx, child) in children.iter().enumerate() {
                        let scope = RowScope { row: child, group: Some(row) };
                        let origin = format!("page {} group {} row {}", page_idx, row_idx, child_idx);
                        extraction.rows_seen += 1;
                        if let Some(record) = read_row(layout, scope, origin, syntax, max_week) {
                            extraction.records.push(record);
                        }
                    }
                }
                None => {
                    let scope = RowScope { row, group: None };
                    let origin = format!("page {} row {}", page_idx, row_idx);
                    extraction.rows_seen += 1;
                    if let Some(record) = read_row(layout, scope, origin, syntax, max_week) {
                        extraction.records.push(record);
                    }
                }
            }
        }
    }

    if !found_rows {
        return Err(ExtractError::NoRows { pointer: layout.rows_pointer.clone() });
    }

    Ok(extraction)
}

#[derive(Clone, Copy)]
struct RowScope<'a> {
    row: &'a Value,
    group: Option<&'a Value>,
}

impl<'a> RowScope<'a> {
    fn value(&self, key: &str) -> Option<&'a Value> {
        let own = self.row.get(key).filter(|v| !v.is_null());
        own.or_else(|| self.group.and_then(|g| g.get(key)).filter(|v| !v.is_null()))
    }

    fn text(&self, key: &str, separator: &str) -> Option<String> {
        self.value(key).and_then(|v| value_text(v, separator))
    }
}

/// Display text of a JSON scalar or array of scalars; blank → `None`.
fn value_text(value: &Value, separator: &str) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(|v| value_text(v, separator))
            .collect::<Vec<_>>()
            .join(separator),
        _ => return None,
    };
    if text.is_empty() { None } else { Some(text) }
}

fn read_row(
    layout: &JsonRowLayout,
    scope: RowScope<'_>,
    origin: String,
    syntax: &WeekSyntax,
    max_week: u32,
) -> Option<RawRecord> {
    let fields = &layout.fields;
    let sep = layout.teacher_separator.as_str();

    let name = scope.text(&fields.name, sep);
    let teacher = scope.text(&fields.teacher, sep);
    let room = scope.text(&fields.room, sep);
    let weekday = scope.text(&fields.weekday, sep);
    let week_text = scope.text(&fields.weeks, sep);
    let sections = read_sections(&fields.sections, scope, sep);

    let missing = [
        ("name", name.is_some()),
        ("weekday", weekday.is_some()),
        ("weeks", week_text.is_some()),
        ("sections", sections.is_some()),
        ("teacher", teacher.is_some() || !layout.require_all_fields),
        ("room", room.is_some() || !layout.require_all_fields),
    ]
    .into_iter()
    .find(|(_, present)| !present);

    if let Some((field, _)) = missing {
        debug!("{}: missing {}, skipped", origin, field);
        return None;
    }

    let campus = fields
        .campus
        .as_deref()
        .and_then(|key| scope.text(key, sep))
        .or_else(|| layout.default_campus.clone());

    Some(RawRecord {
        name,
        teacher,
        position: room,
        campus,
        day: weekday.as_deref().and_then(leading_number),
        weeks: parse_weeks(week_text.as_deref(), syntax, max_week),
        sections,
        origin,
    })
}

fn read_sections(fields: &SectionFields, scope: RowScope<'_>, sep: &str) -> Option<SectionSpan> {
    match fields {
        SectionFields::Separate { start, end } => {
            let start = scope.text(start, sep)?;
            let end = scope.text(end, sep)?;
            Some(parse_section_pair(Some(&start), Some(&end)))
        }
        SectionFields::Combined(key) => {
            let text = scope.text(key, sep)?;
            Some(parse_sections(Some(&text)))
        }
    }
}

fn leading_number(text: &str) -> Option<u32> {
    let digits: String = text.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kblist_layout() -> JsonRowLayout {
        JsonRowLayout {
            rows_pointer: "/kbList".into(),
            children_key: None,
            fields: JsonFieldMap {
                name: "kcmc".into(),
                teacher: "xm".into(),
                room: "cdmc".into(),
                weekday: "xqj".into(),
                weeks: "zcd".into(),
                sections: SectionFields::Combined("jc".into()),
                campus: None,
            },
            require_all_fields: true,
            teacher_separator: "、".into(),
            default_campus: None,
        }
    }

    fn extract(layout: &JsonRowLayout, payload: Value) -> Result<Extraction, ExtractError> {
        extract_rows(layout, &[payload], &WeekSyntax::default(), 20)
    }

    #[test]
    fn test_reads_abbreviated_fields() {
        let payload = json!({ "kbList": [
            { "kcmc": "高等数学", "xm": "王老师", "cdmc": "A101", "xqj": "2", "jc": "3-4节", "zcd": "1-8周" }
        ]});
        let out = extract(&kblist_layout(), payload).unwrap();
        assert_eq!(out.rows_seen, 1);
        let record = &out.records[0];
        assert_eq!(record.name.as_deref(), Some("高等数学"));
        assert_eq!(record.day, Some(2));
        assert_eq!(record.sections, Some(SectionSpan::Range { start: 3, end: 4 }));
        assert_eq!(record.weeks.len(), 8);
    }

    #[test]
    fn test_row_missing_required_field_is_skipped() {
        let payload = json!({ "kbList": [
            { "kcmc": "英语", "cdmc": "B2", "xqj": 1, "jc": "1-2", "zcd": "1-4" },
            { "kcmc": "物理", "xm": "李", "cdmc": "B3", "xqj": 3, "jc": "5-6", "zcd": "1-4" }
        ]});
        let out = extract(&kblist_layout(), payload).unwrap();
        assert_eq!(out.rows_seen, 2);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].name.as_deref(), Some("物理"));
    }

    #[test]
    fn test_lenient_layout_keeps_row_without_teacher() {
        let mut layout = kblist_layout();
        layout.require_all_fields = false;
        let payload = json!({ "kbList": [
            { "kcmc": "英语", "cdmc": "B2", "xqj": 1, "jc": "1-2", "zcd": "1-4" }
        ]});
        let out = extract(&layout, payload).unwrap();
        assert_eq!(out.records.len(), 1);
        assert!(out.records[0].teacher.is_none());
    }

    #[test]
    fn test_teacher_array_joined() {
        let payload = json!({ "kbList": [
            { "kcmc": "实验", "xm": ["甲", "乙"], "cdmc": "Lab", "xqj": "5", "jc": "7", "zcd": "2" }
        ]});
        let out = extract(&kblist_layout(), payload).unwrap();
        assert_eq!(out.records[0].teacher.as_deref(), Some("甲、乙"));
    }

    #[test]
    fn test_nested_groups_supply_weekday() {
        let layout = JsonRowLayout {
            rows_pointer: "/response".into(),
            children_key: Some("data".into()),
            fields: JsonFieldMap {
                name: "courseName".into(),
                teacher: "teacherName".into(),
                room: "classRoom".into(),
                weekday: "week".into(),
                weeks: "weeks".into(),
                sections: SectionFields::Separate { start: "startSection".into(), end: "endSection".into() },
                campus: None,
            },
            ..kblist_layout()
        };
        let payload = json!({ "response": [
            { "week": 4, "data": [
                { "courseName": "C", "teacherName": "T", "classRoom": "R",
                  "startSection": "5", "endSection": "6", "weeks": "1-3,5" }
            ]}
        ]});
        let out = extract(&layout, payload).unwrap();
        let record = &out.records[0];
        assert_eq!(record.day, Some(4));
        assert_eq!(record.sections, Some(SectionSpan::Range { start: 5, end: 6 }));
        assert_eq!(record.weeks.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3, 5]);
    }

    #[test]
    fn test_campus_carried_with_default() {
        let mut layout = kblist_layout();
        layout.fields.campus = Some("xqmc".into());
        layout.default_campus = Some("校本部".into());
        let payload = json!({ "kbList": [
            { "kcmc": "A", "xm": "T", "cdmc": "R1", "xqj": 1, "jc": "0102", "zcd": "1", "xqmc": "东校区" },
            { "kcmc": "B", "xm": "T", "cdmc": "R2", "xqj": 1, "jc": "0304", "zcd": "1" }
        ]});
        let out = extract(&layout, payload).unwrap();
        assert_eq!(out.records[0].campus.as_deref(), Some("东校区"));
        assert_eq!(out.records[1].campus.as_deref(), Some("校本部"));
    }

    #[test]
    fn test_missing_row_array_is_structural() {
        let err = extract(&kblist_layout(), json!({ "code": 1 })).unwrap_err();
        assert!(matches!(err, ExtractError::NoRows { .. }));
    }

    #[test]
    fn test_empty_row_array_is_not_structural() {
        let out = extract(&kblist_layout(), json!({ "kbList": [] })).unwrap();
        assert_eq!(out.rows_seen, 0);
        assert!(out.records.is_empty());
    }
}
