pub mod cleaner;
pub mod html_table;
pub mod json_rows;

use serde::{Deserialize, Serialize};

use crate::error::ExtractError;
use crate::models::{PayloadKind, RawPayload, RawRecord};
use crate::parsers::WeekSyntax;

pub use self::cleaner::{clean_records, Fallbacks};
pub use self::html_table::HtmlTableLayout;
pub use self::json_rows::JsonRowLayout;

// ── Source variant ────────────────────────────────────────────────────────────

/// Extraction strategy, picked from institution configuration before the
/// payload is looked at.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleSource {
    JsonRows(JsonRowLayout),
    HtmlTable(HtmlTableLayout),
}

impl ScheduleSource {
    pub fn payload_kind(&self) -> PayloadKind {
        match self {
            ScheduleSource::JsonRows(_) => PayloadKind::Json,
            ScheduleSource::HtmlTable(_) => PayloadKind::Html,
        }
    }
}

/// Raw records plus how many rows/blocks were looked at.
#[derive(Debug, Default)]
pub struct Extraction {
    pub records: Vec<RawRecord>,
    pub rows_seen: usize,
}

pub fn extract(
    source: &ScheduleSource,
    payload: &RawPayload,
    syntax: &WeekSyntax,
    max_week: u32,
) -> Result<Extraction, ExtractError> {
    match (source, payload) {
        (ScheduleSource::JsonRows(layout), RawPayload::Json { pages }) => {
            json_rows::extract_rows(layout, pages, syntax, max_week)
        }
        (ScheduleSource::HtmlTable(layout), RawPayload::Html(html)) => {
            html_table::extract_table(layout, html, syntax, max_week)
        }
        (source, payload) => Err(ExtractError::PayloadMismatch {
            expected: source.payload_kind(),
            found: payload.kind(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_kind_mismatch() {
        let source = ScheduleSource::HtmlTable(HtmlTableLayout::default());
        let payload = RawPayload::json(serde_json::json!({}));
        let err = extract(&source, &payload, &WeekSyntax::default(), 20).unwrap_err();
        assert!(matches!(
            err,
            ExtractError::PayloadMismatch { expected: PayloadKind::Html, found: PayloadKind::Json }
        ));
        assert_eq!(err.to_string(), "payload is json, expected html");
    }

    #[test]
    fn test_source_from_toml_shape() {
        let source: ScheduleSource = serde_json::from_value(serde_json::json!({
            "kind": "json_rows",
            "rows_pointer": "/kbList",
            "fields": {
                "name": "kcmc", "teacher": "xm", "room": "cdmc", "weekday": "xqj",
                "weeks": "zcd", "sections": { "combined": "jc" }
            }
        }))
        .unwrap();
        match source {
            ScheduleSource::JsonRows(layout) => {
                assert!(layout.require_all_fields);
                assert_eq!(layout.teacher_separator, "、");
            }
            ScheduleSource::HtmlTable(_) => panic!("wrong variant"),
        }
    }
}
