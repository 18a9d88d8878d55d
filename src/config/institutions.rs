use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::extract::html_table::{BlockFormat, LineLabels};
use crate::extract::json_rows::{JsonFieldMap, SectionFields};
use crate::extract::{HtmlTableLayout, JsonRowLayout, ScheduleSource};
use crate::merge::MergeOptions;
use crate::models::TermSelection;
use crate::parsers::WeekSyntax;

/// Everything the pipeline needs to know about one portal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstitutionConfig {
    pub name: String,
    pub source: ScheduleSource,

    #[serde(default)]
    pub weeks: WeekSyntax,

    /// Overrides `pipeline.max_week` for this institution.
    #[serde(default)]
    pub max_week: Option<u32>,

    #[serde(default)]
    pub merge: MergeOptions,

    #[serde(default)]
    pub endpoint: Option<EndpointConfig>,
}

impl InstitutionConfig {
    pub fn max_week(&self, default: u32) -> u32 {
        self.max_week.unwrap_or(default)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub url: String,

    #[serde(default)]
    pub method: HttpMethod,

    /// Query (GET) or form (POST) parameters. Values may use `{year}`,
    /// `{term}` and `{week}` placeholders.
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// Fetch one page per week, weeks `1..=n`.
    #[serde(default)]
    pub per_week: Option<u32>,
}

impl EndpointConfig {
    pub fn render_params(&self, selection: &TermSelection, week: Option<u32>) -> Vec<(String, String)> {
        let week = week.map(|w| w.to_string()).unwrap_or_default();
        self.params
            .iter()
            .map(|(key, value)| {
                let value = value
                    .replace("{year}", &selection.year)
                    .replace("{term}", &selection.term)
                    .replace("{week}", &week);
                (key.clone(), value)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

// ── Lookup ───────────────────────────────────────────────────────────────────

/// Configured entry first, then the built-in preset.
pub fn resolve(id: &str, configured: &HashMap<String, InstitutionConfig>) -> Option<InstitutionConfig> {
    configured
        .get(id)
        .cloned()
        .or_else(|| presets().remove(id))
}

/// Sorted ids of every configured and preset institution.
pub fn known_ids(configured: &HashMap<String, InstitutionConfig>) -> Vec<String> {
    let mut ids: Vec<String> = presets().into_keys().chain(configured.keys().cloned()).collect();
    ids.sort();
    ids.dedup();
    ids
}

// ── Presets ──────────────────────────────────────────────────────────────────

pub fn presets() -> HashMap<String, InstitutionConfig> {
    let mut map = HashMap::new();

    map.insert(
        "hnzy".to_string(),
        InstitutionConfig {
            name: "河南职业技术学院".to_string(),
            source: ScheduleSource::JsonRows(JsonRowLayout {
                rows_pointer: "/response".to_string(),
                children_key: Some("data".to_string()),
                fields: JsonFieldMap {
                    name: "courseName".to_string(),
                    teacher: "teacherName".to_string(),
                    room: "classRoom".to_string(),
                    weekday: "week".to_string(),
                    weeks: "weeks".to_string(),
                    sections: SectionFields::Separate {
                        start: "startSection".to_string(),
                        end: "endSection".to_string(),
                    },
                    campus: None,
                },
                require_all_fields: true,
                teacher_separator: "、".to_string(),
                default_campus: None,
            }),
            weeks: WeekSyntax::default(),
            max_week: None,
            merge: MergeOptions::default(),
            endpoint: Some(EndpointConfig {
                url: "https://one.hnzj.edu.cn/kcb/api/course".to_string(),
                method: HttpMethod::Get,
                params: params(&[("schoolYear", "{year}"), ("schoolTerm", "{term}"), ("week", "{week}")]),
                per_week: Some(20),
            }),
        },
    );

    let mmpt = kblist_institution(
        "茂名职业技术学院",
        SectionFields::Combined("jc".to_string()),
        "https://jwc.mmpt.edu.cn/kbcx/xskbcx_cxXsgrkb.html?gnmkdm=N2151",
        &[("xnm", "{year}"), ("xqm", "{term}")],
    );
    map.insert("mmpt".to_string(), mmpt.clone());
    map.insert(
        "mmzyjsxy".to_string(),
        InstitutionConfig { name: "茂名农林科技职业学院".to_string(), ..mmpt },
    );

    map.insert(
        "shzq".to_string(),
        kblist_institution(
            "上海中侨职业技术大学",
            SectionFields::Combined("jcs".to_string()),
            "https://jw.shzq.edu.cn/jwglxt/kbcx/xskbcx_cxXsgrkb.html?gnmkdm=N2151",
            &[("xnm", "{year}"), ("xqm", "{term}"), ("kzlx", "ck"), ("xsdm", "")],
        ),
    );

    map.insert(
        "hnsf".to_string(),
        InstitutionConfig {
            name: "河南师范大学".to_string(),
            source: ScheduleSource::JsonRows(JsonRowLayout {
                rows_pointer: "/data".to_string(),
                children_key: None,
                fields: JsonFieldMap {
                    name: "kcmc".to_string(),
                    teacher: "teaxms".to_string(),
                    room: "jxcdmc".to_string(),
                    weekday: "xq".to_string(),
                    weeks: "zc".to_string(),
                    sections: SectionFields::Separate { start: "ps".to_string(), end: "pe".to_string() },
                    campus: None,
                },
                require_all_fields: true,
                teacher_separator: "、".to_string(),
                default_campus: None,
            }),
            weeks: WeekSyntax::default(),
            max_week: None,
            merge: MergeOptions { coalesce_adjacent: false, sort_output: true },
            endpoint: Some(EndpointConfig {
                url: "https://jwc.htu.edu.cn/new/student/xsgrkb/getCalendarWeekDatas".to_string(),
                method: HttpMethod::Post,
                params: params(&[("xnxqdm", "{year}{term}")]),
                per_week: None,
            }),
        },
    );

    // Month calendar export; date-bounded, so imported from saved files.
    map.insert(
        "hnsf-month".to_string(),
        InstitutionConfig {
            name: "河南师范大学 (月历)".to_string(),
            source: ScheduleSource::JsonRows(JsonRowLayout {
                rows_pointer: "/data".to_string(),
                children_key: None,
                fields: JsonFieldMap {
                    name: "kcmc".to_string(),
                    teacher: "teaxms".to_string(),
                    room: "jxcdmc".to_string(),
                    weekday: "xq".to_string(),
                    weeks: "zc".to_string(),
                    sections: SectionFields::Combined("jcdm".to_string()),
                    campus: Some("xqmc".to_string()),
                },
                require_all_fields: false,
                teacher_separator: "、".to_string(),
                default_campus: Some("校本部".to_string()),
            }),
            weeks: WeekSyntax::default(),
            max_week: None,
            merge: MergeOptions { coalesce_adjacent: false, sort_output: true },
            endpoint: None,
        },
    );

    map.insert(
        "jyvtc".to_string(),
        InstitutionConfig {
            name: "江阴职业技术学院".to_string(),
            source: ScheduleSource::HtmlTable(HtmlTableLayout {
                table_selectors: vec!["table".to_string()],
                row_selector: "tr.mykb".to_string(),
                block_selector: None,
                format: BlockFormat::Inline,
                ..HtmlTableLayout::default()
            }),
            weeks: WeekSyntax::whole_string(),
            max_week: None,
            merge: MergeOptions { coalesce_adjacent: true, sort_output: false },
            endpoint: Some(EndpointConfig {
                url: "https://jwgl.jyvtc.edu.cn/jyvtcjw/frame/desk/showLessonScheduleDetail.action".to_string(),
                method: HttpMethod::Post,
                params: params(&[("weeks", ""), ("xnxq", "{year}-{term}")]),
                per_week: None,
            }),
        },
    );

    // Page-rendered grid; the saved page is imported.
    map.insert(
        "ynufe".to_string(),
        InstitutionConfig {
            name: "云南财经大学".to_string(),
            source: ScheduleSource::HtmlTable(HtmlTableLayout {
                table_selectors: vec!["#kbtable".to_string(), "table".to_string()],
                block_selector: Some("div.kbcontent".to_string()),
                labels: LineLabels::default(),
                ..HtmlTableLayout::default()
            }),
            weeks: WeekSyntax::default(),
            max_week: Some(25),
            merge: MergeOptions { coalesce_adjacent: true, sort_output: true },
            endpoint: None,
        },
    );

    map
}

fn kblist_institution(
    name: &str,
    sections: SectionFields,
    url: &str,
    form: &[(&str, &str)],
) -> InstitutionConfig {
    InstitutionConfig {
        name: name.to_string(),
        source: ScheduleSource::JsonRows(JsonRowLayout {
            rows_pointer: "/kbList".to_string(),
            children_key: None,
            fields: JsonFieldMap {
                name: "kcmc".to_string(),
                teacher: "xm".to_string(),
                room: "cdmc".to_string(),
                weekday: "xqj".to_string(),
                weeks: "zcd".to_string(),
                sections,
                campus: None,
            },
            require_all_fields: false,
            teacher_separator: "、".to_string(),
            default_campus: None,
        }),
        weeks: WeekSyntax::default(),
        max_week: None,
        merge: MergeOptions::default(),
        endpoint: Some(EndpointConfig {
            url: url.to_string(),
            method: HttpMethod::Post,
            params: params(form),
            per_week: None,
        }),
    }
}

fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PayloadKind;

    #[test]
    fn test_presets_cover_known_portals() {
        let presets = presets();
        for id in ["hnzy", "mmpt", "mmzyjsxy", "shzq", "hnsf", "hnsf-month", "jyvtc", "ynufe"] {
            assert!(presets.contains_key(id), "missing preset {}", id);
        }
        assert_eq!(presets["jyvtc"].source.payload_kind(), PayloadKind::Html);
        assert_eq!(presets["hnsf"].source.payload_kind(), PayloadKind::Json);
        assert!(presets["jyvtc"].merge.coalesce_adjacent);
    }

    #[test]
    fn test_configured_entry_overrides_preset() {
        let mut configured = HashMap::new();
        let mut custom = presets()["mmpt"].clone();
        custom.name = "Custom".to_string();
        configured.insert("mmpt".to_string(), custom);

        assert_eq!(resolve("mmpt", &configured).unwrap().name, "Custom");
        assert_eq!(resolve("shzq", &configured).unwrap().name, "上海中侨职业技术大学");
        assert!(resolve("nowhere", &configured).is_none());
    }

    #[test]
    fn test_known_ids_sorted_and_unique() {
        let mut configured = HashMap::new();
        configured.insert("hnzy".to_string(), presets()["hnzy"].clone());
        configured.insert("aaa".to_string(), presets()["hnzy"].clone());
        let ids = known_ids(&configured);
        assert_eq!(ids.first().map(String::as_str), Some("aaa"));
        assert_eq!(ids.iter().filter(|id| id.as_str() == "hnzy").count(), 1);
    }

    #[test]
    fn test_render_params_fills_placeholders() {
        let endpoint = presets()["hnzy"].endpoint.clone().unwrap();
        let selection = TermSelection { year: "2025-2026".into(), term: "1".into() };
        let rendered = endpoint.render_params(&selection, Some(7));
        assert!(rendered.contains(&("schoolYear".to_string(), "2025-2026".to_string())));
        assert!(rendered.contains(&("week".to_string(), "7".to_string())));
    }

    #[test]
    fn test_max_week_override() {
        let presets = presets();
        assert_eq!(presets["ynufe"].max_week(20), 25);
        assert_eq!(presets["hnzy"].max_week(20), 20);
    }

    #[test]
    fn test_institution_from_toml() {
        let toml = r#"
            name = "Test College"
            max_week = 18

            [source]
            kind = "html_table"
            row_selector = "tr.row"
            format = "inline"

            [weeks]
            qualifier_scope = "whole_string"

            [merge]
            coalesce_adjacent = true

            [endpoint]
            url = "https://example.edu/kb"
            method = "POST"
            params = { xnxq = "{year}-{term}" }
        "#;
        let cfg: InstitutionConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.max_week(20), 18);
        assert!(cfg.merge.coalesce_adjacent);
        assert_eq!(cfg.endpoint.unwrap().method, HttpMethod::Post);
        match cfg.source {
            ScheduleSource::HtmlTable(layout) => {
                assert_eq!(layout.row_selector, "tr.row");
                assert_eq!(layout.format, BlockFormat::Inline);
            }
            ScheduleSource::JsonRows(_) => panic!("wrong variant"),
        }
    }
}
