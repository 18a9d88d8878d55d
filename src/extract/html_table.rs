//! Grid-shaped schedule pages: rows are periods, the last seven cells are
//! Monday..Sunday, and each cell holds zero or more course blocks.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;

use crate::error::ExtractError;
use crate::models::{RawRecord, SectionSpan};
use crate::parsers::{parse_sections, parse_weeks, WeekSyntax};

use super::Extraction;

static RE_BR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("invalid regex: br"));

static RE_SECTION_BRACKET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\[【]([^\[\]【】]*)[\]】]").expect("invalid regex: section bracket")
});

static RE_LEADING_CODES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\d-]+").expect("invalid regex: leading codes"));

static RE_INLINE_COURSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(.+?)\s+([^\s(（]+)\s*[(（]([^()（）]+)[)）]").expect("invalid regex: inline course")
});

static RE_FIRST_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("invalid regex: number"));

const DAY_COLUMNS: usize = 7;

// ── Layout ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtmlTableLayout {
    /// Tried in order; the first match is the schedule table.
    #[serde(default = "default_table_selectors")]
    pub table_selectors: Vec<String>,

    #[serde(default = "default_row_selector")]
    pub row_selector: String,

    /// Block container inside a cell (e.g. `div.kbcontent`); the cell itself when unset.
    #[serde(default)]
    pub block_selector: Option<String>,

    /// Separates several courses sharing one container.
    #[serde(default = "default_block_separator")]
    pub block_separator: String,

    #[serde(default)]
    pub format: BlockFormat,

    #[serde(default)]
    pub labels: LineLabels,

    /// Read the weekday from `hash-D-n` container identities.
    #[serde(default = "default_true")]
    pub day_from_identity: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockFormat {
    /// Name line, then lines tagged by a label attribute.
    #[default]
    Labeled,
    /// One course per line: `name teacher (weeks room)`.
    Inline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineLabels {
    pub attr: String,
    pub teacher: Vec<String>,
    pub room: Vec<String>,
    pub schedule: Vec<String>,
}

impl Default for LineLabels {
    fn default() -> Self {
        Self {
            attr: "title".to_string(),
            teacher: vec!["老师".into(), "教师".into(), "teacher".into()],
            room: vec!["教室".into(), "地点".into(), "room".into()],
            schedule: vec!["周次(节次)".into(), "周次".into(), "weeks".into()],
        }
    }
}

impl Default for HtmlTableLayout {
    fn default() -> Self {
        Self {
            table_selectors: default_table_selectors(),
            row_selector: default_row_selector(),
            block_selector: None,
            block_separator: default_block_separator(),
            format: BlockFormat::default(),
            labels: LineLabels::default(),
            day_from_identity: true,
        }
    }
}

fn default_table_selectors() -> Vec<String> {
    vec!["#kbtable".to_string(), "table".to_string()]
}
fn default_row_selector() -> String {
    "tr".to_string()
}
fn default_block_separator() -> String {
    "-{5,}".to_string()
}
fn default_true() -> bool {
    true
}

// ── Extraction ────────────────────────────────────────────────────────────────

pub fn extract_table(
    layout: &HtmlTableLayout,
    html: &str,
    syntax: &WeekSyntax,
    max_week: u32,
) -> Result<Extraction, ExtractError> {
    let doc = Html::parse_document(html);
    let table = find_table(&doc, &layout.table_selectors)?;
    let row_sel = parse_selector(&layout.row_selector)?;
    let block_sel = layout.block_selector.as_deref().map(parse_selector).transpose()?;
    let separator = Regex::new(&layout.block_separator)?;

    let mut seen_identities = HashSet::new();
    let mut extraction = Extraction::default();

    for (row_idx, tr) in table.select(&row_sel).enumerate() {
        let (anchors, days) = split_row(tr);
        let period = anchor_period(&anchors);

        for (col_idx, cell) in days.iter().enumerate() {
            let containers: Vec<ElementRef> = match &block_sel {
                Some(sel) => cell.select(sel).collect(),
                None => vec![*cell],
            };

            for container in containers {
                let identity = container
                    .value()
                    .attr("name")
                    .or_else(|| container.value().attr("id"));

                // A multi-period course repeats in every row it spans.
                if let Some(id) = identity {
                    if !seen_identities.insert(id.to_string()) {
                        continue;
                    }
                }

                let day = identity
                    .filter(|_| layout.day_from_identity)
                    .and_then(day_from_identity)
                    .unwrap_or(col_idx as u32 + 1);

                let cell_ctx = CellContext {
                    day,
                    period,
                    origin: format!("r{}c{}", row_idx, col_idx),
                };
                read_container(layout, &container.inner_html(), &separator, &cell_ctx, syntax, max_week, &mut extraction);
            }
        }
    }

    Ok(extraction)
}

fn find_table<'a>(doc: &'a Html, candidates: &[String]) -> Result<ElementRef<'a>, ExtractError> {
    for candidate in candidates {
        let sel = parse_selector(candidate)?;
        if let Some(table) = doc.select(&sel).next() {
            return Ok(table);
        }
    }
    Err(ExtractError::NoTable)
}

fn parse_selector(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|e| ExtractError::InvalidSelector(format!("{}: {:?}", selector, e)))
}

/// Split a row's direct cells into period-anchor cells and the 7 weekday cells.
fn split_row(tr: ElementRef<'_>) -> (Vec<ElementRef<'_>>, Vec<ElementRef<'_>>) {
    let cells: Vec<ElementRef> = tr.children().filter_map(ElementRef::wrap).collect();
    let mut anchors: Vec<ElementRef> = cells.iter().copied().filter(|c| c.value().name() == "th").collect();
    let mut tds: Vec<ElementRef> = cells.into_iter().filter(|c| c.value().name() == "td").collect();

    if tds.len() > DAY_COLUMNS {
        let days = tds.split_off(tds.len() - DAY_COLUMNS);
        anchors.extend(tds);
        (anchors, days)
    } else {
        (anchors, tds)
    }
}

fn anchor_period(anchors: &[ElementRef<'_>]) -> Option<u32> {
    anchors.iter().find_map(|cell| {
        let text: String = cell.text().collect();
        RE_FIRST_NUMBER.find(&text).and_then(|m| m.as_str().parse().ok())
    })
}

/// `EBC6F963...-2-1` → 2
fn day_from_identity(identity: &str) -> Option<u32> {
    let parts: Vec<&str> = identity.split('-').collect();
    if parts.len() < 3 {
        return None;
    }
    parts[1].trim().parse().ok().filter(|d| (1..=7).contains(d))
}

struct CellContext {
    day: u32,
    period: Option<u32>,
    origin: String,
}

fn read_container(
    layout: &HtmlTableLayout,
    inner_html: &str,
    separator: &Regex,
    ctx: &CellContext,
    syntax: &WeekSyntax,
    max_week: u32,
    extraction: &mut Extraction,
) {
    let mut seen_blocks = HashSet::new();

    for (block_idx, block) in separator.split(inner_html).enumerate() {
        let block_text = clean_text(&Html::parse_fragment(block).root_element().text().collect::<String>());
        if block_text.is_empty() || !seen_blocks.insert(block_text) {
            continue;
        }

        let origin = format!("{}#{}", ctx.origin, block_idx);
        match layout.format {
            BlockFormat::Labeled => {
                let blocks = read_labeled_blocks(block, &layout.labels);
                let single = blocks.len() == 1;
                for (course_idx, course) in blocks.into_iter().enumerate() {
                    extraction.rows_seen += 1;
                    let course_origin = if single { origin.clone() } else { format!("{}.{}", origin, course_idx) };
                    if let Some(record) = course.into_record(ctx, course_origin, syntax, max_week) {
                        extraction.records.push(record);
                    }
                }
            }
            BlockFormat::Inline => {
                for (line_idx, line) in RE_BR.split(block).enumerate() {
                    let text = clean_text(&visible_text(&Html::parse_fragment(line), false));
                    if text.is_empty() {
                        continue;
                    }
                    extraction.rows_seen += 1;
                    let line_origin = format!("{}.{}", origin, line_idx);
                    match read_inline_line(&text) {
                        Some(block) => {
                            if let Some(record) = block.into_record(ctx, line_origin, syntax, max_week) {
                                extraction.records.push(record);
                            }
                        }
                        None => debug!("{}: unrecognised course line {:?}", line_origin, text),
                    }
                }
            }
        }
    }
}

// ── Blocks ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct CourseBlock {
    name: Option<String>,
    teacher: Option<String>,
    room: Option<String>,
    /// Week text, optionally followed by a bracketed section group.
    schedule: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Teacher,
    Room,
    Schedule,
}

impl CourseBlock {
    fn into_record(self, ctx: &CellContext, origin: String, syntax: &WeekSyntax, max_week: u32) -> Option<RawRecord> {
        let Some(name) = self.name else {
            debug!("{}: block without a course name", origin);
            return None;
        };

        let (week_text, section_text) = match self.schedule.as_deref() {
            Some(schedule) => split_schedule(schedule),
            None => (String::new(), None),
        };

        let sections = match section_text {
            Some(text) => Some(parse_sections(Some(&text))),
            None => ctx.period.map(SectionSpan::single),
        };

        if sections.is_none() {
            debug!("{}: {} has no section information", origin, name);
            return None;
        }

        Some(RawRecord {
            name: Some(name),
            teacher: self.teacher,
            position: self.room,
            campus: None,
            day: Some(ctx.day),
            weeks: parse_weeks(Some(&week_text), syntax, max_week),
            sections,
            origin,
        })
    }
}

/// Courses in one block. Without a separator, several courses may follow each
/// other line by line; an unlabeled line after labeled ones starts the next course.
fn read_labeled_blocks(block_html: &str, labels: &LineLabels) -> Vec<CourseBlock> {
    let mut blocks = Vec::new();
    let mut current = CourseBlock::default();
    let mut labeled = false;

    for line in RE_BR.split(block_html) {
        let fragment = Html::parse_fragment(line);
        let text = clean_text(&visible_text(&fragment, false));
        if text.is_empty() {
            continue;
        }

        match line_kind(&fragment, labels) {
            Some(kind) => {
                labeled = true;
                match kind {
                    LineKind::Teacher => current.teacher = Some(text),
                    LineKind::Room => current.room = strip_leading_codes(&text),
                    LineKind::Schedule => current.schedule = Some(text),
                }
            }
            None if current.name.is_none() => current.name = Some(course_name(&fragment, text)),
            None if has_concealed(&fragment) => {
                // Fallback: room text preceded by concealed period codes.
                if current.room.is_none() {
                    current.room = strip_leading_codes(&text);
                }
            }
            None if labeled => {
                blocks.push(std::mem::take(&mut current));
                labeled = false;
                current.name = Some(course_name(&fragment, text));
            }
            None => {}
        }
    }

    if blocks.is_empty() || current.name.is_some() || labeled {
        blocks.push(current);
    }
    blocks
}

fn course_name(fragment: &Html, text: String) -> String {
    // Adjustment markers live in <span>s next to the name.
    let bare = clean_text(&visible_text(fragment, true));
    if bare.is_empty() { text } else { bare }
}

fn read_inline_line(text: &str) -> Option<CourseBlock> {
    let caps = RE_INLINE_COURSE.captures(text)?;
    let inside = caps[3].trim();
    let (weeks, room) = inside.rsplit_once(char::is_whitespace)?;

    Some(CourseBlock {
        name: Some(caps[1].trim().to_string()),
        teacher: Some(caps[2].trim().to_string()),
        room: Some(room.trim().to_string()).filter(|r| !r.is_empty()),
        schedule: Some(weeks.trim().to_string()),
    })
}

fn line_kind(fragment: &Html, labels: &LineLabels) -> Option<LineKind> {
    fragment
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter_map(|el| el.value().attr(&labels.attr))
        .find_map(|label| {
            let label = label.trim();
            if labels.teacher.iter().any(|l| l == label) {
                Some(LineKind::Teacher)
            } else if labels.room.iter().any(|l| l == label) {
                Some(LineKind::Room)
            } else if labels.schedule.iter().any(|l| l == label) {
                Some(LineKind::Schedule)
            } else {
                None
            }
        })
}

/// "1-18(周)[06-07节]" → ("1-18(周)", Some("06-07节")).
fn split_schedule(text: &str) -> (String, Option<String>) {
    match RE_SECTION_BRACKET.captures_iter(text).last() {
        Some(caps) => {
            let start = caps.get(0).map_or(text.len(), |m| m.start());
            (text[..start].trim().to_string(), Some(caps[1].trim().to_string()))
        }
        None => (text.trim().to_string(), None),
    }
}

// ── Text helpers ──────────────────────────────────────────────────────────────

fn is_concealed(el: ElementRef<'_>) -> bool {
    let value = el.value();
    if value.attr("hidden").is_some() {
        return true;
    }
    value.attr("style").is_some_and(|style| {
        let style: String = style.chars().filter(|c| !c.is_whitespace()).collect();
        style.to_lowercase().contains("display:none")
    })
}

fn has_concealed(fragment: &Html) -> bool {
    fragment
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .any(is_concealed)
}

/// Text not hidden by `display:none`; optionally also skipping `<span>` content.
fn visible_text(fragment: &Html, skip_spans: bool) -> String {
    let mut out = String::new();
    for node in fragment.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|el| is_concealed(el) || (skip_spans && el.value().name() == "span"));
        if !hidden {
            out.push_str(text);
        }
    }
    out
}

/// Drop zero-width characters, turn NBSP into spaces, collapse whitespace.
fn clean_text(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}'))
        .map(|c| if c == '\u{A0}' { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_leading_codes(text: &str) -> Option<String> {
    let room = RE_LEADING_CODES.replace(text, "").trim().to_string();
    if room.is_empty() { None } else { Some(room) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn extract(layout: &HtmlTableLayout, html: &str) -> Extraction {
        extract_table(layout, html, &WeekSyntax::default(), 20).unwrap()
    }

    fn labeled_block(name: &str, teacher: &str, room: &str, schedule: &str) -> String {
        format!(
            r#"{}<br><font title="老师">{}</font><br><font title="教室">{}</font><br><font title="周次(节次)">{}</font>"#,
            name, teacher, room, schedule
        )
    }

    fn empty_cells(n: usize) -> String {
        "<td></td>".repeat(n)
    }

    #[test]
    fn test_single_labeled_block() {
        let html = format!(
            "<table><tr><td>{}</td>{}</tr><tr>{}</tr></table>",
            labeled_block("Calculus", "Prof. X", "Room 101", "1-16周[1-2节]"),
            empty_cells(6),
            empty_cells(7),
        );
        let out = extract(&HtmlTableLayout::default(), &html);
        assert_eq!(out.records.len(), 1);
        let record = &out.records[0];
        assert_eq!(record.name.as_deref(), Some("Calculus"));
        assert_eq!(record.teacher.as_deref(), Some("Prof. X"));
        assert_eq!(record.position.as_deref(), Some("Room 101"));
        assert_eq!(record.day, Some(1));
        assert_eq!(record.sections, Some(SectionSpan::Range { start: 1, end: 2 }));
        assert_eq!(record.weeks, (1..=16).collect::<BTreeSet<u32>>());
    }

    #[test]
    fn test_kbcontent_dedup_and_identity_weekday() {
        let block = format!(
            r#"<div class="kbcontent" name="ABC-3-1">{}-----<br>{}</div><div class="kbcontent1">visible copy</div>"#,
            labeled_block("数据库", "张", "N101", "1-18(周)[06-07节]"),
            labeled_block("数据库", "张", "N102", "1-9(周)[08-09节]"),
        );
        // Same container repeats in the next row; day column says Monday but the name says Wednesday.
        let html = format!(
            r#"<table id="kbtable"><tr><th>第一大节</th><td>{b}</td>{e}</tr><tr><th>第二大节</th><td>{b}</td>{e}</tr></table>"#,
            b = block,
            e = empty_cells(6),
        );
        let layout = HtmlTableLayout {
            block_selector: Some("div.kbcontent".into()),
            ..HtmlTableLayout::default()
        };
        let out = extract(&layout, &html);
        assert_eq!(out.records.len(), 2);
        assert!(out.records.iter().all(|r| r.day == Some(3)));
        assert_eq!(out.records[0].sections, Some(SectionSpan::Range { start: 6, end: 7 }));
        assert_eq!(out.records[1].position.as_deref(), Some("N102"));
        assert_eq!(out.records[1].weeks, (1..=9).collect::<BTreeSet<u32>>());
    }

    #[test]
    fn test_courses_split_by_line_breaks_only() {
        let block = format!(
            r#"<div class="kbcontent">{}<br>{}</div>"#,
            labeled_block("A", "甲", "R1", "1-4(周)[1-2节]"),
            labeled_block("B", "乙", "R2", "5-8(周)[3-4节]"),
        );
        let html = format!("<table><tr><td>{}</td>{}</tr></table>", block, empty_cells(6));
        let layout = HtmlTableLayout {
            block_selector: Some("div.kbcontent".into()),
            ..HtmlTableLayout::default()
        };
        let out = extract(&layout, &html);
        assert_eq!(out.rows_seen, 2);
        assert_eq!(out.records.len(), 2);

        let (a, b) = (&out.records[0], &out.records[1]);
        assert_eq!(a.name.as_deref(), Some("A"));
        assert_eq!(a.teacher.as_deref(), Some("甲"));
        assert_eq!(a.sections, Some(SectionSpan::Range { start: 1, end: 2 }));
        assert_eq!(a.weeks, BTreeSet::from([1, 2, 3, 4]));
        assert_eq!(b.name.as_deref(), Some("B"));
        assert_eq!(b.position.as_deref(), Some("R2"));
        assert_eq!(b.sections, Some(SectionSpan::Range { start: 3, end: 4 }));
        assert_eq!(b.weeks, BTreeSet::from([5, 6, 7, 8]));
    }

    #[test]
    fn test_concealed_room_fallback() {
        let block = concat!(
            r#"<div class="kbcontent" id="X-1-1">体育<span>&nbsp;O</span><br>"#,
            r#"<font title="老师">赵</font><br>"#,
            r#"<font style="display:none;">01-02</font><font style="display: none;">20</font>北院卓媒220<br>"#,
            r#"<font title="周次(节次)">2-16(周)(双)[01-02节]</font></div>"#,
        );
        let html = format!("<table><tr><td>{}</td>{}</tr></table>", block, empty_cells(6));
        let layout = HtmlTableLayout {
            block_selector: Some("div.kbcontent".into()),
            ..HtmlTableLayout::default()
        };
        let out = extract(&layout, &html);
        let record = &out.records[0];
        assert_eq!(record.name.as_deref(), Some("体育"));
        assert_eq!(record.position.as_deref(), Some("北院卓媒220"));
        assert_eq!(record.weeks, BTreeSet::from([2, 4, 6, 8, 10, 12, 14, 16]));
    }

    #[test]
    fn test_inline_rows_anchor_period() {
        let row = |period: u32, cell: &str| {
            format!(
                r#"<tr class="mykb"><td class="jc">上午</td><td class="jc">{}</td><td class="c"><ul>{}</ul></td>{}</tr>"#,
                period,
                cell,
                r#"<td class="c"></td>"#.repeat(6)
            )
        };
        let html = format!(
            "<table>{}{}</table>",
            row(1, "大学英语 陈 (1-16 A201)<br/>"),
            row(2, "大学英语 陈 (1-16 A201)")
        );
        let layout = HtmlTableLayout {
            row_selector: "tr.mykb".into(),
            format: BlockFormat::Inline,
            ..HtmlTableLayout::default()
        };
        let out = extract(&layout, &html);
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].sections, Some(SectionSpan::single(1)));
        assert_eq!(out.records[1].sections, Some(SectionSpan::single(2)));
        assert_eq!(out.records[0].teacher.as_deref(), Some("陈"));
        assert_eq!(out.records[0].position.as_deref(), Some("A201"));
    }

    #[test]
    fn test_block_without_sections_or_anchor_dropped() {
        let html = format!(
            r#"<table><tr><td>Ethics<br><font title="周次">1-4</font></td>{}</tr></table>"#,
            empty_cells(6)
        );
        let out = extract(&HtmlTableLayout::default(), &html);
        assert_eq!(out.rows_seen, 1);
        assert!(out.records.is_empty());
    }

    #[test]
    fn test_missing_table_is_structural() {
        let err = extract_table(&HtmlTableLayout::default(), "<p>login</p>", &WeekSyntax::default(), 20)
            .unwrap_err();
        assert!(matches!(err, ExtractError::NoTable));
    }

    #[test]
    fn test_split_schedule() {
        assert_eq!(split_schedule("1-18(周)[06-07节]"), ("1-18(周)".to_string(), Some("06-07节".to_string())));
        assert_eq!(split_schedule("1-16周"), ("1-16周".to_string(), None));
    }
}
