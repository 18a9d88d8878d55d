//! Period/section expressions → `SectionSpan`.

use crate::models::SectionSpan;

/// Parse a period expression.
///
/// `"1-2"` / `"第1-2节"` → `Range{1,2}`, `"5"` → `Range{5,5}`,
/// `"0304"` (fixed-width start/end code) → `Range{3,4}`,
/// `"1-2-3-4"` → `List([1,2,3,4])`.
///
/// Anything unusable falls back to `Range{1,1}` so one bad field never aborts
/// an import; the owning record may still be rejected on other grounds.
pub fn parse_sections(text: Option<&str>) -> SectionSpan {
    text.and_then(parse_strict).unwrap_or_default()
}

/// Combine separate start/end period codes (`ps`/`pe` style JSON fields).
/// A missing or unparseable end collapses to a single period.
pub fn parse_section_pair(start: Option<&str>, end: Option<&str>) -> SectionSpan {
    let start = start.and_then(leading_number);
    let end = end.and_then(leading_number);
    match (start, end) {
        (Some(start), Some(end)) => SectionSpan::Range { start, end },
        (Some(start), None) => SectionSpan::single(start),
        _ => SectionSpan::default(),
    }
}

fn parse_strict(text: &str) -> Option<SectionSpan> {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '第' | '节' | '[' | ']' | '(' | ')' | '（' | '）') && !c.is_whitespace())
        .map(|c| if matches!(c, '~' | '～' | '到' | '至') { '-' } else { c })
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    // Fixed-width "SSEE" code
    if cleaned.len() == 4 && cleaned.chars().all(|c| c.is_ascii_digit()) {
        let start = cleaned[..2].parse().ok()?;
        let end = cleaned[2..].parse().ok()?;
        return Some(SectionSpan::Range { start, end });
    }

    let parts = cleaned
        .split('-')
        .map(|p| p.parse::<u32>().ok())
        .collect::<Option<Vec<u32>>>()?;

    match parts.as_slice() {
        [single] => Some(SectionSpan::single(*single)),
        [start, end] => Some(SectionSpan::Range { start: *start, end: *end }),
        _ => Some(SectionSpan::List(parts)),
    }
}

fn leading_number(text: &str) -> Option<u32> {
    let digits: String = text
        .trim()
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u32, end: u32) -> SectionSpan {
        SectionSpan::Range { start, end }
    }

    #[test]
    fn test_dash_and_single_forms() {
        assert_eq!(parse_sections(Some("1-2")), range(1, 2));
        assert_eq!(parse_sections(Some("3-4节")), range(3, 4));
        assert_eq!(parse_sections(Some("第5-6节")), range(5, 6));
        assert_eq!(parse_sections(Some("06-07")), range(6, 7));
        assert_eq!(parse_sections(Some("7")), range(7, 7));
        assert_eq!(parse_sections(Some("11节")), range(11, 11));
    }

    #[test]
    fn test_fixed_width_code() {
        assert_eq!(parse_sections(Some("0304")), range(3, 4));
        assert_eq!(parse_sections(Some("0910")), range(9, 10));
        assert_eq!(parse_sections(Some("12")), range(12, 12));
    }

    #[test]
    fn test_enumeration() {
        let span = parse_sections(Some("1-2-3-4节"));
        assert_eq!(span, SectionSpan::List(vec![1, 2, 3, 4]));
        assert_eq!(span.bounds(), Some((1, 4)));
    }

    #[test]
    fn test_invalid_falls_back_to_first_period() {
        assert_eq!(parse_sections(None), range(1, 1));
        assert_eq!(parse_sections(Some("")), range(1, 1));
        assert_eq!(parse_sections(Some("上午")), range(1, 1));
        assert_eq!(parse_sections(Some("1-")), range(1, 1));
    }

    #[test]
    fn test_reversed_range_kept_for_caller_to_reject() {
        assert_eq!(parse_sections(Some("4-2")), range(4, 2));
    }

    #[test]
    fn test_section_pair() {
        assert_eq!(parse_section_pair(Some("3"), Some("4")), range(3, 4));
        assert_eq!(parse_section_pair(Some("09"), None), range(9, 9));
        assert_eq!(parse_section_pair(None, Some("4")), range(1, 1));
    }
}
