//! Long-stop date (LSD) extraction from fee-arrangement text.
//!
//! Finance annotates deadlines inline as `(LSD: 31 Dec 2025)` or
//! `（LSD：2025年12月31日）`. A cell may carry several; the latest date wins.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

/// The chosen long-stop date and the fragment it was parsed from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LongStopDate {
    pub date: Option<NaiveDate>,
    pub raw: Option<String>,
}

impl LongStopDate {
    /// ISO `YYYY-MM-DD` form, as persisted.
    pub fn iso(&self) -> Option<String> {
        self.date.map(|d| d.format("%Y-%m-%d").to_string())
    }
}

fn annotation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)[(（]\s*LSD\s*[:：]\s*([^)）]+)[)）]").unwrap())
}

fn english_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d{1,2})(?:st|nd|rd|th)?\s+([A-Za-z]{3,9})\.?,?\s+(\d{4})").unwrap()
    })
}

fn chinese_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4})\s*年\s*(\d{1,2})\s*月\s*(\d{1,2})\s*日").unwrap())
}

fn iso_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4})-(\d{1,2})-(\d{1,2})").unwrap())
}

fn month_number(name: &str) -> Option<u32> {
    let lower = name.to_lowercase();
    let month = match lower.get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    // Reject words that merely start like a month ("marketing", "decade").
    const FULL: [&str; 12] = [
        "january", "february", "march", "april", "may", "june", "july", "august",
        "september", "october", "november", "december",
    ];
    let full = FULL[month as usize - 1];
    if full.starts_with(lower.as_str()) || lower == "sept" {
        Some(month)
    } else {
        None
    }
}

/// Parse one annotation body. Accepts `31 Dec 2025`, `1st January, 2026`,
/// `2025年12月31日` and `2025-12-31`.
pub fn parse_lsd_fragment(fragment: &str) -> Option<NaiveDate> {
    if let Some(c) = english_re().captures(fragment) {
        let day: u32 = c[1].parse().ok()?;
        let month = month_number(&c[2])?;
        let year: i32 = c[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    let numeric = chinese_re()
        .captures(fragment)
        .or_else(|| iso_re().captures(fragment))?;
    let year: i32 = numeric[1].parse().ok()?;
    let month: u32 = numeric[2].parse().ok()?;
    let day: u32 = numeric[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Find every LSD annotation in `text` and keep the latest parseable date.
///
/// Ties keep the first occurrence. When annotations exist but none parse, the
/// first fragment is kept as `raw` with no date so the text is not lost.
pub fn extract_lsd(text: &str) -> LongStopDate {
    let fragments: Vec<&str> = annotation_re()
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .collect();

    let latest = fragments
        .iter()
        .filter_map(|raw| parse_lsd_fragment(raw).map(|d| (d, *raw)))
        .fold(None, |best: Option<(NaiveDate, &str)>, (date, raw)| match best {
            Some((b, _)) if b >= date => best,
            _ => Some((date, raw)),
        });

    match latest {
        Some((date, raw)) => LongStopDate {
            date: Some(date),
            raw: Some(raw.to_string()),
        },
        None => LongStopDate {
            date: None,
            raw: fragments.first().map(|f| f.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_latest_of_two_dates_wins() {
        let lsd = extract_lsd(
            "(a) Signing - 100 (LSD: 31 Dec 2025)\n(b) Listing - 200 (LSD: 30 June 2026)",
        );
        assert_eq!(lsd.date, Some(ymd(2026, 6, 30)));
        assert_eq!(lsd.raw.as_deref(), Some("30 June 2026"));
        assert_eq!(lsd.iso().as_deref(), Some("2026-06-30"));
    }

    #[test]
    fn test_fragment_formats() {
        assert_eq!(parse_lsd_fragment("31 Dec 2025"), Some(ymd(2025, 12, 31)));
        assert_eq!(parse_lsd_fragment("1st January, 2026"), Some(ymd(2026, 1, 1)));
        assert_eq!(parse_lsd_fragment("15 Sept. 2025"), Some(ymd(2025, 9, 15)));
        assert_eq!(parse_lsd_fragment("2025年3月1日"), Some(ymd(2025, 3, 1)));
        assert_eq!(parse_lsd_fragment("2025-03-01"), Some(ymd(2025, 3, 1)));
    }

    #[test]
    fn test_invalid_dates_rejected() {
        assert_eq!(parse_lsd_fragment("31 Feb 2025"), None);
        assert_eq!(parse_lsd_fragment("12 Decade 2025"), None);
        assert_eq!(parse_lsd_fragment("TBC"), None);
    }

    #[test]
    fn test_fullwidth_annotation() {
        let lsd = extract_lsd("（LSD：2025年12月31日）");
        assert_eq!(lsd.date, Some(ymd(2025, 12, 31)));
        assert_eq!(lsd.raw.as_deref(), Some("2025年12月31日"));
    }

    #[test]
    fn test_no_annotation() {
        assert_eq!(extract_lsd("(a) Signing - 100"), LongStopDate::default());
    }

    #[test]
    fn test_unparseable_keeps_raw() {
        let lsd = extract_lsd("(LSD: to be agreed)");
        assert_eq!(lsd.date, None);
        assert_eq!(lsd.raw.as_deref(), Some("to be agreed"));
    }

    #[test]
    fn test_tie_keeps_first_fragment() {
        let lsd = extract_lsd("(LSD: 31 Dec 2025) (LSD: 2025-12-31)");
        assert_eq!(lsd.raw.as_deref(), Some("31 Dec 2025"));
    }
}
