//! Milestone extraction from the fee-arrangement cell.
//!
//! The cell is a list of formatted runs. Strikethrough is the only signal
//! finance uses to mark a milestone as billed, so completion is derived from
//! how much of each line is struck rather than from any text marker.
//!
//! Parsing is best-effort: lines without a recognizable ordinal marker
//! (section headers, LSD notes, blank lines) are dropped silently.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// One formatted run of cell text with its resolved strike flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledRun {
    pub text: String,
    pub struck: bool,
}

impl StyledRun {
    pub fn new(text: impl Into<String>, struck: bool) -> Self {
        StyledRun {
            text: text.into(),
            struck,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Cny,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Cny => "CNY",
        }
    }
}

/// Whether the milestone pays a fixed sum or one that depends on later facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Fixed,
    Conditional,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Fixed => "fixed",
            TriggerType::Conditional => "conditional",
        }
    }
}

/// A milestone line parsed out of the fee-arrangement cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedMilestone {
    /// `(a)`, `(1)`; repeated labels become `(a)-2`, `(a)-3`, ...
    pub ordinal: String,
    pub title: String,
    pub description: String,
    pub amount_value: Option<f64>,
    pub amount_currency: Currency,
    pub is_percent: bool,
    pub percent_value: Option<f64>,
    /// 1-based position among the parsed lines.
    pub sort_order: usize,
    pub is_completed: bool,
    pub trigger_type: TriggerType,
    /// The trimmed source line.
    pub raw_fragment: String,
}

/// Tunables for milestone parsing.
#[derive(Debug, Clone, Copy)]
pub struct MilestoneOptions {
    /// Completed iff the struck share of non-whitespace characters is strictly above this.
    pub strike_threshold: f64,
    pub title_max_chars: usize,
}

impl Default for MilestoneOptions {
    fn default() -> Self {
        MilestoneOptions {
            strike_threshold: crate::types::DEFAULT_STRIKE_THRESHOLD,
            title_max_chars: crate::types::DEFAULT_TITLE_MAX_CHARS,
        }
    }
}

impl From<&crate::types::SyncConfig> for MilestoneOptions {
    fn from(config: &crate::types::SyncConfig) -> Self {
        MilestoneOptions {
            strike_threshold: config.strike_threshold,
            title_max_chars: config.title_max_chars,
        }
    }
}

const CONDITIONAL_KEYWORDS: &[&str] = &[
    "calculated",
    "adjust",
    "actual",
    "hourly",
    "depending",
    "depend on",
    "based on",
    "差额",
    "按小时",
    "根据",
];

fn ordinal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:[(（]\s*(?P<paren>[A-Za-z]{1,4}|\d{1,3})\s*[)）]|(?P<num>\d{1,3})[.)．]\s|(?P<letter>[A-Za-z])[.)]\s)\s*(?P<content>\S.*?)\s*$",
        )
        .unwrap()
    })
}

/// A trailing `(LSD: ...)` note; amounts are read from the text before it.
fn lsd_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\s*[(（]\s*LSD\s*[:：][^)）]*[)）]\s*$").unwrap())
}

fn percent_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[(（]?\s*(?P<value>\d+(?:\.\d+)?)\s*[%％]\s*[)）]?").unwrap()
    })
}

fn amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(?:^|[\s)）:：])(?P<tail>[-–—]\s*(?:US\$|USD|RMB|CNY|HK\$|\$|¥|￥|人民币)?\s*(?P<amount>\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)\s*元?)\s*$",
        )
        .unwrap()
    })
}

/// Parse the milestone cell into ordered, disambiguated milestones.
pub fn parse_milestones(runs: &[StyledRun], options: &MilestoneOptions) -> Vec<ParsedMilestone> {
    let text: String = runs.iter().map(|r| r.text.as_str()).collect();
    let strike_map: Vec<bool> = runs
        .iter()
        .flat_map(|r| std::iter::repeat(r.struck).take(r.text.chars().count()))
        .collect();

    let parsed: Vec<ParsedMilestone> = text
        .split('\n')
        .scan(0usize, |offset, line| {
            let start = *offset;
            *offset += line.chars().count() + 1;
            Some((start, line.strip_suffix('\r').unwrap_or(line)))
        })
        .filter_map(|(start, line)| {
            let struck = &strike_map[start..(start + line.chars().count()).min(strike_map.len())];
            parse_line(line, struck, options)
        })
        .enumerate()
        .map(|(idx, mut m)| {
            m.sort_order = idx + 1;
            m
        })
        .collect();

    disambiguate_ordinals(parsed)
}

/// Share of non-whitespace characters in `line` that are struck.
pub fn strike_ratio(line: &str, struck: &[bool]) -> f64 {
    let (total, hit) = line
        .chars()
        .zip(struck.iter().copied().chain(std::iter::repeat(false)))
        .filter(|(c, _)| !c.is_whitespace())
        .fold((0usize, 0usize), |(total, hit), (_, s)| {
            (total + 1, hit + usize::from(s))
        });
    if total == 0 {
        0.0
    } else {
        hit as f64 / total as f64
    }
}

fn parse_line(line: &str, struck: &[bool], options: &MilestoneOptions) -> Option<ParsedMilestone> {
    if line.trim().is_empty() {
        return None;
    }
    let caps = ordinal_re().captures(line)?;
    let label = caps
        .name("paren")
        .or_else(|| caps.name("num"))
        .or_else(|| caps.name("letter"))?
        .as_str()
        .to_lowercase();
    let ordinal = format!("({})", label);
    let content = caps.name("content")?.as_str();

    let percent_value = percent_re()
        .captures_iter(content)
        .last()
        .and_then(|c| c["value"].parse::<f64>().ok());

    let body = match lsd_suffix_re().find(content) {
        Some(m) => &content[..m.start()],
        None => content,
    };
    let amount = amount_re().captures(body).and_then(|c| {
        let tail = c.name("tail")?;
        let value = c["amount"].replace(',', "").parse::<f64>().ok()?;
        Some((tail.start(), value))
    });

    let title_source = match amount {
        Some((tail_start, _)) => &body[..tail_start],
        None => body,
    };
    let mut title: String = title_source
        .trim_end_matches(|c: char| c.is_whitespace() || "-–—:：,，;；".contains(c))
        .chars()
        .take(options.title_max_chars)
        .collect();
    if title.trim().is_empty() {
        title = format!("Milestone {}", ordinal);
    }

    let amount_value = amount.map(|(_, v)| v);
    let trigger_type = if is_conditional(content) || (amount_value.is_none() && percent_value.is_none())
    {
        TriggerType::Conditional
    } else {
        TriggerType::Fixed
    };

    Some(ParsedMilestone {
        ordinal,
        title,
        description: content.to_string(),
        amount_value,
        amount_currency: detect_currency(line),
        is_percent: percent_value.is_some(),
        percent_value,
        sort_order: 0,
        is_completed: strike_ratio(line, struck) > options.strike_threshold,
        trigger_type,
        raw_fragment: line.trim().to_string(),
    })
}

/// CNY when the line carries any renminbi marker, USD otherwise.
pub fn detect_currency(line: &str) -> Currency {
    let lower = line.to_lowercase();
    let explicit = ["rmb", "cny", "¥", "￥", "人民币"]
        .iter()
        .any(|marker| lower.contains(marker));
    // 元 alone means yuan, but 美元/港元 are US and HK dollars.
    let yuan = lower
        .replace("美元", "")
        .replace("港元", "")
        .contains('元');
    if explicit || yuan {
        Currency::Cny
    } else {
        Currency::Usd
    }
}

fn is_conditional(content: &str) -> bool {
    let lower = content.to_lowercase();
    CONDITIONAL_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Suffix later repeats of a label with `-2`, `-3`, ... in source order.
fn disambiguate_ordinals(milestones: Vec<ParsedMilestone>) -> Vec<ParsedMilestone> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    milestones
        .into_iter()
        .map(|mut m| {
            let n = seen.entry(m.ordinal.clone()).or_insert(0);
            *n += 1;
            if *n > 1 {
                m.ordinal = format!("{}-{}", m.ordinal, n);
            }
            m
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(text: &str) -> Vec<StyledRun> {
        vec![StyledRun::new(text, false)]
    }

    fn parse(runs: &[StyledRun]) -> Vec<ParsedMilestone> {
        parse_milestones(runs, &MilestoneOptions::default())
    }

    #[test]
    fn test_amount_percent_and_currency() {
        let ms = parse(&plain("(a) Upon signing (25%) - 200,000"));
        assert_eq!(ms.len(), 1);
        let m = &ms[0];
        assert_eq!(m.ordinal, "(a)");
        assert_eq!(m.title, "Upon signing (25%)");
        assert!(m.is_percent);
        assert_eq!(m.percent_value, Some(25.0));
        assert_eq!(m.amount_value, Some(200_000.0));
        assert_eq!(m.amount_currency, Currency::Usd);
        assert_eq!(m.trigger_type, TriggerType::Fixed);
        assert!(!m.is_completed);
    }

    #[test]
    fn test_renminbi_marker_sets_cny() {
        let ms = parse(&plain("(b) 完成交割后支付人民币 - 500,000"));
        assert_eq!(ms[0].amount_value, Some(500_000.0));
        assert_eq!(ms[0].amount_currency, Currency::Cny);
    }

    #[test]
    fn test_us_dollar_in_chinese_stays_usd() {
        assert_eq!(detect_currency("(c) 上市后支付10万美元 - 100,000"), Currency::Usd);
        assert_eq!(detect_currency("(c) 支付5万元 - 50,000"), Currency::Cny);
        assert_eq!(detect_currency("(c) RMB 50,000"), Currency::Cny);
    }

    #[test]
    fn test_duplicate_ordinals_disambiguated() {
        let ms = parse(&plain(
            "Original EL:\n(a) Signing - 100\n(b) Filing - 200\nSupplemental EL:\n(a) Listing - 300",
        ));
        let ords: Vec<&str> = ms.iter().map(|m| m.ordinal.as_str()).collect();
        assert_eq!(ords, vec!["(a)", "(b)", "(a)-2"]);
        assert_eq!(ms[2].title, "Listing");
        assert_eq!(
            ms.iter().map(|m| m.sort_order).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_marker_styles() {
        let ms = parse(&plain(
            "1. First filing - 10\n2) Second filing - 20\nC. Third - 30\n（d）第四 - 40",
        ));
        let ords: Vec<&str> = ms.iter().map(|m| m.ordinal.as_str()).collect();
        assert_eq!(ords, vec!["(1)", "(2)", "(c)", "(d)"]);
    }

    #[test]
    fn test_unmarked_lines_dropped() {
        let ms = parse(&plain(
            "Fixed fee arrangement\n\ne.g. payable in tranches\n(LSD: 31 Dec 2025)\n(a) Closing - 5",
        ));
        assert_eq!(ms.len(), 1);
        assert_eq!(ms[0].ordinal, "(a)");
    }

    #[test]
    fn test_exactly_half_struck_not_completed() {
        // "(a)abcdefg" has 10 non-whitespace chars; strike 5 of them.
        let runs = vec![StyledRun::new("(a)ab", true), StyledRun::new("cdefg", false)];
        let ms = parse(&runs);
        assert_eq!(ms.len(), 1);
        assert!(!ms[0].is_completed);
    }

    #[test]
    fn test_just_over_half_struck_completed() {
        // 100 non-whitespace chars: "(a)" + 97 x's; strike 51.
        let body = "x".repeat(97);
        let line = format!("(a){}", body);
        let runs = vec![
            StyledRun::new(&line[..51], true),
            StyledRun::new(&line[51..], false),
        ];
        let ms = parse(&runs);
        assert!((strike_ratio(&line, &[vec![true; 51], vec![false; 49]].concat()) - 0.51).abs() < 1e-9);
        assert!(ms[0].is_completed);
    }

    #[test]
    fn test_whitespace_ignored_in_ratio() {
        // Struck trailing spaces do not count toward the ratio.
        let runs = vec![
            StyledRun::new("(a) Sign", false),
            StyledRun::new("     ", true),
        ];
        let ms = parse(&runs);
        assert!(!ms[0].is_completed);
    }

    #[test]
    fn test_strike_is_per_line() {
        let runs = vec![
            StyledRun::new("(a) Signing - 100\n", true),
            StyledRun::new("(b) Closing - 200", false),
        ];
        let ms = parse(&runs);
        assert!(ms[0].is_completed);
        assert!(!ms[1].is_completed);
    }

    #[test]
    fn test_configurable_threshold() {
        let runs = vec![StyledRun::new("(a)ab", true), StyledRun::new("cdefg", false)];
        let lenient = MilestoneOptions {
            strike_threshold: 0.4,
            ..Default::default()
        };
        assert!(parse_milestones(&runs, &lenient)[0].is_completed);
    }

    #[test]
    fn test_title_fallback_and_truncation() {
        let ms = parse(&plain("(a) - 5,000"));
        assert_eq!(ms[0].title, "Milestone (a)");
        assert_eq!(ms[0].amount_value, Some(5_000.0));

        let long = format!("(b) {}", "y".repeat(300));
        let ms = parse(&plain(&long));
        assert_eq!(ms[0].title.chars().count(), 120);
    }

    #[test]
    fn test_conditional_trigger() {
        let ms = parse(&plain(
            "(a) Balance calculated on actual hours - 50,000\n(b) Upon completion of filing",
        ));
        assert_eq!(ms[0].trigger_type, TriggerType::Conditional);
        assert_eq!(ms[1].trigger_type, TriggerType::Conditional);
        assert_eq!(ms[1].amount_value, None);
    }

    #[test]
    fn test_date_dash_not_an_amount() {
        let ms = parse(&plain("(a) Filing by 2025-12-31"));
        assert_eq!(ms[0].amount_value, None);
    }

    #[test]
    fn test_currency_prefixed_amount() {
        let ms = parse(&plain("(a) Upon A1 filing — US$ 150,000.50"));
        assert_eq!(ms[0].amount_value, Some(150_000.5));
        assert_eq!(ms[0].title, "Upon A1 filing");
    }

    #[test]
    fn test_crlf_line_breaks() {
        let runs = vec![
            StyledRun::new("(a) Signing - 100\r\n", true),
            StyledRun::new("(b) Closing - 200\r\n", false),
        ];
        let ms = parse(&runs);
        assert_eq!(ms.len(), 2);
        assert_eq!(ms[0].title, "Signing");
        assert_eq!(ms[0].amount_value, Some(100.0));
        assert_eq!(ms[0].raw_fragment, "(a) Signing - 100");
        assert!(ms[0].is_completed);
        assert_eq!(ms[1].amount_value, Some(200.0));
        assert!(!ms[1].is_completed);
    }

    #[test]
    fn test_trailing_lsd_note_does_not_hide_amount() {
        let ms = parse(&plain("(b) Upon listing - 225,000 (LSD: 31 Dec 2025)"));
        assert_eq!(ms[0].amount_value, Some(225_000.0));
        assert_eq!(ms[0].title, "Upon listing");
        assert_eq!(ms[0].trigger_type, TriggerType::Fixed);
        assert!(ms[0].description.ends_with("(LSD: 31 Dec 2025)"));
    }
}
