//! Success-bonus clauses in fee-arrangement text.

use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, PartialEq)]
pub struct BonusClause {
    /// The matched clause text.
    pub description: String,
    pub amount_usd: Option<f64>,
    pub amount_cny: Option<f64>,
}

fn usd_wan_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:不低于)?(\d+(?:\.\d+)?)万美元奖金").unwrap())
}

fn cny_wan_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:不低于)?(\d+(?:\.\d+)?)万(?:人民币|元)奖金").unwrap())
}

fn english_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)bonus[:\s]+(?:of\s+)?\$\s*(\d[\d,]*(?:\.\d+)?)").unwrap())
}

// 万 is ten thousand.
const WAN: f64 = 10_000.0;

/// Find the first bonus clause, checking Chinese USD, Chinese CNY, then English.
pub fn extract_bonus(text: &str) -> Option<BonusClause> {
    if let Some(c) = usd_wan_re().captures(text) {
        let wan: f64 = c[1].parse().ok()?;
        return Some(BonusClause {
            description: c[0].to_string(),
            amount_usd: Some(wan * WAN),
            amount_cny: None,
        });
    }
    if let Some(c) = cny_wan_re().captures(text) {
        let wan: f64 = c[1].parse().ok()?;
        return Some(BonusClause {
            description: c[0].to_string(),
            amount_usd: None,
            amount_cny: Some(wan * WAN),
        });
    }
    let c = english_re().captures(text)?;
    let amount: f64 = c[1].replace(',', "").parse().ok()?;
    Some(BonusClause {
        description: c[0].to_string(),
        amount_usd: Some(amount),
        amount_cny: None,
    })
}
