//! Configuration types for the billing sync engine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Fraction of struck non-whitespace characters above which a milestone line
/// counts as completed.
pub const DEFAULT_STRIKE_THRESHOLD: f64 = 0.5;

/// Finance keeps four banner/header rows above the first matter.
pub const DEFAULT_HEADER_ROWS: u32 = 4;

/// Column C: columns A and B hold finance-internal sequence numbers.
pub const DEFAULT_FIRST_COLUMN: u32 = 2;

pub const DEFAULT_TITLE_MAX_CHARS: usize = 120;

/// Engine configuration.
///
/// Every field is optional in the JSON file; missing fields fall back to the
/// layout of the finance team's project list workbook.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    #[serde(default = "default_strike_threshold")]
    pub strike_threshold: f64,
    #[serde(default = "default_header_rows")]
    pub header_rows: u32,
    #[serde(default = "default_first_column")]
    pub first_column: u32,
    /// Preferred worksheet. Falls back to the first sheet when missing.
    #[serde(default = "default_sheet_name", skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,
    #[serde(default = "default_title_max_chars")]
    pub title_max_chars: usize,
    /// Recorded on milestones whose completion came from a sync.
    #[serde(default = "default_completion_source")]
    pub completion_source: String,
    /// Synthetic engagement codes are `{prefix}-{index}`.
    #[serde(default = "default_engagement_code_prefix")]
    pub engagement_code_prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

fn default_strike_threshold() -> f64 {
    DEFAULT_STRIKE_THRESHOLD
}

fn default_header_rows() -> u32 {
    DEFAULT_HEADER_ROWS
}

fn default_first_column() -> u32 {
    DEFAULT_FIRST_COLUMN
}

fn default_sheet_name() -> Option<String> {
    Some("Transactions".to_string())
}

fn default_title_max_chars() -> usize {
    DEFAULT_TITLE_MAX_CHARS
}

fn default_completion_source() -> String {
    "excel_strikethrough".to_string()
}

fn default_engagement_code_prefix() -> String {
    "excel-el".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            strike_threshold: default_strike_threshold(),
            header_rows: default_header_rows(),
            first_column: default_first_column(),
            sheet_name: default_sheet_name(),
            title_max_chars: default_title_max_chars(),
            completion_source: default_completion_source(),
            engagement_code_prefix: default_engagement_code_prefix(),
            database_path: None,
        }
    }
}

impl SyncConfig {
    /// Synthetic code for the engagement at `index` within a matter's row.
    pub fn engagement_code(&self, index: usize) -> String {
        format!("{}-{}", self.engagement_code_prefix, index)
    }
}

/// Column positions of the project list, relative to the project-name column.
///
/// The contract is positional: header text is never consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnLayout {
    pub project_name: u32,
    pub client_name: u32,
    pub matter_number: u32,
    pub attorney_in_charge: u32,
    pub internal_code: u32,
    pub fee_amount: u32,
    pub milestones: u32,
    pub billing_to_date_usd: u32,
    pub collected_to_date_usd: u32,
    pub billing_credit_usd: u32,
    pub ubt_usd: u32,
    pub ar_usd: u32,
    pub billing_credit_cny: u32,
    pub ubt_cny: u32,
    pub billed_but_unpaid: u32,
    pub unbilled_per_el: u32,
    pub finance_remarks: u32,
    pub matter_notes: u32,
}

impl ColumnLayout {
    pub fn starting_at(first: u32) -> Self {
        ColumnLayout {
            project_name: first,
            client_name: first + 1,
            matter_number: first + 2,
            attorney_in_charge: first + 3,
            internal_code: first + 4,
            fee_amount: first + 5,
            milestones: first + 6,
            billing_to_date_usd: first + 7,
            collected_to_date_usd: first + 8,
            billing_credit_usd: first + 9,
            ubt_usd: first + 10,
            ar_usd: first + 11,
            // first + 12: spacer column
            billing_credit_cny: first + 13,
            ubt_cny: first + 14,
            // first + 15: spacer column
            billed_but_unpaid: first + 16,
            unbilled_per_el: first + 17,
            finance_remarks: first + 18,
            matter_notes: first + 19,
        }
    }
}
