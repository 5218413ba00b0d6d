//! Row types for the billing store.
//!
//! Each table the sync engine touches has an explicit record type so the
//! overwrite-verbatim vs coalesce-on-update rules are visible per field.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::excel::FinancialTotals;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),
}

/// A matter: one `billing_project_cm_no` row joined with its `billing_project`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbMatter {
    pub cm_id: i64,
    pub project_id: i64,
    pub cm_no: String,
    pub project_name: Option<String>,
    pub client_name: Option<String>,
    pub attorney_in_charge: Option<String>,
    pub sca: Option<String>,
    pub financials: FinancialTotals,
    pub finance_comment: Option<String>,
    pub matter_notes: Option<String>,
    pub financials_updated_at: Option<String>,
    pub financials_updated_by: Option<String>,
}

/// Descriptive project fields. Overwritten on every sync; blanks become NULL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatterDetails {
    pub project_name: Option<String>,
    pub client_name: Option<String>,
    pub attorney_in_charge: Option<String>,
    pub sca: Option<String>,
}

/// A row from `billing_engagement`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedEngagement {
    pub engagement_id: i64,
    pub project_id: i64,
    pub cm_id: i64,
    /// NULL for engagements created before synthetic codes existed.
    pub engagement_code: Option<String>,
    pub engagement_title: Option<String>,
    pub fee_amount: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

/// A row from `billing_fee_arrangement`.
///
/// `raw_text` is replaced on every sync. The LSD and bonus fields are
/// coalesced: a blank cell never erases a previously recorded value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedFeeArrangement {
    pub fee_id: i64,
    pub engagement_id: i64,
    pub raw_text: String,
    pub lsd_date: Option<String>,
    pub lsd_raw: Option<String>,
    pub bonus_description: Option<String>,
    pub bonus_amount_usd: Option<f64>,
    pub bonus_amount_cny: Option<f64>,
    pub parsed_at: String,
    pub updated_at: String,
}

/// Fee arrangement values produced by one parse.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeeArrangementInput {
    pub raw_text: String,
    pub lsd_date: Option<String>,
    pub lsd_raw: Option<String>,
    pub bonus_description: Option<String>,
    pub bonus_amount_usd: Option<f64>,
    pub bonus_amount_cny: Option<f64>,
}

/// A row from `billing_milestone`.
///
/// `completed` is monotonic under sync: it only ever moves false -> true,
/// and `completion_date`/`completion_source` are stamped on that transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedMilestone {
    pub milestone_id: i64,
    pub engagement_id: i64,
    pub fee_id: Option<i64>,
    pub ordinal: String,
    pub title: String,
    pub description: Option<String>,
    pub trigger_type: String,
    pub trigger_text: Option<String>,
    pub amount_value: Option<f64>,
    pub amount_currency: String,
    pub is_percent: bool,
    pub percent_value: Option<f64>,
    pub sort_order: i64,
    pub completed: bool,
    pub completion_date: Option<String>,
    pub completion_source: Option<String>,
    pub raw_fragment: Option<String>,
}

/// Outcome of one milestone upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MilestoneWrite {
    /// No row existed for `(engagement, ordinal)`.
    Created { completed: bool },
    /// An existing row was refreshed. `newly_completed` marks a false -> true move.
    Updated { newly_completed: bool },
}

/// One entry for the append-only activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub actor: Option<String>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub description: String,
}
