//! Read-only dry run over extracted rows.

use serde::{Deserialize, Serialize};

use crate::db::{BillingDb, DbError, DbMatter};
use crate::excel::{ExcelRow, FinancialTotals};

/// Money deltas below half a cent are not changes.
const MONEY_EPSILON: f64 = 0.005;

/// What a sync would do to one matched matter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatterPreview {
    pub row_number: u32,
    pub cm_no: String,
    pub project_name: Option<String>,
    pub engagement_count: usize,
    pub milestone_count: usize,
    pub completed_count: usize,
    pub details_change: bool,
    /// Human-readable `column: old → new` lines.
    pub financial_changes: Vec<String>,
}

/// Dry-run report for a human to review before applying.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPreview {
    pub total_rows: usize,
    pub matched_count: usize,
    pub unmatched_count: usize,
    pub unmatched_cm_numbers: Vec<String>,
    pub projects_to_update: usize,
    pub milestones_to_process: usize,
    pub completed_milestones: usize,
    pub financials_to_change: usize,
    pub matters: Vec<MatterPreview>,
}

fn format_money(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.2}", v),
        None => "(blank)".to_string(),
    }
}

fn money_differs(old: Option<f64>, new: Option<f64>) -> bool {
    match (old, new) {
        (Some(a), Some(b)) => (a - b).abs() >= MONEY_EPSILON,
        (None, None) => false,
        _ => true,
    }
}

/// `column: old → new` for every money field the sheet would change.
pub fn financial_changes(old: &FinancialTotals, new: &FinancialTotals) -> Vec<String> {
    old.fields()
        .into_iter()
        .zip(new.fields())
        .filter(|((_, a), (_, b))| money_differs(*a, *b))
        .map(|((name, a), (_, b))| format!("{}: {} → {}", name, format_money(a), format_money(b)))
        .collect()
}

fn details_differ(matter: &DbMatter, row: &ExcelRow) -> bool {
    matter.project_name != row.project_name
        || matter.client_name != row.client_name
        || matter.attorney_in_charge != row.attorney_in_charge
        || matter.sca != row.internal_code
}

/// Tally what applying `rows` would change, without writing.
pub fn build_preview(db: &BillingDb, rows: &[ExcelRow]) -> Result<SyncPreview, DbError> {
    let mut preview = SyncPreview {
        total_rows: rows.len(),
        ..Default::default()
    };

    for row in rows {
        let Some(matter) = db.find_matter_by_cm_no(&row.matter_number)? else {
            preview.unmatched_cm_numbers.push(row.matter_number.clone());
            continue;
        };

        let changes = financial_changes(&matter.financials, &row.financials);
        let details_change = details_differ(&matter, row);
        let item = MatterPreview {
            row_number: row.row_number,
            cm_no: row.matter_number.clone(),
            project_name: row.project_name.clone(),
            engagement_count: row.engagements.len(),
            milestone_count: row.milestone_count(),
            completed_count: row.completed_count(),
            details_change,
            financial_changes: changes,
        };

        preview.matched_count += 1;
        if details_change {
            preview.projects_to_update += 1;
        }
        if !item.financial_changes.is_empty() {
            preview.financials_to_change += 1;
        }
        preview.milestones_to_process += item.milestone_count;
        preview.completed_milestones += item.completed_count;
        preview.matters.push(item);
    }
    preview.unmatched_count = preview.unmatched_cm_numbers.len();

    log::info!(
        "Preview: {} row(s), {} matched, {} unmatched",
        preview.total_rows,
        preview.matched_count,
        preview.unmatched_count
    );
    Ok(preview)
}
