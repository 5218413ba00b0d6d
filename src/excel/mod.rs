//! Spreadsheet side of the sync: container repair, worksheet access, row
//! extraction, and the free-text parsers for milestones, LSDs and bonuses.

pub mod bonus;
pub mod lsd;
pub mod milestones;
pub mod normalize;
pub mod rows;
pub mod workbook;

#[cfg(test)]
pub(crate) mod test_fixtures;

pub use bonus::BonusClause;
pub use lsd::LongStopDate;
pub use milestones::{Currency, MilestoneOptions, ParsedMilestone, StyledRun, TriggerType};
pub use rows::{ExcelEngagement, ExcelRow, FinancialTotals};

use crate::error::SyncError;
use crate::types::{ColumnLayout, SyncConfig};

/// Normalize, open and extract a workbook buffer into matter rows.
pub fn read_workbook(bytes: &[u8], config: &SyncConfig) -> Result<Vec<ExcelRow>, SyncError> {
    let normalized = normalize::normalize_workbook(bytes)?;
    let cols = ColumnLayout::starting_at(config.first_column);
    let grid = workbook::open_sheet(
        &normalized,
        config.sheet_name.as_deref(),
        &[cols.milestones],
    )?;
    Ok(rows::extract_rows(&grid, config))
}
