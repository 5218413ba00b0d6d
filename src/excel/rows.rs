//! Row extraction from the project-list worksheet.
//!
//! Columns are positional (see [`ColumnLayout`]). A row with a matter number
//! opens a matter; a following row with a blank matter number but a project
//! name is a sub-row that adds an engagement and its money to the open matter.

use calamine::Data;
use serde::{Deserialize, Serialize};

use super::bonus::{extract_bonus, BonusClause};
use super::lsd::{extract_lsd, LongStopDate};
use super::milestones::{parse_milestones, MilestoneOptions, ParsedMilestone};
use super::workbook::SheetGrid;
use crate::types::{ColumnLayout, SyncConfig};

/// Money columns of a matter. `None` is a blank cell, distinct from zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialTotals {
    pub fees_usd: Option<f64>,
    pub billing_to_date_usd: Option<f64>,
    pub collected_to_date_usd: Option<f64>,
    pub billing_credit_usd: Option<f64>,
    pub ubt_usd: Option<f64>,
    pub ar_usd: Option<f64>,
    pub billing_credit_cny: Option<f64>,
    pub ubt_cny: Option<f64>,
    pub billed_but_unpaid: Option<f64>,
    pub unbilled_per_el: Option<f64>,
}

/// Null on either side means "use the other side".
fn sum_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x + y),
        (x, None) => x,
        (None, y) => y,
    }
}

impl FinancialTotals {
    /// Column-wise sum with [`sum_opt`].
    pub fn merged(&self, other: &FinancialTotals) -> FinancialTotals {
        FinancialTotals {
            fees_usd: sum_opt(self.fees_usd, other.fees_usd),
            billing_to_date_usd: sum_opt(self.billing_to_date_usd, other.billing_to_date_usd),
            collected_to_date_usd: sum_opt(
                self.collected_to_date_usd,
                other.collected_to_date_usd,
            ),
            billing_credit_usd: sum_opt(self.billing_credit_usd, other.billing_credit_usd),
            ubt_usd: sum_opt(self.ubt_usd, other.ubt_usd),
            ar_usd: sum_opt(self.ar_usd, other.ar_usd),
            billing_credit_cny: sum_opt(self.billing_credit_cny, other.billing_credit_cny),
            ubt_cny: sum_opt(self.ubt_cny, other.ubt_cny),
            billed_but_unpaid: sum_opt(self.billed_but_unpaid, other.billed_but_unpaid),
            unbilled_per_el: sum_opt(self.unbilled_per_el, other.unbilled_per_el),
        }
    }

    /// `(column, value)` pairs in store column order.
    pub fn fields(&self) -> [(&'static str, Option<f64>); 10] {
        [
            ("fees_usd", self.fees_usd),
            ("billing_to_date_usd", self.billing_to_date_usd),
            ("collected_to_date_usd", self.collected_to_date_usd),
            ("billing_credit_usd", self.billing_credit_usd),
            ("ubt_usd", self.ubt_usd),
            ("ar_usd", self.ar_usd),
            ("billing_credit_cny", self.billing_credit_cny),
            ("ubt_cny", self.ubt_cny),
            ("billed_but_unpaid", self.billed_but_unpaid),
            ("unbilled_per_el", self.unbilled_per_el),
        ]
    }
}

/// One fee arrangement block: the primary row's or a sub-row's.
#[derive(Debug, Clone, PartialEq)]
pub struct ExcelEngagement {
    pub title: String,
    pub fee_amount: Option<f64>,
    pub raw_text: String,
    pub lsd: LongStopDate,
    pub bonus: Option<BonusClause>,
    pub milestones: Vec<ParsedMilestone>,
    /// 1-based sheet row the block came from.
    pub source_row: u32,
}

/// One matter, merged with its sub-rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ExcelRow {
    /// 1-based sheet row of the primary row.
    pub row_number: u32,
    pub matter_number: String,
    pub project_name: Option<String>,
    pub client_name: Option<String>,
    pub attorney_in_charge: Option<String>,
    pub internal_code: Option<String>,
    pub financials: FinancialTotals,
    pub finance_remarks: Option<String>,
    pub matter_notes: Option<String>,
    pub engagements: Vec<ExcelEngagement>,
}

impl ExcelRow {
    pub fn milestone_count(&self) -> usize {
        self.engagements.iter().map(|e| e.milestones.len()).sum()
    }

    pub fn completed_count(&self) -> usize {
        self.engagements
            .iter()
            .flat_map(|e| &e.milestones)
            .filter(|m| m.is_completed)
            .count()
    }

    fn absorb(&mut self, sub: RawRow) {
        self.engagements.extend(sub.engagement);
        self.financials = self.financials.merged(&sub.financials);
        self.finance_remarks = join_text(self.finance_remarks.take(), sub.finance_remarks);
        self.matter_notes = join_text(self.matter_notes.take(), sub.matter_notes);
    }
}

fn join_text(a: Option<String>, b: Option<String>) -> Option<String> {
    match (a, b) {
        (Some(a), Some(b)) => Some(format!("{}\n{}", a, b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// A single sheet row before sub-row resolution.
#[derive(Debug, Clone)]
struct RawRow {
    row_number: u32,
    matter_number: Option<String>,
    project_name: Option<String>,
    client_name: Option<String>,
    attorney_in_charge: Option<String>,
    internal_code: Option<String>,
    financials: FinancialTotals,
    finance_remarks: Option<String>,
    matter_notes: Option<String>,
    engagement: Option<ExcelEngagement>,
}

impl RawRow {
    fn into_row(self, matter_number: String) -> ExcelRow {
        ExcelRow {
            row_number: self.row_number,
            matter_number,
            project_name: self.project_name,
            client_name: self.client_name,
            attorney_in_charge: self.attorney_in_charge,
            internal_code: self.internal_code,
            financials: self.financials,
            finance_remarks: self.finance_remarks,
            matter_notes: self.matter_notes,
            engagements: self.engagement.into_iter().collect(),
        }
    }
}

/// Parse a money cell. Numbers pass through; text is read after dropping
/// thousands separators and currency symbols. Blank and `-` are `None`.
pub fn parse_money(value: Option<&Data>) -> Option<f64> {
    match value? {
        Data::Float(f) => Some(*f),
        Data::Int(n) => Some(*n as f64),
        Data::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| !c.is_whitespace() && !matches!(c, ',' | '$' | '¥' | '￥'))
                .collect();
            let cleaned = cleaned
                .trim_start_matches("USD")
                .trim_start_matches("US")
                .trim_start_matches("RMB");
            if cleaned.is_empty() || cleaned == "-" {
                return None;
            }
            // Accounting negatives: (1,000)
            match cleaned.strip_prefix('(').and_then(|c| c.strip_suffix(')')) {
                Some(inner) => inner.parse::<f64>().ok().map(|v| -v),
                None => cleaned.parse::<f64>().ok(),
            }
        }
        _ => None,
    }
}

fn read_raw_row(
    grid: &SheetGrid,
    row: u32,
    cols: &ColumnLayout,
    options: &MilestoneOptions,
) -> RawRow {
    let text = |col: u32| grid.text(row, col);
    let money = |col: u32| parse_money(grid.value(row, col));

    let project_name = text(cols.project_name);
    let fee_amount = money(cols.fee_amount);
    let runs = grid.runs(row, cols.milestones);
    let raw_text: String = runs.iter().map(|r| r.text.as_str()).collect();
    let raw_text = raw_text.trim().to_string();

    let engagement = if fee_amount.is_some() || !raw_text.is_empty() {
        Some(ExcelEngagement {
            title: project_name
                .clone()
                .unwrap_or_else(|| format!("Engagement (row {})", row + 1)),
            fee_amount,
            milestones: parse_milestones(&runs, options),
            lsd: extract_lsd(&raw_text),
            bonus: extract_bonus(&raw_text),
            raw_text,
            source_row: row + 1,
        })
    } else {
        None
    };

    RawRow {
        row_number: row + 1,
        matter_number: text(cols.matter_number),
        project_name,
        client_name: text(cols.client_name),
        attorney_in_charge: text(cols.attorney_in_charge),
        internal_code: text(cols.internal_code),
        financials: FinancialTotals {
            fees_usd: fee_amount,
            billing_to_date_usd: money(cols.billing_to_date_usd),
            collected_to_date_usd: money(cols.collected_to_date_usd),
            billing_credit_usd: money(cols.billing_credit_usd),
            ubt_usd: money(cols.ubt_usd),
            ar_usd: money(cols.ar_usd),
            billing_credit_cny: money(cols.billing_credit_cny),
            ubt_cny: money(cols.ubt_cny),
            billed_but_unpaid: money(cols.billed_but_unpaid),
            unbilled_per_el: money(cols.unbilled_per_el),
        },
        finance_remarks: text(cols.finance_remarks),
        matter_notes: text(cols.matter_notes),
        engagement,
    }
}

/// Walk the data rows and emit one [`ExcelRow`] per matter.
pub fn extract_rows(grid: &SheetGrid, config: &SyncConfig) -> Vec<ExcelRow> {
    let cols = ColumnLayout::starting_at(config.first_column);
    let options = MilestoneOptions::from(config);
    let Some(last) = grid.last_row() else {
        return Vec::new();
    };

    let rows = (config.header_rows..=last)
        .map(|row| read_raw_row(grid, row, &cols, &options))
        .fold(Vec::<ExcelRow>::new(), |mut rows, raw| {
            match (raw.matter_number.clone(), raw.project_name.is_some()) {
                (Some(matter_number), _) => {
                    if rows.iter().any(|r| r.matter_number == matter_number) {
                        log::warn!(
                            "Matter {} appears again at row {}; rows are reconciled in order",
                            matter_number,
                            raw.row_number
                        );
                    }
                    rows.push(raw.into_row(matter_number));
                }
                (None, true) => match rows.last_mut() {
                    Some(open) => {
                        log::debug!(
                            "Row {} continues matter {}",
                            raw.row_number,
                            open.matter_number
                        );
                        open.absorb(raw);
                    }
                    None => log::warn!(
                        "Dropping sub-row {} with no preceding matter",
                        raw.row_number
                    ),
                },
                (None, false) => {}
            }
            rows
        });

    log::info!(
        "Extracted {} matter row(s) from sheet '{}'",
        rows.len(),
        grid.sheet_name
    );
    rows
}
