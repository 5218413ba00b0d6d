// Reconciliation of one extracted matter row against the billing store.
//
// Money fields are overwritten verbatim; LSD/bonus fields are coalesced;
// milestone completion only ever moves false -> true. Every statement is
// idempotent on its own, so a row that fails halfway converges on re-run.

use crate::db::{BillingDb, DbError, DbMatter, FeeArrangementInput, MatterDetails, MilestoneWrite};
use crate::excel::{ExcelEngagement, ExcelRow};
use crate::types::SyncConfig;

/// Counters contributed by one reconciled row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowOutcome {
    pub project_updated: bool,
    pub financials_updated: bool,
    pub engagements_upserted: usize,
    pub fee_arrangements_upserted: usize,
    pub milestones_created: usize,
    pub milestones_updated: usize,
    pub milestones_completed: usize,
    pub finance_comments_added: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// The matter number has no record; nothing was written.
    Unmatched,
    Applied(RowOutcome),
}

/// Reconcile one row. Stops at the first failing statement; writes already
/// issued for the row stay committed.
pub fn reconcile_row(
    db: &BillingDb,
    config: &SyncConfig,
    row: &ExcelRow,
    acting_user: Option<&str>,
) -> Result<Reconciled, DbError> {
    let Some(matter) = db.find_matter_by_cm_no(&row.matter_number)? else {
        return Ok(Reconciled::Unmatched);
    };
    let mut outcome = RowOutcome::default();

    let details = MatterDetails {
        project_name: row.project_name.clone(),
        client_name: row.client_name.clone(),
        attorney_in_charge: row.attorney_in_charge.clone(),
        sca: row.internal_code.clone(),
    };
    outcome.project_updated =
        db.update_matter_details(matter.project_id, &details, acting_user)? > 0;
    outcome.financials_updated = db.update_matter_financials(
        matter.cm_id,
        &row.financials,
        row.finance_remarks.as_deref(),
        row.matter_notes.as_deref(),
        acting_user,
    )? > 0;

    for (index, engagement) in row.engagements.iter().enumerate() {
        let engagement_id = resolve_engagement(db, config, &matter, index, engagement)?;
        outcome.engagements_upserted += 1;

        let (fee_id, _) = db.upsert_fee_arrangement(engagement_id, &fee_input(engagement))?;
        outcome.fee_arrangements_upserted += 1;

        for milestone in &engagement.milestones {
            let write =
                db.upsert_milestone(engagement_id, fee_id, milestone, &config.completion_source)?;
            match write {
                MilestoneWrite::Created { completed } => {
                    outcome.milestones_created += 1;
                    if completed {
                        outcome.milestones_completed += 1;
                    }
                }
                MilestoneWrite::Updated { newly_completed } => {
                    outcome.milestones_updated += 1;
                    if newly_completed {
                        outcome.milestones_completed += 1;
                    }
                }
            }
        }

        if index == 0 {
            if let Some(remarks) = row.finance_remarks.as_deref() {
                if db.add_finance_comment(engagement_id, remarks, acting_user)? {
                    outcome.finance_comments_added += 1;
                }
            }
        }
    }

    log::debug!(
        "Row {} ({}): {} engagement(s), {} milestone(s) created, {} updated",
        row.row_number,
        row.matter_number,
        outcome.engagements_upserted,
        outcome.milestones_created,
        outcome.milestones_updated
    );
    Ok(Reconciled::Applied(outcome))
}

/// Find the engagement for `index` by its synthetic code, adopting the
/// matter's earliest uncoded engagement for index 0, else insert one.
fn resolve_engagement(
    db: &BillingDb,
    config: &SyncConfig,
    matter: &DbMatter,
    index: usize,
    engagement: &ExcelEngagement,
) -> Result<i64, DbError> {
    let code = config.engagement_code(index);

    if let Some(existing) = db.find_engagement_by_code(matter.cm_id, &code)? {
        db.update_engagement(
            existing.engagement_id,
            &code,
            &engagement.title,
            engagement.fee_amount,
        )?;
        return Ok(existing.engagement_id);
    }

    if index == 0 {
        if let Some(legacy) = db.earliest_untagged_engagement(matter.cm_id)? {
            log::info!(
                "Tagging legacy engagement {} of {} as {}",
                legacy.engagement_id,
                matter.cm_no,
                code
            );
            db.update_engagement(
                legacy.engagement_id,
                &code,
                &engagement.title,
                engagement.fee_amount,
            )?;
            return Ok(legacy.engagement_id);
        }
    }

    db.insert_engagement(
        matter.project_id,
        matter.cm_id,
        &code,
        &engagement.title,
        engagement.fee_amount,
    )
}

fn fee_input(engagement: &ExcelEngagement) -> FeeArrangementInput {
    let bonus = engagement.bonus.as_ref();
    FeeArrangementInput {
        raw_text: engagement.raw_text.clone(),
        lsd_date: engagement.lsd.iso(),
        lsd_raw: engagement.lsd.raw.clone(),
        bonus_description: bonus.map(|b| b.description.clone()),
        bonus_amount_usd: bonus.and_then(|b| b.amount_usd),
        bonus_amount_cny: bonus.and_then(|b| b.amount_cny),
    }
}
