use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::*;
use crate::excel::ParsedMilestone;

impl BillingDb {
    // =========================================================================
    // Milestones
    // =========================================================================

    fn map_milestone_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PersistedMilestone> {
        Ok(PersistedMilestone {
            milestone_id: row.get(0)?,
            engagement_id: row.get(1)?,
            fee_id: row.get(2)?,
            ordinal: row.get(3)?,
            title: row.get(4)?,
            description: row.get(5)?,
            trigger_type: row.get(6)?,
            trigger_text: row.get(7)?,
            amount_value: row.get(8)?,
            amount_currency: row.get(9)?,
            is_percent: row.get::<_, i32>(10)? != 0,
            percent_value: row.get(11)?,
            sort_order: row.get(12)?,
            completed: row.get::<_, i32>(13)? != 0,
            completion_date: row.get(14)?,
            completion_source: row.get(15)?,
            raw_fragment: row.get(16)?,
        })
    }

    /// All milestones of an engagement in sheet order.
    pub fn get_milestones_for_engagement(
        &self,
        engagement_id: i64,
    ) -> Result<Vec<PersistedMilestone>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT milestone_id, engagement_id, fee_id, ordinal, title, description,
                    trigger_type, trigger_text, amount_value, amount_currency,
                    is_percent, percent_value, sort_order,
                    completed, completion_date, completion_source, raw_fragment
             FROM billing_milestone
             WHERE engagement_id = ?1
             ORDER BY sort_order, milestone_id",
        )?;
        let rows = stmt.query_map(params![engagement_id], Self::map_milestone_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Upsert a parsed milestone by `(engagement, ordinal)`.
    ///
    /// Descriptive and numeric fields always take the new parse. Completion is
    /// `completed OR new.completed`, and the completion date/source are only
    /// stamped on the false -> true move.
    pub fn upsert_milestone(
        &self,
        engagement_id: i64,
        fee_id: i64,
        milestone: &ParsedMilestone,
        completion_source: &str,
    ) -> Result<MilestoneWrite, DbError> {
        let previously_completed: Option<bool> = self
            .conn
            .query_row(
                "SELECT completed FROM billing_milestone
                 WHERE engagement_id = ?1 AND ordinal = ?2",
                params![engagement_id, milestone.ordinal],
                |row| Ok(row.get::<_, i32>(0)? != 0),
            )
            .optional()?;

        let now = Utc::now();
        let (completion_date, completion_source) = if milestone.is_completed {
            (
                Some(now.date_naive().format("%Y-%m-%d").to_string()),
                Some(completion_source),
            )
        } else {
            (None, None)
        };

        self.conn.execute(
            "INSERT INTO billing_milestone
                (engagement_id, fee_id, ordinal, title, description,
                 trigger_type, trigger_text, amount_value, amount_currency,
                 is_percent, percent_value, sort_order,
                 completed, completion_date, completion_source, raw_fragment,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?17)
             ON CONFLICT(engagement_id, ordinal) DO UPDATE SET
                fee_id = excluded.fee_id,
                title = excluded.title,
                description = excluded.description,
                trigger_type = excluded.trigger_type,
                trigger_text = excluded.trigger_text,
                amount_value = excluded.amount_value,
                amount_currency = excluded.amount_currency,
                is_percent = excluded.is_percent,
                percent_value = excluded.percent_value,
                sort_order = excluded.sort_order,
                raw_fragment = excluded.raw_fragment,
                completion_date = CASE
                    WHEN billing_milestone.completed = 0 AND excluded.completed = 1
                    THEN excluded.completion_date
                    ELSE billing_milestone.completion_date END,
                completion_source = CASE
                    WHEN billing_milestone.completed = 0 AND excluded.completed = 1
                    THEN excluded.completion_source
                    ELSE billing_milestone.completion_source END,
                completed = MAX(billing_milestone.completed, excluded.completed),
                updated_at = excluded.updated_at",
            params![
                engagement_id,
                fee_id,
                milestone.ordinal,
                milestone.title,
                milestone.description,
                milestone.trigger_type.as_str(),
                milestone.description,
                milestone.amount_value,
                milestone.amount_currency.as_str(),
                milestone.is_percent as i32,
                milestone.percent_value,
                milestone.sort_order as i64,
                milestone.is_completed as i32,
                completion_date,
                completion_source,
                milestone.raw_fragment,
                now.to_rfc3339(),
            ],
        )?;

        Ok(match previously_completed {
            None => MilestoneWrite::Created {
                completed: milestone.is_completed,
            },
            Some(was_completed) => MilestoneWrite::Updated {
                newly_completed: !was_completed && milestone.is_completed,
            },
        })
    }
}
