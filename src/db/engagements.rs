use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};

use super::*;

const ENGAGEMENT_COLUMNS: &str = "engagement_id, project_id, cm_id, engagement_code,
     engagement_title, fee_amount, created_at, updated_at";

impl BillingDb {
    // =========================================================================
    // Engagements
    // =========================================================================

    fn map_engagement_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PersistedEngagement> {
        Ok(PersistedEngagement {
            engagement_id: row.get(0)?,
            project_id: row.get(1)?,
            cm_id: row.get(2)?,
            engagement_code: row.get(3)?,
            engagement_title: row.get(4)?,
            fee_amount: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    pub fn find_engagement_by_code(
        &self,
        cm_id: i64,
        code: &str,
    ) -> Result<Option<PersistedEngagement>, DbError> {
        let sql = format!(
            "SELECT {} FROM billing_engagement WHERE cm_id = ?1 AND engagement_code = ?2",
            ENGAGEMENT_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, params![cm_id, code], Self::map_engagement_row)
            .optional()?)
    }

    /// The matter's earliest engagement that predates synthetic codes.
    pub fn earliest_untagged_engagement(
        &self,
        cm_id: i64,
    ) -> Result<Option<PersistedEngagement>, DbError> {
        let sql = format!(
            "SELECT {} FROM billing_engagement
             WHERE cm_id = ?1 AND engagement_code IS NULL
             ORDER BY engagement_id LIMIT 1",
            ENGAGEMENT_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, params![cm_id], Self::map_engagement_row)
            .optional()?)
    }

    /// All engagements of a matter, oldest first.
    pub fn get_engagements_for_cm(&self, cm_id: i64) -> Result<Vec<PersistedEngagement>, DbError> {
        let sql = format!(
            "SELECT {} FROM billing_engagement WHERE cm_id = ?1 ORDER BY engagement_id",
            ENGAGEMENT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![cm_id], Self::map_engagement_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn insert_engagement(
        &self,
        project_id: i64,
        cm_id: i64,
        code: &str,
        title: &str,
        fee_amount: Option<f64>,
    ) -> Result<i64, DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO billing_engagement
                (project_id, cm_id, engagement_code, engagement_title, fee_amount,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![project_id, cm_id, code, title, fee_amount, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Refresh an engagement's title and fee, (re)tagging it with `code`.
    pub fn update_engagement(
        &self,
        engagement_id: i64,
        code: &str,
        title: &str,
        fee_amount: Option<f64>,
    ) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE billing_engagement
             SET engagement_code = ?1, engagement_title = ?2, fee_amount = ?3, updated_at = ?4
             WHERE engagement_id = ?5",
            params![code, title, fee_amount, now, engagement_id],
        )?;
        Ok(())
    }

    // =========================================================================
    // Fee arrangements
    // =========================================================================

    /// The engagement's active fee arrangement (the oldest one).
    pub fn find_fee_arrangement(
        &self,
        engagement_id: i64,
    ) -> Result<Option<PersistedFeeArrangement>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT fee_id, engagement_id, raw_text, lsd_date, lsd_raw,
                        bonus_description, bonus_amount_usd, bonus_amount_cny,
                        parsed_at, updated_at
                 FROM billing_fee_arrangement
                 WHERE engagement_id = ?1
                 ORDER BY fee_id LIMIT 1",
                params![engagement_id],
                |row| {
                    Ok(PersistedFeeArrangement {
                        fee_id: row.get(0)?,
                        engagement_id: row.get(1)?,
                        raw_text: row.get(2)?,
                        lsd_date: row.get(3)?,
                        lsd_raw: row.get(4)?,
                        bonus_description: row.get(5)?,
                        bonus_amount_usd: row.get(6)?,
                        bonus_amount_cny: row.get(7)?,
                        parsed_at: row.get(8)?,
                        updated_at: row.get(9)?,
                    })
                },
            )
            .optional()?)
    }

    /// Replace the raw text of the engagement's fee arrangement, coalescing the
    /// LSD and bonus fields, or insert one. Returns `(fee_id, created)`.
    ///
    /// The LSD date and its raw fragment move together: an unparsed fragment
    /// never replaces the fragment behind a stored date.
    pub fn upsert_fee_arrangement(
        &self,
        engagement_id: i64,
        input: &FeeArrangementInput,
    ) -> Result<(i64, bool), DbError> {
        let now = Utc::now().to_rfc3339();

        if let Some(existing) = self.find_fee_arrangement(engagement_id)? {
            self.conn.execute(
                "UPDATE billing_fee_arrangement
                 SET raw_text = ?1,
                     lsd_date = COALESCE(?2, lsd_date),
                     lsd_raw = CASE WHEN ?2 IS NOT NULL OR lsd_date IS NULL
                                    THEN COALESCE(?3, lsd_raw) ELSE lsd_raw END,
                     bonus_description = COALESCE(?4, bonus_description),
                     bonus_amount_usd = COALESCE(?5, bonus_amount_usd),
                     bonus_amount_cny = COALESCE(?6, bonus_amount_cny),
                     updated_at = ?7
                 WHERE fee_id = ?8",
                params![
                    input.raw_text,
                    input.lsd_date,
                    input.lsd_raw,
                    input.bonus_description,
                    input.bonus_amount_usd,
                    input.bonus_amount_cny,
                    now,
                    existing.fee_id,
                ],
            )?;
            return Ok((existing.fee_id, false));
        }

        self.conn.execute(
            "INSERT INTO billing_fee_arrangement
                (engagement_id, raw_text, lsd_date, lsd_raw,
                 bonus_description, bonus_amount_usd, bonus_amount_cny,
                 parsed_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                engagement_id,
                input.raw_text,
                input.lsd_date,
                input.lsd_raw,
                input.bonus_description,
                input.bonus_amount_usd,
                input.bonus_amount_cny,
                now,
            ],
        )?;
        Ok((self.conn.last_insert_rowid(), true))
    }

    // =========================================================================
    // Finance comments
    // =========================================================================

    /// Record a finance comment once per engagement. Returns true if inserted.
    pub fn add_finance_comment(
        &self,
        engagement_id: i64,
        comment: &str,
        created_by: Option<&str>,
    ) -> Result<bool, DbError> {
        let comment = comment.trim();
        if comment.is_empty() {
            return Ok(false);
        }
        let fingerprint = hex::encode(Sha256::digest(comment.as_bytes()));
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO billing_finance_comment
                (engagement_id, comment_raw, fingerprint_hash, created_by)
             VALUES (?1, ?2, ?3, ?4)",
            params![engagement_id, comment, fingerprint, created_by],
        )?;
        Ok(inserted > 0)
    }
}
