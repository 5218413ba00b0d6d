use chrono::Utc;
use rusqlite::params;

use super::*;
use crate::excel::FinancialTotals;

impl BillingDb {
    // =========================================================================
    // Matters
    // =========================================================================

    /// Helper: map a row to `DbMatter`.
    pub(crate) fn map_matter_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbMatter> {
        Ok(DbMatter {
            cm_id: row.get(0)?,
            project_id: row.get(1)?,
            cm_no: row.get(2)?,
            project_name: row.get(3)?,
            client_name: row.get(4)?,
            attorney_in_charge: row.get(5)?,
            sca: row.get(6)?,
            financials: FinancialTotals {
                fees_usd: row.get(7)?,
                billing_to_date_usd: row.get(8)?,
                collected_to_date_usd: row.get(9)?,
                billing_credit_usd: row.get(10)?,
                ubt_usd: row.get(11)?,
                ar_usd: row.get(12)?,
                billing_credit_cny: row.get(13)?,
                ubt_cny: row.get(14)?,
                billed_but_unpaid: row.get(15)?,
                unbilled_per_el: row.get(16)?,
            },
            finance_comment: row.get(17)?,
            matter_notes: row.get(18)?,
            financials_updated_at: row.get(19)?,
            financials_updated_by: row.get(20)?,
        })
    }

    /// Look up a matter by its billing-system matter number.
    pub fn find_matter_by_cm_no(&self, cm_no: &str) -> Result<Option<DbMatter>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT c.cm_id, c.project_id, c.cm_no,
                    p.project_name, p.client_name, p.attorney_in_charge, p.sca,
                    c.fees_usd, c.billing_to_date_usd, c.collected_to_date_usd,
                    c.billing_credit_usd, c.ubt_usd, c.ar_usd,
                    c.billing_credit_cny, c.ubt_cny,
                    c.billed_but_unpaid, c.unbilled_per_el,
                    c.finance_comment, c.matter_notes,
                    c.financials_updated_at, c.financials_updated_by
             FROM billing_project_cm_no c
             JOIN billing_project p ON p.project_id = c.project_id
             WHERE c.cm_no = ?1",
        )?;
        let mut rows = stmt.query_map(params![cm_no], Self::map_matter_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Overwrite a project's descriptive fields. Returns rows affected.
    pub fn update_matter_details(
        &self,
        project_id: i64,
        details: &MatterDetails,
        updated_by: Option<&str>,
    ) -> Result<usize, DbError> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE billing_project
             SET project_name = ?1, client_name = ?2, attorney_in_charge = ?3, sca = ?4,
                 updated_at = ?5, updated_by = ?6
             WHERE project_id = ?7",
            params![
                details.project_name,
                details.client_name,
                details.attorney_in_charge,
                details.sca,
                now,
                updated_by,
                project_id,
            ],
        )?;
        Ok(changed)
    }

    /// Overwrite a matter's financial columns verbatim, NULLs included.
    pub fn update_matter_financials(
        &self,
        cm_id: i64,
        totals: &FinancialTotals,
        finance_comment: Option<&str>,
        matter_notes: Option<&str>,
        updated_by: Option<&str>,
    ) -> Result<usize, DbError> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE billing_project_cm_no
             SET fees_usd = ?1, billing_to_date_usd = ?2, collected_to_date_usd = ?3,
                 billing_credit_usd = ?4, ubt_usd = ?5, ar_usd = ?6,
                 billing_credit_cny = ?7, ubt_cny = ?8,
                 billed_but_unpaid = ?9, unbilled_per_el = ?10,
                 finance_comment = ?11, matter_notes = ?12,
                 financials_updated_at = ?13, financials_updated_by = ?14
             WHERE cm_id = ?15",
            params![
                totals.fees_usd,
                totals.billing_to_date_usd,
                totals.collected_to_date_usd,
                totals.billing_credit_usd,
                totals.ubt_usd,
                totals.ar_usd,
                totals.billing_credit_cny,
                totals.ubt_cny,
                totals.billed_but_unpaid,
                totals.unbilled_per_el,
                finance_comment,
                matter_notes,
                now,
                updated_by,
                cm_id,
            ],
        )?;
        Ok(changed)
    }
}
