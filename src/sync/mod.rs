//! Preview/apply orchestration over an uploaded project-list workbook.
//!
//! `generate_preview` is read-only. `apply_changes` walks rows strictly in
//! sheet order, isolates failures per row, and returns aggregate counts.
//! Concurrent applies against the same store are not safe; callers must
//! serialize them.

pub mod preview;
pub mod reconcile;

use serde::{Deserialize, Serialize};

use crate::db::{ActivityEntry, ActivitySink, BillingDb};
use crate::error::SyncError;
use crate::excel::{self, ExcelRow};
use crate::types::SyncConfig;

pub use preview::{MatterPreview, SyncPreview};
pub use reconcile::{Reconciled, RowOutcome};

const SYNC_ACTION: &str = "billing_excel_sync";

/// A row abandoned mid-apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowFailure {
    pub row_number: u32,
    pub matter_number: String,
    pub message: String,
}

/// Aggregate result of one apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncApplyResult {
    pub total_rows: usize,
    pub projects_updated: usize,
    pub financials_updated: usize,
    pub engagements_upserted: usize,
    pub fee_arrangements_upserted: usize,
    pub milestones_created: usize,
    pub milestones_updated: usize,
    /// Milestones that became completed in this apply, including ones created completed.
    pub milestones_completed: usize,
    pub finance_comments_added: usize,
    pub unmatched_cm_numbers: Vec<String>,
    pub failed_rows: Vec<RowFailure>,
}

impl SyncApplyResult {
    fn add(&mut self, outcome: &RowOutcome) {
        self.projects_updated += usize::from(outcome.project_updated);
        self.financials_updated += usize::from(outcome.financials_updated);
        self.engagements_upserted += outcome.engagements_upserted;
        self.fee_arrangements_upserted += outcome.fee_arrangements_upserted;
        self.milestones_created += outcome.milestones_created;
        self.milestones_updated += outcome.milestones_updated;
        self.milestones_completed += outcome.milestones_completed;
        self.finance_comments_added += outcome.finance_comments_added;
    }

    fn summary(&self) -> String {
        format!(
            "Billing Excel sync: {} projects, {} financials, {} engagements, {} milestones created, {} updated, {} completed, {} unmatched, {} failed",
            self.projects_updated,
            self.financials_updated,
            self.engagements_upserted,
            self.milestones_created,
            self.milestones_updated,
            self.milestones_completed,
            self.unmatched_cm_numbers.len(),
            self.failed_rows.len()
        )
    }
}

/// Entry point for the two-phase sync.
pub struct SyncService<'a> {
    db: &'a BillingDb,
    config: &'a SyncConfig,
    activity: Option<&'a dyn ActivitySink>,
}

impl<'a> SyncService<'a> {
    pub fn new(db: &'a BillingDb, config: &'a SyncConfig) -> Self {
        SyncService {
            db,
            config,
            activity: None,
        }
    }

    /// Record one activity entry per apply that names an acting user.
    pub fn with_activity(mut self, sink: &'a dyn ActivitySink) -> Self {
        self.activity = Some(sink);
        self
    }

    /// Normalize and extract a workbook buffer. Archive-level problems are fatal.
    pub fn parse_workbook(&self, bytes: &[u8]) -> Result<Vec<ExcelRow>, SyncError> {
        excel::read_workbook(bytes, self.config)
    }

    pub fn generate_preview(&self, rows: &[ExcelRow]) -> Result<SyncPreview, SyncError> {
        Ok(preview::build_preview(self.db, rows)?)
    }

    /// Reconcile `rows` in order. Never fails as a whole: unmatched and failed
    /// rows are reported in the result.
    pub fn apply_changes(&self, rows: &[ExcelRow], acting_user: Option<&str>) -> SyncApplyResult {
        log::info!("Applying billing sync for {} row(s)", rows.len());
        let mut result = SyncApplyResult {
            total_rows: rows.len(),
            ..Default::default()
        };

        for row in rows {
            match reconcile::reconcile_row(self.db, self.config, row, acting_user) {
                Ok(Reconciled::Applied(outcome)) => result.add(&outcome),
                Ok(Reconciled::Unmatched) => {
                    log::warn!(
                        "Row {}: matter {} not found, skipped",
                        row.row_number,
                        row.matter_number
                    );
                    result.unmatched_cm_numbers.push(row.matter_number.clone());
                }
                Err(e) => {
                    log::error!(
                        "Row {} (matter {}) failed: {}",
                        row.row_number,
                        row.matter_number,
                        e
                    );
                    result.failed_rows.push(RowFailure {
                        row_number: row.row_number,
                        matter_number: row.matter_number.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        log::info!("{}", result.summary());
        self.record_activity(&result, acting_user);
        result
    }

    fn record_activity(&self, result: &SyncApplyResult, acting_user: Option<&str>) {
        let (Some(sink), Some(user)) = (self.activity, acting_user) else {
            return;
        };
        let entry = ActivityEntry {
            actor: Some(user.to_string()),
            action: SYNC_ACTION.to_string(),
            entity_type: "billing".to_string(),
            entity_id: None,
            description: result.summary(),
        };
        if let Err(e) = sink.record(&entry) {
            log::warn!("Failed to record sync activity: {}", e);
        }
    }

    pub fn preview_workbook(&self, bytes: &[u8]) -> Result<SyncPreview, SyncError> {
        let rows = self.parse_workbook(bytes)?;
        self.generate_preview(&rows)
    }

    pub fn apply_workbook(
        &self,
        bytes: &[u8],
        acting_user: Option<&str>,
    ) -> Result<SyncApplyResult, SyncError> {
        let rows = self.parse_workbook(bytes)?;
        Ok(self.apply_changes(&rows, acting_user))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::db::test_utils::{count, seed_matter, test_db};
    use crate::db::DbError;
    use crate::excel::test_fixtures::{MatterRowFixture, WorkbookFixture};

    fn atlas_workbook(struck: bool) -> Vec<u8> {
        WorkbookFixture::new()
            .matter_row(
                5,
                MatterRowFixture {
                    project_name: Some("Atlas IPO".into()),
                    matter_number: Some("10001-00001".into()),
                    fee_amount: Some(400_000.0),
                    milestones: vec![
                        ("(a) Upon signing (25%) - 100,000\n".into(), struck),
                        ("(b) Upon A1 filing - 300,000 (LSD: 30 June 2026)".into(), false),
                    ],
                    billing_to_date_usd: Some(100_000.0),
                    finance_remarks: Some("Invoice 1 paid".into()),
                    ..Default::default()
                },
            )
            .matter_row(
                6,
                MatterRowFixture {
                    project_name: Some("Atlas follow-on".into()),
                    fee_amount: Some(50_000.0),
                    milestones: vec![("(a) Closing - 50,000".into(), false)],
                    billing_to_date_usd: Some(20_000.0),
                    ..Default::default()
                },
            )
            .matter_row(
                7,
                MatterRowFixture {
                    project_name: Some("Unknown".into()),
                    matter_number: Some("99999-00001".into()),
                    fee_amount: Some(1.0),
                    milestones: vec![("(a) Anything - 1".into(), false)],
                    ..Default::default()
                },
            )
            .build()
    }

    #[derive(Default)]
    struct RecordingSink {
        entries: RefCell<Vec<ActivityEntry>>,
    }

    impl ActivitySink for RecordingSink {
        fn record(&self, entry: &ActivityEntry) -> Result<(), DbError> {
            self.entries.borrow_mut().push(entry.clone());
            Ok(())
        }
    }

    #[test]
    fn test_preview_then_apply() {
        let db = test_db();
        let config = SyncConfig::default();
        seed_matter(&db, "10001-00001", "Atlas");
        let service = SyncService::new(&db, &config);
        let bytes = atlas_workbook(true);

        let preview = service.preview_workbook(&bytes).unwrap();
        assert_eq!(preview.total_rows, 2);
        assert_eq!(preview.matched_count, 1);
        assert_eq!(preview.unmatched_cm_numbers, vec!["99999-00001".to_string()]);
        assert_eq!(preview.milestones_to_process, 3);
        assert_eq!(preview.completed_milestones, 1);
        assert_eq!(preview.matters[0].engagement_count, 2);
        assert_eq!(count(&db, "billing_milestone"), 0);

        let result = service.apply_workbook(&bytes, Some("7")).unwrap();
        assert_eq!(result.total_rows, 2);
        assert_eq!(result.projects_updated, 1);
        assert_eq!(result.financials_updated, 1);
        assert_eq!(result.engagements_upserted, 2);
        assert_eq!(result.milestones_created, 3);
        assert_eq!(result.milestones_completed, 1);
        assert_eq!(result.finance_comments_added, 1);
        assert_eq!(result.unmatched_cm_numbers, vec!["99999-00001".to_string()]);
        assert!(result.failed_rows.is_empty());

        let matter = db.find_matter_by_cm_no("10001-00001").unwrap().unwrap();
        assert_eq!(matter.financials.billing_to_date_usd, Some(120_000.0));
        assert_eq!(matter.financials.fees_usd, Some(450_000.0));
        assert!(db.find_matter_by_cm_no("99999-00001").unwrap().is_none());
    }

    #[test]
    fn test_apply_is_idempotent() {
        let db = test_db();
        let config = SyncConfig::default();
        seed_matter(&db, "10001-00001", "Atlas");
        let service = SyncService::new(&db, &config);
        let rows = service.parse_workbook(&atlas_workbook(true)).unwrap();

        let first = service.apply_changes(&rows, None);
        let second = service.apply_changes(&rows, None);

        assert_eq!(first.milestones_created, 3);
        assert_eq!(second.milestones_created, 0);
        assert_eq!(second.milestones_updated, 3);
        assert_eq!(second.milestones_completed, 0);
        assert_eq!(second.finance_comments_added, 0);
        assert_eq!(second.engagements_upserted, first.engagements_upserted);
        assert_eq!(second.unmatched_cm_numbers, first.unmatched_cm_numbers);
        assert_eq!(count(&db, "billing_engagement"), 2);
        assert_eq!(count(&db, "billing_milestone"), 3);
        assert_eq!(count(&db, "billing_finance_comment"), 1);
    }

    #[test]
    fn test_completion_survives_unstruck_resync() {
        let db = test_db();
        let config = SyncConfig::default();
        seed_matter(&db, "10001-00001", "Atlas");
        let service = SyncService::new(&db, &config);

        service.apply_workbook(&atlas_workbook(true), None).unwrap();
        let result = service.apply_workbook(&atlas_workbook(false), None).unwrap();
        assert_eq!(result.milestones_completed, 0);

        let completed: i64 = db
            .conn_ref()
            .query_row(
                "SELECT completed FROM billing_milestone WHERE ordinal = '(a)' AND title = 'Upon signing (25%)'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(completed, 1);
    }

    #[test]
    fn test_failed_row_does_not_stop_batch() {
        let db = test_db();
        let config = SyncConfig::default();
        seed_matter(&db, "10001-00001", "Atlas");
        seed_matter(&db, "10002-00001", "Borealis");
        db.conn_ref()
            .execute_batch(
                "CREATE TRIGGER reject_atlas BEFORE UPDATE ON billing_project_cm_no
                 WHEN OLD.cm_no = '10001-00001'
                 BEGIN SELECT RAISE(ABORT, 'locked'); END;",
            )
            .unwrap();
        let service = SyncService::new(&db, &config);
        let bytes = WorkbookFixture::new()
            .matter_row(
                5,
                MatterRowFixture {
                    project_name: Some("Atlas".into()),
                    matter_number: Some("10001-00001".into()),
                    ..Default::default()
                },
            )
            .matter_row(
                6,
                MatterRowFixture {
                    project_name: Some("Borealis".into()),
                    matter_number: Some("10002-00001".into()),
                    billing_to_date_usd: Some(5.0),
                    ..Default::default()
                },
            )
            .build();

        let result = service.apply_workbook(&bytes, None).unwrap();
        assert_eq!(result.failed_rows.len(), 1);
        assert_eq!(result.failed_rows[0].row_number, 5);
        assert_eq!(result.failed_rows[0].matter_number, "10001-00001");
        assert_eq!(result.financials_updated, 1);
        let borealis = db.find_matter_by_cm_no("10002-00001").unwrap().unwrap();
        assert_eq!(borealis.financials.billing_to_date_usd, Some(5.0));
    }

    #[test]
    fn test_activity_recorded_for_acting_user() {
        let db = test_db();
        let config = SyncConfig::default();
        let sink = RecordingSink::default();
        let service = SyncService::new(&db, &config).with_activity(&sink);

        service.apply_changes(&[], None);
        assert!(sink.entries.borrow().is_empty());

        service.apply_changes(&[], Some("42"));
        let entries = sink.entries.borrow();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "billing_excel_sync");
        assert_eq!(entries[0].actor.as_deref(), Some("42"));
    }

    #[test]
    fn test_corrupt_upload_is_fatal() {
        let db = test_db();
        let config = SyncConfig::default();
        let service = SyncService::new(&db, &config);
        let err = service.preview_workbook(b"PK\x03\x04garbage").unwrap_err();
        assert!(err.is_fatal());
    }
}
