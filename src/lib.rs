//! Billing spreadsheet sync: reads the finance team's project list workbook
//! and reconciles it into the billing store through a preview/apply workflow.

pub mod config;
pub mod db;
pub mod error;
pub mod excel;
pub mod migrations;
pub mod sync;
pub mod types;

pub use error::{SyncError, SyncErrorReport};
pub use sync::{SyncApplyResult, SyncPreview, SyncService};
pub use types::SyncConfig;
