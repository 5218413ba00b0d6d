//! Error types for billing spreadsheet synchronization
//!
//! Errors are classified by how far they propagate:
//! - Fatal: unreadable archive, workbook, or store. The sync aborts before any row.
//! - Row-level: anything raised while reconciling one row. Absorbed into the report.

use thiserror::Error;

use crate::db::DbError;

/// Error types for spreadsheet parsing and reconciliation
#[derive(Debug, Error)]
pub enum SyncError {
    // Fatal: the uploaded buffer cannot be read at all
    #[error("Spreadsheet archive is unreadable: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Workbook could not be parsed: {0}")]
    Workbook(#[from] calamine::XlsxError),

    #[error("Malformed workbook XML in {part}: {message}")]
    Xml { part: String, message: String },

    #[error("Worksheet not found: {0}")]
    SheetNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    // Store errors: fatal when opening, row-level when raised mid-batch
    #[error("Database error: {0}")]
    Db(#[from] DbError),
}

impl SyncError {
    pub(crate) fn xml(part: &str, err: impl std::fmt::Display) -> Self {
        SyncError::Xml {
            part: part.to_string(),
            message: err.to_string(),
        }
    }

    /// Returns true if this error stops the whole sync rather than a single row
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Archive(_)
                | SyncError::Workbook(_)
                | SyncError::Xml { .. }
                | SyncError::SheetNotFound(_)
                | SyncError::Io(_)
                | SyncError::Config(_)
        )
    }

    /// Get a short operator-facing recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            SyncError::Archive(_) | SyncError::Workbook(_) | SyncError::Xml { .. } => {
                "Re-save the file as .xlsx from Excel and upload it again."
            }
            SyncError::SheetNotFound(_) => "Check the sheet name in the billing sync config.",
            SyncError::Io(_) => "Check file permissions and disk space.",
            SyncError::Config(_) => "Fix the billing sync config JSON.",
            SyncError::Db(_) => "Check the database row named in the log and re-run the sync.",
        }
    }
}

/// Serializable error representation for callers of the sync service
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncErrorReport {
    pub message: String,
    pub fatal: bool,
    pub recovery_suggestion: String,
}

impl From<&SyncError> for SyncErrorReport {
    fn from(err: &SyncError) -> Self {
        SyncErrorReport {
            message: err.to_string(),
            fatal: err.is_fatal(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}
