//! SQLite-backed billing store.
//!
//! The store holds matters (`billing_project` + `billing_project_cm_no`),
//! engagements, fee arrangements, milestones and finance comments. The sync
//! engine never deletes from it and never creates matters: a matter number
//! that is not already present stays unmatched.
//!
//! Writes are issued as independent statements, not one transaction per row.
//! Every statement is idempotent, so re-running a sync converges.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};

pub mod types;
pub use types::*;

pub mod activity;
pub mod engagements;
pub mod matters;
pub mod milestones;

pub use activity::ActivitySink;

pub struct BillingDb {
    conn: Connection,
}

impl BillingDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Open (or create) the database at `~/.billing-sync/billing.db`.
    pub fn open() -> Result<Self, DbError> {
        let path = Self::db_path()?;
        Self::open_at(path)
    }

    /// Open a database at an explicit path and apply pending migrations.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self { conn })
    }

    /// Open a database in read-only mode. Previews use this so a dry run can
    /// never write, even by accident.
    pub fn open_readonly_at(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    /// Resolve the default database path: `~/.billing-sync/billing.db`.
    pub fn db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".billing-sync").join("billing.db"))
    }
}

// =============================================================================
// Shared test utilities
// =============================================================================
