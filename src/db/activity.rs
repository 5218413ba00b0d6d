use rusqlite::params;

use super::*;

/// Append-only sink for `(actor, action, entity, description)` activity entries.
pub trait ActivitySink {
    fn record(&self, entry: &ActivityEntry) -> Result<(), DbError>;
}

impl ActivitySink for BillingDb {
    fn record(&self, entry: &ActivityEntry) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO billing_activity_log (actor, action, entity_type, entity_id, description)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.actor,
                entry.action,
                entry.entity_type,
                entry.entity_id,
                entry.description,
            ],
        )?;
        Ok(())
    }
}
