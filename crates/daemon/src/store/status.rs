// Single-row status document holding the in-flight update counter.
//
// The scheduler increments per enqueued job; workers decrement on
// completion. A non-zero value suppresses dispatch, which is the sole
// mechanism keeping a document from entering the queue twice.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

pub struct StatusStore;

impl StatusStore {
    pub fn in_flight(conn: &Connection) -> Result<i64> {
        conn.query_row("SELECT update_queue FROM status WHERE id = 0", [], |row| row.get(0))
            .context("failed to read in-flight counter")
    }

    pub fn adjust(conn: &Connection, delta: i64) -> Result<()> {
        conn.execute(
            "UPDATE status SET update_queue = update_queue + ?1 WHERE id = 0",
            params![delta],
        )
        .context("failed to adjust in-flight counter")?;
        Ok(())
    }

    /// Operator recovery: a crashed worker leaves the counter elevated
    /// and dispatch stalled until it is reset.
    pub fn reset(conn: &Connection) -> Result<()> {
        conn.execute("UPDATE status SET update_queue = 0 WHERE id = 0", [])
            .context("failed to reset in-flight counter")?;
        Ok(())
    }
}
