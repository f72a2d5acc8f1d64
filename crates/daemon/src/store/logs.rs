// Capped audit ring backed by the `logs` table.
//
// Every `track` and `update` appends exactly one entry. After each
// append the oldest entries are evicted until the ring fits the
// configured byte budget; the newest entry always survives.

use anyhow::{Context, Result};
use chrono::DateTime;
use rusqlite::{params, Connection};

use limpet_common::{LogEntry, Metadata};

use super::format_ts;

pub struct LogStore;

impl LogStore {
    pub fn append(conn: &Connection, entry: &LogEntry, maxsize: i64) -> Result<()> {
        let extra =
            serde_json::to_string(&entry.extra).context("failed to encode log entry extras")?;
        conn.execute(
            "INSERT INTO logs (action, url, error, timestamp, extra) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![entry.action, entry.url, entry.error, format_ts(entry.timestamp), extra],
        )
        .context("failed to insert log entry")?;
        Self::prune(conn, maxsize)
    }

    /// Page of entries, newest first.
    pub fn page(conn: &Connection, offset: u64, limit: u64) -> Result<Vec<LogEntry>> {
        let mut stmt = conn
            .prepare(
                "SELECT action, url, error, timestamp, extra \
                 FROM logs ORDER BY id DESC LIMIT ?1 OFFSET ?2",
            )
            .context("failed to prepare log page query")?;
        let rows = stmt
            .query_map(params![limit, offset], row_to_entry)
            .context("failed to query log page")?;
        rows.collect::<std::result::Result<Vec<_>, _>>().context("failed to collect log entries")
    }

    pub fn recent(conn: &Connection, limit: u64) -> Result<Vec<LogEntry>> {
        Self::page(conn, 0, limit)
    }

    pub fn count(conn: &Connection) -> Result<i64> {
        conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
            .context("failed to count log entries")
    }

    fn prune(conn: &Connection, maxsize: i64) -> Result<()> {
        loop {
            let (count, bytes): (i64, i64) = conn
                .query_row(
                    "SELECT COUNT(*), \
                            COALESCE(SUM(LENGTH(action) + LENGTH(url) + \
                                         LENGTH(COALESCE(error, '')) + LENGTH(timestamp) + \
                                         LENGTH(extra)), 0) \
                     FROM logs",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .context("failed to measure log ring")?;

            if count <= 1 || bytes <= maxsize {
                return Ok(());
            }

            conn.execute("DELETE FROM logs WHERE id = (SELECT MIN(id) FROM logs)", [])
                .context("failed to evict oldest log entry")?;
        }
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LogEntry> {
    let timestamp_raw: String = row.get(3)?;
    let timestamp = timestamp_raw.parse::<DateTime<chrono::Utc>>().map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(error))
    })?;
    let extra_raw: String = row.get(4)?;
    let extra: Metadata = serde_json::from_str(&extra_raw).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(error))
    })?;

    Ok(LogEntry {
        action: row.get(0)?,
        url: row.get(1)?,
        error: row.get(2)?,
        timestamp,
        extra,
    })
}
