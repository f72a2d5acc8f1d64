use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE tracked (
    id                  TEXT PRIMARY KEY,
    url                 TEXT NOT NULL,
    doc_class           TEXT NOT NULL,
    metadata            TEXT NOT NULL DEFAULT '{}',
    random_key          INTEGER NOT NULL,
    last_update         TEXT NULL,
    next_update         TEXT NULL,
    consecutive_errors  INTEGER NOT NULL DEFAULT 0
);

CREATE UNIQUE INDEX tracked_url_idx ON tracked (url);
CREATE INDEX tracked_random_key_idx ON tracked (random_key);
CREATE INDEX tracked_next_update_idx ON tracked (next_update);

CREATE TABLE versions (
    doc_id          TEXT NOT NULL REFERENCES tracked (id),
    seq             INTEGER NOT NULL,
    timestamp       TEXT NOT NULL,
    storage_key     TEXT NOT NULL,
    storage_type    TEXT NOT NULL,
    PRIMARY KEY (doc_id, seq)
);

CREATE TABLE logs (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    action      TEXT NOT NULL,
    url         TEXT NOT NULL,
    error       TEXT NULL,
    timestamp   TEXT NOT NULL,
    extra       TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE status (
    id            INTEGER PRIMARY KEY CHECK (id = 0),
    update_queue  INTEGER NOT NULL DEFAULT 0
);

INSERT INTO status (id, update_queue) VALUES (0, 0);
"#;

const MIGRATIONS: &[(i64, &str)] = &[(1, MIGRATION_V1_SQL)];

#[derive(Debug)]
pub struct MetaDb {
    conn: Connection,
}

impl MetaDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create metadata db parent directory `{}`", parent.display())
            })?;
        }

        let mut conn = Connection::open(path)
            .with_context(|| format!("failed to open metadata db at `{}`", path.display()))?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            ",
        )
        .context("failed to configure sqlite pragmas for metadata db")?;

        ensure_migration_table(&conn)?;
        apply_pending_migrations(&mut conn)?;

        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn schema_version(&self) -> Result<i64> {
        current_schema_version(&self.conn)
    }
}

fn ensure_migration_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL
        );
        ",
    )
    .context("failed to ensure schema_migrations table exists")
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| row.get(0))
        .context("failed to read current schema version")
}

fn apply_pending_migrations(conn: &mut Connection) -> Result<()> {
    let mut current_version = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current_version {
            continue;
        }

        let tx = conn.transaction().context("failed to start migration transaction")?;
        tx.execute_batch(sql)
            .with_context(|| format!("failed to apply metadata db migration v{version}"))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, datetime('now'))",
            params![version],
        )
        .with_context(|| format!("failed to record migration v{version}"))?;
        tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
        current_version = *version;
    }

    Ok(())
}
