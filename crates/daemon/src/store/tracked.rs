// `tracked` + `versions` table access.
//
// One row per tracked URL; versions are append-only child rows keyed
// (doc_id, seq). The scheduling trichotomy maps onto two nullable
// columns: never fetched = last_update IS NULL; retired = last_update
// set, next_update NULL; due = next_update before now.

use anyhow::{ensure, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use limpet_common::{Metadata, TrackedDocument, Version};

use super::format_ts;

const DOC_COLUMNS: &str =
    "id, url, doc_class, metadata, random_key, last_update, next_update, consecutive_errors";

/// CRUD and queue queries for tracked documents.
pub struct TrackedStore;

impl TrackedStore {
    /// Insert a freshly tracked document (no versions yet).
    pub fn insert(conn: &Connection, doc: &TrackedDocument) -> Result<()> {
        let metadata =
            serde_json::to_string(&doc.metadata).context("failed to encode document metadata")?;
        conn.execute(
            "INSERT INTO tracked \
             (id, url, doc_class, metadata, random_key, last_update, next_update, \
              consecutive_errors) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                doc.id,
                doc.url,
                doc.doc_class,
                metadata,
                doc.random_key,
                doc.last_update.map(format_ts),
                doc.next_update.map(format_ts),
                doc.consecutive_errors,
            ],
        )
        .context("failed to insert tracked row")?;
        Ok(())
    }

    pub fn get(conn: &Connection, id: &str) -> Result<Option<TrackedDocument>> {
        let doc = conn
            .query_row(
                &format!("SELECT {DOC_COLUMNS} FROM tracked WHERE id = ?1"),
                params![id],
                row_to_doc,
            )
            .optional()
            .context("failed to query tracked row by id")?;
        Self::with_versions(conn, doc)
    }

    pub fn find_by_url(conn: &Connection, url: &str) -> Result<Option<TrackedDocument>> {
        let doc = conn
            .query_row(
                &format!("SELECT {DOC_COLUMNS} FROM tracked WHERE url = ?1"),
                params![url],
                row_to_doc,
            )
            .optional()
            .context("failed to query tracked row by url")?;
        Self::with_versions(conn, doc)
    }

    /// Replace the caller-supplied metadata on an existing record.
    pub fn update_metadata(conn: &Connection, id: &str, metadata: &Metadata) -> Result<bool> {
        let encoded =
            serde_json::to_string(metadata).context("failed to encode document metadata")?;
        let rows = conn
            .execute("UPDATE tracked SET metadata = ?1 WHERE id = ?2", params![encoded, id])
            .context("failed to update tracked metadata")?;
        Ok(rows > 0)
    }

    /// Persist the outcome of one update attempt: scheduling fields and,
    /// when the content changed, one appended version row. `doc` carries
    /// the pre-update version list; the new version's sequence number
    /// continues from it.
    pub fn apply_update(
        conn: &Connection,
        doc: &TrackedDocument,
        new_version: Option<&Version>,
    ) -> Result<()> {
        if let Some(version) = new_version {
            let seq = doc.versions.len() as i64;
            conn.execute(
                "INSERT INTO versions (doc_id, seq, timestamp, storage_key, storage_type) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    doc.id,
                    seq,
                    format_ts(version.timestamp),
                    version.storage_key,
                    version.storage_type,
                ],
            )
            .context("failed to append version row")?;
        }

        let changed = conn
            .execute(
                "UPDATE tracked \
                 SET last_update = ?1, next_update = ?2, consecutive_errors = ?3 \
                 WHERE id = ?4",
                params![
                    doc.last_update.map(format_ts),
                    doc.next_update.map(format_ts),
                    doc.consecutive_errors,
                    doc.id,
                ],
            )
            .context("failed to update tracked scheduling fields")?;
        ensure!(changed > 0, "tracked row `{}` vanished during update", doc.id);
        Ok(())
    }

    /// Documents due for an update: never-fetched first, then stale,
    /// each bucket sorted by `random_key` ascending.
    pub fn due(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<TrackedDocument>> {
        let mut docs = Vec::new();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {DOC_COLUMNS} FROM tracked \
                 WHERE last_update IS NULL \
                 ORDER BY random_key ASC"
            ))
            .context("failed to prepare never-fetched queue query")?;
        let rows =
            stmt.query_map([], row_to_doc).context("failed to query never-fetched documents")?;
        for row in rows {
            docs.push(row.context("failed to decode tracked row")?);
        }

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {DOC_COLUMNS} FROM tracked \
                 WHERE next_update IS NOT NULL AND next_update < ?1 \
                 ORDER BY random_key ASC"
            ))
            .context("failed to prepare stale queue query")?;
        let rows = stmt
            .query_map(params![format_ts(now)], row_to_doc)
            .context("failed to query stale documents")?;
        for row in rows {
            docs.push(row.context("failed to decode tracked row")?);
        }

        for doc in &mut docs {
            doc.versions = Self::versions(conn, &doc.id)?;
        }
        Ok(docs)
    }

    /// Same predicate as [`due`](Self::due), count only.
    pub fn due_count(conn: &Connection, now: DateTime<Utc>) -> Result<u64> {
        let never: u64 = conn
            .query_row("SELECT COUNT(*) FROM tracked WHERE last_update IS NULL", [], |row| {
                row.get(0)
            })
            .context("failed to count never-fetched documents")?;
        let stale: u64 = conn
            .query_row(
                "SELECT COUNT(*) FROM tracked WHERE next_update IS NOT NULL AND next_update < ?1",
                params![format_ts(now)],
                |row| row.get(0),
            )
            .context("failed to count stale documents")?;
        Ok(never + stale)
    }

    pub fn count(conn: &Connection) -> Result<u64> {
        conn.query_row("SELECT COUNT(*) FROM tracked", [], |row| row.get(0))
            .context("failed to count tracked documents")
    }

    pub fn list(conn: &Connection) -> Result<Vec<TrackedDocument>> {
        let mut stmt = conn
            .prepare(&format!("SELECT {DOC_COLUMNS} FROM tracked ORDER BY url ASC"))
            .context("failed to prepare tracked list query")?;
        let rows = stmt.query_map([], row_to_doc).context("failed to query tracked documents")?;

        let mut docs = Vec::new();
        for row in rows {
            docs.push(row.context("failed to decode tracked row")?);
        }
        for doc in &mut docs {
            doc.versions = Self::versions(conn, &doc.id)?;
        }
        Ok(docs)
    }

    /// Documents of one class that have at least one stored version;
    /// `sample` limits to that many in random order.
    pub fn in_class_with_versions(
        conn: &Connection,
        doc_class: &str,
        sample: Option<u32>,
    ) -> Result<Vec<TrackedDocument>> {
        let sql = match sample {
            Some(_) => format!(
                "SELECT {DOC_COLUMNS} FROM tracked \
                 WHERE doc_class = ?1 \
                   AND EXISTS (SELECT 1 FROM versions v WHERE v.doc_id = tracked.id) \
                 ORDER BY RANDOM() LIMIT ?2"
            ),
            None => format!(
                "SELECT {DOC_COLUMNS} FROM tracked \
                 WHERE doc_class = ?1 \
                   AND EXISTS (SELECT 1 FROM versions v WHERE v.doc_id = tracked.id) \
                 ORDER BY url ASC"
            ),
        };
        let mut stmt = conn.prepare(&sql).context("failed to prepare doc-class query")?;

        let mut docs = Vec::new();
        match sample {
            Some(limit) => {
                let rows = stmt
                    .query_map(params![doc_class, limit], row_to_doc)
                    .context("failed to query sampled documents")?;
                for row in rows {
                    docs.push(row.context("failed to decode tracked row")?);
                }
            }
            None => {
                let rows = stmt
                    .query_map(params![doc_class], row_to_doc)
                    .context("failed to query doc-class documents")?;
                for row in rows {
                    docs.push(row.context("failed to decode tracked row")?);
                }
            }
        }

        for doc in &mut docs {
            doc.versions = Self::versions(conn, &doc.id)?;
        }
        Ok(docs)
    }

    /// All version rows for a document, oldest first.
    pub fn versions(conn: &Connection, doc_id: &str) -> Result<Vec<Version>> {
        let mut stmt = conn
            .prepare(
                "SELECT timestamp, storage_key, storage_type \
                 FROM versions WHERE doc_id = ?1 ORDER BY seq ASC",
            )
            .context("failed to prepare versions query")?;
        let rows = stmt
            .query_map(params![doc_id], row_to_version)
            .context("failed to query version rows")?;
        rows.collect::<std::result::Result<Vec<_>, _>>().context("failed to collect version rows")
    }

    fn with_versions(
        conn: &Connection,
        doc: Option<TrackedDocument>,
    ) -> Result<Option<TrackedDocument>> {
        match doc {
            Some(mut doc) => {
                doc.versions = Self::versions(conn, &doc.id)?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }
}

fn row_to_doc(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrackedDocument> {
    let metadata_raw: String = row.get(3)?;
    let metadata: Metadata = serde_json::from_str(&metadata_raw).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(error))
    })?;

    Ok(TrackedDocument {
        id: row.get(0)?,
        url: row.get(1)?,
        doc_class: row.get(2)?,
        metadata,
        random_key: row.get(4)?,
        versions: Vec::new(),
        last_update: parse_opt_ts(row, 5)?,
        next_update: parse_opt_ts(row, 6)?,
        consecutive_errors: row.get(7)?,
    })
}

fn row_to_version(row: &rusqlite::Row<'_>) -> rusqlite::Result<Version> {
    let raw: String = row.get(0)?;
    let timestamp = raw.parse::<DateTime<Utc>>().map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(error))
    })?;
    Ok(Version { timestamp, storage_key: row.get(1)?, storage_type: row.get(2)? })
}

fn parse_opt_ts(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse::<DateTime<Utc>>().map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(error),
            )
        })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};
    use limpet_common::{Metadata, TrackedDocument, Version};

    use super::TrackedStore;
    use crate::store::meta_db::test_support::{cleanup_sqlite_files, unique_temp_db_path};
    use crate::store::MetaDb;

    fn now() -> DateTime<Utc> {
        "2026-08-01T12:00:00Z".parse().unwrap()
    }

    fn doc(id: &str, url: &str, random_key: i64) -> TrackedDocument {
        TrackedDocument {
            id: id.into(),
            url: url.into(),
            doc_class: "default".into(),
            metadata: Metadata::new(),
            random_key,
            versions: Vec::new(),
            last_update: None,
            next_update: None,
            consecutive_errors: 0,
        }
    }

    fn setup(prefix: &str) -> (MetaDb, std::path::PathBuf) {
        let path = unique_temp_db_path(prefix);
        let db = MetaDb::open(&path).expect("meta db should open");
        (db, path)
    }

    #[test]
    fn insert_and_get_round_trip() {
        let (db, path) = setup("tracked-roundtrip");
        let mut d = doc("doc-1", "http://example.test/a", 7);
        d.metadata.insert("pi".into(), serde_json::json!(3));

        TrackedStore::insert(db.connection(), &d).expect("insert should succeed");
        let loaded = TrackedStore::get(db.connection(), "doc-1")
            .expect("get should succeed")
            .expect("row should exist");
        assert_eq!(loaded, d);

        let by_url = TrackedStore::find_by_url(db.connection(), "http://example.test/a")
            .expect("find_by_url should succeed")
            .expect("row should exist");
        assert_eq!(by_url.id, "doc-1");

        drop(db);
        cleanup_sqlite_files(&path);
    }

    #[test]
    fn get_unknown_id_returns_none() {
        let (db, path) = setup("tracked-missing");
        assert!(TrackedStore::get(db.connection(), "nope").expect("get should succeed").is_none());
        drop(db);
        cleanup_sqlite_files(&path);
    }

    #[test]
    fn update_metadata_replaces_stored_map() {
        let (db, path) = setup("tracked-metadata");
        let d = doc("doc-1", "http://example.test/a", 7);
        TrackedStore::insert(db.connection(), &d).expect("insert should succeed");

        let mut new_meta = Metadata::new();
        new_meta.insert("pi".into(), serde_json::json!(4));
        assert!(TrackedStore::update_metadata(db.connection(), "doc-1", &new_meta).unwrap());

        let loaded = TrackedStore::get(db.connection(), "doc-1").unwrap().unwrap();
        assert_eq!(loaded.metadata, new_meta);

        drop(db);
        cleanup_sqlite_files(&path);
    }

    #[test]
    fn apply_update_appends_version_and_bumps_fields() {
        let (db, path) = setup("tracked-apply");
        let mut d = doc("doc-1", "http://example.test/a", 7);
        TrackedStore::insert(db.connection(), &d).expect("insert should succeed");

        d.last_update = Some(now());
        d.next_update = Some(now() + Duration::minutes(30));
        let version = Version {
            timestamp: now(),
            storage_key: "k1".into(),
            storage_type: "dummy".into(),
        };
        TrackedStore::apply_update(db.connection(), &d, Some(&version))
            .expect("apply_update should succeed");

        let loaded = TrackedStore::get(db.connection(), "doc-1").unwrap().unwrap();
        assert_eq!(loaded.versions, vec![version.clone()]);
        assert_eq!(loaded.last_update, Some(now()));
        assert_eq!(loaded.next_update, Some(now() + Duration::minutes(30)));

        // Second update without a content change only moves the clock.
        let mut d2 = loaded.clone();
        d2.last_update = Some(now() + Duration::minutes(1));
        TrackedStore::apply_update(db.connection(), &d2, None).expect("second apply");
        let loaded = TrackedStore::get(db.connection(), "doc-1").unwrap().unwrap();
        assert_eq!(loaded.versions.len(), 1);

        // A changed payload appends with the next sequence number.
        let v2 = Version {
            timestamp: now() + Duration::minutes(2),
            storage_key: "k2".into(),
            storage_type: "dummy".into(),
        };
        TrackedStore::apply_update(db.connection(), &loaded, Some(&v2)).expect("third apply");
        let loaded = TrackedStore::get(db.connection(), "doc-1").unwrap().unwrap();
        assert_eq!(loaded.versions.len(), 2);
        assert_eq!(loaded.versions[1].storage_key, "k2");

        drop(db);
        cleanup_sqlite_files(&path);
    }

    #[test]
    fn due_orders_never_fetched_before_stale_by_random_key() {
        let (db, path) = setup("tracked-due");

        // Never fetched, random keys deliberately out of insert order.
        TrackedStore::insert(db.connection(), &doc("n-2", "http://example.test/n2", 20)).unwrap();
        TrackedStore::insert(db.connection(), &doc("n-1", "http://example.test/n1", 10)).unwrap();

        // Stale: already updated, next_update in the past.
        let mut stale = doc("s-1", "http://example.test/s1", 5);
        stale.last_update = Some(now() - Duration::minutes(10));
        stale.next_update = Some(now() - Duration::minutes(1));
        TrackedStore::insert(db.connection(), &stale).unwrap();

        // Not yet due.
        let mut fresh = doc("f-1", "http://example.test/f1", 1);
        fresh.last_update = Some(now());
        fresh.next_update = Some(now() + Duration::minutes(30));
        TrackedStore::insert(db.connection(), &fresh).unwrap();

        // Retired one-shot.
        let mut retired = doc("r-1", "http://example.test/r1", 2);
        retired.last_update = Some(now());
        retired.next_update = None;
        TrackedStore::insert(db.connection(), &retired).unwrap();

        let due = TrackedStore::due(db.connection(), now()).expect("due should succeed");
        let ids: Vec<&str> = due.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["n-1", "n-2", "s-1"]);

        assert_eq!(TrackedStore::due_count(db.connection(), now()).unwrap(), due.len() as u64);

        drop(db);
        cleanup_sqlite_files(&path);
    }

    #[test]
    fn due_excludes_document_scheduled_exactly_at_now() {
        let (db, path) = setup("tracked-due-boundary");
        let mut d = doc("b-1", "http://example.test/b1", 1);
        d.last_update = Some(now() - Duration::minutes(30));
        d.next_update = Some(now());
        TrackedStore::insert(db.connection(), &d).unwrap();

        // Strictly-less-than: not due at the boundary, due just after.
        assert!(TrackedStore::due(db.connection(), now()).unwrap().is_empty());
        assert_eq!(
            TrackedStore::due(db.connection(), now() + Duration::microseconds(1)).unwrap().len(),
            1
        );

        drop(db);
        cleanup_sqlite_files(&path);
    }

    #[test]
    fn in_class_with_versions_filters_unversioned_docs() {
        let (db, path) = setup("tracked-class");
        let with = doc("v-1", "http://example.test/v1", 1);
        TrackedStore::insert(db.connection(), &with).unwrap();
        TrackedStore::insert(db.connection(), &doc("v-2", "http://example.test/v2", 2)).unwrap();
        let mut other = doc("o-1", "http://example.test/o1", 3);
        other.doc_class = "other".into();
        TrackedStore::insert(db.connection(), &other).unwrap();

        let version = Version {
            timestamp: now(),
            storage_key: "k1".into(),
            storage_type: "dummy".into(),
        };
        TrackedStore::apply_update(db.connection(), &with, Some(&version)).unwrap();

        let docs =
            TrackedStore::in_class_with_versions(db.connection(), "default", None).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "v-1");
        assert_eq!(docs[0].versions.len(), 1);

        let sampled =
            TrackedStore::in_class_with_versions(db.connection(), "default", Some(100)).unwrap();
        assert_eq!(sampled.len(), 1);

        drop(db);
        cleanup_sqlite_files(&path);
    }
}
