// Update-queue scheduler: periodic dispatch of due documents.
//
// Dedup discipline: no new dispatches begin while `status.update_queue`
// is non-zero, so a document can never be handed to two workers at
// once. Simpler than a per-document in-flight flag, and sufficient as
// long as workers reliably decrement; a crashed worker stalls dispatch
// until the operator resets the counter.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::store::status::StatusStore;
use crate::store::tracked::TrackedStore;
use crate::store::MetaDb;

/// One unit of work for the pool: update this document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateJob {
    pub doc_id: String,
}

pub struct Scheduler {
    db: MetaDb,
    jobs: mpsc::Sender<UpdateJob>,
    tick: Duration,
}

impl Scheduler {
    pub fn new(db: MetaDb, jobs: mpsc::Sender<UpdateJob>, tick: Duration) -> Self {
        Self { db, jobs, tick }
    }

    /// Tick until shutdown. Dropping the returned future (or receiving
    /// the shutdown signal) closes the job channel once this
    /// scheduler's sender is the last one, which is the workers' cue to
    /// drain and exit.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(error) = self.tick_once().await {
                        warn!(%error, "scheduler tick failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("scheduler stopping");
                    break;
                }
            }
        }
    }

    /// One dispatch pass; returns the number of jobs enqueued.
    pub async fn tick_once(&mut self) -> Result<usize> {
        self.tick_once_at(Utc::now()).await
    }

    pub async fn tick_once_at(&mut self, now: DateTime<Utc>) -> Result<usize> {
        let in_flight = StatusStore::in_flight(self.db.connection())?;
        if in_flight != 0 {
            debug!(in_flight, "previous batch still draining, skipping tick");
            return Ok(0);
        }

        let due = TrackedStore::due(self.db.connection(), now)?;
        let mut dispatched = 0;
        for doc in due {
            if self.jobs.send(UpdateJob { doc_id: doc.id }).await.is_err() {
                warn!("job channel closed, dropping remaining dispatches");
                break;
            }
            StatusStore::adjust(self.db.connection(), 1)?;
            dispatched += 1;
        }

        if dispatched > 0 {
            info!(dispatched, "dispatched update jobs");
        }
        Ok(dispatched)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use limpet_common::{Metadata, TrackedDocument};
    use tokio::sync::mpsc;

    use super::{Scheduler, UpdateJob};
    use crate::store::meta_db::test_support::{cleanup_sqlite_files, unique_temp_db_path};
    use crate::store::status::StatusStore;
    use crate::store::tracked::TrackedStore;
    use crate::store::MetaDb;

    fn now() -> DateTime<Utc> {
        "2026-08-01T12:00:00Z".parse().unwrap()
    }

    fn doc(id: &str, random_key: i64) -> TrackedDocument {
        TrackedDocument {
            id: id.into(),
            url: format!("http://example.test/{id}"),
            doc_class: "default".into(),
            metadata: Metadata::new(),
            random_key,
            versions: Vec::new(),
            last_update: None,
            next_update: None,
            consecutive_errors: 0,
        }
    }

    fn setup(prefix: &str) -> (std::path::PathBuf, MetaDb) {
        let path = unique_temp_db_path(prefix);
        let db = MetaDb::open(&path).expect("meta db should open");
        (path, db)
    }

    #[tokio::test]
    async fn dispatches_one_job_per_due_document_in_random_key_order() {
        let (path, db) = setup("sched-dispatch");
        TrackedStore::insert(db.connection(), &doc("doc-b", 2)).unwrap();
        TrackedStore::insert(db.connection(), &doc("doc-a", 1)).unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let mut scheduler =
            Scheduler::new(db, tx, std::time::Duration::from_secs(60));

        let dispatched = scheduler.tick_once_at(now()).await.unwrap();
        assert_eq!(dispatched, 2);
        assert_eq!(rx.recv().await, Some(UpdateJob { doc_id: "doc-a".into() }));
        assert_eq!(rx.recv().await, Some(UpdateJob { doc_id: "doc-b".into() }));
        assert_eq!(StatusStore::in_flight(scheduler.db.connection()).unwrap(), 2);

        cleanup_sqlite_files(&path);
    }

    #[tokio::test]
    async fn skips_tick_while_previous_batch_is_in_flight() {
        let (path, db) = setup("sched-skip");
        TrackedStore::insert(db.connection(), &doc("doc-a", 1)).unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let mut scheduler =
            Scheduler::new(db, tx, std::time::Duration::from_secs(60));

        assert_eq!(scheduler.tick_once_at(now()).await.unwrap(), 1);

        // Counter is still elevated: the same document must not be
        // dispatched a second time.
        assert_eq!(scheduler.tick_once_at(now()).await.unwrap(), 0);
        assert_eq!(rx.recv().await, Some(UpdateJob { doc_id: "doc-a".into() }));
        assert!(rx.try_recv().is_err());

        // Once a worker has drained the batch, dispatch resumes.
        StatusStore::adjust(scheduler.db.connection(), -1).unwrap();
        assert_eq!(scheduler.tick_once_at(now()).await.unwrap(), 1);

        cleanup_sqlite_files(&path);
    }

    #[tokio::test]
    async fn closed_job_channel_stops_dispatch_without_error() {
        let (path, db) = setup("sched-closed");
        TrackedStore::insert(db.connection(), &doc("doc-a", 1)).unwrap();

        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let mut scheduler =
            Scheduler::new(db, tx, std::time::Duration::from_secs(60));

        assert_eq!(scheduler.tick_once_at(now()).await.unwrap(), 0);
        assert_eq!(StatusStore::in_flight(scheduler.db.connection()).unwrap(), 0);

        cleanup_sqlite_files(&path);
    }
}
