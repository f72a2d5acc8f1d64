// The tracking kernel: owns the data model, enforces its invariants,
// and runs the per-document update pipeline.
//
// `track` registers a URL under a doc class. `update` fetches the URL,
// detects change against the last stored version, persists a new
// snapshot when warranted, and reschedules — with exponential backoff
// after consecutive fetch errors. Fetch failures never propagate out of
// `update`; they are recorded on the document and in the audit log. The
// Err paths of `update` are configuration and infrastructure problems.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use limpet_common::{
    DocClass, KernelError, KernelResult, LogEntry, Metadata, TrackedDocument, Version,
};

use crate::config::DaemonConfig;
use crate::extract::ExtractorRegistry;
use crate::fetcher::Fetcher;
use crate::notify::NotificationSender;
use crate::storage::{StorageBackend, StorageRegistry};
use crate::store::logs::LogStore;
use crate::store::tracked::TrackedStore;
use crate::store::MetaDb;
use crate::versioning::VersioningRegistry;

/// Registries and tuning shared by every kernel instance. The scheduler
/// and each worker hold their own database connection and HTTP client,
/// but resolve names through the same registries.
#[derive(Clone)]
pub struct KernelContext {
    pub doc_classes: Arc<HashMap<String, DocClass>>,
    pub default_storage_engine: String,
    pub storage: StorageRegistry,
    pub versioning: Arc<VersioningRegistry>,
    pub extractors: Arc<ExtractorRegistry>,
    pub notifications: NotificationSender,
    pub retry_attempts: u32,
    pub retry_wait_minutes: f64,
    pub log_maxsize: i64,
}

impl KernelContext {
    /// Reject configurations that would otherwise only fail at update
    /// time.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, class) in self.doc_classes.iter() {
            if let Some(mins) = class.update_mins {
                anyhow::ensure!(
                    mins > 0.0,
                    "doc class `{name}`: update_mins must be positive \
                     (omit it for one-shot classes)"
                );
            }
            let engine = class.storage_engine.as_deref().unwrap_or(&self.default_storage_engine);
            anyhow::ensure!(
                self.storage.contains(engine),
                "doc class `{name}`: unregistered storage engine `{engine}`"
            );
            anyhow::ensure!(
                self.versioning.contains(&class.versioning),
                "doc class `{name}`: unknown versioning scheme `{}`",
                class.versioning
            );
            if let Some(extractor) = &class.extract_text {
                anyhow::ensure!(
                    self.extractors.contains(extractor),
                    "doc class `{name}`: unknown text extractor `{extractor}`"
                );
            }
        }
        Ok(())
    }
}

/// What one `update` attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub new_version: bool,
    pub fetch_error: Option<String>,
}

pub struct Kernel {
    db: MetaDb,
    fetcher: Fetcher,
    ctx: KernelContext,
}

impl Kernel {
    pub fn new(db: MetaDb, fetcher: Fetcher, ctx: KernelContext) -> Self {
        Self { db, fetcher, ctx }
    }

    /// Open a kernel over the configured database with a live HTTP
    /// fetcher. Each worker calls this to get its own connection.
    pub fn open(config: &DaemonConfig, ctx: KernelContext) -> anyhow::Result<Self> {
        let db = MetaDb::open(config.db_path())?;
        let fetcher = Fetcher::new(&config.fetch_settings())?;
        Ok(Self::new(db, fetcher, ctx))
    }

    pub fn db(&self) -> &MetaDb {
        &self.db
    }

    /// Add a URL to the tracked set. Idempotent for an identical
    /// `(url, doc_class)`; refreshes metadata in place when it differs.
    pub fn track(
        &mut self,
        url: &str,
        doc_class: &str,
        id: Option<&str>,
        metadata: Metadata,
    ) -> KernelResult<String> {
        let now = Utc::now();

        if !self.ctx.doc_classes.contains_key(doc_class) {
            let entry = LogEntry::new("track", url, now)
                .with_error(format!("unregistered doc_class {doc_class}"));
            LogStore::append(self.db.connection(), &entry, self.ctx.log_maxsize)?;
            warn!(url, doc_class, "refusing to track under unregistered doc class");
            return Err(KernelError::UnknownDocClass(doc_class.to_string()));
        }

        let existing = match id {
            Some(id) => TrackedStore::get(self.db.connection(), id)?,
            None => TrackedStore::find_by_url(self.db.connection(), url)?,
        };

        if let Some(existing) = existing {
            if existing.url == url && existing.doc_class == doc_class {
                let tx = self
                    .db
                    .connection_mut()
                    .transaction()
                    .context("failed to start track transaction")?;
                if existing.metadata != metadata {
                    TrackedStore::update_metadata(&tx, &existing.id, &metadata)?;
                }
                let entry =
                    LogEntry::new("track", url, now).with_extra("doc_id", json!(existing.id));
                LogStore::append(&tx, &entry, self.ctx.log_maxsize)?;
                tx.commit().context("failed to commit track transaction")?;
                return Ok(existing.id);
            }

            let entry = LogEntry::new("track", url, now).with_error("tracking conflict");
            LogStore::append(self.db.connection(), &entry, self.ctx.log_maxsize)?;
            warn!(existing = %existing.id, url, doc_class, "tracking conflict");
            return Err(KernelError::TrackingConflict {
                id: existing.id,
                existing_url: existing.url,
                existing_class: existing.doc_class,
                url: url.to_string(),
                doc_class: doc_class.to_string(),
            });
        }

        let doc = TrackedDocument {
            id: id.map(str::to_string).unwrap_or_else(|| Uuid::new_v4().to_string()),
            url: url.to_string(),
            doc_class: doc_class.to_string(),
            metadata,
            random_key: rand::thread_rng().gen_range(0..i64::MAX),
            versions: Vec::new(),
            last_update: None,
            next_update: None,
            consecutive_errors: 0,
        };

        let tx =
            self.db.connection_mut().transaction().context("failed to start track transaction")?;
        TrackedStore::insert(&tx, &doc)?;
        let entry = LogEntry::new("track", url, now).with_extra("doc_id", json!(doc.id));
        LogStore::append(&tx, &entry, self.ctx.log_maxsize)?;
        tx.commit().context("failed to commit track transaction")?;

        info!(url, doc_class, id = %doc.id, "tracked");
        Ok(doc.id)
    }

    /// Run the update pipeline for one document.
    pub async fn update(&mut self, doc_id: &str) -> KernelResult<UpdateOutcome> {
        self.update_at(doc_id, Utc::now()).await
    }

    /// [`update`](Self::update) against an explicit clock.
    pub async fn update_at(
        &mut self,
        doc_id: &str,
        now: DateTime<Utc>,
    ) -> KernelResult<UpdateOutcome> {
        let mut doc = TrackedStore::get(self.db.connection(), doc_id)?
            .ok_or_else(|| KernelError::UnknownDocument(doc_id.to_string()))?;
        let class = self.class(&doc.doc_class)?.clone();
        let backend = self.backend_for_class(&class)?;
        let scheme = self
            .ctx
            .versioning
            .get(&class.versioning)
            .ok_or_else(|| KernelError::UnknownVersioning(class.versioning.clone()))?;

        // Spaces are the one piece of encoding the stored URLs are
        // allowed to be sloppy about.
        let fetch_url = doc.url.replace(' ', "%20");
        let mut fetch_error = None;
        let fetched = match self.fetcher.fetch(&fetch_url).await {
            Ok(fetched) => Some(fetched),
            Err(error) => {
                fetch_error = Some(error.to_string());
                None
            }
        };

        // Change detection needs a baseline: the first successful fetch
        // is always a new version.
        let mut new_version = None;
        if let Some(fetched) = &fetched {
            let changed = match doc.last_version() {
                Some(previous) => {
                    let old = self
                        .backend_for_type(&previous.storage_type)?
                        .get(&previous.storage_key)?;
                    scheme.is_new_version(&old, &fetched.body)
                }
                None => true,
            };
            if changed {
                let storage_key = backend.put(&doc, &fetched.body, &fetched.content_type)?;
                new_version = Some(Version {
                    timestamp: now,
                    storage_key,
                    storage_type: backend.storage_type().to_string(),
                });
            }
        }

        // Scheduling: success runs at the class cadence; failures back
        // off exponentially until the retry budget is spent, then drop
        // back to the cadence.
        let interval_mins = if fetch_error.is_some() {
            doc.consecutive_errors += 1;
            backoff_minutes(
                doc.consecutive_errors,
                self.ctx.retry_attempts,
                self.ctx.retry_wait_minutes,
                class.update_mins,
            )
        } else {
            doc.consecutive_errors = 0;
            class.update_mins
        };
        doc.last_update = Some(now);
        doc.next_update = interval_mins.map(|mins| now + minutes(mins));

        let mut entry = LogEntry::new("update", &doc.url, now)
            .with_extra("doc_id", json!(doc.id))
            .with_extra("new_version", json!(new_version.is_some()));
        if let Some(message) = &fetch_error {
            entry = entry.with_error(message.clone());
        }

        let tx =
            self.db.connection_mut().transaction().context("failed to start update transaction")?;
        TrackedStore::apply_update(&tx, &doc, new_version.as_ref())?;
        LogStore::append(&tx, &entry, self.ctx.log_maxsize)?;
        tx.commit().context("failed to commit update transaction")?;

        // Fan out only after the version is durably recorded.
        if new_version.is_some() {
            for task in &class.onchanged {
                self.ctx.notifications.dispatch(task, &doc.id);
            }
        }

        match &fetch_error {
            Some(error) => warn!(url = %doc.url, id = %doc.id, error, "error updating document"),
            None => {
                info!(
                    url = %doc.url,
                    id = %doc.id,
                    new_version = new_version.is_some(),
                    "updated document"
                );
            }
        }

        Ok(UpdateOutcome { new_version: new_version.is_some(), fetch_error })
    }

    /// Documents due for an update: never-fetched first (they have no
    /// baseline to diff against), then stale, each bucket in
    /// `random_key` order so workers hitting one origin don't cluster.
    pub fn queue(&self) -> KernelResult<Vec<TrackedDocument>> {
        self.queue_at(Utc::now())
    }

    pub fn queue_at(&self, now: DateTime<Utc>) -> KernelResult<Vec<TrackedDocument>> {
        Ok(TrackedStore::due(self.db.connection(), now)?)
    }

    /// Same predicate as [`queue`](Self::queue), count only.
    pub fn queue_size(&self) -> KernelResult<u64> {
        self.queue_size_at(Utc::now())
    }

    pub fn queue_size_at(&self, now: DateTime<Utc>) -> KernelResult<u64> {
        Ok(TrackedStore::due_count(self.db.connection(), now)?)
    }

    pub fn document(&self, doc_id: &str) -> KernelResult<TrackedDocument> {
        TrackedStore::get(self.db.connection(), doc_id)?
            .ok_or_else(|| KernelError::UnknownDocument(doc_id.to_string()))
    }

    /// Payload of the most recent stored version.
    pub fn last_version(&self, doc_id: &str) -> KernelResult<Vec<u8>> {
        let doc = self.document(doc_id)?;
        let version = doc
            .last_version()
            .ok_or_else(|| KernelError::NoVersions(doc_id.to_string()))?;
        Ok(self.backend_for_type(&version.storage_type)?.get(&version.storage_key)?)
    }

    /// Every stored payload, oldest first.
    pub fn all_versions(&self, doc_id: &str) -> KernelResult<Vec<Vec<u8>>> {
        let doc = self.document(doc_id)?;
        let mut payloads = Vec::with_capacity(doc.versions.len());
        for version in &doc.versions {
            payloads
                .push(self.backend_for_type(&version.storage_type)?.get(&version.storage_key)?);
        }
        Ok(payloads)
    }

    /// Run the doc class's text extractor over the latest payload.
    pub fn extract_text(&self, doc_id: &str) -> KernelResult<String> {
        let doc = self.document(doc_id)?;
        let class = self.class(&doc.doc_class)?;
        let name = class
            .extract_text
            .clone()
            .ok_or_else(|| KernelError::NoExtractor(doc.doc_class.clone()))?;
        let extractor =
            self.ctx.extractors.get(&name).ok_or(KernelError::UnknownExtractor(name))?;
        let payload = self.last_version(doc_id)?;
        Ok(extractor(&doc, &payload).context("text extractor failed")?)
    }

    fn class(&self, name: &str) -> KernelResult<&DocClass> {
        self.ctx
            .doc_classes
            .get(name)
            .ok_or_else(|| KernelError::UnknownDocClass(name.to_string()))
    }

    fn backend_for_class(&self, class: &DocClass) -> KernelResult<Arc<dyn StorageBackend>> {
        let engine = class.storage_engine.as_deref().unwrap_or(&self.ctx.default_storage_engine);
        self.ctx
            .storage
            .get(engine)
            .ok_or_else(|| KernelError::UnknownStorageEngine(engine.to_string()))
    }

    fn backend_for_type(&self, tag: &str) -> KernelResult<Arc<dyn StorageBackend>> {
        self.ctx
            .storage
            .by_type(tag)
            .ok_or_else(|| KernelError::UnknownStorageEngine(tag.to_string()))
    }
}

/// Reschedule interval after an error, given the post-increment error
/// count: exponential while within the retry budget, class cadence
/// afterwards.
fn backoff_minutes(
    consecutive_errors: u32,
    retry_attempts: u32,
    retry_wait_minutes: f64,
    update_mins: Option<f64>,
) -> Option<f64> {
    if (1..=retry_attempts).contains(&consecutive_errors) {
        Some(retry_wait_minutes * 2f64.powi(consecutive_errors as i32 - 1))
    } else {
        update_mins
    }
}

fn minutes(mins: f64) -> Duration {
    Duration::milliseconds((mins * 60_000.0).round() as i64)
}
