// Shared fixtures for integration tests: a scripted fetch transport
// and kernel construction over a temp database with dummy storage.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use limpet_common::DocClass;
use limpet_daemon::extract::ExtractorRegistry;
use limpet_daemon::fetcher::{FetchBackend, FetchError, FetchSettings, Fetcher, FetchedDocument};
use limpet_daemon::kernel::{Kernel, KernelContext};
use limpet_daemon::notify::{self, Dispatcher, HandlerRegistry};
use limpet_daemon::storage::{DummyStorage, StorageRegistry};
use limpet_daemon::store::MetaDb;
use limpet_daemon::versioning::VersioningRegistry;

static COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn unique_temp_db_path(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after unix epoch")
        .as_nanos();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("limpet-test-{prefix}-{nanos}-{seq}"));
    std::fs::create_dir_all(&dir).expect("should create temp test dir");
    dir.join("limpet.db")
}

pub fn cleanup_db(path: &PathBuf) {
    let path_str = path.display().to_string();
    let _ = std::fs::remove_file(path);
    let _ = std::fs::remove_file(format!("{path_str}-wal"));
    let _ = std::fs::remove_file(format!("{path_str}-shm"));
}

/// Scripted transport: pops queued responses first, then repeats the
/// fallback. Panics when exhausted with no fallback set.
#[derive(Clone, Default)]
pub struct ScriptedFetch {
    inner: Arc<ScriptedFetchInner>,
}

#[derive(Default)]
struct ScriptedFetchInner {
    responses: Mutex<VecDeque<Result<FetchedDocument, FetchError>>>,
    fallback: Mutex<Option<Result<FetchedDocument, FetchError>>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedFetch {
    pub fn push_ok(&self, body: &[u8]) {
        self.inner.responses.lock().unwrap().push_back(Ok(FetchedDocument {
            body: body.to_vec(),
            content_type: "text/plain".into(),
        }));
    }

    pub fn push_err(&self, message: &str) {
        self.inner.responses.lock().unwrap().push_back(Err(FetchError::Transport {
            url: "http://example.test/scripted".into(),
            message: message.into(),
        }));
    }

    pub fn always_ok(&self, body: &[u8]) {
        *self.inner.fallback.lock().unwrap() = Some(Ok(FetchedDocument {
            body: body.to_vec(),
            content_type: "text/plain".into(),
        }));
    }

    pub fn always_err(&self, message: &str) {
        *self.inner.fallback.lock().unwrap() = Some(Err(FetchError::Transport {
            url: "http://example.test/scripted".into(),
            message: message.into(),
        }));
    }

    /// URLs this transport was asked to fetch, in order.
    pub fn requests(&self) -> Vec<String> {
        self.inner.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl FetchBackend for ScriptedFetch {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        self.inner.requests.lock().unwrap().push(url.to_string());
        if let Some(response) = self.inner.responses.lock().unwrap().pop_front() {
            return response;
        }
        self.inner.fallback.lock().unwrap().clone().expect("scripted fetch exhausted")
    }
}

/// The doc classes most scenarios need.
pub fn default_classes() -> HashMap<String, DocClass> {
    let mut classes = HashMap::new();
    classes.insert(
        "default".to_string(),
        DocClass { update_mins: Some(30.0), ..Default::default() },
    );
    classes.insert(
        "fast-update".to_string(),
        DocClass { update_mins: Some(0.01), ..Default::default() },
    );
    classes.insert("one-time".to_string(), DocClass::default());
    classes.insert(
        "change-hook".to_string(),
        DocClass {
            update_mins: Some(30.0),
            onchanged: vec!["hook".to_string()],
            ..Default::default()
        },
    );
    classes
}

/// One shared context + dispatcher over a temp database. Kernels built
/// from it share the dummy storage and the notification channel.
pub struct Harness {
    pub ctx: KernelContext,
    pub dispatcher: Dispatcher,
    pub db_path: PathBuf,
}

impl Harness {
    pub fn new(
        classes: HashMap<String, DocClass>,
        handlers: HandlerRegistry,
        retry_attempts: u32,
        retry_wait_minutes: f64,
    ) -> Self {
        Self::new_at(
            unique_temp_db_path("harness"),
            classes,
            handlers,
            retry_attempts,
            retry_wait_minutes,
        )
    }

    pub fn new_at(
        db_path: PathBuf,
        classes: HashMap<String, DocClass>,
        handlers: HandlerRegistry,
        retry_attempts: u32,
        retry_wait_minutes: f64,
    ) -> Self {
        let mut storage = StorageRegistry::new();
        storage.register("dummy", Arc::new(DummyStorage::new()));

        let (notifications, dispatcher) = notify::channel(handlers);
        let ctx = KernelContext {
            doc_classes: Arc::new(classes),
            default_storage_engine: "dummy".into(),
            storage,
            versioning: Arc::new(VersioningRegistry::with_defaults()),
            extractors: Arc::new(ExtractorRegistry::with_defaults()),
            notifications,
            retry_attempts,
            retry_wait_minutes,
            log_maxsize: 1_000_000,
        };
        ctx.validate().expect("test context should validate");

        Self { ctx, dispatcher, db_path }
    }

    /// A kernel with its own connection and scripted transport, sharing
    /// this harness's registries.
    pub fn kernel(&self) -> (Kernel, ScriptedFetch) {
        let fetch = ScriptedFetch::default();
        let settings = FetchSettings {
            user_agent: "limpet-test".into(),
            request_timeout: Duration::from_secs(5),
            requests_per_minute: 0,
            fetch_retries: 0,
            fetch_retry_wait: Duration::ZERO,
        };
        let fetcher = Fetcher::with_backend(Box::new(fetch.clone()), &settings);
        let db = MetaDb::open(&self.db_path).expect("meta db should open");
        (Kernel::new(db, fetcher, self.ctx.clone()), fetch)
    }
}
