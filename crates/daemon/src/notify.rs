// Change-notification fan-out.
//
// When a new version lands the kernel posts one event per `onchanged`
// entry of the doc class; a dispatcher task resolves task names through
// the handler registry and invokes them. Delivery is at-least-once, so
// handlers must tolerate repeated events for the same document id (they
// typically re-read the latest version, which makes that natural).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One dispatched change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Downstream task name from the doc class's `onchanged` list.
    pub task: String,
    pub doc_id: String,
}

pub type ChangeHandler = Arc<dyn Fn(&ChangeEvent) -> anyhow::Result<()> + Send + Sync>;

/// Name → handler registry, populated once at startup so configuration
/// stays pure data.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, ChangeHandler>,
}

impl HandlerRegistry {
    pub fn register(&mut self, name: impl Into<String>, handler: ChangeHandler) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<ChangeHandler> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

/// Cheap handle the kernel uses to post events.
#[derive(Clone)]
pub struct NotificationSender {
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl NotificationSender {
    pub fn dispatch(&self, task: &str, doc_id: &str) {
        let event = ChangeEvent { task: task.to_string(), doc_id: doc_id.to_string() };
        if self.tx.send(event).is_err() {
            warn!(task, doc_id, "notification dispatcher is gone, dropping change event");
        }
    }
}

/// Consumes posted events and runs the matching handlers. Exits when
/// every `NotificationSender` clone has been dropped and the queue has
/// drained.
pub struct Dispatcher {
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
    registry: HandlerRegistry,
}

impl Dispatcher {
    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            match self.registry.get(&event.task) {
                Some(handler) => {
                    debug!(task = %event.task, doc_id = %event.doc_id, "running change handler");
                    if let Err(error) = handler(&event) {
                        warn!(
                            task = %event.task,
                            doc_id = %event.doc_id,
                            %error,
                            "change handler failed"
                        );
                    }
                }
                None => {
                    warn!(task = %event.task, doc_id = %event.doc_id, "no handler for task");
                }
            }
        }
    }
}

pub fn channel(registry: HandlerRegistry) -> (NotificationSender, Dispatcher) {
    let (tx, rx) = mpsc::unbounded_channel();
    (NotificationSender { tx }, Dispatcher { rx, registry })
}
