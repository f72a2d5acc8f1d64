// Update workers: parallel, interchangeable consumers of the job
// channel.
//
// Each worker owns its own kernel (its own sqlite connection and HTTP
// client); the receiver is shared behind an async mutex. The in-flight
// counter is decremented whether or not the update succeeded — only a
// worker crash leaves it elevated. Channel close is the drain-then-exit
// signal: workers finish whatever is queued, then return.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::kernel::Kernel;
use crate::scheduler::UpdateJob;
use crate::store::status::StatusStore;

pub type SharedJobs = Arc<Mutex<mpsc::Receiver<UpdateJob>>>;

pub struct Worker {
    id: usize,
    kernel: Kernel,
    jobs: SharedJobs,
}

impl Worker {
    pub fn new(id: usize, kernel: Kernel, jobs: SharedJobs) -> Self {
        Self { id, kernel, jobs }
    }

    pub async fn run(mut self) {
        loop {
            // Hold the receiver lock only while waiting, not while
            // updating, so the rest of the pool keeps consuming.
            let job = { self.jobs.lock().await.recv().await };
            let Some(job) = job else {
                info!(worker = self.id, "job channel closed, exiting");
                break;
            };
            self.process(job).await;
        }
    }

    async fn process(&mut self, job: UpdateJob) {
        if let Err(kernel_error) = self.kernel.update(&job.doc_id).await {
            // Fetch problems are recorded on the document inside
            // `update`; anything surfacing here is config or
            // infrastructure trouble.
            warn!(worker = self.id, doc_id = %job.doc_id, %kernel_error, "update failed");
        }

        if let Err(db_error) = StatusStore::adjust(self.kernel.db().connection(), -1) {
            error!(worker = self.id, %db_error, "failed to decrement in-flight counter");
        }
    }
}
