use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, mpsc};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// FIFO work queue drained by one dedicated thread.
///
/// Clones post to the same thread. The thread exits once every clone is dropped and the queued
/// jobs have run. A panicking job is logged and the queue keeps draining.
#[derive(Clone)]
pub struct SerialQueue {
    label: Arc<str>,
    tx: mpsc::Sender<Job>,
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("label", &self.label)
            .finish()
    }
}

impl SerialQueue {
    pub fn new(label: &str) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let label: Arc<str> = Arc::from(label);
        let thread_label = label.clone();
        std::thread::Builder::new()
            .name(label.to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        tracing::error!(queue = %thread_label, "job panicked");
                    }
                }
                tracing::trace!(queue = %thread_label, "queue drained");
            })?;
        Ok(Self { label, tx })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Enqueue `job`. Returns `false` when the worker thread is gone.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(Box::new(job)).is_ok()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/session/queue.rs"]
mod tests;
