//! Background loader for filter readers.
//!
//! Opening a table must not stall on filter I/O, so a reader's initial units
//! are fetched by a single shared worker thread. Work is submitted as boxed
//! closures over a channel; the first lookup against a reader waits on the
//! reader's own condition variable until its job has run.

use std::sync::{Mutex, OnceLock};
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};

type Job = Box<dyn FnOnce() + Send>;

enum Message {
    Run(Job),
    Shutdown,
}

/// A single worker thread draining a queue of load jobs.
///
/// One scheduler serves every reader. The process-wide instance from
/// [`LoadScheduler::global`] is never shut down; owned instances drain their
/// queue and join on drop.
pub struct LoadScheduler {
    tx: Sender<Message>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LoadScheduler {
    pub fn new() -> Self {
        let (tx, rx) = unbounded::<Message>();
        let worker = std::thread::Builder::new()
            .name("ashbloom-loader".to_string())
            .spawn(move || {
                while let Ok(message) = rx.recv() {
                    match message {
                        Message::Run(job) => job(),
                        Message::Shutdown => break,
                    }
                }
            })
            .expect("failed to spawn filter loader thread");

        Self {
            tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// The process-wide scheduler.
    pub fn global() -> &'static LoadScheduler {
        static GLOBAL: OnceLock<LoadScheduler> = OnceLock::new();
        GLOBAL.get_or_init(LoadScheduler::new)
    }

    /// Queue a job. Jobs run in submission order on the worker thread.
    pub fn schedule<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tx.send(Message::Run(Box::new(job))).is_err() {
            tracing::error!("filter loader is shut down; dropping load job");
        }
    }

    /// Stop the worker after all queued jobs have run.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Message::Shutdown);
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(handle) = worker.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Default for LoadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LoadScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
