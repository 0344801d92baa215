//! Tracking Queue: bounded worker pool over a bounded channel
//!
//! ```text
//!   push ──► [ mpsc channel (capacity) ] ──► worker 1 ─┐
//!                                        ├──► worker 2 ─┼──► processor(item)
//!                                        └──► worker N ─┘         │
//!                                                                 ▼ Err
//!                                                     on_error(item, err, control)
//! ```
//!
//! Each item runs in its own task, so a panicking processor is reported as an
//! [`ArchivistError::Task`] instead of taking a worker down. Stopping the
//! queue makes workers drop queued items once their current item completes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;

use crate::error::ArchivistError;

pub type JobFuture = Pin<Box<dyn Future<Output = Result<(), ArchivistError>> + Send>>;

/// Runs one queued item
pub type Processor<T> = Arc<dyn Fn(T) -> JobFuture + Send + Sync>;

/// Called with the item whose processing failed
pub type ErrorHandler<T> = Arc<dyn Fn(T, ArchivistError, &QueueControl) + Send + Sync>;

/// Handle to stop a queue from the outside or from its error handler
#[derive(Clone)]
pub struct QueueControl {
    stopped: Arc<watch::Sender<bool>>,
}

impl QueueControl {
    /// Stop accepting and starting work. Items already running complete.
    pub fn stop(&self) {
        self.stopped.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    /// Resolves once the queue is stopped
    pub async fn stopped(&self) {
        let mut receiver = self.stopped.subscribe();
        while !*receiver.borrow_and_update() {
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }
}

pub struct TrackingQueue<T> {
    sender: mpsc::Sender<T>,
    workers: JoinSet<usize>,
    control: QueueControl,
    concurrency: usize,
}

impl<T> TrackingQueue<T>
where
    T: Clone + Send + 'static,
{
    /// Spawn `concurrency` workers reading from a channel of `capacity` items.
    /// Must be called from within a tokio runtime.
    pub fn new(
        concurrency: usize,
        capacity: usize,
        processor: Processor<T>,
        on_error: ErrorHandler<T>,
    ) -> Self {
        let concurrency = concurrency.max(1);
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let (stopped, _) = watch::channel(false);
        let control = QueueControl {
            stopped: Arc::new(stopped),
        };

        let mut workers = JoinSet::new();
        for worker_id in 0..concurrency {
            workers.spawn(worker(
                worker_id,
                Arc::clone(&receiver),
                Arc::clone(&processor),
                Arc::clone(&on_error),
                control.clone(),
            ));
        }

        Self {
            sender,
            workers,
            control,
            concurrency,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn control(&self) -> QueueControl {
        self.control.clone()
    }

    /// Enqueue an item, waiting for channel capacity. Returns `false` when
    /// the queue is stopped and the item was dropped.
    pub async fn push(&self, item: T) -> bool {
        if self.control.is_stopped() {
            return false;
        }
        self.sender.send(item).await.is_ok()
    }

    /// Close the queue and wait until every queued item has been processed
    /// (or dropped, if stopped) and every worker has exited. Returns the
    /// number of items processed.
    pub async fn drain(self) -> usize {
        let Self {
            sender,
            mut workers,
            ..
        } = self;
        drop(sender);

        let mut processed = 0;
        while let Some(result) = workers.join_next().await {
            match result {
                Ok(count) => processed += count,
                Err(err) => tracing::error!(error = %err, "queue worker failed"),
            }
        }
        processed
    }
}

async fn worker<T>(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<T>>>,
    processor: Processor<T>,
    on_error: ErrorHandler<T>,
    control: QueueControl,
) -> usize
where
    T: Clone + Send + 'static,
{
    let mut processed = 0;
    loop {
        if control.is_stopped() {
            break;
        }

        let next = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                item = receiver.recv() => item,
                () = control.stopped() => None,
            }
        };
        let Some(item) = next else {
            break;
        };

        let outcome = tokio::spawn(processor(item.clone())).await;
        processed += 1;
        let error = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => err,
            Err(join) => ArchivistError::from(join),
        };
        on_error(item, error, &control);
    }

    tracing::trace!(worker_id, processed, "queue worker exiting");
    processed
}
