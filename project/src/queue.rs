//! Debounced, coalescing work queue feeding one async batch handler.
//!
//! Items pile up while input keeps arriving; once nothing new shows up for the
//! debounce window, everything pending goes to the handler as one batch. Work
//! added while a batch is running forms the next batch.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::{iter, mem};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

enum Command<T> {
    Add(Vec<T>),
    Flush,
    Shutdown,
}

/// Insertion-ordered set where re-adding an equal item replaces it in place.
struct PendingBatch<T> {
    items: Vec<T>,
    index: HashMap<T, usize>,
}

impl<T: Clone + Eq + Hash> PendingBatch<T> {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn push(&mut self, item: T) {
        if let Some(&slot) = self.index.get(&item) {
            self.items[slot] = item;
        } else {
            self.index.insert(item.clone(), self.items.len());
            self.items.push(item);
        }
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn take(&mut self) -> Vec<T> {
        self.index.clear();
        mem::take(&mut self.items)
    }
}

/// Handle to a running queue. Clones feed the same worker.
pub struct BatchingWorkQueue<T> {
    tx: mpsc::UnboundedSender<Command<T>>,
    /// Items ever submitted, duplicates and follow-ups included.
    enqueued: Arc<AtomicU64>,
    /// Items fully processed, published only when the queue is settled.
    completed: watch::Receiver<u64>,
}

impl<T> Clone for BatchingWorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            enqueued: Arc::clone(&self.enqueued),
            completed: self.completed.clone(),
        }
    }
}

impl<T> BatchingWorkQueue<T>
where
    T: Clone + Eq + Hash + Send + 'static,
{
    /// Spawn the worker. `handler` receives each batch and returns follow-up
    /// items, which are queued as part of the same settling round.
    pub fn new<F, Fut>(debounce: Duration, handler: F) -> Self
    where
        F: FnMut(Vec<T>) -> Fut + Send + 'static,
        Fut: Future<Output = Vec<T>> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (completed_tx, completed) = watch::channel(0);
        let enqueued = Arc::new(AtomicU64::new(0));

        let worker = Worker {
            rx,
            debounce,
            handler,
            enqueued: Arc::clone(&enqueued),
            completed_tx,
            pending: PendingBatch::new(),
            received: 0,
            shutting_down: false,
        };
        tokio::spawn(worker.run());

        Self {
            tx,
            enqueued,
            completed,
        }
    }

    pub fn add_work(&self, item: T) {
        self.add_work_items(iter::once(item));
    }

    pub fn add_work_items(&self, items: impl IntoIterator<Item = T>) {
        let items: Vec<T> = items.into_iter().collect();
        if items.is_empty() {
            return;
        }
        self.enqueued
            .fetch_add(items.len() as u64, Ordering::SeqCst);
        if self.tx.send(Command::Add(items)).is_err() {
            tracing::debug!("work queue is shut down; dropping work");
        }
    }

    /// End the current debounce window now.
    pub fn flush(&self) {
        let _ = self.tx.send(Command::Flush);
    }

    /// Let a running batch finish but start no new one.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }

    /// Wait until everything enqueued before this call, plus any follow-up
    /// work it produced, has been handled.
    pub async fn wait_until_current_batch_completes(&self) {
        let target = self.enqueued.load(Ordering::SeqCst);
        let mut completed = self.completed.clone();
        // An error means the worker is gone; nothing more will complete.
        let _ = completed.wait_for(|done| *done >= target).await;
    }
}

struct Worker<T, F> {
    rx: mpsc::UnboundedReceiver<Command<T>>,
    debounce: Duration,
    handler: F,
    enqueued: Arc<AtomicU64>,
    completed_tx: watch::Sender<u64>,
    pending: PendingBatch<T>,
    received: u64,
    shutting_down: bool,
}

impl<T, F, Fut> Worker<T, F>
where
    T: Clone + Eq + Hash + Send + 'static,
    F: FnMut(Vec<T>) -> Fut + Send + 'static,
    Fut: Future<Output = Vec<T>> + Send + 'static,
{
    async fn run(mut self) {
        loop {
            if self.shutting_down {
                break;
            }

            // Idle.
            if self.pending.is_empty() {
                match self.rx.recv().await {
                    Some(cmd) => self.apply(cmd),
                    None => break,
                }
                continue;
            }

            // Debouncing.
            if !self.debounce_window().await {
                break;
            }

            // Draining.
            let batch = self.pending.take();
            tracing::debug!(items = batch.len(), "processing batch");
            let follow_ups = (self.handler)(batch).await;
            if !follow_ups.is_empty() {
                self.enqueued
                    .fetch_add(follow_ups.len() as u64, Ordering::SeqCst);
                self.received += follow_ups.len() as u64;
                for item in follow_ups {
                    self.pending.push(item);
                }
            }

            while let Ok(cmd) = self.rx.try_recv() {
                self.apply(cmd);
            }
            if self.pending.is_empty() {
                self.completed_tx.send_replace(self.received);
            }
        }
        tracing::debug!("work queue stopped");
    }

    /// Returns `false` when the queue is shutting down and the batch must not run.
    async fn debounce_window(&mut self) -> bool {
        let sleep = time::sleep(self.debounce);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return true,
                cmd = self.rx.recv() => match cmd {
                    Some(Command::Add(items)) => {
                        self.add(items);
                        sleep.as_mut().reset(Instant::now() + self.debounce);
                    }
                    Some(Command::Flush) | None => return true,
                    Some(Command::Shutdown) => {
                        self.shutting_down = true;
                        return false;
                    }
                },
            }
        }
    }

    fn apply(&mut self, cmd: Command<T>) {
        match cmd {
            Command::Add(items) => self.add(items),
            Command::Flush => {}
            Command::Shutdown => self.shutting_down = true,
        }
    }

    fn add(&mut self, items: Vec<T>) {
        self.received += items.len() as u64;
        for item in items {
            self.pending.push(item);
        }
    }
}
