//! Per-service batching of messages that share a squash key.
//!
//! Workers hand converted messages to the squasher task, which groups them by
//! key and delivers each group with a single `squash_and_push_message` call.
//! A window opens with the first message after an idle period; when it closes
//! every pending group is flushed. A group is flushed early when it reaches
//! `squash_max`, and everything pending is flushed on shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::feedback::FeedbackCollector;
use crate::service::{PushService, ServiceMessage};
use crate::worker::report_outcome;

/// Messages buffered between workers and the squasher task.
const CHANNEL_CAPACITY: usize = 1024;

/// Groups messages by squash key, remembering first-arrival order of keys.
#[derive(Debug)]
pub struct Batcher<M> {
    max_batch: usize,
    groups: HashMap<String, Vec<M>>,
    order: Vec<String>,
}

impl<M: ServiceMessage> Batcher<M> {
    /// `max_batch == 0` leaves groups uncapped.
    pub fn new(max_batch: usize) -> Self {
        Self {
            max_batch,
            groups: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Add a message. Returns its group when the group just reached the cap.
    pub fn push(&mut self, message: M) -> Option<(String, Vec<M>)> {
        let key = message.squash_key().to_string();
        if !self.groups.contains_key(&key) {
            self.order.push(key.clone());
        }
        let group = self.groups.entry(key.clone()).or_default();
        group.push(message);

        if self.max_batch > 0 && group.len() >= self.max_batch {
            self.order.retain(|k| k != &key);
            return self.groups.remove(&key).map(|batch| (key, batch));
        }
        None
    }

    /// Take every pending group in first-arrival order of their keys.
    pub fn drain(&mut self) -> Vec<(String, Vec<M>)> {
        let order = std::mem::take(&mut self.order);
        order
            .into_iter()
            .filter_map(|key| self.groups.remove(&key).map(|batch| (key, batch)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of buffered messages across all groups.
    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

/// Handle used by workers to submit messages to a running squasher.
pub struct Squasher<M> {
    tx: mpsc::Sender<M>,
}

impl<M> Clone for Squasher<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M: ServiceMessage> Squasher<M> {
    /// Spawn the squasher task for a service.
    ///
    /// The task ends once every `Squasher` handle is dropped and the final
    /// partial batches are flushed.
    pub fn spawn<S>(
        service: Arc<S>,
        client: S::Client,
        feedback: Arc<dyn FeedbackCollector>,
        window: Duration,
        max_batch: usize,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>)
    where
        S: PushService<Message = M>,
    {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let task = SquashTask {
            sink: BatchSink {
                service,
                client,
                feedback,
            },
            window,
            batcher: Batcher::new(max_batch),
        };
        let handle = tokio::spawn(task.run(rx, cancel));
        (Self { tx }, handle)
    }

    /// Queue a message for the next flush.
    ///
    /// Gives the message back if the squasher task is gone.
    pub async fn submit(&self, message: M) -> Result<(), M> {
        self.tx.send(message).await.map_err(|e| e.0)
    }
}

struct SquashTask<S: PushService> {
    sink: BatchSink<S>,
    window: Duration,
    batcher: Batcher<S::Message>,
}

impl<S: PushService> SquashTask<S> {
    async fn run(mut self, mut rx: mpsc::Receiver<S::Message>, cancel: CancellationToken) {
        let mut deadline: Option<Instant> = None;
        let mut draining = false;

        loop {
            tokio::select! {
                received = rx.recv() => {
                    let Some(message) = received else { break };
                    if deadline.is_none() {
                        deadline = Some(window_end(self.window));
                    }
                    if let Some((key, batch)) = self.batcher.push(message) {
                        self.sink.flush(&key, batch).await;
                    }
                    if draining {
                        self.flush_all().await;
                    }
                    if self.batcher.is_empty() {
                        deadline = None;
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.flush_all().await;
                    deadline = None;
                }
                _ = cancel.cancelled(), if !draining => {
                    draining = true;
                    self.flush_all().await;
                    deadline = None;
                }
            }
        }

        self.flush_all().await;
        tracing::debug!(service = self.sink.service.id(), "Squasher stopped");
    }

    async fn flush_all(&mut self) {
        for (key, batch) in self.batcher.drain() {
            self.sink.flush(&key, batch).await;
        }
    }
}

/// Close of a window opened now. Saturates for windows too long to represent.
fn window_end(window: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(window)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}

/// The provider side of the squasher. Kept apart from the batcher so that
/// pending messages are never borrowed across a provider call.
struct BatchSink<S: PushService> {
    service: Arc<S>,
    client: S::Client,
    feedback: Arc<dyn FeedbackCollector>,
}

impl<S: PushService> BatchSink<S> {
    async fn flush(&self, key: &str, batch: Vec<S::Message>) {
        let size = batch.len();
        let started = std::time::Instant::now();
        let status = self
            .service
            .squash_and_push_message(&self.client, batch, self.feedback.as_ref())
            .await;
        let elapsed = started.elapsed();

        tracing::debug!(
            service = self.service.id(),
            squash_key = key,
            size,
            status = %status,
            "Flushed batch"
        );
        for _ in 0..size {
            report_outcome(self.service.id(), status, elapsed, self.feedback.as_ref());
        }
    }
}
