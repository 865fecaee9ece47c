//! Per-service worker pool.
//!
//! Each worker loops: pop a raw payload, convert it, wait for a rate-limit
//! token, then push it directly or hand it to the squasher. Delivery outcomes
//! are reported to the feedback collector; nothing is re-enqueued.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use pushgate_common::error::AppError;
use pushgate_common::types::{PushStatus, SquashConfig};

use crate::backoff::Backoff;
use crate::feedback::FeedbackCollector;
use crate::queue::Queue;
use crate::rate_limiter::RateLimiter;
use crate::service::PushService;
use crate::squasher::Squasher;

/// A registered service as seen by the dispatch server, with the provider
/// type erased.
#[async_trait]
pub trait ServicePump: Send + Sync {
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    fn worker_count(&self) -> usize;

    fn queue(&self) -> &Arc<dyn Queue>;

    fn validate(&self, raw: &[u8]) -> Result<(), AppError>;

    /// Validate a raw payload and append it to the service's queue.
    async fn enqueue(&self, raw: Vec<u8>) -> Result<(), AppError> {
        self.validate(&raw)?;
        self.queue().push(raw).await
    }

    /// Spawn the workers. Returns `None` if they were already started.
    async fn start(&self, cancel: CancellationToken) -> Option<PoolHandle>;
}

/// Workers, rate limiter and squasher bound to one service and its queue.
pub struct WorkerPool<S: PushService> {
    service: Arc<S>,
    queue: Arc<dyn Queue>,
    limiter: Arc<RateLimiter>,
    feedback: Arc<dyn FeedbackCollector>,
    squash: SquashConfig,
    workers: usize,
    /// Clients built at registration, taken when the pool starts.
    clients: Mutex<Option<Vec<S::Client>>>,
}

impl<S: PushService> WorkerPool<S> {
    /// Wire a service to its queue.
    ///
    /// Clients are constructed up front: one per worker, or a single one for
    /// the squasher when batching is enabled. Any construction failure fails
    /// the registration.
    pub fn new(
        service: S,
        queue: Arc<dyn Queue>,
        workers: usize,
        squash: SquashConfig,
        feedback: Arc<dyn FeedbackCollector>,
    ) -> Result<Self, AppError> {
        if workers == 0 {
            return Err(AppError::Config(format!(
                "{}: worker count must be positive",
                service.display_name()
            )));
        }

        let client_count = if squash.is_squashing() { 1 } else { workers };
        let clients = (0..client_count)
            .map(|_| service.new_client())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                AppError::ServiceSetup(format!(
                    "{}: creating client: {}",
                    service.display_name(),
                    e
                ))
            })?;

        Ok(Self {
            service: Arc::new(service),
            queue,
            limiter: Arc::new(RateLimiter::from_config(&squash)),
            feedback,
            squash,
            workers,
            clients: Mutex::new(Some(clients)),
        })
    }
}

#[async_trait]
impl<S: PushService> ServicePump for WorkerPool<S> {
    fn id(&self) -> &str {
        self.service.id()
    }

    fn display_name(&self) -> &str {
        self.service.display_name()
    }

    fn worker_count(&self) -> usize {
        self.workers
    }

    fn queue(&self) -> &Arc<dyn Queue> {
        &self.queue
    }

    fn validate(&self, raw: &[u8]) -> Result<(), AppError> {
        self.service.validate(raw)
    }

    async fn start(&self, cancel: CancellationToken) -> Option<PoolHandle> {
        let mut clients = self.clients.lock().await.take()?;

        let mut squasher_task = None;
        let mut deliveries: Vec<Delivery<S>> = Vec::with_capacity(self.workers);
        if self.squash.is_squashing() {
            let client = clients.pop()?;
            let (squasher, task) = Squasher::spawn(
                self.service.clone(),
                client,
                self.feedback.clone(),
                self.squash.squash_window,
                self.squash.squash_max,
                cancel.clone(),
            );
            squasher_task = Some(task);
            // Workers hold the only senders, so the squasher winds down once
            // they have all exited.
            deliveries.extend((0..self.workers).map(|_| Delivery::Squashed(squasher.clone())));
        } else {
            deliveries.extend(clients.into_iter().map(Delivery::Direct));
        }

        let workers = deliveries
            .into_iter()
            .enumerate()
            .map(|(index, delivery)| {
                let worker = Worker {
                    index,
                    service: self.service.clone(),
                    queue: self.queue.clone(),
                    limiter: self.limiter.clone(),
                    feedback: self.feedback.clone(),
                    delivery,
                };
                tokio::spawn(worker.run(cancel.clone()))
            })
            .collect();

        tracing::info!(
            service = self.service.id(),
            workers = self.workers,
            queue = self.queue.name(),
            rate_max = self.squash.rate_max,
            rate_per_ms = self.squash.rate_per.as_millis() as u64,
            squash_window_ms = self.squash.squash_window.as_millis() as u64,
            "Worker pool started"
        );

        Some(PoolHandle {
            service: self.service.id().to_string(),
            workers,
            squasher: squasher_task,
        })
    }
}

/// Running tasks of a started pool.
pub struct PoolHandle {
    service: String,
    workers: Vec<JoinHandle<()>>,
    squasher: Option<JoinHandle<()>>,
}

impl PoolHandle {
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Wait for every worker to stop, then for the squasher's final flush.
    ///
    /// Cancel-safe: handles are only released once their task has finished,
    /// so [`PoolHandle::abort`] still reaches whatever is left.
    pub async fn join(&mut self) {
        while let Some(worker) = self.workers.last_mut() {
            if let Err(e) = worker.await {
                tracing::error!(service = %self.service, error = %e, "Worker task failed");
            }
            self.workers.pop();
        }
        if let Some(squasher) = self.squasher.as_mut() {
            if let Err(e) = squasher.await {
                tracing::error!(service = %self.service, error = %e, "Squasher task failed");
            }
            self.squasher = None;
        }
    }

    /// Abandon whatever is still running.
    pub fn abort(&self) {
        for worker in &self.workers {
            worker.abort();
        }
        if let Some(squasher) = &self.squasher {
            squasher.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.workers.is_empty() && self.squasher.is_none()
    }
}

enum Delivery<S: PushService> {
    Direct(S::Client),
    Squashed(Squasher<S::Message>),
}

struct Worker<S: PushService> {
    index: usize,
    service: Arc<S>,
    queue: Arc<dyn Queue>,
    limiter: Arc<RateLimiter>,
    feedback: Arc<dyn FeedbackCollector>,
    delivery: Delivery<S>,
}

impl<S: PushService> Worker<S> {
    async fn run(self, cancel: CancellationToken) {
        let service = self.service.id();
        tracing::debug!(service, worker = self.index, "Worker started");

        let mut backoff = Backoff::default();
        loop {
            let raw = match self.queue.pop(&cancel).await {
                Ok(Some(raw)) => {
                    backoff.reset();
                    raw
                }
                Ok(None) => break,
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        service,
                        worker = self.index,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Dequeue failed, backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };

            let message = match self.service.convert_message(&raw) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(
                        service,
                        worker = self.index,
                        error = %e,
                        "Dropping message that failed conversion"
                    );
                    continue;
                }
            };

            if !self.limiter.acquire(&cancel).await {
                tracing::warn!(
                    service,
                    worker = self.index,
                    "Shutdown before push, dropping dequeued message"
                );
                break;
            }

            match &self.delivery {
                Delivery::Direct(client) => {
                    let started = Instant::now();
                    let status = self
                        .service
                        .push_message(client, message, self.feedback.as_ref())
                        .await;
                    report_outcome(service, status, started.elapsed(), self.feedback.as_ref());
                }
                Delivery::Squashed(squasher) => {
                    if squasher.submit(message).await.is_err() {
                        tracing::error!(
                            service,
                            worker = self.index,
                            "Squasher is gone, dropping message"
                        );
                    }
                }
            }
        }

        tracing::debug!(service, worker = self.index, "Worker stopped");
    }
}

/// Log a delivery outcome and record it with the feedback collector.
pub(crate) fn report_outcome(
    service_id: &str,
    status: PushStatus,
    elapsed: Duration,
    feedback: &dyn FeedbackCollector,
) {
    let elapsed_ms = elapsed.as_millis() as u64;
    match status {
        PushStatus::Success => tracing::debug!(service = service_id, elapsed_ms, "Pushed"),
        PushStatus::TempFail => tracing::warn!(
            service = service_id,
            elapsed_ms,
            "Push failed temporarily; not retried"
        ),
        PushStatus::HardFail => tracing::warn!(
            service = service_id,
            elapsed_ms,
            "Push rejected permanently; dropped"
        ),
    }
    feedback.count_push(service_id, status.is_success(), elapsed);
}
