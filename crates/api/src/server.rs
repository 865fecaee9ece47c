//! Dispatch server: service registrations, their worker pools and the
//! ingestion endpoint, under one shutdown token.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use pushgate_common::error::AppError;
use pushgate_common::types::SquashConfig;
use pushgate_engine::feedback::{Feedback, FeedbackCollector};
use pushgate_engine::queue::QueueFactory;
use pushgate_engine::service::PushService;
use pushgate_engine::worker::{PoolHandle, WorkerPool};

use crate::registry::ServiceRegistry;
use crate::routes::create_router;
use crate::state::AppState;

/// Largest accepted ingestion body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

pub struct DispatchServer {
    addr: SocketAddr,
    queues: Arc<dyn QueueFactory>,
    registry: Arc<ServiceRegistry>,
    feedback: Arc<Feedback>,
    cancel: CancellationToken,
    pools: Mutex<Vec<PoolHandle>>,
}

impl DispatchServer {
    pub fn new(addr: SocketAddr, queues: Arc<dyn QueueFactory>) -> Self {
        Self::with_feedback(addr, queues, Arc::new(Feedback::default()))
    }

    pub fn with_feedback(
        addr: SocketAddr,
        queues: Arc<dyn QueueFactory>,
        feedback: Arc<Feedback>,
    ) -> Self {
        Self {
            addr,
            queues,
            registry: Arc::new(ServiceRegistry::new()),
            feedback,
            cancel: CancellationToken::new(),
            pools: Mutex::new(Vec::new()),
        }
    }

    pub fn feedback(&self) -> &Arc<Feedback> {
        &self.feedback
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Register a service with its queue, rate limiter, squasher and workers.
    ///
    /// Fails on a duplicate identity, a zero worker count, or when the service
    /// cannot construct its clients. Workers are not started until
    /// [`DispatchServer::start_workers`] or [`DispatchServer::serve`].
    pub async fn add_service<S: PushService>(
        &self,
        service: S,
        workers: usize,
        squash: SquashConfig,
    ) -> Result<(), AppError> {
        let id = service.id().to_string();
        if self.registry.contains(&id).await {
            return Err(AppError::DuplicateService(id));
        }

        let queue = self.queues.new_queue(&id).await?;
        let feedback: Arc<dyn FeedbackCollector> = self.feedback.clone();
        let pool = WorkerPool::new(service, queue, workers, squash, feedback)?;
        self.registry.insert(Arc::new(pool)).await?;

        tracing::info!(service = %id, workers, "Service registered");
        Ok(())
    }

    /// Start the workers of every registered service not yet running.
    pub async fn start_workers(&self) {
        let mut pools = self.pools.lock().await;
        for pump in self.registry.all().await {
            if let Some(handle) = pump.start(self.cancel.clone()).await {
                pools.push(handle);
            }
        }
    }

    /// The ingestion router with body limit and request tracing applied.
    pub fn router(&self) -> Router {
        create_router(AppState::new(self.registry.clone(), self.feedback.clone()))
            .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address, start all workers and serve until
    /// shutdown.
    pub async fn serve(&self) -> Result<(), AppError> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_on(listener, self.router()).await
    }

    /// Serve `app` on an already bound listener until shutdown.
    pub async fn serve_on(&self, listener: TcpListener, app: Router) -> Result<(), AppError> {
        self.start_workers().await;

        let addr = listener.local_addr()?;
        let services = self.registry.len().await;
        tracing::info!(addr = %addr, services, "Dispatch server listening");

        let cancel = self.cancel.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;

        tracing::info!("Ingestion endpoint stopped");
        Ok(())
    }

    /// Stop the ingestion endpoint and every pool.
    ///
    /// Waits up to `grace` for in-flight pushes and final squash flushes.
    /// Whatever is still running then is aborted and
    /// [`AppError::ShutdownTimeout`] is returned.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), AppError> {
        tracing::info!(grace_ms = grace.as_millis() as u64, "Shutting down dispatch server");
        self.cancel.cancel();

        let mut pools = self.pools.lock().await;
        let drain = async {
            for pool in pools.iter_mut() {
                pool.join().await;
            }
        };
        let drained = tokio::time::timeout(grace, drain).await.is_ok();

        if drained {
            tracing::info!("All worker pools stopped");
            return Ok(());
        }

        for pool in pools.iter().filter(|p| !p.is_finished()) {
            tracing::warn!(service = pool.service(), "Abandoning workers still in flight");
            pool.abort();
        }
        Err(AppError::ShutdownTimeout(grace))
    }
}
