//! Shared application state for the Axum API server.

use std::sync::Arc;

use pushgate_engine::feedback::Feedback;

use crate::registry::ServiceRegistry;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ServiceRegistry>,
    pub feedback: Arc<Feedback>,
}

impl AppState {
    pub fn new(registry: Arc<ServiceRegistry>, feedback: Arc<Feedback>) -> Self {
        Self { registry, feedback }
    }
}
