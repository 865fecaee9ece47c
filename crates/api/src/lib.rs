//! Ingestion API and dispatch server of the push gateway.
//!
//! Endpoints:
//! - POST /api/push/{service}: validate and enqueue a raw payload
//! - POST /api/feedback: drain invalid-token reports
//! - GET  /api/stats: per-service delivery counters
//! - GET  /health: liveness and registered services

pub mod registry;
pub mod routes;
pub mod server;
pub mod state;
