//! Pushgate dispatch server binary entrypoint.

use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use pushgate_api::server::DispatchServer;
use pushgate_common::config::AppConfig;
use pushgate_engine::feedback::Feedback;
use pushgate_engine::queue::select_factory;
use pushgate_services::fcm::Fcm;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Starting Pushgate dispatch server...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Queue backend
    let queues = select_factory(
        config.queue_redis_url.as_deref(),
        config.queue_redis_password.as_deref(),
    )
    .await?;

    let server = Arc::new(DispatchServer::with_feedback(
        config.api_addr,
        queues,
        Arc::new(Feedback::new(config.feedback_capacity)),
    ));

    // Providers
    if let Some(api_key) = &config.fcm_api_key {
        let mut fcm = Fcm::new(api_key.as_str())?;
        if let Some(endpoint) = &config.fcm_endpoint {
            fcm = fcm.with_endpoint(endpoint.as_str());
        }
        server
            .add_service(fcm, config.fcm.workers, config.fcm.squash_config())
            .await?;
    }
    if server.registry().is_empty().await {
        tracing::warn!("No push services configured; payloads will be rejected");
    }

    let listener = tokio::net::TcpListener::bind(config.api_addr).await?;
    let app = server.router().layer(CorsLayer::permissive());
    let serving = {
        let server = server.clone();
        tokio::spawn(async move { server.serve_on(listener, app).await })
    };
    tokio::pin!(serving);

    // Run until a termination signal or the endpoint fails
    tokio::select! {
        result = &mut serving => {
            match result {
                Ok(Ok(())) => tracing::warn!("Ingestion endpoint exited unexpectedly"),
                Ok(Err(e)) => tracing::error!(error = %e, "Ingestion endpoint failed"),
                Err(e) => tracing::error!(error = %e, "Ingestion task panicked"),
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    let stopped = server.shutdown(config.shutdown_grace).await;
    if !serving.is_finished() {
        serving.abort();
    }
    stopped?;

    tracing::info!("Pushgate stopped.");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            "pushgate_api=info,pushgate_engine=info,pushgate_services=info,tower_http=info",
        )
    });

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Listening for Ctrl+C failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Listening for SIGTERM failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
