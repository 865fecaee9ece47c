//! `HttpClient` against a live ingestion endpoint backed by the in-memory
//! queue. Workers are not started, so accepted payloads stay queued.

use std::sync::Arc;

use pushgate_api::server::DispatchServer;
use pushgate_client::{Client, HttpClient};
use pushgate_common::error::AppError;
use pushgate_common::types::SquashConfig;
use pushgate_engine::queue::MemoryQueueFactory;
use pushgate_services::fcm::Fcm;

async fn gateway() -> (Arc<DispatchServer>, String) {
    let server = Arc::new(DispatchServer::new(
        "127.0.0.1:0".parse().unwrap(),
        Arc::new(MemoryQueueFactory),
    ));
    server
        .add_service(Fcm::new("test-key").unwrap(), 1, SquashConfig::default())
        .await
        .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server.router();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    (server, format!("http://{}/", addr))
}

async fn queued(server: &DispatchServer) -> usize {
    let pump = server.registry().get("fcm").await.unwrap();
    pump.queue().len().await.unwrap()
}

#[tokio::test]
async fn test_valid_payload_is_accepted() {
    let (server, url) = gateway().await;
    let client = HttpClient::new(url).unwrap();

    client
        .push_raw("fcm", br#"{"to":"device-1","data":{"score":"3-1"}}"#)
        .await
        .unwrap();
    assert_eq!(queued(&server).await, 1);
}

#[tokio::test]
async fn test_rejections_are_typed() {
    let (server, url) = gateway().await;
    let client = HttpClient::new(url).unwrap();

    let err = client.push_raw("apns", b"{}").await.unwrap_err();
    assert!(matches!(err, AppError::UnknownService(id) if id == "apns"));

    let err = client
        .push_raw("fcm", br#"{"to":"a","registration_ids":["b"]}"#)
        .await
        .unwrap_err();
    match err {
        AppError::Validation(reason) => assert_eq!(reason, "both to/registration_ids specified"),
        other => panic!("unexpected error: {}", other),
    }

    assert_eq!(queued(&server).await, 0);
}

#[tokio::test]
async fn test_unreachable_gateway_is_queue_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = HttpClient::new(format!("http://{}", addr)).unwrap();
    let err = client.push_raw("fcm", b"{}").await.unwrap_err();
    assert!(matches!(err, AppError::Queue(_)));
}
