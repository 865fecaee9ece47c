//! In-process providers used by the engine's unit tests.
//!
//! Raw payloads are `"<squash key>:<body>"`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use pushgate_common::error::AppError;
use pushgate_common::types::PushStatus;

use crate::feedback::FeedbackCollector;
use crate::service::{PushService, ServiceMessage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestMessage {
    pub key: String,
    pub body: String,
}

impl ServiceMessage for TestMessage {
    fn squash_key(&self) -> &str {
        &self.key
    }
}

#[derive(Debug, Clone)]
pub enum Behavior {
    Status(PushStatus),
    /// Reports the token as invalid and hard-fails.
    InvalidToken(String),
    /// Sleeps before succeeding.
    Delay(Duration),
}

#[derive(Debug, Clone)]
pub struct PushRecord {
    pub body: String,
    pub started_at: Instant,
}

#[derive(Default)]
struct Recorded {
    pushes: Vec<PushRecord>,
    batches: Vec<Vec<TestMessage>>,
}

#[derive(Clone)]
pub struct RecordingService {
    id: String,
    behaviors: Arc<Mutex<HashMap<String, Behavior>>>,
    recorded: Arc<Mutex<Recorded>>,
    fail_clients: Arc<AtomicBool>,
    cancel_on_convert: Arc<Mutex<Option<CancellationToken>>>,
}

impl RecordingService {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            behaviors: Arc::default(),
            recorded: Arc::default(),
            fail_clients: Arc::default(),
            cancel_on_convert: Arc::default(),
        }
    }

    pub fn set_behavior(&self, body: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(body.to_string(), behavior);
    }

    pub fn fail_client_construction(&self) {
        self.fail_clients.store(true, Ordering::SeqCst);
    }

    /// Fire `cancel` whenever a payload is converted, i.e. right after a pop.
    pub fn cancel_on_convert(&self, cancel: CancellationToken) {
        *self.cancel_on_convert.lock().unwrap() = Some(cancel);
    }

    pub fn pushes(&self) -> Vec<PushRecord> {
        self.recorded.lock().unwrap().pushes.clone()
    }

    pub fn pushed_bodies(&self) -> Vec<String> {
        self.pushes().into_iter().map(|p| p.body).collect()
    }

    pub fn batches(&self) -> Vec<Vec<TestMessage>> {
        self.recorded.lock().unwrap().batches.clone()
    }
}

#[async_trait]
impl PushService for RecordingService {
    type Client = ();
    type Message = TestMessage;

    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        "Recording"
    }

    fn new_client(&self) -> Result<(), AppError> {
        if self.fail_clients.load(Ordering::SeqCst) {
            return Err(AppError::ServiceSetup("client construction refused".into()));
        }
        Ok(())
    }

    fn convert_message(&self, raw: &[u8]) -> Result<TestMessage, AppError> {
        if let Some(cancel) = self.cancel_on_convert.lock().unwrap().as_ref() {
            cancel.cancel();
        }
        let text =
            std::str::from_utf8(raw).map_err(|e| AppError::Validation(e.to_string()))?;
        let (key, body) = text
            .split_once(':')
            .ok_or_else(|| AppError::Validation("missing squash key".into()))?;
        Ok(TestMessage {
            key: key.to_string(),
            body: body.to_string(),
        })
    }

    async fn push_message(
        &self,
        _client: &(),
        message: TestMessage,
        feedback: &dyn FeedbackCollector,
    ) -> PushStatus {
        self.recorded.lock().unwrap().pushes.push(PushRecord {
            body: message.body.clone(),
            started_at: Instant::now(),
        });
        let behavior = self.behaviors.lock().unwrap().get(&message.body).cloned();
        match behavior {
            None => PushStatus::Success,
            Some(Behavior::Status(status)) => status,
            Some(Behavior::InvalidToken(token)) => {
                feedback.token_invalid(&self.id, &token);
                PushStatus::HardFail
            }
            Some(Behavior::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                PushStatus::Success
            }
        }
    }
}

/// Wraps a [`RecordingService`] with a batching-capable provider call.
#[derive(Clone)]
pub struct BatchingService(pub RecordingService);

#[async_trait]
impl PushService for BatchingService {
    type Client = ();
    type Message = TestMessage;

    fn id(&self) -> &str {
        self.0.id()
    }

    fn display_name(&self) -> &str {
        "Batching"
    }

    fn new_client(&self) -> Result<(), AppError> {
        self.0.new_client()
    }

    fn convert_message(&self, raw: &[u8]) -> Result<TestMessage, AppError> {
        self.0.convert_message(raw)
    }

    async fn push_message(
        &self,
        client: &(),
        message: TestMessage,
        feedback: &dyn FeedbackCollector,
    ) -> PushStatus {
        self.0.push_message(client, message, feedback).await
    }

    async fn squash_and_push_message(
        &self,
        _client: &(),
        messages: Vec<TestMessage>,
        _feedback: &dyn FeedbackCollector,
    ) -> PushStatus {
        self.0.recorded.lock().unwrap().batches.push(messages);
        PushStatus::Success
    }
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_for(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
