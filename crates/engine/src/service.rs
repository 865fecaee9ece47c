//! Provider capability contract.
//!
//! Every delivery channel (mobile push, web push, bot, email) plugs into the
//! dispatch core by implementing [`PushService`]. The core never looks inside
//! a converted message beyond its squash key.

use async_trait::async_trait;

use pushgate_common::error::AppError;
use pushgate_common::types::PushStatus;

use crate::feedback::FeedbackCollector;

/// A validated, provider-specific decoding of a raw payload.
pub trait ServiceMessage: Send + 'static {
    /// Grouping key used by the squasher. Carries no ordering meaning.
    fn squash_key(&self) -> &str;
}

/// A push provider.
#[async_trait]
pub trait PushService: Send + Sync + 'static {
    /// Transport handle handed to every push call.
    type Client: Send + Sync + 'static;
    type Message: ServiceMessage;

    /// Stable short identity; keys the queue, the rate limiter and the metrics.
    fn id(&self) -> &str;

    /// Human-readable name for logs.
    fn display_name(&self) -> &str;

    fn new_client(&self) -> Result<Self::Client, AppError>;

    fn convert_message(&self, raw: &[u8]) -> Result<Self::Message, AppError>;

    /// Ingestion-time check. Defaults to a full conversion.
    fn validate(&self, raw: &[u8]) -> Result<(), AppError> {
        self.convert_message(raw).map(|_| ())
    }

    async fn push_message(
        &self,
        client: &Self::Client,
        message: Self::Message,
        feedback: &dyn FeedbackCollector,
    ) -> PushStatus;

    /// Deliver messages sharing one squash key in a single call.
    ///
    /// Providers without batching support keep the default, which pushes
    /// each message on its own and reports the worst outcome.
    async fn squash_and_push_message(
        &self,
        client: &Self::Client,
        messages: Vec<Self::Message>,
        feedback: &dyn FeedbackCollector,
    ) -> PushStatus {
        let mut outcome = PushStatus::Success;
        for message in messages {
            outcome = outcome.worst(self.push_message(client, message, feedback).await);
        }
        outcome
    }
}
