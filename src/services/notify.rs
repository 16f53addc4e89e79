//! Outbound notifications
//!
//! Contributor emails (verification codes, new tokens) are handed to a
//! delivery worker by publishing a message on a topic. Publishing is
//! fire-and-forget from the request's point of view: a failure is logged and
//! never fails the request.

use std::time::Duration;

use async_nats::ConnectOptions;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::NatsArgs;

/// Default ping interval for keep-alive
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

/// Upper bound on a publish before it is abandoned
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Verification,
    ApiToken,
}

/// Payload consumed by the email worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: String,
    pub message_type: MessageType,
    pub message_data: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Publish failed: {0}")]
    Publish(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, topic: &str, notification: &Notification) -> Result<(), NotifyError>;
}

/// Publish without letting a failure escape
pub async fn publish_and_forget(notifier: &dyn Notifier, topic: &str, notification: &Notification) {
    match tokio::time::timeout(PUBLISH_TIMEOUT, notifier.publish(topic, notification)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(topic = %topic, message_type = ?notification.message_type, error = %e, "Notification not delivered");
        }
        Err(_) => {
            warn!(topic = %topic, message_type = ?notification.message_type, "Notification publish timed out");
        }
    }
}

/// Publishes notifications as JSON on NATS subjects
#[derive(Clone)]
pub struct NatsNotifier {
    client: async_nats::Client,
}

impl NatsNotifier {
    pub async fn connect(args: &NatsArgs, name: &str) -> Result<Self, NotifyError> {
        info!("Connecting to NATS at {}", args.nats_url);

        let mut options = ConnectOptions::new()
            .name(name)
            .ping_interval(DEFAULT_PING_INTERVAL)
            .connection_timeout(Duration::from_secs(5));

        if let (Some(user), Some(pass)) = (&args.nats_user, &args.nats_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&args.nats_url)
            .await
            .map_err(|e| NotifyError::Publish(format!("Failed to connect: {}", e)))?;

        info!("Connected to NATS at {}", args.nats_url);
        Ok(Self { client })
    }
}

#[async_trait]
impl Notifier for NatsNotifier {
    async fn publish(&self, topic: &str, notification: &Notification) -> Result<(), NotifyError> {
        let payload = Bytes::from(serde_json::to_vec(notification)?);
        self.client
            .publish(topic.to_string(), payload)
            .await
            .map_err(|e| NotifyError::Publish(e.to_string()))
    }
}

/// Drops every notification; used in dev mode without NATS
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn publish(&self, topic: &str, notification: &Notification) -> Result<(), NotifyError> {
        info!(topic = %topic, message_type = ?notification.message_type, "Notification dropped (no notifier configured)");
        Ok(())
    }
}

/// Records published notifications for inspection
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<(String, Notification)>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<(String, Notification)> {
        self.sent.lock().await.clone()
    }

    /// Most recent notification of a type
    pub async fn last_of(&self, message_type: MessageType) -> Option<Notification> {
        self.sent
            .lock()
            .await
            .iter()
            .rev()
            .find(|(_, n)| n.message_type == message_type)
            .map(|(_, n)| n.clone())
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn publish(&self, topic: &str, notification: &Notification) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .await
            .push((topic.to_string(), notification.clone()));
        Ok(())
    }
}
