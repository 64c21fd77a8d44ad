//! Outgoing mail capability
//!
//! The account service hands finished messages to a [`Mailer`]. Delivery is
//! a collaborator concern: [`LogMailer`] only records the message in the
//! logs, [`MemoryMailer`] keeps it for inspection in tests.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Mail transport failed: {0}")]
    Transport(String),
}

impl From<MailError> for crate::error::Error {
    fn from(err: MailError) -> Self {
        tracing::error!(error = %err, "Failed to send mail");
        crate::error::Error::Internal(err.to_string())
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), MailError>;
}

/// Writes messages to the log instead of delivering them
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: Message) -> Result<(), MailError> {
        tracing::info!(
            to = %message.to,
            subject = %message.subject,
            body = %message.text,
            "Mail queued for delivery"
        );
        Ok(())
    }
}

/// Collects messages in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryMailer {
    sent: Arc<Mutex<Vec<Message>>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far, oldest first
    pub async fn sent(&self) -> Vec<Message> {
        self.sent.lock().await.clone()
    }

    pub async fn last(&self) -> Option<Message> {
        self.sent.lock().await.last().cloned()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, message: Message) -> Result<(), MailError> {
        self.sent.lock().await.push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(subject: &str) -> Message {
        Message {
            to: "jane@example.com".to_string(),
            from: "no-reply@localhost".to_string(),
            subject: subject.to_string(),
            text: "hi".to_string(),
            html: "<p>hi</p>".to_string(),
        }
    }

    #[tokio::test]
    async fn test_memory_mailer_keeps_order() {
        let mailer = MemoryMailer::new();
        mailer.send(message("one")).await.unwrap();
        mailer.send(message("two")).await.unwrap();

        let sent = mailer.sent().await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].subject, "one");
        assert_eq!(mailer.last().await.unwrap().subject, "two");
    }

    #[tokio::test]
    async fn test_log_mailer_accepts_everything() {
        assert!(LogMailer.send(message("hello")).await.is_ok());
    }
}
