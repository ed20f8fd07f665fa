//! Mail-less notifier that records alerts in the log.

use async_trait::async_trait;
use tracing::info;

use crate::domain::{AppError, Notifier};

/// Notifier that "sends" every message by logging it
#[derive(Debug, Clone, Default)]
pub struct LogNotifier {
    sender: Option<String>,
}

impl LogNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the address shown as the sender
    #[must_use]
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError> {
        if to.trim().is_empty() {
            return Err(AppError::Notification("empty recipient address".to_string()));
        }
        info!(
            from = self.sender.as_deref().unwrap_or("noreply@wallet-ledger"),
            to = %to,
            subject = %subject,
            body = %body,
            "Mock email sent"
        );
        Ok(())
    }
}
