use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use super::models::Attachment;
use crate::db::models::{Contact, ContactMethod};

pub mod file;
pub mod webhook;

pub use file::FileSink;
pub use webhook::WebhookSink;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Failed to deliver message: {0}")]
    SendFailed(String),
    #[error("Invalid configuration for sink: {0}")]
    InvalidConfiguration(String),
    #[error("No sink available for {0:?} contacts")]
    Unsupported(ContactMethod),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A destination that accepts a finished message.
pub trait ContactSink {
    fn deliver(
        &self,
        subject: &str,
        body: &str,
        attachments: &[Attachment],
    ) -> Result<(), SenderError>;
}

/// Picks the sink that delivers to a contact.
pub trait SinkResolver {
    fn resolve(&self, contact: &Contact) -> Result<Box<dyn ContactSink>, SenderError>;
}

/// Resolves `file` and `webhook` contacts. Email needs a transport supplied by
/// the caller through its own [`SinkResolver`].
#[derive(Debug, Clone)]
pub struct DefaultSinkResolver {
    webhook_timeout: Duration,
}

impl DefaultSinkResolver {
    pub fn new(webhook_timeout: Duration) -> Self {
        Self { webhook_timeout }
    }
}

impl Default for DefaultSinkResolver {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl SinkResolver for DefaultSinkResolver {
    fn resolve(&self, contact: &Contact) -> Result<Box<dyn ContactSink>, SenderError> {
        match contact.method {
            ContactMethod::File => Ok(Box::new(FileSink::new(PathBuf::from(&contact.value)))),
            ContactMethod::Webhook => Ok(Box::new(WebhookSink::new(
                contact.value.clone(),
                self.webhook_timeout,
            )?)),
            ContactMethod::Email => Err(SenderError::Unsupported(ContactMethod::Email)),
        }
    }
}
