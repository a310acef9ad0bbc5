use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::blocking::Client;
use reqwest::header;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

use super::{ContactSink, SenderError};
use crate::notifications::models::Attachment;

/// Posts each message as JSON to a URL.
pub struct WebhookSink {
    client: Client,
    url: String,
}

#[derive(Debug, Serialize)]
struct WebhookAttachment<'a> {
    filename: &'a str,
    content_base64: String,
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    body: &'a str,
    attachments: Vec<WebhookAttachment<'a>>,
}

impl WebhookSink {
    pub fn new(url: String, timeout: Duration) -> Result<Self, SenderError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(SenderError::InvalidConfiguration(format!(
                "Webhook URL must be http or https: {url}"
            )));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    fn payload<'a>(subject: &'a str, body: &'a str, attachments: &'a [Attachment]) -> WebhookPayload<'a> {
        WebhookPayload {
            subject,
            body,
            attachments: attachments
                .iter()
                .map(|a| WebhookAttachment {
                    filename: &a.filename,
                    content_base64: STANDARD.encode(a.content.as_bytes()),
                })
                .collect(),
        }
    }
}

impl ContactSink for WebhookSink {
    fn deliver(
        &self,
        subject: &str,
        body: &str,
        attachments: &[Attachment],
    ) -> Result<(), SenderError> {
        let response = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&Self::payload(subject, body, attachments))
            .send()?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response
                .text()
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(SenderError::SendFailed(format!(
                "Webhook returned non-success status: {}. Body: {}",
                status, error_body
            )));
        }

        info!(url = %self.url, status = %status, "Webhook delivered.");
        Ok(())
    }
}
