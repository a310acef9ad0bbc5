use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use super::{ContactSink, SenderError};
use crate::notifications::models::{Attachment, AttachmentContent};

const SEPARATOR: &str = "========================================";

/// Appends each message to a local file, one block per message.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn format(subject: &str, body: &str, attachments: &[Attachment]) -> String {
        let mut out = format!("Subject: {subject}\n\n{}\n", body.trim_end());
        for attachment in attachments {
            match &attachment.content {
                AttachmentContent::Text(text) => {
                    out.push_str(&format!("\n--- Attachment: {} ---\n", attachment.filename));
                    out.push_str(text.trim_end());
                    out.push('\n');
                }
                AttachmentContent::Bytes(bytes) => {
                    out.push_str(&format!(
                        "\n--- Attachment: {} (base64) ---\n",
                        attachment.filename
                    ));
                    let encoded = STANDARD.encode(bytes);
                    // 76-column lines, as in MIME.
                    for chunk in encoded.as_bytes().chunks(76) {
                        out.push_str(&String::from_utf8_lossy(chunk));
                        out.push('\n');
                    }
                }
            }
        }
        out.push_str(SEPARATOR);
        out.push('\n');
        out
    }
}

impl ContactSink for FileSink {
    fn deliver(
        &self,
        subject: &str,
        body: &str,
        attachments: &[Attachment],
    ) -> Result<(), SenderError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(Self::format(subject, body, attachments).as_bytes())?;
        info!(path = %self.path.display(), attachments = attachments.len(), "Message written to file.");
        Ok(())
    }
}
