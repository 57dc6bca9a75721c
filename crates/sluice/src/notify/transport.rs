//! Outbound mail transports.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::TransportError;

/// Delivers one rendered message.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, recipients: &[String], subject: &str, html_body: &str) -> Result<(), TransportError>;
}

/// Writes messages to the log instead of sending them.
#[derive(Debug, Default, Clone)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn send(&self, recipients: &[String], subject: &str, html_body: &str) -> Result<(), TransportError> {
        info!(
            to = %recipients.join(", "),
            subject,
            body_bytes = html_body.len(),
            "Notification (log transport)"
        );
        debug!(body = html_body, "Notification body");
        Ok(())
    }
}

/// Pipes an RFC 5322 message into a sendmail-compatible command.
#[derive(Debug, Clone)]
pub struct SendmailTransport {
    command: PathBuf,
    from: String,
}

impl SendmailTransport {
    pub fn new(command: impl Into<PathBuf>, from: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            from: from.into(),
        }
    }

    fn message(&self, recipients: &[String], subject: &str, html_body: &str) -> String {
        let mut message = String::with_capacity(html_body.len() + 256);
        message.push_str(&format!("From: Sluice Notifications <{}>\r\n", self.from));
        message.push_str(&format!("To: {}\r\n", recipients.join(", ")));
        message.push_str(&format!("Subject: {}\r\n", header_safe(subject)));
        message.push_str("MIME-Version: 1.0\r\n");
        message.push_str("Content-Type: text/html; charset=utf-8\r\n");
        message.push_str("X-Priority: 1\r\n");
        message.push_str("\r\n");
        message.push_str(html_body);
        message.push_str("\r\n");
        message
    }
}

/// Header values cannot span lines.
fn header_safe(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

#[async_trait]
impl MailTransport for SendmailTransport {
    async fn send(&self, recipients: &[String], subject: &str, html_body: &str) -> Result<(), TransportError> {
        let mut child = Command::new(&self.command)
            .arg("-t")
            .arg("-i")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let message = self.message(recipients, subject, html_body);
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Rejected("sendmail stdin unavailable".to_string()))?;
        stdin.write_all(message.as_bytes()).await?;
        drop(stdin);

        let output = child.wait_with_output().await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(TransportError::Rejected(format!(
                "{} exited with {}: {}",
                self.command.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

/// A message captured by [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub recipients: Vec<String>,
    pub subject: String,
    pub html_body: String,
}

/// Keeps messages in memory. Addresses listed in `failing` are rejected.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<SentMessage>>,
    failing: Vec<String>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(addresses: &[&str]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: addresses.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MailTransport for MemoryTransport {
    async fn send(&self, recipients: &[String], subject: &str, html_body: &str) -> Result<(), TransportError> {
        if let Some(address) = recipients.iter().find(|r| self.failing.contains(r)) {
            return Err(TransportError::Rejected(format!("mailbox unavailable: {}", address)));
        }
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| TransportError::Rejected("memory transport poisoned".to_string()))?;
        sent.push(SentMessage {
            recipients: recipients.to_vec(),
            subject: subject.to_string(),
            html_body: html_body.to_string(),
        });
        Ok(())
    }
}
