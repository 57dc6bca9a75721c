//! Notification batches and their delivery.
//!
//! Flagged rows of one file are grouped by classification, de-duplicated by
//! natural key and rendered into one message per kind. Each subscribed
//! recipient gets their own transport call; failures are logged and counted
//! but never propagate to the ingestion job.

mod transport;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::classify::{ClassifiedRow, KeyValue};
use crate::registry::{Category, Classification};

pub use transport::{LogTransport, MailTransport, MemoryTransport, SendmailTransport, SentMessage};

/// A mailbox and the categories it subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    #[serde(default)]
    pub categories: Vec<Category>,
}

impl Recipient {
    pub fn new(email: &str, categories: &[Category]) -> Self {
        Self {
            email: email.to_string(),
            categories: categories.to_vec(),
        }
    }

    pub fn subscribes_to(&self, category: Category) -> bool {
        self.categories.contains(&category)
    }
}

/// One reported key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationEntry {
    pub key: KeyValue,
    pub prior_date: Option<String>,
}

/// Entries of one kind for one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationBatch {
    pub category: Category,
    pub kind: Classification,
    pub entries: Vec<NotificationEntry>,
}

impl NotificationBatch {
    /// Group flagged rows by kind, keeping the first row seen for each key.
    /// Resends are reported per order, so they are keyed on the primary
    /// value alone. Batches come out in Duplicate, Resend, Updated order.
    pub fn build(category: Category, rows: &[ClassifiedRow]) -> Vec<NotificationBatch> {
        let kinds = [
            Classification::Duplicate,
            Classification::Resend,
            Classification::Updated,
        ];
        kinds
            .iter()
            .filter_map(|kind| {
                let mut seen: HashSet<KeyValue> = HashSet::new();
                let entries: Vec<NotificationEntry> = rows
                    .iter()
                    .filter(|row| row.classification == *kind)
                    .map(|row| {
                        let key = match kind {
                            Classification::Resend => KeyValue {
                                secondary: None,
                                ..row.key.clone()
                            },
                            _ => row.key.clone(),
                        };
                        (key, row)
                    })
                    .filter(|(key, _)| seen.insert(key.clone()))
                    .map(|(key, row)| NotificationEntry {
                        key,
                        prior_date: row.prior_date.clone(),
                    })
                    .collect();
                if entries.is_empty() {
                    None
                } else {
                    Some(NotificationBatch {
                        category,
                        kind: *kind,
                        entries,
                    })
                }
            })
            .collect()
    }

    pub fn subject(&self, at: DateTime<Local>) -> String {
        let stamp = at.format("[%Y-%m-%d %I:%M %p]");
        let category = self.category.label();
        match self.kind {
            Classification::Duplicate => format!("DUPLICATE {} Order Alert {}", category, stamp),
            Classification::Resend => format!("RE-SENT {} Order Notification {}", category, stamp),
            Classification::Updated | Classification::New => {
                format!("UPDATED {} Order Notification {}", category, stamp)
            }
        }
    }

    pub fn html_body(&self, at: DateTime<Local>) -> String {
        let (title, intro) = match self.kind {
            Classification::Duplicate => (
                "Duplicate",
                "The following orders match records that are already stored:",
            ),
            Classification::Resend => (
                "Re-Sent",
                "The following orders were sent again after an earlier export:",
            ),
            Classification::Updated | Classification::New => (
                "Updated",
                "The following orders replaced or updated stored records:",
            ),
        };
        let items: String = self
            .entries
            .iter()
            .map(|entry| format!("<li>{}</li>", escape_html(&describe(entry))))
            .collect();
        format!(
            "<html><body><h2>{} {} Orders Detected</h2><p>{}</p><ul>{}</ul><p>Date: {}</p></body></html>",
            title,
            self.category.label(),
            intro,
            items,
            at.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

fn describe(entry: &NotificationEntry) -> String {
    let mut text = format!("{}: {}", entry.key.column, entry.key.value);
    if let Some((column, value)) = &entry.key.secondary {
        text.push_str(&format!(", {}: {}", column, value));
    }
    text.push_str(&format!(
        ", Original Date: {}",
        entry.prior_date.as_deref().unwrap_or("Unknown")
    ));
    text
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Category for a file: rush markers in the name win, then the root's
/// override, then the profile's own category.
pub fn resolve_category(path: &Path, root_override: Option<Category>, profile_category: Category) -> Category {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_uppercase();
    if stem.contains("RUSH") || stem.contains("URGENT") {
        return Category::Rush;
    }
    root_override.unwrap_or(profile_category)
}

/// Outcome of one `notify` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub batches: Vec<NotificationBatch>,
    pub delivered: usize,
    pub failed: usize,
}

/// Resolves recipients and hands rendered batches to the transport.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn MailTransport>,
    recipients: Vec<Recipient>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("recipients", &self.recipients)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn MailTransport>, recipients: Vec<Recipient>) -> Self {
        Self {
            transport,
            recipients,
        }
    }

    /// Dispatcher that only logs.
    pub fn log_only(recipients: Vec<Recipient>) -> Self {
        Self::new(Arc::new(LogTransport), recipients)
    }

    pub fn recipients_for(&self, category: Category) -> Vec<&Recipient> {
        self.recipients
            .iter()
            .filter(|r| r.subscribes_to(category))
            .collect()
    }

    /// Build batches for `rows` and deliver them to every subscriber.
    pub async fn notify(&self, category: Category, rows: &[ClassifiedRow]) -> DispatchReport {
        let batches = NotificationBatch::build(category, rows);
        let mut report = DispatchReport::default();
        if batches.is_empty() {
            return report;
        }

        let recipients = self.recipients_for(category);
        if recipients.is_empty() {
            info!(%category, batches = batches.len(), "No recipients subscribed; notification skipped");
            report.batches = batches;
            return report;
        }

        let now = Local::now();
        for batch in &batches {
            let subject = batch.subject(now);
            let body = batch.html_body(now);
            for recipient in &recipients {
                let to = [recipient.email.clone()];
                match self.transport.send(&to, &subject, &body).await {
                    Ok(()) => {
                        report.delivered += 1;
                        info!(to = %recipient.email, kind = %batch.kind, entries = batch.entries.len(), "Notification sent");
                    }
                    Err(err) => {
                        report.failed += 1;
                        warn!(to = %recipient.email, kind = %batch.kind, error = %err, "Notification failed");
                    }
                }
            }
        }
        report.batches = batches;
        report
    }
}
