//! Natural-key extraction and per-row classification.

use std::fmt;

use serde::Serialize;
use sluice_db::{DbError, KeyMatch, RowStore};

use crate::error::RowError;
use crate::reader::Row;
use crate::registry::{Classification, KeySemantics, SchemaProfile};

/// Natural-key value of one row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct KeyValue {
    /// Column the primary value came from (the fallback column when the
    /// primary was blank)
    pub column: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<(String, String)>,
}

impl KeyValue {
    /// Predicate matching primary and, when present, secondary.
    pub fn full(&self) -> Vec<KeyMatch<'_>> {
        let mut key = self.primary();
        if let Some((column, value)) = &self.secondary {
            key.push(KeyMatch::new(column, value));
        }
        key
    }

    /// Predicate on the primary column only.
    pub fn primary(&self) -> Vec<KeyMatch<'_>> {
        vec![KeyMatch::new(&self.column, &self.value)]
    }

    /// Predicate on the secondary column only, when there is one.
    pub fn secondary_only(&self) -> Option<Vec<KeyMatch<'_>>> {
        self.secondary
            .as_ref()
            .map(|(column, value)| vec![KeyMatch::new(column, value)])
    }

    pub fn is_key_column(&self, column: &str) -> bool {
        self.column == column
            || self
                .secondary
                .as_ref()
                .map(|(c, _)| c == column)
                .unwrap_or(false)
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.secondary {
            Some((_, secondary)) => write!(f, "({}, {})", self.value, secondary),
            None => f.write_str(&self.value),
        }
    }
}

/// Extract the row's natural key.
pub fn natural_key(profile: &SchemaProfile, row: &Row) -> Result<KeyValue, RowError> {
    let key = &profile.key;
    let (column, value) = match row.non_empty(&key.primary) {
        Some(value) => (key.primary.clone(), value.to_string()),
        None => match key.fallback.as_deref().and_then(|f| row.non_empty(f).map(|v| (f, v))) {
            Some((column, value)) => (column.to_string(), value.to_string()),
            None => return Err(RowError::MissingKey(key.primary.clone())),
        },
    };

    let secondary = match (&key.secondary, profile.key_semantics) {
        (Some(column), KeySemantics::Composite | KeySemantics::Inverted) => {
            let value = row
                .non_empty(column)
                .ok_or_else(|| RowError::MissingKey(column.clone()))?;
            Some((column.clone(), value.to_string()))
        }
        _ => None,
    };

    Ok(KeyValue {
        column,
        value,
        secondary,
    })
}

/// Classification of one row plus what the lookup found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub classification: Classification,
    /// Date column of the matched stored row
    pub prior_date: Option<String>,
}

impl Verdict {
    fn new_row() -> Self {
        Self {
            classification: Classification::New,
            prior_date: None,
        }
    }

    fn matched(classification: Classification, prior_date: Option<String>) -> Self {
        Self {
            classification,
            prior_date,
        }
    }
}

/// Classify `key` against rows already stored for the profile.
pub async fn classify(
    store: &mut dyn RowStore,
    profile: &SchemaProfile,
    key: &KeyValue,
) -> Result<Verdict, DbError> {
    let table = profile.table.as_str();
    let date = profile.date_column.as_deref();

    match profile.key_semantics {
        KeySemantics::Single { on_match } => {
            match store.find_prior(table, &key.primary(), date).await? {
                Some(prior) => Ok(Verdict::matched(on_match, prior.date)),
                None => Ok(Verdict::new_row()),
            }
        }
        KeySemantics::Composite => {
            if let Some(prior) = store.find_prior(table, &key.full(), date).await? {
                return Ok(Verdict::matched(Classification::Duplicate, prior.date));
            }
            match store.find_prior(table, &key.primary(), date).await? {
                Some(prior) => Ok(Verdict::matched(Classification::Resend, prior.date)),
                None => Ok(Verdict::new_row()),
            }
        }
        KeySemantics::Inverted => {
            if let Some(secondary) = key.secondary_only() {
                if let Some(prior) = store.find_prior(table, &secondary, date).await? {
                    return Ok(Verdict::matched(Classification::Duplicate, prior.date));
                }
            }
            match store.find_prior(table, &key.primary(), date).await? {
                Some(prior) => Ok(Verdict::matched(Classification::Resend, prior.date)),
                None => Ok(Verdict::new_row()),
            }
        }
        KeySemantics::Occurrences { limit } => {
            let stored = store.count_matching(table, &key.primary()).await?;
            if stored < i64::from(limit) {
                return Ok(Verdict::new_row());
            }
            let prior = store.find_prior(table, &key.primary(), date).await?;
            Ok(Verdict::matched(
                Classification::Duplicate,
                prior.and_then(|p| p.date),
            ))
        }
    }
}

/// A flagged row kept for notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedRow {
    pub line: u64,
    pub key: KeyValue,
    pub classification: Classification,
    pub prior_date: Option<String>,
    #[serde(skip)]
    pub fields: Vec<(String, String)>,
}
