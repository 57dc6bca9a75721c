//! Schema profiles and the registry that routes file names to them.
//!
//! A profile is plain data: expected headers, target table, natural key, how
//! a key match is classified and what the loader does about it. One generic
//! pipeline runs every profile.

mod builtin;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sluice_db::{ColumnType, DbError, TableSpec};

use crate::error::RegistryError;

pub use builtin::builtin_profiles;

/// Notification audience a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Glass,
    Frame,
    Casing,
    Label,
    Order,
    Production,
    Rush,
}

impl Category {
    /// Title-case label used in message subjects.
    pub fn label(self) -> &'static str {
        match self {
            Category::Glass => "Glass",
            Category::Frame => "Frame",
            Category::Casing => "Casing",
            Category::Label => "Label",
            Category::Order => "Order",
            Category::Production => "Production",
            Category::Rush => "Rush",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of comparing one row against stored rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    New,
    Duplicate,
    Resend,
    Updated,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Classification::New => "new",
            Classification::Duplicate => "duplicate",
            Classification::Resend => "resend",
            Classification::Updated => "updated",
        };
        f.write_str(name)
    }
}

/// Columns forming a row's natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NaturalKey {
    pub primary: String,
    #[serde(default)]
    pub secondary: Option<String>,
    /// Used in place of `primary` when the primary value is blank.
    #[serde(default)]
    pub fallback: Option<String>,
}

impl NaturalKey {
    pub fn single(primary: &str) -> Self {
        Self {
            primary: primary.to_string(),
            secondary: None,
            fallback: None,
        }
    }

    pub fn composite(primary: &str, secondary: &str) -> Self {
        Self {
            primary: primary.to_string(),
            secondary: Some(secondary.to_string()),
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: &str) -> Self {
        self.fallback = Some(fallback.to_string());
        self
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str())
            .chain(self.secondary.as_deref())
            .chain(self.fallback.as_deref())
    }
}

/// How a key match is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum KeySemantics {
    /// Any stored row with the primary value yields `on_match`.
    Single { on_match: Classification },
    /// Primary and secondary match: Duplicate. Primary only: Resend.
    Composite,
    /// Secondary alone identifies the unit: Duplicate. Primary only: Resend.
    Inverted,
    /// Duplicate once `limit` rows with the primary value are stored.
    Occurrences { limit: u32 },
}

impl Default for KeySemantics {
    fn default() -> Self {
        KeySemantics::Single {
            on_match: Classification::Duplicate,
        }
    }
}

/// What the loader does with a classified row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Insert every row; flagged rows are inserted too.
    #[default]
    Append,
    /// Insert only rows classified New.
    SkipExisting,
    /// First sighting of a key in a file deletes its stored rows.
    ReplaceOnConflict,
    /// Fill stored NULL/empty columns, never overwrite populated ones.
    UpdateIfBlank,
    /// Overwrite every non-key column of the stored row.
    Upsert,
}

/// How the first line of a file is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HeaderMode {
    /// First line is the header only if it matches the canonical headers;
    /// otherwise the canonical headers are assumed and the line is data.
    #[default]
    Canonical,
    /// First line is data when it has no letters in it; otherwise it is the
    /// file's own header row.
    DetectNumeric,
    /// First line must match the canonical headers.
    Require,
}

/// Per-row field operation, applied in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum RowTransform {
    /// Strip surrounding whitespace; whitespace-only values become empty.
    Trim,
    /// Append every non-empty later source to the first, separated.
    Combine {
        target: String,
        sources: Vec<String>,
        separator: String,
        #[serde(default)]
        drop_sources: bool,
    },
    Rename { from: String, to: String },
}

fn default_transforms() -> Vec<RowTransform> {
    vec![RowTransform::Trim]
}

/// Static description of one CSV family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaProfile {
    /// Upper-case file name prefix routed to this profile
    pub code: String,
    /// Target table
    pub table: String,
    /// Canonical header list, in file order
    pub headers: Vec<String>,
    pub key: NaturalKey,
    #[serde(default)]
    pub key_semantics: KeySemantics,
    #[serde(default)]
    pub policy: ConflictPolicy,
    /// Column reported as the original date of a matched row
    #[serde(default)]
    pub date_column: Option<String>,
    /// Type hints; unlisted key columns are varchar, everything else text
    #[serde(default)]
    pub column_types: BTreeMap<String, ColumnType>,
    #[serde(default = "default_transforms")]
    pub transforms: Vec<RowTransform>,
    #[serde(default)]
    pub header_mode: HeaderMode,
    /// Any row or insert failure rolls back the whole file
    #[serde(default)]
    pub atomic: bool,
    /// Classifications reported to recipients
    #[serde(default)]
    pub alerts: Vec<Classification>,
    pub category: Category,
}

impl SchemaProfile {
    /// Declared type of `column`.
    pub fn column_type(&self, column: &str) -> ColumnType {
        if let Some(ty) = self.column_types.get(column) {
            return *ty;
        }
        if self.key.columns().any(|k| k == column) {
            ColumnType::Varchar
        } else {
            ColumnType::Text
        }
    }

    /// Columns the loader writes: canonical headers after transforms.
    pub fn stored_headers(&self) -> Vec<String> {
        apply_header_transforms(&self.headers, &self.transforms)
    }

    /// Table description covering the stored canonical headers plus any
    /// extra headers found in the file.
    pub fn table_spec(&self, file_headers: &[String]) -> Result<TableSpec, DbError> {
        let mut columns: Vec<String> = self.stored_headers();
        for header in file_headers {
            if !columns.iter().any(|c| c.eq_ignore_ascii_case(header)) {
                columns.push(header.clone());
            }
        }
        let typed: Vec<(String, ColumnType)> = columns
            .into_iter()
            .map(|c| {
                let ty = self.column_type(&c);
                (c, ty)
            })
            .collect();
        TableSpec::new(&self.table, typed)
    }

    pub fn alerts_on(&self, classification: Classification) -> bool {
        self.alerts.contains(&classification)
    }

    /// Check internal consistency of a profile.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |msg: String| RegistryError::invalid_profile(&self.code, msg);

        if self.code.trim().is_empty() || self.code != self.code.to_uppercase() {
            return Err(invalid("code must be non-empty and upper case".to_string()));
        }
        if self.code.contains(|c: char| SEPARATORS.contains(&c)) {
            return Err(invalid("code must not contain a separator".to_string()));
        }
        if self.headers.is_empty() {
            return Err(invalid("no canonical headers".to_string()));
        }
        let stored = self.stored_headers();
        for column in self.key.columns() {
            if !stored.iter().any(|h| h == column) {
                return Err(invalid(format!("key column '{}' is not a stored header", column)));
            }
        }
        if let Some(date) = &self.date_column {
            if !stored.iter().any(|h| h == date) {
                return Err(invalid(format!("date column '{}' is not a stored header", date)));
            }
        }
        match self.key_semantics {
            KeySemantics::Composite | KeySemantics::Inverted if self.key.secondary.is_none() => {
                return Err(invalid("composite key semantics need a secondary column".to_string()));
            }
            KeySemantics::Occurrences { limit: 0 } => {
                return Err(invalid("occurrence limit must be positive".to_string()));
            }
            KeySemantics::Single {
                on_match: Classification::New,
            } => {
                return Err(invalid("a key match cannot classify as new".to_string()));
            }
            _ => {}
        }
        for transform in &self.transforms {
            if let RowTransform::Combine { sources, .. } = transform {
                if sources.is_empty() {
                    return Err(invalid("combine needs at least one source".to_string()));
                }
            }
        }
        sluice_db::sanitize_identifier(&self.table)
            .map_err(|err| invalid(format!("table name: {}", err)))?;
        Ok(())
    }
}

/// Header list after rename/combine transforms have been applied.
pub fn apply_header_transforms(headers: &[String], transforms: &[RowTransform]) -> Vec<String> {
    let mut out: Vec<String> = headers.to_vec();
    for transform in transforms {
        match transform {
            RowTransform::Trim => {}
            RowTransform::Rename { from, to } => {
                for header in out.iter_mut() {
                    if header == from {
                        *header = to.clone();
                    }
                }
            }
            RowTransform::Combine {
                target,
                sources,
                drop_sources,
                ..
            } => {
                if !out.iter().any(|h| h == target) {
                    out.push(target.clone());
                }
                if *drop_sources {
                    out.retain(|h| h == target || !sources.contains(h));
                }
            }
        }
    }
    out
}

const SEPARATORS: [char; 4] = ['_', '-', ' ', '.'];

/// Routing token of a file name: the upper-cased part of the stem before the
/// first `_`, `-`, space or `.`.
pub fn type_code(file_name: &str) -> Option<String> {
    let base = Path::new(file_name).file_name()?.to_str()?;
    let stem = Path::new(base).file_stem()?.to_str()?;
    let token = stem.split(|c: char| SEPARATORS.contains(&c)).next()?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_uppercase())
    }
}

/// Profiles keyed by code.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    profiles: BTreeMap<String, Arc<SchemaProfile>>,
}

impl SchemaRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding the built-in catalogue.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for profile in builtin_profiles() {
            registry
                .profiles
                .insert(profile.code.clone(), Arc::new(profile));
        }
        registry
    }

    /// Built-in catalogue plus `extra`, where `extra` replaces same-coded
    /// built-ins.
    pub fn with_profiles(extra: Vec<SchemaProfile>) -> Result<Self, RegistryError> {
        let mut registry = Self::builtin();
        for profile in extra {
            registry.register(profile)?;
        }
        Ok(registry)
    }

    /// Add or replace a profile after validating it.
    pub fn register(&mut self, profile: SchemaProfile) -> Result<Option<Arc<SchemaProfile>>, RegistryError> {
        profile.validate()?;
        Ok(self.profiles.insert(profile.code.clone(), Arc::new(profile)))
    }

    pub fn get(&self, code: &str) -> Option<Arc<SchemaProfile>> {
        self.profiles.get(&code.to_uppercase()).cloned()
    }

    /// Profile for a file name, by its type code.
    pub fn resolve(&self, file_name: &str) -> Result<Arc<SchemaProfile>, RegistryError> {
        let code = type_code(file_name).unwrap_or_default();
        self.profiles
            .get(&code)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownSchema {
                file_name: file_name.to_string(),
                code,
            })
    }

    pub fn profiles(&self) -> impl Iterator<Item = &Arc<SchemaProfile>> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
