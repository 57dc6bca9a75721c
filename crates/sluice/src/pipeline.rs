//! The generic loader and the ingestion job around it.
//!
//! [`load_rows`] writes one parsed file through a [`RowStore`] inside a
//! single transaction, classifying rows in file order. [`Pipeline::run`]
//! drives a whole job: resolve, read, load, notify, relocate.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use sluice_db::{DbConfig, DbError, Field, Provisioned, RowStore, SqlStore};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::classify::{classify, natural_key, ClassifiedRow, KeyValue, Verdict};
use crate::error::{PipelineError, ReadError, RowError, TransferError};
use crate::notify::{resolve_category, DispatchReport, Dispatcher};
use crate::reader::{read_csv, typed_value, CsvFile, Row};
use crate::registry::{Category, Classification, ConflictPolicy, KeySemantics, SchemaProfile, SchemaRegistry};
use crate::transfer::{Destination, Transfer, TransferReport};

/// A watched source directory and where its files go afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredRoot {
    pub source: PathBuf,
    pub archive: PathBuf,
    pub error: PathBuf,
    /// Notification category forced for every file of this root
    pub category: Option<Category>,
}

/// Opens one storage session per job.
#[async_trait]
pub trait StoreFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn RowStore>, DbError>;
}

/// [`StoreFactory`] connecting a fresh [`SqlStore`] for every job.
#[derive(Debug, Clone)]
pub struct SqlStoreFactory {
    config: DbConfig,
}

impl SqlStoreFactory {
    pub fn new(config: DbConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StoreFactory for SqlStoreFactory {
    async fn open(&self) -> Result<Box<dyn RowStore>, DbError> {
        Ok(Box::new(SqlStore::connect(&self.config).await?))
    }
}

/// Per-row tallies of one load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub table: String,
    pub provisioned: &'static str,
    pub new: usize,
    pub duplicate: usize,
    pub resend: usize,
    pub updated: usize,
    pub skipped: usize,
    /// Rows actually inserted or updated
    pub written: usize,
    /// Rows reported to recipients
    pub flagged: Vec<ClassifiedRow>,
}

impl LoadSummary {
    fn count(&mut self, classification: Classification) {
        match classification {
            Classification::New => self.new += 1,
            Classification::Duplicate => self.duplicate += 1,
            Classification::Resend => self.resend += 1,
            Classification::Updated => self.updated += 1,
        }
    }

    pub fn rows_seen(&self) -> usize {
        self.new + self.duplicate + self.resend + self.updated + self.skipped
    }
}

fn provisioned_label(p: &Provisioned) -> &'static str {
    match p {
        Provisioned::Created => "created",
        Provisioned::Reconciled { .. } => "reconciled",
        Provisioned::Unchanged => "unchanged",
    }
}

enum RowFailure {
    Row(RowError),
    Storage(DbError),
}

impl From<DbError> for RowFailure {
    fn from(err: DbError) -> Self {
        RowFailure::Storage(err)
    }
}

impl From<RowError> for RowFailure {
    fn from(err: RowError) -> Self {
        RowFailure::Row(err)
    }
}

struct RowOutcome {
    key: KeyValue,
    verdict: Verdict,
    written: bool,
}

/// Provision the profile's table and write `file` in one transaction.
pub async fn load_rows(
    store: &mut dyn RowStore,
    profile: &SchemaProfile,
    file: &CsvFile,
) -> Result<LoadSummary, PipelineError> {
    let spec = profile.table_spec(&file.headers)?;
    let provisioned = store.ensure_table(&spec).await?;

    let mut summary = LoadSummary {
        table: profile.table.clone(),
        provisioned: provisioned_label(&provisioned),
        ..LoadSummary::default()
    };
    let mut replaced: HashSet<KeyValue> = HashSet::new();

    store.begin().await?;
    for row in &file.rows {
        match load_row(store, profile, row, &mut replaced).await {
            Ok(outcome) => {
                let classification = outcome.verdict.classification;
                summary.count(classification);
                if outcome.written {
                    summary.written += 1;
                }
                if profile.alerts_on(classification) {
                    summary.flagged.push(ClassifiedRow {
                        line: row.line,
                        key: outcome.key,
                        classification,
                        prior_date: outcome.verdict.prior_date,
                        fields: row.fields.clone(),
                    });
                }
            }
            Err(RowFailure::Row(err @ RowError::MissingKey(_))) => {
                warn!(table = %profile.table, line = row.line, error = %err, "Row skipped");
                summary.skipped += 1;
            }
            Err(RowFailure::Row(err)) => {
                if profile.atomic {
                    abort(store).await;
                    return Err(PipelineError::Row {
                        line: row.line,
                        source: err,
                    });
                }
                warn!(table = %profile.table, line = row.line, error = %err, "Row skipped");
                summary.skipped += 1;
            }
            Err(RowFailure::Storage(err)) => {
                if profile.atomic || err.is_connection() {
                    abort(store).await;
                    return Err(PipelineError::RowStorage {
                        line: row.line,
                        source: err,
                    });
                }
                warn!(table = %profile.table, line = row.line, error = %err, "Row not stored, skipped");
                summary.skipped += 1;
            }
        }
    }

    if let Err(err) = store.commit().await {
        abort(store).await;
        return Err(err.into());
    }
    Ok(summary)
}

async fn abort(store: &mut dyn RowStore) {
    if let Err(err) = store.rollback().await {
        error!(error = %err, "Rollback failed");
    }
}

/// Kind reported when a stored row matches under single-key semantics.
fn match_kind(profile: &SchemaProfile) -> Classification {
    match profile.key_semantics {
        KeySemantics::Single { on_match } => on_match,
        _ => Classification::Duplicate,
    }
}

fn typed_fields(profile: &SchemaProfile, row: &Row) -> Result<Vec<Field>, RowError> {
    row.fields
        .iter()
        .map(|(column, value)| {
            typed_value(column, profile.column_type(column), value)
                .map(|typed| Field::new(column.clone(), typed))
        })
        .collect()
}

async fn load_row(
    store: &mut dyn RowStore,
    profile: &SchemaProfile,
    row: &Row,
    replaced: &mut HashSet<KeyValue>,
) -> Result<RowOutcome, RowFailure> {
    let key = natural_key(profile, row)?;
    let fields = typed_fields(profile, row)?;
    let table = profile.table.as_str();

    let (verdict, written) = match profile.policy {
        ConflictPolicy::Append => {
            let verdict = classify(store, profile, &key).await?;
            store.insert(table, &fields).await?;
            (verdict, true)
        }
        ConflictPolicy::SkipExisting => {
            let verdict = classify(store, profile, &key).await?;
            let insert = verdict.classification == Classification::New;
            if insert {
                store.insert(table, &fields).await?;
            }
            (verdict, insert)
        }
        ConflictPolicy::ReplaceOnConflict => {
            let verdict = if replaced.insert(key.clone()) {
                let prior = store
                    .find_prior(table, &key.full(), profile.date_column.as_deref())
                    .await?;
                match prior {
                    Some(prior) => {
                        let removed = store.delete(table, &key.full()).await?;
                        debug!(table, key = %key, removed, "Replaced stored rows");
                        Verdict {
                            classification: Classification::Updated,
                            prior_date: prior.date,
                        }
                    }
                    None => Verdict {
                        classification: Classification::New,
                        prior_date: None,
                    },
                }
            } else {
                Verdict {
                    classification: Classification::New,
                    prior_date: None,
                }
            };
            store.insert(table, &fields).await?;
            (verdict, true)
        }
        ConflictPolicy::UpdateIfBlank => update_if_blank(store, profile, &key, &fields).await?,
        ConflictPolicy::Upsert => {
            let verdict = classify(store, profile, &key).await?;
            if verdict.classification == Classification::New {
                store.insert(table, &fields).await?;
                (verdict, true)
            } else {
                let changes: Vec<Field> = fields
                    .iter()
                    .filter(|f| !key.is_key_column(&f.column))
                    .cloned()
                    .collect();
                store.update(table, &key.full(), &changes).await?;
                (
                    Verdict {
                        classification: Classification::Updated,
                        prior_date: verdict.prior_date,
                    },
                    true,
                )
            }
        }
    };

    Ok(RowOutcome {
        key,
        verdict,
        written,
    })
}

async fn update_if_blank(
    store: &mut dyn RowStore,
    profile: &SchemaProfile,
    key: &KeyValue,
    fields: &[Field],
) -> Result<(Verdict, bool), DbError> {
    let table = profile.table.as_str();
    let columns: Vec<&str> = fields
        .iter()
        .map(|f| f.column.as_str())
        .filter(|c| !key.is_key_column(c))
        .collect();

    let Some(stored) = store.fetch_row(table, &key.full(), &columns).await? else {
        store.insert(table, fields).await?;
        return Ok((
            Verdict {
                classification: Classification::New,
                prior_date: None,
            },
            true,
        ));
    };

    let prior_date = profile.date_column.as_deref().and_then(|date| {
        stored
            .iter()
            .find(|f| f.column == date)
            .and_then(|f| f.value.clone())
    });
    let fills: Vec<Field> = fields
        .iter()
        .filter(|incoming| {
            let has_value = incoming.value.as_deref().map(|v| !v.is_empty()).unwrap_or(false);
            let stored_blank = stored
                .iter()
                .find(|s| s.column == incoming.column)
                .map(|s| s.value.as_deref().map(|v| v.trim().is_empty()).unwrap_or(true))
                .unwrap_or(false);
            has_value && stored_blank
        })
        .cloned()
        .collect();

    if fills.is_empty() {
        return Ok((
            Verdict {
                classification: match_kind(profile),
                prior_date,
            },
            false,
        ));
    }
    store.update(table, &key.full(), &fills).await?;
    debug!(table, key = %key, columns = fills.len(), "Filled blank columns");
    Ok((
        Verdict {
            classification: Classification::Updated,
            prior_date,
        },
        true,
    ))
}

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Discovered,
    InFlight,
    Loaded,
    Failed,
    Relocated,
}

/// What the watcher should do with the path afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Disposition {
    /// The file left the source directory (or is tracked for cleanup)
    Done,
    /// Leave it for the next scan
    Retry,
    /// Do not pick it up again until it changes on disk
    Rejected,
}

/// One file's trip through the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionJob {
    pub path: PathBuf,
    pub profile: Option<String>,
    pub category: Option<Category>,
    pub status: JobStatus,
    pub disposition: Disposition,
    pub summary: Option<LoadSummary>,
    pub notifications: Option<DispatchReport>,
    pub transfer: Option<TransferReport>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl IngestionJob {
    fn discovered(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            profile: None,
            category: None,
            status: JobStatus::Discovered,
            disposition: Disposition::Retry,
            summary: None,
            notifications: None,
            transfer: None,
            error: None,
            duration_ms: 0,
        }
    }
}

/// Knobs that shape a job's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Delete loaded files instead of archiving them
    pub delete_source: bool,
    /// Move failed files to the root's error directory
    pub move_failed_to_error: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            delete_source: false,
            move_failed_to_error: true,
        }
    }
}

/// Everything a job needs, shared by all workers.
#[derive(Clone)]
pub struct Pipeline {
    registry: Arc<SchemaRegistry>,
    stores: Arc<dyn StoreFactory>,
    dispatcher: Dispatcher,
    transfer: Transfer,
    options: PipelineOptions,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("profiles", &self.registry.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        stores: Arc<dyn StoreFactory>,
        dispatcher: Dispatcher,
        transfer: Transfer,
        options: PipelineOptions,
    ) -> Self {
        Self {
            registry,
            stores,
            dispatcher,
            transfer,
            options,
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn transfer(&self) -> &Transfer {
        &self.transfer
    }

    /// Run one file end to end. Never fails; the outcome is in the job.
    pub async fn run(&self, path: &Path, root: &MonitoredRoot) -> IngestionJob {
        let span = info_span!("job", file = %path.display());
        async move {
            let started = Instant::now();
            let mut job = IngestionJob::discovered(path);
            job.status = JobStatus::InFlight;
            self.drive(&mut job, root).await;
            job.duration_ms = started.elapsed().as_millis() as u64;
            info!(
                status = ?job.status,
                disposition = ?job.disposition,
                duration_ms = job.duration_ms,
                "Job finished"
            );
            job
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, job: &mut IngestionJob, root: &MonitoredRoot) {
        let path = job.path.clone();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let profile = match self.registry.resolve(&file_name) {
            Ok(profile) => profile,
            Err(err) => {
                warn!(error = %err, "No profile for file; leaving it in place");
                job.status = JobStatus::Failed;
                job.disposition = Disposition::Rejected;
                job.error = Some(err.to_string());
                return;
            }
        };
        job.profile = Some(profile.code.clone());
        let category = resolve_category(&path, root.category, profile.category);
        job.category = Some(category);

        match self.load(&path, &profile).await {
            Ok(summary) => {
                info!(
                    table = %summary.table,
                    new = summary.new,
                    duplicate = summary.duplicate,
                    resend = summary.resend,
                    updated = summary.updated,
                    skipped = summary.skipped,
                    "File loaded"
                );
                job.status = JobStatus::Loaded;
                let report = self.dispatcher.notify(category, &summary.flagged).await;
                job.notifications = Some(report);
                job.summary = Some(summary);
                self.relocate_loaded(job, root).await;
            }
            Err(err) if err.is_transient() => {
                warn!(error = %err, "Storage unavailable; file left for the next scan");
                job.status = JobStatus::Failed;
                job.disposition = Disposition::Retry;
                job.error = Some(err.to_string());
            }
            Err(PipelineError::Read(ReadError::Io(err))) => {
                warn!(error = %err, "File could not be read; will retry");
                job.status = JobStatus::Failed;
                job.disposition = Disposition::Retry;
                job.error = Some(err.to_string());
            }
            Err(err) => {
                error!(error = %err, "Load failed");
                job.status = JobStatus::Failed;
                job.error = Some(err.to_string());
                self.relocate_failed(job, root).await;
            }
        }
    }

    /// Read, connect and load. The storage session ends on every path.
    pub async fn load(&self, path: &Path, profile: &SchemaProfile) -> Result<LoadSummary, PipelineError> {
        let file = read_csv(path, profile).await?;
        debug!(
            rows = file.rows.len(),
            header_source = ?file.header_source,
            delimiter = %char::from(file.delimiter),
            "File parsed"
        );
        let mut store = self.stores.open().await?;
        load_rows(store.as_mut(), profile, &file).await
    }

    async fn relocate_loaded(&self, job: &mut IngestionJob, root: &MonitoredRoot) {
        let result = if self.options.delete_source {
            let transfer = self.transfer.clone();
            let path = job.path.clone();
            tokio::task::spawn_blocking(move || transfer.delete(&path))
                .await
                .map_err(|err| join_error(&job.path, err))
        } else {
            self.blocking_relocate(&job.path, &root.archive, Destination::Archive)
                .await
        };
        match result {
            Ok(report) => {
                info!(destination = ?report.destination, fate = ?report.fate, "File relocated");
                job.status = JobStatus::Relocated;
                job.disposition = Disposition::Done;
                job.transfer = Some(report);
            }
            Err(err) => {
                error!(error = %err, "Loaded file could not be relocated");
                job.disposition = Disposition::Rejected;
                job.error = Some(err.to_string());
            }
        }
    }

    async fn relocate_failed(&self, job: &mut IngestionJob, root: &MonitoredRoot) {
        if !self.options.move_failed_to_error {
            job.disposition = Disposition::Rejected;
            return;
        }
        match self
            .blocking_relocate(&job.path, &root.error, Destination::Error)
            .await
        {
            Ok(report) => {
                info!(destination = ?report.destination, "Failed file moved to error directory");
                job.disposition = Disposition::Done;
                job.transfer = Some(report);
            }
            Err(err) => {
                error!(error = %err, "Failed file could not be moved to error directory");
                job.disposition = Disposition::Rejected;
            }
        }
    }

    async fn blocking_relocate(
        &self,
        path: &Path,
        dir: &Path,
        kind: Destination,
    ) -> Result<TransferReport, TransferError> {
        let transfer = self.transfer.clone();
        let source = path.to_path_buf();
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || transfer.relocate(&source, &dir, kind))
            .await
            .map_err(|err| join_error(path, err))?
    }
}

fn join_error(path: &Path, err: tokio::task::JoinError) -> TransferError {
    TransferError::io("transfer task", path, io::Error::new(io::ErrorKind::Other, err.to_string()))
}
