#![cfg(feature = "sqlite")]

//! End-to-end ingestion against a SQLite file store.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sluice::classify::ClassifiedRow;
use sluice::notify::{Dispatcher, MemoryTransport, Recipient};
use sluice::pipeline::{
    load_rows, Disposition, JobStatus, MonitoredRoot, Pipeline, PipelineOptions, SqlStoreFactory,
    StoreFactory,
};
use sluice::reader::parse_csv;
use sluice::registry::{
    Category, Classification, ConflictPolicy, HeaderMode, KeySemantics, NaturalKey, RowTransform,
    SchemaProfile, SchemaRegistry,
};
use sluice::transfer::{CleanupRegistry, FileOps, SourceFate, StdFileOps, Transfer};
use sluice_db::{
    DbConfig, DbError, Field, KeyMatch, PriorRecord, Provisioned, RowStore, SqlStore, TableSpec,
};
use tempfile::TempDir;

struct DropFolder {
    _tmp: TempDir,
    db: PathBuf,
    root: MonitoredRoot,
}

impl DropFolder {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = MonitoredRoot {
            source: tmp.path().join("in"),
            archive: tmp.path().join("archive"),
            error: tmp.path().join("error"),
            category: None,
        };
        for dir in [&root.source, &root.archive, &root.error] {
            fs::create_dir_all(dir).unwrap();
        }
        Self {
            db: tmp.path().join("store.sqlite3"),
            _tmp: tmp,
            root,
        }
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.root.source.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn db_config(&self) -> DbConfig {
        DbConfig::sqlite(&self.db)
    }

    async fn store(&self) -> SqlStore {
        SqlStore::connect(&self.db_config()).await.unwrap()
    }

    fn pipeline(&self, registry: SchemaRegistry, transport: Arc<MemoryTransport>) -> Pipeline {
        self.pipeline_with(
            registry,
            Arc::new(SqlStoreFactory::new(self.db_config())),
            transport,
            Arc::new(StdFileOps),
        )
    }

    fn pipeline_with(
        &self,
        registry: SchemaRegistry,
        stores: Arc<dyn StoreFactory>,
        transport: Arc<MemoryTransport>,
        ops: Arc<dyn FileOps>,
    ) -> Pipeline {
        let dispatcher = Dispatcher::new(
            transport,
            vec![
                Recipient::new("glass@example.com", &[Category::Glass]),
                Recipient::new("orders@example.com", &[Category::Order]),
            ],
        );
        Pipeline::new(
            Arc::new(registry),
            stores,
            dispatcher,
            Transfer::new(ops, true, CleanupRegistry::new()),
            PipelineOptions::default(),
        )
    }

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

fn custom(code: &str, headers: &[&str], key: NaturalKey, policy: ConflictPolicy) -> SchemaProfile {
    SchemaProfile {
        code: code.to_string(),
        table: code.to_lowercase(),
        headers: headers.iter().map(|h| h.to_string()).collect(),
        key,
        key_semantics: KeySemantics::default(),
        policy,
        date_column: None,
        column_types: BTreeMap::new(),
        transforms: vec![RowTransform::Trim],
        header_mode: HeaderMode::Canonical,
        atomic: true,
        alerts: vec![Classification::Duplicate, Classification::Updated],
        category: Category::Order,
    }
}

fn registry_of(profiles: Vec<SchemaProfile>) -> SchemaRegistry {
    let mut registry = SchemaRegistry::empty();
    for profile in profiles {
        registry.register(profile).unwrap();
    }
    registry
}

/// A GLASSREPORT file with the canonical header line and one line per row.
fn glass_file(rows: &[&[(&str, &str)]]) -> String {
    builtin_file("GLASSREPORT", rows)
}

/// A file for built-in profile `code`: canonical header line, then one line
/// per row with unnamed columns left blank.
fn builtin_file(code: &str, rows: &[&[(&str, &str)]]) -> String {
    let registry = SchemaRegistry::builtin();
    let profile = registry.get(code).unwrap();
    let mut out = profile.headers.join(",");
    out.push('\n');
    for row in rows {
        let line: Vec<&str> = profile
            .headers
            .iter()
            .map(|h| {
                row.iter()
                    .find(|(column, _)| column == h)
                    .map(|(_, v)| *v)
                    .unwrap_or("")
            })
            .collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

fn key(column: &'static str, value: &'static str) -> [KeyMatch<'static>; 1] {
    [KeyMatch::new(column, value)]
}

#[tokio::test]
async fn glassreport_repeat_is_flagged_once_and_archived() {
    let folder = DropFolder::new();
    let unit: &[(&str, &str)] = &[
        ("order", "1001"),
        ("sealed_unit_id", "A1"),
        ("list_date", "01/15/2024"),
        ("width", "23.5"),
    ];
    let path = folder.write("GLASSREPORT_0115.csv", &glass_file(&[unit, unit]));
    let transport = Arc::new(MemoryTransport::new());
    let pipeline = folder.pipeline(SchemaRegistry::builtin(), transport.clone());

    let job = pipeline.run(&path, &folder.root).await;

    assert_eq!(job.status, JobStatus::Relocated, "{:?}", job.error);
    assert_eq!(job.disposition, Disposition::Done);
    let summary = job.summary.as_ref().unwrap();
    assert_eq!(summary.new, 1);
    assert_eq!(summary.duplicate, 1);
    assert_eq!(summary.written, 2);

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipients, vec!["glass@example.com".to_string()]);
    assert!(sent[0].subject.starts_with("DUPLICATE Glass Order Alert"));
    assert_eq!(sent[0].html_body.matches("<li>").count(), 1);
    assert!(sent[0]
        .html_body
        .contains("order: 1001, sealed_unit_id: A1, Original Date: 2024-01-15"));

    assert!(!path.exists());
    let archived = DropFolder::listing(&folder.root.archive);
    assert_eq!(archived.len(), 1);
    assert!(archived[0].starts_with("GLASSREPORT_0115_"));
    assert!(archived[0].ends_with(".csv"));

    let mut store = folder.store().await;
    let stored = store
        .count_matching("glassreport", &key("order", "1001"))
        .await
        .unwrap();
    assert_eq!(stored, 2);
}

#[tokio::test]
async fn composite_key_separates_resend_from_duplicate() {
    let folder = DropFolder::new();
    let transport = Arc::new(MemoryTransport::new());
    let pipeline = folder.pipeline(SchemaRegistry::builtin(), transport.clone());

    let first = folder.write(
        "GLASSREPORT_a.csv",
        &glass_file(&[&[("order", "1001"), ("sealed_unit_id", "A1"), ("list_date", "2024-01-15")]]),
    );
    let job = pipeline.run(&first, &folder.root).await;
    assert_eq!(job.summary.as_ref().unwrap().new, 1);
    assert!(transport.sent().is_empty());

    let second = folder.write(
        "GLASSREPORT_b.csv",
        &glass_file(&[
            &[("order", "1001"), ("sealed_unit_id", "B2")],
            &[("order", "1001"), ("sealed_unit_id", "A1")],
            &[("order", "2002"), ("sealed_unit_id", "A1")],
        ]),
    );
    let job = pipeline.run(&second, &folder.root).await;
    let summary = job.summary.as_ref().unwrap();
    assert_eq!(summary.resend, 1);
    assert_eq!(summary.duplicate, 1);
    assert_eq!(summary.new, 1);

    let kinds: Vec<Classification> = summary.flagged.iter().map(|r| r.classification).collect();
    assert_eq!(kinds, vec![Classification::Resend, Classification::Duplicate]);
    let resend: &ClassifiedRow = &summary.flagged[0];
    assert_eq!(resend.prior_date.as_deref(), Some("2024-01-15"));

    let subjects: Vec<String> = transport.sent().into_iter().map(|m| m.subject).collect();
    assert_eq!(subjects.len(), 2);
    assert!(subjects[0].starts_with("DUPLICATE Glass"));
    assert!(subjects[1].starts_with("RE-SENT Glass"));
}

#[tokio::test]
async fn replace_on_conflict_keeps_only_the_latest_values() {
    let folder = DropFolder::new();
    let profile = custom(
        "PLAN",
        &["ORDER", "QTY", "NOTE"],
        NaturalKey::single("ORDER"),
        ConflictPolicy::ReplaceOnConflict,
    );
    let mut store = folder.store().await;

    let first = parse_csv("ORDER,QTY,NOTE\n1,5,first\n", &profile).unwrap();
    let summary = load_rows(&mut store, &profile, &first).await.unwrap();
    assert_eq!(summary.new, 1);

    let second = parse_csv("ORDER,QTY,NOTE\n1,7,second\n", &profile).unwrap();
    let summary = load_rows(&mut store, &profile, &second).await.unwrap();
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.flagged.len(), 1);

    assert_eq!(store.count_matching("plan", &key("ORDER", "1")).await.unwrap(), 1);
    let row = store
        .fetch_row("plan", &key("ORDER", "1"), &["QTY", "NOTE"])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row[0].value.as_deref(), Some("7"));
    assert_eq!(row[1].value.as_deref(), Some("second"));
}

#[tokio::test]
async fn replace_on_conflict_keeps_every_line_of_one_file() {
    let folder = DropFolder::new();
    let profile = custom(
        "PLAN",
        &["ORDER", "QTY"],
        NaturalKey::single("ORDER"),
        ConflictPolicy::ReplaceOnConflict,
    );
    let mut store = folder.store().await;

    load_rows(&mut store, &profile, &parse_csv("ORDER,QTY\n1,1\n", &profile).unwrap())
        .await
        .unwrap();
    let file = parse_csv("ORDER,QTY\n1,2\n1,3\n", &profile).unwrap();
    let summary = load_rows(&mut store, &profile, &file).await.unwrap();

    assert_eq!(summary.updated, 1);
    assert_eq!(summary.new, 1);
    assert_eq!(store.count_matching("plan", &key("ORDER", "1")).await.unwrap(), 2);
}

#[tokio::test]
async fn update_if_blank_fills_without_overwriting() {
    let folder = DropFolder::new();
    let profile = custom(
        "FILL",
        &["ORDER", "A", "B"],
        NaturalKey::single("ORDER"),
        ConflictPolicy::UpdateIfBlank,
    );
    let mut store = folder.store().await;

    let first = parse_csv("ORDER,A,B\n1,a1,\n", &profile).unwrap();
    assert_eq!(load_rows(&mut store, &profile, &first).await.unwrap().new, 1);

    let second = parse_csv("ORDER,A,B\n1,a2,b2\n", &profile).unwrap();
    let summary = load_rows(&mut store, &profile, &second).await.unwrap();
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.written, 1);

    let row = store
        .fetch_row("fill", &key("ORDER", "1"), &["A", "B"])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row[0].value.as_deref(), Some("a1"));
    assert_eq!(row[1].value.as_deref(), Some("b2"));

    let third = parse_csv("ORDER,A,B\n1,a3,b3\n", &profile).unwrap();
    let summary = load_rows(&mut store, &profile, &third).await.unwrap();
    assert_eq!(summary.duplicate, 1);
    assert_eq!(summary.written, 0);
    assert_eq!(store.count_matching("fill", &key("ORDER", "1")).await.unwrap(), 1);
}

/// Delegates to SQLite, records the columns of every UPDATE and can fail
/// the n-th insert.
struct ObservedStore {
    inner: SqlStore,
    inserts: Arc<AtomicUsize>,
    fail_at: Option<usize>,
    updates: Arc<Mutex<Vec<Vec<String>>>>,
}

impl ObservedStore {
    fn new(inner: SqlStore) -> Self {
        Self {
            inner,
            inserts: Arc::new(AtomicUsize::new(0)),
            fail_at: None,
            updates: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn updated_columns(&self) -> Vec<Vec<String>> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl RowStore for ObservedStore {
    async fn begin(&mut self) -> sluice_db::Result<()> {
        self.inner.begin().await
    }

    async fn commit(&mut self) -> sluice_db::Result<()> {
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> sluice_db::Result<()> {
        self.inner.rollback().await
    }

    async fn ensure_table(&mut self, spec: &TableSpec) -> sluice_db::Result<Provisioned> {
        self.inner.ensure_table(spec).await
    }

    async fn insert(&mut self, table: &str, fields: &[Field]) -> sluice_db::Result<u64> {
        let n = self.inserts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_at == Some(n) {
            return Err(DbError::invalid_state("injected insert failure"));
        }
        self.inner.insert(table, fields).await
    }

    async fn update(
        &mut self,
        table: &str,
        key: &[KeyMatch<'_>],
        fields: &[Field],
    ) -> sluice_db::Result<u64> {
        self.updates
            .lock()
            .unwrap()
            .push(fields.iter().map(|f| f.column.clone()).collect());
        self.inner.update(table, key, fields).await
    }

    async fn delete(&mut self, table: &str, key: &[KeyMatch<'_>]) -> sluice_db::Result<u64> {
        self.inner.delete(table, key).await
    }

    async fn find_prior(
        &mut self,
        table: &str,
        key: &[KeyMatch<'_>],
        date_column: Option<&str>,
    ) -> sluice_db::Result<Option<PriorRecord>> {
        self.inner.find_prior(table, key, date_column).await
    }

    async fn count_matching(&mut self, table: &str, key: &[KeyMatch<'_>]) -> sluice_db::Result<i64> {
        self.inner.count_matching(table, key).await
    }

    async fn fetch_row(
        &mut self,
        table: &str,
        key: &[KeyMatch<'_>],
        columns: &[&str],
    ) -> sluice_db::Result<Option<Vec<Field>>> {
        self.inner.fetch_row(table, key, columns).await
    }
}

struct FailingFactory {
    config: DbConfig,
    fail_at: usize,
}

#[async_trait]
impl StoreFactory for FailingFactory {
    async fn open(&self) -> Result<Box<dyn RowStore>, DbError> {
        let mut store = ObservedStore::new(SqlStore::connect(&self.config).await?);
        store.fail_at = Some(self.fail_at);
        Ok(Box::new(store))
    }
}

#[tokio::test]
async fn inverted_key_flags_secondary_match_as_duplicate() {
    let folder = DropFolder::new();
    let registry = SchemaRegistry::builtin();
    let frames = registry.get("FRAMESCUTTING").unwrap();
    let mut store = folder.store().await;

    let seed = builtin_file("FRAMESCUTTING", &[&[("J", "J1"), ("F", "F1"), ("U", "2024-03-01")]]);
    let summary = load_rows(&mut store, &frames, &parse_csv(&seed, &frames).unwrap())
        .await
        .unwrap();
    assert_eq!(summary.new, 1);

    let next = builtin_file(
        "FRAMESCUTTING",
        &[
            &[("J", "J2"), ("F", "F1")],
            &[("J", "J1"), ("F", "F2")],
            &[("J", "J3"), ("F", "F3")],
        ],
    );
    let summary = load_rows(&mut store, &frames, &parse_csv(&next, &frames).unwrap())
        .await
        .unwrap();
    assert_eq!(summary.duplicate, 1);
    assert_eq!(summary.resend, 1);
    assert_eq!(summary.new, 1);
    assert_eq!(summary.written, 1);

    let flagged: Vec<(Classification, Option<&str>)> = summary
        .flagged
        .iter()
        .map(|r| (r.classification, r.prior_date.as_deref()))
        .collect();
    assert_eq!(
        flagged,
        vec![
            (Classification::Duplicate, Some("2024-03-01")),
            (Classification::Resend, Some("2024-03-01")),
        ]
    );

    assert_eq!(store.count_matching("framescutting", &key("J", "J2")).await.unwrap(), 0);
    assert_eq!(store.count_matching("framescutting", &key("F", "F2")).await.unwrap(), 0);
    assert_eq!(store.count_matching("framescutting", &key("J", "J3")).await.unwrap(), 1);
    assert_eq!(store.count_matching("framescutting", &key("J", "J1")).await.unwrap(), 1);
}

#[tokio::test]
async fn casing_id_is_a_duplicate_from_its_third_sighting() {
    let folder = DropFolder::new();
    let registry = SchemaRegistry::builtin();
    let casing = registry.get("CASING").unwrap();
    let mut store = folder.store().await;

    let content = builtin_file(
        "CASING",
        &[
            &[("CASING_ID", "C-9"), ("DATE", "2024-02-01")],
            &[("CASING_ID", "C-9"), ("DATE", "2024-02-02")],
            &[("CASING_ID", "C-9"), ("DATE", "2024-02-03")],
        ],
    );
    let summary = load_rows(&mut store, &casing, &parse_csv(&content, &casing).unwrap())
        .await
        .unwrap();

    assert_eq!(summary.new, 2);
    assert_eq!(summary.duplicate, 1);
    assert_eq!(summary.written, 3);
    assert_eq!(summary.flagged.len(), 1);
    assert_eq!(summary.flagged[0].line, 4);
    assert_eq!(summary.flagged[0].classification, Classification::Duplicate);
    assert!(summary.flagged[0].prior_date.is_some());
    assert_eq!(store.count_matching("casing", &key("CASING_ID", "C-9")).await.unwrap(), 3);
}

#[tokio::test]
async fn windows_entry_upserts_by_order_or_quotation() {
    let folder = DropFolder::new();
    let registry = SchemaRegistry::builtin();
    let entry = registry.get("WINDOWSENTRY").unwrap();
    let mut store = ObservedStore::new(folder.store().await);

    let seed = builtin_file(
        "WINDOWSENTRY",
        &[
            &[("ORDER_NUMBER", "W-1"), ("QUOTATION_NUMBER", "Q-1"), ("WINDOWS_QTY", "3"), ("DEALER NAME", "Acme")],
            &[("QUOTATION_NUMBER", "Q-9"), ("WINDOWS_QTY", "1")],
        ],
    );
    let summary = load_rows(&mut store, &entry, &parse_csv(&seed, &entry).unwrap())
        .await
        .unwrap();
    assert_eq!(summary.new, 2);
    assert!(store.updated_columns().is_empty());

    let next = builtin_file(
        "WINDOWSENTRY",
        &[
            &[("ORDER_NUMBER", "W-1"), ("QUOTATION_NUMBER", "Q-2"), ("WINDOWS_QTY", "5"), ("DEALER NAME", "Beta")],
            &[("QUOTATION_NUMBER", "Q-9"), ("WINDOWS_QTY", "4")],
        ],
    );
    let summary = load_rows(&mut store, &entry, &parse_csv(&next, &entry).unwrap())
        .await
        .unwrap();
    assert_eq!(summary.updated, 2);
    assert_eq!(summary.new, 0);
    assert_eq!(summary.written, 2);

    let updates = store.updated_columns();
    assert_eq!(updates.len(), 2);
    assert!(!updates[0].contains(&"ORDER_NUMBER".to_string()));
    assert!(updates[0].contains(&"QUOTATION_NUMBER".to_string()));
    assert!(!updates[1].contains(&"QUOTATION_NUMBER".to_string()));
    assert!(updates[1].contains(&"WINDOWS_QTY".to_string()));

    let by_order = store
        .fetch_row("windowsentry", &key("ORDER_NUMBER", "W-1"), &["QUOTATION_NUMBER", "WINDOWS_QTY", "DEALER NAME"])
        .await
        .unwrap()
        .unwrap();
    let values: Vec<Option<&str>> = by_order.iter().map(|f| f.value.as_deref()).collect();
    assert_eq!(values, vec![Some("Q-2"), Some("5"), Some("Beta")]);

    let by_quotation = store
        .fetch_row("windowsentry", &key("QUOTATION_NUMBER", "Q-9"), &["WINDOWS_QTY"])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_quotation[0].value.as_deref(), Some("4"));
    assert_eq!(store.count_matching("windowsentry", &key("QUOTATION_NUMBER", "Q-9")).await.unwrap(), 1);
    assert_eq!(store.count_matching("windowsentry", &key("ORDER_NUMBER", "W-1")).await.unwrap(), 1);
}

#[tokio::test]
async fn invalid_utf8_file_goes_to_error_directory() {
    let folder = DropFolder::new();
    let path = folder.root.source.join("OPTLABEL_5.csv");
    fs::write(&path, b"BARCODE\n\xff\xfe\n").unwrap();
    let pipeline = folder.pipeline(SchemaRegistry::builtin(), Arc::new(MemoryTransport::new()));

    let job = pipeline.run(&path, &folder.root).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.disposition, Disposition::Done);
    assert!(job.error.as_deref().unwrap().contains("not valid UTF-8"));
    assert!(job.summary.is_none());
    assert!(!path.exists());
    let failed = DropFolder::listing(&folder.root.error);
    assert_eq!(failed.len(), 1);
    assert!(failed[0].starts_with("OPTLABEL_5_ERROR_"));
}

#[tokio::test]
async fn atomic_file_failing_on_last_row_stores_nothing() {
    let folder = DropFolder::new();
    let profile = custom("BATCH", &["ORDER", "NAME"], NaturalKey::single("ORDER"), ConflictPolicy::Append);
    let mut content = String::from("ORDER,NAME\n");
    for i in 1..=10 {
        content.push_str(&format!("{},row{}\n", i, i));
    }
    let path = folder.write("BATCH_1.csv", &content);
    let pipeline = folder.pipeline_with(
        registry_of(vec![profile]),
        Arc::new(FailingFactory {
            config: folder.db_config(),
            fail_at: 10,
        }),
        Arc::new(MemoryTransport::new()),
        Arc::new(StdFileOps),
    );

    let job = pipeline.run(&path, &folder.root).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.disposition, Disposition::Done);
    assert!(job.error.as_deref().unwrap().contains("line 11"));

    let mut store = folder.store().await;
    for i in 1..=10 {
        let order = i.to_string();
        let count = store
            .count_matching("batch", &[KeyMatch::new("ORDER", &order)])
            .await
            .unwrap();
        assert_eq!(count, 0, "row {} survived the rollback", i);
    }

    assert!(!path.exists());
    let failed = DropFolder::listing(&folder.root.error);
    assert_eq!(failed.len(), 1);
    assert!(failed[0].starts_with("BATCH_1_ERROR_"));
}

#[tokio::test]
async fn unknown_file_is_left_in_place() {
    let folder = DropFolder::new();
    let path = folder.write("MYSTERY_1.csv", "A,B\n1,2\n");
    let pipeline = folder.pipeline(SchemaRegistry::builtin(), Arc::new(MemoryTransport::new()));

    let job = pipeline.run(&path, &folder.root).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.disposition, Disposition::Rejected);
    assert!(path.exists());
    assert!(DropFolder::listing(&folder.root.error).is_empty());
}

/// Rename never works, as between two mounts.
struct CrossDevice;

impl FileOps for CrossDevice {
    fn rename(&self, _from: &Path, _to: &Path) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "cross-device link"))
    }
    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        StdFileOps.copy(from, to)
    }
    fn file_size(&self, path: &Path) -> io::Result<u64> {
        StdFileOps.file_size(path)
    }
    fn digest(&self, path: &Path) -> io::Result<blake3::Hash> {
        StdFileOps.digest(path)
    }
    fn remove(&self, path: &Path) -> io::Result<()> {
        StdFileOps.remove(path)
    }
    fn exists(&self, path: &Path) -> bool {
        StdFileOps.exists(path)
    }
}

#[tokio::test]
async fn cross_device_archive_copies_verifies_and_deletes() {
    let folder = DropFolder::new();
    let profile = custom("BATCH", &["ORDER", "NAME"], NaturalKey::single("ORDER"), ConflictPolicy::Append);
    let content = "ORDER,NAME\n1,one\n2,two\n";
    let path = folder.write("BATCH_2.csv", content);
    let pipeline = folder.pipeline_with(
        registry_of(vec![profile]),
        Arc::new(SqlStoreFactory::new(folder.db_config())),
        Arc::new(MemoryTransport::new()),
        Arc::new(CrossDevice),
    );

    let job = pipeline.run(&path, &folder.root).await;
    assert_eq!(job.status, JobStatus::Relocated, "{:?}", job.error);
    let transfer = job.transfer.unwrap();
    assert_eq!(transfer.fate, SourceFate::Deleted);
    let destination = transfer.destination.unwrap();
    assert_eq!(fs::read_to_string(destination).unwrap(), content);
    assert!(!path.exists());
}
