//! Sluice: drop-folder CSV ingestion.
//!
//! Files appearing in watched directories are matched to a schema profile by
//! their name prefix, loaded row by row into a relational store, classified
//! against what is already stored, reported to subscribed recipients and then
//! moved out of the drop folder.
//!
//! # Layout
//!
//! - [`registry`]: schema profiles and file-name routing
//! - [`reader`]: CSV parsing, header detection and value normalization
//! - [`classify`]: natural keys and New/Duplicate/Resend verdicts
//! - [`pipeline`]: one ingestion job from read to relocation
//! - [`notify`]: notification batches and mail transports
//! - [`transfer`]: rename-or-copy moves with verification
//! - [`watcher`]: filesystem events, polling and the in-flight set
//! - [`config`]: TOML configuration

pub mod classify;
pub mod config;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod reader;
pub mod registry;
pub mod transfer;
pub mod watcher;

pub use config::SluiceConfig;
pub use error::{
    ConfigError, PipelineError, ReadError, RegistryError, RowError, TransferError, TransportError,
};
pub use pipeline::{
    Disposition, IngestionJob, JobStatus, LoadSummary, MonitoredRoot, Pipeline, PipelineOptions,
    SqlStoreFactory, StoreFactory,
};
pub use registry::{Category, Classification, SchemaProfile, SchemaRegistry};
pub use transfer::{CleanupRegistry, Transfer};
pub use watcher::{FileHandler, Watcher, WatcherOptions};
