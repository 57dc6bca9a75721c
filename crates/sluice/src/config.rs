//! Configuration for the Sluice watcher

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sluice_db::DbConfig;

use crate::error::ConfigError;
use crate::notify::{Dispatcher, LogTransport, MailTransport, Recipient, SendmailTransport};
use crate::pipeline::{MonitoredRoot, PipelineOptions};
use crate::registry::{Category, SchemaProfile, SchemaRegistry};
use crate::watcher::WatcherOptions;

/// Environment variable overriding `storage.password`.
pub const PASSWORD_ENV: &str = "SLUICE_DB_PASSWORD";

/// Main configuration for Sluice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SluiceConfig {
    /// Full re-scan period in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Wait between detecting a file and reading it, in milliseconds
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,

    /// Delete loaded files instead of archiving them
    #[serde(default)]
    pub delete_source: bool,

    /// Move failed files to the root's error directory
    #[serde(default = "default_true")]
    pub move_failed_to_error: bool,

    /// Compare content digests after a copy, not just sizes
    #[serde(default)]
    pub verify_content: bool,

    /// Directories to watch
    #[serde(default)]
    pub roots: Vec<RootConfig>,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub mail: MailConfig,

    /// Extra profiles; same-coded ones replace the built-ins
    #[serde(default)]
    pub profiles: Vec<SchemaProfile>,
}

/// One watched root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootConfig {
    pub source: PathBuf,
    pub archive: PathBuf,
    pub error: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Sqlite,
    Mysql,
}

impl Backend {
    fn name(self) -> &'static str {
        match self {
            Backend::Sqlite => "sqlite",
            Backend::Mysql => "mysql",
        }
    }
}

/// Storage connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: Backend,

    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub database: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailTransportKind {
    #[default]
    Log,
    Sendmail,
}

/// Notification settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default)]
    pub transport: MailTransportKind,

    #[serde(default = "default_from")]
    pub from: String,

    #[serde(default = "default_sendmail_command")]
    pub sendmail_command: PathBuf,

    #[serde(default)]
    pub recipients: Vec<Recipient>,
}

fn default_poll_interval() -> u64 {
    30
}

fn default_settle_delay() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

fn default_sqlite_path() -> PathBuf {
    sluice_logging::sluice_home().join("sluice.sqlite3")
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    3306
}

fn default_connect_attempts() -> u32 {
    sluice_db::DEFAULT_CONNECT_ATTEMPTS
}

fn default_retry_delay() -> u64 {
    sluice_db::DEFAULT_RETRY_DELAY.as_secs()
}

fn default_from() -> String {
    "sluice@localhost".to_string()
}

fn default_sendmail_command() -> PathBuf {
    PathBuf::from("/usr/sbin/sendmail")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            sqlite_path: default_sqlite_path(),
            host: default_host(),
            port: default_port(),
            database: String::new(),
            user: String::new(),
            password: String::new(),
            connect_attempts: default_connect_attempts(),
            retry_delay_secs: default_retry_delay(),
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            transport: MailTransportKind::default(),
            from: default_from(),
            sendmail_command: default_sendmail_command(),
            recipients: Vec::new(),
        }
    }
}

impl Default for SluiceConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            settle_delay_ms: default_settle_delay(),
            delete_source: false,
            move_failed_to_error: true,
            verify_content: false,
            roots: Vec::new(),
            storage: StorageConfig::default(),
            mail: MailConfig::default(),
            profiles: Vec::new(),
        }
    }
}

impl SluiceConfig {
    /// `$SLUICE_HOME/config.toml`
    pub fn default_path() -> PathBuf {
        sluice_logging::sluice_home().join("config.toml")
    }

    /// Defaults plus one root under `$SLUICE_HOME/drop`, for `init-config`.
    pub fn starter() -> Self {
        let base = sluice_logging::sluice_home().join("drop");
        Self {
            roots: vec![RootConfig {
                source: base.join("in"),
                archive: base.join("archive"),
                error: base.join("error"),
                category: None,
            }],
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse TOML text, applying the password override.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config: SluiceConfig = toml::from_str(content)?;
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            config.storage.password = password;
        }
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Checks that must pass before the watcher starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.roots.is_empty() {
            return Err(ConfigError::invalid("no [[roots]] configured"));
        }
        for (i, root) in self.roots.iter().enumerate() {
            for (name, path) in [
                ("source", &root.source),
                ("archive", &root.archive),
                ("error", &root.error),
            ] {
                if path.as_os_str().is_empty() {
                    return Err(ConfigError::invalid(format!("roots[{}].{} is empty", i, name)));
                }
            }
            if root.source == root.archive || root.source == root.error {
                return Err(ConfigError::invalid(format!(
                    "roots[{}]: archive and error directories must differ from the source",
                    i
                )));
            }
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::invalid("poll_interval_secs must be positive"));
        }
        self.validate_storage()?;
        for recipient in &self.mail.recipients {
            if !recipient.email.contains('@') {
                return Err(ConfigError::invalid(format!(
                    "recipient '{}' is not an email address",
                    recipient.email
                )));
            }
        }
        self.registry()?;
        Ok(())
    }

    fn validate_storage(&self) -> Result<(), ConfigError> {
        let storage = &self.storage;
        match storage.backend {
            Backend::Sqlite => {
                if !cfg!(feature = "sqlite") {
                    return Err(ConfigError::NotCompiled(storage.backend.name().to_string()));
                }
                if storage.sqlite_path.as_os_str().is_empty() {
                    return Err(ConfigError::invalid("storage.sqlite_path is empty"));
                }
            }
            Backend::Mysql => {
                if cfg!(feature = "sqlite") || !cfg!(feature = "mysql") {
                    return Err(ConfigError::NotCompiled(storage.backend.name().to_string()));
                }
                for (name, value) in [
                    ("host", &storage.host),
                    ("database", &storage.database),
                    ("user", &storage.user),
                ] {
                    if value.trim().is_empty() {
                        return Err(ConfigError::invalid(format!("storage.{} is required for mysql", name)));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn monitored_roots(&self) -> Vec<MonitoredRoot> {
        self.roots
            .iter()
            .map(|root| MonitoredRoot {
                source: root.source.clone(),
                archive: root.archive.clone(),
                error: root.error.clone(),
                category: root.category,
            })
            .collect()
    }

    /// Built-in profiles merged with the configured ones.
    pub fn registry(&self) -> Result<SchemaRegistry, ConfigError> {
        Ok(SchemaRegistry::with_profiles(self.profiles.clone())?)
    }

    pub fn db_config(&self) -> Result<DbConfig, ConfigError> {
        self.validate_storage()?;
        let storage = &self.storage;
        let config = connect_options(storage)?;
        Ok(config.with_retry(
            storage.connect_attempts,
            Duration::from_secs(storage.retry_delay_secs),
        ))
    }

    pub fn dispatcher(&self) -> Dispatcher {
        let transport: Arc<dyn MailTransport> = match self.mail.transport {
            MailTransportKind::Log => Arc::new(LogTransport),
            MailTransportKind::Sendmail => Arc::new(SendmailTransport::new(
                self.mail.sendmail_command.clone(),
                self.mail.from.clone(),
            )),
        };
        Dispatcher::new(transport, self.mail.recipients.clone())
    }

    pub fn watcher_options(&self) -> WatcherOptions {
        WatcherOptions {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            ..WatcherOptions::default()
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            delete_source: self.delete_source,
            move_failed_to_error: self.move_failed_to_error,
        }
    }
}

#[cfg(feature = "sqlite")]
fn connect_options(storage: &StorageConfig) -> Result<DbConfig, ConfigError> {
    match storage.backend {
        Backend::Sqlite => Ok(DbConfig::sqlite(&storage.sqlite_path)),
        Backend::Mysql => Err(ConfigError::NotCompiled(Backend::Mysql.name().to_string())),
    }
}

#[cfg(all(feature = "mysql", not(feature = "sqlite")))]
fn connect_options(storage: &StorageConfig) -> Result<DbConfig, ConfigError> {
    match storage.backend {
        Backend::Mysql => Ok(DbConfig::mysql(&sluice_db::MySqlParams {
            host: storage.host.clone(),
            port: storage.port,
            database: storage.database.clone(),
            user: storage.user.clone(),
            password: storage.password.clone(),
        })),
        Backend::Sqlite => Err(ConfigError::NotCompiled(Backend::Sqlite.name().to_string())),
    }
}
