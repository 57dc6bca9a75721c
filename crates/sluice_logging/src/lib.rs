//! Logging setup shared by Sluice binaries.
//!
//! Log lines go to two places: a size-rotated file under the logs directory
//! (always at the configured filter) and stderr (quieter unless verbose).

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "sluice=info,sluice_db=info";
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Environment variable overriding the Sluice home directory.
pub const HOME_ENV: &str = "SLUICE_HOME";

/// Logging configuration.
pub struct LogConfig<'a> {
    /// Base name of the log file (`<app_name>.log`)
    pub app_name: &'a str,
    /// Directory for log files; defaults to [`logs_dir`]
    pub log_dir: Option<PathBuf>,
    /// Mirror the file filter on stderr instead of warnings only
    pub verbose: bool,
}

/// Initialize tracing with a rolling file writer and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = match config.log_dir {
        Some(dir) => dir,
        None => logs_dir(),
    };
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create logs directory: {}", log_dir.display()))?;
    let file_writer = SharedRollingWriter::new(&log_dir, config.app_name)
        .context("Failed to initialize rolling log writer")?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Sluice home directory: `$SLUICE_HOME`, else `~/.sluice`, else `./.sluice`.
pub fn sluice_home() -> PathBuf {
    if let Ok(override_path) = std::env::var(HOME_ENV) {
        if !override_path.trim().is_empty() {
            return PathBuf::from(override_path);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sluice")
}

/// Default logs directory: `<home>/logs`.
pub fn logs_dir() -> PathBuf {
    sluice_home().join("logs")
}

/// Size-capped log file that shifts `name.log` → `name.log.1` → ... when full.
struct RollingFileAppender {
    dir: PathBuf,
    base_name: String,
    max_files: usize,
    max_size: u64,
    file: Option<File>,
    current_size: u64,
}

impl RollingFileAppender {
    fn open(dir: &Path, base_name: &str, max_files: usize, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let mut appender = Self {
            dir: dir.to_path_buf(),
            base_name: sanitize_name(base_name),
            max_files: max_files.max(1),
            max_size,
            file: None,
            current_size: 0,
        };
        appender.reopen()?;
        if appender.current_size > appender.max_size {
            appender.rotate()?;
        }
        Ok(appender)
    }

    fn reopen(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(0))?;
        self.current_size = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    /// Index 0 is the live file; higher indexes are older generations.
    fn path_for(&self, index: usize) -> PathBuf {
        match index {
            0 => self.dir.join(format!("{}.log", self.base_name)),
            n => self.dir.join(format!("{}.log.{}", self.base_name, n)),
        }
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }

        let oldest = self.max_files - 1;
        if oldest == 0 {
            // Single-file mode: truncate in place.
            fs::remove_file(self.path_for(0)).or_else(ignore_not_found)?;
        } else {
            fs::remove_file(self.path_for(oldest)).or_else(ignore_not_found)?;
            for index in (0..oldest).rev() {
                let from = self.path_for(index);
                if from.exists() {
                    fs::rename(&from, self.path_for(index + 1))?;
                }
            }
        }

        self.reopen()
    }
}

fn ignore_not_found(err: io::Error) -> io::Result<()> {
    if err.kind() == io::ErrorKind::NotFound {
        Ok(())
    } else {
        Err(err)
    }
}

impl Write for RollingFileAppender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.current_size > 0 && self.current_size + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file unavailable"))?;
        let written = file.write(buf)?;
        self.current_size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// `MakeWriter` handing every event a handle to the same appender.
#[derive(Clone)]
struct SharedRollingWriter {
    inner: Arc<Mutex<RollingFileAppender>>,
}

impl SharedRollingWriter {
    fn new(dir: &Path, base_name: &str) -> Result<Self> {
        let appender = RollingFileAppender::open(dir, base_name, MAX_LOG_FILES, MAX_LOG_FILE_SIZE)
            .with_context(|| format!("Failed to open log file for {}", base_name))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(appender)),
        })
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedRollingWriter {
    type Writer = SharedRollingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for SharedRollingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?
            .flush()
    }
}

fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "sluice".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn rotation_keeps_bounded_generations() {
        let tmp = TempDir::new().unwrap();
        let mut appender = RollingFileAppender::open(tmp.path(), "watch", 3, 16).unwrap();

        for round in 0..6 {
            let line = format!("line-{:02}-xxxxx\n", round);
            appender.write_all(line.as_bytes()).unwrap();
        }
        appender.flush().unwrap();

        assert!(tmp.path().join("watch.log").exists());
        assert!(tmp.path().join("watch.log.1").exists());
        assert!(tmp.path().join("watch.log.2").exists());
        assert!(!tmp.path().join("watch.log.3").exists());

        let newest = fs::read_to_string(tmp.path().join("watch.log")).unwrap();
        assert_eq!(newest, "line-05-xxxxx\n");
        let previous = fs::read_to_string(tmp.path().join("watch.log.1")).unwrap();
        assert_eq!(previous, "line-04-xxxxx\n");
    }

    #[test]
    fn reopening_appends_to_existing_file() {
        let tmp = TempDir::new().unwrap();
        {
            let mut appender = RollingFileAppender::open(tmp.path(), "app", 2, 1024).unwrap();
            appender.write_all(b"first\n").unwrap();
        }
        let mut appender = RollingFileAppender::open(tmp.path(), "app", 2, 1024).unwrap();
        appender.write_all(b"second\n").unwrap();
        appender.flush().unwrap();

        let content = fs::read_to_string(tmp.path().join("app.log")).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[test]
    fn single_generation_truncates() {
        let tmp = TempDir::new().unwrap();
        let mut appender = RollingFileAppender::open(tmp.path(), "solo", 1, 8).unwrap();
        appender.write_all(b"12345678").unwrap();
        appender.write_all(b"abc").unwrap();
        appender.flush().unwrap();

        let content = fs::read_to_string(tmp.path().join("solo.log")).unwrap();
        assert_eq!(content, "abc");
        assert!(!tmp.path().join("solo.log.1").exists());
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_name("sluice watch"), "sluice_watch");
        assert_eq!(sanitize_name(""), "sluice");
    }
}
