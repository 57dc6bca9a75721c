//! Post-load file relocation.
//!
//! A transfer tries an atomic rename first. When that fails for any reason
//! other than the source having vanished, it copies, verifies the copy and
//! then gets rid of the source: delete, else rename it with the
//! [`PROCESSED_SUFFIX`] marker, else record it in the [`CleanupRegistry`].
//! Every step goes through [`FileOps`] so failures can be injected.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Local;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::TransferError;

/// Marker appended to a source that was copied but could not be deleted.
pub const PROCESSED_SUFFIX: &str = ".processed";

const MAX_NAME_ATTEMPTS: u32 = 10_000;

/// Filesystem primitives used by transfers.
pub trait FileOps: Send + Sync {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64>;
    fn file_size(&self, path: &Path) -> io::Result<u64>;
    fn digest(&self, path: &Path) -> io::Result<blake3::Hash>;
    fn remove(&self, path: &Path) -> io::Result<()>;
    fn exists(&self, path: &Path) -> bool;

    /// Claim `path` by creating it empty. Fails with `AlreadyExists` when
    /// the name is taken.
    fn reserve(&self, path: &Path) -> io::Result<()> {
        OpenOptions::new().write(true).create_new(true).open(path).map(|_| ())
    }
}

/// [`FileOps`] over `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileOps;

impl FileOps for StdFileOps {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        fs::copy(from, to)
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn digest(&self, path: &Path) -> io::Result<blake3::Hash> {
        let mut file = fs::File::open(path)?;
        let mut hasher = blake3::Hasher::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Paths that need out-of-band removal. Append-only.
#[derive(Debug, Clone, Default)]
pub struct CleanupRegistry {
    paths: Arc<Mutex<BTreeSet<PathBuf>>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, path: &Path) {
        self.lock().insert(path.to_path_buf());
        warn!(path = %path.display(), "Registered for manual cleanup");
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.lock().iter().cloned().collect()
    }

    /// The set only ever grows, so a writer that panicked left it usable.
    fn lock(&self) -> MutexGuard<'_, BTreeSet<PathBuf>> {
        self.paths.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
            warn!("Cleanup registry lock was poisoned; recovering");
            poisoned.into_inner()
        })
    }
}

/// Steps a transfer went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferState {
    Pending,
    RenameAttempted,
    CopyAttempted,
    VerifyFailed,
    DeleteAttempted,
    RenameAsProcessedAttempted,
    Success,
    NeedsManualCleanup,
}

/// What became of the source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "fate", rename_all = "kebab-case")]
pub enum SourceFate {
    /// Renamed to the destination
    Moved,
    Deleted,
    MarkedProcessed { path: PathBuf },
    ManualCleanup,
}

/// Result of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    pub destination: Option<PathBuf>,
    pub fate: SourceFate,
    pub states: Vec<TransferState>,
}

impl TransferReport {
    pub fn needs_manual_cleanup(&self) -> bool {
        self.fate == SourceFate::ManualCleanup
    }
}

/// Kind of destination directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Archive,
    Error,
}

/// File name for `source` in a destination directory, stamped now.
pub fn destination_name(source: &Path, kind: Destination) -> String {
    let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    stamped_name(source, kind, &stamp)
}

fn stamped_name(source: &Path, kind: Destination, stamp: &str) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = extension_of(source);
    match kind {
        Destination::Archive => format!("{}_{}{}", stem, stamp, ext),
        Destination::Error => format!("{}_ERROR_{}{}", stem, stamp, ext),
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

/// Reserve `dir/name`, or `dir/stem_N.ext` for the first free `N`.
///
/// The returned path exists as an empty placeholder owned by the caller, so
/// a concurrent writer cannot take the same name before the move.
pub fn unique_destination(ops: &dyn FileOps, dir: &Path, name: &str) -> Result<PathBuf, TransferError> {
    let as_path = Path::new(name);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = extension_of(as_path);
    for n in 0..=MAX_NAME_ATTEMPTS {
        let candidate = if n == 0 {
            dir.join(name)
        } else {
            dir.join(format!("{}_{}{}", stem, n, ext))
        };
        match ops.reserve(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(TransferError::io("reserve", candidate, err)),
        }
    }
    Err(TransferError::NoFreeName(dir.join(name)))
}

/// `path` with the processed marker appended to its file name.
pub fn processed_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(PROCESSED_SUFFIX);
    path.with_file_name(name)
}

pub fn is_processed_marker(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(PROCESSED_SUFFIX))
        .unwrap_or(false)
}

/// Relocation with fallbacks.
#[derive(Clone)]
pub struct Transfer {
    ops: Arc<dyn FileOps>,
    verify_content: bool,
    cleanup: CleanupRegistry,
}

impl std::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transfer")
            .field("verify_content", &self.verify_content)
            .finish_non_exhaustive()
    }
}

impl Transfer {
    pub fn new(ops: Arc<dyn FileOps>, verify_content: bool, cleanup: CleanupRegistry) -> Self {
        Self {
            ops,
            verify_content,
            cleanup,
        }
    }

    /// Transfer over the real filesystem.
    pub fn standard(verify_content: bool, cleanup: CleanupRegistry) -> Self {
        Self::new(Arc::new(StdFileOps), verify_content, cleanup)
    }

    pub fn cleanup(&self) -> &CleanupRegistry {
        &self.cleanup
    }

    /// Move `source` into `dir` under a stamped, collision-free name.
    pub fn relocate(&self, source: &Path, dir: &Path, kind: Destination) -> Result<TransferReport, TransferError> {
        let destination = unique_destination(self.ops.as_ref(), dir, &destination_name(source, kind))?;
        let result = self.move_to(source, &destination);
        if result.is_err() {
            self.discard_partial(&destination);
        }
        result
    }

    /// Move `source` to exactly `destination`.
    pub fn move_to(&self, source: &Path, destination: &Path) -> Result<TransferReport, TransferError> {
        let mut states = vec![TransferState::Pending, TransferState::RenameAttempted];
        let rename_err = match self.ops.rename(source, destination) {
            Ok(()) => {
                states.push(TransferState::Success);
                debug!(from = %source.display(), to = %destination.display(), "Renamed");
                return Ok(TransferReport {
                    destination: Some(destination.to_path_buf()),
                    fate: SourceFate::Moved,
                    states,
                });
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(TransferError::io("rename", source, err));
            }
            Err(err) => err,
        };
        info!(
            from = %source.display(),
            to = %destination.display(),
            error = %rename_err,
            "Rename failed, falling back to copy"
        );

        states.push(TransferState::CopyAttempted);
        if let Err(err) = self.ops.copy(source, destination) {
            self.discard_partial(destination);
            return Err(TransferError::io("copy", source, err));
        }

        if let Err(reason) = self.verify(source, destination) {
            states.push(TransferState::VerifyFailed);
            self.discard_partial(destination);
            return Err(TransferError::VerifyFailed {
                source_path: source.to_path_buf(),
                destination: destination.to_path_buf(),
                reason,
                states,
            });
        }

        let (fate, tail) = self.dispose(source);
        states.extend(tail);
        Ok(TransferReport {
            destination: Some(destination.to_path_buf()),
            fate,
            states,
        })
    }

    /// Remove `source` without keeping a copy.
    pub fn delete(&self, source: &Path) -> TransferReport {
        let mut states = vec![TransferState::Pending];
        let (fate, tail) = self.dispose(source);
        states.extend(tail);
        TransferReport {
            destination: None,
            fate,
            states,
        }
    }

    fn verify(&self, source: &Path, destination: &Path) -> Result<(), String> {
        let source_len = self.ops.file_size(source).map_err(|e| format!("source size: {}", e))?;
        let dest_len = self.ops.file_size(destination).map_err(|e| format!("copy size: {}", e))?;
        if source_len != dest_len {
            return Err(format!("size {} != {}", dest_len, source_len));
        }
        if self.verify_content {
            let a = self.ops.digest(source).map_err(|e| format!("source digest: {}", e))?;
            let b = self.ops.digest(destination).map_err(|e| format!("copy digest: {}", e))?;
            if a != b {
                return Err("content digest differs".to_string());
            }
        }
        Ok(())
    }

    fn discard_partial(&self, destination: &Path) {
        if !self.ops.exists(destination) {
            return;
        }
        if let Err(err) = self.ops.remove(destination) {
            warn!(path = %destination.display(), error = %err, "Could not remove partial copy");
        }
    }

    /// Delete, else mark processed, else register for cleanup.
    fn dispose(&self, source: &Path) -> (SourceFate, Vec<TransferState>) {
        let mut states = vec![TransferState::DeleteAttempted];
        let delete_err = match self.ops.remove(source) {
            Ok(()) => {
                states.push(TransferState::Success);
                return (SourceFate::Deleted, states);
            }
            Err(err) => err,
        };
        warn!(path = %source.display(), error = %delete_err, "Could not delete source");

        states.push(TransferState::RenameAsProcessedAttempted);
        let marked = processed_path(source);
        match self.ops.rename(source, &marked) {
            Ok(()) => {
                states.push(TransferState::Success);
                info!(path = %marked.display(), "Source marked as processed");
                (SourceFate::MarkedProcessed { path: marked }, states)
            }
            Err(err) => {
                warn!(path = %source.display(), error = %err, "Could not mark source as processed");
                self.cleanup.register(source);
                states.push(TransferState::NeedsManualCleanup);
                (SourceFate::ManualCleanup, states)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Rename always fails as if crossing devices; removal can be refused.
    struct CrossDevice {
        refuse_remove: bool,
        refuse_mark: bool,
    }

    impl FileOps for CrossDevice {
        fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            if is_processed_marker(to) && !self.refuse_mark {
                return fs::rename(from, to);
            }
            Err(io::Error::new(io::ErrorKind::Other, "cross-device link"))
        }
        fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
            fs::copy(from, to)
        }
        fn file_size(&self, path: &Path) -> io::Result<u64> {
            StdFileOps.file_size(path)
        }
        fn digest(&self, path: &Path) -> io::Result<blake3::Hash> {
            StdFileOps.digest(path)
        }
        fn remove(&self, path: &Path) -> io::Result<()> {
            if self.refuse_remove {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only share"));
            }
            fs::remove_file(path)
        }
        fn exists(&self, path: &Path) -> bool {
            path.exists()
        }
    }

    fn source(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("OPTLABEL_1.csv");
        fs::write(&path, "BARCODE\nB1\n").unwrap();
        path
    }

    #[test]
    fn stamped_names_keep_extension() {
        let src = Path::new("/in/GLASSREPORT_20240101.csv");
        assert_eq!(
            stamped_name(src, Destination::Archive, "20240102_030405"),
            "GLASSREPORT_20240101_20240102_030405.csv"
        );
        assert_eq!(
            stamped_name(src, Destination::Error, "20240102_030405"),
            "GLASSREPORT_20240101_ERROR_20240102_030405.csv"
        );
        assert_eq!(stamped_name(Path::new("noext"), Destination::Archive, "x"), "noext_x");
    }

    #[test]
    fn collisions_get_numeric_suffix() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.csv"), "").unwrap();
        fs::write(dir.path().join("a_1.csv"), "").unwrap();
        let dest = unique_destination(&StdFileOps, dir.path(), "a.csv").unwrap();
        assert_eq!(dest, dir.path().join("a_2.csv"));
    }

    #[test]
    fn reserved_names_are_not_handed_out_twice() {
        let dir = TempDir::new().unwrap();
        let first = unique_destination(&StdFileOps, dir.path(), "a.csv").unwrap();
        let second = unique_destination(&StdFileOps, dir.path(), "a.csv").unwrap();
        assert_eq!(first, dir.path().join("a.csv"));
        assert_eq!(second, dir.path().join("a_1.csv"));
        assert!(first.exists() && second.exists());
    }

    #[test]
    fn relocating_onto_a_taken_name_keeps_the_existing_file() {
        let dir = TempDir::new().unwrap();
        let archive = TempDir::new().unwrap();
        let src = source(&dir);
        let stamped = destination_name(&src, Destination::Archive);
        fs::write(archive.path().join(&stamped), "someone else").unwrap();

        let transfer = Transfer::standard(false, CleanupRegistry::new());
        let report = transfer.relocate(&src, archive.path(), Destination::Archive).unwrap();
        let destination = report.destination.unwrap();

        // The stamp may tick between the two calls; either way nothing is overwritten.
        assert_ne!(destination, archive.path().join(&stamped));
        assert_eq!(fs::read_to_string(archive.path().join(&stamped)).unwrap(), "someone else");
        assert_eq!(fs::read(&destination).unwrap(), b"BARCODE\nB1\n");
    }

    #[test]
    fn failed_relocation_releases_the_reserved_name() {
        let dir = TempDir::new().unwrap();
        let archive = TempDir::new().unwrap();
        let transfer = Transfer::standard(false, CleanupRegistry::new());
        let err = transfer
            .relocate(&dir.path().join("gone.csv"), archive.path(), Destination::Archive)
            .unwrap_err();
        assert!(matches!(err, TransferError::Io { op: "rename", .. }));
        assert_eq!(fs::read_dir(archive.path()).unwrap().count(), 0);
    }

    /// Copies succeed but every path hashes differently, as if the copy
    /// were corrupted in flight.
    struct CorruptingCopy;

    impl FileOps for CorruptingCopy {
        fn rename(&self, _from: &Path, _to: &Path) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "cross-device link"))
        }
        fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
            fs::copy(from, to)
        }
        fn file_size(&self, path: &Path) -> io::Result<u64> {
            StdFileOps.file_size(path)
        }
        fn digest(&self, path: &Path) -> io::Result<blake3::Hash> {
            Ok(blake3::hash(path.to_string_lossy().as_bytes()))
        }
        fn remove(&self, path: &Path) -> io::Result<()> {
            fs::remove_file(path)
        }
        fn exists(&self, path: &Path) -> bool {
            path.exists()
        }
    }

    #[test]
    fn digest_mismatch_discards_copy_and_keeps_source() {
        let dir = TempDir::new().unwrap();
        let archive = TempDir::new().unwrap();
        let src = source(&dir);
        let transfer = Transfer::new(Arc::new(CorruptingCopy), true, CleanupRegistry::new());

        let err = transfer
            .relocate(&src, archive.path(), Destination::Archive)
            .unwrap_err();
        match err {
            TransferError::VerifyFailed {
                destination,
                reason,
                states,
                ..
            } => {
                assert_eq!(reason, "content digest differs");
                assert_eq!(states.last(), Some(&TransferState::VerifyFailed));
                assert!(states.contains(&TransferState::CopyAttempted));
                assert!(!destination.exists());
            }
            other => panic!("expected verify failure, got {:?}", other),
        }
        assert_eq!(fs::read(&src).unwrap(), b"BARCODE\nB1\n");
        assert_eq!(fs::read_dir(archive.path()).unwrap().count(), 0);
    }

    #[test]
    fn size_check_alone_passes_without_content_verification() {
        let dir = TempDir::new().unwrap();
        let src = source(&dir);
        let dest = dir.path().join("copy.csv");
        let transfer = Transfer::new(Arc::new(CorruptingCopy), false, CleanupRegistry::new());
        let report = transfer.move_to(&src, &dest).unwrap();
        assert_eq!(report.fate, SourceFate::Deleted);
        assert!(dest.exists());
    }

    #[test]
    fn poisoned_cleanup_registry_keeps_its_paths() {
        let cleanup = CleanupRegistry::new();
        cleanup.register(Path::new("/in/first.csv"));
        let shared = cleanup.clone();
        let _ = std::thread::spawn(move || {
            let _guard = shared.paths.lock().unwrap();
            panic!("writer died holding the lock");
        })
        .join();
        assert!(cleanup.paths.is_poisoned());

        cleanup.register(Path::new("/in/second.csv"));
        assert!(cleanup.contains(Path::new("/in/first.csv")));
        assert_eq!(
            cleanup.paths(),
            vec![PathBuf::from("/in/first.csv"), PathBuf::from("/in/second.csv")]
        );
    }

    #[test]
    fn rename_is_the_fast_path() {
        let dir = TempDir::new().unwrap();
        let archive = TempDir::new().unwrap();
        let src = source(&dir);
        let transfer = Transfer::standard(false, CleanupRegistry::new());
        let report = transfer.relocate(&src, archive.path(), Destination::Archive).unwrap();
        assert_eq!(report.fate, SourceFate::Moved);
        assert!(!src.exists());
        assert!(report.destination.unwrap().exists());
    }

    #[test]
    fn undeletable_source_is_marked_processed() {
        let dir = TempDir::new().unwrap();
        let src = source(&dir);
        let dest = dir.path().join("copy.csv");
        let ops = CrossDevice {
            refuse_remove: true,
            refuse_mark: false,
        };
        let transfer = Transfer::new(Arc::new(ops), true, CleanupRegistry::new());
        let report = transfer.move_to(&src, &dest).unwrap();
        assert_eq!(
            report.fate,
            SourceFate::MarkedProcessed {
                path: processed_path(&src)
            }
        );
        assert!(processed_path(&src).exists());
        assert_eq!(fs::read(&dest).unwrap(), b"BARCODE\nB1\n");
    }

    #[test]
    fn unmarkable_source_is_registered_for_cleanup() {
        let dir = TempDir::new().unwrap();
        let src = source(&dir);
        let cleanup = CleanupRegistry::new();
        let ops = CrossDevice {
            refuse_remove: true,
            refuse_mark: true,
        };
        let transfer = Transfer::new(Arc::new(ops), false, cleanup.clone());
        let report = transfer.move_to(&src, &dir.path().join("copy.csv")).unwrap();
        assert!(report.needs_manual_cleanup());
        assert_eq!(report.states.last(), Some(&TransferState::NeedsManualCleanup));
        assert!(cleanup.contains(&src));
        assert!(src.exists());
    }

    #[test]
    fn missing_source_fails_without_copy() {
        let dir = TempDir::new().unwrap();
        let transfer = Transfer::standard(false, CleanupRegistry::new());
        let err = transfer
            .move_to(&dir.path().join("gone.csv"), &dir.path().join("dest.csv"))
            .unwrap_err();
        assert!(matches!(err, TransferError::Io { op: "rename", .. }));
    }

    #[test]
    fn delete_mode_removes_source() {
        let dir = TempDir::new().unwrap();
        let src = source(&dir);
        let report = Transfer::standard(false, CleanupRegistry::new()).delete(&src);
        assert_eq!(report.fate, SourceFate::Deleted);
        assert_eq!(report.destination, None);
        assert!(!src.exists());
    }

    #[test]
    fn processed_marker_detection() {
        let marked = processed_path(Path::new("/in/a.csv"));
        assert_eq!(marked, PathBuf::from("/in/a.csv.processed"));
        assert!(is_processed_marker(&marked));
        assert!(!is_processed_marker(Path::new("/in/a.csv")));
    }
}
