//! Batch-scoped directory service implementation
//!
//! [`WorkspaceService`] owns one root directory and hands out a private, sharded subdirectory per
//! callback id. The same type backs both the job working area and the validated-artifact area;
//! the two simply use different roots.
//!
//! # Idempotency
//!
//! Validation tasks may be redelivered, so every operation here tolerates being repeated:
//! preparing an existing directory is a no-op, JSON inputs are replaced atomically
//! (write-to-temp then rename) and removing an absent directory succeeds.
//!
//! # Security Model
//!
//! - The root is canonicalised at construction time
//! - Batch directories are derived from a canonical [`CallbackId`], never from caller text
//! - Entry names written into a batch directory must be plain file names

use crate::{FilesError, FilesResult, RESULTS_DIR_NAME};
use serde::Serialize;
use ssv_callback_id::CallbackId;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// A raw result file read back from a batch's results directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultBlob {
    /// File name within the results directory (for diagnostics only)
    pub name: String,

    /// Unparsed file contents
    pub contents: Vec<u8>,
}

/// Service for managing batch-scoped directories under a single root.
#[derive(Debug, Clone)]
pub struct WorkspaceService {
    root_directory: PathBuf,
}

impl WorkspaceService {
    /// Creates a new `WorkspaceService` rooted at `root_directory`.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::InvalidRootDirectory` if the root does not exist, is not a
    /// directory, or cannot be canonicalised.
    pub fn new(root_directory: &Path) -> FilesResult<Self> {
        if !root_directory.exists() {
            return Err(FilesError::InvalidRootDirectory(format!(
                "Directory does not exist: {}",
                root_directory.display()
            )));
        }

        if !root_directory.is_dir() {
            return Err(FilesError::InvalidRootDirectory(format!(
                "Path is not a directory: {}",
                root_directory.display()
            )));
        }

        let root_directory = root_directory.canonicalize().map_err(|e| {
            FilesError::InvalidRootDirectory(format!(
                "Cannot canonicalize path {}: {}",
                root_directory.display(),
                e
            ))
        })?;

        Ok(Self { root_directory })
    }

    /// Returns the canonicalised root directory.
    #[must_use]
    pub fn root_directory(&self) -> &Path {
        &self.root_directory
    }

    /// Returns the directory belonging to `callback_id`. The directory may not exist yet.
    #[must_use]
    pub fn batch_dir(&self, callback_id: &CallbackId) -> PathBuf {
        callback_id.sharded_dir(&self.root_directory)
    }

    /// Returns the results directory belonging to `callback_id`.
    #[must_use]
    pub fn results_dir(&self, callback_id: &CallbackId) -> PathBuf {
        self.batch_dir(callback_id).join(RESULTS_DIR_NAME)
    }

    /// Creates the batch directory and its results subdirectory.
    ///
    /// # Returns
    ///
    /// The absolute path of the batch directory.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::Io` if directory creation fails.
    pub fn prepare(&self, callback_id: &CallbackId) -> FilesResult<PathBuf> {
        let dir = self.batch_dir(callback_id);
        fs::create_dir_all(dir.join(RESULTS_DIR_NAME)).map_err(|e| {
            FilesError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to create batch directory {}: {}", dir.display(), e),
            ))
        })?;
        Ok(dir)
    }

    /// Serialises `value` as pretty JSON into `<batch_dir>/<name>`, replacing any previous file.
    ///
    /// # Returns
    ///
    /// The absolute path of the written file.
    ///
    /// # Errors
    ///
    /// Returns `FilesError` if:
    /// - `name` is not a plain file name ([`FilesError::InvalidPath`])
    /// - serialisation fails ([`FilesError::Serialization`])
    /// - the write or rename fails (I/O)
    pub fn write_json<T: Serialize>(
        &self,
        callback_id: &CallbackId,
        name: &str,
        value: &T,
    ) -> FilesResult<PathBuf> {
        validate_entry_name(name)?;

        let bytes = serde_json::to_vec_pretty(value).map_err(|source| FilesError::Serialization {
            name: name.to_owned(),
            source,
        })?;

        let dir = self.prepare(callback_id)?;
        let target = dir.join(name);
        let staging = dir.join(format!(".{}.tmp", name));

        fs::write(&staging, &bytes)?;
        fs::rename(&staging, &target)?;
        Ok(target)
    }

    /// Reads every `*.json` file in the batch's results directory, sorted by file name.
    ///
    /// A missing results directory yields an empty list: the job produced nothing.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::Io` if the directory exists but cannot be listed or a file cannot be
    /// read.
    pub fn read_results(&self, callback_id: &CallbackId) -> FilesResult<Vec<ResultBlob>> {
        let dir = self.results_dir(callback_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(FilesError::Io(e)),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut blobs = Vec::with_capacity(paths.len());
        for path in paths {
            let contents = fs::read(&path).map_err(|e| {
                FilesError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to read result file {}: {}", path.display(), e),
                ))
            })?;
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_owned();
            blobs.push(ResultBlob { name, contents });
        }
        Ok(blobs)
    }

    /// Removes the whole batch directory. Removing an absent directory succeeds.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::Io` if removal fails for any reason other than absence.
    pub fn remove(&self, callback_id: &CallbackId) -> FilesResult<()> {
        let dir = self.batch_dir(callback_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::debug!("removed batch directory {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FilesError::Io(e)),
        }
    }

    /// Removes entries in the batch directory whose file stem equals `stem`.
    ///
    /// Used to clear the artifacts of a single study without touching its siblings.
    ///
    /// # Returns
    ///
    /// The number of entries removed.
    ///
    /// # Errors
    ///
    /// Returns `FilesError` if `stem` is not a plain name or removal fails.
    pub fn remove_matching(&self, callback_id: &CallbackId, stem: &str) -> FilesResult<usize> {
        validate_entry_name(stem)?;

        let dir = self.batch_dir(callback_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(FilesError::Io(e)),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            let matches = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| s == stem || s.split('.').next() == Some(stem))
                .unwrap_or(false);
            if !matches {
                continue;
            }
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
            removed += 1;
        }
        Ok(removed)
    }
}

fn validate_entry_name(name: &str) -> FilesResult<()> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0');
    if plain {
        Ok(())
    } else {
        Err(FilesError::InvalidPath(format!(
            "'{}' is not a plain file name",
            name
        )))
    }
}
