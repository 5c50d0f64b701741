//! SSV File Storage
//!
//! This crate manages the on-disk areas that belong to a single payload:
//!
//! - the **working directory** handed to the external validation job (manifest, pipeline
//!   configuration, one result file per study), and
//! - the **validated-artifact area** where the pipeline stages files that passed validation.
//!
//! Both areas use the same layout, sharded by callback id:
//!
//! ```text
//! <root>/
//! └── 55/
//!     └── 0e/
//!         └── 550e8400e29b41d4a716446655440000/
//!             ├── manifest.json
//!             ├── pipeline.json
//!             └── results/
//!                 ├── study01.json
//!                 └── study02.json
//! ```
//!
//! Distinct payloads never share a directory, so concurrent dispatches cannot collide.
//!
//! ## Example Usage
//!
//! ```no_run
//! use ssv_files::WorkspaceService;
//! use ssv_callback_id::CallbackId;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let workspace = WorkspaceService::new(Path::new("work"))?;
//! let callback_id = CallbackId::generate();
//! let dir = workspace.prepare(&callback_id)?;
//! # let _ = dir;
//! # Ok(())
//! # }
//! ```

mod constants;
mod files;

pub use constants::{MANIFEST_FILE_NAME, PIPELINE_CONFIG_FILE_NAME, RESULTS_DIR_NAME};
pub use files::{ResultBlob, WorkspaceService};
pub use ssv_callback_id::CallbackId;

/// Errors that can occur during file operations
#[derive(Debug, thiserror::Error)]
pub enum FilesError {
    /// Root directory does not exist or is not a directory
    #[error("Invalid root directory: {0}")]
    InvalidRootDirectory(String),

    /// Path validation failed (potential directory traversal or unsafe path)
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// JSON encoding of a job input failed
    #[error("failed to serialise {name}: {source}")]
    Serialization {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for file operations.
pub type FilesResult<T> = Result<T, FilesError>;
