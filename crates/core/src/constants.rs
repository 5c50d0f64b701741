//! Constants used throughout the SSV core crate.
//!
//! Path, filename and timing defaults live here so the binaries and tests agree on them.

use std::time::Duration;

/// Default directory for persisted payload and study records.
pub const DEFAULT_DATA_DIR: &str = "ssv_data";

/// Default root for batch-scoped job working directories.
pub const DEFAULT_WORK_DIR: &str = "ssv_work";

/// Default root for validated-artifact staging areas.
pub const DEFAULT_VALIDATED_DIR: &str = "ssv_validated";

/// Directory name (under the data dir) holding payload records.
pub const PAYLOADS_DIR_NAME: &str = "payloads";

/// Directory name (under the data dir) holding study records.
pub const STUDIES_DIR_NAME: &str = "studies";

/// Filename for payload records inside their sharded directory.
pub const PAYLOAD_JSON_FILENAME: &str = "payload.json";

/// Interval between remote job status queries.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound on how long a single dispatch may poll before it is treated as failed.
pub const DEFAULT_MAX_POLL_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Consecutive status-query failures tolerated before a dispatch is abandoned.
pub const MAX_CONSECUTIVE_POLL_ERRORS: u32 = 3;

/// Default number of background validation workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Default number of deliveries for a validation task.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Attempts made to reserve a fresh callback id before giving up.
pub const CALLBACK_ALLOCATION_ATTEMPTS: usize = 5;

/// Default LSF queue for remote submissions.
pub const DEFAULT_REMOTE_QUEUE: &str = "standard";

/// Default memory request (MB) for remote submissions.
pub const DEFAULT_REMOTE_MEMORY_MB: u32 = 8_000;
