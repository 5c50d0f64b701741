//! Error catalog.
//!
//! Maps the small integer codes attached to studies to human-readable text. Studies store only
//! the code; text is resolved at read time so wording can be corrected without rewriting
//! historical records.
//!
//! The catalog is seeded once at construction and read-only afterwards.

use std::collections::BTreeMap;

/// Codes and their default wording.
///
/// Codes `1`–`9` and `11` are reported by the external validator. Code `10` is synthetic: it is
/// only ever produced by this system when the validator's output is missing or unobtainable.
pub mod codes {
    pub const FILE_NOT_FOUND: u16 = 1;
    pub const CHECKSUM_MISMATCH: u16 = 2;
    pub const VALIDATION_FAILED: u16 = 3;
    pub const MISSING_MANDATORY_FIELD: u16 = 4;
    pub const INVALID_ASSEMBLY: u16 = 5;
    pub const INVALID_EXTENSION: u16 = 6;
    pub const INVALID_HEADER: u16 = 7;
    pub const INCONSISTENT_SHAPE: u16 = 8;
    pub const TOO_FEW_ROWS: u16 = 9;
    pub const INTERNAL_PROCESSING_ERROR: u16 = 10;
    pub const RAW_FILE_NOT_FOUND: u16 = 11;
}

const SEED: &[(u16, &str)] = &[
    (
        codes::FILE_NOT_FOUND,
        "The summary statistics file cannot be found",
    ),
    (
        codes::CHECKSUM_MISMATCH,
        "The checksum of the summary statistics file does not match the checksum provided",
    ),
    (
        codes::VALIDATION_FAILED,
        "The summary statistics file failed validation",
    ),
    (
        codes::MISSING_MANDATORY_FIELD,
        "A mandatory field is missing from the submission entry",
    ),
    (
        codes::INVALID_ASSEMBLY,
        "The genome assembly is not one of the accepted values",
    ),
    (
        codes::INVALID_EXTENSION,
        "The file extension is not recognised",
    ),
    (
        codes::INVALID_HEADER,
        "The file header is missing mandatory columns or is malformed",
    ),
    (
        codes::INCONSISTENT_SHAPE,
        "Rows in the file do not have a consistent number of columns",
    ),
    (
        codes::TOO_FEW_ROWS,
        "The file has fewer rows than the minimum required",
    ),
    (
        codes::INTERNAL_PROCESSING_ERROR,
        "An internal error occurred while processing the file; please contact the helpdesk",
    ),
    (
        codes::RAW_FILE_NOT_FOUND,
        "The raw (unharmonised) summary statistics file cannot be found",
    ),
];

/// Read-only registry of error codes.
#[derive(Debug, Clone)]
pub struct ErrorCatalog {
    entries: BTreeMap<u16, String>,
}

impl ErrorCatalog {
    /// Builds the catalog from the built-in seed table.
    pub fn seeded() -> Self {
        Self {
            entries: SEED
                .iter()
                .map(|(code, text)| (*code, (*text).to_owned()))
                .collect(),
        }
    }

    /// Builds the seeded catalog, then replaces or adds the given entries.
    ///
    /// This is the only way to change catalog text; it happens once, before the catalog is
    /// shared.
    pub fn with_overrides(overrides: impl IntoIterator<Item = (u16, String)>) -> Self {
        let mut catalog = Self::seeded();
        catalog.entries.extend(overrides);
        catalog
    }

    /// Resolves `code` to its text. Unknown codes resolve to `None`.
    pub fn text(&self, code: u16) -> Option<&str> {
        self.entries.get(&code).map(String::as_str)
    }

    /// Iterates over all entries in code order.
    pub fn entries(&self) -> impl Iterator<Item = (u16, &str)> {
        self.entries.iter().map(|(code, text)| (*code, text.as_str()))
    }
}

impl Default for ErrorCatalog {
    fn default() -> Self {
        Self::seeded()
    }
}
