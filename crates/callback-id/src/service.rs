//! Internal implementation of the callback identifier.

use crate::{CallbackIdError, CallbackIdResult};
use std::path::{Path, PathBuf};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Canonical callback identifier (32 lowercase hex characters, no hyphens).
///
/// Once constructed, the contained value is guaranteed to be canonical, so it is always safe to
/// embed in a filesystem path or a remote job name.
///
/// # Construction
/// - [`CallbackId::generate`] draws a fresh random candidate. It does **not** check for prior
///   use; reservation is the store's job.
/// - [`CallbackId::parse`] validates an externally supplied identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(String);

impl CallbackId {
    /// Draws a new random candidate identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Validates and parses a callback id that must already be in canonical form.
    ///
    /// Hyphenated or uppercase forms are rejected rather than normalised, so the same payload
    /// can never be addressed by two different strings.
    ///
    /// # Errors
    ///
    /// Returns [`CallbackIdError::InvalidInput`] if `input` is not in canonical form.
    pub fn parse(input: &str) -> CallbackIdResult<Self> {
        if Self::is_canonical(input) {
            return Ok(Self(input.to_owned()));
        }
        Err(CallbackIdError::InvalidInput(format!(
            "callback id must be 32 lowercase hex characters without hyphens, got: '{}'",
            input
        )))
    }

    /// Returns true if `input` is in canonical form.
    pub fn is_canonical(input: &str) -> bool {
        input.len() == 32
            && input
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `parent_dir/<s1>/<s2>/<id>/` where `s1`/`s2` are derived from this id.
    ///
    /// - `s1` is the first two hex characters
    /// - `s2` is the next two hex characters
    /// - The full id forms the leaf directory
    pub fn sharded_dir(&self, parent_dir: &Path) -> PathBuf {
        let s1 = &self.0[0..2];
        let s2 = &self.0[2..4];
        parent_dir.join(s1).join(s2).join(&self.0)
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CallbackId {
    type Err = CallbackIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CallbackId::parse(s)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for CallbackId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for CallbackId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        CallbackId::parse(&s).map_err(serde::de::Error::custom)
    }
}
