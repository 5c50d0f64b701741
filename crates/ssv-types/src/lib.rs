//! Validated primitive types shared across the SSV crates.
//!
//! Values of these types can only be constructed through their checking constructors, so code
//! that receives one may assume the invariant holds.

/// Minimum number of characters a study identifier must exceed.
pub const STUDY_ID_MIN_EXCLUSIVE_LEN: usize = 3;

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,

    /// The input is not a valid study identifier
    #[error("study id '{0}' is invalid")]
    InvalidStudyId(String),
}

/// A string type that guarantees non-empty content.
///
/// This type wraps a `String` and ensures it contains at least one non-whitespace character.
/// The input is automatically trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// The input is trimmed of leading and trailing whitespace. If the trimmed
    /// result is empty, an error is returned.
    ///
    /// # Errors
    ///
    /// Returns `Err(TextError::Empty)` if the input is empty or contains only whitespace.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// Caller-supplied study identifier.
///
/// A study id is ASCII alphanumeric only and strictly longer than
/// [`STUDY_ID_MIN_EXCLUSIVE_LEN`] characters. Unlike [`NonEmptyText`] the input is not trimmed:
/// surrounding whitespace makes the id invalid rather than silently changing it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StudyId(String);

impl StudyId {
    /// Validates and wraps a study identifier.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::InvalidStudyId`] if `input` is too short or contains anything other
    /// than `A-Z`, `a-z` or `0-9`.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, TextError> {
        let input = input.as_ref();
        if Self::is_valid(input) {
            return Ok(Self(input.to_owned()));
        }
        Err(TextError::InvalidStudyId(input.to_owned()))
    }

    /// Returns true if `input` would be accepted by [`StudyId::parse`].
    pub fn is_valid(input: &str) -> bool {
        input.len() > STUDY_ID_MIN_EXCLUSIVE_LEN && input.bytes().all(|b| b.is_ascii_alphanumeric())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StudyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for StudyId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for StudyId {
    type Err = TextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StudyId::parse(s)
    }
}

impl serde::Serialize for StudyId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for StudyId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        StudyId::parse(&s).map_err(serde::de::Error::custom)
    }
}
