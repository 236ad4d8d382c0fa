//! Core domain types for the guestbook.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies. Everything here can be used from any layer of the
//! application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fallback author shown when a post carries no author field.
pub const ANONYMOUS_AUTHOR: &str = "Anonymous";

// ============================================================================
// Guestbook Name
// ============================================================================

/// The name of a guestbook, used as the grouping key for greetings.
///
/// Guaranteed non-empty after trimming.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GuestbookName(String);

#[derive(Debug, Error)]
#[error("guestbook name must not be empty")]
pub struct EmptyNameError;

impl GuestbookName {
    pub fn new(value: impl Into<String>) -> Result<Self, EmptyNameError> {
        let value = value.into();
        if value.trim().is_empty() {
            Err(EmptyNameError)
        } else {
            Ok(Self(value))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl TryFrom<String> for GuestbookName {
    type Error = EmptyNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<GuestbookName> for String {
    fn from(value: GuestbookName) -> Self {
        value.0
    }
}

impl std::fmt::Display for GuestbookName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Sentiment
// ============================================================================

/// Binary sentiment classification of a greeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
}

impl Sentiment {
    /// Map a classifier label to a sentiment.
    ///
    /// The sample sentiment model emits the literal label `"positive"` for
    /// positive posts; every other label counts as negative. This collapse is
    /// a property of that model's label set, not a general contract, which is
    /// why the mapping lives in exactly one place.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        if label == "positive" {
            Self::Positive
        } else {
            Self::Negative
        }
    }

    #[must_use]
    pub const fn is_positive(self) -> bool {
        matches!(self, Self::Positive)
    }
}

// ============================================================================
// Greeting
// ============================================================================

/// A single guestbook post, enriched with the classifier's verdicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Greeting {
    pub guestbook: GuestbookName,
    pub author: String,
    pub content: String,
    pub posted_at: DateTime<Utc>,
    pub sentiment: Sentiment,
    pub language: String,
}

#[derive(Debug, Error)]
#[error("greeting content must not be empty")]
pub struct EmptyContentError;

impl Greeting {
    /// Create a greeting stamped with the current time.
    ///
    /// A missing author falls back to [`ANONYMOUS_AUTHOR`]. Empty content is
    /// rejected here so nothing downstream has to re-validate it.
    pub fn new(
        guestbook: GuestbookName,
        author: Option<String>,
        content: impl Into<String>,
        sentiment: Sentiment,
        language: impl Into<String>,
    ) -> Result<Self, EmptyContentError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(EmptyContentError);
        }
        let author = author
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| ANONYMOUS_AUTHOR.to_string());
        Ok(Self {
            guestbook,
            author,
            content,
            posted_at: Utc::now(),
            sentiment,
            language: language.into(),
        })
    }
}
