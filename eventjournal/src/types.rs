//! Core identifiers of the journal.
//!
//! Both types use smart constructors so that a value, once it exists, is valid.

use nutype::nutype;

/// Identifies one event stream; the key of every backend operation.
///
/// `StreamName` values are trimmed, non-empty and at most 255 characters.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct StreamName(String);

/// Number of events committed to a stream.
///
/// Version 0 means the stream does not exist yet. Every successful append
/// advances the version by the size of the appended batch.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Into,
    Serialize,
    Deserialize
))]
pub struct StreamVersion(u64);

impl StreamVersion {
    /// The version of a stream that has never been written to.
    pub fn initial() -> Self {
        Self::new(0)
    }

    /// Returns the version after `count` more events have been committed.
    ///
    /// Saturates at `u64::MAX`, so a version never moves backwards.
    #[must_use]
    pub fn advance(self, count: usize) -> Self {
        let count = u64::try_from(count).unwrap_or(u64::MAX);
        Self::new(self.into_inner().saturating_add(count))
    }

    /// Whether this is the version of a nonexistent stream.
    pub fn is_initial(self) -> bool {
        self.into_inner() == 0
    }
}
