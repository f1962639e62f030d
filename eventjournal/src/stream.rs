//! Immutable descriptions of a stream before, during and after an update.
//!
//! A stream moves through three shapes:
//!
//! - [`EmptyStream`]: never written to, version 0, no events.
//! - [`LoadedStream`]: committed history, always at least one event.
//! - [`UpdatedStream`]: a loaded (or empty) stream plus a pending batch that is
//!   not durable until a backend commits it.
//!
//! [`Stream`] is the closed union of the three. None of these values is ever
//! mutated; every transition consumes its input and returns a new value.

use crate::types::{StreamName, StreamVersion};

/// A non-empty batch of events.
///
/// Decision functions return `NewEvents`, so a decision that produces nothing
/// cannot reach a backend's `append`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvents<E>(Vec<E>);

/// Returned when building [`NewEvents`] from an empty vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("an event batch must contain at least one event")]
pub struct EmptyBatch;

impl<E> NewEvents<E> {
    /// A batch holding exactly one event.
    pub fn one(event: E) -> Self {
        Self(vec![event])
    }

    /// Number of events in the batch; never zero.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`; present for API symmetry with collections.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The first event of the batch.
    pub fn first(&self) -> &E {
        &self.0[0]
    }

    /// The last event of the batch.
    pub fn last(&self) -> &E {
        &self.0[self.0.len() - 1]
    }

    /// Iterates over the events in order.
    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.0.iter()
    }

    /// Borrows the events as a slice.
    pub fn as_slice(&self) -> &[E] {
        &self.0
    }

    /// Appends another event to the batch.
    #[must_use]
    pub fn with(mut self, event: E) -> Self {
        self.0.push(event);
        self
    }

    /// Appends every event of `other` to this batch.
    #[must_use]
    pub fn concat(mut self, other: Self) -> Self {
        self.0.extend(other.0);
        self
    }

    /// Releases the underlying vector.
    pub fn into_vec(self) -> Vec<E> {
        self.0
    }
}

impl<E> TryFrom<Vec<E>> for NewEvents<E> {
    type Error = EmptyBatch;

    fn try_from(events: Vec<E>) -> Result<Self, Self::Error> {
        if events.is_empty() {
            Err(EmptyBatch)
        } else {
            Ok(Self(events))
        }
    }
}

impl<E> From<NewEvents<E>> for Vec<E> {
    fn from(events: NewEvents<E>) -> Self {
        events.0
    }
}

impl<E> IntoIterator for NewEvents<E> {
    type Item = E;
    type IntoIter = std::vec::IntoIter<E>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a, E> IntoIterator for &'a NewEvents<E> {
    type Item = &'a E;
    type IntoIter = std::slice::Iter<'a, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A stream that has not been created yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmptyStream {
    name: StreamName,
}

impl EmptyStream {
    /// Describes the not-yet-existing stream `name`.
    pub const fn new(name: StreamName) -> Self {
        Self { name }
    }

    /// The stream's name.
    pub const fn name(&self) -> &StreamName {
        &self.name
    }
}

/// Committed history of a stream.
///
/// The version always equals the number of committed events, and there is
/// always at least one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedStream<E> {
    name: StreamName,
    version: StreamVersion,
    events: NewEvents<E>,
}

impl<E> LoadedStream<E> {
    /// Builds the loaded view of `name` from its full committed history.
    pub fn new(name: StreamName, events: NewEvents<E>) -> Self {
        let version = StreamVersion::initial().advance(events.len());
        Self {
            name,
            version,
            events,
        }
    }

    /// The stream's name.
    pub const fn name(&self) -> &StreamName {
        &self.name
    }

    /// Number of committed events.
    pub const fn version(&self) -> StreamVersion {
        self.version
    }

    /// The committed events, oldest first.
    pub fn events(&self) -> &[E] {
        self.events.as_slice()
    }

    /// Releases the committed events.
    pub fn into_events(self) -> NewEvents<E> {
        self.events
    }

    /// Releases the name and committed events.
    pub fn into_parts(self) -> (StreamName, NewEvents<E>) {
        (self.name, self.events)
    }
}

/// A pending write: the stream as it was loaded plus a batch to append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatedStream<E> {
    name: StreamName,
    version: StreamVersion,
    events: Vec<E>,
    events_to_append: NewEvents<E>,
}

impl<E> UpdatedStream<E> {
    /// The stream's name.
    pub const fn name(&self) -> &StreamName {
        &self.name
    }

    /// The version observed when the stream was loaded.
    ///
    /// A backend commits the batch only if its current version still equals
    /// this value.
    pub const fn expected_version(&self) -> StreamVersion {
        self.version
    }

    /// The history observed when the stream was loaded.
    pub fn events(&self) -> &[E] {
        &self.events
    }

    /// The batch waiting to be appended.
    pub const fn events_to_append(&self) -> &NewEvents<E> {
        &self.events_to_append
    }

    /// The version the stream will have once the batch commits.
    pub fn version_after_commit(&self) -> StreamVersion {
        self.version.advance(self.events_to_append.len())
    }

    /// Splits into name, expected version, observed history and pending batch.
    pub fn into_parts(self) -> (StreamName, StreamVersion, Vec<E>, NewEvents<E>) {
        (self.name, self.version, self.events, self.events_to_append)
    }

    /// The loaded stream that results from committing the pending batch on top
    /// of the observed history.
    pub fn commit(self) -> LoadedStream<E> {
        let mut history = self.events;
        history.extend(self.events_to_append);
        let events = NewEvents(history);
        LoadedStream::new(self.name, events)
    }
}

/// Any of the three shapes a stream can take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stream<E> {
    /// Never written to.
    Empty(EmptyStream),
    /// Committed history.
    Loaded(LoadedStream<E>),
    /// Committed history plus a pending batch.
    Updated(UpdatedStream<E>),
}

impl<E> Stream<E> {
    /// An empty stream called `name`.
    pub const fn empty(name: StreamName) -> Self {
        Self::Empty(EmptyStream::new(name))
    }

    /// The stream's name.
    pub const fn name(&self) -> &StreamName {
        match self {
            Self::Empty(stream) => stream.name(),
            Self::Loaded(stream) => stream.name(),
            Self::Updated(stream) => stream.name(),
        }
    }

    /// The committed version; for an updated stream, the version before the
    /// pending batch.
    pub fn version(&self) -> StreamVersion {
        match self {
            Self::Empty(_) => StreamVersion::initial(),
            Self::Loaded(stream) => stream.version(),
            Self::Updated(stream) => stream.expected_version(),
        }
    }

    /// The committed events; for an updated stream, those observed at load.
    pub fn events(&self) -> &[E] {
        match self {
            Self::Empty(_) => &[],
            Self::Loaded(stream) => stream.events(),
            Self::Updated(stream) => stream.events(),
        }
    }

    /// Turns the stream into a pending write of `new_events`.
    ///
    /// An already updated stream keeps its expected version and grows its
    /// pending batch.
    pub fn update(self, new_events: NewEvents<E>) -> UpdatedStream<E> {
        match self {
            Self::Empty(stream) => UpdatedStream {
                name: stream.name,
                version: StreamVersion::initial(),
                events: Vec::new(),
                events_to_append: new_events,
            },
            Self::Loaded(stream) => UpdatedStream {
                name: stream.name,
                version: stream.version,
                events: stream.events.into_vec(),
                events_to_append: new_events,
            },
            Self::Updated(stream) => UpdatedStream {
                events_to_append: stream.events_to_append.concat(new_events),
                ..stream
            },
        }
    }
}

impl<E> From<EmptyStream> for Stream<E> {
    fn from(stream: EmptyStream) -> Self {
        Self::Empty(stream)
    }
}

impl<E> From<LoadedStream<E>> for Stream<E> {
    fn from(stream: LoadedStream<E>) -> Self {
        Self::Loaded(stream)
    }
}

impl<E> From<UpdatedStream<E>> for Stream<E> {
    fn from(stream: UpdatedStream<E>) -> Self {
        Self::Updated(stream)
    }
}

/// Result of a successful load-decide-append cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed<E> {
    /// The stream as it is after the append.
    pub stream: LoadedStream<E>,
    /// The batch that was appended.
    pub appended: NewEvents<E>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(raw: &str) -> StreamName {
        StreamName::try_new(raw).expect("valid stream name")
    }

    fn batch(events: &[&'static str]) -> NewEvents<&'static str> {
        NewEvents::try_from(events.to_vec()).expect("non-empty batch")
    }

    #[test]
    fn new_events_rejects_empty_vectors() {
        let result = NewEvents::<u8>::try_from(Vec::new());
        assert_eq!(result, Err(EmptyBatch));
    }

    #[test]
    fn new_events_keeps_order() {
        let events = NewEvents::one(1).with(2).concat(NewEvents::one(3));
        assert_eq!(events.len(), 3);
        assert_eq!(*events.first(), 1);
        assert_eq!(*events.last(), 3);
        assert_eq!(events.into_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn empty_stream_exposes_version_zero_and_no_events() {
        let stream: Stream<&str> = Stream::empty(name("X"));
        assert_eq!(stream.name().as_ref(), "X");
        assert!(stream.version().is_initial());
        assert!(stream.events().is_empty());
    }

    #[test]
    fn loaded_stream_version_counts_events() {
        let loaded = LoadedStream::new(name("X"), batch(&["A", "B"]));
        assert_eq!(loaded.version(), StreamVersion::new(2));
        assert_eq!(loaded.events(), &["A", "B"]);
    }

    #[test]
    fn updating_empty_stream_expects_version_zero() {
        let updated = Stream::empty(name("X")).update(batch(&["A"]));
        assert!(updated.expected_version().is_initial());
        assert!(updated.events().is_empty());
        assert_eq!(updated.version_after_commit(), StreamVersion::new(1));
    }

    #[test]
    fn updating_loaded_stream_keeps_observed_history() {
        let loaded = LoadedStream::new(name("X"), batch(&["A"]));
        let updated = Stream::from(loaded).update(batch(&["B", "C"]));
        assert_eq!(updated.expected_version(), StreamVersion::new(1));
        assert_eq!(updated.events(), &["A"]);
        assert_eq!(updated.events_to_append().as_slice(), &["B", "C"]);
    }

    #[test]
    fn updating_updated_stream_grows_pending_batch_only() {
        let loaded = LoadedStream::new(name("X"), batch(&["A"]));
        let once = Stream::from(loaded).update(batch(&["B"]));
        let twice = Stream::from(once).update(batch(&["C"]));
        assert_eq!(twice.expected_version(), StreamVersion::new(1));
        assert_eq!(twice.events_to_append().as_slice(), &["B", "C"]);
    }

    #[test]
    fn commit_appends_pending_batch_to_history() {
        let loaded = LoadedStream::new(name("X"), batch(&["A"]));
        let committed = Stream::from(loaded).update(batch(&["B", "C"])).commit();
        assert_eq!(committed.version(), StreamVersion::new(3));
        assert_eq!(committed.events(), &["A", "B", "C"]);
    }
}
