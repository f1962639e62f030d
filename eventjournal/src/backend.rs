//! Storage abstraction behind the journal.
//!
//! This module defines the [`StreamBackend`] trait that serves as the port
//! interface for storage adapters. The in-memory adapter is
//! [`InMemoryStreamBackend`](crate::InMemoryStreamBackend); the PostgreSQL
//! adapter is the `eventjournal-postgres` crate.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::BackendResult;
use crate::stream::{LoadedStream, UpdatedStream};
use crate::types::StreamName;

/// The two operations every journal storage adapter provides.
///
/// Implementations must give identical error semantics so that the same
/// decision logic behaves the same against any of them:
///
/// - `load` of a stream that was never appended to fails with
///   [`BackendError::StreamNotFound`](crate::BackendError::StreamNotFound).
/// - `append` commits the whole pending batch or nothing at all.
/// - `append` fails with
///   [`BackendError::VersionConflict`](crate::BackendError::VersionConflict) when
///   the stream's current version differs from
///   [`UpdatedStream::expected_version`]. Appends to one stream are linearised,
///   so of two appenders with the same expected version at most one succeeds.
/// - A stream is created by its first append, which must expect version 0. An
///   append expecting a higher version on a missing stream is a conflict with
///   actual version 0.
#[async_trait]
pub trait StreamBackend: Send + Sync {
    /// The event type this backend stores.
    type Event: Send + Sync;

    /// Reads the committed history of `name`.
    ///
    /// Never creates the stream.
    async fn load(&self, name: &StreamName) -> BackendResult<LoadedStream<Self::Event>>;

    /// Atomically appends the pending batch of `update`.
    ///
    /// Returns the stream as it is after the append.
    async fn append(
        &self,
        update: UpdatedStream<Self::Event>,
    ) -> BackendResult<LoadedStream<Self::Event>>;
}

#[async_trait]
impl<B> StreamBackend for Arc<B>
where
    B: StreamBackend + ?Sized,
{
    type Event = B::Event;

    async fn load(&self, name: &StreamName) -> BackendResult<LoadedStream<Self::Event>> {
        (**self).load(name).await
    }

    async fn append(
        &self,
        update: UpdatedStream<Self::Event>,
    ) -> BackendResult<LoadedStream<Self::Event>> {
        (**self).append(update).await
    }
}
