//! In-memory stream backend.
//!
//! Useful for tests and development where durability is not required. The whole
//! journal is one `name -> LoadedStream` map behind a single lock; an append holds
//! the write lock across its read-validate-write, so readers never observe a
//! half-applied batch and racing appenders are checked against one linear history.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::backend::StreamBackend;
use crate::errors::{BackendError, BackendResult, Operation};
use crate::stream::{LoadedStream, UpdatedStream};
use crate::types::{StreamName, StreamVersion};

/// Thread-safe in-memory stream backend.
///
/// Clones share the same storage.
#[derive(Debug)]
pub struct InMemoryStreamBackend<E> {
    streams: Arc<RwLock<HashMap<StreamName, LoadedStream<E>>>>,
}

impl<E> InMemoryStreamBackend<E> {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self {
            streams: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<E> Clone for InMemoryStreamBackend<E> {
    fn clone(&self) -> Self {
        Self {
            streams: Arc::clone(&self.streams),
        }
    }
}

impl<E> Default for InMemoryStreamBackend<E> {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned(operation: Operation) -> BackendError {
    BackendError::StoreFailure {
        operation,
        detail: "in-memory stream map lock poisoned".to_string(),
    }
}

#[async_trait]
impl<E> StreamBackend for InMemoryStreamBackend<E>
where
    E: Clone + Send + Sync + 'static,
{
    type Event = E;

    async fn load(&self, name: &StreamName) -> BackendResult<LoadedStream<E>> {
        let streams = self
            .streams
            .read()
            .map_err(|_| poisoned(Operation::Load))?;

        streams
            .get(name)
            .cloned()
            .ok_or_else(|| BackendError::StreamNotFound(name.clone()))
    }

    async fn append(&self, update: UpdatedStream<E>) -> BackendResult<LoadedStream<E>> {
        let (name, expected, _observed, batch) = update.into_parts();

        let mut streams = self
            .streams
            .write()
            .map_err(|_| poisoned(Operation::Append))?;

        let actual = streams
            .get(&name)
            .map_or_else(StreamVersion::initial, LoadedStream::version);

        if actual != expected {
            debug!(
                stream = %name,
                %expected,
                %actual,
                "[memory.append] rejecting stale write"
            );
            return Err(BackendError::VersionConflict {
                stream: name,
                expected,
                actual,
            });
        }

        // History comes from the map; the caller's snapshot may hold other
        // events at the same version.
        let committed = match streams.remove(&name) {
            Some(current) => {
                let (name, history) = current.into_parts();
                LoadedStream::new(name, history.concat(batch))
            }
            None => LoadedStream::new(name, batch),
        };
        let _ = streams.insert(committed.name().clone(), committed.clone());

        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{NewEvents, Stream};

    fn name(raw: &str) -> StreamName {
        StreamName::try_new(raw).expect("valid stream name")
    }

    fn batch(events: &[&'static str]) -> NewEvents<&'static str> {
        NewEvents::try_from(events.to_vec()).expect("non-empty batch")
    }

    #[tokio::test]
    async fn load_of_unknown_stream_is_not_found() {
        let backend: InMemoryStreamBackend<&str> = InMemoryStreamBackend::new();
        let result = backend.load(&name("missing")).await;
        assert_eq!(result, Err(BackendError::StreamNotFound(name("missing"))));
    }

    #[tokio::test]
    async fn first_append_creates_the_stream() {
        let backend = InMemoryStreamBackend::new();
        let loaded = backend
            .append(Stream::empty(name("X")).update(batch(&["A"])))
            .await
            .expect("append to succeed");

        assert_eq!(loaded.version(), StreamVersion::new(1));
        assert_eq!(backend.load(&name("X")).await, Ok(loaded));
    }

    #[tokio::test]
    async fn clone_shares_storage() {
        let first = InMemoryStreamBackend::new();
        let second = first.clone();
        assert!(Arc::ptr_eq(&first.streams, &second.streams));

        let _ = first
            .append(Stream::empty(name("shared")).update(batch(&["A"])))
            .await
            .expect("append to succeed");
        assert!(second.load(&name("shared")).await.is_ok());
    }

    #[tokio::test]
    async fn append_to_missing_stream_with_nonzero_expectation_conflicts() {
        let backend: InMemoryStreamBackend<&str> = InMemoryStreamBackend::new();
        let loaded = LoadedStream::new(name("ghost"), batch(&["A"]));
        let result = backend.append(Stream::from(loaded).update(batch(&["B"]))).await;

        assert_eq!(
            result,
            Err(BackendError::VersionConflict {
                stream: name("ghost"),
                expected: StreamVersion::new(1),
                actual: StreamVersion::initial(),
            })
        );
        assert!(backend.load(&name("ghost")).await.is_err());
    }

    #[tokio::test]
    async fn second_creation_of_same_stream_conflicts() {
        let backend = InMemoryStreamBackend::new();
        let _ = backend
            .append(Stream::empty(name("X")).update(batch(&["A"])))
            .await
            .expect("first creation to succeed");

        let result = backend
            .append(Stream::empty(name("X")).update(batch(&["B"])))
            .await;
        assert!(matches!(
            result,
            Err(BackendError::VersionConflict { actual, .. }) if actual == StreamVersion::new(1)
        ));
    }

    #[tokio::test]
    async fn poisoned_lock_surfaces_as_store_failure() {
        let backend: InMemoryStreamBackend<&str> = InMemoryStreamBackend::new();
        let streams = Arc::clone(&backend.streams);
        let _ = std::thread::spawn(move || {
            let _guard = streams.write().unwrap();
            panic!("poison the lock");
        })
        .join();

        let result = backend.load(&name("X")).await;
        assert!(matches!(
            result,
            Err(BackendError::StoreFailure {
                operation: Operation::Load,
                ..
            })
        ));
    }
}
