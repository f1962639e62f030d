//! The load-decide-append cycle.
//!
//! Loading and appending are I/O against a [`StreamBackend`]; deciding is a pure
//! function supplied by the caller. Keeping them apart lets the same decision
//! run against the in-memory backend in tests and a durable backend in
//! production, and leaves retry policy with the caller.

use tracing::{debug, instrument, warn};

use crate::backend::StreamBackend;
use crate::errors::{BackendError, JournalError};
use crate::stream::{Committed, NewEvents, Stream};
use crate::types::StreamName;

/// Loads `name`, lets `decide` choose what to append, and appends it atomically.
///
/// 1. The stream is loaded; a missing stream is treated as empty.
/// 2. `decide` sees the current stream (name, version, events). A domain
///    failure ends the cycle as [`JournalError::ExecutionFailure`] and nothing
///    is written.
/// 3. Otherwise the batch is appended against the version observed in step 1.
///
/// A [`JournalError::VersionConflict`] from the append is returned as is. It
/// is never retried here, because fresher history may change the decision.
#[instrument(name = "journal.load_decide_append", skip(backend, decide), fields(stream = %name))]
pub async fn load_decide_append<B, F, D>(
    backend: &B,
    name: StreamName,
    decide: D,
) -> Result<Committed<B::Event>, JournalError<F>>
where
    B: StreamBackend + ?Sized,
    B::Event: Clone,
    D: FnOnce(&Stream<B::Event>) -> Result<NewEvents<B::Event>, F>,
{
    let loaded = backend.load(&name).await;
    let current = match loaded {
        Ok(loaded) => Stream::Loaded(loaded),
        Err(BackendError::StreamNotFound(_)) => Stream::empty(name),
        Err(error) => return Err(error.into()),
    };
    debug!(
        version = %current.version(),
        "[journal.load_decide_append] loaded stream"
    );

    let new_events = match decide(&current) {
        Ok(new_events) => new_events,
        Err(failure) => {
            warn!("[journal.load_decide_append] decision rejected, nothing appended");
            return Err(JournalError::ExecutionFailure(failure));
        }
    };

    let update = current.update(new_events.clone());
    let stream = backend.append(update).await.map_err(|error| {
        if error.is_version_conflict() {
            warn!(error = %error, "[journal.load_decide_append] optimistic concurrency check failed");
        }
        JournalError::from(error)
    })?;

    debug!(
        version = %stream.version(),
        appended = new_events.len(),
        "[journal.load_decide_append] appended events"
    );

    Ok(Committed {
        stream,
        appended: new_events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStreamBackend;
    use crate::types::StreamVersion;
    use tracing_test::traced_test;

    fn name(raw: &str) -> StreamName {
        StreamName::try_new(raw).expect("valid stream name")
    }

    fn append_all(
        events: &'static [&'static str],
    ) -> impl FnOnce(&Stream<&'static str>) -> Result<NewEvents<&'static str>, String> {
        move |_| Ok(NewEvents::try_from(events.to_vec()).expect("non-empty batch"))
    }

    #[tokio::test]
    async fn missing_stream_is_decided_as_empty() {
        let backend = InMemoryStreamBackend::new();
        let committed = load_decide_append(&backend, name("X"), |stream: &Stream<&'static str>| {
            assert!(matches!(stream, Stream::Empty(_)));
            assert!(stream.version().is_initial());
            Ok::<_, String>(NewEvents::one("A"))
        })
        .await
        .expect("cycle to succeed");

        assert_eq!(committed.stream.version(), StreamVersion::new(1));
        assert_eq!(committed.appended.as_slice(), &["A"]);
    }

    #[tokio::test]
    async fn decision_sees_committed_history() {
        let backend = InMemoryStreamBackend::new();
        let _ = load_decide_append(&backend, name("X"), append_all(&["A", "B"]))
            .await
            .expect("seed to succeed");

        let committed = load_decide_append(&backend, name("X"), |stream: &Stream<&'static str>| {
            assert_eq!(stream.events(), &["A", "B"]);
            assert_eq!(stream.version(), StreamVersion::new(2));
            Ok::<_, String>(NewEvents::one("C"))
        })
        .await
        .expect("cycle to succeed");

        assert_eq!(committed.stream.events(), &["A", "B", "C"]);
        assert_eq!(committed.appended.as_slice(), &["C"]);
    }

    #[tokio::test]
    async fn domain_failure_writes_nothing() {
        let backend: InMemoryStreamBackend<&str> = InMemoryStreamBackend::new();
        let _ = load_decide_append(&backend, name("X"), append_all(&["A"]))
            .await
            .expect("seed to succeed");
        let before = backend.load(&name("X")).await;

        let result = load_decide_append(&backend, name("X"), |_: &Stream<&'static str>| {
            Err::<NewEvents<&'static str>, _>("rejected")
        })
        .await;

        assert_eq!(result, Err(JournalError::ExecutionFailure("rejected")));
        assert_eq!(backend.load(&name("X")).await, before);
    }

    #[tokio::test]
    async fn domain_failure_on_missing_stream_does_not_create_it() {
        let backend: InMemoryStreamBackend<&str> = InMemoryStreamBackend::new();
        let result = load_decide_append(&backend, name("X"), |_: &Stream<&'static str>| {
            Err::<NewEvents<&'static str>, _>("rejected")
        })
        .await;

        assert!(result.is_err());
        assert_eq!(
            backend.load(&name("X")).await,
            Err(BackendError::StreamNotFound(name("X")))
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn interleaved_append_surfaces_version_conflict() {
        let backend = InMemoryStreamBackend::new();
        let _ = load_decide_append(&backend, name("X"), append_all(&["A"]))
            .await
            .expect("seed to succeed");

        // A competing writer commits between this cycle's load and append.
        let competitor = backend.clone();
        let result = load_decide_append(&backend, name("X"), |stream: &Stream<&'static str>| {
            let sneaky = Stream::Loaded(match stream {
                Stream::Loaded(loaded) => loaded.clone(),
                Stream::Empty(_) | Stream::Updated(_) => unreachable!("seeded stream"),
            })
            .update(NewEvents::one("B"));
            let _ = futures::executor::block_on(competitor.append(sneaky))
                .expect("competitor to win");
            Ok::<_, String>(NewEvents::one("C"))
        })
        .await;

        assert_eq!(
            result,
            Err(JournalError::VersionConflict {
                stream: name("X"),
                expected: StreamVersion::new(1),
                actual: StreamVersion::new(2),
            })
        );
        assert!(logs_contain("optimistic concurrency check failed"));
        let stored = backend.load(&name("X")).await.expect("stream exists");
        assert_eq!(stored.events(), &["A", "B"]);
    }
}
