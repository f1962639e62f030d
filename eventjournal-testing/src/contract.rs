//! Behavioural contract every [`StreamBackend`] must satisfy.
//!
//! Each `test_*` function runs one scenario against a fresh backend from the
//! supplied factory and reports the first deviation as a
//! [`ContractTestFailure`]. [`stream_backend_contract_tests!`] expands to one
//! `#[tokio::test]` per scenario, so a backend crate gets the whole suite from a
//! single macro call.

use std::fmt;
use std::sync::Arc;

use eventjournal::{
    load_decide_append, BackendError, EventTypeName, JournalError, LoadedStream, NewEvents,
    PersistableEvent, Stream, StreamBackend, StreamName, StreamVersion,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a contract scenario failed.
#[derive(Debug)]
pub struct ContractTestFailure {
    scenario: &'static str,
    detail: String,
}

impl ContractTestFailure {
    fn new(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self {
            scenario,
            detail: detail.into(),
        }
    }

    fn backend_error(scenario: &'static str, operation: &'static str, error: BackendError) -> Self {
        Self::new(
            scenario,
            format!("{operation} operation returned unexpected error: {error}"),
        )
    }

    fn assertion(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self::new(scenario, detail)
    }
}

impl fmt::Display for ContractTestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.scenario, self.detail)
    }
}

impl std::error::Error for ContractTestFailure {}

/// Outcome of one contract scenario.
pub type ContractTestResult = Result<(), ContractTestFailure>;

/// Event type the contract scenarios append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractEvent {
    /// A numbered marker, so histories can be compared by value.
    Marked(u32),
    /// Carries a label; used to tell competing writers apart.
    Labelled(String),
}

impl PersistableEvent for ContractEvent {
    fn event_type(&self) -> EventTypeName {
        let name = match self {
            Self::Marked(_) => "ContractMarked",
            Self::Labelled(_) => "ContractLabelled",
        };
        EventTypeName::try_new(name).expect("valid event type name")
    }

    fn all_event_types() -> Vec<EventTypeName> {
        ["ContractMarked", "ContractLabelled"]
            .into_iter()
            .map(|name| EventTypeName::try_new(name).expect("valid event type name"))
            .collect()
    }
}

fn contract_stream_name(
    scenario: &'static str,
    label: &str,
) -> Result<StreamName, ContractTestFailure> {
    // Unique per run so backends with shared storage can run scenarios in parallel.
    let raw = format!("contract::{scenario}::{label}::{}", Uuid::now_v7());

    StreamName::try_new(raw.clone()).map_err(|error| {
        ContractTestFailure::assertion(
            scenario,
            format!("unable to construct stream name `{raw}`: {error}"),
        )
    })
}

fn marks(range: std::ops::RangeInclusive<u32>) -> NewEvents<ContractEvent> {
    let events: Vec<_> = range.map(ContractEvent::Marked).collect();
    NewEvents::try_from(events).expect("contract batches are non-empty")
}

async fn create<B>(
    scenario: &'static str,
    backend: &B,
    name: &StreamName,
    events: NewEvents<ContractEvent>,
) -> Result<LoadedStream<ContractEvent>, ContractTestFailure>
where
    B: StreamBackend<Event = ContractEvent>,
{
    backend
        .append(Stream::empty(name.clone()).update(events))
        .await
        .map_err(|error| ContractTestFailure::backend_error(scenario, "append", error))
}

async fn load<B>(
    scenario: &'static str,
    backend: &B,
    name: &StreamName,
) -> Result<LoadedStream<ContractEvent>, ContractTestFailure>
where
    B: StreamBackend<Event = ContractEvent>,
{
    backend
        .load(name)
        .await
        .map_err(|error| ContractTestFailure::backend_error(scenario, "load", error))
}

fn expect_history(
    scenario: &'static str,
    loaded: &LoadedStream<ContractEvent>,
    expected: &[ContractEvent],
) -> ContractTestResult {
    if loaded.events() != expected {
        return Err(ContractTestFailure::assertion(
            scenario,
            format!(
                "expected history {expected:?} but observed {:?}",
                loaded.events()
            ),
        ));
    }

    let expected_version = StreamVersion::initial().advance(expected.len());
    if loaded.version() != expected_version {
        return Err(ContractTestFailure::assertion(
            scenario,
            format!(
                "expected version {expected_version} but observed {}",
                loaded.version()
            ),
        ));
    }

    Ok(())
}

fn expect_conflict<T: fmt::Debug>(
    scenario: &'static str,
    result: Result<T, BackendError>,
    expected: StreamVersion,
    actual: StreamVersion,
) -> ContractTestResult {
    match result {
        Err(BackendError::VersionConflict {
            expected: reported_expected,
            actual: reported_actual,
            ..
        }) if reported_expected == expected && reported_actual == actual => Ok(()),
        Err(error) => Err(ContractTestFailure::backend_error(scenario, "append", error)),
        Ok(value) => Err(ContractTestFailure::assertion(
            scenario,
            format!("expected version conflict but append succeeded with {value:?}"),
        )),
    }
}

/// Loading a stream that was never written fails with `StreamNotFound`.
pub async fn test_missing_stream_load<F, B>(make_backend: F) -> ContractTestResult
where
    F: Fn() -> B,
    B: StreamBackend<Event = ContractEvent>,
{
    const SCENARIO: &str = "missing_stream_load";

    let backend = make_backend();
    let name = contract_stream_name(SCENARIO, "missing")?;

    match backend.load(&name).await {
        Err(BackendError::StreamNotFound(missing)) if missing == name => Ok(()),
        Err(error) => Err(ContractTestFailure::backend_error(SCENARIO, "load", error)),
        Ok(loaded) => Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected missing stream but loaded {:?}", loaded.events()),
        )),
    }
}

/// A batch appended to a fresh stream loads back in order with version = batch size.
pub async fn test_fresh_append_round_trip<F, B>(make_backend: F) -> ContractTestResult
where
    F: Fn() -> B,
    B: StreamBackend<Event = ContractEvent>,
{
    const SCENARIO: &str = "fresh_append_round_trip";

    let backend = make_backend();
    let name = contract_stream_name(SCENARIO, "fresh")?;
    let batch = marks(1..=3);

    let returned = create(SCENARIO, &backend, &name, batch.clone()).await?;
    expect_history(SCENARIO, &returned, batch.as_slice())?;

    let loaded = load(SCENARIO, &backend, &name).await?;
    expect_history(SCENARIO, &loaded, batch.as_slice())
}

/// Appends concatenate and versions add up.
pub async fn test_sequential_appends_concatenate<F, B>(make_backend: F) -> ContractTestResult
where
    F: Fn() -> B,
    B: StreamBackend<Event = ContractEvent>,
{
    const SCENARIO: &str = "sequential_appends_concatenate";

    let backend = make_backend();
    let name = contract_stream_name(SCENARIO, "growing")?;

    let first = create(SCENARIO, &backend, &name, marks(1..=2)).await?;
    let second = backend
        .append(Stream::from(first).update(marks(3..=5)))
        .await
        .map_err(|error| ContractTestFailure::backend_error(SCENARIO, "append", error))?;
    expect_history(SCENARIO, &second, marks(1..=5).as_slice())?;

    let loaded = load(SCENARIO, &backend, &name).await?;
    expect_history(SCENARIO, &loaded, marks(1..=5).as_slice())
}

/// A write computed from an outdated version is rejected and changes nothing.
pub async fn test_stale_append_conflicts<F, B>(make_backend: F) -> ContractTestResult
where
    F: Fn() -> B,
    B: StreamBackend<Event = ContractEvent>,
{
    const SCENARIO: &str = "stale_append_conflicts";

    let backend = make_backend();
    let name = contract_stream_name(SCENARIO, "stale")?;

    let at_one = create(SCENARIO, &backend, &name, marks(1..=1)).await?;
    let _ = backend
        .append(Stream::from(at_one.clone()).update(marks(2..=3)))
        .await
        .map_err(|error| ContractTestFailure::backend_error(SCENARIO, "append", error))?;

    let stale = backend
        .append(Stream::from(at_one).update(marks(9..=9)))
        .await;
    expect_conflict(SCENARIO, stale, StreamVersion::new(1), StreamVersion::new(3))?;

    let loaded = load(SCENARIO, &backend, &name).await?;
    expect_history(SCENARIO, &loaded, marks(1..=3).as_slice())
}

/// A missing stream is only created by an append that expects version 0.
pub async fn test_creation_requires_version_zero<F, B>(make_backend: F) -> ContractTestResult
where
    F: Fn() -> B,
    B: StreamBackend<Event = ContractEvent>,
{
    const SCENARIO: &str = "creation_requires_version_zero";

    let backend = make_backend();
    let name = contract_stream_name(SCENARIO, "ghost")?;

    let imagined = LoadedStream::new(name.clone(), marks(1..=2));
    let result = backend
        .append(Stream::from(imagined).update(marks(3..=3)))
        .await;
    expect_conflict(SCENARIO, result, StreamVersion::new(2), StreamVersion::initial())?;

    if backend.load(&name).await.is_ok() {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "rejected append created the stream",
        ));
    }

    let _ = create(SCENARIO, &backend, &name, marks(1..=1)).await?;
    let again = backend
        .append(Stream::empty(name.clone()).update(marks(2..=2)))
        .await;
    expect_conflict(SCENARIO, again, StreamVersion::initial(), StreamVersion::new(1))
}

/// `append` returns the stored history even when the caller's snapshot of it
/// differs at the same version.
pub async fn test_append_reports_stored_history<F, B>(make_backend: F) -> ContractTestResult
where
    F: Fn() -> B,
    B: StreamBackend<Event = ContractEvent>,
{
    const SCENARIO: &str = "append_reports_stored_history";

    let backend = make_backend();
    let name = contract_stream_name(SCENARIO, "snapshot")?;
    let _ = create(SCENARIO, &backend, &name, marks(1..=1)).await?;

    let mistaken = LoadedStream::new(
        name.clone(),
        NewEvents::one(ContractEvent::Labelled("mistaken".to_string())),
    );
    let appended = backend
        .append(Stream::from(mistaken).update(marks(2..=2)))
        .await
        .map_err(|error| ContractTestFailure::backend_error(SCENARIO, "append", error))?;
    expect_history(SCENARIO, &appended, marks(1..=2).as_slice())?;

    let loaded = load(SCENARIO, &backend, &name).await?;
    if appended != loaded {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("append returned {appended:?} but load returned {loaded:?}"),
        ));
    }
    Ok(())
}

/// Of two appenders that loaded the same version, exactly one wins.
pub async fn test_concurrent_appenders_one_wins<F, B>(make_backend: F) -> ContractTestResult
where
    F: Fn() -> B,
    B: StreamBackend<Event = ContractEvent> + 'static,
{
    const SCENARIO: &str = "concurrent_appenders_one_wins";

    let backend = Arc::new(make_backend());
    let name = contract_stream_name(SCENARIO, "contended")?;
    let seeded = create(SCENARIO, &*backend, &name, marks(1..=1)).await?;

    let spawn_writer = |label: &'static str| {
        let backend = Arc::clone(&backend);
        let update = Stream::from(seeded.clone())
            .update(NewEvents::one(ContractEvent::Labelled(label.to_string())));
        tokio::spawn(async move { backend.append(update).await })
    };
    let left = spawn_writer("left");
    let right = spawn_writer("right");

    let mut outcomes = Vec::with_capacity(2);
    for handle in [left, right] {
        let outcome = handle.await.map_err(|error| {
            ContractTestFailure::assertion(SCENARIO, format!("writer task failed: {error}"))
        })?;
        outcomes.push(outcome);
    }

    let mut winners = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(stream) => winners.push(stream),
            Err(BackendError::VersionConflict { .. }) => {}
            Err(error) => {
                return Err(ContractTestFailure::backend_error(SCENARIO, "append", error));
            }
        }
    }

    let [winner] = winners.as_slice() else {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected exactly one winner, observed {}", winners.len()),
        ));
    };

    let loaded = load(SCENARIO, &*backend, &name).await?;
    expect_history(SCENARIO, &loaded, winner.events())
}

/// Streams never see each other's events.
pub async fn test_stream_isolation<F, B>(make_backend: F) -> ContractTestResult
where
    F: Fn() -> B,
    B: StreamBackend<Event = ContractEvent>,
{
    const SCENARIO: &str = "stream_isolation";

    let backend = make_backend();
    let left = contract_stream_name(SCENARIO, "left")?;
    let right = contract_stream_name(SCENARIO, "right")?;

    let _ = create(SCENARIO, &backend, &left, marks(1..=2)).await?;
    let _ = create(SCENARIO, &backend, &right, marks(7..=7)).await?;

    expect_history(SCENARIO, &load(SCENARIO, &backend, &left).await?, marks(1..=2).as_slice())?;
    expect_history(SCENARIO, &load(SCENARIO, &backend, &right).await?, marks(7..=7).as_slice())
}

/// The full cycle leaves the backend untouched when the decision fails.
pub async fn test_rejected_decision_writes_nothing<F, B>(make_backend: F) -> ContractTestResult
where
    F: Fn() -> B,
    B: StreamBackend<Event = ContractEvent>,
{
    const SCENARIO: &str = "rejected_decision_writes_nothing";

    let backend = make_backend();
    let name = contract_stream_name(SCENARIO, "guarded")?;

    let committed = load_decide_append(&backend, name.clone(), |stream| {
        if stream.version().is_initial() {
            Ok(marks(1..=2))
        } else {
            Err("already started")
        }
    })
    .await
    .map_err(|error| ContractTestFailure::assertion(SCENARIO, format!("first cycle failed: {error}")))?;
    expect_history(SCENARIO, &committed.stream, marks(1..=2).as_slice())?;

    let rejected = load_decide_append(&backend, name.clone(), |stream| {
        if stream.version().is_initial() {
            Ok(marks(1..=2))
        } else {
            Err("already started")
        }
    })
    .await;
    if !matches!(rejected, Err(JournalError::ExecutionFailure("already started"))) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected execution failure, observed {rejected:?}"),
        ));
    }

    let loaded = load(SCENARIO, &backend, &name).await?;
    expect_history(SCENARIO, &loaded, marks(1..=2).as_slice())
}

/// Generates one `#[tokio::test]` per contract scenario.
///
/// `attributes` is applied to every generated test, e.g. to `#[ignore]` a
/// suite that needs external infrastructure. The generated module glob-imports
/// its parent, so `make_backend` may name anything in scope at the call site.
///
/// ```no_run
/// use eventjournal_testing::contract::{stream_backend_contract_tests, ContractEvent};
///
/// stream_backend_contract_tests! {
///     suite = in_memory,
///     make_backend = eventjournal::InMemoryStreamBackend::<ContractEvent>::new,
/// }
///
/// fn main() {}
/// ```
#[macro_export]
macro_rules! stream_backend_contract_tests {
    (@test $name:ident, $scenario:ident, $make_backend:expr, [$($attr:meta),*]) => {
        #[tokio::test(flavor = "multi_thread")]
        $(#[$attr])*
        async fn $name() {
            $scenario($make_backend)
                .await
                .expect("stream backend contract failed");
        }
    };
    (
        suite = $suite:ident,
        make_backend = $make_backend:expr
        $(, attributes = [$($attr:meta),* $(,)?])?
        $(,)?
    ) => {
        #[allow(non_snake_case)]
        mod $suite {
            #[allow(unused_imports)]
            use super::*;
            use $crate::contract::{
                test_append_reports_stored_history, test_concurrent_appenders_one_wins,
                test_creation_requires_version_zero,
                test_fresh_append_round_trip, test_missing_stream_load,
                test_rejected_decision_writes_nothing, test_sequential_appends_concatenate,
                test_stale_append_conflicts, test_stream_isolation,
            };

            $crate::stream_backend_contract_tests!(@test
                missing_stream_load_contract, test_missing_stream_load,
                $make_backend, [$($($attr),*)?]);
            $crate::stream_backend_contract_tests!(@test
                fresh_append_round_trip_contract, test_fresh_append_round_trip,
                $make_backend, [$($($attr),*)?]);
            $crate::stream_backend_contract_tests!(@test
                sequential_appends_concatenate_contract, test_sequential_appends_concatenate,
                $make_backend, [$($($attr),*)?]);
            $crate::stream_backend_contract_tests!(@test
                stale_append_conflicts_contract, test_stale_append_conflicts,
                $make_backend, [$($($attr),*)?]);
            $crate::stream_backend_contract_tests!(@test
                creation_requires_version_zero_contract, test_creation_requires_version_zero,
                $make_backend, [$($($attr),*)?]);
            $crate::stream_backend_contract_tests!(@test
                concurrent_appenders_one_wins_contract, test_concurrent_appenders_one_wins,
                $make_backend, [$($($attr),*)?]);
            $crate::stream_backend_contract_tests!(@test
                stream_isolation_contract, test_stream_isolation,
                $make_backend, [$($($attr),*)?]);
            $crate::stream_backend_contract_tests!(@test
                rejected_decision_writes_nothing_contract, test_rejected_decision_writes_nothing,
                $make_backend, [$($($attr),*)?]);
            $crate::stream_backend_contract_tests!(@test
                append_reports_stored_history_contract, test_append_reports_stored_history,
                $make_backend, [$($($attr),*)?]);
        }
    };
}

pub use stream_backend_contract_tests;
