//! Fault injection for stream backends.
//!
//! [`FaultyBackend`] wraps any [`StreamBackend`] and, with configurable
//! probabilities, fails operations before they reach the wrapped backend.
//! Injected failures never touch the wrapped storage, so tests can check that
//! callers cope with store failures and spurious version conflicts.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use eventjournal::{
    BackendError, BackendResult, LoadedStream, Operation, StreamBackend, StreamName, UpdatedStream,
};
use nutype::nutype;
use rand::rngs::StdRng;
use rand::{random, Rng, SeedableRng};
use tracing::debug;

/// Probability of injecting a fault, in `[0.0, 1.0]`.
///
/// ```
/// use eventjournal_testing::Probability;
///
/// assert!(Probability::try_new(0.5).is_ok());
/// assert!(Probability::try_new(1.5).is_err());
/// assert!(Probability::try_new(-0.1).is_err());
/// ```
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Display, Into)
)]
pub struct Probability(f32);

impl Probability {
    fn clamped(value: f32) -> Self {
        // NaN is not in range either; treat it as "never".
        let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        Self::try_new(value).unwrap_or_else(|_| unreachable!("clamped into range"))
    }
}

/// Which faults a [`FaultyBackend`] injects and how often.
#[derive(Debug, Clone)]
pub struct FaultConfig {
    seed: Option<u64>,
    failure_probability: Probability,
    version_conflict_probability: Probability,
}

impl FaultConfig {
    /// No faults, with a fixed seed so runs are repeatable.
    pub fn deterministic() -> Self {
        Self {
            seed: Some(0),
            ..Self::default()
        }
    }

    /// Uses `seed` for the random source.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Chance of a `StoreFailure` on `load` and `append`; clamped to `[0, 1]`.
    #[must_use]
    pub fn with_failure_probability(mut self, probability: f32) -> Self {
        self.failure_probability = Probability::clamped(probability);
        self
    }

    /// Chance of a `VersionConflict` on `append`; clamped to `[0, 1]`.
    #[must_use]
    pub fn with_version_conflict_probability(mut self, probability: f32) -> Self {
        self.version_conflict_probability = Probability::clamped(probability);
        self
    }
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            seed: None,
            failure_probability: Probability::clamped(0.0),
            version_conflict_probability: Probability::clamped(0.0),
        }
    }
}

/// Adds [`with_faults`](FaultyBackendExt::with_faults) to every backend.
pub trait FaultyBackendExt: Sized {
    /// Wraps `self` in a [`FaultyBackend`].
    fn with_faults(self, config: FaultConfig) -> FaultyBackend<Self>;
}

impl<B: StreamBackend> FaultyBackendExt for B {
    fn with_faults(self, config: FaultConfig) -> FaultyBackend<Self> {
        FaultyBackend::new(self, config)
    }
}

/// A backend wrapper that fails operations at random.
#[derive(Debug)]
pub struct FaultyBackend<B> {
    backend: B,
    config: FaultConfig,
    rng: Mutex<StdRng>,
}

impl<B> FaultyBackend<B> {
    /// Wraps `backend`.
    pub fn new(backend: B, config: FaultConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed.unwrap_or_else(random));
        Self {
            backend,
            config,
            rng: Mutex::new(rng),
        }
    }

    /// The wrapped backend, for inspecting state behind injected failures.
    pub const fn inner(&self) -> &B {
        &self.backend
    }

    fn should_inject(&self, probability: Probability) -> bool {
        let probability: f32 = probability.into();
        if probability <= 0.0 {
            return false;
        }
        if probability >= 1.0 {
            return true;
        }

        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.random_bool(f64::from(probability))
    }
}

fn injected(operation: Operation) -> BackendError {
    BackendError::StoreFailure {
        operation,
        detail: "injected failure".to_string(),
    }
}

#[async_trait]
impl<B> StreamBackend for FaultyBackend<B>
where
    B: StreamBackend,
{
    type Event = B::Event;

    async fn load(&self, name: &StreamName) -> BackendResult<LoadedStream<Self::Event>> {
        if self.should_inject(self.config.failure_probability) {
            debug!(stream = %name, "[faulty.load] injecting store failure");
            return Err(injected(Operation::Load));
        }

        self.backend.load(name).await
    }

    async fn append(
        &self,
        update: UpdatedStream<Self::Event>,
    ) -> BackendResult<LoadedStream<Self::Event>> {
        if self.should_inject(self.config.failure_probability) {
            debug!(stream = %update.name(), "[faulty.append] injecting store failure");
            return Err(injected(Operation::Append));
        }

        if self.should_inject(self.config.version_conflict_probability) {
            debug!(stream = %update.name(), "[faulty.append] injecting version conflict");
            let expected = update.expected_version();
            let (stream, ..) = update.into_parts();
            return Err(BackendError::VersionConflict {
                stream,
                expected,
                actual: expected.advance(1),
            });
        }

        self.backend.append(update).await
    }
}
