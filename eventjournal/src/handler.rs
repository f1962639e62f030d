//! Command handling on top of the load-decide-append cycle.
//!
//! A [`CommandHandler`] bundles a backend with three pure functions:
//!
//! - `stream_name_for`: which stream a command targets.
//! - `execute`: the decision, from the command and the stream's history.
//! - `produce_outcome`: what the caller gets back from the appended events.
//!
//! Handlers hold no mutable state. Clone one per task, or share it behind an
//! `Arc`; both work because the backend is shared (`Arc`, or a backend whose
//! clones share storage).

use tracing::{info, instrument};

use crate::backend::StreamBackend;
use crate::errors::JournalError;
use crate::stream::NewEvents;
use crate::transaction::load_decide_append;
use crate::types::StreamName;

/// Turns commands into appended events and an outcome.
#[derive(Clone)]
pub struct CommandHandler<B, N, X, P> {
    backend: B,
    stream_name_for: N,
    execute: X,
    produce_outcome: P,
}

impl<B, N, X, P> CommandHandler<B, N, X, P> {
    /// Assembles a handler from a backend and its three functions.
    pub const fn new(backend: B, stream_name_for: N, execute: X, produce_outcome: P) -> Self {
        Self {
            backend,
            stream_name_for,
            execute,
            produce_outcome,
        }
    }

    /// The backend this handler appends to.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Handles one command.
    ///
    /// Every failure of the underlying cycle is returned unchanged, and nothing
    /// is retried. On success the appended batch is mapped through
    /// `produce_outcome`.
    #[instrument(name = "journal.handle", skip_all)]
    pub async fn handle<C, F, O>(&self, command: C) -> Result<O, JournalError<F>>
    where
        B: StreamBackend,
        B::Event: Clone,
        N: Fn(&C) -> StreamName,
        X: Fn(&C, &[B::Event]) -> Result<NewEvents<B::Event>, F>,
        P: Fn(NewEvents<B::Event>) -> O,
    {
        let name = (self.stream_name_for)(&command);
        let committed = load_decide_append(&self.backend, name, |stream| {
            (self.execute)(&command, stream.events())
        })
        .await?;

        info!(
            stream = %committed.stream.name(),
            version = %committed.stream.version(),
            appended = committed.appended.len(),
            "[journal.handle] command handled"
        );
        Ok((self.produce_outcome)(committed.appended))
    }
}

impl<B, N, X, P> std::fmt::Debug for CommandHandler<B, N, X, P>
where
    B: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}
