//! State reconstruction by replaying events.
//!
//! Two shapes of fold are supported:
//!
//! - [`fold`] starts from an explicit initial state; use it when an empty
//!   default state is always well defined.
//! - [`fold_optional`] starts from `None`; use it when "no events yet" is a
//!   meaningful state of its own.
//!
//! Decision functions that want state instead of raw history are built with
//! [`deciding_with_state`] and [`deciding_with_optional_state`]. Both return a
//! plain `(command, history) -> Result<NewEvents, F>` function, so the command
//! handler never needs to know whether a fold happened.

use crate::stream::NewEvents;

/// Left fold of `events` into a state seeded by `initial`.
///
/// Empty history returns `initial` unchanged.
pub fn fold<'a, S, E, A>(initial: S, events: impl IntoIterator<Item = &'a E>, apply: A) -> S
where
    E: 'a,
    A: Fn(S, &E) -> S,
{
    events.into_iter().fold(initial, apply)
}

/// Left fold of `events` into an optional state.
///
/// Empty history returns `None`; otherwise `apply` receives `None` for the
/// first event and the running state for every later one.
pub fn fold_optional<'a, S, E, A>(events: impl IntoIterator<Item = &'a E>, apply: A) -> Option<S>
where
    E: 'a,
    A: Fn(Option<S>, &E) -> S,
{
    events
        .into_iter()
        .fold(None, |state, event| Some(apply(state, event)))
}

/// Pre-composes `decide` with a fold from `initial`.
///
/// The returned function replays the history into state, then hands the state
/// to `decide`. It is `Clone` whenever its parts are, so handlers built from it
/// stay cloneable.
pub fn deciding_with_state<C, S, E, F, I, A, D>(
    initial: I,
    apply: A,
    decide: D,
) -> impl Fn(&C, &[E]) -> Result<NewEvents<E>, F> + Clone
where
    I: Fn() -> S + Clone,
    A: Fn(S, &E) -> S + Clone,
    D: Fn(&C, S) -> Result<NewEvents<E>, F> + Clone,
{
    move |command, history| decide(command, fold(initial(), history, &apply))
}

/// Pre-composes `decide` with an optional-state fold.
pub fn deciding_with_optional_state<C, S, E, F, A, D>(
    apply: A,
    decide: D,
) -> impl Fn(&C, &[E]) -> Result<NewEvents<E>, F> + Clone
where
    A: Fn(Option<S>, &E) -> S + Clone,
    D: Fn(&C, Option<S>) -> Result<NewEvents<E>, F> + Clone,
{
    move |command, history| decide(command, fold_optional(history, &apply))
}
