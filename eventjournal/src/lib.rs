//! `eventjournal` - append-only event journal with optimistic concurrency
//!
//! Every stream is an ordered, append-only list of events identified by a
//! [`StreamName`]. Writes are guarded by the version observed at load time: an
//! append succeeds only if nobody else appended in between, otherwise it fails
//! with a version conflict and nothing is written.
//!
//! Commands run through one cycle, [`load_decide_append`]:
//!
//! 1. load the stream's history (a missing stream counts as empty),
//! 2. let a pure decision function choose the events to append,
//! 3. append them atomically against the observed version.
//!
//! [`CommandHandler`] packages that cycle with a stream-name resolver and an
//! outcome projection. [`fold`] and friends rebuild state from history, and
//! [`retry_on_conflict`] is an opt-in wrapper for callers that want to retry
//! after a conflict.
//!
//! Storage sits behind the [`StreamBackend`] trait. This crate ships
//! [`InMemoryStreamBackend`]; `eventjournal-postgres` provides a durable one.
//!
//! ```
//! use eventjournal::{
//!     deciding_with_state, CommandHandler, InMemoryStreamBackend, NewEvents, StreamName,
//! };
//!
//! #[derive(Debug, Clone, PartialEq)]
//! enum Event {
//!     Opened,
//! }
//!
//! # futures::executor::block_on(async {
//! let handler = CommandHandler::new(
//!     InMemoryStreamBackend::new(),
//!     |id: &String| StreamName::try_new(format!("door-{id}")).expect("valid name"),
//!     deciding_with_state(
//!         || false,
//!         |_, _: &Event| true,
//!         |_: &String, open: bool| {
//!             if open {
//!                 Err("already open")
//!             } else {
//!                 Ok(NewEvents::one(Event::Opened))
//!             }
//!         },
//!     ),
//!     |appended: NewEvents<Event>| appended.len(),
//! );
//!
//! assert_eq!(handler.handle("front".to_string()).await, Ok(1));
//! assert!(handler.handle("front".to_string()).await.is_err());
//! # });
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod codec;
mod errors;
mod fold;
mod handler;
mod memory;
mod retry;
mod stream;
mod transaction;
mod types;

pub use backend::StreamBackend;
pub use codec::{decode, encode, EventTypeName, PersistableEvent, SerializedEvent};
pub use errors::{BackendError, BackendResult, JournalError, Operation};
pub use fold::{deciding_with_optional_state, deciding_with_state, fold, fold_optional};
pub use handler::CommandHandler;
pub use memory::InMemoryStreamBackend;
pub use retry::{retry_on_conflict, RetryConfig};
pub use stream::{Committed, EmptyBatch, EmptyStream, LoadedStream, NewEvents, Stream, UpdatedStream};
pub use transaction::load_decide_append;
pub use types::{StreamName, StreamVersion};
