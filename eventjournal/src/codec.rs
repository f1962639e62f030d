//! Event encoding for durable backends.
//!
//! Events are stored as a type discriminator plus a JSON payload. The
//! discriminator is checked against [`PersistableEvent::all_event_types`] before
//! the payload is parsed, so rows written by an unrelated event type are
//! reported as such instead of as a confusing JSON error.

use nutype::nutype;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::{BackendError, BackendResult};
use crate::types::StreamName;

/// Stable name of an event variant as it is written to storage.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct EventTypeName(String);

/// An event type that a durable backend can store.
///
/// `event_type` must return one of the names listed by `all_event_types`, and
/// the name must stay stable across releases because it is persisted.
pub trait PersistableEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The discriminator written next to this event's payload.
    fn event_type(&self) -> EventTypeName;

    /// Every discriminator this type can decode.
    fn all_event_types() -> Vec<EventTypeName>;
}

/// An event in its stored form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedEvent {
    /// Discriminator of the stored variant.
    pub event_type: EventTypeName,
    /// JSON encoding of the event.
    pub payload: Vec<u8>,
}

/// Encodes `event`, which is about to be appended to `stream`.
pub fn encode<E: PersistableEvent>(stream: &StreamName, event: &E) -> BackendResult<SerializedEvent> {
    let payload =
        serde_json::to_vec(event).map_err(|error| BackendError::SerializationFailed {
            stream: stream.clone(),
            detail: error.to_string(),
        })?;

    Ok(SerializedEvent {
        event_type: event.event_type(),
        payload,
    })
}

/// Decodes an event that was read from `stream`.
pub fn decode<E: PersistableEvent>(
    stream: &StreamName,
    serialized: &SerializedEvent,
) -> BackendResult<E> {
    if !E::all_event_types().contains(&serialized.event_type) {
        return Err(BackendError::DeserializationFailed {
            stream: stream.clone(),
            detail: format!("unknown event type '{}'", serialized.event_type),
        });
    }

    serde_json::from_slice(&serialized.payload).map_err(|error| {
        BackendError::DeserializationFailed {
            stream: stream.clone(),
            detail: error.to_string(),
        }
    })
}
