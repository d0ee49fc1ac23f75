use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Well-known event type: a service elsewhere asks for a log record to be stored.
pub const LOG_CREATED: &str = "log_created";

/// A broker-delivered message describing something that happened elsewhere.
///
/// Immutable once received. `id` identifies the event for log correlation;
/// uniqueness is not enforced here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(default, alias = "eventType", alias = "EventType")]
    pub event_type: String,
    /// Untyped payload, projected by the handler that owns the event type.
    /// Absent and `null` both decode to an empty map.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: Map<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Event {
    pub fn new(
        id: impl Into<String>,
        event_type: impl Into<String>,
        data: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            data,
        }
    }
}

/// Acknowledgment handle handed out by the broker client with every message.
///
/// `done` consumes the handle, so a message cannot be acknowledged twice.
pub trait EventAck: Send {
    fn done(self: Box<Self>);
}

impl<F> EventAck for F
where
    F: FnOnce() + Send,
{
    fn done(self: Box<Self>) {
        (*self)()
    }
}

/// Acknowledgment that does nothing (in-process producers without redelivery).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAck;

impl EventAck for NoAck {
    fn done(self: Box<Self>) {}
}

/// One delivered message: the event plus its acknowledgment handle.
pub struct InboundMessage {
    pub event: Event,
    pub ack: Box<dyn EventAck>,
}

impl std::fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundMessage")
            .field("event", &self.event)
            .finish_non_exhaustive()
    }
}

impl InboundMessage {
    pub fn new(event: Event, ack: impl EventAck + 'static) -> Self {
        Self {
            event,
            ack: Box::new(ack),
        }
    }

    pub fn into_parts(self) -> (Event, Box<dyn EventAck>) {
        (self.event, self.ack)
    }
}
