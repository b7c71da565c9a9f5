use chrono::{DateTime, Utc};

/// A domain-agnostic event.
///
/// Events are facts: immutable, versioned, and carry the business time at
/// which they happened (resolved before the aggregate sees the command).
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "fees.bill.closed").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
