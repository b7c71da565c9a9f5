use fees_core::BillId;

/// A command targets a specific bill (command abstraction).
///
/// Commands represent **intent**. They are delivered at-least-once, so a
/// command may arrive more than once or after the bill stopped accepting it;
/// the receiving aggregate decides whether it still applies.
///
/// Commands must be cloneable and own all their data: they are journaled,
/// replayed after a restart and moved across task boundaries.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_bill_id(&self) -> &BillId;

    /// Stable command name used in logs and history entries.
    fn command_type(&self) -> &'static str;
}
