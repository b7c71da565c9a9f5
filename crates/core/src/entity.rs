//! Entity trait: identity that survives state changes.

/// An object owned by an aggregate and identified by its id, not its values.
///
/// Line items are entities inside a bill: two items with the same amount and
/// description are still distinct if their ids differ.
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
