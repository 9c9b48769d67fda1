//! Module events emitted during transaction application.

/// A typed event with string attributes, surfaced through simulation and
/// block receipts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    /// Event kind, e.g. `mint.credited`.
    pub kind: String,
    /// Ordered attribute pairs.
    pub attributes: Vec<(String, String)>,
}

impl Event {
    /// Builds an event from a kind and attribute pairs.
    pub fn new(kind: &str, attributes: Vec<(String, String)>) -> Self {
        Event {
            kind: kind.to_string(),
            attributes,
        }
    }
}
