//! Operation module - per-origin bookkeeping and dispatch.
//!
//! Provides:
//! - [`OperationRegistry`] - maps origin ids to pending callbacks
//! - [`OperationCallback`] - the push interface every consumer implements
//! - [`Event`] - non-terminal events delivered to callbacks
//! - [`Ticket`] - names one registration of a reusable origin id

mod callback;
mod registry;

pub use callback::{CallbackError, Event, OperationCallback};
pub use registry::{OperationRegistry, PendingOperation, Ticket};

use uuid::Uuid;

/// Generate a fresh, collision-resistant origin id.
pub fn new_origin() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_origin_is_unique() {
        let a = new_origin();
        let b = new_origin();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }
}
