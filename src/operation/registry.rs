//! Operation registry for correlating replies with pending callbacks.
//!
//! The registry maps origin ids to [`PendingOperation`]s. It is shared by the
//! reader task (which forwards events), the writer task (which fails
//! operations whose frames could not be sent) and caller-side streams (which
//! cancel when dropped).
//!
//! # Locking
//!
//! The map lock is held only to insert, look up or remove an entry. Each
//! entry has a delivery lock that serializes events for that operation and a
//! short state lock. Callbacks run with neither the map lock nor the state
//! lock held, so a callback may complete, fail or cancel any operation,
//! including its own. A terminal that arrives while an event is being
//! delivered is parked and applied once the callback returns, so it can
//! never be followed by another event.
//!
//! # Example
//!
//! ```
//! use privbridge::error::OperationError;
//! use privbridge::operation::{CallbackError, Event, OperationCallback, OperationRegistry};
//!
//! struct Ignore;
//!
//! impl OperationCallback for Ignore {
//!     fn on_event(&mut self, _: Event) -> Result<(), CallbackError> {
//!         Ok(())
//!     }
//!     fn on_terminal(&mut self, _: Result<(), OperationError>) {}
//! }
//!
//! let registry = OperationRegistry::new();
//! let first = registry.register("r1", Ignore).unwrap();
//! assert!(registry.register("r1", Ignore).is_err());
//!
//! assert!(registry.complete("r1"));
//! assert!(!registry.complete("r1"));
//!
//! // A stale ticket never touches a newer registration of the same id.
//! registry.register("r1", Ignore).unwrap();
//! assert!(!registry.cancel_ticket("r1", first));
//! assert!(registry.contains("r1"));
//! ```

use std::collections::HashMap;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::callback::{CallbackError, Event, OperationCallback};
use crate::error::{BridgeError, OperationError, Result};

type Outcome = std::result::Result<(), OperationError>;

/// Identifies one registration of an origin id.
///
/// Ids can be reused once an operation is retired; a ticket cannot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

/// Bookkeeping for one in-flight operation.
pub struct PendingOperation {
    id: String,
    callback: Box<dyn OperationCallback>,
    created_at: Instant,
}

impl PendingOperation {
    /// The origin id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Time since registration.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn deliver(&mut self, event: Event) -> Outcome {
        let name = event.name();
        let callback = &mut self.callback;
        match panic::catch_unwind(AssertUnwindSafe(|| callback.on_event(event))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(CallbackError::Rejected(error))) => Err(error),
            Ok(Err(CallbackError::ReceiverGone)) => Err(OperationError::CallbackDeliveryFailed(
                format!("receiver gone while delivering {}", name),
            )),
            Err(_) => Err(OperationError::CallbackDeliveryFailed(format!(
                "callback panicked on {}",
                name
            ))),
        }
    }

    fn finish(mut self, outcome: Outcome) {
        tracing::trace!(
            origin = %self.id,
            ok = outcome.is_ok(),
            elapsed_ms = self.age().as_millis() as u64,
            "operation finished"
        );
        let callback = &mut self.callback;
        if panic::catch_unwind(AssertUnwindSafe(|| callback.on_terminal(outcome))).is_err() {
            tracing::warn!(origin = %self.id, "callback panicked on terminal event");
        }
    }
}

/// How an operation leaves the registry.
enum Retirement {
    Finish(Outcome),
    Cancel,
}

enum SlotState {
    /// Waiting for the next event.
    Idle(PendingOperation),
    /// An event is being delivered on another stack frame. A retirement
    /// requested meanwhile is parked here.
    Delivering(Option<Retirement>),
    Retired,
}

struct Entry {
    ticket: Ticket,
    delivery: Mutex<()>,
    state: Mutex<SlotState>,
}

impl Entry {
    /// Apply `retirement` now, or park it if an event is in flight.
    ///
    /// Returns `false` if the entry was already retired.
    fn retire(&self, retirement: Retirement) -> bool {
        let mut state = lock(&self.state);
        match mem::replace(&mut *state, SlotState::Retired) {
            SlotState::Idle(operation) => {
                drop(state);
                if let Retirement::Finish(outcome) = retirement {
                    operation.finish(outcome);
                }
                true
            }
            SlotState::Delivering(None) => {
                *state = SlotState::Delivering(Some(retirement));
                true
            }
            parked @ SlotState::Delivering(Some(_)) => {
                *state = parked;
                false
            }
            SlotState::Retired => false,
        }
    }
}

/// Concurrent map of pending operations keyed by origin id.
#[derive(Default)]
pub struct OperationRegistry {
    entries: Mutex<HashMap<String, Arc<Entry>>>,
    next_ticket: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl OperationRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback under `id`.
    ///
    /// The returned [`Ticket`] names this registration for
    /// [`cancel_ticket`](Self::cancel_ticket).
    ///
    /// # Errors
    ///
    /// Returns `DuplicateId` if `id` is already pending.
    pub fn register<C>(&self, id: impl Into<String>, callback: C) -> Result<Ticket>
    where
        C: OperationCallback,
    {
        let id = id.into();
        let mut entries = lock(&self.entries);
        if entries.contains_key(&id) {
            return Err(BridgeError::DuplicateId(id));
        }

        let ticket = Ticket(self.next_ticket.fetch_add(1, Ordering::Relaxed));
        let operation = PendingOperation {
            id: id.clone(),
            callback: Box::new(callback),
            created_at: Instant::now(),
        };
        entries.insert(
            id,
            Arc::new(Entry {
                ticket,
                delivery: Mutex::new(()),
                state: Mutex::new(SlotState::Idle(operation)),
            }),
        );
        Ok(ticket)
    }

    /// Forward a non-terminal event to the operation registered under `id`.
    ///
    /// Returns whether the operation was found. If the callback refuses the
    /// event the operation is retired with the corresponding error.
    ///
    /// Events for one id are delivered one at a time. A callback must not
    /// resolve events into its own id.
    pub fn resolve(&self, id: &str, event: Event) -> bool {
        let Some(entry) = self.entry(id) else {
            return false;
        };

        let _delivery = lock(&entry.delivery);
        let mut operation = {
            let mut state = lock(&entry.state);
            match mem::replace(&mut *state, SlotState::Delivering(None)) {
                SlotState::Idle(operation) => operation,
                other => {
                    *state = other;
                    return false;
                }
            }
        };

        let delivered = operation.deliver(event);

        let mut state = lock(&entry.state);
        let parked = match mem::replace(&mut *state, SlotState::Retired) {
            SlotState::Delivering(parked) => parked,
            _ => None,
        };
        let retirement = match (parked, delivered) {
            (None, Ok(())) => {
                *state = SlotState::Idle(operation);
                return true;
            }
            (Some(retirement), _) => retirement,
            (None, Err(error)) => {
                match &error {
                    OperationError::CallbackDeliveryFailed(reason) => {
                        tracing::warn!(origin = %id, %reason, "callback delivery failed, retiring operation");
                    }
                    other => {
                        tracing::debug!(origin = %id, error = %other, "callback rejected event");
                    }
                }
                Retirement::Finish(Err(error))
            }
        };
        drop(state);

        self.remove_entry(id, entry.ticket);
        if let Retirement::Finish(outcome) = retirement {
            operation.finish(outcome);
        }
        true
    }

    /// Remove the operation and deliver successful completion.
    ///
    /// Returns `false` if nothing was pending under `id`.
    pub fn complete(&self, id: &str) -> bool {
        self.retire(id, Retirement::Finish(Ok(())))
    }

    /// Remove the operation and deliver `error` as its terminal event.
    ///
    /// Returns `false` if nothing was pending under `id`.
    pub fn fail(&self, id: &str, error: OperationError) -> bool {
        self.retire(id, Retirement::Finish(Err(error)))
    }

    /// Remove the operation without delivering anything.
    pub fn cancel(&self, id: &str) -> bool {
        self.retire(id, Retirement::Cancel)
    }

    /// Like [`cancel`](Self::cancel), but only if `id` still belongs to the
    /// registration that returned `ticket`.
    pub fn cancel_ticket(&self, id: &str, ticket: Ticket) -> bool {
        let entry = {
            let mut entries = lock(&self.entries);
            match entries.get(id) {
                Some(entry) if entry.ticket == ticket => entries.remove(id),
                _ => None,
            }
        };
        entry.is_some_and(|entry| entry.retire(Retirement::Cancel))
    }

    /// Deliver `error` to every pending operation and clear the registry.
    ///
    /// Returns the number of operations that received the error.
    pub fn drain_all(&self, error: OperationError) -> usize {
        let entries: Vec<Arc<Entry>> = lock(&self.entries).drain().map(|(_, e)| e).collect();

        entries
            .iter()
            .filter(|entry| entry.retire(Retirement::Finish(Err(error.clone()))))
            .count()
    }

    /// Whether an operation is pending under `id`.
    pub fn contains(&self, id: &str) -> bool {
        lock(&self.entries).contains_key(id)
    }

    /// Number of pending operations.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Whether no operation is pending.
    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    fn retire(&self, id: &str, retirement: Retirement) -> bool {
        let Some(entry) = lock(&self.entries).remove(id) else {
            return false;
        };
        entry.retire(retirement)
    }

    fn entry(&self, id: &str) -> Option<Arc<Entry>> {
        lock(&self.entries).get(id).cloned()
    }

    /// Remove `id` only if it still belongs to `ticket`; the id may have been reused.
    fn remove_entry(&self, id: &str, ticket: Ticket) {
        let mut entries = lock(&self.entries);
        if entries.get(id).is_some_and(|current| current.ticket == ticket) {
            entries.remove(id);
        }
    }
}
