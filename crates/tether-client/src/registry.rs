//! Listener registry.
//!
//! Maps an [`EventKind`] to the listeners registered for it, in registration
//! order. Dispatch runs over a snapshot of the list, so a listener that
//! registers or removes listeners mid-dispatch only affects later dispatches.
//!
//! A panicking listener is caught, logged and counted; the remaining
//! listeners for that notification still run and the table is untouched.

use std::{
    collections::HashMap,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tracing::warn;

use crate::event::{EventKind, Notification};

/// Listener callback.
///
/// Identity is the `Arc` allocation: registering the same `Arc` twice under
/// one kind yields the same [`ListenerId`].
pub type Listener = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Handle returned by [`EventRegistry::on`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Outcome of dispatching one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchReport {
    /// Listeners that returned normally.
    pub delivered: usize,
    /// Listeners that panicked.
    pub panicked: usize,
    /// Dispatch stopped early because the gate was closed.
    pub halted: bool,
}

/// Cancellation point for in-flight dispatches.
///
/// A dispatch takes a ticket when it starts and checks it before every
/// listener. [`DispatchGate::halt`] invalidates all outstanding tickets, so a
/// `disconnect()` issued from inside a listener stops the rest of that
/// dispatch.
#[derive(Debug, Default)]
pub struct DispatchGate {
    generation: AtomicU64,
}

/// Ticket taken at dispatch start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTicket(u64);

impl DispatchGate {
    /// Create an open gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ticket for a dispatch starting now.
    pub fn ticket(&self) -> DispatchTicket {
        DispatchTicket(self.generation.load(Ordering::Acquire))
    }

    /// `true` while no halt happened since `ticket` was taken.
    pub fn admits(&self, ticket: DispatchTicket) -> bool {
        self.generation.load(Ordering::Acquire) == ticket.0
    }

    /// Invalidate every outstanding ticket.
    pub fn halt(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

/// Listener table keyed by event kind.
#[derive(Default)]
pub struct EventRegistry {
    next_id: u64,
    listeners: HashMap<EventKind, Vec<(ListenerId, Listener)>>,
}

impl EventRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` under `kind`.
    ///
    /// Registering the same `Arc` again under the same kind is a no-op that
    /// returns the existing id. The same listener may be registered under
    /// several kinds independently.
    pub fn on(&mut self, kind: impl Into<EventKind>, listener: Listener) -> ListenerId {
        let entries = self.listeners.entry(kind.into()).or_default();

        if let Some((id, _)) = entries.iter().find(|(_, existing)| Arc::ptr_eq(existing, &listener))
        {
            return *id;
        }

        self.next_id += 1;
        let id = ListenerId(self.next_id);
        entries.push((id, listener));
        id
    }

    /// Remove the listener `id` from `kind`.
    ///
    /// Returns `false` (and does nothing) when it is not registered there.
    pub fn off(&mut self, kind: &EventKind, id: ListenerId) -> bool {
        let Some(entries) = self.listeners.get_mut(kind) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        let removed = entries.len() != before;

        if entries.is_empty() {
            self.listeners.remove(kind);
        }

        removed
    }

    /// Number of listeners registered under `kind`.
    pub fn listener_count(&self, kind: &EventKind) -> usize {
        self.listeners.get(kind).map_or(0, Vec::len)
    }

    /// `true` when no listeners are registered at all.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Listeners for `kind`, in registration order.
    pub fn snapshot(&self, kind: &EventKind) -> Vec<Listener> {
        self.listeners
            .get(kind)
            .map(|entries| entries.iter().map(|(_, listener)| Arc::clone(listener)).collect())
            .unwrap_or_default()
    }

    /// Dispatch `notification` to its listeners.
    pub fn dispatch(&self, notification: &Notification) -> DispatchReport {
        run_listeners(&self.snapshot(&notification.kind()), notification, None)
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&str, usize> =
            self.listeners.iter().map(|(kind, entries)| (kind.name(), entries.len())).collect();
        f.debug_struct("EventRegistry").field("listeners", &counts).finish()
    }
}

/// Run `listeners` in order, isolating panics.
///
/// When a guard is given, the ticket is checked before each listener and a
/// halted gate stops the loop. Callers dispatching several notifications for
/// one input share a single ticket across them.
pub fn run_listeners(
    listeners: &[Listener],
    notification: &Notification,
    guard: Option<(&DispatchGate, DispatchTicket)>,
) -> DispatchReport {
    let mut report = DispatchReport::default();

    for listener in listeners {
        if let Some((gate, ticket)) = guard {
            if !gate.admits(ticket) {
                report.halted = true;
                break;
            }
        }

        match catch_unwind(AssertUnwindSafe(|| listener(notification))) {
            Ok(()) => report.delivered += 1,
            Err(_) => {
                report.panicked += 1;
                warn!(event = %notification.kind(), "listener panicked during dispatch");
            },
        }
    }

    report
}
