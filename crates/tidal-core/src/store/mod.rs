//! Client-side reconciliation of fetched pages, mutation results and push
//! messages.
//!
//! Stores are single-threaded (`Rc`/`RefCell`). Each async operation takes
//! only a weak reference to store state across its await point, so a
//! response that lands after the store is dropped is discarded.

pub mod counters;
pub mod paged;
pub mod scroll;
pub mod window;

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::warn;

use crate::channel::ChannelEvent;

pub use counters::{CounterBoard, CounterSnapshot};
pub use paged::{PageSnapshot, PageState, PagedStore};
pub use scroll::{ScrollSnapshot, ScrollState, ScrollStore};
pub use window::{TaskWindow, WindowPolicy};

pub(crate) const FETCH_FAILED: &str = "Failed to fetch tasks";
pub(crate) const CREATE_FAILED: &str = "Failed to create task";
pub(crate) const UPDATE_FAILED: &str = "Failed to update task";
pub(crate) const DELETE_FAILED: &str = "Failed to delete task";
pub(crate) const COUNTERS_FAILED: &str = "Failed to load analytics data";

pub type SubscriberId = u64;

/// Observer list for store snapshots.
pub struct Observers<S> {
    next_id: Cell<SubscriberId>,
    subscribers: RefCell<Vec<(SubscriberId, Rc<dyn Fn(&S)>)>>,
}

impl<S> Observers<S> {
    pub fn new() -> Self {
        Self {
            next_id: Cell::new(1),
            subscribers: RefCell::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, observer: impl Fn(&S) + 'static) -> SubscriberId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.subscribers.borrow_mut().push((id, Rc::new(observer)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.borrow_mut();
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    pub fn notify(&self, snapshot: &S) {
        // Observers may (un)subscribe while being notified.
        let current: Vec<Rc<dyn Fn(&S)>> = self
            .subscribers
            .borrow()
            .iter()
            .map(|(_, observer)| Rc::clone(observer))
            .collect();
        for observer in current {
            observer(snapshot);
        }
    }
}

impl<S> Default for Observers<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection gate shared by every store.
///
/// Push messages are accepted only while connected, and the deferred
/// initial load fires on the first `Connected` and never again.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLink {
    connected: bool,
    initial_load_fired: bool,
}

impl ChannelLink {
    /// Returns true when this transition must trigger the initial load.
    pub fn on_connected(&mut self) -> bool {
        self.connected = true;
        if self.initial_load_fired {
            return false;
        }
        self.initial_load_fired = true;
        true
    }

    pub fn on_disconnected(&mut self) {
        self.connected = false;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn accepts_push(&self) -> bool {
        self.connected
    }
}

/// What a store does with a channel transition, shared by every mode.
pub(crate) enum LinkTransition {
    InitialLoad,
    Reconnected,
    Disconnected,
    Message,
}

pub(crate) fn link_transition(link: &Cell<ChannelLink>, event: &ChannelEvent) -> LinkTransition {
    let mut current = link.get();
    let transition = match event {
        ChannelEvent::Connected => {
            if current.on_connected() {
                LinkTransition::InitialLoad
            } else {
                LinkTransition::Reconnected
            }
        }
        ChannelEvent::Disconnected => {
            current.on_disconnected();
            LinkTransition::Disconnected
        }
        ChannelEvent::Message(_) => LinkTransition::Message,
    };
    link.set(current);
    transition
}

/// Runs `on_abandon` if an operation future is dropped before it settles,
/// so a never-polled load cannot leave `loading` stuck.
pub(crate) struct AbandonGuard {
    on_abandon: Option<Box<dyn FnOnce()>>,
}

impl AbandonGuard {
    pub(crate) fn new(on_abandon: impl FnOnce() + 'static) -> Self {
        Self {
            on_abandon: Some(Box::new(on_abandon)),
        }
    }

    pub(crate) fn disarm(mut self) {
        self.on_abandon = None;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if let Some(on_abandon) = self.on_abandon.take() {
            on_abandon();
        }
    }
}

/// Store state that records the outcome of a forwarded mutation.
pub(crate) trait MutationSink {
    fn record_outcome(&self, error: Option<String>);
}

/// Converts a gateway result into store error state. Returns whether the
/// mutation was accepted by the backend.
pub(crate) fn settle_mutation<T: MutationSink>(
    target: &Weak<T>,
    action: &'static str,
    outcome: anyhow::Result<()>,
    failure: &'static str,
) -> bool {
    let accepted = match &outcome {
        Ok(()) => true,
        Err(err) => {
            let detail = format!("{err:#}");
            warn!(action, error = %detail, "task mutation failed");
            false
        }
    };
    match target.upgrade() {
        Some(target) => {
            target.record_outcome((!accepted).then(|| failure.to_string()));
        }
        None => {
            tracing::debug!(action, "store dropped before mutation settled");
        }
    }
    accepted
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use tidal_shared::PushMessage;

    use super::*;

    #[test]
    fn initial_load_fires_once_across_reconnects() {
        let link = Cell::new(ChannelLink::default());
        assert!(!link.get().accepts_push());
        assert!(matches!(
            link_transition(&link, &ChannelEvent::Connected),
            LinkTransition::InitialLoad
        ));
        assert!(matches!(
            link_transition(&link, &ChannelEvent::Disconnected),
            LinkTransition::Disconnected
        ));
        assert!(!link.get().accepts_push());
        assert!(matches!(
            link_transition(&link, &ChannelEvent::Connected),
            LinkTransition::Reconnected
        ));
        assert!(link.get().accepts_push());
        assert!(matches!(
            link_transition(&link, &ChannelEvent::Message(PushMessage::Unknown)),
            LinkTransition::Message
        ));
    }

    #[test]
    fn observers_can_unsubscribe() {
        let observers: Observers<u32> = Observers::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let id = observers.subscribe(move |value| sink.borrow_mut().push(*value));

        observers.notify(&1);
        assert!(observers.unsubscribe(id));
        assert!(!observers.unsubscribe(id));
        observers.notify(&2);
        assert_eq!(*seen.borrow(), vec![1]);
    }

    #[test]
    fn abandon_guard_runs_only_when_armed() {
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        drop(AbandonGuard::new(move || counter.set(counter.get() + 1)));
        assert_eq!(hits.get(), 1);

        let counter = Rc::clone(&hits);
        AbandonGuard::new(move || counter.set(counter.get() + 1)).disarm();
        assert_eq!(hits.get(), 1);
    }
}
