use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;

use tidal_shared::{Counters, PushMessage};
use tracing::{debug, info, warn};

use super::{
    AbandonGuard, COUNTERS_FAILED, ChannelLink, LinkTransition, Observers, SubscriberId,
    link_transition,
};
use crate::channel::ChannelEvent;
use crate::gateway::CounterGateway;

pub const TRACKED_COUNTERS: [&str; 3] = ["tasks_created", "tasks_updated", "tasks_deleted"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub counters: Counters,
    pub loading: bool,
    pub error: Option<String>,
    pub connected: bool,
}

struct CounterInner {
    counters: RefCell<Counters>,
    loading: Cell<bool>,
    error: RefCell<Option<String>>,
    link: Cell<ChannelLink>,
    observers: Observers<CounterSnapshot>,
}

impl CounterInner {
    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            counters: self.counters.borrow().clone(),
            loading: self.loading.get(),
            error: self.error.borrow().clone(),
            connected: self.link.get().is_connected(),
        }
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        self.observers.notify(&snapshot);
    }
}

/// Live analytics counters: a snapshot fetched on every connect, kept
/// current by `counter_updated` pushes.
pub struct CounterBoard<G> {
    inner: Rc<CounterInner>,
    gateway: Rc<G>,
}

impl<G> CounterBoard<G>
where
    G: CounterGateway + 'static,
{
    pub fn new(gateway: G) -> Self {
        let counters = TRACKED_COUNTERS
            .iter()
            .map(|name| (name.to_string(), 0))
            .collect();
        Self {
            inner: Rc::new(CounterInner {
                counters: RefCell::new(counters),
                loading: Cell::new(false),
                error: RefCell::new(None),
                link: Cell::new(ChannelLink::default()),
                observers: Observers::new(),
            }),
            gateway: Rc::new(gateway),
        }
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        self.inner.snapshot()
    }

    pub fn subscribe(&self, observer: impl Fn(&CounterSnapshot) + 'static) -> SubscriberId {
        self.inner.observers.subscribe(observer)
    }

    #[must_use = "the counters are only fetched when the future is awaited or spawned"]
    pub fn refresh(&self) -> impl Future<Output = ()> + 'static {
        self.inner.loading.set(true);
        self.inner.publish();
        let target = Rc::downgrade(&self.inner);
        let gateway = Rc::clone(&self.gateway);
        let guard = {
            let target = target.clone();
            AbandonGuard::new(move || {
                if let Some(inner) = target.upgrade() {
                    inner.loading.set(false);
                    inner.publish();
                }
            })
        };
        async move {
            let result = gateway.fetch_counters().await;
            guard.disarm();
            let Some(inner) = target.upgrade() else {
                debug!("counter board dropped before analytics arrived");
                return;
            };
            inner.loading.set(false);
            match result {
                Ok(fresh) => {
                    info!(counters = fresh.len(), "loaded analytics counters");
                    inner.counters.borrow_mut().extend(fresh);
                    *inner.error.borrow_mut() = None;
                }
                Err(err) => {
                    let detail = format!("{err:#}");
                    warn!(error = %detail, "failed to load analytics counters");
                    *inner.error.borrow_mut() = Some(COUNTERS_FAILED.to_string());
                }
            }
            inner.publish();
        }
    }

    /// Counters reload on every connect, not only the first.
    pub fn handle_channel_event(
        &self,
        event: &ChannelEvent,
    ) -> Option<impl Future<Output = ()> + 'static> {
        match link_transition(&self.inner.link, event) {
            LinkTransition::InitialLoad | LinkTransition::Reconnected => Some(self.refresh()),
            LinkTransition::Disconnected => {
                self.inner.publish();
                None
            }
            LinkTransition::Message => {
                if let ChannelEvent::Message(message) = event {
                    self.handle_push_message(message);
                }
                None
            }
        }
    }

    pub fn handle_push_message(&self, message: &PushMessage) -> bool {
        if !self.inner.link.get().accepts_push() {
            return false;
        }
        let PushMessage::CounterUpdated { counter, value } = message else {
            return false;
        };
        self.inner
            .counters
            .borrow_mut()
            .insert(counter.clone(), *value);
        self.inner.publish();
        true
    }
}
