use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::{Rc, Weak};

use tidal_shared::{CreateTaskInput, PushMessage, Task, TaskId, TaskPage, UpdateTaskInput};
use tracing::{debug, info, warn};

use super::window::{TaskWindow, WindowPolicy};
use super::{
    AbandonGuard, CREATE_FAILED, ChannelLink, DELETE_FAILED, FETCH_FAILED, LinkTransition,
    MutationSink, Observers, SubscriberId, UPDATE_FAILED, link_transition, settle_mutation,
};
use crate::channel::ChannelEvent;
use crate::gateway::TaskGateway;

/// Infinite-scroll state: pages accumulate at the tail of the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollState {
    window: TaskWindow,
    policy: WindowPolicy,
    next_page: u32,
    has_more: bool,
    loading: bool,
    error: Option<String>,
}

impl ScrollState {
    pub fn new(policy: WindowPolicy) -> Self {
        Self {
            window: TaskWindow::new(),
            policy,
            next_page: 1,
            has_more: true,
            loading: false,
            error: None,
        }
    }

    pub fn window(&self) -> &TaskWindow {
        &self.window
    }

    pub fn tasks(&self) -> &[Task] {
        self.window.tasks()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn pages_loaded(&self) -> u32 {
        self.next_page - 1
    }

    /// True until a second page has been consumed.
    pub fn viewing_first_page(&self) -> bool {
        self.pages_loaded() <= 1
    }

    /// Claims the next page. `None` while a load is outstanding or once
    /// the backend has run out of pages.
    pub fn begin_load(&mut self) -> Option<u32> {
        if self.loading || !self.has_more {
            return None;
        }
        self.loading = true;
        Some(self.next_page)
    }

    pub fn apply_page(&mut self, page: u32, body: TaskPage) {
        self.loading = false;
        self.error = None;

        if body.tasks.is_empty() {
            debug!(page, "empty page; no more tasks");
            self.has_more = false;
            return;
        }

        let received = body.tasks.len();
        let added = self.window.append(body.tasks);
        self.next_page = page + 1;
        if let Some(total) = body.total_pages
            && page >= total
        {
            self.has_more = false;
        }
        let evicted = self.window.apply_policy(&self.policy);
        info!(
            page,
            received,
            added,
            evicted,
            len = self.window.len(),
            "appended task page"
        );
    }

    pub fn fail_load(&mut self, message: &str) {
        self.loading = false;
        self.error = Some(message.to_string());
    }

    /// Abandoned loads release the guard without touching anything else.
    pub fn cancel_load(&mut self) {
        self.loading = false;
    }

    pub fn record_outcome(&mut self, error: Option<String>) {
        self.error = error;
    }

    /// Merges one push message into the window. Returns whether the
    /// sequence changed. Paging and error state are never touched.
    pub fn apply_push(&mut self, message: &PushMessage) -> bool {
        match message {
            PushMessage::Created { task } => {
                if !self.viewing_first_page() {
                    debug!(id = task.id, "paged forward; created task left for paging");
                    return false;
                }
                self.window.prepend(task.clone());
                self.window.apply_policy(&self.policy);
                true
            }
            PushMessage::Updated { task } => {
                let replaced = self.window.replace(task.clone());
                if !replaced {
                    debug!(id = task.id, "updated task outside window; dropped");
                }
                replaced
            }
            PushMessage::Deleted { id } => {
                let removed = self.window.remove(*id).is_some();
                if !removed {
                    debug!(id, "deleted task outside window; dropped");
                }
                removed
            }
            PushMessage::CounterUpdated { .. } | PushMessage::Unknown => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollSnapshot {
    pub tasks: Vec<Task>,
    pub has_more: bool,
    pub loading: bool,
    pub error: Option<String>,
    pub connected: bool,
    pub pages_loaded: u32,
}

struct ScrollInner {
    state: RefCell<ScrollState>,
    link: Cell<ChannelLink>,
    observers: Observers<ScrollSnapshot>,
}

impl ScrollInner {
    fn snapshot(&self) -> ScrollSnapshot {
        let state = self.state.borrow();
        ScrollSnapshot {
            tasks: state.tasks().to_vec(),
            has_more: state.has_more(),
            loading: state.is_loading(),
            error: state.error.clone(),
            connected: self.link.get().is_connected(),
            pages_loaded: state.pages_loaded(),
        }
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        self.observers.notify(&snapshot);
    }

    fn begin_load(&self) -> Option<u32> {
        let page = self.state.borrow_mut().begin_load();
        if page.is_some() {
            self.publish();
        }
        page
    }

    fn finish_load(&self, page: u32, result: anyhow::Result<TaskPage>) {
        {
            let mut state = self.state.borrow_mut();
            match result {
                Ok(body) => state.apply_page(page, body),
                Err(err) => {
                    let detail = format!("{err:#}");
                    warn!(page, error = %detail, "failed to fetch task page");
                    state.fail_load(FETCH_FAILED);
                }
            }
        }
        self.publish();
    }
}

impl MutationSink for ScrollInner {
    fn record_outcome(&self, error: Option<String>) {
        self.state.borrow_mut().record_outcome(error);
        self.publish();
    }
}

/// Windowed task store for infinite-scroll views.
///
/// Mutations are forwarded to the gateway only; the window changes when
/// the matching push message arrives.
pub struct ScrollStore<G> {
    inner: Rc<ScrollInner>,
    gateway: Rc<G>,
}

impl<G> ScrollStore<G>
where
    G: TaskGateway + 'static,
{
    pub fn new(gateway: G, policy: WindowPolicy) -> Self {
        Self {
            inner: Rc::new(ScrollInner {
                state: RefCell::new(ScrollState::new(policy)),
                link: Cell::new(ChannelLink::default()),
                observers: Observers::new(),
            }),
            gateway: Rc::new(gateway),
        }
    }

    pub fn snapshot(&self) -> ScrollSnapshot {
        self.inner.snapshot()
    }

    pub fn subscribe(&self, observer: impl Fn(&ScrollSnapshot) + 'static) -> SubscriberId {
        self.inner.observers.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.observers.unsubscribe(id)
    }

    /// Fetches the next page. The guard is taken synchronously, so a second
    /// call before the first resolves yields a future that does nothing.
    #[must_use = "the page is only fetched when the future is awaited or spawned"]
    pub fn load_more_tasks(&self) -> impl Future<Output = ()> + 'static {
        let claimed = self.inner.begin_load();
        let target = Rc::downgrade(&self.inner);
        let gateway = Rc::clone(&self.gateway);
        let guard = claimed.map(|_| abandon_guard(&target));

        async move {
            let Some(page) = claimed else {
                debug!("load already in flight or no more pages");
                return;
            };
            let result = gateway.fetch_page(page).await;
            if let Some(guard) = guard {
                guard.disarm();
            }
            match target.upgrade() {
                Some(inner) => inner.finish_load(page, result),
                None => debug!(page, "store dropped before page arrived; discarding"),
            }
        }
    }

    /// Routes one connector event. Returns the deferred initial load on
    /// the first `Connected`; the caller drives it.
    pub fn handle_channel_event(
        &self,
        event: &ChannelEvent,
    ) -> Option<impl Future<Output = ()> + 'static> {
        match link_transition(&self.inner.link, event) {
            LinkTransition::InitialLoad => {
                info!("channel connected; starting initial load");
                self.inner.publish();
                Some(self.load_more_tasks())
            }
            LinkTransition::Reconnected => {
                info!("channel reconnected; window may be stale until new pushes");
                self.inner.publish();
                None
            }
            LinkTransition::Disconnected => {
                warn!("channel disconnected; pausing push updates");
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

    /// Applies a push message if the channel is connected. Returns whether
    /// the window changed.
    pub fn handle_push_message(&self, message: &PushMessage) -> bool {
        if !self.inner.link.get().accepts_push() {
            debug!(event = message.kind(), "channel not connected; ignoring push");
            return false;
        }
        let changed = self.inner.state.borrow_mut().apply_push(message);
        if changed {
            self.inner.publish();
        }
        changed
    }

    #[must_use = "the request is only sent when the future is awaited or spawned"]
    pub fn create_task(&self, input: CreateTaskInput) -> impl Future<Output = bool> + 'static {
        let target = Rc::downgrade(&self.inner);
        let gateway = Rc::clone(&self.gateway);
        async move {
            let outcome = gateway.create_task(&input).await.map(drop);
            settle_mutation(&target, "create", outcome, CREATE_FAILED)
        }
    }

    #[must_use = "the request is only sent when the future is awaited or spawned"]
    pub fn update_task(
        &self,
        id: TaskId,
        patch: UpdateTaskInput,
    ) -> impl Future<Output = bool> + 'static {
        let target = Rc::downgrade(&self.inner);
        let gateway = Rc::clone(&self.gateway);
        async move {
            let outcome = gateway.update_task(id, &patch).await.map(drop);
            settle_mutation(&target, "update", outcome, UPDATE_FAILED)
        }
    }

    #[must_use = "the request is only sent when the future is awaited or spawned"]
    pub fn delete_task(&self, id: TaskId) -> impl Future<Output = bool> + 'static {
        let target = Rc::downgrade(&self.inner);
        let gateway = Rc::clone(&self.gateway);
        async move {
            let outcome = gateway.delete_task(id).await;
            settle_mutation(&target, "delete", outcome, DELETE_FAILED)
        }
    }
}

fn abandon_guard(target: &Weak<ScrollInner>) -> AbandonGuard {
    let target = target.clone();
    AbandonGuard::new(move || {
        if let Some(inner) = target.upgrade() {
            debug!("page load abandoned before completion");
            inner.state.borrow_mut().cancel_load();
            inner.publish();
        }
    })
}
