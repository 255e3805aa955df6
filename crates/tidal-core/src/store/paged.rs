use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::{Rc, Weak};

use tidal_shared::{CreateTaskInput, PushMessage, Task, TaskId, TaskPage, UpdateTaskInput};
use tracing::{debug, info, warn};

use super::window::TaskWindow;
use super::{
    AbandonGuard, CREATE_FAILED, ChannelLink, DELETE_FAILED, FETCH_FAILED, LinkTransition,
    MutationSink, Observers, SubscriberId, UPDATE_FAILED, link_transition, settle_mutation,
};
use crate::channel::ChannelEvent;
use crate::gateway::TaskGateway;

pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Clamps a requested page into `[1, total_pages]`.
pub fn clamp_page(requested: i64, total_pages: u32) -> u32 {
    let last = i64::from(total_pages.max(1));
    u32::try_from(requested.clamp(1, last)).unwrap_or(1)
}

/// Page-at-a-time state: the window holds exactly the loaded page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageState {
    window: TaskWindow,
    page_size: usize,
    current_page: u32,
    total_pages: u32,
    loading: bool,
    error: Option<String>,
}

impl PageState {
    pub fn new(page_size: usize) -> Self {
        Self {
            window: TaskWindow::new(),
            page_size: page_size.max(1),
            current_page: 1,
            total_pages: 1,
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

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Claims a load of `requested`, clamped into range. `None` while
    /// another load is outstanding.
    pub fn begin_load(&mut self, requested: i64) -> Option<u32> {
        if self.loading {
            return None;
        }
        let page = clamp_page(requested, self.total_pages);
        if i64::from(page) != requested {
            debug!(requested, page, total_pages = self.total_pages, "clamped page request");
        }
        self.loading = true;
        Some(page)
    }

    pub fn apply_page(&mut self, page: u32, body: TaskPage) {
        self.loading = false;
        self.error = None;
        self.total_pages = self.estimate_total_pages(page, &body);
        self.current_page = page;
        self.window.reset(body.tasks);
        info!(
            page,
            total_pages = self.total_pages,
            len = self.window.len(),
            "loaded task page"
        );
    }

    fn estimate_total_pages(&self, page: u32, body: &TaskPage) -> u32 {
        if let Some(total) = body.total_pages
            && total > 0
        {
            return total;
        }
        if let Some(count) = body.total_count
            && count > 0
        {
            let pages = count.div_ceil(self.page_size as u64);
            return u32::try_from(pages).unwrap_or(u32::MAX);
        }
        if body.tasks.len() >= self.page_size {
            self.total_pages.max(page.saturating_add(1))
        } else {
            page
        }
    }

    pub fn fail_load(&mut self, message: &str) {
        self.loading = false;
        self.error = Some(message.to_string());
    }

    pub fn cancel_load(&mut self) {
        self.loading = false;
    }

    pub fn record_outcome(&mut self, error: Option<String>) {
        self.error = error;
    }

    /// Merges a push message into the loaded page. Returns whether the
    /// page changed.
    pub fn apply_push(&mut self, message: &PushMessage) -> bool {
        match message {
            PushMessage::Created { task } => {
                if self.current_page != 1 {
                    debug!(id = task.id, page = self.current_page, "created task not on this page");
                    return false;
                }
                self.window.prepend(task.clone());
                // The displaced tail now belongs to page two.
                self.window.keep_oldest(self.page_size);
                true
            }
            PushMessage::Updated { task } => self.window.replace(task.clone()),
            PushMessage::Deleted { id } => self.window.remove(*id).is_some(),
            PushMessage::CounterUpdated { .. } | PushMessage::Unknown => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSnapshot {
    pub tasks: Vec<Task>,
    pub current_page: u32,
    pub total_pages: u32,
    pub loading: bool,
    pub error: Option<String>,
    pub connected: bool,
}

struct PagedInner {
    state: RefCell<PageState>,
    link: Cell<ChannelLink>,
    observers: Observers<PageSnapshot>,
}

impl PagedInner {
    fn snapshot(&self) -> PageSnapshot {
        let state = self.state.borrow();
        PageSnapshot {
            tasks: state.tasks().to_vec(),
            current_page: state.current_page(),
            total_pages: state.total_pages(),
            loading: state.is_loading(),
            error: state.error.clone(),
            connected: self.link.get().is_connected(),
        }
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        self.observers.notify(&snapshot);
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

impl MutationSink for PagedInner {
    fn record_outcome(&self, error: Option<String>) {
        self.state.borrow_mut().record_outcome(error);
        self.publish();
    }
}

/// Claims the load synchronously and returns the fetch. The returned
/// future holds only a weak reference to store state.
fn page_load<G>(
    inner: &Rc<PagedInner>,
    gateway: &Rc<G>,
    requested: i64,
) -> impl Future<Output = ()> + 'static
where
    G: TaskGateway + 'static,
{
    let claimed = inner.state.borrow_mut().begin_load(requested);
    if claimed.is_some() {
        inner.publish();
    }
    let target = Rc::downgrade(inner);
    let gateway = Rc::clone(gateway);
    let guard = claimed.map(|_| abandon_guard(&target));

    async move {
        let Some(page) = claimed else {
            debug!(requested, "page load already in flight");
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

/// Follow-up navigation after a mutation, if the store is still alive.
async fn reload_after<G>(target: &Weak<PagedInner>, gateway: &Rc<G>, page: PageTarget)
where
    G: TaskGateway + 'static,
{
    let load = match target.upgrade() {
        Some(inner) => {
            let requested = match page {
                PageTarget::First => 1,
                PageTarget::Current => i64::from(inner.state.borrow().current_page()),
            };
            page_load(&inner, gateway, requested)
        }
        None => return,
    };
    load.await;
}

enum PageTarget {
    First,
    Current,
}

fn abandon_guard(target: &Weak<PagedInner>) -> AbandonGuard {
    let target = target.clone();
    AbandonGuard::new(move || {
        if let Some(inner) = target.upgrade() {
            debug!("page load abandoned before completion");
            inner.state.borrow_mut().cancel_load();
            inner.publish();
        }
    })
}

/// Page-based task store: one page materialized at a time.
pub struct PagedStore<G> {
    inner: Rc<PagedInner>,
    gateway: Rc<G>,
}

impl<G> PagedStore<G>
where
    G: TaskGateway + 'static,
{
    pub fn new(gateway: G, page_size: usize) -> Self {
        Self {
            inner: Rc::new(PagedInner {
                state: RefCell::new(PageState::new(page_size)),
                link: Cell::new(ChannelLink::default()),
                observers: Observers::new(),
            }),
            gateway: Rc::new(gateway),
        }
    }

    pub fn snapshot(&self) -> PageSnapshot {
        self.inner.snapshot()
    }

    pub fn subscribe(&self, observer: impl Fn(&PageSnapshot) + 'static) -> SubscriberId {
        self.inner.observers.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.observers.unsubscribe(id)
    }

    #[must_use = "the page is only fetched when the future is awaited or spawned"]
    pub fn go_to_page(&self, requested: i64) -> impl Future<Output = ()> + 'static {
        page_load(&self.inner, &self.gateway, requested)
    }

    #[must_use = "the page is only fetched when the future is awaited or spawned"]
    pub fn next_page(&self) -> impl Future<Output = ()> + 'static {
        let current = i64::from(self.inner.state.borrow().current_page());
        self.go_to_page(current + 1)
    }

    #[must_use = "the page is only fetched when the future is awaited or spawned"]
    pub fn previous_page(&self) -> impl Future<Output = ()> + 'static {
        let current = i64::from(self.inner.state.borrow().current_page());
        self.go_to_page(current - 1)
    }

    pub fn handle_channel_event(
        &self,
        event: &ChannelEvent,
    ) -> Option<impl Future<Output = ()> + 'static> {
        match link_transition(&self.inner.link, event) {
            LinkTransition::InitialLoad => {
                info!("channel connected; loading first page");
                self.inner.publish();
                Some(self.go_to_page(1))
            }
            LinkTransition::Reconnected | LinkTransition::Disconnected => {
                if !self.inner.link.get().is_connected() {
                    warn!("channel disconnected; pausing push updates");
                }
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
            debug!(event = message.kind(), "channel not connected; ignoring push");
            return false;
        }
        let changed = self.inner.state.borrow_mut().apply_push(message);
        if changed {
            self.inner.publish();
        }
        changed
    }

    /// Creates a task and, once accepted, returns to page one where new
    /// tasks surface.
    #[must_use = "the request is only sent when the future is awaited or spawned"]
    pub fn create_task(&self, input: CreateTaskInput) -> impl Future<Output = bool> + 'static {
        let target = Rc::downgrade(&self.inner);
        let gateway = Rc::clone(&self.gateway);
        async move {
            let outcome = gateway.create_task(&input).await.map(drop);
            let accepted = settle_mutation(&target, "create", outcome, CREATE_FAILED);
            if accepted {
                reload_after(&target, &gateway, PageTarget::First).await;
            }
            accepted
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

    /// Deletes a task and reloads the current page, since later tasks
    /// shift into its range.
    #[must_use = "the request is only sent when the future is awaited or spawned"]
    pub fn delete_task(&self, id: TaskId) -> impl Future<Output = bool> + 'static {
        let target = Rc::downgrade(&self.inner);
        let gateway = Rc::clone(&self.gateway);
        async move {
            let outcome = gateway.delete_task(id).await;
            let accepted = settle_mutation(&target, "delete", outcome, DELETE_FAILED);
            if accepted {
                reload_after(&target, &gateway, PageTarget::Current).await;
            }
            accepted
        }
    }
}
