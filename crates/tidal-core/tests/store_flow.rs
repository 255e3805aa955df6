use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use anyhow::anyhow;
use chrono::{TimeZone, Utc};
use tidal_core::channel::ChannelEvent;
use tidal_core::gateway::TaskGateway;
use tidal_core::store::{PagedStore, ScrollStore, WindowPolicy};
use tidal_shared::{CreateTaskInput, PushMessage, Task, TaskId, TaskPage, UpdateTaskInput};

fn task(id: TaskId) -> Task {
    Task {
        id,
        title: format!("task {id}"),
        description: None,
        completed: false,
        expiry_date: None,
        created_at: Utc
            .with_ymd_and_hms(2026, 2, 1, 8, 0, 0)
            .single()
            .expect("date"),
    }
}

fn ids(tasks: &[Task]) -> Vec<TaskId> {
    tasks.iter().map(|task| task.id).collect()
}

#[derive(Default)]
struct Script {
    pages: RefCell<HashMap<u32, TaskPage>>,
    fail_fetch: Cell<bool>,
    fail_mutations: Cell<bool>,
    calls: RefCell<Vec<String>>,
}

/// In-memory backend that records every request it receives.
#[derive(Clone, Default)]
struct ScriptedGateway {
    script: Rc<Script>,
}

impl ScriptedGateway {
    fn with_pages(pages: &[&[TaskId]]) -> Self {
        let gateway = Self::default();
        for (index, page) in pages.iter().enumerate() {
            let number = u32::try_from(index + 1).expect("page number");
            gateway.set_page(number, page);
        }
        gateway
    }

    fn set_page(&self, number: u32, page: &[TaskId]) {
        self.script.pages.borrow_mut().insert(
            number,
            TaskPage::bare(page.iter().copied().map(task).collect()),
        );
    }

    fn calls(&self) -> Vec<String> {
        self.script.calls.borrow().clone()
    }

    fn record(&self, call: String) {
        self.script.calls.borrow_mut().push(call);
    }

    fn mutation_result(&self) -> anyhow::Result<()> {
        if self.script.fail_mutations.get() {
            Err(anyhow!("request failed with HTTP 500"))
        } else {
            Ok(())
        }
    }
}

impl TaskGateway for ScriptedGateway {
    async fn fetch_page(&self, page: u32) -> anyhow::Result<TaskPage> {
        self.record(format!("fetch {page}"));
        tokio::task::yield_now().await;
        if self.script.fail_fetch.get() {
            return Err(anyhow!("connection refused"));
        }
        Ok(self
            .script
            .pages
            .borrow()
            .get(&page)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_task(&self, input: &CreateTaskInput) -> anyhow::Result<Task> {
        self.record(format!("create {}", input.title));
        tokio::task::yield_now().await;
        self.mutation_result()?;
        Ok(Task {
            title: input.title.clone(),
            ..task(100)
        })
    }

    async fn update_task(&self, id: TaskId, _patch: &UpdateTaskInput) -> anyhow::Result<Task> {
        self.record(format!("update {id}"));
        tokio::task::yield_now().await;
        self.mutation_result()?;
        Ok(task(id))
    }

    async fn delete_task(&self, id: TaskId) -> anyhow::Result<()> {
        self.record(format!("delete {id}"));
        tokio::task::yield_now().await;
        self.mutation_result()
    }
}

async fn connected_scroll(gateway: &ScriptedGateway) -> ScrollStore<ScriptedGateway> {
    let store = ScrollStore::new(gateway.clone(), WindowPolicy::default());
    let load = store
        .handle_channel_event(&ChannelEvent::Connected)
        .expect("first connect loads");
    load.await;
    store
}

#[tokio::test]
async fn nothing_loads_or_applies_before_connect() {
    let gateway = ScriptedGateway::with_pages(&[&[1, 2, 3]]);
    let store = ScrollStore::new(gateway.clone(), WindowPolicy::default());

    assert!(!store.handle_push_message(&PushMessage::Created { task: task(9) }));
    assert!(store.snapshot().tasks.is_empty());
    assert!(gateway.calls().is_empty());

    let load = store
        .handle_channel_event(&ChannelEvent::Connected)
        .expect("first connect loads");
    assert!(store.snapshot().loading);
    load.await;

    let snapshot = store.snapshot();
    assert_eq!(ids(&snapshot.tasks), vec![1, 2, 3]);
    assert!(snapshot.connected);
    assert!(!snapshot.loading);
    assert_eq!(gateway.calls(), vec!["fetch 1"]);
}

#[tokio::test]
async fn reconnect_does_not_reload() {
    let gateway = ScriptedGateway::with_pages(&[&[1, 2]]);
    let store = connected_scroll(&gateway).await;

    assert!(store.handle_channel_event(&ChannelEvent::Disconnected).is_none());
    assert!(!store.snapshot().connected);
    assert!(!store.handle_push_message(&PushMessage::Deleted { id: 1 }));

    assert!(store.handle_channel_event(&ChannelEvent::Connected).is_none());
    assert!(store.handle_push_message(&PushMessage::Deleted { id: 1 }));
    assert_eq!(ids(&store.snapshot().tasks), vec![2]);
    assert_eq!(gateway.calls(), vec!["fetch 1"]);
}

#[tokio::test]
async fn overlapping_load_more_fetches_once() {
    let gateway = ScriptedGateway::with_pages(&[&[1, 2], &[3, 4]]);
    let store = connected_scroll(&gateway).await;

    let first = store.load_more_tasks();
    let second = store.load_more_tasks();
    tokio::join!(first, second);

    assert_eq!(gateway.calls(), vec!["fetch 1", "fetch 2"]);
    assert_eq!(ids(&store.snapshot().tasks), vec![1, 2, 3, 4]);
    assert_eq!(store.snapshot().pages_loaded, 2);
}

#[tokio::test]
async fn empty_page_ends_infinite_scroll() {
    let gateway = ScriptedGateway::with_pages(&[&[1, 2]]);
    let store = connected_scroll(&gateway).await;

    store.load_more_tasks().await;
    assert!(!store.snapshot().has_more);

    store.load_more_tasks().await;
    assert_eq!(gateway.calls(), vec!["fetch 1", "fetch 2"]);
    assert_eq!(ids(&store.snapshot().tasks), vec![1, 2]);
}

#[tokio::test]
async fn response_after_drop_is_discarded() {
    let gateway = ScriptedGateway::with_pages(&[&[1]]);
    let store = ScrollStore::new(gateway.clone(), WindowPolicy::default());
    let notified = Rc::new(Cell::new(0));
    let seen = Rc::clone(&notified);
    store.subscribe(move |_| seen.set(seen.get() + 1));

    let load = store
        .handle_channel_event(&ChannelEvent::Connected)
        .expect("first connect loads");
    let before = notified.get();
    drop(store);
    load.await;

    assert_eq!(notified.get(), before);
    assert_eq!(gateway.calls(), vec!["fetch 1"]);
}

#[tokio::test]
async fn dropped_load_releases_the_guard() {
    let gateway = ScriptedGateway::with_pages(&[&[1], &[2]]);
    let store = connected_scroll(&gateway).await;

    drop(store.load_more_tasks());
    assert!(!store.snapshot().loading);

    store.load_more_tasks().await;
    assert_eq!(ids(&store.snapshot().tasks), vec![1, 2]);
}

#[tokio::test]
async fn mutations_wait_for_the_push() {
    let gateway = ScriptedGateway::with_pages(&[&[1, 2]]);
    let store = connected_scroll(&gateway).await;

    assert!(store.create_task(CreateTaskInput::titled("write docs")).await);
    assert_eq!(ids(&store.snapshot().tasks), vec![1, 2]);

    assert!(store.handle_push_message(&PushMessage::Created { task: task(100) }));
    assert_eq!(ids(&store.snapshot().tasks), vec![100, 1, 2]);

    // A second delivery of the same task is not duplicated.
    store.handle_push_message(&PushMessage::Created { task: task(100) });
    assert_eq!(ids(&store.snapshot().tasks), vec![100, 1, 2]);

    assert!(store.delete_task(1).await);
    assert_eq!(ids(&store.snapshot().tasks), vec![100, 1, 2]);
    assert!(store.handle_push_message(&PushMessage::Deleted { id: 1 }));
    assert_eq!(ids(&store.snapshot().tasks), vec![100, 2]);
}

#[tokio::test]
async fn mutation_error_is_set_then_cleared() {
    let gateway = ScriptedGateway::with_pages(&[&[1]]);
    let store = connected_scroll(&gateway).await;

    gateway.script.fail_mutations.set(true);
    assert!(!store.update_task(1, UpdateTaskInput::completed(true)).await);
    assert_eq!(store.snapshot().error.as_deref(), Some("Failed to update task"));

    gateway.script.fail_mutations.set(false);
    assert!(store.update_task(1, UpdateTaskInput::completed(true)).await);
    assert_eq!(store.snapshot().error, None);
}

#[tokio::test]
async fn fetch_error_keeps_window_and_allows_retry() {
    let gateway = ScriptedGateway::with_pages(&[&[1], &[2]]);
    let store = connected_scroll(&gateway).await;

    gateway.script.fail_fetch.set(true);
    store.load_more_tasks().await;
    let snapshot = store.snapshot();
    assert_eq!(snapshot.error.as_deref(), Some("Failed to fetch tasks"));
    assert!(!snapshot.loading);
    assert_eq!(ids(&snapshot.tasks), vec![1]);

    gateway.script.fail_fetch.set(false);
    store.load_more_tasks().await;
    let snapshot = store.snapshot();
    assert_eq!(snapshot.error, None);
    assert_eq!(ids(&snapshot.tasks), vec![1, 2]);
    assert_eq!(gateway.calls(), vec!["fetch 1", "fetch 2", "fetch 2"]);
}

async fn connected_paged(gateway: &ScriptedGateway, page_size: usize) -> PagedStore<ScriptedGateway> {
    let store = PagedStore::new(gateway.clone(), page_size);
    let load = store
        .handle_channel_event(&ChannelEvent::Connected)
        .expect("first connect loads");
    load.await;
    store
}

#[tokio::test]
async fn paged_navigation_clamps_to_known_pages() {
    let gateway = ScriptedGateway::with_pages(&[&[1, 2], &[3, 4], &[5]]);
    let store = connected_paged(&gateway, 2).await;
    assert_eq!(store.snapshot().total_pages, 2);

    store.go_to_page(9).await;
    let snapshot = store.snapshot();
    assert_eq!(snapshot.current_page, 2);
    assert_eq!(ids(&snapshot.tasks), vec![3, 4]);
    assert_eq!(snapshot.total_pages, 3);

    store.next_page().await;
    assert_eq!(ids(&store.snapshot().tasks), vec![5]);
    assert_eq!(store.snapshot().total_pages, 3);

    store.previous_page().await;
    store.go_to_page(-4).await;
    assert_eq!(store.snapshot().current_page, 1);
    assert_eq!(
        gateway.calls(),
        vec!["fetch 1", "fetch 2", "fetch 3", "fetch 2", "fetch 1"]
    );
}

#[tokio::test]
async fn paged_create_returns_to_first_page() {
    let gateway = ScriptedGateway::with_pages(&[&[1, 2], &[3, 4]]);
    let store = connected_paged(&gateway, 2).await;
    store.next_page().await;
    assert_eq!(store.snapshot().current_page, 2);

    assert!(store.create_task(CreateTaskInput::titled("new")).await);
    assert_eq!(store.snapshot().current_page, 1);
    assert_eq!(
        gateway.calls(),
        vec!["fetch 1", "fetch 2", "create new", "fetch 1"]
    );
}

#[tokio::test]
async fn paged_delete_reloads_current_page() {
    let gateway = ScriptedGateway::with_pages(&[&[1, 2], &[3, 4], &[5]]);
    let store = connected_paged(&gateway, 2).await;
    store.next_page().await;

    gateway.set_page(2, &[4, 5]);
    assert!(store.delete_task(3).await);
    let snapshot = store.snapshot();
    assert_eq!(snapshot.current_page, 2);
    assert_eq!(ids(&snapshot.tasks), vec![4, 5]);
    assert_eq!(
        gateway.calls(),
        vec!["fetch 1", "fetch 2", "delete 3", "fetch 2"]
    );
}

#[tokio::test]
async fn paged_failed_delete_does_not_reload() {
    let gateway = ScriptedGateway::with_pages(&[&[1, 2]]);
    let store = connected_paged(&gateway, 2).await;

    gateway.script.fail_mutations.set(true);
    assert!(!store.delete_task(1).await);
    assert_eq!(store.snapshot().error.as_deref(), Some("Failed to delete task"));
    assert_eq!(gateway.calls(), vec!["fetch 1", "delete 1"]);
}

#[tokio::test]
async fn paged_pushes_follow_the_visible_page() {
    let gateway = ScriptedGateway::with_pages(&[&[1, 2], &[3, 4]]);
    let store = connected_paged(&gateway, 2).await;

    assert!(store.handle_push_message(&PushMessage::Created { task: task(10) }));
    assert_eq!(ids(&store.snapshot().tasks), vec![10, 1]);

    store.next_page().await;
    assert!(!store.handle_push_message(&PushMessage::Created { task: task(11) }));
    assert!(store.handle_push_message(&PushMessage::Deleted { id: 3 }));
    assert_eq!(ids(&store.snapshot().tasks), vec![4]);
}
