use std::future::Future;
use std::io::{self, IsTerminal, Write};

use anyhow::{anyhow, bail};
use chrono::Utc;
use tidal_shared::{CreateTaskInput, TaskId, UpdateTaskInput};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, instrument, warn};

use crate::channel::{ChannelConnector, ChannelEvent};
use crate::config::{Settings, ViewMode};
use crate::gateway::HttpGateway;
use crate::render::Renderer;
use crate::store::{CounterBoard, PagedStore, ScrollStore};

const HELP: &str = "\
commands:
  more                      load the next page (scroll mode)
  page N | next | prev      navigate pages (paged mode)
  add TITLE [-- DESC]       create a task
  done ID | undo ID         mark a task completed / not completed
  rename ID TITLE           change a task title
  rm ID                     delete a task
  help | quit";

/// One line typed into the live view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewCommand {
    More,
    Page(i64),
    Next,
    Prev,
    Add {
        title: String,
        description: Option<String>,
    },
    Done(TaskId),
    Undo(TaskId),
    Rename(TaskId, String),
    Remove(TaskId),
    Help,
    Quit,
}

/// `Ok(None)` for a blank line.
pub fn parse_view_command(line: &str) -> anyhow::Result<Option<ViewCommand>> {
    let line = line.trim();
    let Some((word, rest)) = split_word(line) else {
        return Ok(None);
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "more" | "m" => ViewCommand::More,
        "next" | "n" => ViewCommand::Next,
        "prev" | "p" => ViewCommand::Prev,
        "page" => {
            let raw = rest.trim();
            let page = raw
                .parse::<i64>()
                .map_err(|_| anyhow!("page expects a number, got {raw:?}"))?;
            ViewCommand::Page(page)
        }
        "add" => {
            let (title, description) = match rest.split_once(" -- ") {
                Some((title, description)) => (title.trim(), Some(description.trim())),
                None => (rest.trim(), None),
            };
            if title.is_empty() {
                bail!("add expects a title");
            }
            ViewCommand::Add {
                title: title.to_string(),
                description: description
                    .filter(|text| !text.is_empty())
                    .map(str::to_string),
            }
        }
        "done" => ViewCommand::Done(parse_id(rest)?),
        "undo" => ViewCommand::Undo(parse_id(rest)?),
        "rm" | "delete" => ViewCommand::Remove(parse_id(rest)?),
        "rename" => {
            let (id, title) =
                split_word(rest).ok_or_else(|| anyhow!("rename expects ID TITLE"))?;
            let title = title.trim();
            if title.is_empty() {
                bail!("rename expects a new title");
            }
            ViewCommand::Rename(parse_id(id)?, title.to_string())
        }
        "help" | "?" => ViewCommand::Help,
        "quit" | "q" | "exit" => ViewCommand::Quit,
        other => bail!("unknown command {other:?}; type 'help'"),
    };
    Ok(Some(command))
}

fn split_word(text: &str) -> Option<(&str, &str)> {
    let text = text.trim_start();
    if text.is_empty() {
        return None;
    }
    Some(text.split_once(char::is_whitespace).unwrap_or((text, "")))
}

fn parse_id(raw: &str) -> anyhow::Result<TaskId> {
    let raw = raw.trim();
    raw.parse::<TaskId>()
        .map_err(|_| anyhow!("expected a task id, got {raw:?}"))
}

enum ActiveStore {
    Scroll(ScrollStore<HttpGateway>),
    Paged(PagedStore<HttpGateway>),
}

struct LiveView {
    tasks: ActiveStore,
    counters: CounterBoard<HttpGateway>,
}

impl LiveView {
    fn new(settings: &Settings, mode: ViewMode, gateway: HttpGateway, renderer: &Renderer) -> Self {
        let clear = io::stdout().is_terminal();
        let tasks = match mode {
            ViewMode::Scroll => {
                let store = ScrollStore::new(gateway.clone(), settings.window);
                let renderer = renderer.clone();
                store.subscribe(move |snapshot| {
                    if snapshot.loading {
                        return;
                    }
                    redraw(clear, |out| renderer.write_scroll(out, snapshot, Utc::now()));
                });
                ActiveStore::Scroll(store)
            }
            ViewMode::Paged => {
                let store = PagedStore::new(gateway.clone(), settings.page_size);
                let renderer = renderer.clone();
                store.subscribe(move |snapshot| {
                    if snapshot.loading {
                        return;
                    }
                    redraw(clear, |out| renderer.write_page(out, snapshot, Utc::now()));
                });
                ActiveStore::Paged(store)
            }
        };

        let counters = CounterBoard::new(gateway);
        let renderer = renderer.clone();
        counters.subscribe(move |snapshot| {
            if snapshot.loading {
                return;
            }
            redraw(false, |out| renderer.write_counter_board(out, snapshot));
        });

        Self { tasks, counters }
    }

    fn on_channel_event(&self, event: &ChannelEvent) {
        match &self.tasks {
            ActiveStore::Scroll(store) => {
                if let Some(load) = store.handle_channel_event(event) {
                    tokio::task::spawn_local(load);
                }
            }
            ActiveStore::Paged(store) => {
                if let Some(load) = store.handle_channel_event(event) {
                    tokio::task::spawn_local(load);
                }
            }
        }
        if let Some(refresh) = self.counters.handle_channel_event(event) {
            tokio::task::spawn_local(refresh);
        }
    }

    fn run_command(&self, command: ViewCommand) {
        debug!(?command, "view command");
        match (&self.tasks, command) {
            (ActiveStore::Scroll(store), ViewCommand::More) => {
                tokio::task::spawn_local(store.load_more_tasks());
            }
            (ActiveStore::Paged(store), ViewCommand::Page(page)) => {
                tokio::task::spawn_local(store.go_to_page(page));
            }
            (ActiveStore::Paged(store), ViewCommand::Next) => {
                tokio::task::spawn_local(store.next_page());
            }
            (ActiveStore::Paged(store), ViewCommand::Prev) => {
                tokio::task::spawn_local(store.previous_page());
            }
            (ActiveStore::Scroll(_), ViewCommand::Page(_) | ViewCommand::Next | ViewCommand::Prev) => {
                eprintln!("page navigation needs --mode paged; use 'more'");
            }
            (ActiveStore::Paged(_), ViewCommand::More) => {
                eprintln!("'more' needs --mode scroll; use 'next'");
            }
            (_, ViewCommand::Add { title, description }) => {
                let input = CreateTaskInput {
                    description,
                    ..CreateTaskInput::titled(title)
                };
                match &self.tasks {
                    ActiveStore::Scroll(store) => spawn_mutation("create", store.create_task(input)),
                    ActiveStore::Paged(store) => spawn_mutation("create", store.create_task(input)),
                }
            }
            (_, ViewCommand::Done(id)) => self.update(id, UpdateTaskInput::completed(true)),
            (_, ViewCommand::Undo(id)) => self.update(id, UpdateTaskInput::completed(false)),
            (_, ViewCommand::Rename(id, title)) => self.update(id, UpdateTaskInput::title(title)),
            (_, ViewCommand::Remove(id)) => match &self.tasks {
                ActiveStore::Scroll(store) => spawn_mutation("delete", store.delete_task(id)),
                ActiveStore::Paged(store) => spawn_mutation("delete", store.delete_task(id)),
            },
            (_, ViewCommand::Help) => println!("{HELP}"),
            (_, ViewCommand::Quit) => {}
        }
    }

    fn update(&self, id: TaskId, patch: UpdateTaskInput) {
        match &self.tasks {
            ActiveStore::Scroll(store) => spawn_mutation("update", store.update_task(id, patch)),
            ActiveStore::Paged(store) => spawn_mutation("update", store.update_task(id, patch)),
        }
    }
}

/// The store records the failure for display; this only traces it.
fn spawn_mutation(action: &'static str, request: impl Future<Output = bool> + 'static) {
    tokio::task::spawn_local(async move {
        if request.await {
            debug!(action, "mutation accepted; waiting for push");
        } else {
            debug!(action, "mutation rejected");
        }
    });
}

fn redraw(clear: bool, draw: impl FnOnce(&mut io::StdoutLock<'static>) -> anyhow::Result<()>) {
    let mut out = io::stdout().lock();
    if clear {
        let _ = write!(out, "\x1b[2J\x1b[H");
    }
    if let Err(err) = draw(&mut out).and_then(|()| out.flush().map_err(Into::into)) {
        warn!(error = %err, "failed to draw view");
    }
}

/// Runs the live view until `quit`, end of input, or Ctrl-C. Must be
/// called inside a `LocalSet`.
#[instrument(skip_all, fields(mode = ?mode))]
pub async fn run(
    settings: &Settings,
    mode: ViewMode,
    gateway: HttpGateway,
    renderer: Renderer,
) -> anyhow::Result<()> {
    let view = LiveView::new(settings, mode, gateway, &renderer);
    let mut connector = ChannelConnector::spawn(settings.channel_config());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(channel = %settings.channel_url, "waiting for push channel");
    eprintln!("connecting to {} (type 'help')", settings.channel_url);

    loop {
        tokio::select! {
            event = connector.next_event() => match event {
                Some(event) => view.on_channel_event(&event),
                None => {
                    warn!("push channel loop ended");
                    break;
                }
            },
            line = lines.next_line() => match line? {
                Some(line) => match parse_view_command(&line) {
                    Ok(Some(ViewCommand::Quit)) => break,
                    Ok(Some(command)) => view.run_command(command),
                    Ok(None) => {}
                    Err(err) => eprintln!("{err}"),
                },
                None => {
                    debug!("stdin closed");
                    break;
                }
            },
            _ = &mut shutdown => {
                info!("interrupted");
                break;
            }
        }
    }

    Ok(())
}
