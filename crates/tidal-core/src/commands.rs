mod watch;

use std::io::{self, Write};

use anyhow::Context;
use chrono::Utc;
use tidal_shared::CreateTaskInput;
use tracing::{debug, info, instrument};

pub use watch::{ViewCommand, parse_view_command};

use crate::cli::Command;
use crate::config::Settings;
use crate::gateway::{CounterGateway, HttpGateway, TaskGateway};
use crate::render::Renderer;

#[instrument(skip(settings, command))]
pub async fn dispatch(settings: &Settings, command: Command) -> anyhow::Result<()> {
    let gateway = HttpGateway::new(settings.api_url.clone(), settings.http_timeout)?;
    let renderer = Renderer::for_stdout(settings.color, settings.timezone);

    debug!(?command, api = %settings.api_url, "dispatching command");

    match command {
        Command::Watch { mode } => {
            let mode = mode.unwrap_or(settings.mode);
            watch::run(settings, mode, gateway, renderer).await
        }
        Command::Add {
            title,
            description,
            expires,
        } => {
            let input = CreateTaskInput {
                description,
                expiry_date: expires,
                ..CreateTaskInput::titled(title)
            };
            cmd_add(&gateway, input).await
        }
        Command::Ls { page } => cmd_ls(&gateway, &renderer, page).await,
        Command::Stats => cmd_stats(&gateway, &renderer).await,
    }
}

async fn cmd_add(gateway: &HttpGateway, input: CreateTaskInput) -> anyhow::Result<()> {
    if input.title.trim().is_empty() {
        anyhow::bail!("task title cannot be empty");
    }
    let task = gateway
        .create_task(&input)
        .await
        .context("Failed to create task")?;
    info!(id = task.id, "created task");
    println!("Created task {}.", task.id);
    Ok(())
}

async fn cmd_ls(gateway: &HttpGateway, renderer: &Renderer, page: u32) -> anyhow::Result<()> {
    let page = page.max(1);
    let body = gateway
        .fetch_page(page)
        .await
        .context("Failed to fetch tasks")?;

    let mut out = io::stdout().lock();
    renderer.write_tasks(&mut out, &body.tasks, Utc::now())?;
    match (body.total_pages, body.total_count) {
        (Some(total), _) => writeln!(out, "page {page} of {total}")?,
        (None, Some(count)) => writeln!(out, "page {page}; {count} tasks in total")?,
        (None, None) => writeln!(out, "page {page}")?,
    }
    Ok(())
}

async fn cmd_stats(gateway: &HttpGateway, renderer: &Renderer) -> anyhow::Result<()> {
    let counters = gateway
        .fetch_counters()
        .await
        .context("Failed to load analytics data")?;
    let mut out = io::stdout().lock();
    renderer.write_counters(&mut out, &counters)
}
