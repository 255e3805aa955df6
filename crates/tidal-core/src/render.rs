use std::io::{self, IsTerminal, Write};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tidal_shared::{Counters, Task};
use unicode_width::UnicodeWidthStr;

use crate::store::{CounterSnapshot, PageSnapshot, ScrollSnapshot};

const RED: &str = "31";
const YELLOW: &str = "33";
const DIM: &str = "2";

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    tz: Tz,
}

impl Renderer {
    pub fn new(color: bool, tz: Tz) -> Self {
        Self { color, tz }
    }

    /// Colors only when enabled and stdout is a terminal.
    pub fn for_stdout(color: bool, tz: Tz) -> Self {
        Self::new(color && io::stdout().is_terminal(), tz)
    }

    #[tracing::instrument(skip(self, out, tasks, now))]
    pub fn write_tasks<W: Write>(
        &self,
        out: &mut W,
        tasks: &[Task],
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "{}", self.paint("No tasks", DIM))?;
            return Ok(());
        }

        let headers = ["ID", "Done", "Title", "Expires", "Status", "Created"]
            .map(str::to_string)
            .to_vec();

        let rows = tasks
            .iter()
            .map(|task| {
                let expired = task.is_expired(now);
                let status = if expired { "Expired" } else { "Active" };
                let mut row = vec![
                    self.paint(&task.id.to_string(), YELLOW),
                    if task.completed { "[x]" } else { "[ ]" }.to_string(),
                    task.title.clone(),
                    task.expiry_date
                        .map(|date| self.format_date(date))
                        .unwrap_or_default(),
                    status.to_string(),
                    self.format_date(task.created_at),
                ];
                if expired {
                    row = row
                        .into_iter()
                        .map(|cell| self.paint(&strip_ansi(&cell), RED))
                        .collect();
                }
                row
            })
            .collect();

        write_table(out, headers, rows)
    }

    pub fn write_scroll<W: Write>(
        &self,
        out: &mut W,
        snapshot: &ScrollSnapshot,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.write_tasks(out, &snapshot.tasks, now)?;
        let more = if snapshot.has_more {
            "more available ('more')"
        } else {
            "end of list"
        };
        writeln!(
            out,
            "{} tasks loaded over {} page(s); {more}{}",
            snapshot.tasks.len(),
            snapshot.pages_loaded,
            status_suffix(snapshot.loading, snapshot.connected),
        )?;
        self.write_error(out, snapshot.error.as_deref())
    }

    pub fn write_page<W: Write>(
        &self,
        out: &mut W,
        snapshot: &PageSnapshot,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.write_tasks(out, &snapshot.tasks, now)?;
        writeln!(
            out,
            "page {} of {}{}",
            snapshot.current_page,
            snapshot.total_pages,
            status_suffix(snapshot.loading, snapshot.connected),
        )?;
        self.write_error(out, snapshot.error.as_deref())
    }

    pub fn write_counters<W: Write>(&self, out: &mut W, counters: &Counters) -> anyhow::Result<()> {
        let headers = vec!["Counter".to_string(), "Value".to_string()];
        let rows = counters
            .iter()
            .map(|(name, value)| vec![name.clone(), value.to_string()])
            .collect();
        write_table(out, headers, rows)
    }

    pub fn write_counter_board<W: Write>(
        &self,
        out: &mut W,
        snapshot: &CounterSnapshot,
    ) -> anyhow::Result<()> {
        let line = snapshot
            .counters
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("  ");
        writeln!(out, "{}", self.paint(&line, DIM))?;
        self.write_error(out, snapshot.error.as_deref())
    }

    pub fn write_error<W: Write>(&self, out: &mut W, error: Option<&str>) -> anyhow::Result<()> {
        if let Some(error) = error {
            writeln!(out, "{}", self.paint(&format!("error: {error}"), RED))?;
        }
        Ok(())
    }

    fn format_date(&self, date: DateTime<Utc>) -> String {
        date.with_timezone(&self.tz)
            .format("%Y-%m-%d %H:%M")
            .to_string()
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn status_suffix(loading: bool, connected: bool) -> String {
    let mut suffix = String::new();
    if loading {
        suffix.push_str(" [loading]");
    }
    if !connected {
        suffix.push_str(" [offline]");
    }
    suffix
}

fn write_table<W: Write>(
    writer: &mut W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect();

    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, &width) in headers.iter().zip(&widths) {
        write!(writer, "{header:width$} ")?;
    }
    writeln!(writer)?;

    for &width in &widths {
        write!(writer, "{:-<width$} ", "")?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, &width) in row.iter().zip(&widths) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
