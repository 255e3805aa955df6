use std::collections::HashSet;

use anyhow::bail;
use tidal_shared::{Task, TaskId};
use tracing::debug;

pub const DEFAULT_WINDOW_SIZE: usize = 60;
pub const DEFAULT_CLEANUP_THRESHOLD: usize = 80;

/// Bounds the window: once the sequence grows past `cleanup_threshold`
/// it is cut back to the newest `window_size` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    window_size: usize,
    cleanup_threshold: usize,
}

impl WindowPolicy {
    pub fn new(window_size: usize, cleanup_threshold: usize) -> anyhow::Result<Self> {
        if window_size == 0 {
            bail!("window size must be greater than zero");
        }
        if cleanup_threshold <= window_size {
            bail!(
                "cleanup threshold ({cleanup_threshold}) must exceed window size ({window_size})"
            );
        }
        Ok(Self {
            window_size,
            cleanup_threshold,
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn cleanup_threshold(&self) -> usize {
        self.cleanup_threshold
    }

    pub fn needs_cleanup(&self, len: usize) -> bool {
        len > self.cleanup_threshold
    }
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            cleanup_threshold: DEFAULT_CLEANUP_THRESHOLD,
        }
    }
}

/// Ordered tasks plus the id index over them.
///
/// Every mutation goes through this type so the sequence and the membership
/// set always describe the same ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskWindow {
    tasks: Vec<Task>,
    ids: HashSet<TaskId>,
}

impl TaskWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn ids(&self) -> &HashSet<TaskId> {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.ids.contains(&id)
    }

    /// Appends in order, skipping ids that are already materialized.
    /// Returns how many tasks were added.
    pub fn append<I>(&mut self, tasks: I) -> usize
    where
        I: IntoIterator<Item = Task>,
    {
        let mut added = 0;
        for task in tasks {
            if self.ids.insert(task.id) {
                self.tasks.push(task);
                added += 1;
            } else {
                debug!(id = task.id, "skipping task already in window");
            }
        }
        added
    }

    /// Inserts at the front. A task whose id is already present is
    /// replaced where it stands instead; returns false in that case.
    pub fn prepend(&mut self, task: Task) -> bool {
        if self.contains(task.id) {
            self.replace(task);
            return false;
        }
        self.ids.insert(task.id);
        self.tasks.insert(0, task);
        true
    }

    /// Replaces the entry with the same id, keeping its position.
    pub fn replace(&mut self, task: Task) -> bool {
        if !self.contains(task.id) {
            return false;
        }
        match self.tasks.iter_mut().find(|existing| existing.id == task.id) {
            Some(slot) => {
                *slot = task;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: TaskId) -> Option<Task> {
        if !self.ids.remove(&id) {
            return None;
        }
        let idx = self.tasks.iter().position(|task| task.id == id)?;
        Some(self.tasks.remove(idx))
    }

    /// Drops everything and loads `tasks` (deduplicated) in order.
    pub fn reset<I>(&mut self, tasks: I)
    where
        I: IntoIterator<Item = Task>,
    {
        self.tasks.clear();
        self.ids.clear();
        self.append(tasks);
    }

    /// Keeps the last `count` entries. Returns the number evicted.
    pub fn keep_newest(&mut self, count: usize) -> usize {
        let excess = self.tasks.len().saturating_sub(count);
        if excess == 0 {
            return 0;
        }
        self.tasks.drain(..excess);
        self.rebuild_index();
        excess
    }

    /// Keeps the first `count` entries. Returns the number evicted.
    pub fn keep_oldest(&mut self, count: usize) -> usize {
        let excess = self.tasks.len().saturating_sub(count);
        if excess == 0 {
            return 0;
        }
        self.tasks.truncate(count);
        self.rebuild_index();
        excess
    }

    pub fn apply_policy(&mut self, policy: &WindowPolicy) -> usize {
        if !policy.needs_cleanup(self.tasks.len()) {
            return 0;
        }
        let evicted = self.keep_newest(policy.window_size());
        debug!(
            evicted,
            retained = self.tasks.len(),
            threshold = policy.cleanup_threshold(),
            "window cleanup"
        );
        evicted
    }

    fn rebuild_index(&mut self) {
        self.ids = self.tasks.iter().map(|task| task.id).collect();
    }
}
