use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::model::{EmailTask, TaskPatch, TaskStatus};

/// Host-side sink for progress. All calls are fire-and-forget.
pub trait TaskObserver: Send + Sync {
    fn status(&self, message: &str);
    /// Replace the full task list (once per run).
    fn queue(&self, tasks: &[EmailTask]);
    fn update_task(&self, id: &str, patch: TaskPatch);
    fn update_tasks_bulk(&self, ids: &[String], patch: TaskPatch);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum TaskEvent {
    Status(String),
    Queued(Vec<EmailTask>),
    Updated { ids: Vec<String>, patch: TaskPatch },
}

// ── Task board ──

/// In-memory task list applying forward-only patches.
#[derive(Default)]
pub struct TaskBoard {
    tasks: Mutex<Vec<EmailTask>>,
    statuses: Mutex<Vec<String>>,
}

impl TaskBoard {
    pub fn tasks(&self) -> Vec<EmailTask> {
        self.tasks.lock().map(|t| t.clone()).unwrap_or_default()
    }

    #[cfg(test)]
    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks().iter().filter(|t| t.status == status).count()
    }

    #[cfg(test)]
    pub fn get(&self, id: &str) -> Option<EmailTask> {
        self.tasks().into_iter().find(|t| t.id == id)
    }

    /// Apply a patch; returns the new status when it changed.
    fn apply(&self, id: &str, patch: &TaskPatch) -> Option<TaskStatus> {
        let mut tasks = self.tasks.lock().ok()?;
        let task = tasks.iter_mut().find(|t| t.id == id)?;
        let before = task.status;
        if task.apply(patch) && task.status != before {
            Some(task.status)
        } else {
            None
        }
    }
}

impl TaskObserver for TaskBoard {
    fn status(&self, message: &str) {
        if let Ok(mut s) = self.statuses.lock() {
            s.push(message.to_string());
        }
    }

    fn queue(&self, tasks: &[EmailTask]) {
        if let Ok(mut t) = self.tasks.lock() {
            *t = tasks.to_vec();
        }
    }

    fn update_task(&self, id: &str, patch: TaskPatch) {
        self.apply(id, &patch);
    }

    fn update_tasks_bulk(&self, ids: &[String], patch: TaskPatch) {
        for id in ids {
            self.apply(id, &patch);
        }
    }
}

// ── Event stream ──

/// Forwards every call as a [`TaskEvent`] on a channel.
pub struct ChannelObserver {
    tx: UnboundedSender<TaskEvent>,
}

impl ChannelObserver {
    pub fn new(tx: UnboundedSender<TaskEvent>) -> Self {
        ChannelObserver { tx }
    }

    fn send(&self, event: TaskEvent) {
        // Fails only once the receiver is dropped.
        let _ = self.tx.send(event);
    }
}

impl TaskObserver for ChannelObserver {
    fn status(&self, message: &str) {
        self.send(TaskEvent::Status(message.to_string()));
    }

    fn queue(&self, tasks: &[EmailTask]) {
        self.send(TaskEvent::Queued(tasks.to_vec()));
    }

    fn update_task(&self, id: &str, patch: TaskPatch) {
        self.send(TaskEvent::Updated {
            ids: vec![id.to_string()],
            patch,
        });
    }

    fn update_tasks_bulk(&self, ids: &[String], patch: TaskPatch) {
        self.send(TaskEvent::Updated {
            ids: ids.to_vec(),
            patch,
        });
    }
}

// ── Console ──

/// CLI observer: a progress bar over terminal task states plus log lines.
pub struct ConsoleObserver {
    board: TaskBoard,
    pb: ProgressBar,
}

impl ConsoleObserver {
    pub fn new() -> Self {
        let pb = ProgressBar::hidden();
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        ConsoleObserver {
            board: TaskBoard::default(),
            pb,
        }
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
        let total = self.board.tasks().len();
        if total > 0 {
            info!(
                "{} task(s): {} done, {} held, {} error(s), {} skipped",
                total,
                self.board.count(TaskStatus::Done),
                self.board.count(TaskStatus::Held),
                self.board.count(TaskStatus::Error),
                self.board.count(TaskStatus::Skipped)
            );
        }
    }

    fn track(&self, id: &str, patch: &TaskPatch) {
        match self.board.apply(id, patch) {
            Some(status) if status.is_terminal() => {
                if status == TaskStatus::Error {
                    warn!("{}: {}", id, patch.error.as_deref().unwrap_or("error"));
                }
                self.pb.inc(1);
            }
            _ => {}
        }
    }
}

impl Default for ConsoleObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskObserver for ConsoleObserver {
    fn status(&self, message: &str) {
        info!("{}", message);
        self.pb.set_message(message.to_string());
    }

    fn queue(&self, tasks: &[EmailTask]) {
        self.board.queue(tasks);
        self.pb.set_length(tasks.len() as u64);
        self.pb.set_position(0);
        if !tasks.is_empty() {
            self.pb.set_draw_target(ProgressDrawTarget::stderr());
        }
    }

    fn update_task(&self, id: &str, patch: TaskPatch) {
        self.track(id, &patch);
    }

    fn update_tasks_bulk(&self, ids: &[String], patch: TaskPatch) {
        for id in ids {
            self.track(id, &patch);
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_ignores_backward_patches() {
        let board = TaskBoard::default();
        board.queue(&[EmailTask::queued("a"), EmailTask::queued("b")]);
        board.update_tasks_bulk(
            &["a".to_string(), "b".to_string()],
            TaskPatch::status(TaskStatus::Parsing),
        );
        board.update_task("a", TaskPatch::status(TaskStatus::Fetching));
        board.update_task("b", TaskPatch::status(TaskStatus::Done));
        assert_eq!(board.get("a").unwrap().status, TaskStatus::Parsing);
        assert_eq!(board.count(TaskStatus::Done), 1);
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let board = TaskBoard::default();
        board.update_task("ghost", TaskPatch::status(TaskStatus::Done));
        assert!(board.tasks().is_empty());
    }

    #[tokio::test]
    async fn channel_observer_streams_events() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let obs = ChannelObserver::new(tx);
        obs.status("hello");
        obs.update_task("a", TaskPatch::status(TaskStatus::Done));
        drop(obs);
        assert_eq!(rx.recv().await, Some(TaskEvent::Status("hello".into())));
        match rx.recv().await {
            Some(TaskEvent::Updated { ids, patch }) => {
                assert_eq!(ids, vec!["a"]);
                assert_eq!(patch.status, Some(TaskStatus::Done));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(rx.recv().await, None);
    }
}
