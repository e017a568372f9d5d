//! Generic task-queue worker pool (§4.13).
//!
//! The original keeps one `std::mutex`-guarded `std::list<Task*>` FIFO;
//! workers pop it, run a task, and — since `Task::doTask()` may hand back a
//! follow-on task for some worker to pick up next — push that follow-on
//! back onto the same list. That shared-mutex FIFO becomes a
//! `crossbeam_channel` MPMC queue here: workers block-receive instead of
//! locking a mutex, and a follow-on task is just another send.
//!
//! This module owns only the scheduling machinery. The concrete decode
//! tasks (one per split chunk) and match tasks (one per `ThreadSplit`) are
//! built by the caller that owns both the decode and match crates — the
//! two-phase "drain all decode tasks, then commit match tasks" barrier
//! described in §4.13 is an orchestration detail for that caller, not
//! something this queue enforces.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::error::Result;

pub const DEFAULT_JOBS: usize = 8;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Decode,
    Match,
}

/// A unit of work that may hand back a follow-on task, mirroring the
/// original's `Task::doTask()` contract (`doTask` returns the next `Task*`
/// or null).
pub trait Task: Send {
    fn kind(&self) -> TaskKind;
    fn run(self: Box<Self>) -> Result<Option<Box<dyn Task>>>;
}

struct Inner {
    sender: Sender<Box<dyn Task>>,
    receiver: Receiver<Box<dyn Task>>,
    outstanding: AtomicUsize,
}

/// Shared task queue plus an outstanding-work counter, so callers can tell
/// a momentarily empty channel apart from a fully drained one.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskManager {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { inner: Arc::new(Inner { sender, receiver, outstanding: AtomicUsize::new(0) }) }
    }

    pub fn commit_task(&self, task: Box<dyn Task>) {
        self.inner.outstanding.fetch_add(1, Ordering::SeqCst);
        // The receiver is held alive by this same `Inner`, so send cannot fail.
        let _ = self.inner.sender.send(task);
    }

    pub fn commit_tasks(&self, tasks: impl IntoIterator<Item = Box<dyn Task>>) {
        for task in tasks {
            self.commit_task(task);
        }
    }

    /// Tasks currently sitting in the queue, not counting ones in flight.
    pub fn task_size(&self) -> usize {
        self.inner.receiver.len()
    }

    pub fn is_need_more_worker(&self) -> bool {
        self.task_size() > 0
    }

    fn complete_task(&self) {
        self.inner.outstanding.fetch_sub(1, Ordering::SeqCst);
    }

    fn is_drained(&self) -> bool {
        self.inner.outstanding.load(Ordering::SeqCst) == 0
    }
}

/// Runs a pool of `jobs` worker threads over `initial` tasks until the
/// queue — including any follow-on tasks `Task::run` hands back — drains.
pub fn run_to_completion(manager: &TaskManager, initial: Vec<Box<dyn Task>>, jobs: usize) {
    manager.commit_tasks(initial);
    std::thread::scope(|scope| {
        for _ in 0..jobs.max(1) {
            scope.spawn(|| worker_loop(manager));
        }
    });
}

/// One worker's poll loop: equivalent to the original `Worker::operator()`,
/// which runs `work()` in a loop until its alive flag is cleared.
fn worker_loop(manager: &TaskManager) {
    loop {
        match manager.inner.receiver.recv_timeout(POLL_INTERVAL) {
            Ok(task) => {
                let result = task.run();
                manager.complete_task();
                match result {
                    Ok(Some(follow_on)) => manager.commit_task(follow_on),
                    Ok(None) => {}
                    Err(err) => log::warn!("task failed: {err}"),
                }
            }
            Err(_) => {
                if manager.is_drained() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingTask {
        id: u32,
        remaining_chain: u32,
        log: Arc<Mutex<Vec<u32>>>,
    }

    impl Task for RecordingTask {
        fn kind(&self) -> TaskKind {
            TaskKind::Decode
        }

        fn run(self: Box<Self>) -> Result<Option<Box<dyn Task>>> {
            self.log.lock().unwrap().push(self.id);
            if self.remaining_chain == 0 {
                return Ok(None);
            }
            Ok(Some(Box::new(RecordingTask {
                id: self.id * 10 + self.remaining_chain,
                remaining_chain: self.remaining_chain - 1,
                log: self.log.clone(),
            })))
        }
    }

    #[test]
    fn follow_on_tasks_run_to_completion() {
        let manager = TaskManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let initial: Vec<Box<dyn Task>> = vec![Box::new(RecordingTask {
            id: 1,
            remaining_chain: 2,
            log: log.clone(),
        })];
        run_to_completion(&manager, initial, 2);

        let seen = log.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.contains(&1));
        assert!(manager.task_size() == 0);
    }

    #[test]
    fn multiple_independent_tasks_all_run() {
        let manager = TaskManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let initial: Vec<Box<dyn Task>> = (0..20)
            .map(|i| Box::new(RecordingTask { id: i, remaining_chain: 0, log: log.clone() }) as Box<dyn Task>)
            .collect();
        run_to_completion(&manager, initial, 4);

        assert_eq!(log.lock().unwrap().len(), 20);
    }

    #[test]
    fn no_worker_needed_on_empty_queue() {
        let manager = TaskManager::new();
        assert!(!manager.is_need_more_worker());
    }
}
