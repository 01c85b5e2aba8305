//! Delayed task runner owned by a [`Context`](super::Context)
//!
//! Used for work that must happen later without a thread of its own, such as
//! reopening a quarantined appender's destination.

use super::error::{LoggerError, Result};
use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Command {
    Schedule {
        id: u64,
        deadline: Instant,
        task: Task,
        cancelled: Arc<AtomicBool>,
    },
    Shutdown,
}

/// Handle to a pending task
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    cancelled: Arc<AtomicBool>,
}

impl ScheduledTask {
    /// Prevent the task from running if it has not started yet
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

struct Worker {
    sender: Sender<Command>,
    handle: thread::JoinHandle<()>,
}

/// Single background thread executing tasks at their deadline
///
/// The thread is spawned on first use. After [`Scheduler::shutdown`] every
/// pending task is dropped and further scheduling fails.
pub struct Scheduler {
    worker: Mutex<Option<Worker>>,
    stopped: AtomicBool,
    next_id: AtomicU64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            worker: Mutex::new(None),
            stopped: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
        }
    }

    /// Run `task` once after `delay`
    pub fn schedule<F>(&self, delay: Duration, task: F) -> Result<ScheduledTask>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.stopped.load(Ordering::Acquire) {
            return Err(LoggerError::Stopped("scheduler".to_string()));
        }
        let cancelled = Arc::new(AtomicBool::new(false));
        let command = Command::Schedule {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            deadline: Instant::now() + delay,
            task: Box::new(task),
            cancelled: Arc::clone(&cancelled),
        };

        let mut worker = self.worker.lock();
        if worker.is_none() {
            *worker = Some(Self::spawn_worker()?);
        }
        if let Some(w) = worker.as_ref() {
            w.sender
                .send(command)
                .map_err(|_| LoggerError::Stopped("scheduler".to_string()))?;
        }
        Ok(ScheduledTask { cancelled })
    }

    /// Drop pending tasks and join the worker thread
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.sender.send(Command::Shutdown);
            // a task may drop the last context reference from the worker itself
            if worker.handle.thread().id() == thread::current().id() {
                return;
            }
            if worker.handle.join().is_err() {
                eprintln!("[LOGGER ERROR] Scheduler thread panicked during shutdown");
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn spawn_worker() -> Result<Worker> {
        let (sender, receiver) = unbounded::<Command>();
        let handle = thread::Builder::new()
            .name("log-scheduler".to_string())
            .spawn(move || {
                let mut queue: BinaryHeap<Reverse<(Instant, u64)>> = BinaryHeap::new();
                let mut tasks: HashMap<u64, (Task, Arc<AtomicBool>)> = HashMap::new();

                loop {
                    let command = match queue.peek() {
                        Some(Reverse((deadline, _))) => receiver.recv_deadline(*deadline),
                        None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
                    };

                    match command {
                        Ok(Command::Schedule {
                            id,
                            deadline,
                            task,
                            cancelled,
                        }) => {
                            queue.push(Reverse((deadline, id)));
                            tasks.insert(id, (task, cancelled));
                        }
                        Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }

                    let now = Instant::now();
                    while let Some(Reverse((deadline, id))) = queue.peek().copied() {
                        if deadline > now {
                            break;
                        }
                        queue.pop();
                        if let Some((task, cancelled)) = tasks.remove(&id) {
                            if cancelled.load(Ordering::Acquire) {
                                continue;
                            }
                            let outcome =
                                std::panic::catch_unwind(std::panic::AssertUnwindSafe(task));
                            if outcome.is_err() {
                                eprintln!("[LOGGER ERROR] Scheduled task #{} panicked", id);
                            }
                        }
                    }
                }
            })
            .map_err(|e| LoggerError::io_operation("spawning scheduler", "scheduler", e))?;

        Ok(Worker { sender, handle })
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_tasks_run_in_deadline_order() {
        let scheduler = Scheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (delay, tag) in [(60u64, "late"), (10, "early"), (30, "middle")] {
            let order = Arc::clone(&order);
            scheduler
                .schedule(Duration::from_millis(delay), move || order.lock().push(tag))
                .unwrap();
        }

        thread::sleep(Duration::from_millis(200));
        assert_eq!(*order.lock(), vec!["early", "middle", "late"]);
        scheduler.shutdown();
    }

    #[test]
    fn test_cancelled_task_does_not_run() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = Arc::clone(&runs);
        let handle = scheduler
            .schedule(Duration::from_millis(50), move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        handle.cancel();

        thread::sleep(Duration::from_millis(120));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_schedule_after_shutdown_fails() {
        let scheduler = Scheduler::new();
        scheduler.shutdown();
        assert!(scheduler.schedule(Duration::ZERO, || {}).is_err());
    }

    #[test]
    fn test_panicking_task_does_not_kill_worker() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler
            .schedule(Duration::from_millis(5), || panic!("task failure"))
            .unwrap();
        let runs_clone = Arc::clone(&runs);
        scheduler
            .schedule(Duration::from_millis(20), move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        thread::sleep(Duration::from_millis(100));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
