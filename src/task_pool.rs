//! A small pool of threads for offloading blocking work out of reactor
//! threads.
//!
//! One mutex-protected FIFO plus a condition variable: submitting wakes
//! exactly one waiter, shutdown flips the stop flag and broadcasts so all
//! waiters return. Tasks must not block indefinitely; there is no
//! per-task cancellation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use log::error;

type Task = Box<dyn FnOnce() + Send>;

pub struct TaskPool {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

struct Shared {
    tasks: Mutex<VecDeque<Task>>,
    available: Condvar,
    stopped: AtomicBool,
}

impl TaskPool {
    pub fn new(threads: usize) -> TaskPool {
        let shared = Arc::new(Shared {
            tasks: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            stopped: AtomicBool::new(false),
        });

        let mut handles = Vec::with_capacity(threads);
        for _ in 0..threads {
            let shared = shared.clone();
            match thread::Builder::new()
                .name("hive-task".into())
                .spawn(move || run(shared))
            {
                Ok(handle) => handles.push(handle),
                Err(err) => error!("cannot start a task pool thread: {}", err),
            }
        }

        TaskPool {
            shared,
            threads: handles,
        }
    }

    pub fn add<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut tasks = self.shared.tasks.lock().unwrap();
            tasks.push_back(Box::new(task));
        }
        self.shared.available.notify_one();
    }

    pub fn len(&self) -> usize {
        self.shared.tasks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops every thread once it finishes its current task and joins
    /// them. Queued tasks that no thread picked up are dropped.
    pub fn stop_and_wait(mut self) {
        self.shared.stopped.store(true, Ordering::Relaxed);
        self.shared.available.notify_all();

        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

fn run(shared: Arc<Shared>) {
    loop {
        let task = {
            let mut tasks = shared.tasks.lock().unwrap();
            loop {
                if shared.stopped.load(Ordering::Relaxed) {
                    return;
                }
                if let Some(task) = tasks.pop_front() {
                    break task;
                }
                tasks = shared.available.wait(tasks).unwrap();
            }
        };

        task();
    }
}
