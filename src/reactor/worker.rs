use std::any::Any;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, warn};
use slab::Slab;

use crate::clock;
use crate::poller::{EpollOpt, Events, Poller, Ready, Token};
use crate::queue::Queue;

use super::event::{Context, Dispatch, ResumeMsg, WorkEvent};

const WAKER: Token = Token(usize::MAX);

/// Builds the per-worker scratch every worker is constructed with. The
/// scratch is what handlers reach through [`Context::scratch_mut`] for
/// buffer pools and tuning knobs.
pub trait ScratchFactory: Send + Sync {
    fn create(&self) -> Box<dyn Any + Send>;
}

/// A reactor thread: one poller, one deadline-ordered timeout list, and
/// the events that live on it. Connections never migrate off the worker
/// that accepted them.
pub struct Worker {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

struct Shared {
    poller: Poller,
    resumes: Queue<ResumeMsg>,
    stop: AtomicBool,
    inner: Mutex<Inner>,
}

struct Inner {
    slab: Slab<Entry>,
    scratch: Box<dyn Any + Send>,
    head: Option<usize>,
    tail: Option<usize>,
}

struct Entry {
    event: Box<dyn WorkEvent>,
    prev: Option<usize>,
    next: Option<usize>,
    linked: bool,
    strikes: u8,
}

impl Worker {
    /// Starts the worker thread. `queue_len` bounds the ready batch per
    /// tick.
    pub fn spawn(queue_len: usize, scratch: Box<dyn Any + Send>) -> io::Result<Worker> {
        let poller = Poller::new()?;
        let resumes: Queue<ResumeMsg> = Queue::unbounded()?;
        poller.add(&resumes, WAKER, Ready::readable(), EpollOpt::level())?;

        let shared = Arc::new(Shared {
            poller,
            resumes,
            stop: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                slab: Slab::new(),
                scratch,
                head: None,
                tail: None,
            }),
        });

        let run_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("hive-worker".into())
            .spawn(move || run(run_shared, queue_len))?;

        Ok(Worker {
            shared,
            handle: Some(handle),
        })
    }

    /// Registers `event` and inserts it into the timeout list. On a
    /// registration failure the event is handed back so the caller can
    /// dispose of its descriptor.
    pub fn add(&self, event: Box<dyn WorkEvent>) -> Result<(), Box<dyn WorkEvent>> {
        let mut inner = self.shared.inner.lock().unwrap();
        let mut added = Vec::new();

        let res = insert_event(&mut inner, &self.shared, event, &mut added);
        flush_added(&mut inner, &self.shared, &mut added);

        res
    }

    /// Asks the worker to exit; it drains and destroys every event it
    /// owns, closing their descriptors.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        let _ = self.shared.resumes.wake();
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

fn run(shared: Arc<Shared>, queue_len: usize) {
    let mut events = Events::with_capacity(queue_len);
    let mut added: Vec<Box<dyn WorkEvent>> = Vec::new();
    let mut last_check = 0i64;

    loop {
        if shared.stop.load(Ordering::Relaxed) {
            break;
        }

        if let Err(err) = shared
            .poller
            .wait(&mut events, Some(Duration::from_secs(1)))
        {
            error!("poller wait failed: {}", err);
            continue;
        }

        let mut inner = shared.inner.lock().unwrap();

        for i in 0..events.len() {
            let event = match events.get(i) {
                Some(ev) => ev,
                None => break,
            };

            if event.token() == WAKER {
                let _ = shared.resumes.finish();
                continue;
            }

            drive(
                &mut inner,
                &shared,
                &mut added,
                usize::from(event.token()),
                Work::Call(event.readiness()),
            );
        }

        while let Some(msg) = shared.resumes.try_pop() {
            drive(
                &mut inner,
                &shared,
                &mut added,
                usize::from(msg.token),
                Work::Resume(msg.payload),
            );
        }

        flush_added(&mut inner, &shared, &mut added);

        let now = clock::now();
        if now != last_check {
            last_check = now;
            sweep(&mut inner, now);
        }

        drop(inner);
    }

    let mut inner = shared.inner.lock().unwrap();
    inner.slab.clear();
    inner.head = None;
    inner.tail = None;
}

enum Work {
    Call(Ready),
    Resume(Box<dyn Any + Send>),
}

fn drive(
    inner: &mut Inner,
    shared: &Shared,
    added: &mut Vec<Box<dyn WorkEvent>>,
    key: usize,
    work: Work,
) {
    let result = {
        let entry = match inner.slab.get_mut(key) {
            Some(entry) => entry,
            None => return,
        };

        let mut ctx = Context {
            poller: &shared.poller,
            token: Token(key),
            scratch: &mut *inner.scratch,
            resumes: &shared.resumes,
            added,
        };

        match work {
            Work::Call(ready) => entry.event.call(ready, &mut ctx),
            Work::Resume(payload) => entry.event.resume(payload, &mut ctx),
        }
    };

    match result {
        Dispatch::Change => {
            inner.unlink(key);
            inner.link_sorted(key);
        }
        Dispatch::Finished => {
            inner.unlink(key);
            inner.slab.remove(key);
        }
        Dispatch::Skip => {}
    }
}

fn insert_event(
    inner: &mut Inner,
    shared: &Shared,
    mut event: Box<dyn WorkEvent>,
    added: &mut Vec<Box<dyn WorkEvent>>,
) -> Result<(), Box<dyn WorkEvent>> {
    let key = inner.slab.vacant_key();

    if let Err(err) = event.registration().apply(&shared.poller, Token(key)) {
        warn!("event registration failed: {}", err);
        return Err(event);
    }

    let key = inner.slab.insert(Entry {
        event,
        prev: None,
        next: None,
        linked: false,
        strikes: 0,
    });

    {
        let entry = &mut inner.slab[key];
        let mut ctx = Context {
            poller: &shared.poller,
            token: Token(key),
            scratch: &mut *inner.scratch,
            resumes: &shared.resumes,
            added,
        };
        entry.event.attached(&mut ctx);
    }

    inner.link_sorted(key);

    Ok(())
}

fn flush_added(inner: &mut Inner, shared: &Shared, added: &mut Vec<Box<dyn WorkEvent>>) {
    while let Some(event) = added.pop() {
        // a registration failure drops the event, closing its descriptor
        let _ = insert_event(inner, shared, event, added);
    }
}

fn sweep(inner: &mut Inner, now: i64) {
    let mut cur = inner.head;

    while let Some(key) = cur {
        if inner.slab[key].event.deadline() > now {
            break;
        }

        let next = inner.slab[key].next;
        let finished = inner.slab[key].event.is_finished();

        if finished || inner.slab[key].strikes >= 1 {
            inner.unlink(key);
            inner.slab.remove(key);
        } else {
            inner.slab[key].strikes += 1;
        }

        cur = next;
    }
}

impl Inner {
    /// Inserts `key` so deadlines are non-decreasing from head to tail;
    /// fresh deadlines are the largest, so this is usually an append.
    fn link_sorted(&mut self, key: usize) {
        let deadline = self.slab[key].event.deadline();

        let mut at = self.tail;
        while let Some(cur) = at {
            if self.slab[cur].event.deadline() <= deadline {
                break;
            }
            at = self.slab[cur].prev;
        }

        match at {
            Some(cur) => {
                let next = self.slab[cur].next;
                self.slab[key].prev = Some(cur);
                self.slab[key].next = next;
                self.slab[cur].next = Some(key);
                match next {
                    Some(n) => self.slab[n].prev = Some(key),
                    None => self.tail = Some(key),
                }
            }
            None => {
                let old_head = self.head;
                self.slab[key].prev = None;
                self.slab[key].next = old_head;
                match old_head {
                    Some(n) => self.slab[n].prev = Some(key),
                    None => self.tail = Some(key),
                }
                self.head = Some(key);
            }
        }

        self.slab[key].linked = true;
    }

    fn unlink(&mut self, key: usize) {
        if !self.slab[key].linked {
            return;
        }

        let prev = self.slab[key].prev;
        let next = self.slab[key].next;

        match prev {
            Some(p) => self.slab[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slab[n].prev = prev,
            None => self.tail = prev,
        }

        self.slab[key].prev = None;
        self.slab[key].next = None;
        self.slab[key].linked = false;
    }
}
