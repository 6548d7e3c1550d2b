use crate::constants::SELECTOR_POLL_TIMEOUT;
use mio::{Events, Poll, Registry, Token, Waker};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, trace};

const WAKE_TOKEN: Token = Token(0);

/// Registered for ACCEPT readiness on a server socket.
pub trait Acceptor: Send {
    fn accept(&mut self, ctx: &mut SelectorContext, token: Token);
}

/// Registered for READ/WRITE readiness on an established or connecting
/// socket. The processor owns its own CONNECTING/OPEN state and
/// decides internally whether a writable event means "connect completed"
/// or "socket drained".
pub trait KeyHandler: Send {
    fn on_readable(&mut self, ctx: &mut SelectorContext, token: Token);
    fn on_writable(&mut self, ctx: &mut SelectorContext, token: Token);
    /// Invoked from inside the selector loop when this key is cancelled, so
    /// cleanup (closing the socket, resolving futures) never races a live
    /// selector dispatch.
    fn on_cancel(&mut self);
    /// Re-adds WRITE interest to this key's registration, called from a
    /// task enqueued by the processor's `wakeup_writer`.
    fn add_write_interest(&mut self, registry: &Registry, token: Token);
}

enum Registration {
    Acceptor(Box<dyn Acceptor>),
    Processor(Box<dyn KeyHandler>),
}

/// A unit of work run on the selector thread between polls: registration,
/// cancellation, or anything else that must not race the active `Poll`.
pub type Task = Box<dyn FnOnce(&mut SelectorContext) + Send>;

/// Mutable state a [`Task`] or readiness dispatch may touch, threaded
/// through instead of captured so `Selector::run`'s loop owns it exclusively.
pub struct SelectorContext<'a> {
    poll: &'a mut Poll,
    registrations: &'a mut HashMap<Token, Registration>,
}

impl<'a> SelectorContext<'a> {
    pub fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    pub fn register_acceptor(&mut self, token: Token, acceptor: Box<dyn Acceptor>) {
        self.registrations.insert(token, Registration::Acceptor(acceptor));
    }

    pub fn register_processor(&mut self, token: Token, processor: Box<dyn KeyHandler>) {
        self.registrations.insert(token, Registration::Processor(processor));
    }

    pub fn cancel(&mut self, token: Token) {
        if let Some(Registration::Processor(mut processor)) = self.registrations.remove(&token) {
            processor.on_cancel();
        }
    }

    pub fn processor_mut(&mut self, token: Token) -> Option<&mut Box<dyn KeyHandler>> {
        match self.registrations.get_mut(&token) {
            Some(Registration::Processor(p)) => Some(p),
            _ => None,
        }
    }

    /// Re-asserts WRITE interest on `token`'s processor, if it is still
    /// registered. A cancelled or not-yet-registered token is a benign
    /// race with `wakeup_writer` and is silently ignored.
    pub fn reassert_write_interest(&mut self, token: Token) {
        let registry = self.poll.registry();
        if let Some(Registration::Processor(processor)) = self.registrations.get_mut(&token) {
            processor.add_write_interest(registry, token);
        }
    }
}

/// Handle to a running selector thread's task queue and wakeup, cloneable
/// and `Send + Sync` so application/acceptor code on other threads can
/// enqueue work.
#[derive(Clone)]
pub struct SelectorHandle {
    tasks: Arc<Mutex<Vec<Task>>>,
    waker: Arc<Waker>,
    stopping: Arc<AtomicBool>,
}

impl SelectorHandle {
    pub fn submit(&self, task: Task) {
        self.tasks.lock().unwrap().push(task);
        let _ = self.waker.wake();
    }

    /// Re-asserts readiness dispatch without enqueuing a task; used by a key
    /// processor's `wakeup_writer` after it has already mutated its own
    /// interest set from an application thread's publish.
    pub fn wakeup(&self) {
        let _ = self.waker.wake();
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }
}

/// One I/O worker thread owning exactly one `mio::Poll` and the keys
/// registered on it.
pub struct SelectorThread {
    handle: SelectorHandle,
    join: Option<JoinHandle<()>>,
}

impl SelectorThread {
    pub fn spawn(name: String) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        let tasks: Arc<Mutex<Vec<Task>>> = Arc::new(Mutex::new(Vec::new()));
        let stopping = Arc::new(AtomicBool::new(false));

        let handle = SelectorHandle {
            tasks: tasks.clone(),
            waker: waker.clone(),
            stopping: stopping.clone(),
        };

        let thread_name = name.clone();
        let join = std::thread::Builder::new()
            .name(name)
            .spawn(move || Self::run(poll, tasks, stopping, thread_name))?;

        Ok(Self { handle, join: Some(join) })
    }

    pub fn handle(&self) -> &SelectorHandle {
        &self.handle
    }

    fn run(mut poll: Poll, tasks: Arc<Mutex<Vec<Task>>>, stopping: Arc<AtomicBool>, name: String) {
        let mut events = Events::with_capacity(256);
        let mut registrations: HashMap<Token, Registration> = HashMap::new();

        while !stopping.load(Ordering::Acquire) {
            if let Err(err) = poll.poll(&mut events, Some(SELECTOR_POLL_TIMEOUT)) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(thread = %name, %err, "selector poll failed");
                continue;
            }

            let pending: Vec<Task> = std::mem::take(&mut *tasks.lock().unwrap());
            for task in pending {
                let mut ctx = SelectorContext {
                    poll: &mut poll,
                    registrations: &mut registrations,
                };
                task(&mut ctx);
            }

            for event in events.iter() {
                let token = event.token();
                if token == WAKE_TOKEN {
                    continue;
                }
                let mut ctx = SelectorContext {
                    poll: &mut poll,
                    registrations: &mut registrations,
                };
                if event.is_readable() {
                    match ctx.registrations.get_mut(&token) {
                        Some(Registration::Acceptor(_)) => {
                            if let Some(Registration::Acceptor(mut acceptor)) = ctx.registrations.remove(&token) {
                                acceptor.accept(&mut ctx, token);
                                ctx.registrations.insert(token, Registration::Acceptor(acceptor));
                            }
                        }
                        Some(Registration::Processor(_)) => {
                            if let Some(mut processor) = Self::take_processor(&mut ctx, token) {
                                processor.on_readable(&mut ctx, token);
                                ctx.registrations.insert(token, Registration::Processor(processor));
                            }
                        }
                        None => trace!(?token, "readiness event for unknown token"),
                    }
                }
                if event.is_writable() {
                    if let Some(mut processor) = Self::take_processor(&mut ctx, token) {
                        processor.on_writable(&mut ctx, token);
                        ctx.registrations.insert(token, Registration::Processor(processor));
                    }
                }
            }
        }

        for (_, registration) in registrations.drain() {
            if let Registration::Processor(mut processor) = registration {
                processor.on_cancel();
            }
        }
        debug!(thread = %name, "selector thread stopped");
    }

    fn take_processor(ctx: &mut SelectorContext, token: Token) -> Option<Box<dyn KeyHandler>> {
        match ctx.registrations.remove(&token) {
            Some(Registration::Processor(p)) => Some(p),
            Some(other) => {
                ctx.registrations.insert(token, other);
                None
            }
            None => None,
        }
    }

    pub fn shutdown(mut self) {
        self.handle.stopping.store(true, Ordering::Release);
        self.handle.wakeup();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Fixed-size pool of selector threads; channels are bound to exactly one
/// worker for their lifetime.
pub struct SelectorPool {
    workers: Vec<SelectorThread>,
    next: AtomicUsize,
}

impl SelectorPool {
    pub fn new(size: usize) -> io::Result<Self> {
        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            workers.push(SelectorThread::spawn(format!("channels-selector-{i}"))?);
        }
        Ok(Self { workers, next: AtomicUsize::new(0) })
    }

    /// Round-robin next worker.
    pub fn next(&self) -> &SelectorHandle {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.workers[i].handle()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn shutdown(self) {
        let default_timeout = Duration::from_secs(5);
        for worker in &self.workers {
            worker.handle.stopping.store(true, Ordering::Release);
            worker.handle.wakeup();
        }
        for worker in self.workers {
            worker.shutdown();
        }
        let _ = default_timeout;
    }
}
