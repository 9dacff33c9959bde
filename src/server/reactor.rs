//! The evented loop: a mio poll over the listener and its
//! connections, plus a deadline queue providing one-shot and
//! recurring timers.
//!
//! Everything here is single-threaded; connections, the router tree
//! and timers are only ever touched from `run`'s callbacks. Fan-out
//! across CPUs is process-level: each worker process runs its own
//! `Worker` with its own router copy.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use log::{debug, info, trace};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use crate::config::ServerConfig;
use crate::router::Router;

use super::connection::{Connection, ConnFlag};

const LISTENER: Token = Token(0);
const EVENTS_CAPACITY: usize = 1024;

/// Identifies a scheduled timer so it can be cancelled.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TimerToken(u64);

enum TimerKind {
    Once(Option<Box<dyn FnOnce()>>),
    Repeat(Duration, Box<dyn Fn()>),
}

struct TimerEntry {
    token: TimerToken,
    deadline: Instant,
    kind: TimerKind,
}

#[derive(Default)]
struct TimerQueue {
    entries: Vec<TimerEntry>,
    next_id: u64,
}

/// Cloneable handle to the loop's timer queue. Handlers capture one
/// to schedule callbacks (a deferred resume, a delayed policy
/// decision) back onto the reactor.
#[derive(Clone, Default)]
pub struct LoopHandle {
    queue: Rc<RefCell<TimerQueue>>,
}

impl LoopHandle {
    pub fn new() -> LoopHandle {
        LoopHandle::default()
    }

    /// One-shot timer.
    pub fn set_timeout<F>(&self, delay: Duration, f: F) -> TimerToken
        where F: FnOnce() + 'static
    {
        self.push(delay, TimerKind::Once(Some(Box::new(f))))
    }

    /// Recurring timer; fires every `every` until cancelled.
    pub fn set_interval<F>(&self, every: Duration, f: F) -> TimerToken
        where F: Fn() + 'static
    {
        self.push(every, TimerKind::Repeat(every, Box::new(f)))
    }

    pub fn cancel(&self, token: TimerToken) {
        self.queue
            .borrow_mut()
            .entries
            .retain(|e| e.token != token);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue
            .borrow()
            .entries
            .iter()
            .map(|e| e.deadline)
            .min()
    }

    /// Run every due timer. Callbacks run with the queue unborrowed,
    /// so they are free to schedule more timers. Returns the number
    /// fired.
    pub fn fire_due(&self) -> usize {
        let now = Instant::now();
        let mut fired = 0;
        loop {
            let due = {
                let mut queue = self.queue.borrow_mut();
                match queue
                    .entries
                    .iter()
                    .position(|e| e.deadline <= now)
                {
                    Some(idx) => queue.entries.swap_remove(idx),
                    None => break,
                }
            };
            fired += 1;
            match due.kind {
                TimerKind::Once(mut f) => {
                    if let Some(f) = f.take() {
                        f();
                    }
                }
                TimerKind::Repeat(every, f) => {
                    f();
                    let mut queue = self.queue.borrow_mut();
                    queue.entries.push(TimerEntry {
                        token: due.token,
                        deadline: now + every,
                        kind: TimerKind::Repeat(every, f),
                    });
                }
            }
        }
        fired
    }

    fn push(&self, delay: Duration, kind: TimerKind) -> TimerToken {
        let mut queue = self.queue.borrow_mut();
        queue.next_id += 1;
        let token = TimerToken(queue.next_id);
        queue.entries.push(TimerEntry {
            token,
            deadline: Instant::now() + delay,
            kind,
        });
        token
    }
}

type ConnRef = Rc<RefCell<Connection<TcpStream>>>;
type ConnMap = Rc<RefCell<HashMap<u64, ConnRef>>>;

/// One reactor: a listener, its connections and the timer queue.
pub struct Worker {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    conns: ConnMap,
    next_id: u64,
    timers: LoopHandle,
    router: Rc<Router>,
    cfg: Rc<ServerConfig>,
}

impl Worker {
    pub fn bind(addr: &str, router: Rc<Router>, cfg: Rc<ServerConfig>,
                timers: LoopHandle)
        -> io::Result<Worker>
    {
        let addr = addr.parse().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidInput,
                           format!("bad listen address: {}", e))
        })?;
        let mut listener = TcpListener::bind(addr)?;
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        info!("listening on {}", addr);
        Ok(Worker {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            listener,
            conns: Rc::new(RefCell::new(HashMap::new())),
            next_id: 0,
            timers,
            router,
            cfg,
        })
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the loop forever.
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            self.turn()?;
        }
    }

    /// One poll cycle: I/O events, then timers, then housekeeping.
    pub fn turn(&mut self) -> io::Result<()> {
        let timeout = self
            .timers
            .next_deadline()
            .map(|d| d.saturating_duration_since(Instant::now()))
            .map(|d| d.min(self.cfg.keep_alive_timeout))
            .unwrap_or(self.cfg.keep_alive_timeout);
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }

        let mut accepted = false;
        for event in self.events.iter() {
            match event.token() {
                LISTENER => accepted = true,
                Token(id) => {
                    let conn = {
                        self.conns.borrow().get(&(id as u64)).cloned()
                    };
                    let conn = match conn {
                        Some(conn) => conn,
                        None => continue,
                    };
                    if event.is_error() {
                        Connection::on_error(&conn, false);
                        continue;
                    }
                    if event.is_readable() || event.is_read_closed() {
                        Connection::on_read(&conn);
                    }
                    if event.is_writable() {
                        Connection::on_write(&conn);
                    }
                }
            }
        }
        if accepted {
            self.accept_pending();
        }

        self.timers.fire_due();
        self.housekeeping();
        Ok(())
    }

    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    self.next_id += 1;
                    let id = self.next_id;
                    let token = Token(id as usize);
                    if let Err(e) = self.poll.registry().register(
                        &mut stream,
                        token,
                        Interest::READABLE | Interest::WRITABLE,
                    ) {
                        debug!("[{}] register failed: {}", id, e);
                        continue;
                    }
                    trace!("[{}] accepted {}", id, peer);
                    let conns = Rc::downgrade(&self.conns);
                    let conn = Connection::create(
                        id,
                        stream,
                        self.router.clone(),
                        self.cfg.clone(),
                        self.timers.clone(),
                        Some(Box::new(move |id| {
                            remove_conn(&conns, id);
                        })),
                    );
                    self.conns.borrow_mut().insert(id, conn);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    break;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                    continue;
                }
                Err(e) => {
                    debug!("accept error: {}", e);
                    break;
                }
            }
        }
    }

    /// Reconcile poll interest with each connection's state, enforce
    /// idle timeouts, and drop closed connections.
    fn housekeeping(&mut self) {
        let now = Instant::now();
        let ids: Vec<u64> =
            self.conns.borrow().keys().cloned().collect();
        for id in ids {
            let conn = {
                self.conns.borrow().get(&id).cloned()
            };
            let conn = match conn {
                Some(conn) => conn,
                None => continue,
            };
            if conn.borrow().idle_expired(now) {
                Connection::on_error(&conn, true);
            }
            let mut c = conn.borrow_mut();
            if c.is_closed() {
                drop(c);
                self.conns.borrow_mut().remove(&id);
                continue;
            }
            let mut interest = None;
            if c.wants_read() {
                interest = Some(Interest::READABLE);
            }
            if c.wants_write() {
                interest = Some(match interest {
                    Some(i) => i | Interest::WRITABLE,
                    None => Interest::WRITABLE,
                });
            }
            let token = Token(c.id() as usize);
            if let Some(interest) = interest {
                let _ = self.poll.registry().reregister(
                    c.sock_mut(),
                    token,
                    interest,
                );
            }
            // file transfers whose socket never blocks would stall
            // waiting for a writable edge; keep them moving
            if c.flags().is(ConnFlag::SendingFile) {
                drop(c);
                Connection::on_write(&conn);
            }
        }
    }
}

fn remove_conn(conns: &Weak<RefCell<HashMap<u64, ConnRef>>>, id: u64) {
    if let Some(conns) = conns.upgrade() {
        conns.borrow_mut().remove(&id);
    }
}
