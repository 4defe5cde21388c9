/*
 * mod.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Graticola, a non-blocking HTTP server framework.
 *
 * Graticola is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Graticola is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Graticola.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Non-blocking TCP transport: a small pool of reactor threads, each owning
//! a disjoint set of connections. All parsing and filter execution for a
//! connection runs on its owning reactor thread; the write queue is the only
//! cross-thread hand-off.

pub mod reactor;

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::{EngineError, EngineResult};
use crate::filter::{Completion, FilterChain};
use crate::memory::{Buffer, MemoryManager};
use crate::server::ServerConfig;

use reactor::Reactor;

/// Builds one filter chain per accepted or connected socket.
pub type ChainFactory = Arc<dyn Fn() -> FilterChain + Send + Sync>;

const LIFECYCLE_STOPPED: u8 = 0;
const LIFECYCLE_RUNNING: u8 = 1;
const LIFECYCLE_DRAINING: u8 = 2;

static CONNECTION_IDS: AtomicU64 = AtomicU64::new(1);

fn next_connection_id() -> u64 {
    CONNECTION_IDS.fetch_add(1, Ordering::Relaxed)
}

/// Commands delivered to a reactor through its command channel + waker.
pub(crate) enum Command {
    Register {
        stream: std::net::TcpStream,
        id: u64,
    },
    Write {
        id: u64,
        buffer: Buffer,
        completion: Option<Completion>,
    },
    Resume {
        id: u64,
    },
    /// Stop accepting; existing connections keep running.
    Drain,
    /// Close everything and exit the loop.
    Stop,
}

/// Handed to shutdown listeners; the transport waits until every listener
/// calls `ready()` or the grace deadline passes.
pub struct ShutdownContext {
    pending: Mutex<usize>,
    done: Condvar,
}

impl ShutdownContext {
    fn new(pending: usize) -> Self {
        ShutdownContext {
            pending: Mutex::new(pending),
            done: Condvar::new(),
        }
    }

    pub fn ready(&self) {
        let mut pending = self.pending.lock().unwrap();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.done.notify_all();
        }
    }

    fn wait(&self, deadline: Instant) {
        let mut pending = self.pending.lock().unwrap();
        while *pending > 0 {
            let now = Instant::now();
            if now >= deadline {
                log::warn!("shutdown grace elapsed with {} listeners pending", *pending);
                return;
            }
            let (guard, _) = self.done.wait_timeout(pending, deadline - now).unwrap();
            pending = guard;
        }
    }
}

/// Notified when a graceful shutdown begins.
pub trait ShutdownListener: Send + Sync {
    fn shutdown_requested(&self, ctx: &Arc<ShutdownContext>);
}

struct ReactorHandle {
    tx: SyncSender<Command>,
    waker: Arc<mio::Waker>,
    join: JoinHandle<()>,
}

/// Cross-thread handle for enqueuing writes on a connection. Producers get
/// back-pressure as a refused enqueue when the command channel is full.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: u64,
    tx: SyncSender<Command>,
    waker: Arc<mio::Waker>,
}

impl ConnectionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a buffer for the wire. Delivery and completion callbacks run on
    /// the owning reactor in enqueue order.
    pub fn write(&self, buffer: Buffer, completion: Option<Completion>) -> EngineResult<()> {
        self.tx
            .try_send(Command::Write {
                id: self.id,
                buffer,
                completion,
            })
            .map_err(|_| EngineError::limit("write queue full"))?;
        self.waker.wake().map_err(EngineError::from)
    }

    /// Resume a chain suspended mid-read.
    pub fn resume(&self) -> EngineResult<()> {
        self.tx
            .try_send(Command::Resume { id: self.id })
            .map_err(|_| EngineError::limit("command queue full"))?;
        self.waker.wake().map_err(EngineError::from)
    }
}

/// Selector-driven TCP transport.
pub struct TcpTransport {
    config: Arc<ServerConfig>,
    chain_factory: ChainFactory,
    memory: MemoryManager,
    listener: Option<std::net::TcpListener>,
    local_addr: Option<SocketAddr>,
    reactors: Vec<ReactorHandle>,
    lifecycle: Arc<AtomicU8>,
    shutdown_listeners: Vec<Arc<dyn ShutdownListener>>,
    next_reactor: AtomicU64,
}

impl TcpTransport {
    pub fn new(config: Arc<ServerConfig>, chain_factory: ChainFactory) -> Self {
        let memory = MemoryManager::new(config.read_buffer_size.max(1));
        TcpTransport {
            config,
            chain_factory,
            memory,
            listener: None,
            local_addr: None,
            reactors: Vec::new(),
            lifecycle: Arc::new(AtomicU8::new(LIFECYCLE_STOPPED)),
            shutdown_listeners: Vec::new(),
            next_reactor: AtomicU64::new(0),
        }
    }

    pub fn add_shutdown_listener(&mut self, listener: Arc<dyn ShutdownListener>) {
        self.shutdown_listeners.push(listener);
    }

    /// Bind the accept socket. Must precede `start`.
    pub fn bind(&mut self, addr: SocketAddr) -> io::Result<()> {
        let listener = std::net::TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        self.local_addr = Some(listener.local_addr()?);
        self.listener = Some(listener);
        Ok(())
    }

    /// Bound address (useful when binding to port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Spawn the reactor threads. Reactor 0 owns the accept socket and deals
    /// accepted connections round-robin across the pool.
    pub fn start(&mut self) -> io::Result<()> {
        if self.lifecycle.load(Ordering::SeqCst) != LIFECYCLE_STOPPED {
            return Err(io::Error::new(io::ErrorKind::Other, "already started"));
        }
        let threads = self.config.reactor_threads.max(1);
        let mut setups = Vec::with_capacity(threads);
        for _ in 0..threads {
            let poll = mio::Poll::new()?;
            let waker = Arc::new(mio::Waker::new(poll.registry(), reactor::WAKER_TOKEN)?);
            let (tx, rx) = sync_channel(self.config.write_queue_capacity);
            setups.push((poll, waker, tx, rx));
        }
        let peers: Vec<(SyncSender<Command>, Arc<mio::Waker>)> = setups
            .iter()
            .map(|(_, waker, tx, _)| (tx.clone(), waker.clone()))
            .collect();

        let mut listener = self.listener.take();
        for (i, (poll, waker, tx, rx)) in setups.into_iter().enumerate() {
            let reactor_listener = if i == 0 { listener.take() } else { None };
            let reactor_peers = if i == 0 { peers.clone() } else { Vec::new() };
            let mut reactor = Reactor::new(
                poll,
                rx,
                reactor_listener,
                reactor_peers,
                self.config.clone(),
                self.memory,
                self.chain_factory.clone(),
            )?;
            let join = std::thread::Builder::new()
                .name(format!("graticola-reactor-{}", i))
                .spawn(move || reactor.run())?;
            self.reactors.push(ReactorHandle { tx, waker, join });
        }
        self.lifecycle.store(LIFECYCLE_RUNNING, Ordering::SeqCst);
        log::debug!("transport started with {} reactor(s)", threads);
        Ok(())
    }

    /// Open an outbound connection and attach a fresh chain to it. The
    /// returned handle enqueues writes through the owning reactor.
    pub fn connect(&self, addr: SocketAddr) -> io::Result<ConnectionHandle> {
        if self.lifecycle.load(Ordering::SeqCst) != LIFECYCLE_RUNNING {
            return Err(io::Error::new(io::ErrorKind::Other, "transport not running"));
        }
        let stream = std::net::TcpStream::connect(addr)?;
        stream.set_nonblocking(true)?;
        let idx =
            (self.next_reactor.fetch_add(1, Ordering::Relaxed) as usize) % self.reactors.len();
        let handle = &self.reactors[idx];
        // The id is assigned here so the caller can address writes before
        // the reactor finishes registration.
        let id = next_connection_id();
        handle
            .tx
            .try_send(Command::Register { stream, id })
            .map_err(|_| io::Error::new(io::ErrorKind::WouldBlock, "command queue full"))?;
        handle.waker.wake()?;
        Ok(ConnectionHandle {
            id,
            tx: handle.tx.clone(),
            waker: handle.waker.clone(),
        })
    }

    /// Graceful shutdown: refuse new accepts, let listeners finish within
    /// `grace`, then close everything and join the reactors.
    pub fn shutdown(&mut self, grace: Duration) {
        if self
            .lifecycle
            .compare_exchange(
                LIFECYCLE_RUNNING,
                LIFECYCLE_DRAINING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }
        for r in &self.reactors {
            let _ = r.tx.try_send(Command::Drain);
            let _ = r.waker.wake();
        }
        if !self.shutdown_listeners.is_empty() {
            let ctx = Arc::new(ShutdownContext::new(self.shutdown_listeners.len()));
            for l in &self.shutdown_listeners {
                l.shutdown_requested(&ctx);
            }
            ctx.wait(Instant::now() + grace);
        }
        for r in self.reactors.drain(..) {
            let ReactorHandle { tx, waker, join } = r;
            // Retry while the command queue drains; the reactor wakes at
            // least once per tick.
            for _ in 0..100 {
                match tx.try_send(Command::Stop) {
                    Ok(()) | Err(TrySendError::Disconnected(_)) => break,
                    Err(TrySendError::Full(_)) => {
                        let _ = waker.wake();
                        std::thread::sleep(Duration::from_millis(10));
                    }
                }
            }
            let _ = waker.wake();
            drop(tx);
            let _ = join.join();
        }
        self.lifecycle.store(LIFECYCLE_STOPPED, Ordering::SeqCst);
        log::debug!("transport stopped");
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if self.lifecycle.load(Ordering::SeqCst) == LIFECYCLE_RUNNING {
            self.shutdown(Duration::from_millis(0));
        }
    }
}
