/*
 * reactor.rs
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

//! One reactor thread: a `mio::Poll`, the connections bound to it (slab with
//! free-list reuse), and the head-of-queue write drain. Reactor 0 also owns
//! the accept socket and deals new connections round-robin across the pool.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::mpsc::{Receiver, SyncSender, TryRecvError, TrySendError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Buf;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use crate::error::EngineError;
use crate::filter::{CloseReason, Completion, ConnectionCtx, Event, FilterChain, Message, PassResult};
use crate::memory::{Buffer, MemoryManager};
use crate::server::ServerConfig;

use super::{next_connection_id, ChainFactory, Command};

pub(crate) const LISTENER_TOKEN: Token = Token(0);
pub const WAKER_TOKEN: Token = Token(1);
const TOKEN_BASE: usize = 2;

struct Conn {
    id: u64,
    stream: TcpStream,
    chain: FilterChain,
    ctx: ConnectionCtx,
    queue: VecDeque<(Buffer, Option<Completion>)>,
    writable_registered: bool,
    last_activity: Instant,
    closing: bool,
}

enum ReadOutcome {
    Eof,
    Pass(PassResult),
    Blocked,
    Retry,
}

pub(crate) struct Reactor {
    poll: Poll,
    events: Events,
    rx: Receiver<Command>,
    listener: Option<TcpListener>,
    peers: Vec<(SyncSender<Command>, Arc<mio::Waker>)>,
    next_peer: usize,
    config: Arc<ServerConfig>,
    memory: MemoryManager,
    chain_factory: ChainFactory,
    conns: Vec<Option<Conn>>,
    free: Vec<usize>,
    ids: HashMap<u64, usize>,
    draining: bool,
    stopping: bool,
}

impl Reactor {
    pub(crate) fn new(
        poll: Poll,
        rx: Receiver<Command>,
        listener: Option<std::net::TcpListener>,
        peers: Vec<(SyncSender<Command>, Arc<mio::Waker>)>,
        config: Arc<ServerConfig>,
        memory: MemoryManager,
        chain_factory: ChainFactory,
    ) -> io::Result<Self> {
        let listener = match listener {
            Some(l) => {
                let mut l = TcpListener::from_std(l);
                poll.registry()
                    .register(&mut l, LISTENER_TOKEN, Interest::READABLE)?;
                Some(l)
            }
            None => None,
        };
        Ok(Reactor {
            poll,
            events: Events::with_capacity(1024),
            rx,
            listener,
            peers,
            next_peer: 0,
            config,
            memory,
            chain_factory,
            conns: Vec::new(),
            free: Vec::new(),
            ids: HashMap::new(),
            draining: false,
            stopping: false,
        })
    }

    pub(crate) fn run(&mut self) {
        let tick = Duration::from_millis(500);
        loop {
            if let Err(e) = self.poll.poll(&mut self.events, Some(tick)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                log::warn!("poll failed: {}", e);
                break;
            }
            let ready: Vec<(Token, bool, bool)> = self
                .events
                .iter()
                .map(|e| {
                    (
                        e.token(),
                        e.is_readable() || e.is_read_closed(),
                        e.is_writable(),
                    )
                })
                .collect();
            for (token, readable, writable) in ready {
                match token {
                    LISTENER_TOKEN => self.accept_ready(),
                    WAKER_TOKEN => {}
                    Token(n) => {
                        let idx = n - TOKEN_BASE;
                        if writable && self.conns.get(idx).map(|c| c.is_some()).unwrap_or(false) {
                            self.flush(idx);
                        }
                        if readable && self.conns.get(idx).map(|c| c.is_some()).unwrap_or(false) {
                            self.handle_readable(idx);
                        }
                    }
                }
            }
            self.drain_commands();
            self.sweep_timeouts();
            if self.stopping {
                break;
            }
        }
        // Forced close of whatever is left.
        for idx in 0..self.conns.len() {
            self.close(idx, CloseReason::Cancelled);
        }
    }

    fn accept_ready(&mut self) {
        loop {
            let accepted = match self.listener.as_ref() {
                Some(l) => l.accept(),
                None => return,
            };
            match accepted {
                Ok((stream, _)) => {
                    if self.draining {
                        // New accepts refused while draining.
                        drop(stream);
                        continue;
                    }
                    self.dispatch_accepted(stream);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("accept failed: {}", e);
                    return;
                }
            }
        }
    }

    #[cfg(unix)]
    fn dispatch_accepted(&mut self, stream: TcpStream) {
        use std::os::fd::{FromRawFd, IntoRawFd};
        let id = next_connection_id();
        let target = if self.peers.is_empty() {
            0
        } else {
            let t = self.next_peer % self.peers.len();
            self.next_peer = self.next_peer.wrapping_add(1);
            t
        };
        if target == 0 {
            self.install(stream, id);
            return;
        }
        let std_stream = unsafe { std::net::TcpStream::from_raw_fd(stream.into_raw_fd()) };
        let (tx, waker) = &self.peers[target];
        match tx.try_send(Command::Register {
            stream: std_stream,
            id,
        }) {
            Ok(()) => {
                let _ = waker.wake();
            }
            Err(TrySendError::Full(Command::Register { stream, .. }))
            | Err(TrySendError::Disconnected(Command::Register { stream, .. })) => {
                // Peer unavailable; keep the connection here.
                self.install(TcpStream::from_std(stream), id);
            }
            Err(_) => {}
        }
    }

    #[cfg(not(unix))]
    fn dispatch_accepted(&mut self, stream: TcpStream) {
        let id = next_connection_id();
        self.install(stream, id);
    }

    fn install(&mut self, mut stream: TcpStream, id: u64) {
        let _ = stream.set_nodelay(true);
        let idx = match self.free.pop() {
            Some(i) => i,
            None => {
                self.conns.push(None);
                self.conns.len() - 1
            }
        };
        let token = Token(TOKEN_BASE + idx);
        if let Err(e) = self
            .poll
            .registry()
            .register(&mut stream, token, Interest::READABLE)
        {
            log::warn!("stream registration failed: {}", e);
            self.free.push(idx);
            return;
        }
        let mut ctx = ConnectionCtx::new(self.memory);
        ctx.peer_addr = stream.peer_addr().ok();
        ctx.local_addr = stream.local_addr().ok();
        let chain = (self.chain_factory)();
        self.conns[idx] = Some(Conn {
            id,
            stream,
            chain,
            ctx,
            queue: VecDeque::new(),
            writable_registered: false,
            last_activity: Instant::now(),
            closing: false,
        });
        self.ids.insert(id, idx);

        let result = match self.conns[idx].as_mut() {
            Some(conn) => conn.chain.execute_connect(&mut conn.ctx),
            None => return,
        };
        self.apply_pass(idx, result);
    }

    /// Queue a pass's output and flush. Returns true when the connection was
    /// closed as a result.
    fn apply_pass(&mut self, idx: usize, result: PassResult) -> bool {
        let had_error = result.error.is_some();
        {
            let conn = match self.conns.get_mut(idx).and_then(|c| c.as_mut()) {
                Some(c) => c,
                None => return true,
            };
            for op in result.writes {
                conn.queue.push_back((op.buffer, op.completion));
            }
            if had_error || conn.ctx.close_requested() {
                conn.closing = true;
            }
        }
        if let Some(err) = result.error {
            log::debug!("connection pass failed: {}", err);
        }
        self.flush(idx)
    }

    fn handle_readable(&mut self, idx: usize) {
        loop {
            let outcome = {
                let conn = match self.conns.get_mut(idx).and_then(|c| c.as_mut()) {
                    Some(c) => c,
                    None => return,
                };
                if conn.closing {
                    return;
                }
                let size = self.config.read_buffer_size;
                let mut block = self.memory.allocate(size);
                block.resize(size, 0);
                match conn.stream.read(&mut block[..]) {
                    Ok(0) => ReadOutcome::Eof,
                    Ok(n) => {
                        block.truncate(n);
                        conn.last_activity = Instant::now();
                        let message = Message::Buffer(Buffer::from(block));
                        ReadOutcome::Pass(conn.chain.execute_read(&mut conn.ctx, message))
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => ReadOutcome::Blocked,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => ReadOutcome::Retry,
                    Err(e) => {
                        log::debug!("read failed: {}", e);
                        ReadOutcome::Eof
                    }
                }
            };
            match outcome {
                ReadOutcome::Eof => {
                    self.close(idx, CloseReason::Remote);
                    return;
                }
                ReadOutcome::Pass(result) => {
                    if self.apply_pass(idx, result) {
                        return;
                    }
                }
                ReadOutcome::Blocked => return,
                ReadOutcome::Retry => continue,
            }
        }
    }

    /// Drain the head of the write queue; partial writes stay at the head
    /// and writable interest is registered. Returns true when the connection
    /// was closed.
    fn flush(&mut self, idx: usize) -> bool {
        enum Step {
            Close(CloseReason),
            Return(bool),
            Wrote,
        }
        loop {
            let step = {
                let Reactor { poll, conns, .. } = self;
                let conn = match conns.get_mut(idx).and_then(|c| c.as_mut()) {
                    Some(c) => c,
                    None => return true,
                };
                let token = Token(TOKEN_BASE + idx);
                let Conn {
                    stream,
                    queue,
                    writable_registered,
                    closing,
                    ..
                } = conn;
                match queue.front_mut() {
                    None => {
                        if *writable_registered {
                            if let Err(e) =
                                poll.registry().reregister(stream, token, Interest::READABLE)
                            {
                                log::warn!("reregister failed: {}", e);
                            }
                            *writable_registered = false;
                        }
                        if *closing {
                            Step::Close(CloseReason::Local)
                        } else {
                            Step::Return(false)
                        }
                    }
                    Some((buffer, _)) => {
                        let mut step = Step::Wrote;
                        while buffer.has_remaining() {
                            match stream.write(buffer.chunk()) {
                                Ok(0) => {
                                    step = Step::Close(CloseReason::Remote);
                                    break;
                                }
                                Ok(n) => buffer.advance(n),
                                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                                    if !*writable_registered {
                                        if let Err(e) = poll.registry().reregister(
                                            stream,
                                            token,
                                            Interest::READABLE | Interest::WRITABLE,
                                        ) {
                                            log::warn!("reregister failed: {}", e);
                                        }
                                        *writable_registered = true;
                                    }
                                    step = Step::Return(false);
                                    break;
                                }
                                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                                Err(e) => {
                                    log::debug!("write failed: {}", e);
                                    step = Step::Close(CloseReason::Remote);
                                    break;
                                }
                            }
                        }
                        if matches!(step, Step::Wrote) {
                            // Head fully written: completion fires in
                            // enqueue order.
                            if let Some((mut buffer, completion)) = queue.pop_front() {
                                buffer.try_dispose();
                                if let Some(c) = completion {
                                    c(Ok(()));
                                }
                            }
                        }
                        step
                    }
                }
            };
            match step {
                Step::Close(reason) => {
                    self.close(idx, reason);
                    return true;
                }
                Step::Return(closed) => return closed,
                Step::Wrote => continue,
            }
        }
    }

    fn drain_commands(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(Command::Register { stream, id }) => {
                    self.install(TcpStream::from_std(stream), id);
                }
                Ok(Command::Write {
                    id,
                    buffer,
                    completion,
                }) => {
                    let idx = self.ids.get(&id).copied();
                    let capacity = self.config.write_queue_capacity;
                    let queued = match idx.and_then(|i| self.conns[i].as_mut()) {
                        Some(c) if c.queue.len() < capacity => {
                            c.queue.push_back((buffer, completion));
                            true
                        }
                        Some(_) => {
                            if let Some(c) = completion {
                                c(Err(EngineError::limit("write queue full")));
                            }
                            false
                        }
                        None => {
                            if let Some(c) = completion {
                                c(Err(EngineError::Cancelled));
                            }
                            false
                        }
                    };
                    if queued {
                        if let Some(i) = idx {
                            self.flush(i);
                        }
                    }
                }
                Ok(Command::Resume { id }) => {
                    if let Some(idx) = self.ids.get(&id).copied() {
                        let result = {
                            let conn = match self.conns[idx].as_mut() {
                                Some(c) => c,
                                None => continue,
                            };
                            conn.chain.resume(&mut conn.ctx)
                        };
                        self.apply_pass(idx, result);
                    }
                }
                Ok(Command::Drain) => {
                    self.draining = true;
                    if let Some(mut l) = self.listener.take() {
                        let _ = self.poll.registry().deregister(&mut l);
                    }
                }
                Ok(Command::Stop) => {
                    self.stopping = true;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.stopping = true;
                    break;
                }
            }
        }
    }

    fn sweep_timeouts(&mut self) {
        let timeout = self.config.keep_alive_timeout;
        if timeout.is_zero() {
            return;
        }
        let now = Instant::now();
        let expired: Vec<usize> = self
            .conns
            .iter()
            .enumerate()
            .filter_map(|(i, c)| {
                c.as_ref().and_then(|c| {
                    if now.duration_since(c.last_activity) >= timeout {
                        Some(i)
                    } else {
                        None
                    }
                })
            })
            .collect();
        for idx in expired {
            let result = {
                let conn = match self.conns[idx].as_mut() {
                    Some(c) => c,
                    None => continue,
                };
                conn.chain.execute_event(&mut conn.ctx, Event::Timeout)
            };
            if !self.apply_pass(idx, result) {
                self.close(idx, CloseReason::Timeout);
            }
        }
    }

    fn close(&mut self, idx: usize, reason: CloseReason) {
        let mut conn = match self.conns.get_mut(idx).and_then(|c| c.take()) {
            Some(c) => c,
            None => return,
        };
        conn.chain.execute_close(&mut conn.ctx, reason);
        let _ = self.poll.registry().deregister(&mut conn.stream);
        for (mut buffer, completion) in conn.queue.drain(..) {
            buffer.try_dispose();
            if let Some(c) = completion {
                c(Err(EngineError::Cancelled));
            }
        }
        self.ids.remove(&conn.id);
        self.free.push(idx);
        log::debug!("connection {} closed: {:?}", conn.id, reason);
    }
}
