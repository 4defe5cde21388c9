/*
 * filter.rs
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

//! Bidirectional filter chain.
//!
//! Filter 0 is closest to the wire. Read passes run in index order, write
//! and close passes in reverse. Each filter returns a `NextAction` telling
//! the runtime to continue, stop (optionally stashing a remainder that is
//! prepended to the filter's next input), suspend, or re-run from a
//! position. A chain instance belongs to exactly one connection, so filter
//! state is single-threaded by construction.

use std::collections::VecDeque;
use std::net::SocketAddr;

use crate::attributes::AttributeHolder;
use crate::error::{EngineError, EngineResult};
use crate::http::content::HttpContent;
use crate::memory::{Buffer, MemoryManager};

/// The unit of work travelling through the chain.
pub enum Message {
    None,
    Buffer(Buffer),
    Content(HttpContent),
}

impl Message {
    pub fn take(&mut self) -> Message {
        std::mem::replace(self, Message::None)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Message::None)
    }
}

/// Verdict returned by each filter stage.
pub enum NextAction {
    /// Proceed to the next filter. A remainder is re-fed to this same filter
    /// once the current pass completes.
    Invoke { remainder: Option<Buffer> },
    /// Terminate the pass. A remainder is stashed and prepended to this
    /// filter's next incoming buffer.
    Stop { remainder: Option<Buffer> },
    /// Park the pass until `FilterChain::resume` is called.
    Suspend,
    /// Re-invoke from the given filter position with the current message.
    Rerun { position: usize },
}

impl NextAction {
    pub fn invoke() -> Self {
        NextAction::Invoke { remainder: None }
    }

    pub fn stop() -> Self {
        NextAction::Stop { remainder: None }
    }
}

/// Out-of-band events delivered through the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Timeout,
    ShutdownInitiated,
}

/// Why a connection is going away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed or reset.
    Remote,
    /// This side decided to close.
    Local,
    Timeout,
    /// Forced shutdown or cancellation.
    Cancelled,
    /// A filter error aborted the pass.
    Error,
}

/// Connection lifecycle as seen by filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Open,
    Closing,
    Closed,
}

/// The per-connection state filters may inspect and mutate. Owned by the
/// reactor thread that owns the connection.
pub struct ConnectionCtx {
    pub attributes: AttributeHolder,
    pub memory: MemoryManager,
    pub peer_addr: Option<SocketAddr>,
    pub local_addr: Option<SocketAddr>,
    pub state: ConnState,
    close_after_flush: bool,
}

impl ConnectionCtx {
    pub fn new(memory: MemoryManager) -> Self {
        ConnectionCtx {
            attributes: AttributeHolder::new(),
            memory,
            peer_addr: None,
            local_addr: None,
            state: ConnState::Open,
            close_after_flush: false,
        }
    }

    /// Close once all queued output has reached the socket.
    pub fn close_after_flush(&mut self) {
        self.close_after_flush = true;
    }

    pub fn close_requested(&self) -> bool {
        self.close_after_flush
    }
}

/// Completion callback for a queued write, run on the reactor thread once
/// the bytes reach the socket (or the write is abandoned).
pub type Completion = Box<dyn FnOnce(EngineResult<()>) + Send>;

/// A buffer bound for the socket, produced by a write pass.
pub struct WriteOp {
    pub buffer: Buffer,
    pub completion: Option<Completion>,
}

/// Context handed to each filter invocation.
pub struct FilterChainContext<'a> {
    pub message: Message,
    pub connection: &'a mut ConnectionCtx,
    current_index: usize,
    writes: Vec<(usize, Message, Option<Completion>)>,
}

impl<'a> FilterChainContext<'a> {
    /// Send a message down through the filters below the current one; the
    /// resulting bytes are queued on the connection.
    pub fn write(&mut self, message: Message) {
        self.writes.push((self.current_index, message, None));
    }

    pub fn write_with_completion(&mut self, message: Message, completion: Completion) {
        self.writes.push((self.current_index, message, Some(completion)));
    }
}

/// A message-processing stage. All hooks default to pass-through.
pub trait Filter: Send {
    fn handle_read(&mut self, _ctx: &mut FilterChainContext) -> EngineResult<NextAction> {
        Ok(NextAction::invoke())
    }

    fn handle_write(&mut self, _ctx: &mut FilterChainContext) -> EngineResult<NextAction> {
        Ok(NextAction::invoke())
    }

    fn handle_connect(&mut self, _ctx: &mut FilterChainContext) -> EngineResult<NextAction> {
        Ok(NextAction::invoke())
    }

    fn handle_event(
        &mut self,
        _ctx: &mut FilterChainContext,
        _event: Event,
    ) -> EngineResult<NextAction> {
        Ok(NextAction::invoke())
    }

    fn handle_close(&mut self, _ctx: &mut FilterChainContext, _reason: CloseReason) {}
}

/// Result of one chain pass: bytes to queue plus the error, if any, that
/// aborted the pass. Writes collected before the failure are still flushed
/// so a best-effort error response can reach the peer.
pub struct PassResult {
    pub writes: Vec<WriteOp>,
    pub error: Option<EngineError>,
}

impl PassResult {
    fn ok(writes: Vec<WriteOp>) -> Self {
        PassResult {
            writes,
            error: None,
        }
    }
}

/// Ordered pipeline of filters plus the per-filter remainder stash.
pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
    stash: Vec<Option<Buffer>>,
    suspended: Option<(usize, Message)>,
}

impl FilterChain {
    pub fn new(filters: Vec<Box<dyn Filter>>) -> Self {
        let stash = filters.iter().map(|_| None).collect();
        FilterChain {
            filters,
            stash,
            suspended: None,
        }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.is_some()
    }

    /// Drive a read pass starting at filter 0 with bytes off the wire.
    pub fn execute_read(&mut self, conn: &mut ConnectionCtx, message: Message) -> PassResult {
        if self.suspended.is_some() {
            // A suspended chain buffers nothing; the caller should not feed
            // reads until resume. Stash at filter 0 to preserve byte order.
            if let Message::Buffer(b) = message {
                let prev = self.stash[0].take();
                self.stash[0] = Some(Buffer::append(prev, b));
            }
            return PassResult::ok(Vec::new());
        }
        self.run_read_from(conn, 0, message)
    }

    /// Resume a suspended read pass at the filter after the suspension point.
    pub fn resume(&mut self, conn: &mut ConnectionCtx) -> PassResult {
        match self.suspended.take() {
            Some((idx, message)) => self.run_read_from(conn, idx + 1, message),
            None => PassResult::ok(Vec::new()),
        }
    }

    fn run_read_from(
        &mut self,
        conn: &mut ConnectionCtx,
        start: usize,
        message: Message,
    ) -> PassResult {
        let mut out = Vec::new();
        let mut pending: VecDeque<(usize, Message)> = VecDeque::new();
        pending.push_back((start, message));

        while let Some((begin, mut message)) = pending.pop_front() {
            let mut idx = begin;
            while idx < self.filters.len() {
                // Prepend any stashed remainder to an incoming buffer.
                if let Some(stashed) = self.stash[idx].take() {
                    message = match message {
                        Message::Buffer(b) => Message::Buffer(Buffer::append(Some(stashed), b)),
                        Message::None => Message::Buffer(stashed),
                        other => {
                            self.stash[idx] = Some(stashed);
                            other
                        }
                    };
                }

                let mut ctx = FilterChainContext {
                    message,
                    connection: &mut *conn,
                    current_index: idx,
                    writes: Vec::new(),
                };
                let result = self.filters[idx].handle_read(&mut ctx);
                message = ctx.message.take();
                let writes = std::mem::take(&mut ctx.writes);
                drop(ctx);

                if let Some(err) = self.drain_writes(conn, writes, &mut out) {
                    self.abort_pass(conn, &err);
                    return PassResult {
                        writes: out,
                        error: Some(err),
                    };
                }

                match result {
                    Ok(NextAction::Invoke { remainder }) => {
                        if let Some(rem) = remainder {
                            pending.push_back((idx, Message::Buffer(rem)));
                        }
                        idx += 1;
                    }
                    Ok(NextAction::Stop { remainder }) => {
                        if let Some(rem) = remainder {
                            let prev = self.stash[idx].take();
                            self.stash[idx] = Some(Buffer::append(prev, rem));
                        }
                        break;
                    }
                    Ok(NextAction::Suspend) => {
                        self.suspended = Some((idx, message));
                        return PassResult::ok(out);
                    }
                    Ok(NextAction::Rerun { position }) => {
                        idx = position;
                    }
                    Err(err) => {
                        self.abort_pass(conn, &err);
                        return PassResult {
                            writes: out,
                            error: Some(err),
                        };
                    }
                }
            }
        }
        PassResult::ok(out)
    }

    /// Run collected write requests down through the filters below each
    /// initiator. Returns the first error, if any.
    fn drain_writes(
        &mut self,
        conn: &mut ConnectionCtx,
        writes: Vec<(usize, Message, Option<Completion>)>,
        out: &mut Vec<WriteOp>,
    ) -> Option<EngineError> {
        for (below, message, completion) in writes {
            match self.run_write_pass(conn, below, message) {
                Ok(Some(buffer)) => out.push(WriteOp { buffer, completion }),
                Ok(None) => {
                    if let Some(c) = completion {
                        c(Ok(()));
                    }
                }
                Err(e) => {
                    if let Some(c) = completion {
                        c(Err(EngineError::Cancelled));
                    }
                    return Some(e);
                }
            }
        }
        None
    }

    /// Write pass in reverse order over filters below `from`. Returns the
    /// final wire buffer, or None when a filter absorbed the message.
    fn run_write_pass(
        &mut self,
        conn: &mut ConnectionCtx,
        from: usize,
        message: Message,
    ) -> EngineResult<Option<Buffer>> {
        let mut message = message;
        for idx in (0..from).rev() {
            let mut ctx = FilterChainContext {
                message,
                connection: &mut *conn,
                current_index: idx,
                writes: Vec::new(),
            };
            let result = self.filters[idx].handle_write(&mut ctx);
            message = ctx.message.take();
            if !ctx.writes.is_empty() {
                return Err(EngineError::internal("nested write inside a write pass"));
            }
            match result? {
                NextAction::Invoke { remainder: None } => {}
                NextAction::Stop { remainder: None } => return Ok(None),
                _ => {
                    return Err(EngineError::internal(
                        "unsupported action in write pass",
                    ))
                }
            }
        }
        match message {
            Message::Buffer(b) => Ok(Some(b)),
            Message::None => Ok(None),
            Message::Content(_) => Err(EngineError::internal(
                "write pass ended without serializing content",
            )),
        }
    }

    /// Write initiated from outside the chain (e.g. application code):
    /// passes through every filter in reverse order.
    pub fn execute_write(&mut self, conn: &mut ConnectionCtx, message: Message) -> PassResult {
        let from = self.filters.len();
        match self.run_write_pass(conn, from, message) {
            Ok(Some(buffer)) => PassResult::ok(vec![WriteOp {
                buffer,
                completion: None,
            }]),
            Ok(None) => PassResult::ok(Vec::new()),
            Err(e) => PassResult {
                writes: Vec::new(),
                error: Some(e),
            },
        }
    }

    /// Connect notification, in index order.
    pub fn execute_connect(&mut self, conn: &mut ConnectionCtx) -> PassResult {
        self.run_event_like(conn, None)
    }

    /// Out-of-band event, in index order.
    pub fn execute_event(&mut self, conn: &mut ConnectionCtx, event: Event) -> PassResult {
        self.run_event_like(conn, Some(event))
    }

    fn run_event_like(&mut self, conn: &mut ConnectionCtx, event: Option<Event>) -> PassResult {
        let mut out = Vec::new();
        for idx in 0..self.filters.len() {
            let mut ctx = FilterChainContext {
                message: Message::None,
                connection: &mut *conn,
                current_index: idx,
                writes: Vec::new(),
            };
            let result = match event {
                Some(ev) => self.filters[idx].handle_event(&mut ctx, ev),
                None => self.filters[idx].handle_connect(&mut ctx),
            };
            let writes = std::mem::take(&mut ctx.writes);
            drop(ctx);
            if let Some(err) = self.drain_writes(conn, writes, &mut out) {
                return PassResult {
                    writes: out,
                    error: Some(err),
                };
            }
            match result {
                Ok(NextAction::Invoke { .. }) => {}
                Ok(NextAction::Stop { .. }) => break,
                Ok(NextAction::Suspend) | Ok(NextAction::Rerun { .. }) => break,
                Err(err) => {
                    return PassResult {
                        writes: out,
                        error: Some(err),
                    };
                }
            }
        }
        PassResult::ok(out)
    }

    /// Close notification, in reverse filter order. Never fails; filters
    /// release per-connection state here.
    pub fn execute_close(&mut self, conn: &mut ConnectionCtx, reason: CloseReason) {
        conn.state = ConnState::Closing;
        for idx in (0..self.filters.len()).rev() {
            let mut ctx = FilterChainContext {
                message: Message::None,
                connection: &mut *conn,
                current_index: idx,
                writes: Vec::new(),
            };
            self.filters[idx].handle_close(&mut ctx, reason);
        }
        for st in self.stash.iter_mut() {
            if let Some(mut b) = st.take() {
                b.try_dispose();
            }
        }
        conn.state = ConnState::Closed;
    }

    fn abort_pass(&mut self, conn: &mut ConnectionCtx, err: &EngineError) {
        log::debug!("filter pass aborted: {}", err);
        conn.close_after_flush();
    }
}
