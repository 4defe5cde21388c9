/*
 * server_filter.rs
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

//! HTTP codec filter: raw buffers in, `HttpContent` up; response content
//! down, wire bytes out. Drives the request parser, applies the
//! content-encoding chains, enforces `Expect: 100-continue` and the
//! keep-alive policy, and turns parse failures into a minimal error
//! response followed by close.

use bytes::{Buf, Bytes, BytesMut};
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::filter::{
    ConnectionCtx, Event, Filter, FilterChainContext, Message, NextAction,
};
use crate::http::content::{HttpContent, PacketRef};
use crate::http::encoding::{ContentEncoding, EncodingRegistry};
use crate::http::headers::HeaderMap;
use crate::http::parser::{ParseState, RequestEvents, RequestParser};
use crate::http::request::{HttpRequestPacket, Method, ProcessingState, Version};
use crate::http::response::HttpResponsePacket;
use crate::http::serializer::ResponseSerializer;
use crate::memory::Buffer;
use crate::server::ServerConfig;

/// Bridges parser callbacks into the filter's per-request scratch state.
struct Collector<'a> {
    line: &'a mut Option<(Method, String, Version)>,
    headers: &'a mut HeaderMap,
    body: &'a mut Vec<Bytes>,
    trailers: &'a mut Vec<(String, String)>,
}

impl RequestEvents for Collector<'_> {
    fn request_line(&mut self, method: Method, uri: &str, version: Version) -> EngineResult<()> {
        *self.line = Some((method, uri.to_string(), version));
        Ok(())
    }

    fn header(&mut self, name: &str, value: &str) {
        self.headers.add(name, value);
    }

    fn header_continuation(&mut self, more: &str) {
        self.headers.fold_last(more);
    }

    fn headers_complete(&mut self) {}

    fn body_chunk(&mut self, data: Bytes) {
        self.body.push(data);
    }

    fn trailer(&mut self, name: &str, value: &str) {
        self.trailers.push((name.to_string(), value.to_string()));
    }

    fn message_complete(&mut self) {}
}

/// Server-side HTTP/1.x codec. One instance per connection.
pub struct HttpCodecFilter {
    config: Arc<ServerConfig>,
    encodings: Arc<EncodingRegistry>,
    parser: RequestParser,
    serializer: ResponseSerializer,
    work: BytesMut,
    state: ProcessingState,

    // Parser scratch, filled through `Collector`.
    line: Option<(Method, String, Version)>,
    headers: HeaderMap,
    body: Vec<Bytes>,
    trailers: Vec<(String, String)>,

    // Per-request decode state.
    current: Option<Arc<HttpRequestPacket>>,
    decoders: Vec<Box<dyn ContentEncoding>>,
    discarding: bool,
    skipped: u64,

    // Per-response encode state.
    response_head_written: bool,
    encoders: Vec<Box<dyn ContentEncoding>>,
}

impl HttpCodecFilter {
    pub fn new(config: Arc<ServerConfig>, encodings: Arc<EncodingRegistry>) -> Self {
        let parser = RequestParser::new(
            config.max_request_line_size,
            config.max_request_header_size,
        );
        HttpCodecFilter {
            config,
            encodings,
            parser,
            serializer: ResponseSerializer::new(),
            work: BytesMut::new(),
            state: ProcessingState {
                keep_alive: true,
                ..ProcessingState::default()
            },
            line: None,
            headers: HeaderMap::new(),
            body: Vec::new(),
            trailers: Vec::new(),
            current: None,
            decoders: Vec::new(),
            discarding: false,
            skipped: 0,
            response_head_written: false,
            encoders: Vec::new(),
        }
    }

    fn parse_step(&mut self) -> EngineResult<()> {
        let mut collector = Collector {
            line: &mut self.line,
            headers: &mut self.headers,
            body: &mut self.body,
            trailers: &mut self.trailers,
        };
        self.parser.receive(&mut self.work, &mut collector)
    }

    /// Header section finished: build the request packet and decide body
    /// framing, keep-alive, continue, and decode policy.
    fn on_headers(&mut self, ctx: &mut FilterChainContext) -> EngineResult<()> {
        let (method, uri, version) = self
            .line
            .take()
            .ok_or_else(|| EngineError::internal("headers complete without request line"))?;
        let mut packet = HttpRequestPacket::new(method, uri, version);
        packet.headers = std::mem::take(&mut self.headers);
        packet.finalize()?;
        packet.server_name = Some(self.config.server_name.clone());
        packet.remote_addr = ctx.connection.peer_addr.map(|a| a.ip().to_string());

        let mut keep = packet.keep_alive_requested();
        let max = self.config.max_keep_alive_requests;
        if max >= 0 && (self.state.requests_completed as i64) + 1 >= max {
            keep = false;
        }
        self.state.keep_alive = keep;

        let has_body = packet.has_payload();
        let mut discard = false;
        if has_body
            && packet.method.payload_undefined()
            && !self.config.allow_payload_for_undefined_methods
        {
            // Swallow the payload within the remainder budget; refuse past it.
            let budget = self.config.max_payload_remainder_to_skip;
            let within = budget < 0
                || packet
                    .content_length
                    .map(|n| n <= budget as u64)
                    .unwrap_or(false);
            if !within {
                return Err(EngineError::limit("request payload on bodyless method"));
            }
            discard = true;
        }

        if packet.expect_continue && has_body && !discard && !self.state.continue_refused {
            self.serializer.write_continue();
            ctx.write(Message::Buffer(self.serializer.take_buffer()));
            self.state.continue_sent = true;
        }

        self.parser
            .set_body_mode(packet.content_length, packet.chunked, has_body);
        self.decoders = if discard {
            Vec::new()
        } else {
            match self.encodings.decoders_for(&packet) {
                Some(chain) => chain,
                None => {
                    log::debug!("unknown content-encoding; passing body through opaque");
                    Vec::new()
                }
            }
        };
        self.discarding = discard;
        self.skipped = 0;
        self.current = Some(Arc::new(packet));
        Ok(())
    }

    /// Run accumulated raw body chunks through the decoder chain.
    fn decode_pending(&mut self, conn: &mut ConnectionCtx) -> EngineResult<Vec<Buffer>> {
        let raw = std::mem::take(&mut self.body);
        if self.discarding {
            self.skipped += raw.iter().map(|b| b.len() as u64).sum::<u64>();
            let budget = self.config.max_payload_remainder_to_skip;
            if budget >= 0 && self.skipped > budget as u64 {
                return Err(EngineError::limit("skipped payload exceeds remainder budget"));
            }
            return Ok(Vec::new());
        }
        if self.decoders.is_empty() {
            return Ok(raw.into_iter().map(Buffer::wrap).collect());
        }
        let mut inputs: Vec<Buffer> = raw.into_iter().map(Buffer::wrap).collect();
        for dec in self.decoders.iter_mut() {
            let mut next = Vec::new();
            for input in inputs {
                let r = dec.decode(conn, input)?;
                if let Some(p) = r.produced {
                    next.push(p);
                }
                if let Some(rem) = r.remainder {
                    log::debug!(
                        "{} trailing bytes past encoded stream discarded",
                        rem.remaining()
                    );
                }
            }
            inputs = next;
        }
        Ok(inputs)
    }

    /// Flush and verify the decoder chain at end of message.
    fn finish_decoders(&mut self, conn: &mut ConnectionCtx) -> EngineResult<Vec<Buffer>> {
        let mut out = Vec::new();
        for i in 0..self.decoders.len() {
            let (head, tail) = self.decoders.split_at_mut(i + 1);
            let flushed = head[i].finish(conn)?;
            if let Some(buf) = flushed {
                let mut inputs = vec![buf];
                for dec in tail.iter_mut() {
                    let mut next = Vec::new();
                    for input in inputs {
                        let r = dec.decode(conn, input)?;
                        if let Some(p) = r.produced {
                            next.push(p);
                        }
                    }
                    inputs = next;
                }
                out.extend(inputs);
            }
        }
        Ok(out)
    }

    fn concat(pieces: Vec<Buffer>) -> Buffer {
        let mut joined: Option<Buffer> = None;
        for p in pieces {
            joined = Some(Buffer::append(joined, p));
        }
        joined.unwrap_or_else(Buffer::empty)
    }

    /// Parse as far as the working buffer allows; emit at most one content.
    fn process(&mut self, ctx: &mut FilterChainContext) -> EngineResult<Option<HttpContent>> {
        loop {
            self.parse_step()?;
            if self.parser.state() == ParseState::HeadersComplete {
                self.on_headers(ctx)?;
                if self.parser.state() == ParseState::Done {
                    // No body: terminal content right away.
                    let packet = self.finish_request()?;
                    return Ok(Some(HttpContent::terminal(PacketRef::Request(packet))));
                }
                continue;
            }
            match self.parser.state() {
                ParseState::Done => {
                    let mut pieces = self.decode_pending(ctx.connection)?;
                    pieces.extend(self.finish_decoders(ctx.connection)?);
                    let trailers = std::mem::take(&mut self.trailers);
                    let packet = self.finish_request()?;
                    let mut content = HttpContent::new(
                        PacketRef::Request(packet),
                        Self::concat(pieces),
                        true,
                    );
                    content.trailers = trailers;
                    return Ok(Some(content));
                }
                ParseState::Body
                | ParseState::ChunkSize
                | ParseState::ChunkData
                | ParseState::ChunkDataEnd
                | ParseState::ChunkTrailer => {
                    let pieces = self.decode_pending(ctx.connection)?;
                    let payload = Self::concat(pieces);
                    if payload.remaining() > 0 {
                        let packet = self
                            .current
                            .clone()
                            .ok_or_else(|| EngineError::internal("body without request"))?;
                        return Ok(Some(HttpContent::new(
                            PacketRef::Request(packet),
                            payload,
                            false,
                        )));
                    }
                    return Ok(None);
                }
                _ => return Ok(None),
            }
        }
    }

    /// Bookkeeping once a request message is fully parsed.
    fn finish_request(&mut self) -> EngineResult<Arc<HttpRequestPacket>> {
        let packet = self
            .current
            .take()
            .ok_or_else(|| EngineError::internal("request completed without a packet"))?;
        self.state.requests_completed += 1;
        self.parser.reset();
        self.decoders.clear();
        self.discarding = false;
        self.skipped = 0;
        Ok(packet)
    }

    /// Best-effort error response, then close.
    fn fatal(&mut self, ctx: &mut FilterChainContext, err: &EngineError) {
        log::debug!("http parse failure: {}", err);
        if !self.state.error && !self.response_head_written {
            let status = match err {
                EngineError::ProtocolFormat(m) if m.contains("protocol version") => Some(505),
                other => other.response_status(),
            };
            if let Some(status) = status {
                let mut resp = HttpResponsePacket::new(status);
                resp.keep_alive = false;
                resp.content_length = Some(0);
                self.serializer.write_head(&resp);
                ctx.write(Message::Buffer(self.serializer.take_buffer()));
            }
        }
        self.state.error = true;
        self.state.keep_alive = false;
        ctx.connection.close_after_flush();
    }

    /// Encode one payload buffer through the encoder chain.
    fn encode_payload(
        &mut self,
        conn: &mut ConnectionCtx,
        payload: &Buffer,
    ) -> EngineResult<Vec<Buffer>> {
        let mut inputs = vec![payload.duplicate()];
        for enc in self.encoders.iter_mut() {
            let mut next = Vec::new();
            for input in inputs {
                if let Some(p) = enc.encode(conn, input)? {
                    next.push(p);
                }
            }
            inputs = next;
        }
        Ok(inputs)
    }

    fn finish_encoders(&mut self, conn: &mut ConnectionCtx) -> EngineResult<Vec<Buffer>> {
        let mut out = Vec::new();
        for i in 0..self.encoders.len() {
            let (head, tail) = self.encoders.split_at_mut(i + 1);
            if let Some(buf) = head[i].finish(conn)? {
                let mut inputs = vec![buf];
                for enc in tail.iter_mut() {
                    let mut next = Vec::new();
                    for input in inputs {
                        if let Some(p) = enc.encode(conn, input)? {
                            next.push(p);
                        }
                    }
                    inputs = next;
                }
                out.extend(inputs);
            }
        }
        Ok(out)
    }
}

impl Filter for HttpCodecFilter {
    fn handle_read(&mut self, ctx: &mut FilterChainContext) -> EngineResult<NextAction> {
        if self.state.error {
            return Ok(NextAction::stop());
        }
        match ctx.message.take() {
            Message::Buffer(b) => {
                // The working buffer accumulates across reads, like the
                // connection read buffer does on the client side.
                self.work.extend_from_slice(&b.to_vec());
            }
            Message::None => {}
            other => {
                ctx.message = other;
                return Ok(NextAction::invoke());
            }
        }
        match self.process(ctx) {
            Ok(Some(content)) => {
                let more = content.last && !self.work.is_empty();
                ctx.message = Message::Content(content);
                if more {
                    // Pipelined request already buffered: re-enter after this
                    // pass completes.
                    Ok(NextAction::Invoke {
                        remainder: Some(Buffer::empty()),
                    })
                } else {
                    Ok(NextAction::invoke())
                }
            }
            Ok(None) => Ok(NextAction::stop()),
            Err(e) => {
                self.fatal(ctx, &e);
                Err(e)
            }
        }
    }

    fn handle_write(&mut self, ctx: &mut FilterChainContext) -> EngineResult<NextAction> {
        let content = match ctx.message.take() {
            Message::Content(c) => c,
            other => {
                // Raw buffers (interim responses) pass through untouched.
                ctx.message = other;
                return Ok(NextAction::invoke());
            }
        };
        let mut packet = match content.header {
            PacketRef::Response(r) => r,
            PacketRef::Request(_) => {
                return Err(EngineError::internal("request content on the write path"))
            }
        };

        if !self.response_head_written {
            let resp = Arc::make_mut(&mut packet);
            resp.keep_alive = resp.keep_alive && self.state.keep_alive;
            self.encoders = match self.encodings.encoders_for(resp) {
                Some(chain) => chain,
                None => Vec::new(),
            };
            if !self.encoders.is_empty() {
                // Transformed length is unknown until finish.
                resp.content_length = None;
            }
            if resp.emits_body() && resp.content_length.is_none() && !resp.chunked {
                if self.config.chunking_enabled && resp.version == Version::Http11 {
                    resp.chunked = true;
                } else {
                    // Close-delimited body.
                    resp.keep_alive = false;
                }
            }
            self.serializer.write_head(resp);
            self.response_head_written = true;
        }

        if packet.emits_body() {
            if self.encoders.is_empty() {
                self.serializer.write_body(&packet, &content.payload, content.last);
            } else {
                let pieces = self.encode_payload(ctx.connection, &content.payload)?;
                for piece in &pieces {
                    self.serializer.write_body(&packet, piece, false);
                }
                if content.last {
                    let flushed = self.finish_encoders(ctx.connection)?;
                    for piece in &flushed {
                        self.serializer.write_body(&packet, piece, false);
                    }
                    self.serializer.write_body(&packet, &Buffer::empty(), true);
                }
            }
        }

        if content.last {
            if !packet.keep_alive {
                ctx.connection.close_after_flush();
            }
            self.response_head_written = false;
            self.encoders.clear();
            self.state.reset_for_next_request();
        }
        ctx.message = Message::Buffer(self.serializer.take_buffer());
        Ok(NextAction::invoke())
    }

    fn handle_event(
        &mut self,
        _ctx: &mut FilterChainContext,
        event: Event,
    ) -> EngineResult<NextAction> {
        if event == Event::Timeout {
            self.state.keep_alive = false;
        }
        Ok(NextAction::invoke())
    }

    fn handle_close(&mut self, _ctx: &mut FilterChainContext, _reason: crate::filter::CloseReason) {
        self.work.clear();
        self.body.clear();
        self.decoders.clear();
        self.encoders.clear();
    }
}
