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

//! AJP codec filter: sits below the dispatch filter and presents decoded
//! AJP frames as the same `HttpContent` messages the HTTP codec produces,
//! so everything above is protocol-agnostic. Handles the body-pull protocol
//! (GET_BODY_CHUNK) and answers CPING probes directly.

use bytes::Buf;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::filter::{Filter, FilterChainContext, Message, NextAction};
use crate::http::content::{HttpContent, PacketRef};
use crate::http::request::HttpRequestPacket;
use crate::memory::Buffer;

use super::parser::{parse_data_chunk, parse_forward_request, AjpParsingState};
use super::writer::AjpWriter;
use super::*;

fn leftover(buf: Buffer) -> Option<Buffer> {
    if buf.has_remaining() {
        Some(buf)
    } else {
        None
    }
}

/// Server side of one AJP/1.3 connection.
#[derive(Default)]
pub struct AjpCodecFilter {
    state: AjpParsingState,
    writer: AjpWriter,
    request: Option<Arc<HttpRequestPacket>>,
    remaining_body: u64,
    reading_body: bool,
    response_headers_sent: bool,
}

impl AjpCodecFilter {
    pub fn new() -> Self {
        AjpCodecFilter::default()
    }
}

impl Filter for AjpCodecFilter {
    fn handle_read(&mut self, ctx: &mut FilterChainContext) -> EngineResult<NextAction> {
        let mut buf = match ctx.message.take() {
            Message::Buffer(b) => b,
            Message::None => return Ok(NextAction::stop()),
            other => {
                ctx.message = other;
                return Ok(NextAction::invoke());
            }
        };
        loop {
            if !self.state.header_parsed {
                if buf.remaining() < PACKET_HEADER_LENGTH {
                    return Ok(NextAction::Stop {
                        remainder: leftover(buf),
                    });
                }
                let magic = buf.get_u16();
                if magic != MAGIC_FORWARDER {
                    return Err(EngineError::protocol(format!(
                        "bad AJP packet magic {:#06x}",
                        magic
                    )));
                }
                let length = buf.get_u16();
                if length as usize + PACKET_HEADER_LENGTH > MAX_PACKET_SIZE {
                    return Err(EngineError::protocol(format!(
                        "AJP packet length {} exceeds cap",
                        length
                    )));
                }
                self.state = AjpParsingState {
                    header_parsed: true,
                    length,
                };
            }
            let length = self.state.length as usize;
            if buf.remaining() < length {
                return Ok(NextAction::Stop {
                    remainder: leftover(buf),
                });
            }
            let rest = buf.split(buf.position() + length);
            let mut payload = buf.to_bytes();
            buf = rest;
            self.state.header_parsed = false;

            if self.reading_body {
                let chunk = parse_data_chunk(&mut payload)?;
                let last = if chunk.is_empty() {
                    self.remaining_body = 0;
                    true
                } else {
                    self.remaining_body = self.remaining_body.saturating_sub(chunk.len() as u64);
                    self.remaining_body == 0
                };
                if last {
                    self.reading_body = false;
                } else {
                    // Pull the next chunk from the forwarder.
                    let ask = self.remaining_body.min(BODY_CHUNK_REQUEST as u64) as u16;
                    self.writer.write_get_body_chunk(ask);
                    ctx.write(Message::Buffer(self.writer.take_buffer()));
                }
                let request = self
                    .request
                    .clone()
                    .ok_or_else(|| EngineError::internal("AJP body chunk without a request"))?;
                ctx.message = Message::Content(HttpContent::new(
                    PacketRef::Request(request),
                    Buffer::wrap(chunk),
                    last,
                ));
                return Ok(NextAction::Invoke {
                    remainder: leftover(buf),
                });
            }

            if payload.is_empty() {
                return Err(EngineError::protocol("empty AJP packet"));
            }
            let packet_type = payload.get_u8();
            match packet_type {
                TYPE_FORWARD_REQUEST => {
                    let packet = parse_forward_request(&mut payload)?;
                    let body_len = packet.content_length.unwrap_or(0);
                    let request = Arc::new(packet);
                    self.request = Some(request.clone());
                    if body_len > 0 {
                        // The forwarder sends the first data packet
                        // unprompted; subsequent ones are pulled.
                        self.remaining_body = body_len;
                        self.reading_body = true;
                    }
                    ctx.message = Message::Content(HttpContent::new(
                        PacketRef::Request(request),
                        Buffer::empty(),
                        body_len == 0,
                    ));
                    return Ok(NextAction::Invoke {
                        remainder: leftover(buf),
                    });
                }
                TYPE_CPING => {
                    self.writer.write_cpong();
                    ctx.write(Message::Buffer(self.writer.take_buffer()));
                }
                TYPE_PING => {
                    log::debug!("AJP ping ignored");
                }
                TYPE_SHUTDOWN => {
                    log::debug!("AJP shutdown packet received");
                    ctx.connection.close_after_flush();
                    return Ok(NextAction::stop());
                }
                other => {
                    return Err(EngineError::protocol(format!(
                        "unknown AJP packet type {}",
                        other
                    )));
                }
            }
        }
    }

    fn handle_write(&mut self, ctx: &mut FilterChainContext) -> EngineResult<NextAction> {
        let content = match ctx.message.take() {
            Message::Content(c) => c,
            other => {
                ctx.message = other;
                return Ok(NextAction::invoke());
            }
        };
        let response = match &content.header {
            PacketRef::Response(r) => r.clone(),
            PacketRef::Request(_) => {
                return Err(EngineError::internal("request content on the write path"))
            }
        };
        if !self.response_headers_sent {
            self.writer.write_send_headers(&response);
            self.response_headers_sent = true;
        }
        if response.emits_body() && content.payload.remaining() > 0 {
            self.writer.write_body_chunk(&content.payload);
        }
        if content.last {
            let reuse = response.keep_alive;
            self.writer.write_end_response(reuse);
            self.response_headers_sent = false;
            self.request = None;
            if !reuse {
                ctx.connection.close_after_flush();
            }
        }
        ctx.message = Message::Buffer(self.writer.take_buffer());
        Ok(NextAction::invoke())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{ConnectionCtx, FilterChain};
    use crate::memory::MemoryManager;
    use crate::server::{HandlerRegistry, HttpHandler, HttpHandlerFilter, Response};

    fn put_string(out: &mut Vec<u8>, s: &str) {
        out.extend_from_slice(&(s.len() as u16).to_be_bytes());
        out.extend_from_slice(s.as_bytes());
        out.push(0);
    }

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC_FORWARDER.to_be_bytes());
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn forward_request_get(uri: &str) -> Vec<u8> {
        let mut p = Vec::new();
        p.push(TYPE_FORWARD_REQUEST);
        p.push(2); // GET
        put_string(&mut p, "HTTP/1.1");
        put_string(&mut p, uri);
        put_string(&mut p, "127.0.0.1");
        put_string(&mut p, "client");
        put_string(&mut p, "localhost");
        p.extend_from_slice(&80u16.to_be_bytes());
        p.push(0);
        p.extend_from_slice(&1u16.to_be_bytes());
        p.extend_from_slice(&0xA00Bu16.to_be_bytes()); // host
        put_string(&mut p, "localhost");
        p.push(ATTR_DONE);
        frame(&p)
    }

    fn echo_chain(body: &'static [u8]) -> FilterChain {
        let mut registry = HandlerRegistry::new();
        let handler: Arc<dyn HttpHandler> = Arc::new(
            move |_req: &HttpRequestPacket,
                  _body: &[u8],
                  resp: &mut Response|
                  -> EngineResult<()> {
                resp.header("Content-Type", "text/plain");
                resp.write(body);
                Ok(())
            },
        );
        registry.register("", "/", handler);
        FilterChain::new(vec![
            Box::new(AjpCodecFilter::new()),
            Box::new(HttpHandlerFilter::new(Arc::new(registry))),
        ])
    }

    fn collect_packets(writes: &[crate::filter::WriteOp]) -> Vec<(u8, Vec<u8>)> {
        let mut wire = Vec::new();
        for w in writes {
            wire.extend_from_slice(&w.buffer.to_vec());
        }
        let mut out = Vec::new();
        let mut rest = &wire[..];
        while !rest.is_empty() {
            assert_eq!(u16::from_be_bytes([rest[0], rest[1]]), MAGIC_SERVER);
            let len = u16::from_be_bytes([rest[2], rest[3]]) as usize;
            let payload = &rest[4..4 + len];
            out.push((payload[0], payload.to_vec()));
            rest = &rest[4 + len..];
        }
        out
    }

    #[test]
    fn forward_request_reaches_handler_and_response_framed() {
        let mut chain = echo_chain(b"hi");
        let mut conn = ConnectionCtx::new(MemoryManager::default());
        let wire = forward_request_get("/x");
        let result = chain.execute_read(&mut conn, Message::Buffer(Buffer::from(wire)));
        assert!(result.error.is_none());
        let packets = collect_packets(&result.writes);
        assert_eq!(packets[0].0, TYPE_SEND_HEADERS);
        assert_eq!(u16::from_be_bytes([packets[0].1[1], packets[0].1[2]]), 200);
        assert_eq!(packets[1].0, TYPE_SEND_BODY_CHUNK);
        let len = u16::from_be_bytes([packets[1].1[1], packets[1].1[2]]) as usize;
        assert_eq!(&packets[1].1[3..3 + len], b"hi");
        assert_eq!(packets[2].0, TYPE_END_RESPONSE);
        assert_eq!(packets[2].1[1], 1, "connection reusable");
    }

    #[test]
    fn fragmented_packets_reassembled_via_remainder() {
        let mut chain = echo_chain(b"ok");
        let mut conn = ConnectionCtx::new(MemoryManager::default());
        let wire = forward_request_get("/frag");
        // Feed one byte at a time; only the final byte completes the packet.
        for (i, b) in wire.iter().enumerate() {
            let result = chain.execute_read(&mut conn, Message::Buffer(Buffer::from(&[*b][..])));
            assert!(result.error.is_none());
            if i < wire.len() - 1 {
                assert!(result.writes.is_empty(), "byte {}", i);
            } else {
                let packets = collect_packets(&result.writes);
                assert_eq!(packets[0].0, TYPE_SEND_HEADERS);
            }
        }
    }

    #[test]
    fn request_body_pulled_with_get_body_chunk() {
        let mut chain = echo_chain(b"done");
        let mut conn = ConnectionCtx::new(MemoryManager::default());

        // POST with content-length 10, delivered in two data packets.
        let mut p = Vec::new();
        p.push(TYPE_FORWARD_REQUEST);
        p.push(4); // POST
        put_string(&mut p, "HTTP/1.1");
        put_string(&mut p, "/upload");
        put_string(&mut p, "127.0.0.1");
        put_string(&mut p, "client");
        put_string(&mut p, "localhost");
        p.extend_from_slice(&80u16.to_be_bytes());
        p.push(0);
        p.extend_from_slice(&1u16.to_be_bytes());
        p.extend_from_slice(&0xA008u16.to_be_bytes()); // content-length
        put_string(&mut p, "10");
        p.push(ATTR_DONE);
        let mut wire = frame(&p);

        let mut first = Vec::new();
        first.extend_from_slice(&5u16.to_be_bytes());
        first.extend_from_slice(b"01234");
        wire.extend_from_slice(&frame(&first));

        let r = chain.execute_read(&mut conn, Message::Buffer(Buffer::from(wire)));
        assert!(r.error.is_none());
        // Server must have asked for the rest.
        let packets = collect_packets(&r.writes);
        assert!(packets.iter().any(|(t, _)| *t == TYPE_GET_BODY_CHUNK));

        let mut second = Vec::new();
        second.extend_from_slice(&5u16.to_be_bytes());
        second.extend_from_slice(b"56789");
        let r = chain.execute_read(
            &mut conn,
            Message::Buffer(Buffer::from(frame(&second))),
        );
        assert!(r.error.is_none());
        let packets = collect_packets(&r.writes);
        assert!(packets.iter().any(|(t, _)| *t == TYPE_SEND_HEADERS));
        assert!(packets.iter().any(|(t, _)| *t == TYPE_END_RESPONSE));
    }

    #[test]
    fn cping_answered_with_cpong() {
        let mut chain = echo_chain(b"");
        let mut conn = ConnectionCtx::new(MemoryManager::default());
        let r = chain.execute_read(
            &mut conn,
            Message::Buffer(Buffer::from(frame(&[TYPE_CPING]))),
        );
        assert!(r.error.is_none());
        let packets = collect_packets(&r.writes);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].0, TYPE_CPONG);
    }

    #[test]
    fn bad_magic_is_fatal() {
        let mut chain = echo_chain(b"");
        let mut conn = ConnectionCtx::new(MemoryManager::default());
        let r = chain.execute_read(
            &mut conn,
            Message::Buffer(Buffer::from(&[0x56u8, 0x78, 0x00, 0x01, 0x0A][..])),
        );
        assert!(matches!(r.error, Some(EngineError::ProtocolFormat(_))));
    }

    #[test]
    fn oversized_packet_rejected() {
        let mut chain = echo_chain(b"");
        let mut conn = ConnectionCtx::new(MemoryManager::default());
        let mut wire = Vec::new();
        wire.extend_from_slice(&MAGIC_FORWARDER.to_be_bytes());
        wire.extend_from_slice(&(MAX_PACKET_SIZE as u16 - 3).to_be_bytes());
        let r = chain.execute_read(&mut conn, Message::Buffer(Buffer::from(wire)));
        assert!(matches!(r.error, Some(EngineError::ProtocolFormat(_))));
    }

    #[test]
    fn stored_method_resolves_request_method() {
        let mut p = Vec::new();
        p.push(TYPE_FORWARD_REQUEST);
        p.push(0xFF);
        put_string(&mut p, "HTTP/1.1");
        put_string(&mut p, "/");
        put_string(&mut p, "127.0.0.1");
        put_string(&mut p, "client");
        put_string(&mut p, "localhost");
        p.extend_from_slice(&80u16.to_be_bytes());
        p.push(0);
        p.extend_from_slice(&0u16.to_be_bytes());
        p.push(ATTR_STORED_METHOD);
        put_string(&mut p, "REPORT");
        p.push(ATTR_DONE);

        let mut chain = echo_chain(b"x");
        let mut conn = ConnectionCtx::new(MemoryManager::default());
        let r = chain.execute_read(&mut conn, Message::Buffer(Buffer::from(frame(&p))));
        assert!(r.error.is_none());
        // Handler ran: response packets present.
        assert!(!r.writes.is_empty());
    }
}
