/*
 * parser.rs
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

//! HTTP/1.x request push parser: request line, headers, body (Content-Length
//! or chunked), trailers. Feed bytes via `receive`; events fire as complete
//! tokens are parsed. Accepts `\n` and `\r\n` line terminators; a bare `\r`
//! is not a terminator. Configurable byte limits on the request line and the
//! header section; overrun is fatal to the connection.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{EngineError, EngineResult};
use crate::http::request::{Method, Version};

/// Callback for request events. The codec filter implements this and builds
/// packet objects from the callbacks.
pub trait RequestEvents {
    fn request_line(&mut self, method: Method, uri: &str, version: Version) -> EngineResult<()>;
    fn header(&mut self, name: &str, value: &str);
    /// Continuation line (leading LWS) folding into the previous header.
    fn header_continuation(&mut self, more: &str);
    /// Header section done; caller must invoke `set_body_mode` before
    /// feeding more bytes.
    fn headers_complete(&mut self);
    fn body_chunk(&mut self, data: Bytes);
    fn trailer(&mut self, name: &str, value: &str);
    fn message_complete(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    RequestLine,
    Headers,
    /// Headers done; waiting for `set_body_mode`.
    HeadersComplete,
    Body,
    ChunkSize,
    ChunkData,
    /// CRLF after a chunk payload.
    ChunkDataEnd,
    ChunkTrailer,
    Done,
    Error,
}

/// Push parser for one HTTP/1.x request. Reset between keep-alive requests.
pub struct RequestParser {
    state: ParseState,
    max_request_line: usize,
    max_headers: usize,
    header_bytes: usize,
    content_length: u64,
    received: u64,
    chunk_remaining: u64,
}

/// Scan for the next line. Returns (content length, total consumed) where
/// content excludes the terminator and any `\r` immediately before `\n`.
fn find_line(buf: &[u8]) -> Option<(usize, usize)> {
    let nl = buf.iter().position(|&b| b == b'\n')?;
    let content = if nl > 0 && buf[nl - 1] == b'\r' {
        nl - 1
    } else {
        nl
    };
    Some((content, nl + 1))
}

fn line_str(line: &[u8]) -> EngineResult<&str> {
    if line.contains(&b'\r') {
        return Err(EngineError::protocol("stray CR inside line"));
    }
    std::str::from_utf8(line).map_err(|_| EngineError::protocol("non-UTF-8 bytes in header section"))
}

impl RequestParser {
    pub fn new(max_request_line: usize, max_headers: usize) -> Self {
        RequestParser {
            state: ParseState::RequestLine,
            max_request_line,
            max_headers,
            header_bytes: 0,
            content_length: 0,
            received: 0,
            chunk_remaining: 0,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = ParseState::RequestLine;
        self.header_bytes = 0;
        self.content_length = 0;
        self.received = 0;
        self.chunk_remaining = 0;
    }

    /// Called after `headers_complete`. `has_body == false` short-circuits
    /// to Done (methods or policies that forbid a payload).
    pub fn set_body_mode(&mut self, content_length: Option<u64>, chunked: bool, has_body: bool) {
        if self.state != ParseState::HeadersComplete {
            return;
        }
        if !has_body {
            self.state = ParseState::Done;
        } else if chunked {
            self.state = ParseState::ChunkSize;
        } else {
            match content_length {
                Some(0) | None => self.state = ParseState::Done,
                Some(n) => {
                    self.content_length = n;
                    self.received = 0;
                    self.state = ParseState::Body;
                }
            }
        }
    }

    /// Consume and parse as much as possible. Partial data stays in `buf`.
    /// Parsing stops at `HeadersComplete` (caller decides body mode) and at
    /// `Done` (caller resets for the next pipelined request).
    pub fn receive<E: RequestEvents>(
        &mut self,
        buf: &mut BytesMut,
        events: &mut E,
    ) -> EngineResult<()> {
        loop {
            match self.state {
                ParseState::RequestLine => {
                    let (content, consumed) = match find_line(buf) {
                        Some(x) => x,
                        None => {
                            if buf.len() > self.max_request_line {
                                self.state = ParseState::Error;
                                return Err(EngineError::limit("request line too long"));
                            }
                            return Ok(());
                        }
                    };
                    if consumed > self.max_request_line {
                        self.state = ParseState::Error;
                        return Err(EngineError::limit("request line too long"));
                    }
                    let line = buf.split_to(consumed);
                    let line = line_str(&line[..content]).inspect_err(|_| {
                        self.state = ParseState::Error;
                    })?;
                    if line.is_empty() {
                        // Tolerate a stray blank line before the request.
                        continue;
                    }
                    let mut parts = line.split(' ').filter(|p| !p.is_empty());
                    let method = parts.next();
                    let uri = parts.next();
                    let version = parts.next();
                    let (method, uri, version) = match (method, uri, version) {
                        (Some(m), Some(u), Some(v)) => (m, u, v),
                        _ => {
                            self.state = ParseState::Error;
                            return Err(EngineError::protocol("malformed request line"));
                        }
                    };
                    let version = Version::from_name(version).inspect_err(|_| {
                        self.state = ParseState::Error;
                    })?;
                    events.request_line(Method::from_name(method), uri, version)?;
                    self.header_bytes = 0;
                    self.state = ParseState::Headers;
                }
                ParseState::Headers => {
                    let (content, consumed) = match find_line(buf) {
                        Some(x) => x,
                        None => {
                            if self.header_bytes + buf.len() > self.max_headers {
                                self.state = ParseState::Error;
                                return Err(EngineError::limit("header section too large"));
                            }
                            return Ok(());
                        }
                    };
                    self.header_bytes += consumed;
                    if self.header_bytes > self.max_headers {
                        self.state = ParseState::Error;
                        return Err(EngineError::limit("header section too large"));
                    }
                    let line = buf.split_to(consumed);
                    if content == 0 {
                        self.state = ParseState::HeadersComplete;
                        events.headers_complete();
                        return Ok(());
                    }
                    let raw = &line[..content];
                    if raw[0] == b' ' || raw[0] == b'\t' {
                        let folded = line_str(raw).inspect_err(|_| {
                            self.state = ParseState::Error;
                        })?;
                        events.header_continuation(folded.trim());
                        continue;
                    }
                    let text = line_str(raw).inspect_err(|_| {
                        self.state = ParseState::Error;
                    })?;
                    match text.find(':') {
                        Some(colon) => {
                            let name = text[..colon].trim();
                            let value = text[colon + 1..].trim();
                            if name.is_empty() {
                                self.state = ParseState::Error;
                                return Err(EngineError::protocol("empty header name"));
                            }
                            events.header(name, value);
                        }
                        None => {
                            self.state = ParseState::Error;
                            return Err(EngineError::protocol("header line without colon"));
                        }
                    }
                }
                ParseState::HeadersComplete => return Ok(()),
                ParseState::Body => {
                    let remaining = (self.content_length - self.received) as usize;
                    let take = remaining.min(buf.len());
                    if take == 0 {
                        return Ok(());
                    }
                    let chunk = buf.split_to(take).freeze();
                    self.received += take as u64;
                    events.body_chunk(chunk);
                    if self.received == self.content_length {
                        self.state = ParseState::Done;
                        events.message_complete();
                        return Ok(());
                    }
                }
                ParseState::ChunkSize => {
                    let (content, consumed) = match find_line(buf) {
                        Some(x) => x,
                        None => {
                            // A chunk-size line is tiny; anything longer than a
                            // u64 in hex plus extensions is suspect.
                            if buf.len() > 1024 {
                                self.state = ParseState::Error;
                                return Err(EngineError::protocol("chunk size line too long"));
                            }
                            return Ok(());
                        }
                    };
                    let line = buf.split_to(consumed);
                    let text = line_str(&line[..content]).inspect_err(|_| {
                        self.state = ParseState::Error;
                    })?;
                    let hex = text.split(';').next().unwrap_or("").trim();
                    let size = parse_chunk_size(hex).inspect_err(|_| {
                        self.state = ParseState::Error;
                    })?;
                    if size == 0 {
                        self.state = ParseState::ChunkTrailer;
                    } else {
                        self.chunk_remaining = size;
                        self.state = ParseState::ChunkData;
                    }
                }
                ParseState::ChunkData => {
                    let take = (self.chunk_remaining as usize).min(buf.len());
                    if take == 0 {
                        return Ok(());
                    }
                    let chunk = buf.split_to(take).freeze();
                    self.chunk_remaining -= take as u64;
                    events.body_chunk(chunk);
                    if self.chunk_remaining == 0 {
                        self.state = ParseState::ChunkDataEnd;
                    }
                }
                ParseState::ChunkDataEnd => {
                    match find_line(buf) {
                        Some((content, consumed)) => {
                            if content != 0 {
                                self.state = ParseState::Error;
                                return Err(EngineError::protocol(
                                    "missing terminator after chunk payload",
                                ));
                            }
                            buf.advance(consumed);
                            self.state = ParseState::ChunkSize;
                        }
                        None => {
                            if buf.len() > 2 {
                                self.state = ParseState::Error;
                                return Err(EngineError::protocol(
                                    "missing terminator after chunk payload",
                                ));
                            }
                            return Ok(());
                        }
                    }
                }
                ParseState::ChunkTrailer => {
                    let (content, consumed) = match find_line(buf) {
                        Some(x) => x,
                        None => {
                            if self.header_bytes + buf.len() > self.max_headers {
                                self.state = ParseState::Error;
                                return Err(EngineError::limit("trailer section too large"));
                            }
                            return Ok(());
                        }
                    };
                    self.header_bytes += consumed;
                    if self.header_bytes > self.max_headers {
                        self.state = ParseState::Error;
                        return Err(EngineError::limit("trailer section too large"));
                    }
                    let line = buf.split_to(consumed);
                    if content == 0 {
                        self.state = ParseState::Done;
                        events.message_complete();
                        return Ok(());
                    }
                    let text = line_str(&line[..content]).inspect_err(|_| {
                        self.state = ParseState::Error;
                    })?;
                    if let Some(colon) = text.find(':') {
                        let name = text[..colon].trim();
                        let value = text[colon + 1..].trim();
                        events.trailer(name, value);
                    }
                }
                ParseState::Done | ParseState::Error => return Ok(()),
            }
            if buf.is_empty() {
                return Ok(());
            }
        }
    }
}

/// Hex chunk size; rejects non-hex and values that overflow 64 bits.
fn parse_chunk_size(hex: &str) -> EngineResult<u64> {
    if hex.is_empty() {
        return Err(EngineError::protocol("empty chunk size"));
    }
    let mut value: u64 = 0;
    for c in hex.bytes() {
        let digit = match c {
            b'0'..=b'9' => (c - b'0') as u64,
            b'a'..=b'f' => (c - b'a' + 10) as u64,
            b'A'..=b'F' => (c - b'A' + 10) as u64,
            _ => return Err(EngineError::protocol("non-hex chunk size")),
        };
        value = value
            .checked_mul(16)
            .and_then(|v| v.checked_add(digit))
            .ok_or_else(|| EngineError::protocol("chunk size overflows 64 bits"))?;
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        method: Option<Method>,
        uri: String,
        version: Option<Version>,
        headers: Vec<(String, String)>,
        headers_done: bool,
        body: Vec<u8>,
        trailers: Vec<(String, String)>,
        complete: bool,
    }

    impl RequestEvents for Recorder {
        fn request_line(&mut self, method: Method, uri: &str, version: Version) -> EngineResult<()> {
            self.method = Some(method);
            self.uri = uri.to_string();
            self.version = Some(version);
            Ok(())
        }
        fn header(&mut self, name: &str, value: &str) {
            self.headers.push((name.to_string(), value.to_string()));
        }
        fn header_continuation(&mut self, more: &str) {
            if let Some((_, v)) = self.headers.last_mut() {
                v.push(' ');
                v.push_str(more);
            }
        }
        fn headers_complete(&mut self) {
            self.headers_done = true;
        }
        fn body_chunk(&mut self, data: Bytes) {
            self.body.extend_from_slice(&data);
        }
        fn trailer(&mut self, name: &str, value: &str) {
            self.trailers.push((name.to_string(), value.to_string()));
        }
        fn message_complete(&mut self) {
            self.complete = true;
        }
    }

    fn parser() -> RequestParser {
        RequestParser::new(8192, 8192)
    }

    /// Feed the whole message, honouring the HeadersComplete hand-off with
    /// framing derived from the recorded headers.
    fn drive(parser: &mut RequestParser, rec: &mut Recorder, input: &[u8], chunk: usize) {
        let mut fed = 0;
        let mut buf = BytesMut::new();
        while fed < input.len() || !buf.is_empty() {
            if fed < input.len() {
                let n = chunk.min(input.len() - fed);
                buf.extend_from_slice(&input[fed..fed + n]);
                fed += n;
            }
            parser.receive(&mut buf, rec).unwrap();
            if parser.state() == ParseState::HeadersComplete {
                let cl = rec
                    .headers
                    .iter()
                    .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, v)| v.parse::<u64>().ok());
                let chunked = rec
                    .headers
                    .iter()
                    .any(|(n, v)| n.eq_ignore_ascii_case("transfer-encoding") && v.contains("chunked"));
                parser.set_body_mode(cl, chunked, chunked || cl.map(|n| n > 0).unwrap_or(false));
                if parser.state() == ParseState::Done {
                    rec.complete = true;
                }
            }
            if parser.state() == ParseState::Done && fed >= input.len() {
                break;
            }
        }
    }

    #[test]
    fn simple_get_crlf() {
        let mut p = parser();
        let mut rec = Recorder::default();
        drive(&mut p, &mut rec, b"GET /x?q=1 HTTP/1.1\r\nHost: a\r\n\r\n", 1024);
        assert_eq!(rec.method, Some(Method::Get));
        assert_eq!(rec.uri, "/x?q=1");
        assert_eq!(rec.version, Some(Version::Http11));
        assert_eq!(rec.headers, vec![("Host".to_string(), "a".to_string())]);
        assert!(rec.headers_done);
    }

    #[test]
    fn bare_lf_terminators_accepted() {
        let mut p = parser();
        let mut rec = Recorder::default();
        drive(&mut p, &mut rec, b"GET / HTTP/1.0\nHost: b\n\n", 1024);
        assert_eq!(rec.version, Some(Version::Http10));
        assert_eq!(rec.headers, vec![("Host".to_string(), "b".to_string())]);
    }

    #[test]
    fn header_folding_joins_with_space() {
        let mut p = parser();
        let mut rec = Recorder::default();
        drive(
            &mut p,
            &mut rec,
            b"GET / HTTP/1.1\r\nX-Long: part one\r\n  part two\r\n\r\n",
            1024,
        );
        assert_eq!(
            rec.headers,
            vec![("X-Long".to_string(), "part one part two".to_string())]
        );
    }

    #[test]
    fn identity_body_exact_length() {
        let mut p = parser();
        let mut rec = Recorder::default();
        drive(
            &mut p,
            &mut rec,
            b"POST /p HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello",
            1024,
        );
        assert_eq!(rec.body, b"hello");
        assert!(rec.complete);
    }

    #[test]
    fn chunked_body_with_trailer() {
        let mut p = parser();
        let mut rec = Recorder::default();
        let msg = b"POST /c HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
                    4\r\nWiki\r\n5\r\npedia\r\n0\r\nTrailer: v\r\n\r\n";
        drive(&mut p, &mut rec, msg, 1024);
        assert_eq!(rec.body, b"Wikipedia");
        assert_eq!(rec.trailers, vec![("Trailer".to_string(), "v".to_string())]);
        assert!(rec.complete);
    }

    #[test]
    fn incremental_feeding_is_equivalent() {
        // Same payload fed byte-by-byte must produce the same events.
        let msg = b"POST /c HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
                    6\r\nabcdef\r\na\r\n0123456789\r\n0\r\n\r\n";
        for chunk in [1, 2, 3, 7, msg.len()] {
            let mut p = parser();
            let mut rec = Recorder::default();
            drive(&mut p, &mut rec, msg, chunk);
            assert_eq!(rec.body, b"abcdef0123456789", "chunk size {}", chunk);
            assert!(rec.complete, "chunk size {}", chunk);
        }
    }

    #[test]
    fn request_line_at_and_past_limit() {
        // Exactly at the limit passes; one byte past fails.
        let uri_len = 100;
        let uri: String = std::iter::repeat('a').take(uri_len).collect();
        let line = format!("GET /{} HTTP/1.1\r\n", uri);
        let limit = line.len();

        let mut p = RequestParser::new(limit, 8192);
        let mut rec = Recorder::default();
        let mut buf = BytesMut::from(&line.as_bytes()[..]);
        buf.extend_from_slice(b"\r\n");
        assert!(p.receive(&mut buf, &mut rec).is_ok());
        assert_eq!(rec.uri.len(), uri_len + 1);

        let mut p = RequestParser::new(limit - 1, 8192);
        let mut rec = Recorder::default();
        let mut buf = BytesMut::from(&line.as_bytes()[..]);
        let err = p.receive(&mut buf, &mut rec).unwrap_err();
        assert!(matches!(err, EngineError::LimitExceeded(_)));
        assert_eq!(p.state(), ParseState::Error);
    }

    #[test]
    fn header_section_limit_enforced() {
        let mut p = RequestParser::new(8192, 32);
        let mut rec = Recorder::default();
        let mut buf = BytesMut::from(
            &b"GET / HTTP/1.1\r\nX-A: 0123456789\r\nX-B: 0123456789\r\n\r\n"[..],
        );
        let err = p.receive(&mut buf, &mut rec).unwrap_err();
        assert!(matches!(err, EngineError::LimitExceeded(_)));
    }

    #[test]
    fn bad_chunk_sizes_rejected() {
        assert!(parse_chunk_size("ff").is_ok());
        assert!(parse_chunk_size("xyz").is_err());
        assert!(parse_chunk_size("").is_err());
        // 17 hex digits overflows u64.
        assert!(parse_chunk_size("10000000000000000").is_err());
    }

    #[test]
    fn unsupported_version_rejected() {
        let mut p = parser();
        let mut rec = Recorder::default();
        let mut buf = BytesMut::from(&b"GET / HTTP/2.0\r\n\r\n"[..]);
        let err = p.receive(&mut buf, &mut rec).unwrap_err();
        assert!(matches!(err, EngineError::ProtocolFormat(_)));
    }

    #[test]
    fn stray_cr_in_header_rejected() {
        let mut p = parser();
        let mut rec = Recorder::default();
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\nBad: a\rb\r\n\r\n"[..]);
        assert!(p.receive(&mut buf, &mut rec).is_err());
    }

    #[test]
    fn pipelined_requests_leave_next_in_buffer() {
        let mut p = parser();
        let mut rec = Recorder::default();
        let mut buf =
            BytesMut::from(&b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\n\r\n"[..]);
        p.receive(&mut buf, &mut rec).unwrap();
        assert_eq!(p.state(), ParseState::HeadersComplete);
        p.set_body_mode(None, false, false);
        assert_eq!(rec.uri, "/a");

        p.reset();
        let mut rec2 = Recorder::default();
        p.receive(&mut buf, &mut rec2).unwrap();
        assert_eq!(rec2.uri, "/b");
        assert!(buf.is_empty());
    }
}
