/*
 * serializer.rs
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

//! Response serializer: status line, canonical header ordering (Date and
//! framing headers first), then identity or chunked body. Emits CRLF only.

use bytes::{Buf, BytesMut};
use chrono::Utc;

use crate::http::response::HttpResponsePacket;
use crate::memory::Buffer;

/// Current date in RFC 1123 form for the `Date` header.
pub fn http_date() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Headers the head writer places in canonical positions; everything else
/// follows in insertion order with its original casing.
const FRAMING_HEADERS: [&str; 4] = ["date", "content-length", "transfer-encoding", "content-type"];

/// Serializes response messages into an internal buffer. One instance per
/// connection; `take_buffer` hands the accumulated bytes to the wire.
pub struct ResponseSerializer {
    buf: BytesMut,
}

impl Default for ResponseSerializer {
    fn default() -> Self {
        ResponseSerializer {
            buf: BytesMut::with_capacity(1024),
        }
    }
}

impl ResponseSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    fn put_header(&mut self, name: &str, value: &str) {
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.extend_from_slice(b": ");
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Status line and header block, blank line included.
    pub fn write_head(&mut self, resp: &HttpResponsePacket) {
        self.buf.extend_from_slice(resp.version.as_str().as_bytes());
        self.buf.extend_from_slice(b" ");
        self.buf
            .extend_from_slice(format!("{}", resp.status).as_bytes());
        self.buf.extend_from_slice(b" ");
        self.buf.extend_from_slice(resp.reason_str().as_bytes());
        self.buf.extend_from_slice(b"\r\n");

        match resp.headers.get("date") {
            Some(d) => {
                let d = d.to_string();
                self.put_header("Date", &d);
            }
            None => {
                let d = http_date();
                self.put_header("Date", &d);
            }
        }
        if resp.chunked {
            self.put_header("Transfer-Encoding", "chunked");
        } else if let Some(n) = resp.content_length {
            let v = n.to_string();
            self.put_header("Content-Length", &v);
        }
        if let Some(ct) = resp.headers.get("content-type") {
            let ct = ct.to_string();
            self.put_header("Content-Type", &ct);
        }
        let entries: Vec<(String, String)> = resp
            .headers
            .iter()
            .filter(|(n, _)| {
                let lower = n.to_ascii_lowercase();
                !FRAMING_HEADERS.contains(&lower.as_str())
            })
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect();
        for (name, value) in entries {
            self.put_header(&name, &value);
        }
        if !resp.keep_alive {
            self.put_header("Connection", "close");
        } else if resp.version == crate::http::request::Version::Http10 {
            self.put_header("Connection", "keep-alive");
        }
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Body chunk with the framing the head announced. HEAD responses and
    /// payload-forbidden statuses emit nothing.
    pub fn write_body(&mut self, resp: &HttpResponsePacket, payload: &Buffer, last: bool) {
        if !resp.emits_body() {
            return;
        }
        if resp.chunked {
            if payload.remaining() > 0 {
                let size = format!("{:x}\r\n", payload.remaining());
                self.buf.extend_from_slice(size.as_bytes());
                self.buf.extend_from_slice(&payload.to_vec());
                self.buf.extend_from_slice(b"\r\n");
            }
            if last {
                self.buf.extend_from_slice(b"0\r\n\r\n");
            }
        } else if payload.remaining() > 0 {
            self.buf.extend_from_slice(&payload.to_vec());
        }
    }

    /// Interim `100 Continue` line, sent before the request body is read.
    pub fn write_continue(&mut self) {
        self.buf.extend_from_slice(b"HTTP/1.1 100 Continue\r\n\r\n");
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the accumulated bytes; the serializer stays usable.
    pub fn take_buffer(&mut self) -> Buffer {
        Buffer::from(self.buf.split())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::headers::HeaderMap;
    use crate::http::request::Version;

    fn head_string(resp: &HttpResponsePacket) -> String {
        let mut s = ResponseSerializer::new();
        s.write_head(resp);
        String::from_utf8(s.take_buffer().to_vec()).unwrap()
    }

    #[test]
    fn status_line_and_framing_order() {
        let mut resp = HttpResponsePacket::new(200);
        resp.content_length = Some(2);
        resp.headers.add("Content-Type", "text/plain");
        resp.headers.add("X-Custom", "1");
        let head = head_string(&resp);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        let date_at = head.find("Date:").unwrap();
        let cl_at = head.find("Content-Length: 2").unwrap();
        let ct_at = head.find("Content-Type: text/plain").unwrap();
        let custom_at = head.find("X-Custom: 1").unwrap();
        assert!(date_at < cl_at && cl_at < ct_at && ct_at < custom_at);
        assert!(head.ends_with("\r\n\r\n"));
    }

    #[test]
    fn connection_header_policy() {
        let mut resp = HttpResponsePacket::new(200);
        resp.keep_alive = false;
        assert!(head_string(&resp).contains("Connection: close\r\n"));

        let mut resp = HttpResponsePacket::new(200);
        resp.version = Version::Http10;
        resp.keep_alive = true;
        assert!(head_string(&resp).contains("Connection: keep-alive\r\n"));

        let mut resp = HttpResponsePacket::new(200);
        resp.keep_alive = true;
        assert!(!head_string(&resp).contains("Connection:"));
    }

    #[test]
    fn chunked_body_framing() {
        let mut resp = HttpResponsePacket::new(200);
        resp.chunked = true;
        let mut s = ResponseSerializer::new();
        s.write_body(&resp, &Buffer::from(&b"hello"[..]), false);
        s.write_body(&resp, &Buffer::from(&b""[..]), true);
        let out = s.take_buffer().to_vec();
        assert_eq!(out, b"5\r\nhello\r\n0\r\n\r\n");
    }

    #[test]
    fn head_response_suppresses_body() {
        let mut resp = HttpResponsePacket::new(200);
        resp.content_length = Some(42);
        resp.head_request = true;
        let mut s = ResponseSerializer::new();
        s.write_head(&resp);
        s.write_body(&resp, &Buffer::from(&b"should not appear"[..]), true);
        let out = String::from_utf8(s.take_buffer().to_vec()).unwrap();
        assert!(out.contains("Content-Length: 42\r\n"));
        assert!(!out.contains("should not appear"));
    }

    #[test]
    fn reason_phrase_from_table() {
        let mut resp = HttpResponsePacket::new(404);
        resp.headers = HeaderMap::new();
        assert!(head_string(&resp).starts_with("HTTP/1.1 404 Not Found\r\n"));
    }
}
