/*
 * request.rs
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

//! Parsed request metadata. Packets are finalized on the read path and then
//! shared immutably with the body content; per-connection mutable parse and
//! keep-alive state lives in `ProcessingState`.

use crate::error::{EngineError, EngineResult};
use crate::http::headers::HeaderMap;

/// HTTP request method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Trace,
    Patch,
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
            Method::Other(s) => s,
        }
    }

    pub fn from_name(name: &str) -> Method {
        match name {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "HEAD" => Method::Head,
            "OPTIONS" => Method::Options,
            "TRACE" => Method::Trace,
            "PATCH" => Method::Patch,
            other => Method::Other(other.to_string()),
        }
    }

    /// Methods for which a request payload is undefined; a config flag
    /// decides whether such payloads are accepted anyway.
    pub fn payload_undefined(&self) -> bool {
        matches!(self, Method::Get | Method::Head | Method::Delete)
    }
}

/// HTTP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }

    pub fn from_name(name: &str) -> EngineResult<Version> {
        match name {
            "HTTP/1.0" => Ok(Version::Http10),
            "HTTP/1.1" => Ok(Version::Http11),
            other => Err(EngineError::protocol(format!(
                "unsupported protocol version {:?}",
                other
            ))),
        }
    }

    /// Keep-alive default when no Connection header is present.
    pub fn keep_alive_default(&self) -> bool {
        matches!(self, Version::Http11)
    }
}

/// Parsed request head plus the forwarding metadata an AJP front-end supplies.
#[derive(Debug, Clone)]
pub struct HttpRequestPacket {
    pub method: Method,
    pub uri: String,
    pub query: Option<String>,
    pub version: Version,
    pub headers: HeaderMap,
    pub content_length: Option<u64>,
    pub transfer_encodings: Vec<String>,
    pub content_encodings: Vec<String>,
    pub chunked: bool,
    pub expect_continue: bool,
    pub remote_addr: Option<String>,
    pub remote_host: Option<String>,
    pub server_name: Option<String>,
    pub server_port: u16,
    pub is_secure: bool,
    /// Pass-through request attributes (AJP `req_attribute` TLVs).
    pub request_attributes: Vec<(String, String)>,
}

impl HttpRequestPacket {
    pub fn new(method: Method, uri: impl Into<String>, version: Version) -> Self {
        let raw: String = uri.into();
        let (uri, query) = match raw.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (raw, None),
        };
        HttpRequestPacket {
            method,
            uri,
            query,
            version,
            headers: HeaderMap::new(),
            content_length: None,
            transfer_encodings: Vec::new(),
            content_encodings: Vec::new(),
            chunked: false,
            expect_continue: false,
            remote_addr: None,
            remote_host: None,
            server_name: None,
            server_port: 0,
            is_secure: false,
            request_attributes: Vec::new(),
        }
    }

    /// Derive framing metadata from the collected headers. Called once when
    /// the header section is complete; the packet is immutable afterwards.
    pub fn finalize(&mut self) -> EngineResult<()> {
        self.transfer_encodings = self.headers.list_values("transfer-encoding");
        self.content_encodings = self.headers.list_values("content-encoding");
        self.chunked = self
            .transfer_encodings
            .iter()
            .any(|e| e.eq_ignore_ascii_case("chunked"));

        let mut content_length = None;
        for v in self.headers.get_all("content-length") {
            let n: u64 = v.trim().parse().map_err(|_| {
                EngineError::protocol(format!("invalid Content-Length {:?}", v))
            })?;
            match content_length {
                None => content_length = Some(n),
                Some(prev) if prev == n => {}
                Some(_) => {
                    return Err(EngineError::protocol("conflicting Content-Length headers"));
                }
            }
        }
        // Chunked transfer takes precedence over content length.
        self.content_length = if self.chunked { None } else { content_length };

        self.expect_continue = self
            .headers
            .get("expect")
            .map(|v| v.trim().eq_ignore_ascii_case("100-continue"))
            .unwrap_or(false);
        Ok(())
    }

    /// True when the message carries a body per its framing headers.
    pub fn has_payload(&self) -> bool {
        self.chunked || self.content_length.map(|n| n > 0).unwrap_or(false)
    }

    /// Keep-alive decision from version and Connection header.
    pub fn keep_alive_requested(&self) -> bool {
        match self.headers.get("connection") {
            Some(v) => {
                let mut keep = self.version.keep_alive_default();
                for token in v.split(',') {
                    let token = token.trim();
                    if token.eq_ignore_ascii_case("close") {
                        keep = false;
                    } else if token.eq_ignore_ascii_case("keep-alive") {
                        keep = true;
                    }
                }
                keep
            }
            None => self.version.keep_alive_default(),
        }
    }
}

/// Per-connection processing state: parse stage flags, error flag, and the
/// keep-alive decision. Kept next to the codec filter rather than inside the
/// shared packet so the packet can be handed off immutably.
#[derive(Debug, Default)]
pub struct ProcessingState {
    pub error: bool,
    pub keep_alive: bool,
    pub requests_completed: u64,
    pub continue_sent: bool,
    pub continue_refused: bool,
}

impl ProcessingState {
    pub fn reset_for_next_request(&mut self) {
        self.continue_sent = false;
        self.continue_refused = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_query_split() {
        let p = HttpRequestPacket::new(Method::Get, "/path?a=1&b=2", Version::Http11);
        assert_eq!(p.uri, "/path");
        assert_eq!(p.query.as_deref(), Some("a=1&b=2"));
    }

    #[test]
    fn chunked_wins_over_content_length() {
        let mut p = HttpRequestPacket::new(Method::Post, "/", Version::Http11);
        p.headers.add("Content-Length", "10");
        p.headers.add("Transfer-Encoding", "chunked");
        p.finalize().unwrap();
        assert!(p.chunked);
        assert_eq!(p.content_length, None);
        assert!(p.has_payload());
    }

    #[test]
    fn conflicting_content_length_rejected() {
        let mut p = HttpRequestPacket::new(Method::Post, "/", Version::Http11);
        p.headers.add("Content-Length", "10");
        p.headers.add("Content-Length", "11");
        assert!(p.finalize().is_err());
    }

    #[test]
    fn keep_alive_by_version_and_header() {
        let mut p = HttpRequestPacket::new(Method::Get, "/", Version::Http11);
        p.finalize().unwrap();
        assert!(p.keep_alive_requested());
        p.headers.add("Connection", "close");
        assert!(!p.keep_alive_requested());

        let mut p10 = HttpRequestPacket::new(Method::Get, "/", Version::Http10);
        p10.finalize().unwrap();
        assert!(!p10.keep_alive_requested());
        p10.headers.add("Connection", "keep-alive");
        assert!(p10.keep_alive_requested());
    }

    #[test]
    fn expect_continue_flag() {
        let mut p = HttpRequestPacket::new(Method::Post, "/", Version::Http11);
        p.headers.add("Expect", "100-continue");
        p.headers.add("Content-Length", "5");
        p.finalize().unwrap();
        assert!(p.expect_continue);
    }
}
