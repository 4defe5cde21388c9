/*
 * response.rs
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

//! Response head metadata, mirrored from the request packet.

use crate::http::headers::HeaderMap;
use crate::http::request::Version;
use crate::http::status::reason_phrase;

/// Response head: status line plus headers. The serializer derives framing
/// (identity vs chunked) from `content_length`/`chunked` and the version.
#[derive(Debug, Clone)]
pub struct HttpResponsePacket {
    pub version: Version,
    pub status: u16,
    pub reason: Option<String>,
    pub headers: HeaderMap,
    pub content_length: Option<u64>,
    pub chunked: bool,
    /// Response to a HEAD request: head is emitted, body suppressed.
    pub head_request: bool,
    /// Whether the connection stays open after this message.
    pub keep_alive: bool,
}

impl HttpResponsePacket {
    pub fn new(status: u16) -> Self {
        HttpResponsePacket {
            version: Version::Http11,
            status,
            reason: None,
            headers: HeaderMap::new(),
            content_length: None,
            chunked: false,
            head_request: false,
            keep_alive: true,
        }
    }

    pub fn reason_str(&self) -> &str {
        match &self.reason {
            Some(r) => r,
            None => reason_phrase(self.status),
        }
    }

    /// Status codes that never carry a payload (1xx, 204, 304).
    pub fn payload_forbidden(&self) -> bool {
        self.status / 100 == 1 || self.status == 204 || self.status == 304
    }

    /// True when a body will actually be written to the wire.
    pub fn emits_body(&self) -> bool {
        !self.head_request && !self.payload_forbidden()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_falls_back_to_table() {
        let r = HttpResponsePacket::new(404);
        assert_eq!(r.reason_str(), "Not Found");
        let mut r = HttpResponsePacket::new(200);
        r.reason = Some("Fine".to_string());
        assert_eq!(r.reason_str(), "Fine");
    }

    #[test]
    fn payload_forbidden_codes() {
        assert!(HttpResponsePacket::new(100).payload_forbidden());
        assert!(HttpResponsePacket::new(204).payload_forbidden());
        assert!(HttpResponsePacket::new(304).payload_forbidden());
        assert!(!HttpResponsePacket::new(200).payload_forbidden());
    }

    #[test]
    fn head_suppresses_body() {
        let mut r = HttpResponsePacket::new(200);
        r.content_length = Some(42);
        r.head_request = true;
        assert!(!r.emits_body());
    }
}
