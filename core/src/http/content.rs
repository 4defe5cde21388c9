/*
 * content.rs
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

//! Streamed message content: a header reference, a payload buffer, and a
//! terminal flag. Exactly one emission per message carries `last = true`;
//! trailers ride on that terminal emission.

use std::sync::Arc;

use crate::http::request::HttpRequestPacket;
use crate::http::response::HttpResponsePacket;
use crate::memory::Buffer;

/// Shared reference to the head of the message a payload belongs to.
/// Request and response packets are sibling records; neither owns the other.
#[derive(Clone)]
pub enum PacketRef {
    Request(Arc<HttpRequestPacket>),
    Response(Arc<HttpResponsePacket>),
}

impl PacketRef {
    pub fn as_request(&self) -> Option<&Arc<HttpRequestPacket>> {
        match self {
            PacketRef::Request(r) => Some(r),
            PacketRef::Response(_) => None,
        }
    }

    pub fn as_response(&self) -> Option<&Arc<HttpResponsePacket>> {
        match self {
            PacketRef::Response(r) => Some(r),
            PacketRef::Request(_) => None,
        }
    }
}

/// One streamed chunk of an HTTP message body.
pub struct HttpContent {
    pub header: PacketRef,
    pub payload: Buffer,
    pub last: bool,
    /// Trailer headers; populated only on the terminal chunk of a chunked
    /// message.
    pub trailers: Vec<(String, String)>,
}

impl HttpContent {
    pub fn new(header: PacketRef, payload: Buffer, last: bool) -> Self {
        HttpContent {
            header,
            payload,
            last,
            trailers: Vec::new(),
        }
    }

    /// Terminal chunk with no payload.
    pub fn terminal(header: PacketRef) -> Self {
        HttpContent::new(header, Buffer::empty(), true)
    }
}
