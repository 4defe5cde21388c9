/*
 * writer.rs
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

//! AJP response writer: serializes SEND_HEADERS, SEND_BODY_CHUNK,
//! END_RESPONSE, GET_BODY_CHUNK and CPONG packets into a buffer. Outbound
//! body buffers are split so no packet exceeds the 8 KiB cap.

use bytes::{Buf, BufMut, BytesMut};

use crate::http::response::HttpResponsePacket;
use crate::memory::Buffer;

use super::*;

/// Writes server-origin AJP packets into an internal buffer. One instance
/// per connection; `take_buffer` hands the bytes to the wire.
pub struct AjpWriter {
    buf: BytesMut,
}

impl Default for AjpWriter {
    fn default() -> Self {
        AjpWriter {
            buf: BytesMut::with_capacity(MAX_PACKET_SIZE),
        }
    }
}

impl AjpWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn put_string(&mut self, s: &str) {
        self.buf.put_u16(s.len() as u16);
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.put_u8(0);
    }

    fn packet_header(&mut self, payload_len: usize) {
        debug_assert!(payload_len + PACKET_HEADER_LENGTH <= MAX_PACKET_SIZE);
        self.buf.put_u16(MAGIC_SERVER);
        self.buf.put_u16(payload_len as u16);
    }

    /// SEND_HEADERS: status, reason, header count, headers (coded where a
    /// common code exists, string-named otherwise).
    pub fn write_send_headers(&mut self, resp: &HttpResponsePacket) {
        let mut payload = BytesMut::with_capacity(256);
        payload.put_u8(TYPE_SEND_HEADERS);
        payload.put_u16(resp.status);
        let reason = resp.reason_str();
        payload.put_u16(reason.len() as u16);
        payload.extend_from_slice(reason.as_bytes());
        payload.put_u8(0);

        let mut headers: Vec<(String, String)> = resp
            .headers
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect();
        if let Some(n) = resp.content_length {
            if !resp.headers.contains("content-length") {
                headers.push(("Content-Length".to_string(), n.to_string()));
            }
        }
        payload.put_u16(headers.len() as u16);
        for (name, value) in &headers {
            match response_header_code(name) {
                Some(code) => payload.put_u16(code),
                None => {
                    payload.put_u16(name.len() as u16);
                    payload.extend_from_slice(name.as_bytes());
                    payload.put_u8(0);
                }
            }
            payload.put_u16(value.len() as u16);
            payload.extend_from_slice(value.as_bytes());
            payload.put_u8(0);
        }

        self.packet_header(payload.len());
        self.buf.extend_from_slice(&payload);
    }

    /// SEND_BODY_CHUNK packets; the buffer is split so each payload stays
    /// within `MAX_BODY_CHUNK`.
    pub fn write_body_chunk(&mut self, data: &Buffer) {
        let mut data = data.duplicate();
        while data.remaining() > 0 {
            let take = data.remaining().min(MAX_BODY_CHUNK);
            let rest = data.split(data.position() + take);
            let piece = data.to_vec();
            data = rest;

            // type + length prefix + bytes + trailing NUL
            self.packet_header(piece.len() + 4);
            self.buf.put_u8(TYPE_SEND_BODY_CHUNK);
            self.buf.put_u16(piece.len() as u16);
            self.buf.extend_from_slice(&piece);
            self.buf.put_u8(0);
        }
    }

    /// END_RESPONSE with the connection-reuse flag.
    pub fn write_end_response(&mut self, reuse: bool) {
        self.packet_header(2);
        self.buf.put_u8(TYPE_END_RESPONSE);
        self.buf.put_u8(reuse as u8);
    }

    /// GET_BODY_CHUNK requesting up to `requested` bytes from the forwarder.
    pub fn write_get_body_chunk(&mut self, requested: u16) {
        self.packet_header(3);
        self.buf.put_u8(TYPE_GET_BODY_CHUNK);
        self.buf.put_u16(requested);
    }

    /// CPONG reply to a CPING liveness probe.
    pub fn write_cpong(&mut self) {
        self.packet_header(1);
        self.buf.put_u8(TYPE_CPONG);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the accumulated packets; the writer stays usable.
    pub fn take_buffer(&mut self) -> Buffer {
        Buffer::from(self.buf.split())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn split_packets(mut wire: &[u8]) -> Vec<(u8, Vec<u8>)> {
        let mut out = Vec::new();
        while !wire.is_empty() {
            let magic = u16::from_be_bytes([wire[0], wire[1]]);
            assert_eq!(magic, MAGIC_SERVER);
            let len = u16::from_be_bytes([wire[2], wire[3]]) as usize;
            assert!(len + PACKET_HEADER_LENGTH <= MAX_PACKET_SIZE);
            let payload = &wire[4..4 + len];
            out.push((payload[0], payload.to_vec()));
            wire = &wire[4 + len..];
        }
        out
    }

    #[test]
    fn send_headers_uses_codes_for_common_headers() {
        let mut resp = HttpResponsePacket::new(200);
        resp.headers.add("Content-Type", "text/plain");
        resp.headers.add("X-Custom", "v");
        resp.content_length = Some(2);
        let mut w = AjpWriter::new();
        w.write_send_headers(&resp);
        let packets = split_packets(&w.take_buffer().to_vec());
        assert_eq!(packets.len(), 1);
        let (ty, payload) = &packets[0];
        assert_eq!(*ty, TYPE_SEND_HEADERS);
        // status 200
        assert_eq!(u16::from_be_bytes([payload[1], payload[2]]), 200);
        // coded Content-Type appears as 0xA001 somewhere in the payload
        assert!(payload.windows(2).any(|w| w == [0xA0, 0x01]));
        // string-named X-Custom appears literally
        assert!(payload
            .windows(8)
            .any(|w| w == b"X-Custom".as_slice()));
    }

    #[test]
    fn large_body_split_into_capped_chunks() {
        let data = vec![0xABu8; 20 * 1024];
        let mut w = AjpWriter::new();
        w.write_body_chunk(&Buffer::from(data.clone()));
        w.write_end_response(true);
        let packets = split_packets(&w.take_buffer().to_vec());
        let body_packets: Vec<_> = packets
            .iter()
            .filter(|(t, _)| *t == TYPE_SEND_BODY_CHUNK)
            .collect();
        assert!(body_packets.len() >= 3);
        let mut total = 0;
        for (_, payload) in &body_packets {
            let len = u16::from_be_bytes([payload[1], payload[2]]) as usize;
            assert!(len <= MAX_BODY_CHUNK);
            assert_eq!(payload.len(), len + 4);
            assert_eq!(payload[payload.len() - 1], 0);
            total += len;
        }
        assert_eq!(total, data.len());
        let (ty, payload) = packets.last().unwrap();
        assert_eq!(*ty, TYPE_END_RESPONSE);
        assert_eq!(payload[1], 1);
    }

    #[test]
    fn control_packets() {
        let mut w = AjpWriter::new();
        w.write_get_body_chunk(BODY_CHUNK_REQUEST);
        w.write_cpong();
        let packets = split_packets(&w.take_buffer().to_vec());
        assert_eq!(packets[0].0, TYPE_GET_BODY_CHUNK);
        assert_eq!(
            u16::from_be_bytes([packets[0].1[1], packets[0].1[2]]),
            BODY_CHUNK_REQUEST
        );
        assert_eq!(packets[1].0, TYPE_CPONG);
    }
}
