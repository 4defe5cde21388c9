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

//! AJP payload decoding: FORWARD_REQUEST messages and body data packets.
//! Framing (magic + length) is handled by the filter's `AjpParsingState`;
//! these functions consume a complete packet payload.

use bytes::{Buf, Bytes};

use crate::error::{EngineError, EngineResult};
use crate::http::request::{HttpRequestPacket, Method, Version};

use super::*;

/// Per-connection framing state: whether the 4-byte packet header has been
/// consumed and, if so, the pending payload length.
#[derive(Debug, Default, Clone, Copy)]
pub struct AjpParsingState {
    pub header_parsed: bool,
    pub length: u16,
}

/// AJP string: u16 length, bytes, NUL terminator. Length 0xFFFF is null.
pub fn get_string(buf: &mut Bytes) -> EngineResult<Option<String>> {
    if buf.remaining() < 2 {
        return Err(EngineError::protocol("truncated AJP string length"));
    }
    let len = buf.get_u16() as usize;
    if len == 0xFFFF {
        return Ok(None);
    }
    if buf.remaining() < len + 1 {
        return Err(EngineError::protocol("truncated AJP string"));
    }
    let raw = buf.split_to(len);
    let nul = buf.get_u8();
    if nul != 0 {
        return Err(EngineError::protocol("AJP string missing NUL terminator"));
    }
    let s = std::str::from_utf8(&raw)
        .map_err(|_| EngineError::protocol("non-UTF-8 AJP string"))?
        .to_string();
    Ok(Some(s))
}

fn require_string(buf: &mut Bytes, what: &str) -> EngineResult<String> {
    get_string(buf)?
        .ok_or_else(|| EngineError::protocol(format!("null AJP string for {}", what)))
}

fn get_u16_checked(buf: &mut Bytes, what: &str) -> EngineResult<u16> {
    if buf.remaining() < 2 {
        return Err(EngineError::protocol(format!("truncated {}", what)));
    }
    Ok(buf.get_u16())
}

fn get_u8_checked(buf: &mut Bytes, what: &str) -> EngineResult<u8> {
    if !buf.has_remaining() {
        return Err(EngineError::protocol(format!("truncated {}", what)));
    }
    Ok(buf.get_u8())
}

/// Decode a FORWARD_REQUEST payload (the leading type byte already
/// consumed) into a request packet.
pub fn parse_forward_request(buf: &mut Bytes) -> EngineResult<HttpRequestPacket> {
    let method_code = get_u8_checked(buf, "method code")?;
    let stored_method_needed = method_code == 0xFF;
    let method = if stored_method_needed {
        // Resolved from the STORED_METHOD attribute below.
        String::new()
    } else {
        method_name(method_code)
            .ok_or_else(|| {
                EngineError::protocol(format!("unknown AJP method code {}", method_code))
            })?
            .to_string()
    };
    let protocol = require_string(buf, "protocol")?;
    let uri = require_string(buf, "request URI")?;
    let remote_addr = get_string(buf)?;
    let remote_host = get_string(buf)?;
    let server_name = get_string(buf)?;
    let server_port = get_u16_checked(buf, "server port")?;
    let is_ssl = get_u8_checked(buf, "is-ssl flag")? != 0;

    let version = Version::from_name(&protocol)?;
    let mut packet = HttpRequestPacket::new(Method::from_name(&method), uri, version);
    packet.remote_addr = remote_addr;
    packet.remote_host = remote_host;
    packet.server_name = server_name;
    packet.server_port = server_port;
    packet.is_secure = is_ssl;

    let num_headers = get_u16_checked(buf, "header count")?;
    for _ in 0..num_headers {
        let marker = get_u16_checked(buf, "header name")?;
        let name = if marker & 0xFF00 == 0xA000 {
            request_header_name(marker)
                .ok_or_else(|| {
                    EngineError::protocol(format!("unknown AJP header code {:#06x}", marker))
                })?
                .to_string()
        } else {
            // The marker was a string length; read name bytes + NUL.
            let len = marker as usize;
            if buf.remaining() < len + 1 {
                return Err(EngineError::protocol("truncated AJP header name"));
            }
            let raw = buf.split_to(len);
            if buf.get_u8() != 0 {
                return Err(EngineError::protocol("AJP header name missing NUL"));
            }
            std::str::from_utf8(&raw)
                .map_err(|_| EngineError::protocol("non-UTF-8 AJP header name"))?
                .to_string()
        };
        let value = require_string(buf, "header value")?;
        packet.headers.add(name, value);
    }

    loop {
        let code = get_u8_checked(buf, "attribute code")?;
        match code {
            ATTR_DONE => break,
            ATTR_QUERY_STRING => {
                packet.query = get_string(buf)?;
            }
            ATTR_STORED_METHOD => {
                let stored = require_string(buf, "stored method")?;
                packet.method = Method::from_name(&stored);
            }
            ATTR_REQ_ATTRIBUTE => {
                let name = require_string(buf, "request attribute name")?;
                let value = require_string(buf, "request attribute value")?;
                packet.request_attributes.push((name, value));
            }
            ATTR_CONTEXT | ATTR_SERVLET_PATH | ATTR_REMOTE_USER | ATTR_AUTH_TYPE | ATTR_ROUTE
            | ATTR_SSL_CERT | ATTR_SSL_CIPHER | ATTR_SSL_SESSION | ATTR_SECRET => {
                let name = match code {
                    ATTR_CONTEXT => "context",
                    ATTR_SERVLET_PATH => "servlet_path",
                    ATTR_REMOTE_USER => "remote_user",
                    ATTR_AUTH_TYPE => "auth_type",
                    ATTR_ROUTE => "route",
                    ATTR_SSL_CERT => "ssl_cert",
                    ATTR_SSL_CIPHER => "ssl_cipher",
                    ATTR_SSL_SESSION => "ssl_session",
                    _ => "secret",
                };
                if let Some(value) = get_string(buf)? {
                    packet.request_attributes.push((name.to_string(), value));
                }
            }
            ATTR_SSL_KEY_SIZE => {
                let bits = get_u16_checked(buf, "ssl key size")?;
                packet
                    .request_attributes
                    .push(("ssl_key_size".to_string(), bits.to_string()));
            }
            other => {
                return Err(EngineError::protocol(format!(
                    "unknown AJP attribute code {:#04x}",
                    other
                )));
            }
        }
    }

    if stored_method_needed && matches!(packet.method, Method::Other(ref s) if s.is_empty()) {
        return Err(EngineError::protocol(
            "method code 0xFF without STORED_METHOD attribute",
        ));
    }
    packet.finalize()?;
    Ok(packet)
}

/// Decode a body data packet: u16 length prefix + bytes. An empty payload
/// (no prefix at all) signals end of the request body.
pub fn parse_data_chunk(buf: &mut Bytes) -> EngineResult<Bytes> {
    if buf.is_empty() {
        return Ok(Bytes::new());
    }
    let len = get_u16_checked(buf, "body chunk length")? as usize;
    if buf.remaining() < len {
        return Err(EngineError::protocol("truncated AJP body chunk"));
    }
    Ok(buf.split_to(len))
}
