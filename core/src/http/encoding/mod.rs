/*
 * mod.rs
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

//! Pluggable content-encoding transformers.
//!
//! The registry maps an encoding name (and aliases) to a factory; codec
//! filters instantiate one transformer per connection per direction, since
//! transformers carry stream state. On read the `Content-Encoding` list is
//! applied right-to-left; on write the mirror applies.

pub mod gzip;

use crate::error::EngineResult;
use crate::filter::ConnectionCtx;
use crate::http::request::HttpRequestPacket;
use crate::http::response::HttpResponsePacket;
use crate::memory::Buffer;

pub use gzip::GzipEncoding;

/// Result of one decode step: transformed payload, if any, plus bytes past
/// the end of the encoded stream that belong to the next message.
#[derive(Default, Debug)]
pub struct DecodeOutput {
    pub produced: Option<Buffer>,
    pub remainder: Option<Buffer>,
}

/// A streaming transform pair for one `Content-Encoding` token.
pub trait ContentEncoding: Send {
    fn name(&self) -> &str;

    fn aliases(&self) -> &[&str] {
        &[]
    }

    /// Whether the decoder applies to this request's body.
    fn want_decode(&self, request: &HttpRequestPacket) -> bool;

    /// Whether the encoder applies to this response's body.
    fn want_encode(&self, response: &HttpResponsePacket) -> bool;

    fn decode(&mut self, conn: &mut ConnectionCtx, input: Buffer) -> EngineResult<DecodeOutput>;

    fn encode(&mut self, conn: &mut ConnectionCtx, input: Buffer) -> EngineResult<Option<Buffer>>;

    /// Flush pending output at end of message (encode side); verify stream
    /// completeness (decode side).
    fn finish(&mut self, conn: &mut ConnectionCtx) -> EngineResult<Option<Buffer>>;

    /// Prepare for the next message on the same connection.
    fn reset(&mut self);
}

type EncodingFactory = Box<dyn Fn() -> Box<dyn ContentEncoding> + Send + Sync>;

struct Registration {
    name: String,
    aliases: Vec<String>,
    factory: EncodingFactory,
}

/// Name/alias → transformer factory.
#[derive(Default)]
pub struct EncodingRegistry {
    registrations: Vec<Registration>,
}

impl EncodingRegistry {
    pub fn new() -> Self {
        EncodingRegistry::default()
    }

    /// Registry with the built-in gzip codec (alias `deflate` maps to the
    /// same member format the forwarders actually send).
    pub fn with_defaults(compression_level: u32) -> Self {
        let mut reg = EncodingRegistry::new();
        reg.register(
            "gzip",
            &["deflate", "x-gzip"],
            Box::new(move || -> Box<dyn ContentEncoding> {
                Box::new(GzipEncoding::new(compression_level))
            }),
        );
        reg
    }

    pub fn register(&mut self, name: &str, aliases: &[&str], factory: EncodingFactory) {
        self.registrations.push(Registration {
            name: name.to_string(),
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
            factory,
        });
    }

    /// Instantiate a transformer for the encoding token, if registered.
    pub fn lookup(&self, token: &str) -> Option<Box<dyn ContentEncoding>> {
        self.registrations
            .iter()
            .find(|r| {
                r.name.eq_ignore_ascii_case(token)
                    || r.aliases.iter().any(|a| a.eq_ignore_ascii_case(token))
            })
            .map(|r| (r.factory)())
    }

    /// Decoder chain for a request, applied right-to-left over its
    /// `Content-Encoding` list. Unknown tokens yield None (the body is
    /// passed through opaque).
    pub fn decoders_for(&self, request: &HttpRequestPacket) -> Option<Vec<Box<dyn ContentEncoding>>> {
        let mut chain = Vec::new();
        for token in request.content_encodings.iter().rev() {
            let dec = self.lookup(token)?;
            if dec.want_decode(request) {
                chain.push(dec);
            }
        }
        Some(chain)
    }

    /// Encoder chain for a response's `Content-Encoding` list, in order.
    pub fn encoders_for(&self, response: &HttpResponsePacket) -> Option<Vec<Box<dyn ContentEncoding>>> {
        let mut chain = Vec::new();
        for token in response.headers.list_values("content-encoding") {
            let enc = self.lookup(&token)?;
            if enc.want_encode(response) {
                chain.push(enc);
            }
        }
        Some(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::{Method, Version};

    #[test]
    fn alias_lookup_is_case_insensitive() {
        let reg = EncodingRegistry::with_defaults(6);
        assert!(reg.lookup("GZIP").is_some());
        assert!(reg.lookup("x-gzip").is_some());
        assert!(reg.lookup("deflate").is_some());
        assert!(reg.lookup("br").is_none());
    }

    #[test]
    fn decoder_chain_right_to_left() {
        let reg = EncodingRegistry::with_defaults(6);
        let mut req = HttpRequestPacket::new(Method::Post, "/", Version::Http11);
        req.headers.add("Content-Encoding", "gzip");
        req.headers.add("Content-Length", "10");
        req.finalize().unwrap();
        let chain = reg.decoders_for(&req).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].name(), "gzip");
    }

    #[test]
    fn unknown_token_yields_none() {
        let reg = EncodingRegistry::with_defaults(6);
        let mut req = HttpRequestPacket::new(Method::Post, "/", Version::Http11);
        req.headers.add("Content-Encoding", "br, gzip");
        req.finalize().unwrap();
        assert!(reg.decoders_for(&req).is_none());
    }
}
