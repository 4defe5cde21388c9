/*
 * server.rs
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

//! Server-side collaborator surface: configuration, the `HttpHandler`
//! contract, the pattern registry, and the dispatch filter that sits on top
//! of a codec filter (HTTP or AJP).

use bytes::BytesMut;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{EngineError, EngineResult};
use crate::filter::{Filter, FilterChainContext, Message, NextAction};
use crate::http::content::{HttpContent, PacketRef};
use crate::http::headers::HeaderMap;
use crate::http::request::{HttpRequestPacket, Method};
use crate::http::response::HttpResponsePacket;
use crate::memory::Buffer;

static INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Default server name. The counter is monotonic but callers must not
/// depend on exact numbering across concurrent starts.
pub fn default_server_name() -> String {
    format!("graticola-{}", INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Compression strategy hint for content encoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionStrategy {
    #[default]
    Default,
    Filtered,
    HuffmanOnly,
}

/// In-process configuration, builder style.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_request_line_size: usize,
    pub max_request_header_size: usize,
    /// Residual body bytes the server swallows to keep a connection alive
    /// after a short-read request; -1 means unlimited.
    pub max_payload_remainder_to_skip: i64,
    pub allow_payload_for_undefined_methods: bool,
    pub keep_alive_timeout: Duration,
    /// Requests served per connection before keep-alive is withdrawn;
    /// -1 means unlimited.
    pub max_keep_alive_requests: i64,
    pub chunking_enabled: bool,
    pub compression_level: u32,
    pub compression_strategy: CompressionStrategy,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    pub server_name: String,
    pub reactor_threads: usize,
    pub write_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            max_request_line_size: 8192,
            max_request_header_size: 8192,
            max_payload_remainder_to_skip: -1,
            allow_payload_for_undefined_methods: false,
            keep_alive_timeout: Duration::from_secs(30),
            max_keep_alive_requests: -1,
            chunking_enabled: true,
            compression_level: 6,
            compression_strategy: CompressionStrategy::Default,
            read_buffer_size: 8192,
            write_buffer_size: 8192,
            server_name: default_server_name(),
            reactor_threads: 1,
            write_queue_capacity: 1024,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        ServerConfig::default()
    }

    pub fn max_request_line_size(mut self, n: usize) -> Self {
        self.max_request_line_size = n;
        self
    }

    pub fn max_request_header_size(mut self, n: usize) -> Self {
        self.max_request_header_size = n;
        self
    }

    pub fn max_payload_remainder_to_skip(mut self, n: i64) -> Self {
        self.max_payload_remainder_to_skip = n;
        self
    }

    pub fn allow_payload_for_undefined_methods(mut self, allow: bool) -> Self {
        self.allow_payload_for_undefined_methods = allow;
        self
    }

    pub fn keep_alive_timeout(mut self, d: Duration) -> Self {
        self.keep_alive_timeout = d;
        self
    }

    pub fn max_keep_alive_requests(mut self, n: i64) -> Self {
        self.max_keep_alive_requests = n;
        self
    }

    pub fn chunking_enabled(mut self, enabled: bool) -> Self {
        self.chunking_enabled = enabled;
        self
    }

    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn compression_strategy(mut self, strategy: CompressionStrategy) -> Self {
        self.compression_strategy = strategy;
        self
    }

    pub fn buffer_sizes(mut self, read: usize, write: usize) -> Self {
        self.read_buffer_size = read;
        self.write_buffer_size = write;
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    pub fn reactor_threads(mut self, n: usize) -> Self {
        self.reactor_threads = n.max(1);
        self
    }
}

/// Handler-facing response: status, headers, aggregated body.
pub struct Response {
    pub status: u16,
    pub reason: Option<String>,
    pub headers: HeaderMap,
    body: BytesMut,
}

impl Default for Response {
    fn default() -> Self {
        Response {
            status: 200,
            reason: None,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
        }
    }
}

impl Response {
    pub fn new() -> Self {
        Response::default()
    }

    pub fn set_status(&mut self, status: u16) -> &mut Self {
        self.status = status;
        self
    }

    pub fn header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.add(name, value);
        self
    }

    pub fn write(&mut self, data: &[u8]) -> &mut Self {
        self.body.extend_from_slice(data);
        self
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }
}

/// Application entry point invoked once per complete request.
pub trait HttpHandler: Send + Sync {
    fn service(
        &self,
        request: &HttpRequestPacket,
        body: &[u8],
        response: &mut Response,
    ) -> EngineResult<()>;
}

impl<F> HttpHandler for F
where
    F: Fn(&HttpRequestPacket, &[u8], &mut Response) -> EngineResult<()> + Send + Sync,
{
    fn service(
        &self,
        request: &HttpRequestPacket,
        body: &[u8],
        response: &mut Response,
    ) -> EngineResult<()> {
        self(request, body, response)
    }
}

struct Route {
    context_path: String,
    url_pattern: String,
    handler: Arc<dyn HttpHandler>,
}

impl Route {
    /// Literal characters this route matches against the path, or None when
    /// it does not match. Longest literal wins.
    fn match_len(&self, path: &str) -> Option<usize> {
        let context = self.context_path.trim_end_matches('/');
        if !path.starts_with(context) {
            return None;
        }
        let rest = &path[context.len()..];
        if !rest.is_empty() && !rest.starts_with('/') {
            // "/app" must not claim "/apples".
            return None;
        }
        let rest = if rest.is_empty() { "/" } else { rest };
        let pattern = &self.url_pattern;
        if pattern == "/" || pattern.is_empty() {
            return Some(context.len() + 1);
        }
        if let Some(prefix) = pattern.strip_suffix("/*") {
            if rest == prefix || rest.starts_with(&format!("{}/", prefix)) {
                return Some(context.len() + prefix.len() + 1);
            }
            return None;
        }
        if rest == pattern {
            return Some(context.len() + pattern.len());
        }
        None
    }
}

/// Maps `(context_path, url_pattern)` pairs to handlers. Resolution picks
/// the longest literal match; equal lengths tie-break by registration order.
#[derive(Default)]
pub struct HandlerRegistry {
    routes: Vec<Route>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry::default()
    }

    pub fn register(
        &mut self,
        context_path: impl Into<String>,
        url_pattern: impl Into<String>,
        handler: Arc<dyn HttpHandler>,
    ) {
        self.routes.push(Route {
            context_path: context_path.into(),
            url_pattern: url_pattern.into(),
            handler,
        });
    }

    pub fn resolve(&self, path: &str) -> Option<Arc<dyn HttpHandler>> {
        let mut best: Option<(usize, &Route)> = None;
        for route in &self.routes {
            if let Some(len) = route.match_len(path) {
                let better = match best {
                    Some((best_len, _)) => len > best_len,
                    None => true,
                };
                if better {
                    best = Some((len, route));
                }
            }
        }
        best.map(|(_, r)| r.handler.clone())
    }
}

/// Dispatch filter: aggregates request content, resolves a handler, runs it,
/// and sends the response back down the chain.
pub struct HttpHandlerFilter {
    registry: Arc<HandlerRegistry>,
    body: BytesMut,
}

impl HttpHandlerFilter {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        HttpHandlerFilter {
            registry,
            body: BytesMut::new(),
        }
    }

    fn respond(
        &mut self,
        ctx: &mut FilterChainContext,
        request: &Arc<HttpRequestPacket>,
        response: Response,
    ) {
        let mut packet = HttpResponsePacket::new(response.status);
        packet.version = request.version;
        packet.reason = response.reason;
        packet.headers = response.headers;
        packet.head_request = request.method == Method::Head;
        packet.keep_alive = request.keep_alive_requested();
        if !packet.payload_forbidden() && !packet.headers.contains("content-encoding") {
            packet.content_length = Some(response.body.len() as u64);
        }
        let content = HttpContent::new(
            PacketRef::Response(Arc::new(packet)),
            Buffer::from(response.body),
            true,
        );
        ctx.write(Message::Content(content));
    }
}

impl Filter for HttpHandlerFilter {
    fn handle_read(&mut self, ctx: &mut FilterChainContext) -> EngineResult<NextAction> {
        let content = match ctx.message.take() {
            Message::Content(c) => c,
            _ => return Ok(NextAction::stop()),
        };
        let request = match &content.header {
            PacketRef::Request(r) => r.clone(),
            PacketRef::Response(_) => {
                return Err(EngineError::internal("response content on the read path"))
            }
        };
        self.body.extend_from_slice(&content.payload.to_vec());
        if !content.last {
            return Ok(NextAction::stop());
        }

        let body = self.body.split();
        let mut response = Response::new();
        match self.registry.resolve(&request.uri) {
            Some(handler) => {
                if let Err(e) = handler.service(&request, &body, &mut response) {
                    log::warn!("handler failed for {}: {}", request.uri, e);
                    response = Response::new();
                    response.set_status(500);
                }
            }
            None => {
                response.set_status(404);
            }
        }
        self.respond(ctx, &request, response);
        Ok(NextAction::stop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::Version;

    fn ok_handler(tag: &'static str) -> Arc<dyn HttpHandler> {
        Arc::new(
            move |_req: &HttpRequestPacket,
                  _body: &[u8],
                  resp: &mut Response|
                  -> EngineResult<()> {
                resp.header("X-Tag", tag);
                Ok(())
            },
        )
    }

    #[test]
    fn longest_match_wins() {
        let mut reg = HandlerRegistry::new();
        reg.register("", "/", ok_handler("root"));
        reg.register("", "/api/*", ok_handler("api"));
        reg.register("", "/api/users", ok_handler("users"));

        let check = |path: &str, tag: &str| {
            let h = reg.resolve(path).unwrap();
            let mut resp = Response::new();
            let req = HttpRequestPacket::new(Method::Get, path, Version::Http11);
            h.service(&req, b"", &mut resp).unwrap();
            assert_eq!(resp.headers.get("x-tag"), Some(tag), "path {}", path);
        };
        check("/api/users", "users");
        check("/api/orders", "api");
        check("/other", "root");
    }

    #[test]
    fn registration_order_breaks_ties() {
        let mut reg = HandlerRegistry::new();
        reg.register("", "/a/*", ok_handler("first"));
        reg.register("", "/a/*", ok_handler("second"));
        // Identical patterns: the earlier registration wins.
        let h = reg.resolve("/a/x").unwrap();
        let mut resp = Response::new();
        let req = HttpRequestPacket::new(Method::Get, "/a/x", Version::Http11);
        h.service(&req, b"", &mut resp).unwrap();
        assert_eq!(resp.headers.get("x-tag"), Some("first"));
    }

    #[test]
    fn context_path_prefixes() {
        let mut reg = HandlerRegistry::new();
        reg.register("/app", "/echo", ok_handler("app-echo"));
        assert!(reg.resolve("/app/echo").is_some());
        assert!(reg.resolve("/echo").is_none());
    }

    #[test]
    fn unmatched_path_resolves_none() {
        let mut reg = HandlerRegistry::new();
        reg.register("", "/only", ok_handler("only"));
        assert!(reg.resolve("/missing").is_none());
    }

    #[test]
    fn default_server_names_are_distinct() {
        let a = default_server_name();
        let b = default_server_name();
        assert_ne!(a, b);
        assert!(a.starts_with("graticola-"));
    }
}
