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

//! HTTP/1.x codec: streaming request parser, response serializer, packet
//! objects, and the pluggable content-encoding sub-pipeline.
//!
//! The wire-facing entry point is `HttpCodecFilter`, which turns raw buffers
//! into `HttpContent` messages on read and serializes response content on
//! write. Everything above it is protocol-agnostic (the AJP codec feeds the
//! same message types).

pub mod content;
pub mod encoding;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;
pub mod serializer;
pub mod server_filter;
pub mod status;

pub use content::{HttpContent, PacketRef};
pub use headers::HeaderMap;
pub use request::{HttpRequestPacket, Method, ProcessingState, Version};
pub use response::HttpResponsePacket;
pub use server_filter::HttpCodecFilter;
pub use status::reason_phrase;
