/*
 * lib.rs
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

//! Graticola core: a non-blocking transport and HTTP server framework built
//! around a pluggable filter chain.
//!
//! Bytes flow bottom-up on read (transport → codec filters → handler) and
//! top-down on write. The HTTP/1.x and AJP/1.3 codecs both emit the same
//! `HttpContent` messages, so everything above them is protocol-agnostic.

pub mod ajp;
pub mod attributes;
pub mod error;
pub mod filter;
pub mod http;
pub mod memory;
pub mod server;
pub mod transport;

pub use error::{EngineError, EngineResult};
pub use memory::{Buffer, MemoryManager};
