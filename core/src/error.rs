/*
 * error.rs
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

//! Pipeline errors. Parse and encoding failures are fatal to the connection,
//! never to the transport.

use std::fmt;
use std::io;

/// Errors surfaced by the filter chain, codecs, and transport.
#[derive(Debug)]
pub enum EngineError {
    /// Malformed bytes on the wire (bad request line, bad chunk size, bad framing).
    ProtocolFormat(String),
    /// A configured byte limit was exceeded (request line, header block, packet size).
    LimitExceeded(String),
    /// Content-encoding transform failed (deflate error, gzip CRC mismatch).
    EncodingFailure(String),
    /// Socket-level I/O failure.
    TransportIo(io::Error),
    /// The operation was abandoned by shutdown or timeout.
    Cancelled,
    /// Invariant violation inside the pipeline.
    Internal(String),
}

impl EngineError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolFormat(msg.into())
    }

    pub fn limit(msg: impl Into<String>) -> Self {
        Self::LimitExceeded(msg.into())
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::EncodingFailure(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Status code for the best-effort error response emitted before close,
    /// or None when no response should be attempted (I/O errors, cancellation).
    pub fn response_status(&self) -> Option<u16> {
        match self {
            EngineError::ProtocolFormat(_) => Some(400),
            EngineError::LimitExceeded(_) => Some(413),
            EngineError::EncodingFailure(_) => None,
            EngineError::TransportIo(_) => None,
            EngineError::Cancelled => None,
            EngineError::Internal(_) => Some(500),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::ProtocolFormat(m) => write!(f, "protocol format error: {}", m),
            EngineError::LimitExceeded(m) => write!(f, "limit exceeded: {}", m),
            EngineError::EncodingFailure(m) => write!(f, "encoding failure: {}", m),
            EngineError::TransportIo(e) => write!(f, "transport I/O error: {}", e),
            EngineError::Cancelled => write!(f, "cancelled"),
            EngineError::Internal(m) => write!(f, "internal error: {}", m),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::TransportIo(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for EngineError {
    fn from(e: io::Error) -> Self {
        EngineError::TransportIo(e)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
