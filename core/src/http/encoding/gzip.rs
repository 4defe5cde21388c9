/*
 * gzip.rs
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

//! GZIP member codec (RFC 1952) over raw DEFLATE.
//!
//! Encoder: fixed 10-byte header on first non-empty output, DEFLATE frames
//! at the configured level, 8-byte little-endian trailer (CRC32, ISIZE) on
//! finish. Decoder: header (honouring FEXTRA/FNAME/FCOMMENT/FHCRC), inflate,
//! trailer verification, and remainder surfacing so pipelined messages can
//! resume right after the member.

use bytes::{Buf, BytesMut};
use flate2::{Compress, Compression, Crc, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{EngineError, EngineResult};
use crate::filter::ConnectionCtx;
use crate::http::encoding::{ContentEncoding, DecodeOutput};
use crate::http::request::HttpRequestPacket;
use crate::http::response::HttpResponsePacket;
use crate::memory::Buffer;

pub const GZIP_HEADER: [u8; 10] = [0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

const FHCRC: u8 = 0x02;
const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;
const FCOMMENT: u8 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    FixedHeader,
    ExtraLen,
    Extra(usize),
    Name,
    Comment,
    HeaderCrc,
    Inflate,
    Trailer,
    Done,
}

/// Streaming gzip transform pair. One instance per connection per direction.
pub struct GzipEncoding {
    level: u32,

    // Encode side
    compress: Compress,
    enc_crc: Crc,
    header_written: bool,

    // Decode side
    decompress: Decompress,
    dec_crc: Crc,
    dec_state: DecodeState,
    dec_flags: u8,
    dec_pending: BytesMut,
}

impl GzipEncoding {
    pub fn new(level: u32) -> Self {
        GzipEncoding {
            level,
            compress: Compress::new(Compression::new(level), false),
            enc_crc: Crc::new(),
            header_written: false,
            decompress: Decompress::new(false),
            dec_crc: Crc::new(),
            dec_state: DecodeState::FixedHeader,
            dec_flags: 0,
            dec_pending: BytesMut::new(),
        }
    }

    fn deflate(&mut self, input: &[u8], flush: FlushCompress, out: &mut Vec<u8>) -> EngineResult<()> {
        let mut offset = 0;
        loop {
            out.reserve(1024.max(input.len() - offset));
            let before_in = self.compress.total_in();
            let status = self
                .compress
                .compress_vec(&input[offset..], out, flush)
                .map_err(|e| EngineError::encoding(format!("deflate: {}", e)))?;
            offset += (self.compress.total_in() - before_in) as usize;
            if status == Status::StreamEnd {
                return Ok(());
            }
            // Finish must run to StreamEnd; other modes are done once the
            // input is consumed and the compressor stops filling the output.
            if flush != FlushCompress::Finish && offset >= input.len() && out.len() < out.capacity()
            {
                return Ok(());
            }
        }
    }

    /// Inflate as much of `input` as possible, appending plain bytes to
    /// `out`. Returns the number of input bytes consumed and whether the
    /// deflate stream ended.
    fn inflate(&mut self, input: &[u8], out: &mut Vec<u8>) -> EngineResult<(usize, bool)> {
        let mut consumed = 0;
        loop {
            out.reserve(4096);
            let before_in = self.decompress.total_in();
            let before_out = out.len();
            let status = self
                .decompress
                .decompress_vec(&input[consumed..], out, FlushDecompress::None)
                .map_err(|e| EngineError::encoding(format!("inflate: {}", e)))?;
            let step_in = (self.decompress.total_in() - before_in) as usize;
            consumed += step_in;
            self.dec_crc.update(&out[before_out..]);
            if status == Status::StreamEnd {
                return Ok((consumed, true));
            }
            let stalled = out.len() < out.capacity();
            if (consumed >= input.len() && stalled) || (step_in == 0 && out.len() == before_out) {
                return Ok((consumed, false));
            }
        }
    }
}

impl ContentEncoding for GzipEncoding {
    fn name(&self) -> &str {
        "gzip"
    }

    fn aliases(&self) -> &[&str] {
        &["deflate", "x-gzip"]
    }

    fn want_decode(&self, request: &HttpRequestPacket) -> bool {
        request.has_payload()
    }

    fn want_encode(&self, response: &HttpResponsePacket) -> bool {
        response.emits_body()
    }

    fn decode(&mut self, _conn: &mut ConnectionCtx, input: Buffer) -> EngineResult<DecodeOutput> {
        if input.remaining() == 0 {
            return Ok(DecodeOutput::default());
        }
        self.dec_pending.extend_from_slice(&input.to_vec());
        let mut produced = Vec::new();

        loop {
            match self.dec_state {
                DecodeState::FixedHeader => {
                    if self.dec_pending.len() < GZIP_HEADER.len() {
                        break;
                    }
                    let head = self.dec_pending.split_to(GZIP_HEADER.len());
                    if head[0] != 0x1f || head[1] != 0x8b {
                        return Err(EngineError::encoding("bad gzip magic"));
                    }
                    if head[2] != 0x08 {
                        return Err(EngineError::encoding("unsupported gzip compression method"));
                    }
                    self.dec_flags = head[3];
                    self.dec_state = if self.dec_flags & FEXTRA != 0 {
                        DecodeState::ExtraLen
                    } else if self.dec_flags & FNAME != 0 {
                        DecodeState::Name
                    } else if self.dec_flags & FCOMMENT != 0 {
                        DecodeState::Comment
                    } else if self.dec_flags & FHCRC != 0 {
                        DecodeState::HeaderCrc
                    } else {
                        DecodeState::Inflate
                    };
                }
                DecodeState::ExtraLen => {
                    if self.dec_pending.len() < 2 {
                        break;
                    }
                    let lo = self.dec_pending[0] as usize;
                    let hi = self.dec_pending[1] as usize;
                    self.dec_pending.advance(2);
                    self.dec_state = DecodeState::Extra(lo | (hi << 8));
                }
                DecodeState::Extra(n) => {
                    if self.dec_pending.len() < n {
                        break;
                    }
                    self.dec_pending.advance(n);
                    self.dec_state = if self.dec_flags & FNAME != 0 {
                        DecodeState::Name
                    } else if self.dec_flags & FCOMMENT != 0 {
                        DecodeState::Comment
                    } else if self.dec_flags & FHCRC != 0 {
                        DecodeState::HeaderCrc
                    } else {
                        DecodeState::Inflate
                    };
                }
                DecodeState::Name | DecodeState::Comment => {
                    match self.dec_pending.iter().position(|&b| b == 0) {
                        Some(nul) => {
                            self.dec_pending.advance(nul + 1);
                            self.dec_state = if self.dec_state == DecodeState::Name
                                && self.dec_flags & FCOMMENT != 0
                            {
                                DecodeState::Comment
                            } else if self.dec_flags & FHCRC != 0 {
                                DecodeState::HeaderCrc
                            } else {
                                DecodeState::Inflate
                            };
                        }
                        None => {
                            self.dec_pending.clear();
                            break;
                        }
                    }
                }
                DecodeState::HeaderCrc => {
                    if self.dec_pending.len() < 2 {
                        break;
                    }
                    self.dec_pending.advance(2);
                    self.dec_state = DecodeState::Inflate;
                }
                DecodeState::Inflate => {
                    if self.dec_pending.is_empty() {
                        break;
                    }
                    let pending = self.dec_pending.split_to(self.dec_pending.len());
                    let (consumed, ended) = self.inflate(&pending, &mut produced)?;
                    if consumed < pending.len() {
                        let rest = &pending[consumed..];
                        self.dec_pending.extend_from_slice(rest);
                    }
                    if ended {
                        self.dec_state = DecodeState::Trailer;
                    } else {
                        break;
                    }
                }
                DecodeState::Trailer => {
                    if self.dec_pending.len() < 8 {
                        break;
                    }
                    let t = self.dec_pending.split_to(8);
                    let crc = u32::from_le_bytes([t[0], t[1], t[2], t[3]]);
                    let stream_size = u32::from_le_bytes([t[4], t[5], t[6], t[7]]);
                    if crc != self.dec_crc.sum() {
                        return Err(EngineError::encoding("gzip CRC mismatch"));
                    }
                    if stream_size != self.dec_crc.amount() {
                        return Err(EngineError::encoding("gzip ISIZE mismatch"));
                    }
                    self.dec_state = DecodeState::Done;
                }
                DecodeState::Done => break,
            }
        }

        let mut out = DecodeOutput::default();
        if !produced.is_empty() {
            out.produced = Some(Buffer::from(produced));
        }
        if self.dec_state == DecodeState::Done && !self.dec_pending.is_empty() {
            // Bytes past the member belong to the next pipelined message.
            out.remainder = Some(Buffer::from(self.dec_pending.split()));
        }
        Ok(out)
    }

    fn encode(&mut self, _conn: &mut ConnectionCtx, input: Buffer) -> EngineResult<Option<Buffer>> {
        if input.remaining() == 0 {
            return Ok(None);
        }
        let data = input.to_vec();
        self.enc_crc.update(&data);
        let mut out = Vec::new();
        if !self.header_written {
            out.extend_from_slice(&GZIP_HEADER);
            self.header_written = true;
        }
        self.deflate(&data, FlushCompress::Sync, &mut out)?;
        if out.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Buffer::from(out)))
        }
    }

    fn finish(&mut self, _conn: &mut ConnectionCtx) -> EngineResult<Option<Buffer>> {
        // Decode side: a member that started must have reached its trailer.
        match self.dec_state {
            DecodeState::FixedHeader | DecodeState::Done => {}
            _ => return Err(EngineError::encoding("truncated gzip stream")),
        }
        // Encode side: flush remaining deflate output and append the trailer.
        if !self.header_written {
            return Ok(None);
        }
        let mut out = Vec::new();
        self.deflate(&[], FlushCompress::Finish, &mut out)?;
        out.extend_from_slice(&self.enc_crc.sum().to_le_bytes());
        out.extend_from_slice(&self.enc_crc.amount().to_le_bytes());
        Ok(Some(Buffer::from(out)))
    }

    fn reset(&mut self) {
        self.compress = Compress::new(Compression::new(self.level), false);
        self.enc_crc = Crc::new();
        self.header_written = false;
        self.decompress = Decompress::new(false);
        self.dec_crc = Crc::new();
        self.dec_state = DecodeState::FixedHeader;
        self.dec_flags = 0;
        self.dec_pending.clear();
    }
}
