/*
 * memory.rs
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

//! Buffer abstraction and pooled memory manager.
//!
//! A `Buffer` is a view over one or more refcounted `Bytes` fragments with
//! position/limit cursors. slice/split/duplicate/append are zero-copy:
//! fragment list surgery plus refcount bumps. `MemoryManager` hands out
//! fixed-size blocks from a per-thread cache backed by a shared free list.

use bytes::{Buf, Bytes, BytesMut};
use std::cell::RefCell;
use std::sync::Mutex;

/// Default block size for pooled read buffers.
pub const DEFAULT_BLOCK_SIZE: usize = 8192;

const LOCAL_CACHE_MAX: usize = 32;
const SHARED_CACHE_MAX: usize = 1024;

thread_local! {
    static LOCAL_POOL: RefCell<Vec<BytesMut>> = const { RefCell::new(Vec::new()) };
}

static SHARED_POOL: Mutex<Vec<BytesMut>> = Mutex::new(Vec::new());

/// A possibly-composite byte region with `position <= limit <= capacity`.
///
/// The visible window is `[position, limit)`. Storage is shared between
/// views; the last view to release a fragment returns it to the pool.
#[derive(Default)]
pub struct Buffer {
    frags: Vec<Bytes>,
    position: usize,
    limit: usize,
    disposed: bool,
}

impl Buffer {
    pub fn empty() -> Self {
        Buffer::default()
    }

    /// Zero-copy wrap of existing bytes; the window covers the whole region.
    pub fn wrap(data: impl Into<Bytes>) -> Self {
        let b: Bytes = data.into();
        let len = b.len();
        let frags = if len == 0 { Vec::new() } else { vec![b] };
        Buffer {
            frags,
            position: 0,
            limit: len,
            disposed: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.frags.iter().map(|f| f.len()).sum()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn set_position(&mut self, position: usize) {
        assert!(position <= self.limit, "position {} > limit {}", position, self.limit);
        self.position = position;
    }

    pub fn set_limit(&mut self, limit: usize) {
        assert!(limit <= self.capacity(), "limit {} > capacity {}", limit, self.capacity());
        self.limit = limit;
        if self.position > limit {
            self.position = limit;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.position >= self.limit
    }

    pub fn is_composite(&self) -> bool {
        self.frags.len() > 1
    }

    /// Locate the fragment holding the absolute offset `pos`.
    fn locate(&self, pos: usize) -> (usize, usize) {
        let mut base = 0;
        for (i, f) in self.frags.iter().enumerate() {
            if pos < base + f.len() {
                return (i, pos - base);
            }
            base += f.len();
        }
        (self.frags.len(), 0)
    }

    /// Fragments covering the absolute range `[from, to)`, refcount-cloned.
    fn frag_range(&self, from: usize, to: usize) -> Vec<Bytes> {
        let mut out = Vec::new();
        if from >= to {
            return out;
        }
        let mut base = 0;
        for f in &self.frags {
            let end = base + f.len();
            if end > from && base < to {
                let lo = from.saturating_sub(base);
                let hi = to.min(end) - base;
                if hi > lo {
                    out.push(f.slice(lo..hi));
                }
            }
            base = end;
            if base >= to {
                break;
            }
        }
        out
    }

    /// View of the current window with independent cursors.
    pub fn slice(&self) -> Buffer {
        let frags = self.frag_range(self.position, self.limit);
        let len = frags.iter().map(|f| f.len()).sum();
        Buffer {
            frags,
            position: 0,
            limit: len,
            disposed: false,
        }
    }

    /// Split at the absolute position `at`. The receiver keeps
    /// `[position, at)`; the returned buffer holds `[at, limit)`. Views of
    /// the untouched ranges remain valid.
    pub fn split(&mut self, at: usize) -> Buffer {
        assert!(
            self.position <= at && at <= self.limit,
            "split point {} outside [{}, {}]",
            at,
            self.position,
            self.limit
        );
        let tail_frags = self.frag_range(at, self.limit);
        let tail_len = tail_frags.iter().map(|f| f.len()).sum();
        let head_frags = self.frag_range(self.position, at);
        let head_len: usize = head_frags.iter().map(|f| f.len()).sum();
        self.frags = head_frags;
        self.position = 0;
        self.limit = head_len;
        Buffer {
            frags: tail_frags,
            position: 0,
            limit: tail_len,
            disposed: false,
        }
    }

    /// Independent cursors over the same storage.
    pub fn duplicate(&self) -> Buffer {
        Buffer {
            frags: self.frags.clone(),
            position: self.position,
            limit: self.limit,
            disposed: false,
        }
    }

    /// Logical concatenation without copying. `append(None, b)` is `b`.
    pub fn append(a: Option<Buffer>, b: Buffer) -> Buffer {
        match a {
            None => b,
            Some(mut a) => {
                a.append_buffer(b);
                a
            }
        }
    }

    /// Append the visible window of `other` after this buffer's window.
    pub fn append_buffer(&mut self, other: Buffer) {
        let mut head = self.frag_range(self.position, self.limit);
        let tail = other.frag_range(other.position, other.limit);
        head.extend(tail);
        let len = head.iter().map(|f| f.len()).sum();
        self.frags = head;
        self.position = 0;
        self.limit = len;
    }

    /// Set limit to position, making the window empty.
    pub fn trim(&mut self) {
        self.limit = self.position;
    }

    /// Drop the consumed prefix so position becomes zero.
    pub fn shrink(&mut self) {
        let window = self.frag_range(self.position, self.limit);
        let len = window.iter().map(|f| f.len()).sum();
        self.frags = window;
        self.position = 0;
        self.limit = len;
    }

    /// Best-effort free: fragments not shared with other views go back to
    /// the pool. Double dispose is a programming error.
    pub fn try_dispose(&mut self) {
        debug_assert!(!self.disposed, "buffer disposed twice");
        self.disposed = true;
        for frag in self.frags.drain(..) {
            if let Ok(mut block) = frag.try_into_mut() {
                block.clear();
                release_block(block);
            }
        }
        self.position = 0;
        self.limit = 0;
    }

    /// Copy the visible window out as a Vec.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.limit - self.position);
        for f in self.frag_range(self.position, self.limit) {
            out.extend_from_slice(&f);
        }
        out
    }

    /// Visible window as contiguous Bytes. Zero-copy for a single fragment.
    pub fn to_bytes(&self) -> Bytes {
        let window = self.frag_range(self.position, self.limit);
        match window.as_slice() {
            [] => Bytes::new(),
            [single] => single.clone(),
            _ => {
                let mut out = BytesMut::with_capacity(self.limit - self.position);
                for f in window {
                    out.extend_from_slice(&f);
                }
                out.freeze()
            }
        }
    }
}

impl Buf for Buffer {
    fn remaining(&self) -> usize {
        self.limit - self.position
    }

    fn chunk(&self) -> &[u8] {
        if self.position >= self.limit {
            return &[];
        }
        let (idx, off) = self.locate(self.position);
        let frag = &self.frags[idx];
        let frag_base = self.position - off;
        let end = (self.limit - frag_base).min(frag.len());
        &frag[off..end]
    }

    fn advance(&mut self, cnt: usize) {
        assert!(self.position + cnt <= self.limit, "advance past limit");
        self.position += cnt;
    }
}

impl From<Bytes> for Buffer {
    fn from(b: Bytes) -> Self {
        Buffer::wrap(b)
    }
}

impl From<BytesMut> for Buffer {
    fn from(b: BytesMut) -> Self {
        Buffer::wrap(b.freeze())
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(v: Vec<u8>) -> Self {
        Buffer::wrap(Bytes::from(v))
    }
}

impl From<&[u8]> for Buffer {
    fn from(s: &[u8]) -> Self {
        Buffer::wrap(Bytes::copy_from_slice(s))
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("position", &self.position)
            .field("limit", &self.limit)
            .field("capacity", &self.capacity())
            .field("fragments", &self.frags.len())
            .finish()
    }
}

fn release_block(block: BytesMut) {
    if block.capacity() == 0 {
        return;
    }
    LOCAL_POOL.with(|pool| {
        let mut pool = pool.borrow_mut();
        if pool.len() < LOCAL_CACHE_MAX {
            pool.push(block);
        } else {
            // Batch half the local cache into the shared list.
            let spill: Vec<BytesMut> = pool.drain(..LOCAL_CACHE_MAX / 2).collect();
            let mut shared = SHARED_POOL.lock().unwrap();
            for b in spill {
                if shared.len() >= SHARED_CACHE_MAX {
                    break;
                }
                shared.push(b);
            }
            pool.push(block);
        }
    });
}

/// Factory and pool for buffers. Blocks of `block_size` are recycled; larger
/// requests fall through to plain heap allocation.
#[derive(Clone, Copy, Debug)]
pub struct MemoryManager {
    block_size: usize,
}

impl Default for MemoryManager {
    fn default() -> Self {
        MemoryManager {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl MemoryManager {
    pub fn new(block_size: usize) -> Self {
        assert!(block_size > 0, "block size must be non-zero");
        MemoryManager { block_size }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// A writable block of at least `n` bytes capacity, pooled when possible.
    pub fn allocate(&self, n: usize) -> BytesMut {
        if n <= self.block_size {
            let pooled = LOCAL_POOL.with(|pool| pool.borrow_mut().pop()).or_else(|| {
                let mut shared = SHARED_POOL.lock().unwrap();
                shared.pop()
            });
            if let Some(block) = pooled {
                if block.capacity() >= n {
                    return block;
                }
            }
            BytesMut::with_capacity(self.block_size)
        } else {
            BytesMut::with_capacity(n)
        }
    }

    /// Return a block to the pool.
    pub fn release(&self, mut block: BytesMut) {
        block.clear();
        release_block(block);
    }

    /// Zero-copy adapter over caller-owned bytes.
    pub fn wrap(&self, data: impl Into<Bytes>) -> Buffer {
        Buffer::wrap(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(data: &[u8]) -> Buffer {
        Buffer::from(data)
    }

    #[test]
    fn cursors_invariant() {
        let b = buf(b"hello world");
        assert_eq!(b.position(), 0);
        assert_eq!(b.limit(), 11);
        assert_eq!(b.capacity(), 11);
        assert_eq!(b.remaining(), 11);
    }

    #[test]
    fn split_concat_identity() {
        let data = b"the quick brown fox jumps over the lazy dog";
        for p in 0..=data.len() {
            let mut head = buf(data);
            let tail = head.split(p);
            let rejoined = Buffer::append(Some(head), tail);
            assert_eq!(rejoined.to_vec(), data, "split at {}", p);
        }
    }

    #[test]
    fn split_leaves_outside_views_valid() {
        let mut b = buf(b"abcdef");
        let dup = b.duplicate();
        let tail = b.split(3);
        assert_eq!(b.to_vec(), b"abc");
        assert_eq!(tail.to_vec(), b"def");
        assert_eq!(dup.to_vec(), b"abcdef");
    }

    #[test]
    fn append_none_is_identity() {
        let b = Buffer::append(None, buf(b"xyz"));
        assert_eq!(b.to_vec(), b"xyz");
    }

    #[test]
    fn composite_read_preserves_order() {
        let mut a = buf(b"hel");
        a.append_buffer(buf(b"lo "));
        a.append_buffer(buf(b"world"));
        assert!(a.is_composite());
        assert_eq!(a.to_vec(), b"hello world");

        // Buf traversal crosses fragment boundaries in order.
        let mut collected = Vec::new();
        while a.has_remaining() {
            let chunk = a.chunk().to_vec();
            let n = chunk.len();
            collected.extend_from_slice(&chunk);
            a.advance(n);
        }
        assert_eq!(collected, b"hello world");
    }

    #[test]
    fn composite_split_mid_fragment() {
        let mut a = buf(b"abc");
        a.append_buffer(buf(b"defgh"));
        let tail = a.split(5);
        assert_eq!(a.to_vec(), b"abcde");
        assert_eq!(tail.to_vec(), b"fgh");
    }

    #[test]
    fn trim_and_shrink() {
        let mut b = buf(b"abcdef");
        b.advance(2);
        b.shrink();
        assert_eq!(b.position(), 0);
        assert_eq!(b.to_vec(), b"cdef");
        b.trim();
        assert!(b.is_empty());
    }

    #[test]
    fn duplicate_shares_storage_independent_cursors() {
        let mut a = buf(b"abcd");
        let mut d = a.duplicate();
        a.advance(2);
        assert_eq!(a.to_vec(), b"cd");
        assert_eq!(d.to_vec(), b"abcd");
        d.advance(3);
        assert_eq!(d.to_vec(), b"d");
    }

    #[test]
    fn manager_allocate_release_roundtrip() {
        let mgr = MemoryManager::default();
        let mut block = mgr.allocate(100);
        block.extend_from_slice(b"data");
        mgr.release(block);
        let again = mgr.allocate(100);
        assert!(again.is_empty());
        assert!(again.capacity() >= 100);
    }

    #[test]
    fn wrap_is_zero_copy_window() {
        let mgr = MemoryManager::default();
        let b = mgr.wrap(Bytes::from_static(b"static data"));
        assert_eq!(b.to_vec(), b"static data");
    }

    #[test]
    fn dispose_returns_unique_storage() {
        let mgr = MemoryManager::default();
        let mut block = mgr.allocate(64);
        block.extend_from_slice(b"payload");
        let mut b = Buffer::from(block);
        b.try_dispose();
        assert_eq!(b.remaining(), 0);
    }
}
