// Multi-threaded HTTP/1.1 server built on an epoll reactor.
//
// SPDX-License-Identifier: Apache-2.0
//
// Written in 2021-2025 by
//     Dr. Maxim Orlovsky <orlovsky@ubideco.org>
//     Alexis Sellier <alexis@cloudhead.io>
//
// Copyright 2022-2025 UBIDECO Labs, InDCS, Lugano, Switzerland. All Rights reserved.
// Copyright 2021-2023 Alexis Sellier <alexis@cloudhead.io>. All Rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use this file except
// in compliance with the License. You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under the License
// is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express
// or implied. See the License for the specific language governing permissions and limitations under
// the License.

//! Growable byte buffer with independent read and write cursors.
//!
//! The storage is split into three regions:
//!
//! ```text
//! +-------------------+------------------+------------------+
//! | prependable bytes |  readable bytes  |  writable bytes  |
//! +-------------------+------------------+------------------+
//! 0       <=       read_pos    <=    write_pos     <=     capacity
//! ```
//!
//! Prependable space is reclaimed by compaction before the storage is ever reallocated.

use std::io::{self, IoSliceMut, Read, Write};

use crate::nonblock::{IoStatus, ReadNonblocking, WriteNonblocking};

/// Initial storage size of a freshly created buffer.
pub const INITIAL_SIZE: usize = 1024;

/// Size of the on-stack area receiving the part of a socket read which did not fit the buffer.
pub const OVERFLOW_SIZE: usize = 65536;

const CRLF: &[u8] = b"\r\n";

/// Byte buffer accumulating socket input and pending output.
#[derive(Clone, Debug)]
pub struct Buffer {
    storage: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl Default for Buffer {
    fn default() -> Self { Buffer::with_capacity(INITIAL_SIZE) }
}

impl Buffer {
    pub fn new() -> Self { Buffer::default() }

    pub fn with_capacity(capacity: usize) -> Self {
        Buffer {
            storage: vec![0u8; capacity],
            read_pos: 0,
            write_pos: 0,
        }
    }

    pub fn capacity(&self) -> usize { self.storage.len() }

    pub fn writable_bytes(&self) -> usize { self.storage.len() - self.write_pos }

    pub fn readable_bytes(&self) -> usize { self.write_pos - self.read_pos }

    pub fn prependable_bytes(&self) -> usize { self.read_pos }

    pub fn is_empty(&self) -> bool { self.readable_bytes() == 0 }

    /// Readable region, without copying.
    pub fn peek(&self) -> &[u8] { &self.storage[self.read_pos..self.write_pos] }

    /// Writable region, without copying. Commit the written bytes with [`Buffer::has_written`].
    pub fn begin_write(&mut self) -> &mut [u8] { &mut self.storage[self.write_pos..] }

    /// Moves the write cursor forward over bytes placed through [`Buffer::begin_write`].
    ///
    /// # Panics
    ///
    /// If `len` exceeds the writable region.
    pub fn has_written(&mut self, len: usize) {
        assert!(len <= self.writable_bytes(), "write cursor moved past the buffer end");
        self.write_pos += len;
    }

    /// Position of the first CRLF within the readable region.
    pub fn find_crlf(&self) -> Option<usize> {
        self.peek().windows(CRLF.len()).position(|window| window == CRLF)
    }

    pub fn append(&mut self, data: &[u8]) {
        self.ensure_writable(data.len());
        self.storage[self.write_pos..self.write_pos + data.len()].copy_from_slice(data);
        self.write_pos += data.len();
    }

    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable_bytes() < len {
            self.make_space(len);
        }
    }

    fn make_space(&mut self, len: usize) {
        if self.writable_bytes() + self.prependable_bytes() < len {
            self.storage.resize(self.write_pos + len, 0);
        } else {
            let readable = self.readable_bytes();
            self.storage.copy_within(self.read_pos..self.write_pos, 0);
            self.read_pos = 0;
            self.write_pos = readable;
        }
    }

    /// Advances the read cursor by `len` bytes; consuming everything resets both cursors.
    pub fn retrieve(&mut self, len: usize) {
        if len < self.readable_bytes() {
            self.read_pos += len;
        } else {
            self.retrieve_all();
        }
    }

    pub fn retrieve_all(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    pub fn retrieve_to_vec(&mut self, len: usize) -> Vec<u8> {
        let len = len.min(self.readable_bytes());
        let data = self.peek()[..len].to_vec();
        self.retrieve(len);
        data
    }

    pub fn retrieve_to_string(&mut self, len: usize) -> String {
        String::from_utf8_lossy(&self.retrieve_to_vec(len)).into_owned()
    }

    pub fn retrieve_all_to_string(&mut self) -> String {
        self.retrieve_to_string(self.readable_bytes())
    }

    /// Drains available data from `src` with a single scatter read.
    ///
    /// The read fills the writable tail first and spills into a fixed on-stack area; only the
    /// spilled part makes the buffer grow.
    pub fn read_from(&mut self, src: &mut (impl Read + ?Sized)) -> IoStatus {
        let mut overflow = [0u8; OVERFLOW_SIZE];
        let writable = self.writable_bytes();
        let status = {
            let tail = &mut self.storage[self.write_pos..];
            let mut bufs = [IoSliceMut::new(tail), IoSliceMut::new(&mut overflow)];
            src.read_vectored_nonblocking(&mut bufs)
        };
        if let IoStatus::Success(len) = status {
            if len <= writable {
                self.write_pos += len;
            } else {
                self.write_pos = self.storage.len();
                self.append(&overflow[..len - writable]);
            }
        }
        status
    }

    /// Writes the readable region with a single, possibly partial, write.
    ///
    /// The read cursor advances only by the number of bytes actually written.
    pub fn write_to(&mut self, dst: &mut (impl Write + ?Sized)) -> IoStatus {
        let status = dst.write_nonblocking(self.peek());
        if let IoStatus::Success(len) = status {
            self.retrieve(len);
        }
        status
    }
}

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> { Ok(()) }
}
