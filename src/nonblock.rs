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

//! Non-blocking scatter/gather I/O over sockets.

use std::io::{Error, ErrorKind, IoSlice, IoSliceMut, Read, Write};

/// Outcome of a single non-blocking I/O system call.
#[derive(Debug)]
pub enum IoStatus {
    /// The call transferred the given number of bytes.
    Success(usize),
    /// The descriptor is not ready; retry after the next readiness notification.
    WouldBlock,
    /// The peer has closed its side of the connection.
    Shutdown,
    /// Unrecoverable error reported by the operating system.
    Err(Error),
}

impl IoStatus {
    pub fn is_would_block(&self) -> bool { matches!(self, IoStatus::WouldBlock) }
}

pub trait ReadNonblocking: Read {
    /// Issues a single vectored read into `bufs`.
    ///
    /// Zero bytes read from a non-empty set of buffers means the peer has shut the stream down.
    fn read_vectored_nonblocking(&mut self, bufs: &mut [IoSliceMut<'_>]) -> IoStatus {
        loop {
            return match self.read_vectored(bufs) {
                Ok(0) if bufs.iter().any(|buf| !buf.is_empty()) => IoStatus::Shutdown,
                Ok(len) => IoStatus::Success(len),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => IoStatus::WouldBlock,
                Err(err) => IoStatus::Err(err),
            };
        }
    }
}

impl<R: Read + ?Sized> ReadNonblocking for R {}

pub trait WriteNonblocking: Write {
    fn write_nonblocking(&mut self, buf: &[u8]) -> IoStatus {
        self.write_vectored_nonblocking(&[IoSlice::new(buf)])
    }

    /// Issues a single gather write of `bufs`; the write may be partial.
    fn write_vectored_nonblocking(&mut self, bufs: &[IoSlice<'_>]) -> IoStatus {
        if bufs.iter().all(|buf| buf.is_empty()) {
            return IoStatus::Success(0);
        }
        loop {
            return match self.write_vectored(bufs) {
                Ok(0) => IoStatus::WouldBlock,
                Ok(len) => IoStatus::Success(len),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WriteZero => IoStatus::WouldBlock,
                Err(err) if err.kind() == ErrorKind::WouldBlock => IoStatus::WouldBlock,
                Err(err) => IoStatus::Err(err),
            };
        }
    }
}

impl<W: Write + ?Sized> WriteNonblocking for W {}

#[cfg(test)]
mod test {
    use std::io::Cursor;
    use std::os::unix::net::UnixStream;

    use super::*;

    #[test]
    fn read_reports_shutdown() {
        let (mut a, b) = UnixStream::pair().unwrap();
        drop(b);
        let mut buf = [0u8; 16];
        assert!(matches!(
            a.read_vectored_nonblocking(&mut [IoSliceMut::new(&mut buf)]),
            IoStatus::Shutdown
        ));
    }

    #[test]
    fn read_would_block() {
        let (mut a, _b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        let mut buf = [0u8; 16];
        let status = a.read_vectored_nonblocking(&mut [IoSliceMut::new(&mut buf)]);
        assert!(status.is_would_block());
    }

    #[test]
    fn gather_write() {
        let mut out = Cursor::new(Vec::new());
        let status = out.write_vectored_nonblocking(&[IoSlice::new(b"head"), IoSlice::new(b"")]);
        assert!(matches!(status, IoStatus::Success(4)));
        assert!(matches!(out.write_vectored_nonblocking(&[]), IoStatus::Success(0)));
        assert_eq!(out.into_inner(), b"head");
    }
}
