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

//! Client connections and their hand-over between the reactor and the workers.

use std::io::IoSlice;
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::buffer::Buffer;
use crate::credentials::CredentialStore;
use crate::http::response::{BAD_REQUEST, OK};
use crate::http::{Request, Response};
use crate::nonblock::{IoStatus, WriteNonblocking};

/// Level-triggered writes keep going while more than this many bytes are pending.
pub const WRITE_SPIN_THRESHOLD: usize = 10240;

/// State shared by every connection of a server.
pub struct Shared {
    root: PathBuf,
    credentials: Arc<dyn CredentialStore>,
    clients: AtomicUsize,
}

impl Shared {
    pub fn new(root: impl Into<PathBuf>, credentials: Arc<dyn CredentialStore>) -> Self {
        Shared {
            root: root.into(),
            credentials,
            clients: AtomicUsize::new(0),
        }
    }

    pub fn root(&self) -> &Path { &self.root }

    /// Number of connections which are open right now.
    pub fn client_count(&self) -> usize { self.clients.load(Ordering::Acquire) }
}

/// Single accepted socket with its buffers and the request being served.
pub struct Connection {
    stream: Option<TcpStream>,
    fd: RawFd,
    peer: SocketAddr,
    edge: bool,
    read_buf: Buffer,
    write_buf: Buffer,
    request: Request,
    response: Response,
    /// Bytes of the mapped response body already written.
    sent: usize,
    shared: Arc<Shared>,
}

impl Connection {
    /// Takes ownership of a non-blocking stream, counting it as a live client.
    pub fn new(stream: TcpStream, peer: SocketAddr, edge: bool, shared: Arc<Shared>) -> Self {
        let fd = stream.as_raw_fd();
        let count = shared.clients.fetch_add(1, Ordering::AcqRel) + 1;

        #[cfg(feature = "log")]
        log::info!(target: "conn", "Client[{fd}]({peer}) in, user count: {count}");
        #[cfg(not(feature = "log"))]
        let _ = count;

        Connection {
            stream: Some(stream),
            fd,
            peer,
            edge,
            read_buf: Buffer::new(),
            write_buf: Buffer::new(),
            request: Request::new(),
            response: Response::new(),
            sent: 0,
            shared,
        }
    }

    pub fn fd(&self) -> RawFd { self.fd }

    pub fn peer(&self) -> SocketAddr { self.peer }

    pub fn is_closed(&self) -> bool { self.stream.is_none() }

    pub fn is_edge(&self) -> bool { self.edge }

    pub fn request(&self) -> &Request { &self.request }

    pub fn response(&self) -> &Response { &self.response }

    /// Whether the connection stays open once the current response is sent.
    pub fn is_keep_alive(&self) -> bool { self.response.is_keep_alive() }

    /// Response bytes not yet written: pending headers plus the unsent part of the body.
    pub fn to_write_bytes(&self) -> usize {
        self.write_buf.readable_bytes() + self.response.file_len() - self.sent
    }

    /// Reads whatever the socket has into the read buffer.
    ///
    /// Edge-triggered connections are drained until the socket would block; the status then
    /// reports the total amount read.
    pub fn read(&mut self) -> IoStatus {
        let mut total = 0;
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return IoStatus::Shutdown;
            };
            match self.read_buf.read_from(stream) {
                IoStatus::Success(len) => {
                    total += len;
                    if !self.edge {
                        return IoStatus::Success(total);
                    }
                }
                IoStatus::WouldBlock if total > 0 => return IoStatus::Success(total),
                status => return status,
            }
        }
    }

    /// Parses buffered input and, once a request is complete, builds its response.
    ///
    /// Returns `true` if a response is ready to be written and `false` if more input is needed.
    pub fn process(&mut self) -> bool {
        if self.read_buf.is_empty() {
            return false;
        }
        match self.request.parse(&mut self.read_buf, &*self.shared.credentials) {
            Ok(false) => return false,
            Ok(true) => {
                let keep_alive = self.request.is_keep_alive();
                self.response.init(&self.shared.root, self.request.path(), keep_alive, OK);
            }
            Err(_err) => {
                #[cfg(feature = "log")]
                log::warn!(target: "http", "Client[{}] sent a bad request: {_err}", self.fd);
                self.response.init(&self.shared.root, self.request.path(), false, BAD_REQUEST);
            }
        }

        self.write_buf.retrieve_all();
        self.response.make_response(&mut self.write_buf);
        self.sent = 0;

        #[cfg(feature = "log")]
        log::debug!(target: "conn", "Client[{}] response {} is {} bytes", self.fd, self.response.code(), self.to_write_bytes());

        true
    }

    /// Sends the pending headers and body with gather writes.
    ///
    /// Keeps writing while the connection is edge-triggered or a large part is still pending.
    /// Stops on the first unsuccessful write and returns its status.
    pub fn write(&mut self) -> IoStatus {
        let mut total = 0;
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return IoStatus::Shutdown;
            };
            let status = {
                let head = self.write_buf.peek();
                let body = &self.response.file()[self.sent..];
                stream.write_vectored_nonblocking(&[IoSlice::new(head), IoSlice::new(body)])
            };
            let IoStatus::Success(len) = status else {
                return status;
            };

            let head = len.min(self.write_buf.readable_bytes());
            self.write_buf.retrieve(head);
            self.sent += len - head;
            total += len;

            let pending = self.to_write_bytes();
            if pending == 0 || (!self.edge && pending <= WRITE_SPIN_THRESHOLD) {
                return IoStatus::Success(total);
            }
        }
    }

    /// Gets ready for the next request once a keep-alive response is fully sent.
    pub fn finish_request(&mut self) {
        self.request.reset();
        self.response.unmap_file();
        self.write_buf.retrieve_all();
        self.sent = 0;
    }

    /// Closes the socket and releases the body mapping. Closing twice does nothing.
    pub fn close(&mut self) {
        let Some(stream) = self.stream.take() else {
            return;
        };
        drop(stream);
        self.response.unmap_file();
        self.sent = 0;
        self.read_buf = Buffer::with_capacity(0);
        self.write_buf = Buffer::with_capacity(0);
        let count = self.shared.clients.fetch_sub(1, Ordering::AcqRel) - 1;

        #[cfg(feature = "log")]
        log::info!(target: "conn", "Client[{}]({}) quit, user count: {count}", self.fd, self.peer);
        #[cfg(not(feature = "log"))]
        let _ = count;
    }
}

impl Drop for Connection {
    fn drop(&mut self) { self.close() }
}

/// Connection cell handed between the reactor thread and the workers.
///
/// The in-flight flag marks a connection owned by a worker task. The reactor submits a task only
/// after claiming the flag, and the task gives it back right before re-arming the socket, so at
/// most one task touches a connection at any time.
pub struct Client {
    fd: RawFd,
    conn: Mutex<Connection>,
    in_flight: AtomicBool,
}

impl Client {
    pub fn new(conn: Connection) -> Self {
        Client {
            fd: conn.fd(),
            conn: Mutex::new(conn),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Descriptor number the connection had when it was accepted.
    pub fn fd(&self) -> RawFd { self.fd }

    pub fn lock(&self) -> MutexGuard<'_, Connection> { self.conn.lock() }

    /// Marks the connection as owned by a worker; fails if it already is.
    pub fn try_claim(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) { self.in_flight.store(false, Ordering::Release) }

    pub fn is_in_flight(&self) -> bool { self.in_flight.load(Ordering::Acquire) }

    pub fn close(&self) { self.lock().close() }
}

#[cfg(test)]
mod test {
    use std::fs::{self, Permissions};
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::credentials::MemoryCredentials;
    use crate::timeouts::{TimeoutCallback, Timer, Timestamp};

    fn shared() -> (TempDir, Arc<Shared>) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in [("index.html", "hello"), ("400.html", "bad")] {
            let path = dir.path().join(name);
            fs::write(&path, content).unwrap();
            fs::set_permissions(&path, Permissions::from_mode(0o644)).unwrap();
        }
        let shared = Arc::new(Shared::new(dir.path(), Arc::new(MemoryCredentials::new())));
        (dir, shared)
    }

    fn pair(shared: &Arc<Shared>) -> (TcpStream, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, peer) = listener.accept().unwrap();
        (client, Connection::new(stream, peer, false, shared.clone()))
    }

    #[test]
    fn serve_keep_alive() {
        let (_dir, shared) = shared();
        let (mut client, mut conn) = pair(&shared);
        assert_eq!(shared.client_count(), 1);
        assert!(!conn.is_edge());

        client.write_all(b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n").unwrap();
        assert!(matches!(conn.read(), IoStatus::Success(_)));
        assert!(conn.process());
        assert!(conn.is_keep_alive());
        assert!(matches!(conn.write(), IoStatus::Success(_)));
        assert_eq!(conn.to_write_bytes(), 0);

        conn.finish_request();
        assert!(!conn.process(), "nothing else was sent");
        assert!(!conn.is_closed());

        conn.close();
        let mut reply = String::new();
        client.read_to_string(&mut reply).unwrap();
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\nConnection: keep-alive\r\n"));
        assert!(reply.ends_with("Content-length: 5\r\n\r\nhello"));
    }

    #[test]
    fn bad_request_closes() {
        let (_dir, shared) = shared();
        let (mut client, mut conn) = pair(&shared);

        client.write_all(b"NONSENSE\r\n\r\n").unwrap();
        assert!(matches!(conn.read(), IoStatus::Success(_)));
        assert!(conn.process());
        assert_eq!(conn.response().code(), BAD_REQUEST);
        assert!(!conn.is_keep_alive());
        conn.write();
        conn.close();

        let mut reply = String::new();
        client.read_to_string(&mut reply).unwrap();
        assert!(reply.starts_with("HTTP/1.1 400 Bad Request\r\nConnection: close\r\n"));
        assert!(reply.ends_with("\r\n\r\nbad"));
    }

    #[test]
    fn peer_shutdown() {
        let (_dir, shared) = shared();
        let (client, mut conn) = pair(&shared);
        drop(client);
        assert!(matches!(conn.read(), IoStatus::Shutdown));
    }

    #[test]
    fn close_once() {
        let (_dir, shared) = shared();
        let (_client, conn) = pair(&shared);
        let cell = Client::new(conn);
        cell.close();
        cell.close();
        assert!(cell.lock().is_closed());
        assert_eq!(shared.client_count(), 0);
        drop(cell);
        assert_eq!(shared.client_count(), 0);
    }

    #[test]
    fn claim() {
        let (_dir, shared) = shared();
        let (_client, conn) = pair(&shared);
        let cell = Client::new(conn);
        assert!(cell.try_claim());
        assert!(!cell.try_claim());
        assert!(cell.is_in_flight());
        cell.release();
        assert!(cell.try_claim());
    }

    #[test]
    fn stale_timer_spares_reused_descriptor() {
        let (_dir, shared) = shared();
        let mut timer = Timer::<RawFd>::new();
        let timeout = Duration::from_millis(100);

        let (_old_peer, conn) = pair(&shared);
        let fd = conn.fd();
        let old = Arc::new(Client::new(conn));
        let expired = old.clone();
        timer.add(fd, timeout, Timestamp::from(0), Box::new(move || expired.close()));
        let expired = old.clone();
        let stale: TimeoutCallback = Box::new(move || expired.close());

        // A worker closes the connection after a non-keep-alive response
        old.close();
        assert!(timer.contains(fd));

        let (_new_peer, conn) = pair(&shared);
        let new = Arc::new(Client::new(conn));
        let expired = new.clone();
        timer.add(fd, timeout, Timestamp::from(50), Box::new(move || expired.close()));

        stale();
        assert!(!new.lock().is_closed());
        assert_eq!(timer.expire(Timestamp::from(120)), 0);
        assert!(!new.lock().is_closed());
        assert_eq!(shared.client_count(), 1);

        assert_eq!(timer.expire(Timestamp::from(150)), 1);
        assert!(new.lock().is_closed());
        assert_eq!(shared.client_count(), 0);
    }
}
