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

//! Server event loop.
//!
//! A single thread waits on the multiplexer, accepts clients and keeps the idle timers, while
//! socket reads, request processing and response writes run as worker tasks. Client sockets are
//! registered with one-shot interest, so a socket stays silent while a task owns its connection
//! and is re-armed by that task once it is done.

#![allow(unused_variables)] // because we need them for feature-gated logger

use std::collections::HashMap;
use std::io;
use std::mem;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel as chan;

use crate::config::Config;
use crate::connection::{Client, Connection, Shared};
use crate::credentials::CredentialStore;
use crate::error::Error;
use crate::listener;
use crate::nonblock::{IoStatus, WriteNonblocking};
use crate::poller::epoll::{EventFd, Poller};
use crate::poller::{Interest, IoFail, IoType, Poll, PollEvent, Trigger, Waker};
use crate::reactor::{Controller, Ctl};
use crate::timeouts::{Timer, Timestamp};
use crate::workers::WorkerPool;

/// Reply sent to clients accepted while the server is at capacity.
pub const BUSY_REPLY: &[u8] = b"Server busy!";

/// HTTP server bound to its listening socket, ready to [`Server::run`].
pub struct Server {
    config: Config,
    listener: TcpListener,
    poller: Arc<Poller>,
    waker: Arc<EventFd>,
    ctl_send: chan::Sender<Ctl>,
    ctl_recv: chan::Receiver<Ctl>,
    /// Origin of the timer timestamps.
    clock: Instant,
    timer: Timer<RawFd>,
    workers: WorkerPool,
    clients: HashMap<RawFd, Arc<Client>>,
    shared: Arc<Shared>,
    events: Vec<PollEvent>,
}

impl Server {
    /// Validates the configuration, binds the listener and spawns the worker threads.
    pub fn bind(config: Config, credentials: Arc<dyn CredentialStore>) -> Result<Self, Error> {
        config.validate()?;

        let port = config.port;
        let listener = listener::bind(port, config.linger)
            .map_err(|err| Error::Listener { port, err })?;

        let poller = Poller::with_capacity(config.max_events).map_err(Error::Poller)?;
        let waker = EventFd::new().map_err(Error::Poller)?;
        let listen_interest =
            Interest::new(IoType::read_only()).with_trigger(config.trigger.listener());
        poller
            .register(&listener, listen_interest)
            .map_err(|err| Error::Listener { port, err })?;
        poller
            .register(&waker, Interest::new(IoType::read_only()))
            .map_err(Error::Poller)?;

        let workers = WorkerPool::new(config.workers)?;
        let (ctl_send, ctl_recv) = chan::unbounded();
        let shared = Arc::new(Shared::new(config.root.clone(), credentials));

        #[cfg(feature = "log")]
        log::info!(
            target: "reactor",
            "Server init: port {}, trigger {}, timeout {:?}, {} workers, resources at {}",
            listener.local_addr().map(|addr| addr.port()).unwrap_or(port),
            config.trigger,
            config.timeout,
            config.workers,
            config.root.display()
        );

        Ok(Server {
            events: Vec::with_capacity(config.max_events),
            config,
            listener,
            poller: Arc::new(poller),
            waker: Arc::new(waker),
            ctl_send,
            ctl_recv,
            clock: Instant::now(),
            timer: Timer::new(),
            workers,
            clients: empty!(),
            shared,
        })
    }

    /// Address the listener is bound to; tells the actual port when bound to port zero.
    pub fn local_addr(&self) -> SocketAddr {
        self.listener
            .local_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], self.config.port)))
    }

    pub fn config(&self) -> &Config { &self.config }

    /// Number of open client connections.
    pub fn client_count(&self) -> usize { self.shared.client_count() }

    pub fn controller(&self) -> Controller {
        Controller::new(self.ctl_send.clone(), self.waker.clone())
    }

    /// Runs the event loop until a shutdown is requested through a [`Controller`].
    pub fn run(mut self) {
        #[cfg(feature = "log")]
        log::info!(target: "reactor", "Entering server event loop");

        loop {
            let timeout = self.timer.next_timeout(self.now());

            #[cfg(feature = "log")]
            log::trace!(target: "reactor", "Polling with timeout {timeout:?}");

            let mut events = mem::take(&mut self.events);
            events.clear();
            if let Err(err) = self.poller.wait(&mut events, timeout) {
                #[cfg(feature = "log")]
                log::error!(target: "reactor", "Error during polling: {err}");
                break;
            }

            let now = self.now();
            let mut shutdown = false;
            for (fd, res) in events.drain(..) {
                if fd == self.listener.as_raw_fd() {
                    self.accept(now);
                } else if fd == self.waker.as_raw_fd() {
                    shutdown |= self.handle_control();
                } else {
                    match res {
                        Err(fail) => self.handle_failure(fd, fail),
                        Ok(io) if io.read => self.dispatch(fd, now, IoType::read_only()),
                        Ok(io) if io.write => self.dispatch(fd, now, IoType::write_only()),
                        Ok(_) => {
                            #[cfg(feature = "log")]
                            log::warn!(target: "reactor", "Unexpected event without I/O on {fd}");
                        }
                    }
                }
            }
            self.events = events;

            if shutdown {
                break;
            }
        }

        self.shutdown();
    }

    fn now(&self) -> Timestamp { Timestamp::since(self.clock) }

    fn client_interest(&self, io: IoType) -> Interest {
        Interest::new(io).with_trigger(self.config.trigger.connections()).oneshot()
    }

    fn accept(&mut self, now: Timestamp) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.add_client(stream, peer, now),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    #[cfg(feature = "log")]
                    log::error!(target: "reactor", "Unable to accept a client: {err}");
                    break;
                }
            }
            // Edge-triggered listeners must drain the backlog
            if self.config.trigger.listener() != Trigger::Edge {
                break;
            }
        }
    }

    fn add_client(&mut self, mut stream: TcpStream, peer: SocketAddr, now: Timestamp) {
        if self.shared.client_count() >= self.config.max_clients {
            #[cfg(feature = "log")]
            log::warn!(target: "reactor", "Clients are full, rejecting {peer}");
            let _ = stream.write_nonblocking(BUSY_REPLY);
            return;
        }
        if let Err(err) = stream.set_nonblocking(true) {
            #[cfg(feature = "log")]
            log::error!(target: "reactor", "Unable to make client {peer} non-blocking: {err}");
            return;
        }

        let fd = stream.as_raw_fd();
        let edge = self.config.trigger.connections() == Trigger::Edge;
        let client = Arc::new(Client::new(Connection::new(stream, peer, edge, self.shared.clone())));

        if let Err(err) = self.poller.register(&fd, self.client_interest(IoType::read_only())) {
            #[cfg(feature = "log")]
            log::error!(target: "reactor", "Unable to register client {peer}: {err}");
            client.close();
            return;
        }
        if let Some(timeout) = self.config.timeout {
            let expired = client.clone();
            self.timer.add(fd, timeout, now, Box::new(move || expired.close()));
        }
        // A closed connection which had the same descriptor number is dropped here
        self.clients.insert(fd, client);
    }

    /// Drains the control channel; returns whether a shutdown was requested.
    fn handle_control(&mut self) -> bool {
        self.waker.reset();
        let mut shutdown = false;
        loop {
            match self.ctl_recv.try_recv() {
                Ok(Ctl::Shutdown) => shutdown = true,
                Err(chan::TryRecvError::Empty) => break,
                // The server itself holds a sender
                Err(chan::TryRecvError::Disconnected) => unreachable!(),
            }
        }
        shutdown
    }

    fn handle_failure(&mut self, fd: RawFd, fail: IoFail) {
        #[cfg(feature = "log")]
        log::debug!(target: "reactor", "Client[{fd}] failed: {fail}");

        if !self.timer.fire(fd) {
            if let Some(client) = self.clients.get(&fd) {
                client.close();
            }
        }
        self.clients.remove(&fd);
    }

    /// Hands a ready connection over to a worker.
    fn dispatch(&mut self, fd: RawFd, now: Timestamp, io: IoType) {
        let Some(client) = self.clients.get(&fd).cloned() else {
            #[cfg(feature = "log")]
            log::warn!(target: "reactor", "Event for unknown descriptor {fd}");
            return;
        };
        if let Some(timeout) = self.config.timeout {
            self.timer.adjust(fd, timeout, now);
        }
        if !client.try_claim() {
            #[cfg(feature = "log")]
            log::trace!(target: "reactor", "Client[{fd}] is busy, dropping {io} event");
            return;
        }

        let poller = self.poller.clone();
        let interest = self.client_interest(io);
        let task_client = client.clone();
        let res = if io.read {
            self.workers.add_task(move || on_read(&task_client, &*poller, interest))
        } else {
            self.workers.add_task(move || on_write(&task_client, &*poller, interest))
        };
        if res.is_err() {
            #[cfg(feature = "log")]
            log::error!(target: "reactor", "Worker pool is gone, closing client {fd}");
            client.close();
            client.release();
        }
    }

    fn shutdown(self) {
        #[cfg(feature = "log")]
        log::info!(target: "reactor", "Shutting down with {} clients", self.shared.client_count());

        let Server {
            mut timer,
            workers,
            clients,
            ..
        } = self;

        if workers.join().is_err() {
            #[cfg(feature = "log")]
            log::error!(target: "reactor", "A worker thread has panicked");
        }
        timer.clear();
        for client in clients.values() {
            client.close();
        }
    }
}

/// Reads from a connection and processes the request; runs in a worker.
fn on_read<P: Poll>(client: &Client, poller: &P, interest: Interest) {
    let mut conn = client.lock();
    if conn.is_closed() {
        client.release();
        return;
    }
    match conn.read() {
        IoStatus::Shutdown | IoStatus::Err(_) => {
            conn.close();
            client.release();
        }
        IoStatus::Success(_) | IoStatus::WouldBlock => on_process(&mut conn, client, poller, interest),
    }
}

/// Writes a pending response; runs in a worker.
fn on_write<P: Poll>(client: &Client, poller: &P, interest: Interest) {
    let mut conn = client.lock();
    if conn.is_closed() {
        client.release();
        return;
    }
    let status = conn.write();
    if conn.to_write_bytes() == 0 {
        if conn.is_keep_alive() {
            conn.finish_request();
            return on_process(&mut conn, client, poller, interest);
        }
    } else if matches!(status, IoStatus::Success(_) | IoStatus::WouldBlock) {
        return rearm(&mut conn, client, poller, interest.with_io(IoType::write_only()));
    }
    conn.close();
    client.release();
}

fn on_process<P: Poll>(conn: &mut Connection, client: &Client, poller: &P, interest: Interest) {
    let io = if conn.process() { IoType::write_only() } else { IoType::read_only() };
    rearm(conn, client, poller, interest.with_io(io));
}

/// Gives the connection back to the reactor and re-arms its one-shot registration.
///
/// The flag is cleared first: once the socket is armed, the next event may arrive at any moment.
fn rearm<P: Poll>(conn: &mut Connection, client: &Client, poller: &P, interest: Interest) {
    client.release();
    if let Err(err) = poller.modify(&conn.fd(), interest) {
        #[cfg(feature = "log")]
        log::error!(target: "reactor", "Unable to re-arm client {}: {err}", conn.fd());
        conn.close();
    }
}
