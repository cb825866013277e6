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

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel as chan;

use crate::error::Error;
use crate::poller::Waker;
use crate::server::Server;

/// Messages delivered to the server loop through the [`Controller`].
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display)]
pub enum Ctl {
    #[display("shutdown")]
    Shutdown,
}

/// Control API to the [`Server`] running inside a [`Reactor`] thread.
///
/// Commands are sent over a channel; the waker registered with the server multiplexer then
/// interrupts the wait so the loop picks them up without delay.
#[derive(Clone)]
pub struct Controller {
    ctl_send: chan::Sender<Ctl>,
    waker: Arc<dyn Waker>,
}

impl Controller {
    pub(crate) fn new(ctl_send: chan::Sender<Ctl>, waker: Arc<dyn Waker>) -> Self {
        Self { ctl_send, waker }
    }

    /// Shuts the server down: the loop stops, clients are closed and workers are joined.
    pub fn shutdown(self) -> Result<(), Self> {
        #[cfg(feature = "log")]
        log::info!(target: "reactor", "Initiating server shutdown...");

        let res1 = self.ctl_send.send(Ctl::Shutdown);
        let res2 = self.wake();
        res1.map_err(|_| ()).and(res2.map_err(|_| ())).map_err(|_| self)
    }

    pub(crate) fn wake(&self) -> io::Result<()> {
        #[cfg(feature = "log")]
        log::trace!(target: "reactor", "Wakening the server loop");
        self.waker.wake()
    }
}

/// Runs a [`Server`] event loop in a dedicated thread.
pub struct Reactor {
    thread: JoinHandle<()>,
    controller: Controller,
    local_addr: SocketAddr,
}

impl Reactor {
    /// Moves the server into a new thread named `httpd-reactor`.
    ///
    /// # Error
    ///
    /// Errors if it was impossible to spawn a thread.
    pub fn new(server: Server) -> Result<Self, Error> {
        Reactor::with(server, thread::Builder::new().name(s!("httpd-reactor")))
    }

    /// Moves the server into a thread constructed by `builder`.
    ///
    /// # Error
    ///
    /// Errors if it was impossible to spawn a thread.
    pub fn with(server: Server, builder: thread::Builder) -> Result<Self, Error> {
        let controller = server.controller();
        let local_addr = server.local_addr();

        #[cfg(feature = "log")]
        log::debug!(target: "reactor", "Initializing reactor thread...");

        let thread = builder.spawn(move || server.run())?;
        Ok(Self {
            thread,
            controller,
            local_addr,
        })
    }

    /// Provides a copy of a [`Controller`] for the running server.
    pub fn controller(&self) -> Controller { self.controller.clone() }

    /// Address the server accepts connections on.
    pub fn local_addr(&self) -> SocketAddr { self.local_addr }

    /// Joins the reactor thread.
    pub fn join(self) -> thread::Result<()> { self.thread.join() }
}
