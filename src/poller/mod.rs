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

//! Readiness multiplexer abstraction.
//!
//! A [`Poll`] implementation tracks a set of file descriptors together with their [`Interest`]
//! and reports which of them became ready. Unlike the reactor-owned state, pollers are shared
//! between the reactor thread and the worker threads: workers re-arm one-shot registrations once
//! they are done with a connection.

pub mod epoll;

use std::fmt::{self, Display, Formatter};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

/// Information about I/O events which has happened for a file descriptor.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct IoType {
    /// Specifies whether I/O source has data to read.
    pub read: bool,
    /// Specifies whether I/O source is ready for write operations.
    pub write: bool,
}

impl IoType {
    pub fn read_only() -> Self {
        Self {
            read: true,
            write: false,
        }
    }

    pub fn write_only() -> Self {
        Self {
            read: false,
            write: true,
        }
    }
}

impl Display for IoType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match (self.read, self.write) {
            (false, false) => f.write_str("none"),
            (true, false) => f.write_str("read"),
            (false, true) => f.write_str("write"),
            (true, true) => f.write_str("read-write"),
        }
    }
}

/// Readiness delivery mode.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Display)]
pub enum Trigger {
    /// Keeps notifying while the descriptor stays ready.
    #[default]
    #[display("level")]
    Level,
    /// Notifies once per readiness change; the consumer must drain the descriptor.
    #[display("edge")]
    Edge,
}

/// Registration mask for a file descriptor.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Interest {
    pub io: IoType,
    pub trigger: Trigger,
    /// Disarm the registration after the first notification until it is modified again.
    pub oneshot: bool,
    /// Report the peer closing its writing half.
    pub hangup: bool,
}

impl Interest {
    pub fn new(io: IoType) -> Self {
        Interest {
            io,
            trigger: Trigger::Level,
            oneshot: false,
            hangup: true,
        }
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn oneshot(mut self) -> Self {
        self.oneshot = true;
        self
    }

    /// Same registration flags, different I/O direction.
    pub fn with_io(mut self, io: IoType) -> Self {
        self.io = io;
        self
    }
}

impl Display for Interest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}", self.io, self.trigger)?;
        if self.oneshot {
            f.write_str(", oneshot")?;
        }
        f.write_str(")")
    }
}

#[derive(Copy, Clone, Debug, Display, Error)]
#[display(doc_comments)]
pub enum IoFail {
    /// connection is absent (epoll events {0:#b})
    Connectivity(u32),
    /// OS-level error (epoll events {0:#b})
    Os(u32),
}

/// Single readiness notification.
pub type PollEvent = (RawFd, Result<IoType, IoFail>);

pub trait Poll: Send + Sync {
    fn register(&self, fd: &impl AsRawFd, interest: Interest) -> io::Result<()>;
    fn modify(&self, fd: &impl AsRawFd, interest: Interest) -> io::Result<()>;
    fn unregister(&self, fd: &impl AsRawFd) -> io::Result<()>;

    /// Blocks until at least one registered descriptor is ready or the timeout elapses.
    ///
    /// `None` blocks indefinitely; a zero duration polls. Ready descriptors are appended to
    /// `events`, and the number of them is returned.
    fn wait(&self, events: &mut Vec<PollEvent>, timeout: Option<Duration>) -> io::Result<usize>;
}

/// Cross-thread wake-up source which can be registered with a [`Poll`].
pub trait Waker: AsRawFd + Send + Sync {
    fn wake(&self) -> io::Result<()>;
    fn reset(&self);
}
