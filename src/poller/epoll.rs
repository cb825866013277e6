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

//! Linux `epoll(7)` backend.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use parking_lot::Mutex;

use crate::poller::{Interest, IoFail, IoType, Poll, PollEvent, Trigger, Waker};

/// Default capacity of the kernel event array filled by a single wait.
pub const MAX_EVENTS: usize = 1024;

/// Manager for a set of file descriptors polled by the reactor through a single epoll instance.
pub struct Poller {
    epoll: OwnedFd,
    // Only the reactor thread waits; the lock is never contended.
    scratch: Mutex<Vec<libc::epoll_event>>,
}

impl Poller {
    pub fn new() -> io::Result<Self> { Poller::with_capacity(MAX_EVENTS) }

    pub fn with_capacity(max_events: usize) -> io::Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let epoll = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Poller {
            epoll,
            scratch: Mutex::new(vec![libc::epoll_event { events: 0, u64: 0 }; max_events.max(1)]),
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, interest: Option<Interest>) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interest.map(u32::from).unwrap_or_default(),
            u64: fd as u64,
        };
        let ptr = if interest.is_some() { &mut event as *mut _ } else { std::ptr::null_mut() };
        if unsafe { libc::epoll_ctl(self.epoll.as_raw_fd(), op, fd, ptr) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Poll for Poller {
    fn register(&self, fd: &impl AsRawFd, interest: Interest) -> io::Result<()> {
        #[cfg(feature = "log")]
        log::trace!(target: "epoll", "Registering {} with interest {interest}", fd.as_raw_fd());
        self.ctl(libc::EPOLL_CTL_ADD, fd.as_raw_fd(), Some(interest))
    }

    fn modify(&self, fd: &impl AsRawFd, interest: Interest) -> io::Result<()> {
        #[cfg(feature = "log")]
        log::trace!(target: "epoll", "Setting interest {interest} on {}", fd.as_raw_fd());
        self.ctl(libc::EPOLL_CTL_MOD, fd.as_raw_fd(), Some(interest))
    }

    fn unregister(&self, fd: &impl AsRawFd) -> io::Result<()> {
        #[cfg(feature = "log")]
        log::trace!(target: "epoll", "Unregistering {}", fd.as_raw_fd());
        self.ctl(libc::EPOLL_CTL_DEL, fd.as_raw_fd(), None)
    }

    fn wait(&self, events: &mut Vec<PollEvent>, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = match timeout {
            None => -1,
            // Round up so that a sub-millisecond deadline does not turn into a busy poll
            Some(timeout) => timeout
                .as_micros()
                .div_ceil(1000)
                .min(libc::c_int::MAX as u128) as libc::c_int,
        };

        let mut scratch = self.scratch.lock();
        let res = unsafe {
            libc::epoll_wait(
                self.epoll.as_raw_fd(),
                scratch.as_mut_ptr(),
                scratch.len() as libc::c_int,
                timeout_ms,
            )
        };
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }

        let fired = res as usize;
        for event in &scratch[..fired] {
            // epoll_event is packed on some targets: copy the fields out before use
            let bits = event.events;
            let fd = event.u64 as RawFd;
            let res = readiness(bits);
            #[cfg(feature = "log")]
            log::trace!(target: "epoll", "Got `{res:?}` for {fd}");
            events.push((fd, res));
        }

        if fired == 0 {
            #[cfg(feature = "log")]
            log::trace!(target: "epoll", "Wait timed out with zero events generated");
        }

        Ok(fired)
    }
}

fn readiness(bits: u32) -> Result<IoType, IoFail> {
    if bits & (libc::EPOLLRDHUP | libc::EPOLLHUP) as u32 != 0 {
        Err(IoFail::Connectivity(bits))
    } else if bits & libc::EPOLLERR as u32 != 0 {
        Err(IoFail::Os(bits))
    } else {
        Ok(IoType {
            read: bits & libc::EPOLLIN as u32 != 0,
            write: bits & libc::EPOLLOUT as u32 != 0,
        })
    }
}

impl From<Interest> for u32 {
    fn from(interest: Interest) -> Self {
        let mut e = 0;
        if interest.io.read {
            e |= libc::EPOLLIN;
        }
        if interest.io.write {
            e |= libc::EPOLLOUT;
        }
        if interest.hangup {
            e |= libc::EPOLLRDHUP;
        }
        if interest.trigger == Trigger::Edge {
            e |= libc::EPOLLET;
        }
        if interest.oneshot {
            e |= libc::EPOLLONESHOT;
        }
        e as u32
    }
}

/// [`Waker`] backed by a non-blocking `eventfd(2)` counter.
pub struct EventFd(File);

impl EventFd {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(EventFd(File::from(unsafe { OwnedFd::from_raw_fd(fd) })))
    }
}

impl AsRawFd for EventFd {
    fn as_raw_fd(&self) -> RawFd { self.0.as_raw_fd() }
}

impl Waker for EventFd {
    fn wake(&self) -> io::Result<()> {
        match (&self.0).write(&1u64.to_ne_bytes()) {
            Ok(_) => Ok(()),
            // Counter is saturated: the reactor is going to wake up anyway
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn reset(&self) {
        let mut buf = [0u8; 8];
        let _ = (&self.0).read(&mut buf);
    }
}
