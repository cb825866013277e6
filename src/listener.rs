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

//! Listening socket setup.

use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::os::unix::io::AsRawFd;

/// Seconds a closing socket may linger to flush unsent data.
pub const LINGER_SECS: libc::c_int = 1;

/// Binds a non-blocking listener on all IPv4 interfaces.
///
/// The socket reuses the address so a restarted server can bind while old connections are in
/// `TIME_WAIT`. With `linger` enabled, accepted sockets inherit `SO_LINGER` and block on close
/// for up to [`LINGER_SECS`] while unsent data is flushed.
pub fn bind(port: u16, linger: bool) -> io::Result<TcpListener> {
    let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))?;
    if linger {
        set_linger(&listener, LINGER_SECS)?;
    }
    listener.set_nonblocking(true)?;

    #[cfg(feature = "log")]
    log::info!(target: "reactor", "Listening on port {port}{}", if linger { " with linger" } else { "" });

    Ok(listener)
}

fn set_linger(socket: &impl AsRawFd, secs: libc::c_int) -> io::Result<()> {
    let linger = libc::linger {
        l_onoff: 1,
        l_linger: secs,
    };
    let res = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            &linger as *const libc::linger as *const libc::c_void,
            mem::size_of::<libc::linger>() as libc::socklen_t,
        )
    };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
