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

/// Errors which prevent the server from starting.
///
/// Failures of individual connections never end up here: they are handled by closing the
/// connection.
#[derive(Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum Error {
    /// port {0} is privileged; use a port above 1023 or zero for an ephemeral one.
    PrivilegedPort(u16),

    /// the server needs at least one worker thread.
    NoWorkers,

    /// client and event capacity must be non-zero.
    NoCapacity,

    /// unknown trigger mode `{0}`; expected a number from 0 to 3 or a mode name.
    TriggerMode(String),

    /// unable to set up the listening socket on port {port}. Details: {err}
    Listener { port: u16, err: io::Error },

    /// unable to create the readiness multiplexer. Details: {0}
    Poller(io::Error),

    /// unable to spawn server threads. Details: {0}
    #[from]
    Thread(io::Error),
}
