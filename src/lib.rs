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

#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    unused_imports,
    dead_code,
    //missing_docs
)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Multi-threaded HTTP/1.1 static file server built directly on `epoll(7)`.
//!
//! A single reactor thread ([`Server::run`], usually wrapped into a [`Reactor`]) waits for
//! readiness of the listening socket and of all client sockets, and keeps an idle timer for
//! every client. Reading, parsing, building responses and writing them back happen in a fixed
//! [`WorkerPool`]. Client sockets are registered with one-shot interest, and each connection
//! carries an in-flight flag, so a connection is owned either by the reactor or by exactly one
//! worker at any time.
//!
//! Response bodies are files under the resource root mapped into memory and sent together with
//! the headers by a single gather write.

#[macro_use]
extern crate amplify;

pub mod buffer;
pub mod config;
pub mod connection;
pub mod credentials;
mod error;
pub mod http;
pub mod listener;
pub mod nonblock;
pub mod poller;
mod reactor;
mod server;
pub mod timeouts;
pub mod workers;

pub use buffer::Buffer;
pub use config::{Config, TriggerMode};
pub use connection::{Client, Connection};
pub use credentials::{CredentialStore, MemoryCredentials};
pub use error::Error;
pub use server::{Server, BUSY_REPLY};
pub use timeouts::{Timer, Timestamp};
pub use workers::WorkerPool;

pub use self::reactor::{Controller, Ctl, Reactor};
