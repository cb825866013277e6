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

#[macro_use]
extern crate log;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use httpd::{Config, MemoryCredentials, Reactor, Server, TriggerMode};

#[derive(Parser)]
#[command(author, version, about = "Multi-threaded HTTP/1.1 static file server")]
struct Args {
    /// Port to listen on; 0 picks an ephemeral one
    #[arg(short, long, default_value_t = httpd::config::DEFAULT_PORT)]
    port: u16,

    /// Trigger mode: 0 (level), 1 (edge connections), 2 (edge listener) or 3 (edge)
    #[arg(short, long, default_value = "3")]
    trigger: TriggerMode,

    /// Idle connection timeout in milliseconds; 0 keeps idle connections forever
    #[arg(long, default_value_t = 60_000)]
    timeout: u64,

    /// Number of worker threads
    #[arg(short, long, default_value_t = httpd::config::DEFAULT_WORKERS)]
    workers: usize,

    /// Linger on close to flush unsent data
    #[arg(long)]
    linger: bool,

    /// Directory with the served files
    #[arg(short, long, default_value = httpd::config::DEFAULT_ROOT)]
    root: PathBuf,

    /// Maximum number of simultaneously connected clients
    #[arg(long, default_value_t = httpd::config::DEFAULT_MAX_CLIENTS)]
    max_clients: usize,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Config::new()
            .with_port(args.port)
            .with_trigger(args.trigger)
            .with_timeout((args.timeout > 0).then(|| Duration::from_millis(args.timeout)))
            .with_workers(args.workers)
            .with_linger(args.linger)
            .with_root(args.root)
            .with_max_clients(args.max_clients)
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from(Args::parse());
    let server = match Server::bind(config, Arc::new(MemoryCredentials::new())) {
        Ok(server) => server,
        Err(err) => {
            error!("Server startup failed: {err}");
            return ExitCode::FAILURE;
        }
    };
    let reactor = match Reactor::new(server) {
        Ok(reactor) => reactor,
        Err(err) => {
            error!("Server startup failed: {err}");
            return ExitCode::FAILURE;
        }
    };
    info!("Serving on {}", reactor.local_addr());

    if reactor.join().is_err() {
        error!("Server thread has panicked");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
