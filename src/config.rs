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

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;
use crate::poller::Trigger;

pub const DEFAULT_PORT: u16 = 1316;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_WORKERS: usize = 6;
pub const DEFAULT_ROOT: &str = "./resources";
pub const DEFAULT_MAX_CLIENTS: usize = 65536;
pub const DEFAULT_MAX_EVENTS: usize = 1024;

/// Which sockets are registered edge-triggered.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Display)]
pub enum TriggerMode {
    /// Level-triggered listener and connections.
    #[display("level")]
    Level,

    /// Edge-triggered connections, level-triggered listener.
    #[display("edge-connections")]
    EdgeConnections,

    /// Edge-triggered listener, level-triggered connections.
    #[display("edge-listener")]
    EdgeListener,

    /// Edge-triggered listener and connections.
    #[default]
    #[display("edge")]
    Edge,
}

impl TriggerMode {
    pub fn listener(self) -> Trigger {
        match self {
            TriggerMode::EdgeListener | TriggerMode::Edge => Trigger::Edge,
            TriggerMode::Level | TriggerMode::EdgeConnections => Trigger::Level,
        }
    }

    pub fn connections(self) -> Trigger {
        match self {
            TriggerMode::EdgeConnections | TriggerMode::Edge => Trigger::Edge,
            TriggerMode::Level | TriggerMode::EdgeListener => Trigger::Level,
        }
    }
}

/// Maps the numeric `0..=3` trigger selector used on the command line.
impl TryFrom<u8> for TriggerMode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => TriggerMode::Level,
            1 => TriggerMode::EdgeConnections,
            2 => TriggerMode::EdgeListener,
            3 => TriggerMode::Edge,
            other => return Err(Error::TriggerMode(other.to_string())),
        })
    }
}

impl FromStr for TriggerMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "level" => TriggerMode::Level,
            "edge-connections" => TriggerMode::EdgeConnections,
            "edge-listener" => TriggerMode::EdgeListener,
            "edge" => TriggerMode::Edge,
            other => match other.parse::<u8>() {
                Ok(num) => TriggerMode::try_from(num)?,
                Err(_) => return Err(Error::TriggerMode(other.to_owned())),
            },
        })
    }
}

/// Server settings.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Config {
    /// Listening port; zero lets the OS pick one.
    pub port: u16,
    pub trigger: TriggerMode,
    /// Idle time after which a connection gets closed; `None` never evicts.
    pub timeout: Option<Duration>,
    pub workers: usize,
    /// Whether closing sockets lingers to flush unsent data.
    pub linger: bool,
    /// Directory the request paths are resolved against.
    pub root: PathBuf,
    pub max_clients: usize,
    /// Capacity of a single multiplexer wait.
    pub max_events: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: DEFAULT_PORT,
            trigger: TriggerMode::default(),
            timeout: Some(DEFAULT_TIMEOUT),
            workers: DEFAULT_WORKERS,
            linger: false,
            root: PathBuf::from(DEFAULT_ROOT),
            max_clients: DEFAULT_MAX_CLIENTS,
            max_events: DEFAULT_MAX_EVENTS,
        }
    }
}

impl Config {
    pub fn new() -> Self { Config::default() }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerMode) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_linger(mut self, linger: bool) -> Self {
        self.linger = linger;
        self
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients;
        self
    }

    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events;
        self
    }

    /// Checks settings which would make the server unusable.
    pub fn validate(&self) -> Result<(), Error> {
        if (1..1024).contains(&self.port) {
            return Err(Error::PrivilegedPort(self.port));
        }
        if self.workers == 0 {
            return Err(Error::NoWorkers);
        }
        if self.max_clients == 0 || self.max_events == 0 {
            return Err(Error::NoCapacity);
        }
        Ok(())
    }
}
