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

//! User credential storage consulted by the login and registration forms.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Key/value credential lookup with insert-on-registration.
pub trait CredentialStore: Send + Sync {
    /// Verifies a user.
    ///
    /// For a login attempt returns whether `password` matches the stored one. For a registration
    /// returns whether `username` was still free, in which case the user gets stored.
    fn verify(&self, username: &str, password: &str, is_login: bool) -> bool;
}

/// Credential store kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    users: RwLock<HashMap<String, String>>,
}

impl MemoryCredentials {
    pub fn new() -> Self { MemoryCredentials::default() }

    pub fn with_users<'a>(users: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let users = users
            .into_iter()
            .map(|(name, password)| (name.to_owned(), password.to_owned()))
            .collect();
        MemoryCredentials {
            users: RwLock::new(users),
        }
    }

    pub fn len(&self) -> usize { self.users.read().len() }

    pub fn is_empty(&self) -> bool { self.users.read().is_empty() }
}

impl CredentialStore for MemoryCredentials {
    fn verify(&self, username: &str, password: &str, is_login: bool) -> bool {
        if username.is_empty() || password.is_empty() {
            return false;
        }

        if is_login {
            let ok = self.users.read().get(username).is_some_and(|stored| stored == password);
            #[cfg(feature = "log")]
            log::debug!(target: "http", "Login of `{username}`: {}", if ok { "ok" } else { "denied" });
            return ok;
        }

        let mut users = self.users.write();
        if users.contains_key(username) {
            #[cfg(feature = "log")]
            log::debug!(target: "http", "Registration of `{username}` denied: name is taken");
            return false;
        }
        users.insert(username.to_owned(), password.to_owned());
        #[cfg(feature = "log")]
        log::debug!(target: "http", "Registered user `{username}`");
        true
    }
}
