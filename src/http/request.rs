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

//! Incremental HTTP/1.1 request parser.

use std::collections::{BTreeMap, HashMap};

use crate::buffer::Buffer;
use crate::credentials::CredentialStore;

/// Extensionless routes which are served from the `.html` file of the same name.
pub const HTML_ROUTES: [&str; 6] = ["/index", "/register", "/login", "/welcome", "/video", "/picture"];

pub const LOGIN_PAGE: &str = "/login.html";
pub const REGISTER_PAGE: &str = "/register.html";
pub const WELCOME_PAGE: &str = "/welcome.html";
pub const ERROR_PAGE: &str = "/error.html";

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Display)]
pub enum ParseState {
    #[default]
    #[display("request-line")]
    RequestLine,
    #[display("headers")]
    Headers,
    #[display("body")]
    Body,
    #[display("finished")]
    Finished,
}

#[derive(Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum ParseError {
    /// malformed request line `{0}`.
    RequestLine(String),

    /// invalid Content-Length value `{0}`.
    ContentLength(String),
}

/// HTTP request assembled line by line from a connection read buffer.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct Request {
    state: ParseState,
    method: String,
    path: String,
    version: String,
    headers: BTreeMap<String, String>,
    body: String,
    form: HashMap<String, String>,
}

impl Request {
    pub fn new() -> Self { Request::default() }

    /// Forgets everything parsed so far, getting ready for the next request on the connection.
    pub fn reset(&mut self) { *self = Request::default(); }

    pub fn state(&self) -> ParseState { self.state }

    pub fn is_finished(&self) -> bool { self.state == ParseState::Finished }

    pub fn method(&self) -> &str { &self.method }

    /// Resolved path of the requested resource.
    pub fn path(&self) -> &str { &self.path }

    pub fn version(&self) -> &str { &self.version }

    pub fn headers(&self) -> &BTreeMap<String, String> { &self.headers }

    /// Value of a header, looking the name up case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body(&self) -> &str { &self.body }

    /// Decoded field of an urlencoded form body.
    pub fn form_field(&self, key: &str) -> Option<&str> { self.form.get(key).map(String::as_str) }

    pub fn form(&self) -> &HashMap<String, String> { &self.form }

    /// Persistent connections are honoured only for HTTP/1.1 clients asking for them.
    pub fn is_keep_alive(&self) -> bool {
        self.version == "1.1" &&
            self.header("Connection").is_some_and(|value| value.eq_ignore_ascii_case("keep-alive"))
    }

    /// Consumes complete lines from `buf` and advances the parse state.
    ///
    /// Returns `Ok(true)` once the request is complete and `Ok(false)` if more input is needed.
    /// An incomplete line is left in the buffer untouched, so the same request may arrive in
    /// any number of pieces. Form submissions to the login and registration pages are checked
    /// against `credentials` and redirected to the welcome or error page.
    pub fn parse(
        &mut self,
        buf: &mut Buffer,
        credentials: &dyn CredentialStore,
    ) -> Result<bool, ParseError> {
        while self.state != ParseState::Finished {
            match self.state {
                ParseState::RequestLine => {
                    let Some(line) = take_line(buf) else {
                        return Ok(false);
                    };
                    self.parse_request_line(&line)?;
                    self.resolve_path();
                    self.state = ParseState::Headers;
                }
                ParseState::Headers => {
                    let Some(line) = take_line(buf) else {
                        return Ok(false);
                    };
                    if line.is_empty() {
                        self.state = if self.expects_body(buf)? {
                            ParseState::Body
                        } else {
                            ParseState::Finished
                        };
                    } else if !self.parse_header(&line) {
                        self.state = ParseState::Body;
                    }
                }
                ParseState::Body => {
                    let Some(body) = self.take_body(buf)? else {
                        return Ok(false);
                    };
                    self.body = body;
                    self.parse_post(credentials);
                    self.state = ParseState::Finished;
                }
                ParseState::Finished => unreachable!(),
            }
        }

        #[cfg(feature = "log")]
        log::debug!(target: "http", "Parsed request {} {} HTTP/{}", self.method, self.path, self.version);

        Ok(true)
    }

    fn parse_request_line(&mut self, line: &str) -> Result<(), ParseError> {
        let mut parts = line.split(' ');
        let (Some(method), Some(path), Some(protocol), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ParseError::RequestLine(line.to_owned()));
        };
        let Some(version) = protocol.strip_prefix("HTTP/") else {
            return Err(ParseError::RequestLine(line.to_owned()));
        };
        if method.is_empty() || path.is_empty() || version.is_empty() {
            return Err(ParseError::RequestLine(line.to_owned()));
        }
        self.method = method.to_owned();
        self.path = path.to_owned();
        self.version = version.to_owned();
        Ok(())
    }

    fn resolve_path(&mut self) {
        if self.path == "/" {
            self.path = s!("/index.html");
        } else if HTML_ROUTES.contains(&self.path.as_str()) {
            self.path.push_str(".html");
        }
    }

    /// Parses a `Key: Value` header line; returns `false` if the line is not a header.
    fn parse_header(&mut self, line: &str) -> bool {
        let Some((key, value)) = line.split_once(':') else {
            return false;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        self.headers.insert(key.to_owned(), value.to_owned());
        true
    }

    fn content_length(&self) -> Result<Option<usize>, ParseError> {
        self.header("Content-Length")
            .map(|value| {
                value.trim().parse().map_err(|_| ParseError::ContentLength(value.to_owned()))
            })
            .transpose()
    }

    /// Decides what follows the blank line ending the header section.
    fn expects_body(&self, buf: &Buffer) -> Result<bool, ParseError> {
        Ok(match self.content_length()? {
            Some(len) => len > 0,
            None if matches!(self.method.as_str(), "GET" | "HEAD") => false,
            None => !buf.is_empty(),
        })
    }

    /// Takes the body: exactly `Content-Length` bytes when declared, otherwise a single line
    /// (or whatever is left if the line is not terminated).
    fn take_body(&self, buf: &mut Buffer) -> Result<Option<String>, ParseError> {
        if let Some(len) = self.content_length()? {
            if buf.readable_bytes() < len {
                return Ok(None);
            }
            return Ok(Some(buf.retrieve_to_string(len)));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        Ok(Some(take_line(buf).unwrap_or_else(|| buf.retrieve_all_to_string())))
    }

    fn parse_post(&mut self, credentials: &dyn CredentialStore) {
        let is_form = self
            .header("Content-Type")
            .is_some_and(|value| value.trim_start().starts_with(FORM_URLENCODED));
        if self.method != "POST" || !is_form {
            return;
        }
        self.form = decode_form(&self.body);

        let is_login = match self.path.as_str() {
            LOGIN_PAGE => true,
            REGISTER_PAGE => false,
            _ => return,
        };
        let username = self.form_field("username").unwrap_or_default();
        let password = self.form_field("password").unwrap_or_default();
        self.path = if credentials.verify(username, password, is_login) {
            WELCOME_PAGE.to_owned()
        } else {
            ERROR_PAGE.to_owned()
        };
    }
}

/// Removes the next CRLF-terminated line from `buf`, without the terminator.
fn take_line(buf: &mut Buffer) -> Option<String> {
    let end = buf.find_crlf()?;
    let line = String::from_utf8_lossy(&buf.peek()[..end]).into_owned();
    buf.retrieve(end + 2);
    Some(line)
}

/// Decodes an `application/x-www-form-urlencoded` body into its fields.
pub fn decode_form(body: &str) -> HashMap<String, String> {
    body.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(s: &str) -> String {
    fn hex(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }

    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => match (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                (Some(hi), Some(lo)) => {
                    out.push((hi << 4) | lo);
                    i += 2;
                }
                // Malformed escapes are kept verbatim
                _ => out.push(b'%'),
            },
            other => out.push(other),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
