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

use std::fs::{self, Permissions};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use httpd::{Config, MemoryCredentials, Reactor, Server, TriggerMode, BUSY_REPLY};
use tempfile::TempDir;

const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Writes a world-readable file regardless of the process umask.
fn publish(path: &Path, content: &[u8]) {
    fs::write(path, content).unwrap();
    fs::set_permissions(path, Permissions::from_mode(0o644)).unwrap();
}

struct Harness {
    _root: TempDir,
    reactor: Option<Reactor>,
    large: Vec<u8>,
}

impl Harness {
    fn start(config: Config) -> Self {
        let root = tempfile::tempdir().unwrap();
        let pages = [
            ("index.html", "<h1>index</h1>"),
            ("welcome.html", "<h1>welcome</h1>"),
            ("error.html", "<h1>error</h1>"),
            ("login.html", "<form>login</form>"),
            ("400.html", "<h1>400</h1>"),
            ("403.html", "<h1>403</h1>"),
            ("404.html", "<h1>404</h1>"),
        ];
        for (name, content) in pages {
            publish(&root.path().join(name), content.as_bytes());
        }
        let large = (0..1_000_000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>();
        publish(&root.path().join("large.bin"), &large);

        let credentials = Arc::new(MemoryCredentials::with_users([("alice", "secret")]));
        let config = config.with_port(0).with_workers(4).with_root(root.path());
        let server = Server::bind(config, credentials).unwrap();
        let reactor = Reactor::new(server).unwrap();
        Harness {
            _root: root,
            reactor: Some(reactor),
            large,
        }
    }

    fn connect(&self) -> TcpStream {
        let port = self.reactor.as_ref().unwrap().local_addr().port();
        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
        stream
    }

    fn stop(mut self) {
        let reactor = self.reactor.take().unwrap();
        reactor.controller().shutdown().map_err(|_| ()).unwrap();
        reactor.join().unwrap();
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if let Some(reactor) = self.reactor.take() {
            let _ = reactor.controller().shutdown();
            let _ = reactor.join();
        }
    }
}

struct Reply {
    status: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Reply {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn body(&self) -> &str { std::str::from_utf8(&self.body).unwrap() }
}

fn read_reply(reader: &mut BufReader<TcpStream>) -> Reply {
    let mut status = String::new();
    reader.read_line(&mut status).unwrap();
    let status = status.trim_end().to_owned();

    let mut headers = vec![];
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        let (key, value) = line.split_once(": ").unwrap();
        headers.push((key.to_owned(), value.to_owned()));
    }

    let reply = Reply {
        status,
        headers,
        body: vec![],
    };
    let len = reply.header("Content-length").unwrap().parse::<usize>().unwrap();
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).unwrap();
    Reply { body, ..reply }
}

fn request(stream: &TcpStream, raw: &str) -> Reply {
    (&*stream).write_all(raw.as_bytes()).unwrap();
    read_reply(&mut BufReader::new(stream.try_clone().unwrap()))
}

fn assert_closed(stream: &TcpStream) {
    let mut rest = vec![];
    (&*stream).read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
}

fn login_form(path: &str, username: &str, password: &str) -> String {
    let body = format!("username={username}&password={password}");
    format!(
        "POST {path} HTTP/1.1\r\nConnection: keep-alive\r\n\
         Content-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

#[test]
fn keep_alive_reuse() {
    let harness = Harness::start(Config::new());
    let stream = harness.connect();

    let reply = request(&stream, "GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
    assert_eq!(reply.status, "HTTP/1.1 200 OK");
    assert_eq!(reply.header("Connection"), Some("keep-alive"));
    assert_eq!(reply.header("keep-alive"), Some("max=6, timeout=120"));
    assert_eq!(reply.header("Content-type"), Some("text/html"));
    assert_eq!(reply.body(), "<h1>index</h1>");

    let reply = request(&stream, "GET /welcome HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
    assert_eq!(reply.status, "HTTP/1.1 200 OK");
    assert_eq!(reply.body(), "<h1>welcome</h1>");

    let reply = request(&stream, "GET /login HTTP/1.1\r\n\r\n");
    assert_eq!(reply.header("Connection"), Some("close"));
    assert_eq!(reply.body(), "<form>login</form>");
    assert_closed(&stream);

    harness.stop();
}

#[test]
fn not_found() {
    let harness = Harness::start(Config::new());
    let stream = harness.connect();
    let reply = request(&stream, "GET /missing.html HTTP/1.1\r\n\r\n");
    assert_eq!(reply.status, "HTTP/1.1 404 Not Found");
    assert_eq!(reply.body(), "<h1>404</h1>");
    assert_closed(&stream);
}

#[test]
fn path_traversal_forbidden() {
    let harness = Harness::start(Config::new());
    let stream = harness.connect();
    let reply = request(&stream, "GET /../../etc/passwd HTTP/1.1\r\n\r\n");
    assert_eq!(reply.status, "HTTP/1.1 403 Forbidden");
    assert_eq!(reply.body(), "<h1>403</h1>");
}

#[test]
fn bad_request() {
    let harness = Harness::start(Config::new());
    let stream = harness.connect();
    let reply = request(&stream, "HELLO\r\n\r\n");
    assert_eq!(reply.status, "HTTP/1.1 400 Bad Request");
    assert_eq!(reply.header("Connection"), Some("close"));
    assert_eq!(reply.body(), "<h1>400</h1>");
    assert_closed(&stream);
}

#[test]
fn login_and_register() {
    let harness = Harness::start(Config::new());
    let stream = harness.connect();

    let reply = request(&stream, &login_form("/login", "alice", "secret"));
    assert_eq!(reply.body(), "<h1>welcome</h1>");
    let reply = request(&stream, &login_form("/login", "alice", "wrong"));
    assert_eq!(reply.body(), "<h1>error</h1>");

    let reply = request(&stream, &login_form("/register", "bob", "pw"));
    assert_eq!(reply.body(), "<h1>welcome</h1>");
    let reply = request(&stream, &login_form("/register", "bob", "other"));
    assert_eq!(reply.body(), "<h1>error</h1>");
    let reply = request(&stream, &login_form("/login", "bob", "pw"));
    assert_eq!(reply.body(), "<h1>welcome</h1>");
}

#[test]
fn request_in_pieces() {
    let harness = Harness::start(Config::new());
    let stream = harness.connect();
    let raw = b"GET /index HTTP/1.1\r\nConnection: keep-alive\r\n\r\n";
    for chunk in raw.chunks(7) {
        (&stream).write_all(chunk).unwrap();
        thread::sleep(Duration::from_millis(5));
    }
    let reply = read_reply(&mut BufReader::new(stream.try_clone().unwrap()));
    assert_eq!(reply.status, "HTTP/1.1 200 OK");
    assert_eq!(reply.body(), "<h1>index</h1>");
}

#[test]
fn large_body() {
    for trigger in [TriggerMode::Edge, TriggerMode::Level] {
        let harness = Harness::start(Config::new().with_trigger(trigger));
        let stream = harness.connect();
        let reply = request(&stream, "GET /large.bin HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
        assert_eq!(reply.status, "HTTP/1.1 200 OK");
        assert_eq!(reply.header("Content-type"), Some("application/octet-stream"));
        assert_eq!(reply.body.len(), harness.large.len());
        assert!(reply.body == harness.large, "body differs with {trigger} trigger");

        let reply = request(&stream, "GET / HTTP/1.1\r\n\r\n");
        assert_eq!(reply.body(), "<h1>index</h1>");
        harness.stop();
    }
}

#[test]
fn concurrent_clients() {
    let harness = Harness::start(Config::new());
    let clients = (0..16)
        .map(|_| {
            let stream = harness.connect();
            thread::spawn(move || {
                for _ in 0..10 {
                    let reply =
                        request(&stream, "GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
                    assert_eq!(reply.body(), "<h1>index</h1>");
                }
            })
        })
        .collect::<Vec<_>>();
    for client in clients {
        client.join().unwrap();
    }
}

#[test]
fn idle_timeout() {
    let harness = Harness::start(Config::new().with_timeout(Some(Duration::from_millis(200))));
    let stream = harness.connect();
    let reply = request(&stream, "GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
    assert_eq!(reply.status, "HTTP/1.1 200 OK");
    // The server closes the connection once it has been idle for the timeout
    assert_closed(&stream);
}

#[test]
fn reused_descriptor_keeps_own_deadline() {
    let harness = Harness::start(Config::new().with_timeout(Some(Duration::from_millis(400))));
    let first = harness.connect();
    let reply = request(&first, "GET / HTTP/1.1\r\n\r\n");
    assert_eq!(reply.header("Connection"), Some("close"));
    assert_closed(&first);
    drop(first);

    thread::sleep(Duration::from_millis(200));
    let second = harness.connect();
    let reply = request(&second, "GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
    assert_eq!(reply.status, "HTTP/1.1 200 OK");

    // Past the deadline of the first connection, well before the second one's
    thread::sleep(Duration::from_millis(280));
    second.set_nonblocking(true).unwrap();
    let mut byte = [0u8; 1];
    let err = (&second).read(&mut byte).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
    second.set_nonblocking(false).unwrap();

    assert_closed(&second);
}

#[test]
fn busy_server() {
    let harness = Harness::start(Config::new().with_max_clients(1));
    let first = harness.connect();
    let reply = request(&first, "GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
    assert_eq!(reply.status, "HTTP/1.1 200 OK");

    let second = harness.connect();
    let mut rejection = vec![];
    (&second).read_to_end(&mut rejection).unwrap();
    assert_eq!(rejection, BUSY_REPLY);

    let reply = request(&first, "GET / HTTP/1.1\r\n\r\n");
    assert_eq!(reply.status, "HTTP/1.1 200 OK");
}

#[test]
fn shutdown_closes_clients() {
    let harness = Harness::start(Config::new());
    let stream = harness.connect();
    let reply = request(&stream, "GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
    assert_eq!(reply.status, "HTTP/1.1 200 OK");
    harness.stop();
    assert_closed(&stream);
}
