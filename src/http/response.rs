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

//! HTTP response builder serving files from the resource root.

use std::fs::{self, File};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use memmap2::{Mmap, MmapOptions};

use super::mime;
use crate::buffer::Buffer;

/// Value of the `keep-alive` header advertised on persistent connections.
pub const KEEP_ALIVE_PARAMS: &str = "max=6, timeout=120";

const WORLD_READABLE: u32 = 0o004;

pub const OK: u16 = 200;
pub const BAD_REQUEST: u16 = 400;
pub const FORBIDDEN: u16 = 403;
pub const NOT_FOUND: u16 = 404;

/// Reason phrase of a supported status code.
pub fn status_text(code: u16) -> Option<&'static str> {
    match code {
        OK => Some("OK"),
        BAD_REQUEST => Some("Bad Request"),
        FORBIDDEN => Some("Forbidden"),
        NOT_FOUND => Some("Not Found"),
        _ => None,
    }
}

/// Page served in place of the requested resource for an error status.
pub fn error_page(code: u16) -> Option<&'static str> {
    match code {
        BAD_REQUEST => Some("/400.html"),
        FORBIDDEN => Some("/403.html"),
        NOT_FOUND => Some("/404.html"),
        _ => None,
    }
}

/// Resolves `path` lexically below `root`.
///
/// Returns `None` if a `..` component would climb above the root.
pub fn confine(root: &Path, path: &str) -> Option<PathBuf> {
    let mut resolved = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::ParentDir => {
                if !resolved.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    Some(root.join(resolved))
}

/// Read-only private mapping of a response body file.
///
/// Unmapping is idempotent; the mapping is also released on drop.
#[derive(Debug, Default)]
pub struct MappedFile(Option<Mmap>);

impl MappedFile {
    /// Maps the whole file. Empty files are left unmapped since they can't be mapped.
    pub fn map(file: &File) -> io::Result<Self> {
        if file.metadata()?.len() == 0 {
            return Ok(MappedFile(None));
        }
        // SAFETY: the mapping is copy-on-write and read-only; concurrent truncation of the
        // file by another process is outside of what a static file server guards against.
        let map = unsafe { MmapOptions::new().map_copy_read_only(file)? };
        Ok(MappedFile(Some(map)))
    }

    pub fn as_slice(&self) -> &[u8] { self.0.as_deref().unwrap_or_default() }

    pub fn len(&self) -> usize { self.as_slice().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn is_mapped(&self) -> bool { self.0.is_some() }

    pub fn unmap(&mut self) { self.0 = None; }
}

/// Response for a single request: headers go into the connection write buffer, the body stays
/// in a file mapping until it is sent.
#[derive(Debug)]
pub struct Response {
    code: u16,
    keep_alive: bool,
    path: String,
    root: PathBuf,
    file: MappedFile,
}

impl Default for Response {
    fn default() -> Self {
        Response {
            code: OK,
            keep_alive: false,
            path: none!(),
            root: none!(),
            file: none!(),
        }
    }
}

impl Response {
    pub fn new() -> Self { Response::default() }

    /// Prepares the response for another request, releasing the previous body mapping.
    pub fn init(&mut self, root: &Path, path: &str, keep_alive: bool, code: u16) {
        self.file.unmap();
        self.code = code;
        self.keep_alive = keep_alive;
        self.path = path.to_owned();
        self.root = root.to_path_buf();
    }

    /// Final status code. Known only after [`Response::make_response`].
    pub fn code(&self) -> u16 { self.code }

    /// Path served as the body, which differs from the requested one for error responses.
    pub fn path(&self) -> &str { &self.path }

    pub fn is_keep_alive(&self) -> bool { self.keep_alive }

    /// Mapped body bytes; empty if there is no mapped body.
    pub fn file(&self) -> &[u8] { self.file.as_slice() }

    pub fn file_len(&self) -> usize { self.file.len() }

    pub fn unmap_file(&mut self) { self.file.unmap() }

    /// Writes the status line and the headers into `buf`, mapping the body file.
    pub fn make_response(&mut self, buf: &mut Buffer) {
        self.code = self.resolve_code();
        if let Some(page) = error_page(self.code) {
            self.path = page.to_owned();
        }

        self.add_status_line(buf);
        self.add_headers(buf);
        self.add_content(buf);

        #[cfg(feature = "log")]
        log::trace!(target: "http", "Response {} for {} with {} body bytes", self.code, self.path, self.file.len());
    }

    /// Writes a complete inline HTML body describing the failure.
    pub fn error_content(&self, buf: &mut Buffer, message: &str) {
        let status = status_text(self.code).unwrap_or("Bad Request");
        let body = format!(
            "<html><title>Error</title><body bgcolor=\"ffffff\">{} : {status}\n<p>{message}</p><hr><em>httpd</em></body></html>",
            self.code
        );
        // Writing into a buffer never fails
        let _ = write!(buf, "Content-length: {}\r\n\r\n{body}", body.len());
    }

    fn resolve_code(&self) -> u16 {
        if status_text(self.code).is_none() {
            return BAD_REQUEST;
        }
        if error_page(self.code).is_some() {
            return self.code;
        }
        let Some(target) = confine(&self.root, &self.path) else {
            #[cfg(feature = "log")]
            log::warn!(target: "http", "Request for {} escapes the resource root", self.path);
            return FORBIDDEN;
        };
        match fs::metadata(target) {
            Err(_) => NOT_FOUND,
            Ok(meta) if meta.is_dir() => NOT_FOUND,
            Ok(meta) if meta.permissions().mode() & WORLD_READABLE == 0 => FORBIDDEN,
            Ok(_) => self.code,
        }
    }

    fn add_status_line(&self, buf: &mut Buffer) {
        let status = status_text(self.code).unwrap_or("Bad Request");
        let _ = write!(buf, "HTTP/1.1 {} {status}\r\n", self.code);
    }

    fn add_headers(&self, buf: &mut Buffer) {
        if self.keep_alive {
            let _ = write!(buf, "Connection: keep-alive\r\nkeep-alive: {KEEP_ALIVE_PARAMS}\r\n");
        } else {
            buf.append(b"Connection: close\r\n");
        }
        let _ = write!(buf, "Content-type: {}\r\n", mime::content_type(&self.path));
    }

    fn add_content(&mut self, buf: &mut Buffer) {
        let mapped = confine(&self.root, &self.path)
            .ok_or_else(|| io::Error::from(io::ErrorKind::PermissionDenied))
            .and_then(File::open)
            .and_then(|file| MappedFile::map(&file));
        match mapped {
            Ok(file) => {
                self.file = file;
                let _ = write!(buf, "Content-length: {}\r\n\r\n", self.file.len());
            }
            Err(_err) => {
                #[cfg(feature = "log")]
                log::debug!(target: "http", "Unable to map {}: {_err}", self.path);
                self.error_content(buf, "File NotFound!");
            }
        }
    }
}
