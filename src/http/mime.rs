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

//! File suffix to MIME type mapping.

use std::path::Path;

/// Content type served for unknown suffixes.
pub const DEFAULT_TYPE: &str = "application/octet-stream";

const SUFFIX_TYPES: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("xml", "text/xml"),
    ("xhtml", "application/xhtml+xml"),
    ("txt", "text/plain"),
    ("rtf", "application/rtf"),
    ("pdf", "application/pdf"),
    ("word", "application/msword"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("au", "audio/basic"),
    ("mpeg", "video/mpeg"),
    ("mpg", "video/mpeg"),
    ("avi", "video/x-msvideo"),
    ("mp4", "video/mp4"),
    ("gz", "application/x-gzip"),
    ("tar", "application/x-tar"),
    ("css", "text/css"),
    ("js", "text/javascript"),
    ("ico", "image/x-icon"),
];

pub fn content_type(path: impl AsRef<Path>) -> &'static str {
    let Some(suffix) = path.as_ref().extension().and_then(|ext| ext.to_str()) else {
        return DEFAULT_TYPE;
    };
    SUFFIX_TYPES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(suffix))
        .map(|(_, mime)| *mime)
        .unwrap_or(DEFAULT_TYPE)
}
