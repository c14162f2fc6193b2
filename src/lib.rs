// Copyright (c) 2013-2015 Sandstorm Development Group, Inc. and contributors
// Licensed under the MIT License:
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN
// THE SOFTWARE.

//! # Cap'n Proto runtime core
//!
//! Message storage, the pointer encoding, and the reader/builder accessor
//! layer for the [Cap'n Proto](https://capnproto.org) zero-copy wire format.
//! Bytes laid down by this runtime are bit-compatible with any conforming
//! Cap'n Proto implementation; traversal is bounds-checked pointer arithmetic
//! with no separate parse step.
//!
//! Code generated from Cap'n Proto schemas builds on the accessor views in
//! `private::layout` and the typed list views in [`list`]. Messages travel
//! over streams either flat ([`serialize`]) or with zero-run compression
//! ([`serialize_packed`]).

use std::fmt;

pub mod list;
pub mod message;
pub mod serialize;
pub mod serialize_packed;
pub mod slice;

/// Implementation details that generated code depends on. Not covered by
/// semver; do not use directly.
pub mod private;

/// The error type of this crate.
///
/// Every form of structural corruption -- an out-of-bounds slice, a bad
/// pointer type discriminator, a composite-list tag mismatch, a far-pointer
/// chain that is too deep -- surfaces as an `Error` carrying a human-readable
/// reason. Null pointers are not errors; they decode to schema defaults.
/// Capability misuse (writing through a read-only message) is rejected at
/// compile time and never reaches this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub description: String,
}

impl Error {
    pub fn invalid_message<S: Into<String>>(description: S) -> Self {
        Self {
            description: description.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid message: {}", self.description)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::invalid_message(format!("io error: {err}"))
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;
