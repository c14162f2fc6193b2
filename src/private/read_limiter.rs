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

use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Error, Result};

/// A shrinking budget of words that may be traversed, charged every time an
/// object descriptor is resolved. This is what bounds amplification attacks:
/// a small message whose pointers repeatedly reference the same bytes still
/// spends the budget on every re-traversal.
pub struct ReadLimiter {
    limit: AtomicU64,
    error_on_limit_exceeded: bool,
}

impl ReadLimiter {
    /// `None` means unlimited, for builders and builder-derived readers.
    pub fn new(limit: Option<u64>) -> Self {
        match limit {
            Some(value) => Self {
                limit: AtomicU64::new(value),
                error_on_limit_exceeded: true,
            },
            None => Self {
                limit: AtomicU64::new(u64::MAX),
                error_on_limit_exceeded: false,
            },
        }
    }

    #[inline]
    pub fn can_read(&self, amount: u64) -> Result<()> {
        // We use separate load() and store() steps, which may result in
        // undercounting reads if multiple threads are reading at the same
        // time. That's okay -- a denial of service attack will eventually
        // hit the limit anyway.
        let current = self.limit.load(Ordering::Relaxed);
        if amount > current && self.error_on_limit_exceeded {
            return Err(Error::invalid_message(
                "read limit exceeded: the message is too deeply or repeatedly traversed",
            ));
        }
        self.limit
            .store(current.wrapping_sub(amount), Ordering::Relaxed);
        Ok(())
    }
}
