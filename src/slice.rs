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

//! Bounds-checked windows onto message storage, with little-endian integer
//! accessors. A [`Slice`] does not borrow; every accessor takes the owning
//! message by reference, so the borrow checker enforces the exclusivity rules
//! of the capability model.

use byteorder::{ByteOrder, LittleEndian};

use crate::message::{Builder, Capability, Message, ReadWrite, SegmentId};
use crate::{Error, Result};

/// A byte range within one segment of a message: `start + len` never exceeds
/// the segment's live length. Slices are cheap to copy and own nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slice {
    pub segment_id: SegmentId,
    pub start: usize,
    pub len: usize,
}

macro_rules! get_impl {
    ($name:ident, $typ:ty, $width:expr, $read:expr) => {
        #[inline]
        pub fn $name<C: Capability>(&self, message: &Message<C>, offset: usize) -> Result<$typ> {
            let bytes = self.bytes(message, offset, $width)?;
            Ok($read(bytes))
        }
    };
}

macro_rules! set_impl {
    ($name:ident, $typ:ty, $width:expr, $write:expr) => {
        #[inline]
        pub fn $name(
            &self,
            message: &mut Message<ReadWrite>,
            offset: usize,
            value: $typ,
        ) -> Result<()> {
            let bytes = self.bytes_mut(message, offset, $width)?;
            $write(bytes, value);
            Ok(())
        }
    };
}

impl Slice {
    pub fn new(segment_id: SegmentId, start: usize, len: usize) -> Self {
        Self {
            segment_id,
            start,
            len,
        }
    }

    /// A sub-window of this slice. Bounds are validated lazily, by the
    /// accessors of the result.
    #[inline]
    pub fn sub(&self, offset: usize, len: usize) -> Self {
        Self {
            segment_id: self.segment_id,
            start: self.start + offset,
            len,
        }
    }

    fn out_of_bounds(&self) -> Error {
        Error::invalid_message(format!(
            "access out of bounds: segment {} [{}, {})",
            self.segment_id,
            self.start,
            self.start + self.len
        ))
    }

    #[inline]
    fn bytes<'a, C: Capability>(
        &self,
        message: &'a Message<C>,
        offset: usize,
        width: usize,
    ) -> Result<&'a [u8]> {
        if offset + width > self.len {
            return Err(self.out_of_bounds());
        }
        let segment = message.segment(self.segment_id)?;
        let begin = self.start + offset;
        if begin + width > segment.used {
            return Err(self.out_of_bounds());
        }
        Ok(&segment.bytes[begin..begin + width])
    }

    #[inline]
    fn bytes_mut<'a>(
        &self,
        message: &'a mut Builder,
        offset: usize,
        width: usize,
    ) -> Result<&'a mut [u8]> {
        if offset + width > self.len {
            return Err(self.out_of_bounds());
        }
        let segment = message.segment_mut(self.segment_id)?;
        let begin = self.start + offset;
        if begin + width > segment.used {
            return Err(self.out_of_bounds());
        }
        Ok(&mut segment.bytes[begin..begin + width])
    }

    get_impl!(get_u8, u8, 1, |b: &[u8]| b[0]);
    get_impl!(get_u16, u16, 2, LittleEndian::read_u16);
    get_impl!(get_u32, u32, 4, LittleEndian::read_u32);
    get_impl!(get_u64, u64, 8, LittleEndian::read_u64);
    get_impl!(get_i8, i8, 1, |b: &[u8]| b[0] as i8);
    get_impl!(get_i16, i16, 2, LittleEndian::read_i16);
    get_impl!(get_i32, i32, 4, LittleEndian::read_i32);
    get_impl!(get_i64, i64, 8, LittleEndian::read_i64);

    set_impl!(set_u8, u8, 1, |b: &mut [u8], v| b[0] = v);
    set_impl!(set_u16, u16, 2, LittleEndian::write_u16);
    set_impl!(set_u32, u32, 4, LittleEndian::write_u32);
    set_impl!(set_u64, u64, 8, LittleEndian::write_u64);
    set_impl!(set_i8, i8, 1, |b: &mut [u8], v| b[0] = v as u8);
    set_impl!(set_i16, i16, 2, LittleEndian::write_i16);
    set_impl!(set_i32, i32, 4, LittleEndian::write_i32);
    set_impl!(set_i64, i64, 8, LittleEndian::write_i64);

    /// Copies `len` bytes out of this slice into a fresh vector.
    pub fn to_bytes<C: Capability>(
        &self,
        message: &Message<C>,
        offset: usize,
        len: usize,
    ) -> Result<Vec<u8>> {
        Ok(self.bytes(message, offset, len)?.to_vec())
    }

    /// Overwrites `value.len()` bytes starting at `offset`.
    pub fn copy_from(
        &self,
        message: &mut Builder,
        offset: usize,
        value: &[u8],
    ) -> Result<()> {
        self.bytes_mut(message, offset, value.len())?
            .copy_from_slice(value);
        Ok(())
    }

    /// Zeroes `len` bytes starting at `offset`.
    pub fn zero(&self, message: &mut Builder, offset: usize, len: usize) -> Result<()> {
        self.bytes_mut(message, offset, len)?.fill(0);
        Ok(())
    }

    /// Copies `len` bytes from `src` to `dst` within one message. The ranges
    /// must not overlap.
    pub fn blit(
        message: &mut Builder,
        src: Slice,
        src_offset: usize,
        dst: Slice,
        dst_offset: usize,
        len: usize,
    ) -> Result<()> {
        let bytes = src.to_bytes(message, src_offset, len)?;
        dst.copy_from(message, dst_offset, &bytes)
    }

    /// Bump-allocates `nbytes` in the message, spilling to a fresh segment
    /// when the last segment is full.
    pub fn alloc(message: &mut Builder, nbytes: usize) -> Slice {
        message.allocate(nbytes)
    }

    /// Bump-allocates only in the given segment; `None` when there is no
    /// room. Used to decide between single and double far landing pads.
    pub fn alloc_in_segment(
        message: &mut Builder,
        segment_id: SegmentId,
        nbytes: usize,
    ) -> Option<Slice> {
        message.allocate_in_segment(segment_id, nbytes)
    }
}
