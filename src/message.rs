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

//! Untyped root container for a Cap'n Proto value: an ordered sequence of
//! segments, tagged at compile time as read-only or read/write.

use std::marker::PhantomData;

use crate::private::layout::{self, StructBuilder, StructReader, StructSize};
use crate::private::read_limiter::ReadLimiter;
use crate::private::units::{round_up_to_words, BYTES_PER_WORD};
use crate::slice::Slice;
use crate::{Error, Result};

pub type SegmentId = u32;

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::ReadOnly {}
    impl Sealed for super::ReadWrite {}
}

/// The capability tag: a phantom parameter of every storage-bearing type.
///
/// Read operations are available for any capability; mutating operations are
/// implemented only for [`ReadWrite`], so writing through a read-only message
/// is a type error rather than a runtime check.
pub trait Capability: sealed::Sealed + 'static {}

/// Marker for messages whose storage is immutable after construction.
pub enum ReadOnly {}

/// Marker for messages that own mutable storage and an allocation cursor.
pub enum ReadWrite {}

impl Capability for ReadOnly {}
impl Capability for ReadWrite {}

/// Options controlling how data is read.
#[derive(Clone, Copy, Debug)]
pub struct ReaderOptions {
    /// Limits how many total words of data are allowed to be traversed.
    /// Traversal is counted every time a struct or list storage descriptor is
    /// resolved, so dereferencing the same sub-object repeatedly counts it
    /// repeatedly. Once the limit is spent, further accesses report an error.
    ///
    /// This limit exists for security reasons. It is possible to construct a
    /// message in which multiple pointers point at the same location; such a
    /// message, small on the wire, could otherwise be re-traversed without
    /// bound, exhausting server resources. The limit is also applied to a
    /// segment table's declared total before segments are accepted, which
    /// bounds up-front allocation.
    pub traversal_limit_in_words: u64,
}

pub const DEFAULT_READER_OPTIONS: ReaderOptions = ReaderOptions {
    traversal_limit_in_words: 8 * 1024 * 1024,
};

impl Default for ReaderOptions {
    fn default() -> Self {
        DEFAULT_READER_OPTIONS
    }
}

impl ReaderOptions {
    pub fn new() -> Self {
        DEFAULT_READER_OPTIONS
    }

    pub fn traversal_limit_in_words(&mut self, value: u64) -> &mut Self {
        self.traversal_limit_in_words = value;
        self
    }
}

#[derive(Clone, Copy, Debug)]
pub enum AllocationStrategy {
    FixedSize,
    GrowHeuristically,
}

pub const SUGGESTED_FIRST_SEGMENT_WORDS: u32 = 1024;
pub const SUGGESTED_ALLOCATION_STRATEGY: AllocationStrategy = AllocationStrategy::GrowHeuristically;

/// A contiguous byte buffer within a message. Bytes `[0, used)` hold live
/// data; `[used, bytes.len())` are zeroed reserve. `bytes.len()` and `used`
/// are always multiples of eight.
pub(crate) struct Segment {
    pub(crate) bytes: Vec<u8>,
    pub(crate) used: usize,
}

impl Segment {
    fn from_bytes(bytes: Vec<u8>) -> Self {
        let used = bytes.len();
        Self { bytes, used }
    }

    fn zeroed(nbytes: usize) -> Self {
        Self {
            bytes: vec![0; nbytes],
            used: 0,
        }
    }

    /// Bumps the cursor by `nbytes` rounded up to a word boundary, returning
    /// the byte offset of the allocation, or `None` if there is no room.
    fn try_allocate(&mut self, nbytes: usize) -> Option<usize> {
        let rounded = (nbytes + BYTES_PER_WORD - 1) & !(BYTES_PER_WORD - 1);
        if rounded > self.bytes.len() - self.used {
            None
        } else {
            let start = self.used;
            self.used += rounded;
            Some(start)
        }
    }
}

/// An ordered sequence of segments. Segment 0 always exists and its first
/// eight bytes hold the root pointer.
///
/// `Message<ReadOnly>` (aliased as [`Reader`]) never mutates and may be
/// shared across threads. `Message<ReadWrite>` (aliased as [`Builder`])
/// additionally carries a per-segment bump-allocation cursor; existing
/// segments never move or resize, so storage descriptors stay valid for the
/// life of the message.
pub struct Message<C: Capability> {
    segments: Vec<Segment>,
    next_alloc_words: u32,
    allocation_strategy: AllocationStrategy,
    read_limiter: ReadLimiter,
    _capability: PhantomData<C>,
}

/// A message constructed from immutable bytes.
pub type Reader = Message<ReadOnly>;

/// A message being built.
pub type Builder = Message<ReadWrite>;

fn _assert_kinds() {
    fn _assert_send_sync<T: Send + Sync>() {}
    fn _assert_message_kinds() {
        // Read-only messages have no interior mutability, so sharing them
        // across threads is sound.
        _assert_send_sync::<Reader>();
        _assert_send_sync::<Builder>();
    }
}

impl<C: Capability> Message<C> {
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub(crate) fn segment(&self, id: SegmentId) -> Result<&Segment> {
        self.segments
            .get(id as usize)
            .ok_or_else(|| Error::invalid_message(format!("segment id {id} out of range")))
    }

    /// The live portion of each segment, in order. Suitable for framing.
    pub fn get_segments_for_output(&self) -> Vec<&[u8]> {
        self.segments
            .iter()
            .map(|segment| &segment.bytes[..segment.used])
            .collect()
    }

    pub(crate) fn root_pointer_slice(&self) -> Result<Slice> {
        if self.segment(0)?.used < BYTES_PER_WORD {
            return Err(Error::invalid_message("message contains no root pointer"));
        }
        Ok(Slice::new(0, 0, BYTES_PER_WORD))
    }

    pub(crate) fn read_limiter(&self) -> &ReadLimiter {
        &self.read_limiter
    }
}

impl Reader {
    /// Constructs a read-only message from segment buffers. Each buffer's
    /// length must be a multiple of eight bytes. `options` seeds the
    /// traversal budget that every object access spends from.
    pub fn new(segments: Vec<Vec<u8>>, options: ReaderOptions) -> Result<Self> {
        if segments.is_empty() {
            return Err(Error::invalid_message("message has no segments"));
        }
        for (id, segment) in segments.iter().enumerate() {
            if segment.len() % BYTES_PER_WORD != 0 {
                return Err(Error::invalid_message(format!(
                    "segment {id} is not a whole number of words"
                )));
            }
        }
        Ok(Self {
            segments: segments.into_iter().map(Segment::from_bytes).collect(),
            next_alloc_words: 0,
            allocation_strategy: AllocationStrategy::FixedSize,
            read_limiter: ReadLimiter::new(Some(options.traversal_limit_in_words)),
            _capability: PhantomData,
        })
    }

    /// Gets the root of the message. A null root reads as a struct whose
    /// fields are all default.
    pub fn get_root(&self) -> Result<StructReader<'_, ReadOnly>> {
        let root = self.root_pointer_slice()?;
        let storage = layout::deref_struct_pointer(self, root)?;
        Ok(StructReader::new(self, storage))
    }
}

impl Builder {
    /// Creates an empty message: a single zeroed segment of
    /// `first_segment_words` words with the root pointer slot reserved.
    pub fn new(first_segment_words: u32, allocation_strategy: AllocationStrategy) -> Self {
        let nwords = ::std::cmp::max(first_segment_words, 1);
        let mut segment = Segment::zeroed(nwords as usize * BYTES_PER_WORD);
        segment
            .try_allocate(BYTES_PER_WORD)
            .expect("room for the root pointer");
        Self {
            segments: vec![segment],
            next_alloc_words: nwords,
            allocation_strategy,
            read_limiter: ReadLimiter::new(None),
            _capability: PhantomData,
        }
    }

    pub fn new_default() -> Self {
        Self::new(SUGGESTED_FIRST_SEGMENT_WORDS, SUGGESTED_ALLOCATION_STRATEGY)
    }

    /// Creates a message sized to hold a root struct of the given layout
    /// without spilling (root pointer word included), and initializes the
    /// root. `hint_words` may reserve more.
    pub fn with_root_struct(size: StructSize, hint_words: u32) -> Result<Self> {
        let first_segment_words = ::std::cmp::max(hint_words, size.total() + 1);
        let mut message = Self::new(first_segment_words, SUGGESTED_ALLOCATION_STRATEGY);
        message.init_root(size)?;
        Ok(message)
    }

    /// Initializes the root as a fresh struct of the given size, discarding
    /// any existing root object.
    pub fn init_root(&mut self, size: StructSize) -> Result<StructBuilder<'_>> {
        let root = self.root_pointer_slice()?;
        let storage = layout::alloc_struct_storage(self, size);
        layout::init_struct_pointer(self, root, &storage)?;
        Ok(StructBuilder::new(self, storage))
    }

    /// Gets the root struct, allocating it if the root pointer is null and
    /// upgrading it in place if its physical layout is smaller than `size`.
    pub fn get_root(&mut self, size: StructSize) -> Result<StructBuilder<'_>> {
        let root = self.root_pointer_slice()?;
        let storage = layout::deref_struct_pointer_mut(self, root, size)?;
        Ok(StructBuilder::new(self, storage))
    }

    pub fn get_root_as_reader(&self) -> Result<StructReader<'_, ReadWrite>> {
        let root = self.root_pointer_slice()?;
        let storage = layout::deref_struct_pointer(self, root)?;
        Ok(StructReader::new(self, storage))
    }

    /// Freezes this message, dropping the reserve space of every segment.
    /// The result has no traversal limit; its contents were already paid for
    /// while building.
    pub fn into_reader(self) -> Reader {
        Reader {
            segments: self
                .segments
                .into_iter()
                .map(|mut segment| {
                    segment.bytes.truncate(segment.used);
                    segment
                })
                .collect(),
            next_alloc_words: 0,
            allocation_strategy: AllocationStrategy::FixedSize,
            read_limiter: ReadLimiter::new(None),
            _capability: PhantomData,
        }
    }

    pub(crate) fn segment_mut(&mut self, id: SegmentId) -> Result<&mut Segment> {
        self.segments
            .get_mut(id as usize)
            .ok_or_else(|| Error::invalid_message(format!("segment id {id} out of range")))
    }

    /// Allocates `nbytes` (rounded up to a word boundary) out of the last
    /// segment, appending a fresh segment when the cursor would overflow.
    pub(crate) fn allocate(&mut self, nbytes: usize) -> Slice {
        let last = self.segments.len() - 1;
        if let Some(start) = self.segments[last].try_allocate(nbytes) {
            return Slice::new(last as SegmentId, start, nbytes);
        }

        let nwords = round_up_to_words(nbytes);
        let size_words = ::std::cmp::max(nwords as u32, self.next_alloc_words);
        if let AllocationStrategy::GrowHeuristically = self.allocation_strategy {
            self.next_alloc_words += size_words;
        }
        let mut segment = Segment::zeroed(size_words as usize * BYTES_PER_WORD);
        let start = segment
            .try_allocate(nbytes)
            .expect("fresh segment sized for the allocation");
        self.segments.push(segment);
        Slice::new((self.segments.len() - 1) as SegmentId, start, nbytes)
    }

    /// Allocates only in the given segment; `None` when there is no room.
    pub(crate) fn allocate_in_segment(&mut self, id: SegmentId, nbytes: usize) -> Option<Slice> {
        let segment = self.segments.get_mut(id as usize)?;
        segment
            .try_allocate(nbytes)
            .map(|start| Slice::new(id, start, nbytes))
    }
}
