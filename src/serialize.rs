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

//! Reading and writing of messages using the
//! [standard stream framing](https://capnproto.org/encoding.html#serialization-over-a-stream),
//! where each message is preceded by a segment table indicating the size of
//! its segments.

use std::io::{Read, Write};

use byteorder::{ByteOrder, LittleEndian};

use crate::message::{Capability, Message, ReaderOptions};
use crate::private::units::BYTES_PER_WORD;
use crate::{message, Error, Result};

pub const SEGMENTS_COUNT_LIMIT: usize = 512;

/// Reads a serialized message from a stream with the provided options.
///
/// For optimal performance, `read` should be a buffered reader type.
pub fn read_message<R>(read: &mut R, options: ReaderOptions) -> Result<message::Reader>
where
    R: Read,
{
    match try_read_message(read, options)? {
        Some(message) => Ok(message),
        None => Err(Error::invalid_message("premature end of file")),
    }
}

/// Like `read_message()`, but returns `None` instead of an error if there are
/// zero bytes left in `read`. This is useful for reading a stream containing
/// an unknown number of messages.
pub fn try_read_message<R>(read: &mut R, options: ReaderOptions) -> Result<Option<message::Reader>>
where
    R: Read,
{
    let Some(segment_lengths) = read_segment_table(read, options)? else {
        return Ok(None);
    };
    Ok(Some(read_segments(read, &segment_lengths, options)?))
}

/// Reads a segment table from `read` and returns the length of each segment
/// in words. `None` means a clean EOF on the message boundary.
///
/// The segment table format for streams is defined in the Cap'n Proto
/// [encoding spec](https://capnproto.org/encoding.html).
fn read_segment_table<R>(read: &mut R, options: ReaderOptions) -> Result<Option<Vec<usize>>>
where
    R: Read,
{
    // The first word holds the segment count and the first segment's length.
    let mut buf: [u8; 8] = [0; 8];
    {
        let n = read.read(&mut buf[..])?;
        if n == 0 {
            return Ok(None);
        } else if n < 8 {
            read.read_exact(&mut buf[n..])?;
        }
    }

    let segment_count = LittleEndian::read_u32(&buf[0..4]).wrapping_add(1) as usize;
    if segment_count >= SEGMENTS_COUNT_LIMIT || segment_count == 0 {
        return Err(Error::invalid_message(format!(
            "invalid number of segments: {segment_count}"
        )));
    }

    let mut segment_lengths = Vec::with_capacity(segment_count);
    segment_lengths.push(LittleEndian::read_u32(&buf[4..8]) as usize);

    if segment_count > 1 {
        // The remaining lengths and the optional padding slot, in one read,
        // so that a packed source never sees a read ending inside a run.
        let mut rest = vec![0u8; (segment_count / 2) * BYTES_PER_WORD];
        read.read_exact(&mut rest[..])?;
        for idx in 0..segment_count - 1 {
            segment_lengths.push(LittleEndian::read_u32(&rest[idx * 4..(idx + 1) * 4]) as usize);
        }
    }

    // Refuse tables whose total exceeds the traversal limit. Without this
    // check, a malicious client could transmit a very large segment size to
    // make the receiver allocate excessive space.
    let total_words: usize = segment_lengths.iter().sum();
    if total_words as u64 > options.traversal_limit_in_words {
        return Err(Error::invalid_message(format!(
            "message is too large: {total_words} words"
        )));
    }

    Ok(Some(segment_lengths))
}

/// Reads the segment payloads in a single contiguous read, then splits them.
fn read_segments<R>(
    read: &mut R,
    segment_lengths: &[usize],
    options: ReaderOptions,
) -> Result<message::Reader>
where
    R: Read,
{
    let total_words: usize = segment_lengths.iter().sum();
    let mut owned_space = vec![0u8; total_words * BYTES_PER_WORD];
    read.read_exact(&mut owned_space[..])?;

    let mut segments = Vec::with_capacity(segment_lengths.len());
    let mut offset = 0;
    for length in segment_lengths {
        let nbytes = length * BYTES_PER_WORD;
        segments.push(owned_space[offset..offset + nbytes].to_vec());
        offset += nbytes;
    }
    message::Reader::new(segments, options)
}

/// Reads a complete message from a flat byte buffer.
pub fn read_message_from_bytes(bytes: &[u8], options: ReaderOptions) -> Result<message::Reader> {
    read_message(&mut &bytes[..], options)
}

/// Writes the provided message to `write`, segment table first.
///
/// For optimal performance, `write` should be a buffered writer. `flush` is
/// not called.
pub fn write_message<W, C>(write: &mut W, message: &Message<C>) -> Result<()>
where
    W: Write,
    C: Capability,
{
    let segments = message.get_segments_for_output();
    write_segment_table(write, &segments)?;
    write_segments(write, &segments)
}

/// Constructs a flat vector containing the entire message, including the
/// segment table.
pub fn write_message_to_bytes<C>(message: &Message<C>) -> Result<Vec<u8>>
where
    C: Capability,
{
    let mut bytes = Vec::new();
    write_message(&mut bytes, message)?;
    Ok(bytes)
}

/// Writes a segment table, one word per `write_all` call so that a packing
/// sink never produces a run spanning the first word.
///
/// `segments` must contain at least one segment.
fn write_segment_table<W>(write: &mut W, segments: &[&[u8]]) -> Result<()>
where
    W: Write,
{
    let mut buf: [u8; 8] = [0; 8];
    let segment_count = segments.len();

    LittleEndian::write_u32(&mut buf[0..4], segment_count as u32 - 1);
    LittleEndian::write_u32(&mut buf[4..8], (segments[0].len() / BYTES_PER_WORD) as u32);
    write.write_all(&buf)?;

    if segment_count > 1 {
        for i in 1..(segment_count + 1) / 2 {
            LittleEndian::write_u32(
                &mut buf[0..4],
                (segments[i * 2 - 1].len() / BYTES_PER_WORD) as u32,
            );
            LittleEndian::write_u32(
                &mut buf[4..8],
                (segments[i * 2].len() / BYTES_PER_WORD) as u32,
            );
            write.write_all(&buf)?;
        }
        if segment_count % 2 == 0 {
            // The final length plus four bytes of padding, so that the
            // payload starts on a word boundary.
            LittleEndian::write_u32(
                &mut buf[0..4],
                (segments[segment_count - 1].len() / BYTES_PER_WORD) as u32,
            );
            buf[4..8].fill(0);
            write.write_all(&buf)?;
        }
    }
    Ok(())
}

fn write_segments<W>(write: &mut W, segments: &[&[u8]]) -> Result<()>
where
    W: Write,
{
    for segment in segments {
        write.write_all(segment)?;
    }
    Ok(())
}

/// The size of the framed message, in words: the segment table plus every
/// segment's live data.
pub fn compute_serialized_size_in_words<C>(message: &Message<C>) -> usize
where
    C: Capability,
{
    let segments = message.get_segments_for_output();
    let mut size = segments.len() / 2 + 1;
    for segment in &segments {
        size += segment.len() / BYTES_PER_WORD;
    }
    size
}
