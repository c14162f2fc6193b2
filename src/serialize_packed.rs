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
//! [packed stream encoding](https://capnproto.org/encoding.html#packing),
//! which compresses zero bytes at word granularity.

use std::io::{self, BufRead, Read, Write};

use crate::message::{Capability, Message, ReaderOptions};
use crate::{message, serialize, Result};

/// A reader that unpacks packed data. Every `read()` must be a whole number
/// of words and must not end inside an all-zero (tag `0x00`) or uncompressed
/// (tag `0xff`) run; the reads issued by `serialize::read_message()` mirror
/// the writes of `write_message()` and always span such runs.
struct PackedRead<R>
where
    R: BufRead,
{
    inner: R,
}

impl<R> PackedRead<R>
where
    R: BufRead,
{
    /// `None` on a clean end of input.
    fn read_byte_or_eof(&mut self) -> io::Result<Option<u8>> {
        let buf = self.inner.fill_buf()?;
        let Some(&byte) = buf.first() else {
            return Ok(None);
        };
        self.inner.consume(1);
        Ok(Some(byte))
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        self.read_byte_or_eof()?.ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "premature end of packed input")
        })
    }
}

impl<R> Read for PackedRead<R>
where
    R: BufRead,
{
    fn read(&mut self, out_buf: &mut [u8]) -> io::Result<usize> {
        let len = out_buf.len();
        if len == 0 {
            return Ok(0);
        }
        assert!(len % 8 == 0, "packed reads must be word-aligned");

        let mut written = 0;
        while written < len {
            let Some(tag) = self.read_byte_or_eof()? else {
                // Clean EOF on a word boundary; a short count makes the
                // caller's read_exact report the truncation.
                return Ok(written);
            };

            for bit in 0..8 {
                out_buf[written + bit] = if tag & (1 << bit) != 0 {
                    self.read_byte()?
                } else {
                    0
                };
            }
            written += 8;

            if tag == 0 {
                // Followed by a count of additional all-zero words.
                let run = self.read_byte()? as usize * 8;
                if run > len - written {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "packed input did not end cleanly on a segment boundary",
                    ));
                }
                out_buf[written..written + run].fill(0);
                written += run;
            } else if tag == 0xff {
                // Followed by a count of words to copy verbatim.
                let run = self.read_byte()? as usize * 8;
                if run > len - written {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "packed input did not end cleanly on a segment boundary",
                    ));
                }
                self.inner.read_exact(&mut out_buf[written..written + run])?;
                written += run;
            }
        }
        Ok(written)
    }
}

struct PackedWrite<W>
where
    W: Write,
{
    inner: W,
}

impl<W> Write for PackedWrite<W>
where
    W: Write,
{
    fn write(&mut self, in_buf: &[u8]) -> io::Result<usize> {
        assert!(in_buf.len() % 8 == 0, "packed writes must be word-aligned");
        let word_count = in_buf.len() / 8;
        let word = |index: usize| &in_buf[index * 8..index * 8 + 8];

        let mut out: Vec<u8> = Vec::with_capacity(in_buf.len() + word_count / 4 + 8);
        let mut index = 0;
        while index < word_count {
            let this_word = word(index);
            index += 1;

            let mut tag = 0u8;
            let tag_pos = out.len();
            out.push(0);
            for (bit, &byte) in this_word.iter().enumerate() {
                if byte != 0 {
                    tag |= 1 << bit;
                    out.push(byte);
                }
            }
            out[tag_pos] = tag;

            if tag == 0 {
                // An all-zero word is followed by a count of consecutive
                // zero words (not including the first one).
                let run_start = index;
                while index < word_count
                    && index - run_start < 255
                    && word(index) == [0u8; 8]
                {
                    index += 1;
                }
                out.push((index - run_start) as u8);
            } else if tag == 0xff {
                // An all-nonzero word is followed by a count of consecutive
                // uncompressed words, then those words verbatim. The run ends
                // at the first word with two or more zero bytes, the point
                // where the tag scheme becomes a net win again.
                let run_start = index;
                while index < word_count && index - run_start < 255 {
                    let zeros = word(index).iter().filter(|&&byte| byte == 0).count();
                    if zeros >= 2 {
                        break;
                    }
                    index += 1;
                }
                out.push((index - run_start) as u8);
                out.extend_from_slice(&in_buf[run_start * 8..index * 8]);
            }
        }

        self.inner.write_all(&out)?;
        Ok(in_buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reads a packed message from a stream using the provided options.
pub fn read_message<R>(read: R, options: ReaderOptions) -> Result<message::Reader>
where
    R: BufRead,
{
    let mut packed_read = PackedRead { inner: read };
    serialize::read_message(&mut packed_read, options)
}

/// Like `read_message()`, but returns `None` instead of an error if there are
/// zero bytes left in `read`.
pub fn try_read_message<R>(read: R, options: ReaderOptions) -> Result<Option<message::Reader>>
where
    R: BufRead,
{
    let mut packed_read = PackedRead { inner: read };
    serialize::try_read_message(&mut packed_read, options)
}

/// Writes a packed message to a stream.
pub fn write_message<W, C>(write: &mut W, message: &Message<C>) -> Result<()>
where
    W: Write,
    C: Capability,
{
    let mut packed_write = PackedWrite { inner: write };
    serialize::write_message(&mut packed_write, message)
}

/// Packs a message into a flat vector, segment table included.
pub fn write_message_to_bytes<C>(message: &Message<C>) -> Result<Vec<u8>>
where
    C: Capability,
{
    let mut bytes = Vec::new();
    write_message(&mut bytes, message)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use quickcheck::{quickcheck, TestResult};

    use super::{read_message, PackedRead, PackedWrite};
    use crate::message::ReaderOptions;
    use crate::serialize::test::write_message_segments;

    #[test]
    fn premature_eof() {
        let input_bytes: &[u8] = &[];
        let mut packed_read = PackedRead { inner: input_bytes };

        let mut output_bytes: Vec<u8> = vec![0; 8];
        assert!(packed_read.read_exact(&mut output_bytes[..]).is_err());
    }

    fn check_unpacks_to(packed: &[u8], unpacked: &[u8]) {
        let mut packed_read = PackedRead { inner: packed };

        let mut bytes: Vec<u8> = vec![0; unpacked.len()];
        packed_read.read_exact(&mut bytes[..]).unwrap();

        assert!(packed_read.inner.is_empty()); // nothing left to read
        assert_eq!(bytes, unpacked);
    }

    fn check_packing(unpacked: &[u8], packed: &[u8]) {
        // write
        let mut bytes: Vec<u8> = Vec::new();
        {
            let mut packed_write = PackedWrite { inner: &mut bytes };
            packed_write.write_all(unpacked).unwrap();
        }
        assert_eq!(bytes, packed);

        // read
        check_unpacks_to(packed, unpacked);
    }

    #[test]
    fn simple_packing() {
        check_packing(&[], &[]);
        check_packing(&[0; 8], &[0, 0]);
        check_packing(
            &[1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            &[0x01, 1, 0, 0],
        );
        check_packing(&[0, 0, 12, 0, 0, 34, 0, 0], &[0x24, 12, 34]);
        check_packing(
            &[1, 3, 2, 4, 5, 7, 6, 8],
            &[0xff, 1, 3, 2, 4, 5, 7, 6, 8, 0],
        );
        check_packing(
            &[0, 0, 0, 0, 0, 0, 0, 0, 1, 3, 2, 4, 5, 7, 6, 8],
            &[0, 0, 0xff, 1, 3, 2, 4, 5, 7, 6, 8, 0],
        );
        check_packing(
            &[0, 0, 12, 0, 0, 34, 0, 0, 1, 3, 2, 4, 5, 7, 6, 8],
            &[0x24, 12, 34, 0xff, 1, 3, 2, 4, 5, 7, 6, 8, 0],
        );
        check_packing(
            &[1, 3, 2, 4, 5, 7, 6, 8, 8, 6, 7, 4, 5, 2, 3, 1],
            &[0xff, 1, 3, 2, 4, 5, 7, 6, 8, 1, 8, 6, 7, 4, 5, 2, 3, 1],
        );

        check_packing(
            &[
                1, 2, 3, 4, 5, 6, 7, 8, 1, 2, 3, 4, 5, 6, 7, 8, 1, 2, 3, 4, 5, 6, 7, 8, 1, 2, 3,
                4, 5, 6, 7, 8, 0, 2, 4, 0, 9, 0, 5, 1,
            ],
            &[
                0xff, 1, 2, 3, 4, 5, 6, 7, 8, 3, 1, 2, 3, 4, 5, 6, 7, 8, 1, 2, 3, 4, 5, 6, 7, 8,
                1, 2, 3, 4, 5, 6, 7, 8, 0xd6, 2, 4, 9, 5, 1,
            ],
        );
        check_packing(
            &[
                1, 2, 3, 4, 5, 6, 7, 8, 1, 2, 3, 4, 5, 6, 7, 8, 6, 2, 4, 3, 9, 0, 5, 1, 1, 2, 3,
                4, 5, 6, 7, 8, 0, 2, 4, 0, 9, 0, 5, 1,
            ],
            &[
                0xff, 1, 2, 3, 4, 5, 6, 7, 8, 3, 1, 2, 3, 4, 5, 6, 7, 8, 6, 2, 4, 3, 9, 0, 5, 1,
                1, 2, 3, 4, 5, 6, 7, 8, 0xd6, 2, 4, 9, 5, 1,
            ],
        );

        check_packing(
            &[
                8, 0, 100, 6, 0, 1, 1, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
                0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 2, 0, 3, 1,
            ],
            &[0xed, 8, 100, 6, 1, 1, 2, 0, 2, 0xd4, 1, 2, 3, 1],
        );

        check_packing(&[0; 16], &[0, 1]);
        check_packing(
            &[
                0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
            ],
            &[0, 2],
        );
    }

    #[test]
    fn long_zero_run_is_capped_at_255() {
        // 256 zero words, then one word of all ones: the run count byte
        // saturates at 255 subsequent words.
        let mut unpacked = vec![0u8; 256 * 8];
        unpacked.extend([0xff; 8]);

        let mut expected = vec![0x00, 0xff];
        expected.extend([0xff; 9]);
        expected.push(0x00);

        check_packing(&unpacked, &expected);
    }

    #[test]
    fn did_not_end_cleanly_on_a_segment_boundary() {
        let packed = &[0xff, 1, 2, 3, 4, 5, 6, 7, 8, 37, 1, 2];
        let mut packed_read = PackedRead { inner: &packed[..] };

        let mut bytes: Vec<u8> = vec![0; 200];
        match packed_read.read_exact(&mut bytes[..]) {
            Ok(_) => panic!("should have been an error"),
            Err(e) => {
                assert!(e.to_string().contains("did not end cleanly"));
            }
        }
    }

    #[test]
    fn premature_end_of_packed_input() {
        fn helper(packed: &[u8]) {
            let mut packed_read = PackedRead { inner: packed };

            let mut bytes: Vec<u8> = vec![0; 200];
            assert!(packed_read.read_exact(&mut bytes[..]).is_err());
        }

        helper(&[0xf0, 1, 2]);
        helper(&[0]);
        helper(&[0xff, 1, 2, 3, 4, 5, 6, 7, 8]);

        // Here the unpacked data is simply too short for the output buffer.
        helper(&[1, 1]);
    }

    #[test]
    fn packed_segment_table() {
        let packed_buf = &[0x11, 4, 1, 0, 1, 0, 0];

        check_unpacks_to(
            packed_buf,
            &[
                4, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
                0, 0, 0, 0, 0,
            ],
        );

        // Reading the packed table word-by-word would end inside the zero
        // run; read_message() must fetch it in bulk.
        read_message(&mut &packed_buf[..], Default::default()).unwrap();
    }

    #[test]
    fn check_round_trip() {
        fn round_trip(segments: Vec<Vec<u64>>) -> TestResult {
            if segments.is_empty() {
                return TestResult::discard();
            }
            let segments: Vec<Vec<u8>> = segments
                .iter()
                .map(|words| words.iter().flat_map(|w| w.to_le_bytes()).collect())
                .collect();
            let mut buf: Vec<u8> = Vec::new();

            write_message_segments(&mut PackedWrite { inner: &mut buf }, &segments);
            let message = read_message(&mut &buf[..], ReaderOptions::new()).unwrap();
            let result_segments = message.get_segments_for_output();

            TestResult::from_bool(
                segments
                    .iter()
                    .enumerate()
                    .all(|(i, segment)| &segment[..] == result_segments[i]),
            )
        }

        quickcheck(round_trip as fn(Vec<Vec<u64>>) -> TestResult);
    }
}
