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

//! Encoding and decoding of the 64-bit pointer word. The two low bits select
//! the variant; the offset field of struct and list pointers is a 30-bit
//! signed word count measured from the end of the pointer itself.

use crate::message::SegmentId;
use crate::private::units::{ElementCount32, WirePointerCount16, WordCount16, WordCount32};
use crate::{Error, Result};

pub use self::ElementSize::{
    Bit, Byte, EightBytes, FourBytes, InlineComposite, Pointer as PointerElement, TwoBytes, Void,
};

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementSize {
    Void = 0,
    Bit = 1,
    Byte = 2,
    TwoBytes = 3,
    FourBytes = 4,
    EightBytes = 5,
    Pointer = 6,
    InlineComposite = 7,
}

impl ElementSize {
    fn from(val: u8) -> Self {
        match val {
            0 => Self::Void,
            1 => Self::Bit,
            2 => Self::Byte,
            3 => Self::TwoBytes,
            4 => Self::FourBytes,
            5 => Self::EightBytes,
            6 => Self::Pointer,
            7 => Self::InlineComposite,
            _ => panic!("illegal element size: {val}"),
        }
    }

    /// Bits of data per element. Zero for `Pointer` and `InlineComposite`,
    /// whose sizing is handled separately.
    pub fn data_bits_per_element(self) -> u32 {
        match self {
            Self::Void => 0,
            Self::Bit => 1,
            Self::Byte => 8,
            Self::TwoBytes => 16,
            Self::FourBytes => 32,
            Self::EightBytes => 64,
            Self::Pointer => 0,
            Self::InlineComposite => 0,
        }
    }
}

/// The data and pointer section sizes of a struct, in words.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StructSize {
    pub data: WordCount16,
    pub pointers: WirePointerCount16,
}

impl StructSize {
    pub fn new(data: WordCount16, pointers: WirePointerCount16) -> Self {
        Self { data, pointers }
    }

    pub fn total(&self) -> WordCount32 {
        u32::from(self.data) + u32::from(self.pointers)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StructPointer {
    /// Signed word offset from immediately after the pointer word.
    pub offset: i32,
    pub data_size: WordCount16,
    pub pointer_count: WirePointerCount16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListPointer {
    pub offset: i32,
    pub element_size: ElementSize,
    /// Element count, except for `InlineComposite` where it carries the
    /// total word count of the payload (the tag word not included).
    pub element_count: ElementCount32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FarPointer {
    pub double_landing_pad: bool,
    /// Unsigned word offset within the target segment.
    pub offset: WordCount32,
    pub segment_id: SegmentId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pointer {
    Null,
    Struct(StructPointer),
    List(ListPointer),
    Far(FarPointer),
}

impl Pointer {
    pub fn decode(word: u64) -> Result<Self> {
        if word == 0 {
            return Ok(Self::Null);
        }
        let lower32 = word as u32;
        match lower32 & 3 {
            0 => Ok(Self::Struct(StructPointer {
                offset: (lower32 as i32) >> 2,
                data_size: (word >> 32) as WordCount16,
                pointer_count: (word >> 48) as WirePointerCount16,
            })),
            1 => Ok(Self::List(ListPointer {
                offset: (lower32 as i32) >> 2,
                element_size: ElementSize::from(((word >> 32) & 7) as u8),
                element_count: ((word >> 35) & ((1 << 29) - 1)) as ElementCount32,
            })),
            2 => Ok(Self::Far(FarPointer {
                double_landing_pad: lower32 & 4 != 0,
                offset: lower32 >> 3,
                segment_id: (word >> 32) as SegmentId,
            })),
            _ => Err(Error::invalid_message(
                "unknown pointer type: capability pointers are not supported",
            )),
        }
    }

    pub fn encode(&self) -> u64 {
        match *self {
            Self::Null => 0,
            Self::Struct(StructPointer {
                offset,
                data_size,
                pointer_count,
            }) => {
                debug_assert!((-(1 << 29)..1 << 29).contains(&offset));
                u64::from((offset as u32) << 2)
                    | (u64::from(data_size) << 32)
                    | (u64::from(pointer_count) << 48)
            }
            Self::List(ListPointer {
                offset,
                element_size,
                element_count,
            }) => {
                debug_assert!((-(1 << 29)..1 << 29).contains(&offset));
                assert!(
                    element_count < (1 << 29),
                    "lists are limited to 2**29 elements"
                );
                u64::from(((offset as u32) << 2) | 1)
                    | (u64::from(element_size as u8) << 32)
                    | (u64::from(element_count) << 35)
            }
            Self::Far(FarPointer {
                double_landing_pad,
                offset,
                segment_id,
            }) => {
                assert!(offset < (1 << 29), "far pointer offset does not fit");
                u64::from((offset << 3) | (u32::from(double_landing_pad) << 2) | 2)
                    | (u64::from(segment_id) << 32)
            }
        }
    }
}
