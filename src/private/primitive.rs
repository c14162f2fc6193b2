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

//! Scalar field primitives: little-endian load/store through a slice, plus
//! the default-XOR mask. Schema defaults are folded into stored values so
//! that zero-initialized storage decodes to the default; floats mask their
//! raw bit patterns, sidestepping NaN misbehavior.

use crate::message::{Builder, Capability, Message};
use crate::slice::Slice;
use crate::Result;

pub trait PrimitiveField: Copy + Default {
    /// The raw bits XORed against stored values. Identical to `Self` for
    /// integers; the unsigned bit pattern for floats.
    type Mask: Copy;

    const BYTES: usize;

    fn load<C: Capability>(message: &Message<C>, slice: Slice, offset: usize) -> Result<Self>;
    fn store(message: &mut Builder, slice: Slice, offset: usize, value: Self) -> Result<()>;
    fn mask(value: Self, mask: Self::Mask) -> Self;
}

macro_rules! int_field {
    ($typ:ident, $bytes:expr, $get:ident, $set:ident) => {
        impl PrimitiveField for $typ {
            type Mask = $typ;
            const BYTES: usize = $bytes;

            #[inline]
            fn load<C: Capability>(
                message: &Message<C>,
                slice: Slice,
                offset: usize,
            ) -> Result<Self> {
                slice.$get(message, offset)
            }

            #[inline]
            fn store(
                message: &mut Builder,
                slice: Slice,
                offset: usize,
                value: Self,
            ) -> Result<()> {
                slice.$set(message, offset, value)
            }

            #[inline]
            fn mask(value: Self, mask: Self::Mask) -> Self {
                value ^ mask
            }
        }
    };
}

int_field!(u8, 1, get_u8, set_u8);
int_field!(u16, 2, get_u16, set_u16);
int_field!(u32, 4, get_u32, set_u32);
int_field!(u64, 8, get_u64, set_u64);
int_field!(i8, 1, get_i8, set_i8);
int_field!(i16, 2, get_i16, set_i16);
int_field!(i32, 4, get_i32, set_i32);
int_field!(i64, 8, get_i64, set_i64);

impl PrimitiveField for f32 {
    type Mask = u32;
    const BYTES: usize = 4;

    #[inline]
    fn load<C: Capability>(message: &Message<C>, slice: Slice, offset: usize) -> Result<Self> {
        Ok(f32::from_bits(slice.get_u32(message, offset)?))
    }

    #[inline]
    fn store(message: &mut Builder, slice: Slice, offset: usize, value: Self) -> Result<()> {
        slice.set_u32(message, offset, value.to_bits())
    }

    #[inline]
    fn mask(value: Self, mask: u32) -> Self {
        f32::from_bits(value.to_bits() ^ mask)
    }
}

impl PrimitiveField for f64 {
    type Mask = u64;
    const BYTES: usize = 8;

    #[inline]
    fn load<C: Capability>(message: &Message<C>, slice: Slice, offset: usize) -> Result<Self> {
        Ok(f64::from_bits(slice.get_u64(message, offset)?))
    }

    #[inline]
    fn store(message: &mut Builder, slice: Slice, offset: usize, value: Self) -> Result<()> {
        slice.set_u64(message, offset, value.to_bits())
    }

    #[inline]
    fn mask(value: Self, mask: u64) -> Self {
        f64::from_bits(value.to_bits() ^ mask)
    }
}
