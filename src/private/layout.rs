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

//! Object layout: dereferencing pointers into struct and list storage
//! descriptors, builder-side allocation and struct upgrade, far-pointer
//! landing pads, and the accessor views that generated code builds on.

use crate::message::{Builder, Capability, Message, ReadWrite, SegmentId};
use crate::private::pointer::{FarPointer, ListPointer, Pointer, StructPointer};
use crate::private::primitive::PrimitiveField;
use crate::private::units::{round_bits_up_to_bytes, ElementCount32, BYTES_PER_WORD};
use crate::slice::Slice;
use crate::{Error, Result};

pub use crate::private::pointer::{ElementSize, StructSize};

/// Well-formed messages never chain more than one far hop before landing.
const FAR_POINTER_DEPTH_LIMIT: u8 = 2;

/// Guards the deep-copy recursion against maliciously nested messages.
const NESTING_LIMIT: u32 = 64;

/// A struct's storage: the data section and the pointer section immediately
/// following it, in the same segment. Both lengths are word multiples.
///
/// Descriptors are validated against segment bounds when constructed and
/// remain valid for the life of the owning message, but must not be retained
/// across a mutation that may relocate the object (struct upgrade).
#[derive(Clone, Copy, Debug)]
pub struct StructStorage {
    pub data: Slice,
    pub pointers: Slice,
}

impl StructStorage {
    pub fn struct_size(&self) -> StructSize {
        StructSize::new(
            (self.data.len / BYTES_PER_WORD) as u16,
            (self.pointers.len / BYTES_PER_WORD) as u16,
        )
    }

    /// The slice holding the `index`th pointer, or `None` when the physical
    /// pointer section is too small (the field then reads as null).
    pub fn pointer_field(&self, index: u16) -> Option<Slice> {
        let offset = index as usize * BYTES_PER_WORD;
        if offset < self.pointers.len {
            Some(self.pointers.sub(offset, BYTES_PER_WORD))
        } else {
            None
        }
    }
}

/// A list's storage. For `InlineComposite`, `storage` begins with the 8-byte
/// tag word and `struct_size` describes the per-element layout; for every
/// other element size `struct_size` is zero.
#[derive(Clone, Copy, Debug)]
pub struct ListStorage {
    pub storage: Slice,
    pub element_size: ElementSize,
    pub element_count: ElementCount32,
    pub struct_size: StructSize,
}

impl ListStorage {
    /// Storage of element `index` of an inline-composite list.
    pub fn element_struct(&self, index: ElementCount32) -> StructStorage {
        debug_assert!(self.element_size == ElementSize::InlineComposite);
        debug_assert!(index < self.element_count);
        let words = self.struct_size.total() as usize;
        let offset = BYTES_PER_WORD + index as usize * words * BYTES_PER_WORD;
        let data_bytes = self.struct_size.data as usize * BYTES_PER_WORD;
        StructStorage {
            data: self.storage.sub(offset, data_bytes),
            pointers: self.storage.sub(
                offset + data_bytes,
                self.struct_size.pointers as usize * BYTES_PER_WORD,
            ),
        }
    }

    /// The pointer slice of element `index` of a pointer list.
    pub fn element_pointer(&self, index: ElementCount32) -> Slice {
        debug_assert!(self.element_size == ElementSize::Pointer);
        debug_assert!(index < self.element_count);
        self.storage
            .sub(index as usize * BYTES_PER_WORD, BYTES_PER_WORD)
    }
}

/// What a non-null pointer resolves to.
pub enum Object {
    Struct(StructStorage),
    List(ListStorage),
}

/// Validates an object's byte range and charges its word count against the
/// message's traversal budget. Every descriptor resolution -- structs, lists,
/// landing pads -- passes through here, so re-traversing the same bytes
/// spends the budget again.
fn checked_slice<C: Capability>(
    message: &Message<C>,
    segment_id: SegmentId,
    start: i64,
    len: usize,
) -> Result<Slice> {
    let segment = message.segment(segment_id)?;
    if start < 0 || start as u64 + len as u64 > segment.used as u64 {
        return Err(Error::invalid_message(format!(
            "object lies outside the bounds of segment {segment_id}"
        )));
    }
    message
        .read_limiter()
        .can_read(::std::cmp::max(1, (len / BYTES_PER_WORD) as u64))?;
    Ok(Slice::new(segment_id, start as usize, len))
}

fn make_struct_storage<C: Capability>(
    message: &Message<C>,
    segment_id: SegmentId,
    start: i64,
    size: StructSize,
) -> Result<StructStorage> {
    let data_bytes = size.data as usize * BYTES_PER_WORD;
    let pointer_bytes = size.pointers as usize * BYTES_PER_WORD;
    let whole = checked_slice(message, segment_id, start, data_bytes + pointer_bytes)?;
    Ok(StructStorage {
        data: whole.sub(0, data_bytes),
        pointers: whole.sub(data_bytes, pointer_bytes),
    })
}

fn make_list_storage<C: Capability>(
    message: &Message<C>,
    segment_id: SegmentId,
    start: i64,
    pointer: ListPointer,
) -> Result<ListStorage> {
    match pointer.element_size {
        ElementSize::InlineComposite => {
            // The count field of a composite list pointer carries the payload
            // word count; the element count lives in the tag word's offset
            // field, whose shape metadata gives the per-element layout.
            let payload_words = pointer.element_count as u64;
            let tag_slice = checked_slice(message, segment_id, start, BYTES_PER_WORD)?;
            let tag = Pointer::decode(tag_slice.get_u64(message, 0)?)?;
            let (element_count, struct_size) = match tag {
                Pointer::Null => (0, StructSize::new(0, 0)),
                Pointer::Struct(sp) => {
                    if sp.offset < 0 {
                        return Err(Error::invalid_message(
                            "composite list tag word has a negative element count",
                        ));
                    }
                    (
                        sp.offset as ElementCount32,
                        StructSize::new(sp.data_size, sp.pointer_count),
                    )
                }
                _ => {
                    return Err(Error::invalid_message(
                        "composite list tag word must be a struct pointer",
                    ))
                }
            };
            if element_count as u64 * struct_size.total() as u64 != payload_words {
                return Err(Error::invalid_message(
                    "composite list tag word does not match the payload size",
                ));
            }
            let storage = checked_slice(
                message,
                segment_id,
                start,
                BYTES_PER_WORD + payload_words as usize * BYTES_PER_WORD,
            )?;
            Ok(ListStorage {
                storage,
                element_size: ElementSize::InlineComposite,
                element_count,
                struct_size,
            })
        }
        element_size => {
            let len = list_byte_length(element_size, pointer.element_count);
            let storage = checked_slice(message, segment_id, start, len)?;
            Ok(ListStorage {
                storage,
                element_size,
                element_count: pointer.element_count,
                struct_size: StructSize::new(0, 0),
            })
        }
    }
}

fn list_byte_length(element_size: ElementSize, element_count: ElementCount32) -> usize {
    match element_size {
        ElementSize::Void => 0,
        ElementSize::Bit => round_bits_up_to_bytes(element_count as usize),
        ElementSize::InlineComposite => unreachable!("composite lists are sized by their tag"),
        ElementSize::Pointer => element_count as usize * BYTES_PER_WORD,
        other => element_count as usize * (other.data_bits_per_element() as usize / 8),
    }
}

/// Resolves a pointer slice to the object it references, following far
/// pointers. `Ok(None)` means the pointer is null.
pub fn deref_pointer<C: Capability>(
    message: &Message<C>,
    ptr: Slice,
) -> Result<Option<Object>> {
    deref_pointer_impl(message, ptr, FAR_POINTER_DEPTH_LIMIT)
}

fn deref_pointer_impl<C: Capability>(
    message: &Message<C>,
    ptr: Slice,
    depth: u8,
) -> Result<Option<Object>> {
    match Pointer::decode(ptr.get_u64(message, 0)?)? {
        Pointer::Null => Ok(None),
        Pointer::Struct(sp) => {
            let start = ptr.start as i64
                + BYTES_PER_WORD as i64
                + sp.offset as i64 * BYTES_PER_WORD as i64;
            let size = StructSize::new(sp.data_size, sp.pointer_count);
            Ok(Some(Object::Struct(make_struct_storage(
                message,
                ptr.segment_id,
                start,
                size,
            )?)))
        }
        Pointer::List(lp) => {
            let start = ptr.start as i64
                + BYTES_PER_WORD as i64
                + lp.offset as i64 * BYTES_PER_WORD as i64;
            Ok(Some(Object::List(make_list_storage(
                message,
                ptr.segment_id,
                start,
                lp,
            )?)))
        }
        Pointer::Far(fp) => {
            if depth == 0 {
                return Err(Error::invalid_message("far pointer chain is too deep"));
            }
            follow_far_pointer(message, fp, depth - 1)
        }
    }
}

fn follow_far_pointer<C: Capability>(
    message: &Message<C>,
    far: FarPointer,
    depth: u8,
) -> Result<Option<Object>> {
    let pad_start = far.offset as i64 * BYTES_PER_WORD as i64;
    if !far.double_landing_pad {
        // The landing pad is one ordinary pointer; re-dispatch on it.
        let pad = checked_slice(message, far.segment_id, pad_start, BYTES_PER_WORD)?;
        deref_pointer_impl(message, pad, depth)
    } else {
        // The landing pad is a far pointer to the content followed by a tag
        // word whose offset field is ignored; only its shape metadata is used.
        let pad = checked_slice(message, far.segment_id, pad_start, 2 * BYTES_PER_WORD)?;
        let content = match Pointer::decode(pad.get_u64(message, 0)?)? {
            Pointer::Far(inner) if !inner.double_landing_pad => inner,
            _ => {
                return Err(Error::invalid_message(
                    "double-far landing pad must begin with a single far pointer",
                ))
            }
        };
        let start = content.offset as i64 * BYTES_PER_WORD as i64;
        match Pointer::decode(pad.get_u64(message, BYTES_PER_WORD)?)? {
            Pointer::Struct(sp) => {
                let size = StructSize::new(sp.data_size, sp.pointer_count);
                Ok(Some(Object::Struct(make_struct_storage(
                    message,
                    content.segment_id,
                    start,
                    size,
                )?)))
            }
            Pointer::List(lp) => Ok(Some(Object::List(make_list_storage(
                message,
                content.segment_id,
                start,
                lp,
            )?))),
            _ => Err(Error::invalid_message(
                "double-far tag word must be a struct or list pointer",
            )),
        }
    }
}

/// Reader-side struct dereference: `Ok(None)` on null.
pub fn deref_struct_pointer<C: Capability>(
    message: &Message<C>,
    ptr: Slice,
) -> Result<Option<StructStorage>> {
    match deref_pointer(message, ptr)? {
        None => Ok(None),
        Some(Object::Struct(storage)) => Ok(Some(storage)),
        Some(Object::List(_)) => Err(Error::invalid_message(
            "a list pointer was found where a struct pointer was expected",
        )),
    }
}

/// Reader-side list dereference: `Ok(None)` on null.
pub fn deref_list_pointer<C: Capability>(
    message: &Message<C>,
    ptr: Slice,
) -> Result<Option<ListStorage>> {
    match deref_pointer(message, ptr)? {
        None => Ok(None),
        Some(Object::List(storage)) => Ok(Some(storage)),
        Some(Object::Struct(_)) => Err(Error::invalid_message(
            "a struct pointer was found where a list pointer was expected",
        )),
    }
}

pub fn alloc_struct_storage(message: &mut Builder, size: StructSize) -> StructStorage {
    let data_bytes = size.data as usize * BYTES_PER_WORD;
    let pointer_bytes = size.pointers as usize * BYTES_PER_WORD;
    let whole = Slice::alloc(message, data_bytes + pointer_bytes);
    StructStorage {
        data: whole.sub(0, data_bytes),
        pointers: whole.sub(data_bytes, pointer_bytes),
    }
}

pub fn alloc_list_storage(
    message: &mut Builder,
    element_size: ElementSize,
    element_count: ElementCount32,
    struct_size: StructSize,
) -> Result<ListStorage> {
    if element_size == ElementSize::InlineComposite {
        let payload_words = element_count as usize * struct_size.total() as usize;
        let storage = Slice::alloc(message, BYTES_PER_WORD + payload_words * BYTES_PER_WORD);
        let tag = Pointer::Struct(StructPointer {
            offset: element_count as i32,
            data_size: struct_size.data,
            pointer_count: struct_size.pointers,
        });
        storage.set_u64(message, 0, tag.encode())?;
        Ok(ListStorage {
            storage,
            element_size,
            element_count,
            struct_size,
        })
    } else {
        let storage = Slice::alloc(message, list_byte_length(element_size, element_count));
        Ok(ListStorage {
            storage,
            element_size,
            element_count,
            struct_size: StructSize::new(0, 0),
        })
    }
}

/// The shape half of a positional pointer; the offset half depends on where
/// the pointer word itself lives.
#[derive(Clone, Copy)]
enum PointerShape {
    Struct(StructSize),
    List {
        element_size: ElementSize,
        count_field: ElementCount32,
    },
}

fn shape_pointer(shape: PointerShape, offset: i32) -> Pointer {
    match shape {
        PointerShape::Struct(size) => {
            // A zero-sized struct at offset zero would encode as the null
            // word; pretend it was allocated just before the pointer.
            let offset = if size.total() == 0 && offset == 0 {
                -1
            } else {
                offset
            };
            Pointer::Struct(StructPointer {
                offset,
                data_size: size.data,
                pointer_count: size.pointers,
            })
        }
        PointerShape::List {
            element_size,
            count_field,
        } => Pointer::List(ListPointer {
            offset,
            element_size,
            element_count: count_field,
        }),
    }
}

/// Writes a pointer at `ptr` referencing content at `content_start` in
/// `content_segment`, inserting a far-pointer landing pad when the content
/// lives in another segment.
fn install_pointer(
    message: &mut Builder,
    ptr: Slice,
    content_segment: SegmentId,
    content_start: usize,
    shape: PointerShape,
) -> Result<()> {
    if content_segment == ptr.segment_id {
        let offset_words = (content_start as i64 - (ptr.start + BYTES_PER_WORD) as i64)
            / BYTES_PER_WORD as i64;
        let word = shape_pointer(shape, offset_words as i32).encode();
        return ptr.set_u64(message, 0, word);
    }

    match Slice::alloc_in_segment(message, content_segment, BYTES_PER_WORD) {
        Some(pad) => {
            // Single landing pad in the content's segment: one ordinary
            // pointer to the content.
            let offset_words = (content_start as i64 - (pad.start + BYTES_PER_WORD) as i64)
                / BYTES_PER_WORD as i64;
            pad.set_u64(message, 0, shape_pointer(shape, offset_words as i32).encode())?;
            let far = Pointer::Far(FarPointer {
                double_landing_pad: false,
                offset: (pad.start / BYTES_PER_WORD) as u32,
                segment_id: content_segment,
            });
            ptr.set_u64(message, 0, far.encode())
        }
        None => {
            // No room next to the content: put a double landing pad wherever
            // there is space. Its far pointer locates the content absolutely
            // and its tag word carries the shape with a zero offset.
            let pad = Slice::alloc(message, 2 * BYTES_PER_WORD);
            let content_far = Pointer::Far(FarPointer {
                double_landing_pad: false,
                offset: (content_start / BYTES_PER_WORD) as u32,
                segment_id: content_segment,
            });
            pad.set_u64(message, 0, content_far.encode())?;
            pad.set_u64(message, BYTES_PER_WORD, shape_pointer(shape, 0).encode())?;
            let far = Pointer::Far(FarPointer {
                double_landing_pad: true,
                offset: (pad.start / BYTES_PER_WORD) as u32,
                segment_id: pad.segment_id,
            });
            ptr.set_u64(message, 0, far.encode())
        }
    }
}

pub fn init_struct_pointer(
    message: &mut Builder,
    ptr: Slice,
    storage: &StructStorage,
) -> Result<()> {
    install_pointer(
        message,
        ptr,
        storage.data.segment_id,
        storage.data.start,
        PointerShape::Struct(storage.struct_size()),
    )
}

pub fn init_list_pointer(message: &mut Builder, ptr: Slice, storage: &ListStorage) -> Result<()> {
    let count_field = if storage.element_size == ElementSize::InlineComposite {
        storage.element_count * storage.struct_size.total()
    } else {
        storage.element_count
    };
    install_pointer(
        message,
        ptr,
        storage.storage.segment_id,
        storage.storage.start,
        PointerShape::List {
            element_size: storage.element_size,
            count_field,
        },
    )
}

/// Allocates fresh struct storage and points `ptr` at it, discarding
/// whatever the pointer referenced before.
pub fn init_struct(message: &mut Builder, ptr: Slice, size: StructSize) -> Result<StructStorage> {
    let storage = alloc_struct_storage(message, size);
    init_struct_pointer(message, ptr, &storage)?;
    Ok(storage)
}

/// Allocates a fresh list and points `ptr` at it.
pub fn init_list(
    message: &mut Builder,
    ptr: Slice,
    element_size: ElementSize,
    element_count: ElementCount32,
    struct_size: StructSize,
) -> Result<ListStorage> {
    let storage = alloc_list_storage(message, element_size, element_count, struct_size)?;
    init_list_pointer(message, ptr, &storage)?;
    Ok(storage)
}

/// Shallow pointer copy within one message: the destination ends up
/// referencing the same object. Far pointers are copied verbatim, which is
/// valid because their coordinates are absolute.
pub fn copy_pointer(message: &mut Builder, src: Slice, dst: Slice) -> Result<()> {
    let word = src.get_u64(message, 0)?;
    match Pointer::decode(word)? {
        Pointer::Null => dst.set_u64(message, 0, 0),
        Pointer::Far(_) => dst.set_u64(message, 0, word),
        Pointer::Struct(_) | Pointer::List(_) => match deref_pointer(message, src)? {
            Some(Object::Struct(storage)) => init_struct_pointer(message, dst, &storage),
            Some(Object::List(storage)) => init_list_pointer(message, dst, &storage),
            None => dst.set_u64(message, 0, 0),
        },
    }
}

/// Moves a struct into storage at least as large as `expected`, copying data
/// words verbatim and re-targeting each pointer. The vacated storage is
/// zeroed; it is not reclaimed until the message is dropped.
pub fn upgrade_struct(
    message: &mut Builder,
    storage: StructStorage,
    expected: StructSize,
) -> Result<StructStorage> {
    let old = storage.struct_size();
    let new_size = StructSize::new(
        ::std::cmp::max(old.data, expected.data),
        ::std::cmp::max(old.pointers, expected.pointers),
    );
    let new = alloc_struct_storage(message, new_size);
    Slice::blit(message, storage.data, 0, new.data, 0, storage.data.len)?;
    for index in 0..old.pointers {
        let src = storage.pointers.sub(index as usize * BYTES_PER_WORD, BYTES_PER_WORD);
        let dst = new.pointers.sub(index as usize * BYTES_PER_WORD, BYTES_PER_WORD);
        copy_pointer(message, src, dst)?;
    }
    storage.data.zero(message, 0, storage.data.len)?;
    storage.pointers.zero(message, 0, storage.pointers.len)?;
    Ok(new)
}

/// Builder-side struct dereference: allocates on null, upgrades in place
/// when the physical layout is smaller than `expected`.
pub fn deref_struct_pointer_mut(
    message: &mut Builder,
    ptr: Slice,
    expected: StructSize,
) -> Result<StructStorage> {
    match deref_pointer(message, ptr)? {
        None => init_struct(message, ptr, expected),
        Some(Object::Struct(storage)) => {
            let old = storage.struct_size();
            if old.data >= expected.data && old.pointers >= expected.pointers {
                Ok(storage)
            } else {
                let upgraded = upgrade_struct(message, storage, expected)?;
                init_struct_pointer(message, ptr, &upgraded)?;
                Ok(upgraded)
            }
        }
        Some(Object::List(_)) => Err(Error::invalid_message(
            "a list pointer was found where a struct pointer was expected",
        )),
    }
}

/// Builder-side list dereference: a null pointer becomes an empty list of
/// the requested layout.
pub fn deref_list_pointer_mut(
    message: &mut Builder,
    ptr: Slice,
    element_size: ElementSize,
    struct_size: StructSize,
) -> Result<ListStorage> {
    match deref_pointer(message, ptr)? {
        None => init_list(message, ptr, element_size, 0, struct_size),
        Some(Object::List(storage)) => {
            if storage.element_size != element_size {
                return Err(Error::invalid_message(
                    "existing list value is incompatible with the expected element size",
                ));
            }
            Ok(storage)
        }
        Some(Object::Struct(_)) => Err(Error::invalid_message(
            "a struct pointer was found where a list pointer was expected",
        )),
    }
}

/// Recursively copies the object referenced by `src_ptr` into fresh storage
/// in another message. The source must be tree-shaped, which is all a
/// compliant encoder can produce.
pub fn deep_copy_pointer<C: Capability>(
    src_message: &Message<C>,
    src_ptr: Slice,
    dst_message: &mut Builder,
    dst_ptr: Slice,
) -> Result<()> {
    deep_copy_pointer_impl(src_message, src_ptr, dst_message, dst_ptr, NESTING_LIMIT)
}

fn deep_copy_pointer_impl<C: Capability>(
    src_message: &Message<C>,
    src_ptr: Slice,
    dst_message: &mut Builder,
    dst_ptr: Slice,
    nesting: u32,
) -> Result<()> {
    if nesting == 0 {
        return Err(Error::invalid_message("message is too deeply nested"));
    }
    match deref_pointer(src_message, src_ptr)? {
        None => dst_ptr.set_u64(dst_message, 0, 0),
        Some(Object::Struct(src)) => {
            let dst = alloc_struct_storage(dst_message, src.struct_size());
            deep_copy_struct_contents(src_message, &src, dst_message, &dst, nesting)?;
            init_struct_pointer(dst_message, dst_ptr, &dst)
        }
        Some(Object::List(src)) => {
            let dst = alloc_list_storage(
                dst_message,
                src.element_size,
                src.element_count,
                src.struct_size,
            )?;
            match src.element_size {
                ElementSize::Void => {}
                ElementSize::Bit
                | ElementSize::Byte
                | ElementSize::TwoBytes
                | ElementSize::FourBytes
                | ElementSize::EightBytes => {
                    let bytes = src.storage.to_bytes(src_message, 0, src.storage.len)?;
                    dst.storage.copy_from(dst_message, 0, &bytes)?;
                }
                ElementSize::Pointer => {
                    for index in 0..src.element_count {
                        deep_copy_pointer_impl(
                            src_message,
                            src.element_pointer(index),
                            dst_message,
                            dst.element_pointer(index),
                            nesting - 1,
                        )?;
                    }
                }
                ElementSize::InlineComposite => {
                    for index in 0..src.element_count {
                        deep_copy_struct_contents(
                            src_message,
                            &src.element_struct(index),
                            dst_message,
                            &dst.element_struct(index),
                            nesting,
                        )?;
                    }
                }
            }
            init_list_pointer(dst_message, dst_ptr, &dst)
        }
    }
}

fn deep_copy_struct_contents<C: Capability>(
    src_message: &Message<C>,
    src: &StructStorage,
    dst_message: &mut Builder,
    dst: &StructStorage,
    nesting: u32,
) -> Result<()> {
    let data = src.data.to_bytes(src_message, 0, src.data.len)?;
    dst.data.copy_from(dst_message, 0, &data)?;
    for index in 0..src.struct_size().pointers {
        let offset = index as usize * BYTES_PER_WORD;
        deep_copy_pointer_impl(
            src_message,
            src.pointers.sub(offset, BYTES_PER_WORD),
            dst_message,
            dst.pointers.sub(offset, BYTES_PER_WORD),
            nesting - 1,
        )?;
    }
    Ok(())
}

fn read_text<C: Capability>(message: &Message<C>, storage: &ListStorage) -> Result<String> {
    if storage.element_size != ElementSize::Byte {
        return Err(Error::invalid_message("text must be a list of bytes"));
    }
    let len = storage.element_count as usize;
    if len == 0 {
        return Err(Error::invalid_message("text blob is missing its NUL terminator"));
    }
    if storage.storage.get_u8(message, len - 1)? != 0 {
        return Err(Error::invalid_message("text blob is not NUL-terminated"));
    }
    let bytes = storage.storage.to_bytes(message, 0, len - 1)?;
    String::from_utf8(bytes).map_err(|_| Error::invalid_message("text blob is not valid UTF-8"))
}

fn read_data_blob<C: Capability>(message: &Message<C>, storage: &ListStorage) -> Result<Vec<u8>> {
    if storage.element_size != ElementSize::Byte {
        return Err(Error::invalid_message("data must be a list of bytes"));
    }
    storage
        .storage
        .to_bytes(message, 0, storage.element_count as usize)
}

/// Writes `value` as a NUL-terminated byte list and installs it in `ptr`.
pub(crate) fn write_text(message: &mut Builder, ptr: Slice, value: &str) -> Result<()> {
    let storage = alloc_list_storage(
        message,
        ElementSize::Byte,
        (value.len() + 1) as ElementCount32,
        StructSize::new(0, 0),
    )?;
    storage.storage.copy_from(message, 0, value.as_bytes())?;
    init_list_pointer(message, ptr, &storage)
}

pub(crate) fn write_data_blob(message: &mut Builder, ptr: Slice, value: &[u8]) -> Result<()> {
    let storage = alloc_list_storage(
        message,
        ElementSize::Byte,
        value.len() as ElementCount32,
        StructSize::new(0, 0),
    )?;
    storage.storage.copy_from(message, 0, value)?;
    init_list_pointer(message, ptr, &storage)
}

/// Read-only view of one pointer slot. A missing slot (null struct, or a
/// field beyond the physical pointer section) reads as null.
pub struct PointerReader<'a, C: Capability> {
    pub(crate) message: &'a Message<C>,
    pub(crate) slice: Option<Slice>,
}

impl<'a, C: Capability> PointerReader<'a, C> {
    pub fn new(message: &'a Message<C>, slice: Option<Slice>) -> Self {
        Self { message, slice }
    }

    pub fn is_null(&self) -> Result<bool> {
        match self.slice {
            None => Ok(true),
            Some(ptr) => Ok(ptr.get_u64(self.message, 0)? == 0),
        }
    }

    pub fn get_struct(&self) -> Result<StructReader<'a, C>> {
        let storage = match self.slice {
            None => None,
            Some(ptr) => deref_struct_pointer(self.message, ptr)?,
        };
        Ok(StructReader::new(self.message, storage))
    }

    /// Resolves the list this pointer references, checking its element size.
    /// `Ok(None)` means null: the caller supplies the default.
    pub fn get_list(&self, expected: ElementSize) -> Result<Option<ListStorage>> {
        let storage = match self.slice {
            None => None,
            Some(ptr) => deref_list_pointer(self.message, ptr)?,
        };
        if let Some(storage) = &storage {
            if storage.element_size != expected {
                return Err(Error::invalid_message(
                    "existing list value is incompatible with the expected element size",
                ));
            }
        }
        Ok(storage)
    }

    pub fn get_text(&self, default: &str) -> Result<String> {
        match self.get_list(ElementSize::Byte)? {
            None => Ok(default.to_string()),
            Some(storage) => read_text(self.message, &storage),
        }
    }

    pub fn get_data(&self, default: &[u8]) -> Result<Vec<u8>> {
        match self.get_list(ElementSize::Byte)? {
            None => Ok(default.to_vec()),
            Some(storage) => read_data_blob(self.message, &storage),
        }
    }
}

/// Read/write view of one pointer slot. Dereferencing null allocates.
pub struct PointerBuilder<'a> {
    pub(crate) message: &'a mut Builder,
    pub(crate) slice: Slice,
}

impl<'a> PointerBuilder<'a> {
    pub fn new(message: &'a mut Builder, slice: Slice) -> Self {
        Self { message, slice }
    }

    pub fn get_struct(self, size: StructSize) -> Result<StructBuilder<'a>> {
        let Self { message, slice } = self;
        let storage = deref_struct_pointer_mut(message, slice, size)?;
        Ok(StructBuilder { message, storage })
    }

    pub fn init_struct(self, size: StructSize) -> Result<StructBuilder<'a>> {
        let Self { message, slice } = self;
        let storage = init_struct(message, slice, size)?;
        Ok(StructBuilder { message, storage })
    }

    pub fn get_text(&mut self, default: &str) -> Result<String> {
        if self.as_reader().is_null()? {
            write_text(self.message, self.slice, default)?;
            return Ok(default.to_string());
        }
        self.as_reader().get_text(default)
    }

    pub fn set_text(&mut self, value: &str) -> Result<()> {
        write_text(self.message, self.slice, value)
    }

    pub fn get_data(&mut self, default: &[u8]) -> Result<Vec<u8>> {
        if self.as_reader().is_null()? {
            write_data_blob(self.message, self.slice, default)?;
            return Ok(default.to_vec());
        }
        self.as_reader().get_data(default)
    }

    pub fn set_data(&mut self, value: &[u8]) -> Result<()> {
        write_data_blob(self.message, self.slice, value)
    }

    /// Deep-copies a value from another message into this slot.
    pub fn set_from<C: Capability>(&mut self, value: &PointerReader<'_, C>) -> Result<()> {
        match value.slice {
            None => self.slice.set_u64(self.message, 0, 0),
            Some(src) => deep_copy_pointer(value.message, src, self.message, self.slice),
        }
    }

    /// Writes the null word: the field reads as its default afterwards. The
    /// old object's storage is not reclaimed until the message is dropped.
    pub fn clear(&mut self) -> Result<()> {
        self.slice.set_u64(self.message, 0, 0)
    }

    pub fn as_reader(&self) -> PointerReader<'_, ReadWrite> {
        PointerReader {
            message: &*self.message,
            slice: Some(self.slice),
        }
    }
}

/// Read-only struct view. `storage == None` (a null pointer) reads every
/// field as its default.
pub struct StructReader<'a, C: Capability> {
    message: &'a Message<C>,
    storage: Option<StructStorage>,
}

impl<'a, C: Capability> std::fmt::Debug for StructReader<'a, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructReader")
            .field("storage", &self.storage)
            .finish()
    }
}

impl<'a, C: Capability> StructReader<'a, C> {
    pub fn new(message: &'a Message<C>, storage: Option<StructStorage>) -> Self {
        Self { message, storage }
    }

    /// Whether this view came from a null pointer.
    pub fn is_null(&self) -> bool {
        self.storage.is_none()
    }

    /// Reads a scalar at the given byte offset, yielding zero when the
    /// offset lies beyond the physical data section -- which is how structs
    /// written by an older schema read their newer fields as defaults.
    pub fn get_data_field<T: PrimitiveField>(&self, byte_offset: usize) -> Result<T> {
        match self.storage {
            Some(storage) if byte_offset + T::BYTES <= storage.data.len => {
                T::load(self.message, storage.data, byte_offset)
            }
            _ => Ok(T::default()),
        }
    }

    pub fn get_data_field_mask<T: PrimitiveField>(
        &self,
        byte_offset: usize,
        mask: T::Mask,
    ) -> Result<T> {
        Ok(T::mask(self.get_data_field(byte_offset)?, mask))
    }

    pub fn get_bool_field(&self, bit_index: usize) -> Result<bool> {
        match self.storage {
            Some(storage) if bit_index / 8 < storage.data.len => {
                let byte = storage.data.get_u8(self.message, bit_index / 8)?;
                Ok(byte & (1 << (bit_index % 8)) != 0)
            }
            _ => Ok(false),
        }
    }

    pub fn get_bool_field_mask(&self, bit_index: usize, mask: bool) -> Result<bool> {
        Ok(self.get_bool_field(bit_index)? ^ mask)
    }

    pub fn get_pointer_field(&self, index: u16) -> PointerReader<'a, C> {
        PointerReader {
            message: self.message,
            slice: self.storage.and_then(|storage| storage.pointer_field(index)),
        }
    }
}

/// Read/write struct view. The storage always has at least the layout the
/// schema expects, thanks to allocate-on-null and upgrade.
pub struct StructBuilder<'a> {
    message: &'a mut Builder,
    storage: StructStorage,
}

impl<'a> StructBuilder<'a> {
    pub fn new(message: &'a mut Builder, storage: StructStorage) -> Self {
        Self { message, storage }
    }

    pub fn get_data_field<T: PrimitiveField>(&self, byte_offset: usize) -> Result<T> {
        self.as_reader().get_data_field(byte_offset)
    }

    pub fn get_data_field_mask<T: PrimitiveField>(
        &self,
        byte_offset: usize,
        mask: T::Mask,
    ) -> Result<T> {
        self.as_reader().get_data_field_mask(byte_offset, mask)
    }

    pub fn set_data_field<T: PrimitiveField>(
        &mut self,
        byte_offset: usize,
        value: T,
    ) -> Result<()> {
        T::store(self.message, self.storage.data, byte_offset, value)
    }

    pub fn set_data_field_mask<T: PrimitiveField>(
        &mut self,
        byte_offset: usize,
        value: T,
        mask: T::Mask,
    ) -> Result<()> {
        self.set_data_field(byte_offset, T::mask(value, mask))
    }

    pub fn get_bool_field(&self, bit_index: usize) -> Result<bool> {
        self.as_reader().get_bool_field(bit_index)
    }

    pub fn get_bool_field_mask(&self, bit_index: usize, mask: bool) -> Result<bool> {
        self.as_reader().get_bool_field_mask(bit_index, mask)
    }

    pub fn set_bool_field(&mut self, bit_index: usize, value: bool) -> Result<()> {
        let offset = bit_index / 8;
        let mut byte = self.storage.data.get_u8(self.message, offset)?;
        if value {
            byte |= 1 << (bit_index % 8);
        } else {
            byte &= !(1 << (bit_index % 8));
        }
        self.storage.data.set_u8(self.message, offset, byte)
    }

    pub fn set_bool_field_mask(&mut self, bit_index: usize, value: bool, mask: bool) -> Result<()> {
        self.set_bool_field(bit_index, value ^ mask)
    }

    pub fn get_pointer_field(&mut self, index: u16) -> PointerBuilder<'_> {
        let slice = self
            .storage
            .pointer_field(index)
            .expect("pointer field index within struct bounds");
        PointerBuilder {
            message: &mut *self.message,
            slice,
        }
    }

    pub fn as_reader(&self) -> StructReader<'_, ReadWrite> {
        StructReader {
            message: &*self.message,
            storage: Some(self.storage),
        }
    }
}
