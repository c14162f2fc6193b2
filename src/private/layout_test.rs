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

use crate::list::{primitive_list, struct_list, text_list};
use crate::message::{AllocationStrategy, Builder, Reader, ReaderOptions};
use crate::private::layout::{ElementSize, StructSize};
use crate::private::pointer::{FarPointer, ListPointer, Pointer, StructPointer};

fn segment(words: &[[u8; 8]]) -> Vec<u8> {
    words.iter().flatten().copied().collect()
}

fn decode_word(bytes: &[u8]) -> Pointer {
    Pointer::decode(u64::from_le_bytes(bytes.try_into().unwrap())).unwrap()
}

#[test]
fn simple_raw_data_struct() {
    // A struct pointer with offset zero points at the word immediately
    // after itself.
    let reader = Reader::new(vec![segment(&[
        [0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00],
        [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef],
    ])], ReaderOptions::new())
    .unwrap();
    let root = reader.get_root().unwrap();

    assert_eq!(root.get_data_field::<u64>(0).unwrap(), 0xefcdab8967452301);
    assert_eq!(root.get_data_field::<u64>(8).unwrap(), 0); // past the end

    assert_eq!(root.get_data_field::<u32>(0).unwrap(), 0x67452301);
    assert_eq!(root.get_data_field::<u32>(4).unwrap(), 0xefcdab89);
    assert_eq!(root.get_data_field::<u32>(8).unwrap(), 0); // past the end

    assert_eq!(root.get_data_field::<u16>(0).unwrap(), 0x2301);
    assert_eq!(root.get_data_field::<u16>(2).unwrap(), 0x6745);
    assert_eq!(root.get_data_field::<u16>(4).unwrap(), 0xab89);
    assert_eq!(root.get_data_field::<u16>(6).unwrap(), 0xefcd);

    assert!(root.get_bool_field(0).unwrap());
    assert!(!root.get_bool_field(1).unwrap());
    assert!(root.get_bool_field(8).unwrap());
    assert!(root.get_bool_field(9).unwrap());
    assert!(!root.get_bool_field(10).unwrap());
    assert!(root.get_bool_field(13).unwrap());
    assert!(root.get_bool_field(63).unwrap());
    assert!(!root.get_bool_field(64).unwrap()); // past the end
}

#[test]
fn default_xor_scalars() {
    let mut message = Builder::new_default();
    {
        let mut root = message.init_root(StructSize::new(1, 0)).unwrap();

        // Zeroed storage decodes to the schema default.
        assert_eq!(root.get_data_field_mask::<i32>(0, 42).unwrap(), 42);
        assert_eq!(
            root.get_data_field_mask::<f32>(4, 1.25f32.to_bits()).unwrap(),
            1.25
        );

        // Writing the default stores all zero bits.
        root.set_data_field_mask::<i32>(0, 42, 42).unwrap();
        assert_eq!(root.get_data_field::<i32>(0).unwrap(), 0);
        assert_eq!(root.get_data_field_mask::<i32>(0, 42).unwrap(), 42);

        // Writing another value round-trips through the mask.
        root.set_data_field_mask::<i32>(0, -7, 42).unwrap();
        assert_eq!(root.get_data_field_mask::<i32>(0, 42).unwrap(), -7);
    }
}

#[test]
fn bool_fields() {
    let mut message = Builder::new_default();
    let mut root = message.init_root(StructSize::new(1, 0)).unwrap();

    root.set_bool_field(3, true).unwrap();
    assert!(root.get_bool_field(3).unwrap());
    assert!(!root.get_bool_field(2).unwrap());
    root.set_bool_field(3, false).unwrap();
    assert!(!root.get_bool_field(3).unwrap());

    // Bit 5 with default true: zeroed storage reads true, and writing
    // true stores a zero bit.
    assert!(root.get_bool_field_mask(5, true).unwrap());
    root.set_bool_field_mask(5, true, true).unwrap();
    assert!(!root.get_bool_field(5).unwrap());
    assert!(root.get_bool_field_mask(5, true).unwrap());
}

#[test]
fn bool_list() {
    // [true, false, true, false, true, true, true, false, false, true]
    let reader = Reader::new(vec![segment(&[
        [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00],
        [0x01, 0x00, 0x00, 0x00, 0x51, 0x00, 0x00, 0x00],
        [0x75, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    ])], ReaderOptions::new())
    .unwrap();
    let root = reader.get_root().unwrap();
    let list =
        primitive_list::Reader::<_, bool>::get_from_pointer(&root.get_pointer_field(0)).unwrap();

    assert_eq!(list.len(), 10);
    let expected = [
        true, false, true, false, true, true, true, false, false, true,
    ];
    for (index, value) in expected.iter().enumerate() {
        assert_eq!(list.get(index as u32).unwrap(), *value);
    }
}

#[test]
fn bit_list_occupies_one_byte() {
    let mut message = Builder::new_default();
    let mut root = message.init_root(StructSize::new(0, 1)).unwrap();
    let mut list =
        primitive_list::Builder::<bool>::init_in_pointer(root.get_pointer_field(0), 5).unwrap();
    list.set(0, true).unwrap();
    list.set(3, true).unwrap();
    list.set(4, true).unwrap();

    let reader = message.into_reader();
    let root = reader.get_root().unwrap();
    let storage = root
        .get_pointer_field(0)
        .get_list(ElementSize::Bit)
        .unwrap()
        .unwrap();
    assert_eq!(storage.element_count, 5);
    assert_eq!(storage.storage.len, 1);

    let list = primitive_list::Reader::<_, bool>::get_from_pointer(&root.get_pointer_field(0))
        .unwrap();
    assert!(list.get(0).unwrap());
    assert!(!list.get(1).unwrap());
    assert!(!list.get(2).unwrap());
    assert!(list.get(3).unwrap());
    assert!(list.get(4).unwrap());
}

#[test]
fn primitive_list_round_trip() {
    let mut message = Builder::new_default();
    {
        let mut root = message.init_root(StructSize::new(0, 1)).unwrap();
        let mut list =
            primitive_list::Builder::<u32>::init_in_pointer(root.get_pointer_field(0), 4).unwrap();
        for index in 0..4 {
            list.set(index, 1000 + index).unwrap();
        }
        assert_eq!(list.get(2).unwrap(), 1002);
    }

    let reader = message.into_reader();
    let root = reader.get_root().unwrap();
    let storage = root
        .get_pointer_field(0)
        .get_list(ElementSize::FourBytes)
        .unwrap()
        .unwrap();
    assert_eq!(storage.storage.len, 16);

    let list =
        primitive_list::Reader::<_, u32>::get_from_pointer(&root.get_pointer_field(0)).unwrap();
    assert_eq!(list.len(), 4);
    for index in 0..4 {
        assert_eq!(list.get(index).unwrap(), 1000 + index);
    }
}

#[test]
fn text_field_access() {
    let mut message = Builder::new_default();
    {
        let mut root = message.init_root(StructSize::new(0, 1)).unwrap();
        root.get_pointer_field(0).set_text("hi").unwrap();
    }

    let reader = message.into_reader();
    let root = reader.get_root().unwrap();

    // Two bytes of text; the NUL terminator makes three bytes of storage.
    assert_eq!(root.get_pointer_field(0).get_text("").unwrap(), "hi");
    let storage = root
        .get_pointer_field(0)
        .get_list(ElementSize::Byte)
        .unwrap()
        .unwrap();
    assert_eq!(storage.element_count, 3);
}

#[test]
fn blob_default_round_trip() {
    let mut message = Builder::new_default();
    let mut root = message.init_root(StructSize::new(0, 1)).unwrap();

    assert_eq!(
        root.as_reader().get_pointer_field(0).get_data(b"xyz").unwrap(),
        b"xyz"
    );
    root.get_pointer_field(0).set_data(b"abc").unwrap();
    assert_eq!(
        root.as_reader().get_pointer_field(0).get_data(b"xyz").unwrap(),
        b"abc"
    );

    // Clearing the pointer restores the default.
    root.get_pointer_field(0).clear().unwrap();
    assert_eq!(
        root.as_reader().get_pointer_field(0).get_data(b"xyz").unwrap(),
        b"xyz"
    );
}

#[test]
fn far_pointer_single_landing_pad() {
    // Room for the root pointer and the root struct, but not the text.
    let mut message = Builder::new(2, AllocationStrategy::FixedSize);
    {
        let mut root = message.init_root(StructSize::new(0, 1)).unwrap();
        root.get_pointer_field(0).set_text("hi").unwrap();
    }
    assert_eq!(message.segment_count(), 2);

    let segments = message.get_segments_for_output();
    // The text pointer in segment 0 becomes a far pointer to a landing pad
    // allocated next to the content in segment 1.
    assert_eq!(
        decode_word(&segments[0][8..16]),
        Pointer::Far(FarPointer {
            double_landing_pad: false,
            offset: 1,
            segment_id: 1,
        })
    );
    assert_eq!(
        decode_word(&segments[1][8..16]),
        Pointer::List(ListPointer {
            offset: -2,
            element_size: ElementSize::Byte,
            element_count: 3,
        })
    );

    let reader = message.into_reader();
    let root = reader.get_root().unwrap();
    assert_eq!(root.get_pointer_field(0).get_text("").unwrap(), "hi");
}

#[test]
fn far_pointer_double_landing_pad() {
    // Segment 0 holds only the root pointer; the struct spills into a
    // fresh segment with no room left for a landing pad.
    let mut message = Builder::new(1, AllocationStrategy::FixedSize);
    {
        let mut root = message.init_root(StructSize::new(1, 0)).unwrap();
        root.set_data_field::<i32>(0, 42).unwrap();
    }
    assert_eq!(message.segment_count(), 3);

    let segments = message.get_segments_for_output();
    let root_word = decode_word(&segments[0][0..8]);
    let Pointer::Far(far) = root_word else {
        panic!("expected a far pointer at the root, got {root_word:?}");
    };
    assert!(far.double_landing_pad);

    let pad = &segments[far.segment_id as usize][far.offset as usize * 8..];
    assert_eq!(
        decode_word(&pad[0..8]),
        Pointer::Far(FarPointer {
            double_landing_pad: false,
            offset: 0,
            segment_id: 1,
        })
    );
    assert_eq!(
        decode_word(&pad[8..16]),
        Pointer::Struct(StructPointer {
            offset: 0,
            data_size: 1,
            pointer_count: 0,
        })
    );

    // The reader resolves the whole chain transparently.
    let reader = message.into_reader();
    let root = reader.get_root().unwrap();
    assert_eq!(root.get_data_field::<i32>(0).unwrap(), 42);
}

#[test]
fn far_pointer_chain_too_deep() {
    let far_to = |segment_id: u32| {
        Pointer::Far(FarPointer {
            double_landing_pad: false,
            offset: 0,
            segment_id,
        })
        .encode()
        .to_le_bytes()
    };
    let reader = Reader::new(vec![
        segment(&[far_to(1)]),
        segment(&[far_to(2)]),
        segment(&[far_to(1)]),
    ], ReaderOptions::new())
    .unwrap();
    let err = reader.get_root().unwrap_err();
    assert!(err.description.contains("too deep"), "{err:?}");
}

#[test]
fn composite_list_layout() {
    let mut message = Builder::new(16, AllocationStrategy::FixedSize);
    {
        let mut root = message.init_root(StructSize::new(0, 1)).unwrap();
        let mut list = struct_list::Builder::init_in_pointer(
            root.get_pointer_field(0),
            3,
            StructSize::new(1, 1),
        )
        .unwrap();
        for index in 0..3 {
            list.get(index)
                .set_data_field::<u64>(0, 100 + index as u64)
                .unwrap();
        }
    }

    let segments = message.get_segments_for_output();
    // The list pointer's count field carries the payload word count.
    assert_eq!(
        decode_word(&segments[0][8..16]),
        Pointer::List(ListPointer {
            offset: 0,
            element_size: ElementSize::InlineComposite,
            element_count: 6,
        })
    );
    // The tag word is a struct pointer whose offset field is the element
    // count.
    assert_eq!(&segments[0][16..24], &[0x0c, 0, 0, 0, 1, 0, 1, 0]);
    // Element 1's data word lives at payload offset 8 + 1*16 = 24.
    assert_eq!(segments[0][16 + 24], 101);

    let reader = message.into_reader();
    let root = reader.get_root().unwrap();
    let list = struct_list::Reader::get_from_pointer(&root.get_pointer_field(0)).unwrap();
    assert_eq!(list.len(), 3);
    for index in 0..3 {
        assert_eq!(
            list.get(index).get_data_field::<u64>(0).unwrap(),
            100 + index as u64
        );
    }
}

#[test]
fn composite_list_zero_length_still_has_tag() {
    let mut message = Builder::new_default();
    {
        let mut root = message.init_root(StructSize::new(0, 1)).unwrap();
        struct_list::Builder::init_in_pointer(root.get_pointer_field(0), 0, StructSize::new(1, 1))
            .unwrap();
    }

    let reader = message.into_reader();
    let root = reader.get_root().unwrap();
    let storage = root
        .get_pointer_field(0)
        .get_list(ElementSize::InlineComposite)
        .unwrap()
        .unwrap();
    assert_eq!(storage.element_count, 0);
    assert_eq!(storage.storage.len, 8); // the tag word alone
    assert_eq!(storage.struct_size, StructSize::new(1, 1));
}

#[test]
fn struct_upgrade_preserves_data() {
    let mut message = Builder::new_default();
    {
        let mut root = message.init_root(StructSize::new(1, 1)).unwrap();
        root.set_data_field::<i32>(0, 42).unwrap();
        root.get_pointer_field(0).set_text("hi").unwrap();
    }

    {
        // A newer schema expects a bigger struct.
        let mut root = message.get_root(StructSize::new(2, 2)).unwrap();
        assert_eq!(root.get_data_field::<i32>(0).unwrap(), 42);
        assert_eq!(root.get_data_field::<u64>(8).unwrap(), 0);
        assert_eq!(
            root.as_reader().get_pointer_field(0).get_text("").unwrap(),
            "hi"
        );
        assert_eq!(
            root.as_reader()
                .get_pointer_field(1)
                .get_text("fallback")
                .unwrap(),
            "fallback"
        );
        root.set_data_field::<u64>(8, 9).unwrap();
    }

    let reader = message.into_reader();
    let root = reader.get_root().unwrap();
    assert_eq!(root.get_data_field::<i32>(0).unwrap(), 42);
    assert_eq!(root.get_data_field::<u64>(8).unwrap(), 9);
    assert_eq!(root.get_pointer_field(0).get_text("").unwrap(), "hi");
}

#[test]
fn upgrade_zeroes_vacated_storage() {
    let mut message = Builder::new(8, AllocationStrategy::FixedSize);
    {
        let mut root = message.init_root(StructSize::new(1, 0)).unwrap();
        root.set_data_field::<u64>(0, 0xdead_beef).unwrap();
    }
    // The original storage is the word right after the root pointer.
    message.get_root(StructSize::new(2, 0)).unwrap();

    let segments = message.get_segments_for_output();
    assert_eq!(&segments[0][8..16], &[0; 8]);
}

#[test]
fn struct_upgrade_behind_far_pointer() {
    // Segment 0 holds only the root pointer, so the struct lands behind a
    // far pointer from the start.
    let mut message = Builder::new(1, AllocationStrategy::FixedSize);
    {
        let mut root = message.init_root(StructSize::new(1, 0)).unwrap();
        root.set_data_field::<i32>(0, 42).unwrap();
    }
    {
        let root_word = decode_word(&message.get_segments_for_output()[0][0..8]);
        assert!(matches!(root_word, Pointer::Far(_)));
    }

    // Upgrading must relocate the struct and re-encode the whole far chain.
    {
        let mut root = message.get_root(StructSize::new(2, 1)).unwrap();
        assert_eq!(root.get_data_field::<i32>(0).unwrap(), 42);
        root.set_data_field::<u32>(8, 7).unwrap();
        root.get_pointer_field(0).set_text("far").unwrap();
    }

    let segments = message.get_segments_for_output();
    // The vacated storage (all of the old spill segment) is zeroed, and the
    // root still reaches the struct through a far pointer.
    assert_eq!(segments[1], &[0; 8][..]);
    assert!(matches!(decode_word(&segments[0][0..8]), Pointer::Far(_)));

    // The re-encoded chain survives a trip through the wire format.
    let bytes = crate::serialize::write_message_to_bytes(&message).unwrap();
    let reader = crate::serialize::read_message_from_bytes(&bytes, ReaderOptions::new()).unwrap();
    let root = reader.get_root().unwrap();
    assert_eq!(root.get_data_field::<i32>(0).unwrap(), 42);
    assert_eq!(root.get_data_field::<u32>(8).unwrap(), 7);
    assert_eq!(root.get_pointer_field(0).get_text("").unwrap(), "far");
}

#[test]
fn repeated_traversal_spends_the_read_limit() {
    let mut message = Builder::new_default();
    {
        let mut root = message.init_root(StructSize::new(0, 1)).unwrap();
        root.get_pointer_field(0).set_text("hi").unwrap();
    }
    let bytes = crate::serialize::write_message_to_bytes(&message).unwrap();

    // The message itself is three words, well under the limit, so it parses;
    // the budget is spent by traversal, not by size.
    let options = ReaderOptions {
        traversal_limit_in_words: 16,
    };
    let reader = crate::serialize::read_message_from_bytes(&bytes, options).unwrap();

    // Every pass re-resolves the same two objects and is charged for them
    // again, so a handful of passes exhausts the budget.
    let mut hit_limit = false;
    for _ in 0..64 {
        let Ok(root) = reader.get_root() else {
            hit_limit = true;
            break;
        };
        if root.get_pointer_field(0).get_text("").is_err() {
            hit_limit = true;
            break;
        }
    }
    assert!(hit_limit);
}

#[test]
fn deep_copy_independence() {
    let mut first = Builder::new_default();
    {
        let mut root = first.init_root(StructSize::new(0, 1)).unwrap();
        let mut inner = root
            .get_pointer_field(0)
            .init_struct(StructSize::new(1, 2))
            .unwrap();
        inner.set_data_field::<u32>(0, 7).unwrap();
        inner.get_pointer_field(0).set_text("hello").unwrap();
        let mut names =
            text_list::Builder::init_in_pointer(inner.get_pointer_field(1), 2).unwrap();
        names.set(0, "a").unwrap();
        names.set(1, "b").unwrap();
    }

    let mut second = Builder::new_default();
    {
        let mut root = second.init_root(StructSize::new(0, 1)).unwrap();
        let source_root = first.get_root_as_reader().unwrap();
        let source = source_root.get_pointer_field(0);
        root.get_pointer_field(0).set_from(&source).unwrap();
    }

    let check = |message: &Builder, text: &str| {
        let root = message.get_root_as_reader().unwrap();
        let inner = root.get_pointer_field(0).get_struct().unwrap();
        assert_eq!(inner.get_data_field::<u32>(0).unwrap(), 7);
        assert_eq!(inner.get_pointer_field(0).get_text("").unwrap(), text);
        let names = text_list::Reader::get_from_pointer(&inner.get_pointer_field(1)).unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(names.get(0).unwrap(), "a");
        assert_eq!(names.get(1).unwrap(), "b");
    };
    check(&first, "hello");
    check(&second, "hello");

    // Mutating the copy leaves the original untouched, and vice versa.
    {
        let mut root = second.get_root(StructSize::new(0, 1)).unwrap();
        let mut inner = root
            .get_pointer_field(0)
            .get_struct(StructSize::new(1, 2))
            .unwrap();
        inner.get_pointer_field(0).set_text("changed").unwrap();
    }
    check(&first, "hello");
    check(&second, "changed");

    {
        let mut root = first.get_root(StructSize::new(0, 1)).unwrap();
        let mut inner = root
            .get_pointer_field(0)
            .get_struct(StructSize::new(1, 2))
            .unwrap();
        inner.set_data_field::<u32>(0, 8).unwrap();
    }
    let root = second.get_root_as_reader().unwrap();
    let inner = root.get_pointer_field(0).get_struct().unwrap();
    assert_eq!(inner.get_data_field::<u32>(0).unwrap(), 7);
}

#[test]
fn pointer_type_mismatches_are_errors() {
    let mut message = Builder::new_default();
    {
        let mut root = message.init_root(StructSize::new(0, 2)).unwrap();
        root.get_pointer_field(0)
            .init_struct(StructSize::new(1, 0))
            .unwrap();
        primitive_list::Builder::<u32>::init_in_pointer(root.get_pointer_field(1), 2).unwrap();
    }

    let reader = message.into_reader();
    let root = reader.get_root().unwrap();
    assert!(root
        .get_pointer_field(0)
        .get_list(ElementSize::FourBytes)
        .is_err());
    assert!(root.get_pointer_field(1).get_struct().is_err());

    // A list of the wrong element size is also rejected.
    assert!(root
        .get_pointer_field(1)
        .get_list(ElementSize::TwoBytes)
        .is_err());
}

#[test]
fn empty_struct_root_is_not_null() {
    let mut message = Builder::new_default();
    message.init_root(StructSize::new(0, 0)).unwrap();

    let segments = message.get_segments_for_output();
    assert_eq!(&segments[0][0..8], &[0xfc, 0xff, 0xff, 0xff, 0, 0, 0, 0]);

    let reader = message.into_reader();
    let root = reader.get_root().unwrap();
    assert_eq!(root.get_data_field::<u64>(0).unwrap(), 0);
}

#[test]
fn null_root_reads_defaults() {
    let reader = Reader::new(vec![vec![0; 8]], ReaderOptions::new()).unwrap();
    let root = reader.get_root().unwrap();
    assert_eq!(root.get_data_field::<u32>(0).unwrap(), 0);
    assert_eq!(root.get_data_field_mask::<u32>(0, 11).unwrap(), 11);
    assert_eq!(root.get_pointer_field(0).get_text("dflt").unwrap(), "dflt");
    assert!(root.get_pointer_field(3).get_struct().unwrap().is_null());
}

#[test]
fn text_list_set_allocates_fresh_byte_lists() {
    let mut message = Builder::new_default();
    {
        let mut root = message.init_root(StructSize::new(0, 1)).unwrap();
        let mut names = text_list::Builder::init_in_pointer(root.get_pointer_field(0), 3).unwrap();
        names.set(0, "foo").unwrap();
        names.set(2, "baz").unwrap();
        assert_eq!(names.get(0).unwrap(), "foo");
    }

    let reader = message.into_reader();
    let root = reader.get_root().unwrap();
    let names = text_list::Reader::get_from_pointer(&root.get_pointer_field(0)).unwrap();
    assert_eq!(names.len(), 3);
    assert_eq!(names.get(0).unwrap(), "foo");
    assert_eq!(names.get(1).unwrap(), ""); // never set: null element
    assert_eq!(names.get(2).unwrap(), "baz");
}

#[test]
fn builder_get_text_installs_default_on_null() {
    let mut message = Builder::new_default();
    let mut root = message.init_root(StructSize::new(0, 1)).unwrap();
    assert_eq!(root.get_pointer_field(0).get_text("dflt").unwrap(), "dflt");
    // The default has been written out, so a plain reader sees it too.
    assert_eq!(
        root.as_reader().get_pointer_field(0).get_text("").unwrap(),
        "dflt"
    );
}
