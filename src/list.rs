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

//! Typed list views. Each element type gets its own monomorphized reader and
//! builder, so element access is a direct call -- there are no function
//! pointer tables or boxed closures on the hot path.

use crate::message::{Builder, Capability, Message};
use crate::private::layout::{ElementSize, ListStorage};
use crate::private::primitive::PrimitiveField;
use crate::private::units::ElementCount32;
use crate::Result;

/// Element access for the fixed-width list layouts.
pub trait PrimitiveElement: Sized {
    fn element_size() -> ElementSize;

    fn get<C: Capability>(
        message: &Message<C>,
        list: &ListStorage,
        index: ElementCount32,
    ) -> Result<Self>;

    fn set(
        message: &mut Builder,
        list: &ListStorage,
        index: ElementCount32,
        value: Self,
    ) -> Result<()>;
}

macro_rules! primitive_element {
    ($typ:ty, $element_size:ident) => {
        impl PrimitiveElement for $typ {
            fn element_size() -> ElementSize {
                ElementSize::$element_size
            }

            #[inline]
            fn get<C: Capability>(
                message: &Message<C>,
                list: &ListStorage,
                index: ElementCount32,
            ) -> Result<Self> {
                <$typ as PrimitiveField>::load(
                    message,
                    list.storage,
                    index as usize * <$typ as PrimitiveField>::BYTES,
                )
            }

            #[inline]
            fn set(
                message: &mut Builder,
                list: &ListStorage,
                index: ElementCount32,
                value: Self,
            ) -> Result<()> {
                <$typ as PrimitiveField>::store(
                    message,
                    list.storage,
                    index as usize * <$typ as PrimitiveField>::BYTES,
                    value,
                )
            }
        }
    };
}

primitive_element!(u8, Byte);
primitive_element!(i8, Byte);
primitive_element!(u16, TwoBytes);
primitive_element!(i16, TwoBytes);
primitive_element!(u32, FourBytes);
primitive_element!(i32, FourBytes);
primitive_element!(u64, EightBytes);
primitive_element!(i64, EightBytes);
primitive_element!(f32, FourBytes);
primitive_element!(f64, EightBytes);

impl PrimitiveElement for bool {
    fn element_size() -> ElementSize {
        ElementSize::Bit
    }

    fn get<C: Capability>(
        message: &Message<C>,
        list: &ListStorage,
        index: ElementCount32,
    ) -> Result<Self> {
        let byte = list.storage.get_u8(message, index as usize / 8)?;
        Ok(byte & (1 << (index % 8)) != 0)
    }

    fn set(
        message: &mut Builder,
        list: &ListStorage,
        index: ElementCount32,
        value: Self,
    ) -> Result<()> {
        let offset = index as usize / 8;
        let mut byte = list.storage.get_u8(message, offset)?;
        if value {
            byte |= 1 << (index % 8);
        } else {
            byte &= !(1 << (index % 8));
        }
        list.storage.set_u8(message, offset, byte)
    }
}

pub mod primitive_list {
    use super::PrimitiveElement;
    use crate::message::Capability;
    use crate::private::layout::{self, ListStorage, PointerBuilder, PointerReader, StructSize};
    use crate::private::units::ElementCount32;
    use crate::Result;
    use std::marker::PhantomData;

    pub struct Reader<'a, C: Capability, T> {
        message: &'a crate::message::Message<C>,
        storage: Option<ListStorage>,
        marker: PhantomData<T>,
    }

    impl<'a, C: Capability, T: PrimitiveElement> Reader<'a, C, T> {
        pub fn get_from_pointer(pointer: &PointerReader<'a, C>) -> Result<Self> {
            let storage = pointer.get_list(T::element_size())?;
            Ok(Self {
                message: pointer.message,
                storage,
                marker: PhantomData,
            })
        }

        pub fn len(&self) -> ElementCount32 {
            self.storage.map_or(0, |storage| storage.element_count)
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        pub fn get(&self, index: ElementCount32) -> Result<T> {
            let Some(storage) = &self.storage else {
                panic!("index out of bounds: the list is empty");
            };
            assert!(index < storage.element_count, "index out of bounds");
            T::get(self.message, storage, index)
        }
    }

    pub struct Builder<'a, T> {
        message: &'a mut crate::message::Builder,
        storage: ListStorage,
        marker: PhantomData<T>,
    }

    impl<'a, T: PrimitiveElement> Builder<'a, T> {
        /// Allocates a fresh list of `element_count` elements in the pointer
        /// slot, discarding any existing value.
        pub fn init_in_pointer(
            pointer: PointerBuilder<'a>,
            element_count: ElementCount32,
        ) -> Result<Self> {
            let PointerBuilder { message, slice } = pointer;
            let storage = layout::init_list(
                message,
                slice,
                T::element_size(),
                element_count,
                StructSize::new(0, 0),
            )?;
            Ok(Self {
                message,
                storage,
                marker: PhantomData,
            })
        }

        /// Dereferences an existing list; a null pointer becomes an empty
        /// list of this element type.
        pub fn get_from_pointer(pointer: PointerBuilder<'a>) -> Result<Self> {
            let PointerBuilder { message, slice } = pointer;
            let storage = layout::deref_list_pointer_mut(
                message,
                slice,
                T::element_size(),
                StructSize::new(0, 0),
            )?;
            Ok(Self {
                message,
                storage,
                marker: PhantomData,
            })
        }

        pub fn len(&self) -> ElementCount32 {
            self.storage.element_count
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        pub fn get(&self, index: ElementCount32) -> Result<T> {
            assert!(index < self.storage.element_count, "index out of bounds");
            T::get(self.message, &self.storage, index)
        }

        pub fn set(&mut self, index: ElementCount32, value: T) -> Result<()> {
            assert!(index < self.storage.element_count, "index out of bounds");
            T::set(self.message, &self.storage, index, value)
        }
    }
}

pub mod struct_list {
    use crate::message::Capability;
    use crate::private::layout::{
        self, ElementSize, ListStorage, PointerBuilder, PointerReader, StructBuilder,
        StructReader, StructSize,
    };
    use crate::private::units::ElementCount32;
    use crate::Result;

    pub struct Reader<'a, C: Capability> {
        message: &'a crate::message::Message<C>,
        storage: Option<ListStorage>,
    }

    impl<'a, C: Capability> Reader<'a, C> {
        pub fn get_from_pointer(pointer: &PointerReader<'a, C>) -> Result<Self> {
            let storage = pointer.get_list(ElementSize::InlineComposite)?;
            Ok(Self {
                message: pointer.message,
                storage,
            })
        }

        pub fn len(&self) -> ElementCount32 {
            self.storage.map_or(0, |storage| storage.element_count)
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        pub fn get(&self, index: ElementCount32) -> StructReader<'a, C> {
            let Some(storage) = &self.storage else {
                panic!("index out of bounds: the list is empty");
            };
            assert!(index < storage.element_count, "index out of bounds");
            StructReader::new(self.message, Some(storage.element_struct(index)))
        }
    }

    pub struct Builder<'a> {
        message: &'a mut crate::message::Builder,
        storage: ListStorage,
    }

    impl<'a> Builder<'a> {
        pub fn init_in_pointer(
            pointer: PointerBuilder<'a>,
            element_count: ElementCount32,
            size: StructSize,
        ) -> Result<Self> {
            let PointerBuilder { message, slice } = pointer;
            let storage = layout::init_list(
                message,
                slice,
                ElementSize::InlineComposite,
                element_count,
                size,
            )?;
            Ok(Self {
                message,
                storage,
            })
        }

        pub fn get_from_pointer(pointer: PointerBuilder<'a>, size: StructSize) -> Result<Self> {
            let PointerBuilder { message, slice } = pointer;
            let storage = layout::deref_list_pointer_mut(
                message,
                slice,
                ElementSize::InlineComposite,
                size,
            )?;
            Ok(Self {
                message,
                storage,
            })
        }

        pub fn len(&self) -> ElementCount32 {
            self.storage.element_count
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        pub fn get(&mut self, index: ElementCount32) -> StructBuilder<'_> {
            assert!(index < self.storage.element_count, "index out of bounds");
            StructBuilder::new(self.message, self.storage.element_struct(index))
        }
    }
}

pub mod text_list {
    use crate::message::Capability;
    use crate::private::layout::{
        self, ElementSize, ListStorage, PointerBuilder, PointerReader, StructSize,
    };
    use crate::private::units::ElementCount32;
    use crate::Result;

    pub struct Reader<'a, C: Capability> {
        message: &'a crate::message::Message<C>,
        storage: Option<ListStorage>,
    }

    impl<'a, C: Capability> Reader<'a, C> {
        pub fn get_from_pointer(pointer: &PointerReader<'a, C>) -> Result<Self> {
            let storage = pointer.get_list(ElementSize::Pointer)?;
            Ok(Self {
                message: pointer.message,
                storage,
            })
        }

        pub fn len(&self) -> ElementCount32 {
            self.storage.map_or(0, |storage| storage.element_count)
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        /// A null element reads as the empty string.
        pub fn get(&self, index: ElementCount32) -> Result<String> {
            let Some(storage) = &self.storage else {
                panic!("index out of bounds: the list is empty");
            };
            assert!(index < storage.element_count, "index out of bounds");
            let element = PointerReader::new(self.message, Some(storage.element_pointer(index)));
            element.get_text("")
        }
    }

    pub struct Builder<'a> {
        message: &'a mut crate::message::Builder,
        storage: ListStorage,
    }

    impl<'a> Builder<'a> {
        pub fn init_in_pointer(
            pointer: PointerBuilder<'a>,
            element_count: ElementCount32,
        ) -> Result<Self> {
            let PointerBuilder { message, slice } = pointer;
            let storage = layout::init_list(
                message,
                slice,
                ElementSize::Pointer,
                element_count,
                StructSize::new(0, 0),
            )?;
            Ok(Self {
                message,
                storage,
            })
        }

        pub fn get_from_pointer(pointer: PointerBuilder<'a>) -> Result<Self> {
            let PointerBuilder { message, slice } = pointer;
            let storage = layout::deref_list_pointer_mut(
                message,
                slice,
                ElementSize::Pointer,
                StructSize::new(0, 0),
            )?;
            Ok(Self {
                message,
                storage,
            })
        }

        pub fn len(&self) -> ElementCount32 {
            self.storage.element_count
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        pub fn get(&self, index: ElementCount32) -> Result<String> {
            assert!(index < self.storage.element_count, "index out of bounds");
            let element =
                PointerReader::new(&*self.message, Some(self.storage.element_pointer(index)));
            element.get_text("")
        }

        /// Allocates a fresh byte list for `value` and installs it in the
        /// `index`th element slot.
        pub fn set(&mut self, index: ElementCount32, value: &str) -> Result<()> {
            assert!(index < self.storage.element_count, "index out of bounds");
            layout::write_text(self.message, self.storage.element_pointer(index), value)
        }
    }
}

pub mod data_list {
    use crate::message::Capability;
    use crate::private::layout::{
        self, ElementSize, ListStorage, PointerBuilder, PointerReader, StructSize,
    };
    use crate::private::units::ElementCount32;
    use crate::Result;

    pub struct Reader<'a, C: Capability> {
        message: &'a crate::message::Message<C>,
        storage: Option<ListStorage>,
    }

    impl<'a, C: Capability> Reader<'a, C> {
        pub fn get_from_pointer(pointer: &PointerReader<'a, C>) -> Result<Self> {
            let storage = pointer.get_list(ElementSize::Pointer)?;
            Ok(Self {
                message: pointer.message,
                storage,
            })
        }

        pub fn len(&self) -> ElementCount32 {
            self.storage.map_or(0, |storage| storage.element_count)
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        /// A null element reads as an empty blob.
        pub fn get(&self, index: ElementCount32) -> Result<Vec<u8>> {
            let Some(storage) = &self.storage else {
                panic!("index out of bounds: the list is empty");
            };
            assert!(index < storage.element_count, "index out of bounds");
            let element = PointerReader::new(self.message, Some(storage.element_pointer(index)));
            element.get_data(&[])
        }
    }

    pub struct Builder<'a> {
        message: &'a mut crate::message::Builder,
        storage: ListStorage,
    }

    impl<'a> Builder<'a> {
        pub fn init_in_pointer(
            pointer: PointerBuilder<'a>,
            element_count: ElementCount32,
        ) -> Result<Self> {
            let PointerBuilder { message, slice } = pointer;
            let storage = layout::init_list(
                message,
                slice,
                ElementSize::Pointer,
                element_count,
                StructSize::new(0, 0),
            )?;
            Ok(Self {
                message,
                storage,
            })
        }

        pub fn get_from_pointer(pointer: PointerBuilder<'a>) -> Result<Self> {
            let PointerBuilder { message, slice } = pointer;
            let storage = layout::deref_list_pointer_mut(
                message,
                slice,
                ElementSize::Pointer,
                StructSize::new(0, 0),
            )?;
            Ok(Self {
                message,
                storage,
            })
        }

        pub fn len(&self) -> ElementCount32 {
            self.storage.element_count
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        pub fn get(&self, index: ElementCount32) -> Result<Vec<u8>> {
            assert!(index < self.storage.element_count, "index out of bounds");
            let element =
                PointerReader::new(&*self.message, Some(self.storage.element_pointer(index)));
            element.get_data(&[])
        }

        pub fn set(&mut self, index: ElementCount32, value: &[u8]) -> Result<()> {
            assert!(index < self.storage.element_count, "index out of bounds");
            layout::write_data_blob(self.message, self.storage.element_pointer(index), value)
        }
    }
}
