//! Native objects - script-owned blocks of native memory
//!
//! Design: one zero-filled heap block per object, sized and aligned for its
//! descriptor and freed when the last script reference goes away. Arrays are
//! the same block with an element count and bounds-checked indexing.

#[cfg(test)]
mod tests;

use crate::error::{FfiError, FfiResult, ValueCategory};
use crate::marshal::{to_native, to_script};
use crate::types::{field_of, FieldKey, TypeDescriptor, TypeKind};
use crate::value::{RawPointer, Value};
use core::ffi::c_void;
use core::fmt;
use core::marker::PhantomData;
use core::ptr::NonNull;
use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::rc::Rc;

/// Owned native memory block
struct Block {
    ptr: NonNull<u8>,
    layout: Layout,
    size: usize,
    element: TypeDescriptor,
    count: usize,
    array: bool,
}

impl Block {
    fn new(element: TypeDescriptor, count: usize, array: bool) -> FfiResult<Self> {
        let size = element
            .size()
            .checked_mul(count)
            .ok_or_else(|| FfiError::Layout(format!("{} x {} overflows", count, element)))?;

        // Zero-sized requests still get a distinct one-byte block
        let layout = Layout::from_size_align(size.max(1), element.align().max(1))
            .map_err(|e| FfiError::Layout(e.to_string()))?;

        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).unwrap_or_else(|| handle_alloc_error(layout));

        Ok(Self { ptr, layout, size, element, count, array })
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

/// Script-visible native object, shared by reference
#[derive(Clone)]
pub struct NativeObject(Rc<Block>);

impl NativeObject {
    /// Zero-filled object of `count` elements
    ///
    /// An array descriptor yields an array object of its declared length;
    /// `count > 1` on a scalar or struct descriptor yields an array of that many.
    pub fn allocate(descriptor: &TypeDescriptor, count: usize) -> FfiResult<Self> {
        if count == 0 {
            return Err(FfiError::Layout("expect a positive size".into()));
        }
        if descriptor.kind() == TypeKind::Void {
            return Err(FfiError::Layout("cannot allocate a void object".into()));
        }

        let block = match descriptor.array_parts() {
            Some(_) if count > 1 => return Err(FfiError::Layout("nested array is not supported".into())),
            Some((element, len)) => Block::new(element.clone(), len, true)?,
            None => Block::new(descriptor.clone(), count, count > 1)?,
        };

        Ok(Self(Rc::new(block)))
    }

    /// Allocate and initialize from a script value; arrays are filled element by element
    pub fn with_value(descriptor: &TypeDescriptor, value: &Value) -> FfiResult<Self> {
        let object = Self::allocate(descriptor, 1)?;
        for index in 0..object.count() {
            object.element(index)?.write(value)?;
        }
        Ok(object)
    }

    /// Copy `descriptor.size()` bytes from `src` into a fresh object
    ///
    /// # Safety
    /// `src` must be readable for the descriptor's size.
    pub unsafe fn copy_of(descriptor: &TypeDescriptor, src: *const u8) -> FfiResult<Self> {
        let object = Self::allocate(descriptor, 1)?;
        core::ptr::copy_nonoverlapping(src, object.as_mut_ptr(), object.size_of());
        Ok(object)
    }

    /// Element descriptor (the object's own descriptor unless it is an array)
    #[inline]
    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.0.element
    }

    /// Number of elements; 1 for non-arrays
    #[inline]
    pub fn count(&self) -> usize {
        self.0.count
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        self.0.array
    }

    /// Total size in bytes
    #[inline]
    pub fn size_of(&self) -> usize {
        self.0.size
    }

    /// Same underlying block
    #[inline]
    pub fn ptr_eq(&self, other: &NativeObject) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    #[inline]
    pub(crate) fn as_mut_ptr(&self) -> *mut u8 {
        self.0.ptr.as_ptr()
    }

    /// Raw contents
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.0.ptr.as_ptr(), self.0.size) }
    }

    /// Base address
    #[inline]
    pub fn address(&self) -> RawPointer {
        RawPointer(self.0.ptr.cast::<c_void>())
    }

    /// Address `offset` bytes into the object; one-past-the-end is allowed
    pub fn address_of(&self, offset: usize) -> FfiResult<RawPointer> {
        if offset > self.size_of() {
            return Err(FfiError::Bounds {
                offset,
                size: 0,
                object_size: self.size_of(),
            });
        }
        let ptr = unsafe { self.0.ptr.as_ptr().add(offset) };
        Ok(RawPointer(unsafe { NonNull::new_unchecked(ptr.cast()) }))
    }

    /// Array element `index` (0-based)
    pub fn index(&self, index: usize) -> FfiResult<Element<'_>> {
        if !self.is_array() {
            return Err(FfiError::NotIndexable { kind: self.descriptor().kind() });
        }
        if index >= self.count() {
            return Err(FfiError::Index { index, len: self.count() });
        }
        self.element(index)
    }

    /// Member reached through a chain of field keys
    pub fn field(&self, keys: &[FieldKey<'_>]) -> FfiResult<Element<'_>> {
        if self.is_array() || !self.descriptor().is_struct() {
            let key = keys.first().map_or_else(String::new, ToString::to_string);
            return Err(FfiError::not_a_struct(key));
        }

        let (descriptor, offset) = field_of(self.descriptor(), keys)?;
        if offset + descriptor.size() > self.size_of() {
            return Err(FfiError::Bounds {
                offset,
                size: descriptor.size(),
                object_size: self.size_of(),
            });
        }
        Ok(Element::new(self, descriptor, offset))
    }

    pub fn get(&self, index: usize) -> FfiResult<Value> {
        self.index(index)?.read()
    }

    pub fn set(&self, index: usize, value: &Value) -> FfiResult<()> {
        self.index(index)?.write(value)
    }

    pub fn get_field(&self, keys: &[FieldKey<'_>]) -> FfiResult<Value> {
        self.field(keys)?.read()
    }

    pub fn set_field(&self, keys: &[FieldKey<'_>], value: &Value) -> FfiResult<()> {
        self.field(keys)?.write(value)
    }

    /// Value at offset 0 under the element descriptor
    pub fn read(&self) -> FfiResult<Value> {
        Element::new(self, self.descriptor().clone(), 0).read()
    }

    /// Overwrite the value at offset 0 under the element descriptor
    pub fn write(&self, value: &Value) -> FfiResult<()> {
        Element::new(self, self.descriptor().clone(), 0).write(value)
    }

    /// Byte copy from an object of the same type
    ///
    /// Aggregates must share the descriptor instance; scalars the kind.
    pub fn copy_from(&self, other: &NativeObject) -> FfiResult<()> {
        if self.ptr_eq(other) {
            return Ok(());
        }

        let mine = self.descriptor();
        let theirs = other.descriptor();
        let same_type = if mine.kind().is_aggregate() {
            mine.is_same(theirs)
        } else {
            mine.kind() == theirs.kind() && mine.size() == theirs.size()
        };

        if !same_type || self.count() != other.count() || self.is_array() != other.is_array() {
            return Err(FfiError::TypeMismatch {
                expected: mine.kind(),
                got: ValueCategory::NativeObject,
            });
        }

        unsafe {
            core::ptr::copy_nonoverlapping(other.as_mut_ptr(), self.as_mut_ptr(), self.size_of());
        }
        Ok(())
    }

    fn element(&self, index: usize) -> FfiResult<Element<'_>> {
        let descriptor = self.descriptor().clone();
        let offset = index * descriptor.size();
        Ok(Element::new(self, descriptor, offset))
    }
}

impl PartialEq for NativeObject {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for NativeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeObject")
            .field("descriptor", self.descriptor())
            .field("count", &self.count())
            .field("address", &self.0.ptr)
            .finish()
    }
}

/// Typed view of a region inside a [`NativeObject`]
pub struct Element<'a> {
    ptr: *mut u8,
    offset: usize,
    descriptor: TypeDescriptor,
    _owner: PhantomData<&'a NativeObject>,
}

impl<'a> Element<'a> {
    fn new(owner: &'a NativeObject, descriptor: TypeDescriptor, offset: usize) -> Self {
        Self {
            ptr: unsafe { owner.as_mut_ptr().add(offset) },
            offset,
            descriptor,
            _owner: PhantomData,
        }
    }

    #[inline]
    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    /// Byte offset from the start of the owning object
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn address(&self) -> RawPointer {
        RawPointer(unsafe { NonNull::new_unchecked(self.ptr.cast()) })
    }

    /// Aggregates come back as fresh objects holding a copy
    pub fn read(&self) -> FfiResult<Value> {
        unsafe { to_script(self.ptr, &self.descriptor) }
    }

    pub fn write(&self, value: &Value) -> FfiResult<()> {
        unsafe { to_native(value, &self.descriptor, self.ptr) }
    }
}
