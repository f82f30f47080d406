//! Natural C layout - sizes, alignments, member offsets
//!
//! Matches what a C compiler produces for plain structs on the host:
//! each member at the next multiple of its alignment, total size padded
//! to the largest member alignment.

use super::AbiError;
use crate::types::{Primitive, TypeDescriptor};
use core::mem::{align_of, size_of};
use core::ffi::c_void;

/// Computed layout of a struct
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    pub size: usize,
    pub align: usize,
    pub offsets: Vec<usize>,
}

#[cfg(all(target_arch = "x86_64", not(target_os = "windows")))]
const LONG_DOUBLE: (usize, usize) = (16, 16);

#[cfg(all(target_arch = "x86", not(target_os = "windows")))]
const LONG_DOUBLE: (usize, usize) = (12, 4);

#[cfg(all(target_arch = "aarch64", not(any(target_os = "windows", target_vendor = "apple"))))]
const LONG_DOUBLE: (usize, usize) = (16, 16);

#[cfg(not(any(
    all(target_arch = "x86_64", not(target_os = "windows")),
    all(target_arch = "x86", not(target_os = "windows")),
    all(target_arch = "aarch64", not(any(target_os = "windows", target_vendor = "apple")))
)))]
const LONG_DOUBLE: (usize, usize) = (size_of::<f64>(), align_of::<f64>());

/// Host size and alignment of a primitive
pub const fn primitive_layout(primitive: Primitive) -> (usize, usize) {
    match primitive {
        Primitive::Void => (0, 1),
        Primitive::I8 => (size_of::<i8>(), align_of::<i8>()),
        Primitive::U8 => (size_of::<u8>(), align_of::<u8>()),
        Primitive::I16 => (size_of::<i16>(), align_of::<i16>()),
        Primitive::U16 => (size_of::<u16>(), align_of::<u16>()),
        Primitive::I32 => (size_of::<i32>(), align_of::<i32>()),
        Primitive::U32 => (size_of::<u32>(), align_of::<u32>()),
        Primitive::I64 => (size_of::<i64>(), align_of::<i64>()),
        Primitive::U64 => (size_of::<u64>(), align_of::<u64>()),
        Primitive::F32 => (size_of::<f32>(), align_of::<f32>()),
        Primitive::F64 => (size_of::<f64>(), align_of::<f64>()),
        Primitive::LongDouble => LONG_DOUBLE,
        Primitive::Pointer => (size_of::<*const c_void>(), align_of::<*const c_void>()),
    }
}

/// Round `offset` up to a multiple of `align` (a power of two)
#[inline]
pub const fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

/// Lay members out in order with natural alignment
pub fn natural_layout(members: &[TypeDescriptor]) -> Result<StructLayout, AbiError> {
    if members.is_empty() {
        return Err(AbiError::BadTypedef("struct without members".into()));
    }

    let mut offsets = Vec::with_capacity(members.len());
    let mut offset = 0usize;
    let mut align = 1usize;

    for member in members {
        if member.size() == 0 {
            return Err(AbiError::BadTypedef(format!("zero-sized member {}", member)));
        }
        if !member.align().is_power_of_two() {
            return Err(AbiError::BadTypedef(format!(
                "alignment {} of {} is not a power of two",
                member.align(),
                member
            )));
        }

        offset = align_up(offset, member.align());
        offsets.push(offset);
        offset = offset
            .checked_add(member.size())
            .ok_or_else(|| AbiError::BadTypedef("struct size overflows".into()))?;
        align = align.max(member.align());
    }

    Ok(StructLayout {
        size: align_up(offset, align),
        align,
        offsets,
    })
}
