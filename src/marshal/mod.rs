//! Value marshaler - script values to raw native memory and back
//!
//! Design: a total match over (value category, descriptor kind). Writes and
//! reads are unaligned so the same code serves struct members, array
//! elements, argument slots and arbitrary dereferenced addresses.

mod extended;


pub use extended::ExtendedFormat;

use crate::error::{FfiError, FfiResult, ValueCategory};
use crate::logging::log_marshal_error;
use crate::object::NativeObject;
use crate::types::{Primitive, TypeDescriptor, TypeKind, TypeRegistry};
use crate::value::{Callable, Value};
use core::ffi::c_void;
use core::ptr;

/// Write `value` into `dst` as `descriptor`
///
/// Integers wider than the target are truncated to its low bits.
///
/// # Safety
/// `dst` must be writable for `descriptor.size()` bytes.
pub unsafe fn to_native(value: &Value, descriptor: &TypeDescriptor, dst: *mut u8) -> FfiResult<()> {
    let result = write_value(value, descriptor, dst);
    if let Err(err) = &result {
        log_marshal_error(err);
    }
    result
}

unsafe fn write_value(value: &Value, descriptor: &TypeDescriptor, dst: *mut u8) -> FfiResult<()> {
    let kind = descriptor.kind();
    let mismatch = || FfiError::TypeMismatch {
        expected: kind,
        got: value.category(),
    };

    match kind {
        TypeKind::Void => Err(mismatch()),

        k if k.is_integer() => match value {
            Value::Bool(b) => {
                write_int(k, dst, i64::from(*b));
                Ok(())
            }
            Value::Int(i) => {
                write_int(k, dst, *i);
                Ok(())
            }
            Value::Object(object) => copy_exact(object, descriptor, dst),
            _ => Err(mismatch()),
        },

        k if k.is_float() => {
            let f = match value {
                Value::Bool(b) => f64::from(u8::from(*b)),
                Value::Int(i) => *i as f64,
                Value::Float(f) => *f,
                Value::Object(object) => return copy_exact(object, descriptor, dst),
                _ => return Err(mismatch()),
            };
            match k {
                TypeKind::F32 => (dst as *mut f32).write_unaligned(f as f32),
                TypeKind::F64 => (dst as *mut f64).write_unaligned(f),
                _ => {
                    let out = core::slice::from_raw_parts_mut(dst, descriptor.size());
                    ExtendedFormat::for_size(descriptor.size()).encode(f, out);
                }
            }
            Ok(())
        }

        TypeKind::Pointer => {
            let address: *const c_void = match value {
                Value::Nil => ptr::null(),
                Value::Str(s) => s.as_ptr().cast(),
                Value::Pointer(p) => p.as_ptr(),
                Value::Function(Callable::Native(code)) => code.as_ptr(),
                Value::Function(Callable::Script(_)) => return Err(FfiError::UnsupportedClosure),
                // A destroyed closure has no entry left to hand out
                Value::Closure(closure) => closure.code().map_or(ptr::null(), |code| code.as_ptr()),
                Value::Object(object) if object.is_array() => object.address().as_ptr(),
                Value::Object(object) => return copy_exact(object, descriptor, dst),
                _ => return Err(mismatch()),
            };
            (dst as *mut *const c_void).write_unaligned(address);
            Ok(())
        }

        // Struct, complex and array contents only come from a native object
        _ => match value {
            Value::Object(object) => copy_exact(object, descriptor, dst),
            _ => Err(mismatch()),
        },
    }
}

/// Byte copy of a whole object whose type matches the destination
unsafe fn copy_exact(object: &NativeObject, descriptor: &TypeDescriptor, dst: *mut u8) -> FfiResult<()> {
    let source = object.descriptor();

    let compatible = if descriptor.is_array() {
        object.is_array()
            && descriptor
                .array_parts()
                .map_or(false, |(element, len)| element.is_same(source) && len == object.count())
    } else if object.is_array() {
        false
    } else if descriptor.kind().is_aggregate() {
        source.is_same(descriptor)
    } else {
        source.kind() == descriptor.kind() && source.size() <= descriptor.size()
    };

    if !compatible {
        return Err(FfiError::TypeMismatch {
            expected: descriptor.kind(),
            got: ValueCategory::NativeObject,
        });
    }

    let len = object.size_of().min(descriptor.size());
    ptr::copy(object.as_mut_ptr() as *const u8, dst, len);
    Ok(())
}

#[inline]
unsafe fn write_int(kind: TypeKind, dst: *mut u8, v: i64) {
    match kind {
        TypeKind::I8 => (dst as *mut i8).write_unaligned(v as i8),
        TypeKind::U8 => dst.write_unaligned(v as u8),
        TypeKind::I16 => (dst as *mut i16).write_unaligned(v as i16),
        TypeKind::U16 => (dst as *mut u16).write_unaligned(v as u16),
        TypeKind::I32 => (dst as *mut i32).write_unaligned(v as i32),
        TypeKind::U32 => (dst as *mut u32).write_unaligned(v as u32),
        TypeKind::I64 => (dst as *mut i64).write_unaligned(v),
        TypeKind::U64 => (dst as *mut u64).write_unaligned(v as u64),
        _ => unreachable!("write_int on {}", kind),
    }
}

/// Read a `descriptor` value from `src`
///
/// Aggregates are copied into a fresh [`NativeObject`]; the source is not retained.
///
/// # Safety
/// `src` must be readable for `descriptor.size()` bytes.
pub unsafe fn to_script(src: *const u8, descriptor: &TypeDescriptor) -> FfiResult<Value> {
    Ok(match descriptor.kind() {
        TypeKind::Void => Value::Nil,
        TypeKind::I8 => Value::Int(i64::from((src as *const i8).read_unaligned())),
        TypeKind::U8 => Value::Int(i64::from(src.read_unaligned())),
        TypeKind::I16 => Value::Int(i64::from((src as *const i16).read_unaligned())),
        TypeKind::U16 => Value::Int(i64::from((src as *const u16).read_unaligned())),
        TypeKind::I32 => Value::Int(i64::from((src as *const i32).read_unaligned())),
        TypeKind::U32 => Value::Int(i64::from((src as *const u32).read_unaligned())),
        TypeKind::I64 => Value::Int((src as *const i64).read_unaligned()),
        // Wraps above i64::MAX, same as the script integer type
        TypeKind::U64 => Value::Int((src as *const u64).read_unaligned() as i64),
        TypeKind::F32 => Value::Float(f64::from((src as *const f32).read_unaligned())),
        TypeKind::F64 => Value::Float((src as *const f64).read_unaligned()),
        TypeKind::LongDouble => {
            let bytes = core::slice::from_raw_parts(src, descriptor.size());
            Value::Float(ExtendedFormat::for_size(descriptor.size()).decode(bytes))
        }
        TypeKind::Pointer => Value::pointer((src as *const *mut c_void).read_unaligned()),
        TypeKind::Struct | TypeKind::Complex | TypeKind::Array => {
            Value::Object(NativeObject::copy_of(descriptor, src)?)
        }
    })
}

/// Native descriptor an extra (variadic) argument is passed as
pub fn variadic_descriptor(types: &TypeRegistry, value: &Value, index: usize) -> FfiResult<TypeDescriptor> {
    match value {
        Value::Bool(_) | Value::Int(_) => Ok(types.default_int()),
        Value::Float(_) => Ok(types.primitive(Primitive::F64)),
        Value::Nil | Value::Str(_) | Value::Pointer(_) | Value::Closure(_) | Value::Function(Callable::Native(_)) => {
            Ok(types.primitive(Primitive::Pointer))
        }
        Value::Object(object) if object.is_array() => Ok(types.primitive(Primitive::Pointer)),
        Value::Object(object) => Ok(object.descriptor().clone()),
        Value::Function(Callable::Script(_)) => Err(FfiError::UnsupportedVariadicArg {
            index,
            got: value.category(),
        }),
    }
}

/// Address a pointer-like value refers to
fn address_of(value: &Value) -> FfiResult<*mut u8> {
    match value {
        Value::Pointer(p) => Ok(p.as_ptr().cast()),
        Value::Object(object) => Ok(object.as_mut_ptr()),
        Value::Str(s) => Ok(s.as_ptr() as *mut u8),
        other => Err(FfiError::TypeMismatch {
            expected: TypeKind::Pointer,
            got: other.category(),
        }),
    }
}

/// Read `descriptor` at `pointer + offset * element_size`
///
/// `element_size` defaults to the descriptor's size. Array descriptors copy
/// the whole array into a new object.
///
/// # Safety
/// The addressed range must be readable for `descriptor.size()` bytes.
pub unsafe fn deref(
    pointer: &Value,
    descriptor: &TypeDescriptor,
    offset: usize,
    element_size: Option<usize>,
) -> FfiResult<Value> {
    let base = address_of(pointer)?;
    let stride = element_size.unwrap_or_else(|| descriptor.size());
    let src = base.wrapping_add(offset.wrapping_mul(stride));
    to_script(src, descriptor)
}

/// Numeric view of a scalar object: numbers as-is, pointers as their address, otherwise nil
pub fn to_number(object: &NativeObject) -> FfiResult<Value> {
    if object.is_array() {
        return Ok(Value::Nil);
    }
    let kind = object.descriptor().kind();
    if kind.is_integer() || kind.is_float() {
        return object.read();
    }
    if kind == TypeKind::Pointer {
        let address = unsafe { (object.as_mut_ptr() as *const usize).read_unaligned() };
        return Ok(Value::Int(address as i64));
    }
    Ok(Value::Nil)
}
