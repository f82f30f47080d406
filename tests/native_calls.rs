//! Calls into real native code through the libffi engine

use core::ffi::c_void;
use dynffi::abi::LibffiEngine;
use dynffi::marshal::deref;
use dynffi::value::RawPointer;
use dynffi::{Closure, CodePtr, Ffi, FfiError, NativeObject, Primitive, ScriptFn, TypeKind, Value};
use std::cell::RefCell;
use std::rc::Rc;

#[repr(C)]
#[derive(Clone, Copy)]
struct Vec2 {
    x: f64,
    y: f64,
}

extern "C" fn add(a: i32, b: i32) -> i32 {
    a.wrapping_add(b)
}

extern "C" fn negate_byte(v: i8) -> i8 {
    v.wrapping_neg()
}

extern "C" fn scale(v: Vec2, k: f64) -> Vec2 {
    Vec2 { x: v.x * k, y: v.y * k }
}

extern "C" fn apply(f: extern "C" fn(i32, i32) -> i32, a: i32, b: i32) -> i32 {
    f(a, b)
}

extern "C" fn call0(f: extern "C" fn() -> i32) -> i32 {
    f()
}

fn ffi() -> Ffi {
    Ffi::new(Rc::new(LibffiEngine::new()))
}

fn code(ptr: *const c_void) -> CodePtr {
    CodePtr::from_ptr(ptr)
}

#[test]
fn test_fixed_call() {
    let ffi = ffi();
    let int32 = ffi.types().primitive(Primitive::I32);
    let function = ffi
        .function(code(add as *const c_void), int32.clone(), vec![int32.clone(), int32])
        .unwrap();

    let out = unsafe { function.call(&[Value::Int(3), Value::Int(4)]) }.unwrap();
    assert_eq!(out, Value::Int(7));

    let err = unsafe { function.call(&[Value::Int(3)]) }.unwrap_err();
    assert_eq!(err, FfiError::Arity { expected: 2, got: 1 });
}

#[test]
fn test_small_integer_return() {
    let ffi = ffi();
    let int8 = ffi.types().primitive(Primitive::I8);
    let function = ffi
        .function(code(negate_byte as *const c_void), int8.clone(), vec![int8])
        .unwrap();

    assert_eq!(unsafe { function.call(&[Value::Int(5)]) }.unwrap(), Value::Int(-5));
    assert_eq!(unsafe { function.call(&[Value::Int(300)]) }.unwrap(), Value::Int(-44));
}

#[test]
fn test_struct_by_value() {
    let ffi = ffi();
    let types = ffi.types();
    let double = types.primitive(Primitive::F64);
    let vec2 = types
        .struct_of(&[(double.clone(), Some("x")), (double.clone(), Some("y"))])
        .unwrap();
    assert_eq!(vec2.size(), core::mem::size_of::<Vec2>());

    let function = ffi
        .function(code(scale as *const c_void), vec2.clone(), vec![vec2.clone(), double])
        .unwrap();

    let v = NativeObject::allocate(&vec2, 1).unwrap();
    v.set_field(&["x".into()], &Value::Float(1.5)).unwrap();
    v.set_field(&["y".into()], &Value::Float(-2.0)).unwrap();

    let out = unsafe { function.call(&[Value::Object(v), Value::Float(2.0)]) }.unwrap();
    let out = out.as_object().unwrap();
    assert!(out.descriptor().is_same(&vec2));
    assert_eq!(out.get_field(&["x".into()]).unwrap(), Value::Float(3.0));
    assert_eq!(out.get_field(&["y".into()]).unwrap(), Value::Float(-4.0));
}

#[test]
fn test_variadic_snprintf() {
    let ffi = ffi();
    let types = ffi.types();
    let pointer = types.primitive(Primitive::Pointer);
    let size_t = types.named("size_t").unwrap();
    let int = types.named("int").unwrap();

    let function = ffi
        .function(
            code(libc::snprintf as *const c_void),
            int,
            vec![pointer.clone(), size_t, pointer],
        )
        .unwrap();

    let buf = NativeObject::allocate(&types.primitive(Primitive::U8), 64).unwrap();
    let args = [
        Value::Object(buf.clone()),
        Value::Int(64),
        Value::string("%d-%.2f-%s"),
        Value::Int(42),
        Value::Float(0.5),
        Value::string("ok"),
    ];
    let written = unsafe { function.call(&args) }.unwrap();

    assert_eq!(written, Value::Int(10));
    assert_eq!(&buf.as_bytes()[..11], b"42-0.50-ok\0");
    assert_eq!(function.stats().variadic_calls, 1);
}

#[test]
fn test_callback_through_trampoline() {
    let ffi = ffi();
    let int32 = ffi.types().primitive(Primitive::I32);
    let pointer = ffi.types().primitive(Primitive::Pointer);

    let callable: ScriptFn = Rc::new(|args| {
        let a = args[0].as_int().unwrap_or(0);
        let b = args[1].as_int().unwrap_or(0);
        Ok(vec![Value::Int(a * 10 + b)])
    });
    let closure = ffi
        .closure(int32.clone(), vec![int32.clone(), int32.clone()], callable)
        .unwrap();

    let function = ffi
        .function(code(apply as *const c_void), int32.clone(), vec![pointer, int32.clone(), int32])
        .unwrap();
    let out = unsafe { function.call(&[Value::Closure(closure.clone()), Value::Int(4), Value::Int(2)]) }.unwrap();
    assert_eq!(out, Value::Int(42));

    closure.destroy();
    closure.destroy();
    assert_eq!(ffi.runtime().reference_count(), 0);
}

#[test]
fn test_callback_dropping_its_own_closure() {
    let ffi = ffi();
    let int32 = ffi.types().primitive(Primitive::I32);
    let pointer = ffi.types().primitive(Primitive::Pointer);

    let slot: Rc<RefCell<Option<Closure>>> = Rc::new(RefCell::new(None));
    let held = slot.clone();
    let callable: ScriptFn = Rc::new(move |_| {
        held.borrow_mut().take();
        Ok(vec![Value::Int(0x1ff)])
    });
    let closure = ffi.closure(int32.clone(), vec![], callable).unwrap();
    let entry = closure.code().and_then(|c| RawPointer::new(c.as_ptr() as *mut c_void)).unwrap();
    *slot.borrow_mut() = Some(closure);

    let function = ffi
        .function(code(call0 as *const c_void), int32, vec![pointer])
        .unwrap();
    let out = unsafe { function.call(&[Value::Pointer(entry)]) }.unwrap();
    assert_eq!(out, Value::Int(0x1ff));
    assert!(slot.borrow().is_none());
    assert_eq!(ffi.runtime().reference_count(), 0);
}

#[test]
fn test_qsort_comparator() {
    let ffi = ffi();
    let types = ffi.types().clone();
    let int32 = types.primitive(Primitive::I32);
    let pointer = types.primitive(Primitive::Pointer);

    let element = int32.clone();
    let compare: ScriptFn = Rc::new(move |args| {
        let a = unsafe { deref(&args[0], &element, 0, None) }?.as_int().unwrap_or(0);
        let b = unsafe { deref(&args[1], &element, 0, None) }?.as_int().unwrap_or(0);
        Ok(vec![Value::Int((a > b) as i64 - (a < b) as i64)])
    });
    let comparator = ffi
        .closure(int32.clone(), vec![pointer.clone(), pointer.clone()], compare)
        .unwrap();

    let size_t = types.named("size_t").unwrap();
    let qsort = ffi
        .function(
            code(libc::qsort as *const c_void),
            types.primitive(Primitive::Void),
            vec![pointer.clone(), size_t.clone(), size_t, pointer],
        )
        .unwrap();

    let values = [5, -1, 9, 0, 3];
    let array = NativeObject::allocate(&int32, values.len()).unwrap();
    for (i, v) in values.iter().enumerate() {
        array.set(i, &Value::Int(*v)).unwrap();
    }

    let out = unsafe {
        qsort.call(&[
            Value::Object(array.clone()),
            Value::Int(values.len() as i64),
            Value::Int(4),
            Value::Closure(comparator),
        ])
    }
    .unwrap();
    assert_eq!(out, Value::Nil);

    let sorted: Vec<Value> = (0..values.len()).map(|i| array.get(i).unwrap()).collect();
    assert_eq!(sorted, [-1, 0, 3, 5, 9].map(Value::Int).to_vec());
    assert!(!ffi.runtime().has_pending_errors());
}

#[test]
fn test_complex_is_rejected_by_libffi_engine() {
    let ffi = ffi();
    let complex = ffi.types().complex(Primitive::F64).unwrap();
    assert_eq!(complex.kind(), TypeKind::Complex);
    assert!(matches!(
        ffi.interface(complex, vec![]),
        Err(FfiError::BadSignature(_))
    ));
}
