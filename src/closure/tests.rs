use super::*;
use crate::abi::mock::MockEngine;
use crate::abi::{AbiError, CallingConvention};
use crate::config::{CallbackConfig, FfiConfig};
use crate::error::ValueCategory;
use crate::types::{Primitive, TypeRegistry};
use crate::Value;

struct Fixture {
    engine: Rc<MockEngine>,
    types: TypeRegistry,
    runtime: Runtime,
}

impl Fixture {
    fn new() -> Self {
        Self::with_runtime(Runtime::default())
    }

    fn with_runtime(runtime: Runtime) -> Self {
        let engine = Rc::new(MockEngine::new());
        let types = TypeRegistry::new(engine.clone());
        Self { engine, types, runtime }
    }

    fn interface(&self, ret: Primitive, args: &[Primitive]) -> CallInterface {
        let args = args.iter().map(|&p| self.types.primitive(p)).collect();
        CallInterface::build(&*self.engine, self.types.primitive(ret), args, CallingConvention::C).unwrap()
    }

    fn closure<F>(&self, ret: Primitive, args: &[Primitive], callable: F) -> Closure
    where
        F: Fn(&[Value]) -> FfiResult<Vec<Value>> + 'static,
    {
        Closure::create(self.engine.clone(), &self.runtime, self.interface(ret, args), Rc::new(callable)).unwrap()
    }

    fn adder(&self) -> Closure {
        self.closure(Primitive::I32, &[Primitive::I32, Primitive::I32], |args| {
            let a = args[0].as_int().unwrap_or(0);
            let b = args[1].as_int().unwrap_or(0);
            Ok(vec![Value::Int(a + b)])
        })
    }
}

fn int_args(values: &mut [i32]) -> Vec<*mut c_void> {
    values.iter_mut().map(|v| v as *mut i32 as *mut c_void).collect()
}

#[test]
fn test_dispatch_round_trip() {
    let fx = Fixture::new();
    let closure = fx.adder();

    let mut values = [3, 4];
    let args = int_args(&mut values);
    let mut result = [0u8; 16];
    unsafe { closure.dispatch(&args, result.as_mut_ptr().cast()) }.unwrap();
    assert_eq!(i32::from_ne_bytes([result[0], result[1], result[2], result[3]]), 7);
}

#[test]
fn test_native_caller_through_trampoline() {
    let fx = Fixture::new();
    let closure = fx.adder();
    let code = closure.code().unwrap();

    let mut values = [3, 4];
    let args = int_args(&mut values);
    let mut result = 0i32;
    let called = unsafe { fx.engine.call_trampoline(code, &args, &mut result as *mut i32 as *mut c_void) };
    assert!(called);
    assert_eq!(result, 7);
    assert!(!fx.runtime.has_pending_errors());
}

#[test]
fn test_destroy_is_idempotent() {
    let fx = Fixture::new();
    let closure = fx.adder();
    let code = closure.code().unwrap();
    assert_eq!(fx.engine.live_trampolines(), 1);
    assert_eq!(fx.runtime.reference_count(), 1);

    closure.destroy();
    closure.destroy();
    assert!(!closure.is_live());
    assert_eq!(closure.code(), None);
    assert_eq!(fx.engine.freed_trampolines(), 1);
    assert_eq!(fx.runtime.reference_count(), 0);

    let mut result = 0i32;
    assert!(!unsafe { fx.engine.call_trampoline(code, &[], &mut result as *mut i32 as *mut c_void) });

    drop(closure);
    assert_eq!(fx.engine.freed_trampolines(), 1);
}

#[test]
fn test_drop_releases_everything() {
    let fx = Fixture::new();
    let closure = fx.adder();
    let alias = closure.clone();

    drop(closure);
    assert_eq!(fx.engine.live_trampolines(), 1);
    drop(alias);
    assert_eq!(fx.engine.live_trampolines(), 0);
    assert_eq!(fx.runtime.reference_count(), 0);
}

#[test]
fn test_failed_creation_leaves_nothing_behind() {
    let fx = Fixture::new();
    fx.engine.refuse_trampolines(true);

    let callable: ScriptFn = Rc::new(|_| Ok(vec![]));
    let err = Closure::create(
        fx.engine.clone(),
        &fx.runtime,
        fx.interface(Primitive::Void, &[]),
        callable.clone(),
    )
    .unwrap_err();

    assert_eq!(err, FfiError::NativePrep(AbiError::AllocationFailed));
    assert_eq!(fx.runtime.reference_count(), 0);
    assert_eq!(Rc::strong_count(&callable), 1);
}

#[test]
fn test_return_conversion_failure_is_raised() {
    let fx = Fixture::new();
    let closure = fx.closure(Primitive::I32, &[], |_| Ok(vec![Value::string("seven")]));

    let mut result = -1i32;
    let called = unsafe {
        fx.engine
            .call_trampoline(closure.code().unwrap(), &[], &mut result as *mut i32 as *mut c_void)
    };
    assert!(called);
    assert_eq!(result, 0);

    let errors = fx.runtime.take_pending_errors();
    assert_eq!(
        errors,
        vec![FfiError::TypeMismatch { expected: TypeKind::I32, got: ValueCategory::String }]
    );
}

#[test]
fn test_script_error_is_raised() {
    let fx = Fixture::new();
    let closure = fx.closure(Primitive::F64, &[Primitive::F64], |_| Err(FfiError::Script("boom".into())));

    let mut x = 1.0f64;
    let args = [&mut x as *mut f64 as *mut c_void];
    let mut result = 9.0f64;
    unsafe {
        fx.engine
            .call_trampoline(closure.code().unwrap(), &args, &mut result as *mut f64 as *mut c_void);
    }
    assert_eq!(result, 0.0);
    assert_eq!(fx.runtime.take_pending_errors(), vec![FfiError::Script("boom".into())]);
}

#[test]
fn test_stack_exhaustion_is_fatal() {
    let runtime = Runtime::new(FfiConfig {
        callback: CallbackConfig {
            stack_limit: 2,
            ..CallbackConfig::default()
        },
        ..FfiConfig::default()
    });
    let fx = Fixture::with_runtime(runtime);
    let closure = fx.adder();

    let mut values = [1, 2];
    let args = int_args(&mut values);
    let mut result = 0i32;
    let fault = unsafe { closure.dispatch(&args, &mut result as *mut i32 as *mut c_void) }.unwrap_err();
    assert_eq!(fault, DispatchFault::Fatal(FfiError::StackOverflow { needed: 3, available: 2 }));
    assert_eq!(fx.runtime.stack_in_use(), 0);
}

#[test]
fn test_void_callback_sees_converted_arguments() {
    let fx = Fixture::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let closure = fx.closure(Primitive::Void, &[Primitive::U8, Primitive::Pointer], move |args| {
        sink.borrow_mut().extend_from_slice(args);
        Ok(vec![Value::Int(99)])
    });

    let mut byte = 200u8;
    let mut pointer: *mut c_void = core::ptr::null_mut();
    let args = [
        &mut byte as *mut u8 as *mut c_void,
        &mut pointer as *mut *mut c_void as *mut c_void,
    ];
    unsafe { closure.dispatch(&args, core::ptr::null_mut()) }.unwrap();
    assert_eq!(*seen.borrow(), vec![Value::Int(200), Value::Nil]);
}

#[test]
fn test_callable_may_drop_its_closure() {
    let fx = Fixture::new();
    let slot: Rc<RefCell<Option<Closure>>> = Rc::new(RefCell::new(None));
    let held = slot.clone();
    let closure = fx.closure(Primitive::I32, &[], move |_| {
        held.borrow_mut().take();
        Ok(vec![Value::Int(1)])
    });
    let code = closure.code().unwrap();
    *slot.borrow_mut() = Some(closure);

    let mut result = 0i32;
    assert!(unsafe { fx.engine.call_trampoline(code, &[], &mut result as *mut i32 as *mut c_void) });
    assert_eq!(result, 1);
    assert_eq!(fx.engine.live_trampolines(), 0);
    assert_eq!(fx.runtime.reference_count(), 0);
}

#[test]
fn test_closure_marshals_as_code_pointer() {
    let fx = Fixture::new();
    let closure = fx.adder();
    let pointer = fx.types.primitive(Primitive::Pointer);

    let mut out: usize = 0;
    unsafe { to_native(&Value::Closure(closure.clone()), &pointer, &mut out as *mut usize as *mut u8) }.unwrap();
    assert_eq!(out, closure.code().unwrap().addr());

    closure.destroy();
    unsafe { to_native(&Value::Closure(closure), &pointer, &mut out as *mut usize as *mut u8) }.unwrap();
    assert_eq!(out, 0);
}
