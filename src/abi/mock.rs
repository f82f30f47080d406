//! In-process ABI engine for tests and benchmarks
//!
//! "Native" functions are Rust closures registered under fake code
//! addresses. Trampolines are table entries that [`MockEngine::call_trampoline`]
//! dispatches through, exactly as a native caller would through real code.

use super::{AbiEngine, AbiError, CallPlan, CallingConvention, CodePtr, DispatchFn, Trampoline};
use crate::types::{TypeDescriptor, TypeKind};
use core::ffi::c_void;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

type MockFn = Box<dyn Fn(&CallPlan, &[*mut c_void], *mut c_void)>;

const BASE_ADDRESS: usize = 0x1000;

#[derive(Clone, Copy)]
struct TrampolineEntry {
    dispatch: DispatchFn,
    ctx: *mut c_void,
}

#[derive(Default)]
pub struct MockEngine {
    functions: RefCell<HashMap<usize, MockFn>>,
    trampolines: RefCell<HashMap<usize, TrampolineEntry>>,
    next_slot: Cell<usize>,
    prepared: Cell<usize>,
    freed: Cell<usize>,
    refuse_trampolines: Cell<bool>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fake native function and return its address
    pub fn register<F>(&self, function: F) -> CodePtr
    where
        F: Fn(&CallPlan, &[*mut c_void], *mut c_void) + 'static,
    {
        let code = self.next_code();
        self.functions.borrow_mut().insert(code.addr(), Box::new(function));
        code
    }

    /// Number of successful `prepare_call`s so far
    #[inline]
    pub fn prepared_calls(&self) -> usize {
        self.prepared.get()
    }

    #[inline]
    pub fn freed_trampolines(&self) -> usize {
        self.freed.get()
    }

    #[inline]
    pub fn live_trampolines(&self) -> usize {
        self.trampolines.borrow().len()
    }

    /// Make subsequent `make_trampoline` calls fail
    pub fn refuse_trampolines(&self, refuse: bool) {
        self.refuse_trampolines.set(refuse);
    }

    /// Call through a trampoline the way native code would
    ///
    /// Returns false if `code` is not a live trampoline.
    ///
    /// # Safety
    /// `args` and `result` must satisfy the [`DispatchFn`] contract for the
    /// trampoline's plan.
    pub unsafe fn call_trampoline(&self, code: CodePtr, args: &[*mut c_void], result: *mut c_void) -> bool {
        let entry = self.trampolines.borrow().get(&code.addr()).copied();
        match entry {
            Some(entry) => {
                (entry.dispatch)(entry.ctx, args.as_ptr(), result);
                true
            }
            None => false,
        }
    }

    fn next_code(&self) -> CodePtr {
        let slot = self.next_slot.get();
        self.next_slot.set(slot + 1);
        CodePtr::from_ptr((BASE_ADDRESS + slot * 0x10) as *const c_void)
    }

    fn check(descriptor: &TypeDescriptor, position: &str) -> Result<(), AbiError> {
        match descriptor.kind() {
            TypeKind::Array => Err(AbiError::BadTypedef(format!("{} passes an array by value", position))),
            _ => Ok(()),
        }
    }
}

/// Read argument `index` as `T`
///
/// # Safety
/// The argument must hold a `T`.
pub unsafe fn arg<T: Copy>(args: &[*mut c_void], index: usize) -> T {
    (args[index] as *const T).read_unaligned()
}

/// Store `value` as the call's return value
///
/// # Safety
/// `result` must have room for a `T`.
pub unsafe fn set_return<T>(result: *mut c_void, value: T) {
    (result as *mut T).write_unaligned(value);
}

impl AbiEngine for MockEngine {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn prepare_call(
        &self,
        ret: &TypeDescriptor,
        args: &[TypeDescriptor],
        convention: CallingConvention,
        nfixed: Option<usize>,
    ) -> Result<CallPlan, AbiError> {
        if !convention.is_available() {
            return Err(AbiError::BadAbi(convention));
        }

        Self::check(ret, "return")?;
        for (i, arg) in args.iter().enumerate() {
            if arg.kind() == TypeKind::Void {
                return Err(AbiError::BadTypedef(format!("argument {} is void", i + 1)));
            }
            Self::check(arg, "argument")?;
        }

        let nfixed = match nfixed {
            Some(n) if n > args.len() => {
                return Err(AbiError::BadTypedef(format!(
                    "{} fixed parameters but only {} arguments",
                    n,
                    args.len()
                )))
            }
            Some(n) => n,
            None => args.len(),
        };

        self.prepared.set(self.prepared.get() + 1);
        Ok(CallPlan::new(ret.clone(), args.to_vec(), convention, nfixed, Box::new(())))
    }

    unsafe fn invoke(&self, plan: &CallPlan, function: CodePtr, args: &[*mut c_void], result: *mut c_void) {
        let functions = self.functions.borrow();
        match functions.get(&function.addr()) {
            Some(native) => native(plan, args, result),
            None => panic!("mock engine: nothing registered at {:#x}", function.addr()),
        }
    }

    fn make_trampoline(&self, _plan: &CallPlan, dispatch: DispatchFn, ctx: *mut c_void) -> Result<Trampoline, AbiError> {
        if self.refuse_trampolines.get() {
            return Err(AbiError::AllocationFailed);
        }
        let code = self.next_code();
        self.trampolines
            .borrow_mut()
            .insert(code.addr(), TrampolineEntry { dispatch, ctx });
        Ok(Trampoline::new(code, Box::new(())))
    }

    fn free_trampoline(&self, trampoline: Trampoline) {
        if self.trampolines.borrow_mut().remove(&trampoline.code().addr()).is_some() {
            self.freed.set(self.freed.get() + 1);
        }
    }
}
