//! Callback trampolines - native entry points that re-enter the script runtime
//!
//! Design:
//! - A closure owns its trampoline and one reference-table entry pinning the
//!   bound callable; both are released exactly once, on `destroy` or drop
//! - The trampoline context is the closure's own shared state, kept alive for
//!   the duration of every dispatch
//! - Nothing unwinds into native frames: script failures go to the runtime's
//!   raise channel, stack exhaustion and panics abort

#[cfg(test)]
mod tests;

use crate::abi::{AbiEngine, CodePtr, Trampoline};
use crate::call::CallInterface;
use crate::config::ReturnErrorPolicy;
use crate::error::{FfiError, FfiResult};
use crate::logging::{log_callback_fault, log_closure_created, log_closure_destroyed};
use crate::marshal::{to_native, to_script};
use crate::runtime::{RefId, Runtime};
use crate::types::TypeKind;
use crate::value::ScriptFn;
use core::ffi::c_void;
use core::fmt;
use std::cell::{Cell, RefCell};
use std::mem::ManuallyDrop;
use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::rc::Rc;

/// Why a dispatch did not complete
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchFault {
    /// The process cannot continue safely
    Fatal(FfiError),
    /// Recoverable; surfaces through the runtime's raise channel
    Raised(FfiError),
}

struct ClosureState {
    interface: CallInterface,
    runtime: Runtime,
    engine: Rc<dyn AbiEngine>,
    callable: Cell<Option<RefId>>,
    trampoline: RefCell<Option<Trampoline>>,
    code: Cell<Option<CodePtr>>,
}

impl ClosureState {
    fn release(&self) {
        if let Some(trampoline) = self.trampoline.borrow_mut().take() {
            let code = trampoline.code();
            self.engine.free_trampoline(trampoline);
            log_closure_destroyed(code.addr());
        }
        self.code.set(None);
        if let Some(id) = self.callable.take() {
            self.runtime.unregister(id);
        }
    }
}

impl Drop for ClosureState {
    fn drop(&mut self) {
        self.release();
    }
}

/// Script callable exposed to native code through a trampoline
#[derive(Clone)]
pub struct Closure(Rc<ClosureState>);

impl Closure {
    /// Pin `callable` and bind it to a fresh trampoline for `interface`
    ///
    /// A failed creation leaves nothing registered.
    pub fn create(
        engine: Rc<dyn AbiEngine>,
        runtime: &Runtime,
        interface: CallInterface,
        callable: ScriptFn,
    ) -> FfiResult<Self> {
        let id = runtime.register(callable);
        let state = Rc::new(ClosureState {
            interface,
            runtime: runtime.clone(),
            engine,
            callable: Cell::new(Some(id)),
            trampoline: RefCell::new(None),
            code: Cell::new(None),
        });

        let ctx = Rc::as_ptr(&state) as *mut c_void;
        let trampoline = state
            .engine
            .make_trampoline(state.interface.plan(), closure_entry, ctx)
            .map_err(FfiError::NativePrep)?;

        let code = trampoline.code();
        state.code.set(Some(code));
        *state.trampoline.borrow_mut() = Some(trampoline);
        log_closure_created(code.addr(), state.interface.arg_types().len());

        Ok(Self(state))
    }

    /// Entry address native code calls; `None` once destroyed
    #[inline]
    pub fn code(&self) -> Option<CodePtr> {
        self.0.code.get()
    }

    #[inline]
    pub fn interface(&self) -> &CallInterface {
        &self.0.interface
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        self.0.code.get().is_some()
    }

    /// Release the trampoline and the pinned callable; repeated calls do nothing
    pub fn destroy(&self) {
        self.0.release();
    }

    /// Run the bound callable for one native invocation
    ///
    /// The return slot is zero-filled before anything else happens, so a
    /// failed dispatch never leaves it uninitialized.
    ///
    /// # Safety
    /// `args` must hold one pointer per declared parameter, each addressing a
    /// value of that parameter's type; `result` must have room for the
    /// return type (it may be null for a void return).
    pub unsafe fn dispatch(&self, args: &[*mut c_void], result: *mut c_void) -> Result<(), DispatchFault> {
        let state = &self.0;
        let ret = state.interface.return_type();
        let params = state.interface.arg_types();

        if ret.kind() != TypeKind::Void && !result.is_null() {
            core::ptr::write_bytes(result as *mut u8, 0, ret.size());
        }

        let slots = args.len() + state.runtime.config().callback.frame_overhead;
        let _frame = state.runtime.reserve_stack(slots).map_err(DispatchFault::Fatal)?;

        let function = state
            .callable
            .get()
            .and_then(|id| state.runtime.resolve(id))
            .ok_or_else(|| DispatchFault::Raised(FfiError::Script("callback invoked after destroy".into())))?;

        let values = args
            .iter()
            .zip(params)
            .map(|(&arg, descriptor)| to_script(arg as *const u8, descriptor))
            .collect::<FfiResult<Vec<_>>>()
            .map_err(DispatchFault::Raised)?;

        let results = state.runtime.call(&function, &values).map_err(DispatchFault::Raised)?;

        if ret.kind() == TypeKind::Void {
            return Ok(());
        }
        let first = results.into_iter().next().unwrap_or_default();
        to_native(&first, ret, result as *mut u8).map_err(DispatchFault::Raised)
    }

    #[inline]
    pub fn ptr_eq(&self, other: &Closure) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Closure {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("code", &self.code())
            .field("interface", &self.0.interface)
            .finish()
    }
}

/// Trampoline target for every closure
unsafe extern "C" fn closure_entry(ctx: *mut c_void, args: *const *mut c_void, result: *mut c_void) {
    // The trampoline only exists while the state does; take our own
    // reference so the callable may drop the closure mid-dispatch
    let borrowed = ManuallyDrop::new(Rc::from_raw(ctx as *const ClosureState));
    let closure = Closure(Rc::clone(&borrowed));

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let nargs = closure.interface().arg_types().len();
        let args = if nargs == 0 || args.is_null() {
            &[][..]
        } else {
            core::slice::from_raw_parts(args, nargs)
        };
        closure.dispatch(args, result)
    }));

    let runtime = &closure.0.runtime;
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(DispatchFault::Raised(err))) => match runtime.config().callback.return_error {
            ReturnErrorPolicy::Raise => runtime.raise(err),
            ReturnErrorPolicy::Abort => {
                log_callback_fault(true, &err);
                process::abort();
            }
        },
        Ok(Err(DispatchFault::Fatal(err))) => {
            log_callback_fault(true, &err);
            process::abort();
        }
        Err(_) => {
            log_callback_fault(true, &"panic in callback");
            process::abort();
        }
    }
}
