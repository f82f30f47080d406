//! Call interface builder - fixed and variadic native calls
//!
//! Design: the fixed prototype is prepared once and reused for every call
//! with exactly that many arguments. Extra arguments get a plan derived for
//! that one call; it is dropped when the call returns.


use crate::abi::layout::align_up;
use crate::abi::{AbiEngine, CallPlan, CallingConvention, CodePtr};
use crate::error::{FfiError, FfiResult};
use crate::logging::{log_native_call, log_variadic_call};
use crate::marshal::{to_native, to_script, variadic_descriptor};
use crate::object::NativeObject;
use crate::types::{Primitive, TypeDescriptor, TypeRegistry};
use crate::value::Value;
use core::ffi::c_void;
use smallvec::{smallvec, SmallVec};
use std::cell::Cell;
use std::rc::Rc;

const SLOT_ALIGN: usize = 16;

#[repr(C, align(16))]
#[derive(Clone, Copy, Default)]
struct Chunk([u8; SLOT_ALIGN]);

/// Per-call argument storage, one 16-aligned slot per argument
struct ArgFrame {
    storage: SmallVec<[Chunk; 8]>,
    offsets: SmallVec<[usize; 8]>,
}

impl ArgFrame {
    fn new(args: &[TypeDescriptor]) -> Self {
        let mut offsets = SmallVec::with_capacity(args.len());
        let mut total = 0;
        for arg in args {
            offsets.push(total);
            total += align_up(arg.size().max(1), SLOT_ALIGN);
        }
        Self {
            storage: smallvec![Chunk::default(); total / SLOT_ALIGN],
            offsets,
        }
    }

    /// Buffer of `size` bytes, rounded up to whole chunks
    fn with_size(size: usize) -> SmallVec<[Chunk; 8]> {
        smallvec![Chunk::default(); align_up(size.max(1), SLOT_ALIGN) / SLOT_ALIGN]
    }

    #[inline]
    fn slot(&mut self, index: usize) -> *mut u8 {
        unsafe { (self.storage.as_mut_ptr() as *mut u8).add(self.offsets[index]) }
    }

    /// Slot addresses; valid until the frame is moved or dropped
    fn pointers(&mut self) -> SmallVec<[*mut c_void; 8]> {
        let base = self.storage.as_mut_ptr() as *mut u8;
        self.offsets
            .iter()
            .map(|&offset| unsafe { base.add(offset) }.cast())
            .collect()
    }
}

/// Prepared native signature: return type, fixed parameters, convention
pub struct CallInterface {
    plan: CallPlan,
}

impl CallInterface {
    /// Prepare a fixed-arity interface
    pub fn build(
        engine: &dyn AbiEngine,
        ret: TypeDescriptor,
        args: Vec<TypeDescriptor>,
        convention: CallingConvention,
    ) -> FfiResult<Self> {
        let plan = engine
            .prepare_call(&ret, &args, convention, None)
            .map_err(FfiError::BadSignature)?;
        Ok(Self { plan })
    }

    #[inline]
    pub fn return_type(&self) -> &TypeDescriptor {
        self.plan.return_type()
    }

    #[inline]
    pub fn arg_types(&self) -> &[TypeDescriptor] {
        self.plan.arg_types()
    }

    #[inline]
    pub fn convention(&self) -> CallingConvention {
        self.plan.convention()
    }

    #[inline]
    pub fn plan(&self) -> &CallPlan {
        &self.plan
    }

    /// Plan for this call's fixed parameters plus `extra` variadic ones
    fn derive(&self, engine: &dyn AbiEngine, extra: Vec<TypeDescriptor>) -> FfiResult<CallPlan> {
        let mut args = Vec::with_capacity(self.arg_types().len() + extra.len());
        args.extend_from_slice(self.arg_types());
        args.extend(extra);

        engine
            .prepare_call(self.return_type(), &args, self.convention(), Some(self.arg_types().len()))
            .map_err(FfiError::NativePrep)
    }

    /// Call `function` with script arguments
    ///
    /// Arguments past the fixed parameters are passed variadically with
    /// types inferred from their values.
    ///
    /// # Safety
    /// `function` must be a native function matching this interface (plus
    /// a variadic tail if extra arguments are given).
    pub unsafe fn invoke(&self, types: &TypeRegistry, function: CodePtr, args: &[Value]) -> FfiResult<Value> {
        let engine = types.engine().as_ref();
        let nfixed = self.arg_types().len();

        if args.len() < nfixed {
            return Err(FfiError::Arity {
                expected: nfixed,
                got: args.len(),
            });
        }

        if args.len() == nfixed {
            log_native_call(function.addr(), nfixed);
            return invoke_plan(engine, &self.plan, function, args);
        }

        let extra = args[nfixed..]
            .iter()
            .enumerate()
            .map(|(i, value)| variadic_descriptor(types, value, nfixed + i))
            .collect::<FfiResult<Vec<_>>>()?;
        let derived = self.derive(engine, extra)?;

        log_variadic_call(function.addr(), nfixed, args.len());
        invoke_plan(engine, &derived, function, args)
    }
}

impl std::fmt::Debug for CallInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallInterface")
            .field("ret", self.return_type())
            .field("args", &self.arg_types())
            .field("convention", &self.convention())
            .finish()
    }
}

unsafe fn invoke_plan(engine: &dyn AbiEngine, plan: &CallPlan, function: CodePtr, args: &[Value]) -> FfiResult<Value> {
    let mut frame = ArgFrame::new(plan.arg_types());
    for (i, (value, descriptor)) in args.iter().zip(plan.arg_types()).enumerate() {
        to_native(value, descriptor, frame.slot(i)).map_err(|err| err.at_argument(i))?;
    }
    let pointers = frame.pointers();

    let ret = plan.return_type();
    if ret.size() <= engine.return_slot_size() {
        let mut slot = ArgFrame::with_size(engine.return_slot_size());
        let result = slot.as_mut_ptr() as *mut u8;
        engine.invoke(plan, function, &pointers, result.cast());
        to_script(result, ret)
    } else {
        // Anything wider than the return register is written into the object handed back
        let object = NativeObject::allocate(ret, 1)?;
        engine.invoke(plan, function, &pointers, object.as_mut_ptr().cast());
        Ok(Value::Object(object))
    }
}

/// Call counters of a [`ForeignFunction`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallStats {
    pub calls: u64,
    pub variadic_calls: u64,
}

/// Native function address bound to its declared prototype
pub struct ForeignFunction {
    address: CodePtr,
    types: Rc<TypeRegistry>,
    prototype: CallInterface,
    calls: Cell<u64>,
    variadic_calls: Cell<u64>,
}

impl ForeignFunction {
    /// Function with the default prototype: returns C `int`, no fixed parameters
    pub fn new(types: Rc<TypeRegistry>, address: CodePtr, convention: CallingConvention) -> FfiResult<Self> {
        let ret = types.primitive(Primitive::integer(core::mem::size_of::<libc::c_int>(), true));
        let prototype = CallInterface::build(types.engine().as_ref(), ret, Vec::new(), convention)?;
        Ok(Self::with_prototype(types, address, prototype))
    }

    pub fn with_prototype(types: Rc<TypeRegistry>, address: CodePtr, prototype: CallInterface) -> Self {
        Self {
            address,
            types,
            prototype,
            calls: Cell::new(0),
            variadic_calls: Cell::new(0),
        }
    }

    /// Replace the prototype, keeping the calling convention
    ///
    /// On failure the previous prototype stays in place.
    pub fn set_prototype(&mut self, ret: TypeDescriptor, args: Vec<TypeDescriptor>) -> FfiResult<()> {
        let convention = self.prototype.convention();
        self.prototype = CallInterface::build(self.types.engine().as_ref(), ret, args, convention)?;
        Ok(())
    }

    #[inline]
    pub fn address(&self) -> CodePtr {
        self.address
    }

    #[inline]
    pub fn prototype(&self) -> &CallInterface {
        &self.prototype
    }

    pub fn stats(&self) -> CallStats {
        CallStats {
            calls: self.calls.get(),
            variadic_calls: self.variadic_calls.get(),
        }
    }

    /// # Safety
    /// See [`CallInterface::invoke`].
    pub unsafe fn call(&self, args: &[Value]) -> FfiResult<Value> {
        self.calls.set(self.calls.get() + 1);
        if args.len() > self.prototype.arg_types().len() {
            self.variadic_calls.set(self.variadic_calls.get() + 1);
        }
        self.prototype.invoke(&self.types, self.address, args)
    }
}

impl std::fmt::Debug for ForeignFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForeignFunction")
            .field("address", &self.address)
            .field("prototype", &self.prototype)
            .finish()
    }
}
