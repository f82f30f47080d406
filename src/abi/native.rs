//! ABI engine backed by the system libffi
//!
//! Descriptors are translated to `middle::Type` trees once per plan. Plans
//! keep their `ffi_cif` and the type storage it points into alive for as
//! long as the plan lives.

use super::{AbiEngine, AbiError, CallPlan, CallingConvention, CodePtr, DispatchFn, StructLayout, Trampoline};
use crate::types::{TypeDescriptor, TypeKind};
use core::ffi::{c_uint, c_void};
use core::mem;
use libffi::low::ffi_arg;
use libffi::middle::Type;
use libffi::raw;

/// `ffi_cif` plus the type storage it references
struct NativeCif {
    cif: Box<raw::ffi_cif>,
    _rtype: Type,
    _atypes: Vec<Type>,
    _arg_ptrs: Vec<*mut raw::ffi_type>,
}

impl NativeCif {
    fn prepare(
        ret: &TypeDescriptor,
        args: &[TypeDescriptor],
        convention: CallingConvention,
        nfixed: Option<usize>,
    ) -> Result<Self, AbiError> {
        let abi = abi_of(convention)?;
        let rtype = ffi_type(ret)?;
        let atypes = args.iter().map(ffi_type).collect::<Result<Vec<_>, _>>()?;
        let mut arg_ptrs: Vec<*mut raw::ffi_type> = atypes.iter().map(Type::as_raw_ptr).collect();

        // Safety: ffi_cif is a plain C struct, all-zero is a valid initial state
        let mut cif: Box<raw::ffi_cif> = Box::new(unsafe { mem::zeroed() });

        let status = unsafe {
            match nfixed {
                None => raw::ffi_prep_cif(
                    &mut *cif,
                    abi,
                    args.len() as c_uint,
                    rtype.as_raw_ptr(),
                    arg_ptrs.as_mut_ptr(),
                ),
                Some(fixed) => raw::ffi_prep_cif_var(
                    &mut *cif,
                    abi,
                    fixed as c_uint,
                    args.len() as c_uint,
                    rtype.as_raw_ptr(),
                    arg_ptrs.as_mut_ptr(),
                ),
            }
        };
        check(status, convention)?;

        Ok(Self {
            cif,
            _rtype: rtype,
            _atypes: atypes,
            _arg_ptrs: arg_ptrs,
        })
    }

    #[inline]
    fn as_raw(&self) -> *mut raw::ffi_cif {
        &*self.cif as *const raw::ffi_cif as *mut raw::ffi_cif
    }
}

/// Per-trampoline state handed to libffi as closure userdata
#[derive(Clone, Copy)]
struct ClosureData {
    dispatch: DispatchFn,
    ctx: *mut c_void,
    ret: TypeKind,
}

struct ClosureHandle {
    closure: *mut raw::ffi_closure,
    _cif: NativeCif,
    _data: Box<ClosureData>,
}

/// Engine that calls through libffi
#[derive(Debug, Default, Clone, Copy)]
pub struct LibffiEngine;

impl LibffiEngine {
    pub const fn new() -> Self {
        Self
    }
}

fn abi_of(convention: CallingConvention) -> Result<raw::ffi_abi, AbiError> {
    if convention.resolve() == CallingConvention::platform() {
        Ok(raw::ffi_abi_FFI_DEFAULT_ABI)
    } else {
        Err(AbiError::BadAbi(convention))
    }
}

fn check(status: raw::ffi_status, convention: CallingConvention) -> Result<(), AbiError> {
    match status {
        raw::ffi_status_FFI_OK => Ok(()),
        raw::ffi_status_FFI_BAD_ABI => Err(AbiError::BadAbi(convention)),
        raw::ffi_status_FFI_BAD_TYPEDEF => Err(AbiError::BadTypedef("rejected by libffi".into())),
        other => Err(AbiError::Unsupported(format!("libffi status {}", other))),
    }
}

fn ffi_type(descriptor: &TypeDescriptor) -> Result<Type, AbiError> {
    Ok(match descriptor.kind() {
        TypeKind::Void => Type::void(),
        TypeKind::I8 => Type::i8(),
        TypeKind::U8 => Type::u8(),
        TypeKind::I16 => Type::i16(),
        TypeKind::U16 => Type::u16(),
        TypeKind::I32 => Type::i32(),
        TypeKind::U32 => Type::u32(),
        TypeKind::I64 => Type::i64(),
        TypeKind::U64 => Type::u64(),
        TypeKind::F32 => Type::f32(),
        TypeKind::F64 => Type::f64(),
        TypeKind::LongDouble => Type::longdouble(),
        TypeKind::Pointer => Type::pointer(),
        TypeKind::Struct => {
            let members = descriptor
                .members()
                .ok_or_else(|| AbiError::BadTypedef(format!("{} has no members", descriptor)))?;
            let fields = members
                .iter()
                .map(|member| ffi_type(&member.descriptor))
                .collect::<Result<Vec<_>, _>>()?;
            Type::structure(fields)
        }
        TypeKind::Complex => return Err(AbiError::Unsupported("complex types".into())),
        TypeKind::Array => {
            return Err(AbiError::BadTypedef(format!(
                "array {} cannot be passed by value",
                descriptor
            )))
        }
    })
}

/// Small integer returns travel as a full `ffi_arg`; normalize to the declared width
unsafe fn narrow_return(kind: TypeKind, result: *mut c_void) {
    let wide = (result as *const ffi_arg).read_unaligned();
    match kind {
        TypeKind::I8 => (result as *mut i8).write_unaligned(wide as i8),
        TypeKind::U8 => (result as *mut u8).write_unaligned(wide as u8),
        TypeKind::I16 => (result as *mut i16).write_unaligned(wide as i16),
        TypeKind::U16 => (result as *mut u16).write_unaligned(wide as u16),
        TypeKind::I32 if mem::size_of::<ffi_arg>() > 4 => (result as *mut i32).write_unaligned(wide as i32),
        TypeKind::U32 if mem::size_of::<ffi_arg>() > 4 => (result as *mut u32).write_unaligned(wide as u32),
        _ => {}
    }
}

/// Inverse of [`narrow_return`] for values produced by a callback
unsafe fn widen_return(kind: TypeKind, result: *mut c_void) {
    let wide: ffi_arg = match kind {
        TypeKind::I8 => (result as *const i8).read_unaligned() as ffi_arg,
        TypeKind::U8 => (result as *const u8).read_unaligned() as ffi_arg,
        TypeKind::I16 => (result as *const i16).read_unaligned() as ffi_arg,
        TypeKind::U16 => (result as *const u16).read_unaligned() as ffi_arg,
        TypeKind::I32 if mem::size_of::<ffi_arg>() > 4 => (result as *const i32).read_unaligned() as ffi_arg,
        TypeKind::U32 if mem::size_of::<ffi_arg>() > 4 => (result as *const u32).read_unaligned() as ffi_arg,
        _ => return,
    };
    (result as *mut ffi_arg).write_unaligned(wide);
}

unsafe extern "C" fn closure_adapter(
    _cif: *mut raw::ffi_cif,
    result: *mut c_void,
    args: *mut *mut c_void,
    userdata: *mut c_void,
) {
    // Dispatch may free `userdata` when the callable drops its own closure
    let ClosureData { dispatch, ctx, ret } = *(userdata as *const ClosureData);
    dispatch(ctx, args as *const *mut c_void, result);
    widen_return(ret, result);
}

impl AbiEngine for LibffiEngine {
    fn name(&self) -> &'static str {
        "libffi"
    }

    fn compute_layout(&self, members: &[TypeDescriptor]) -> Result<StructLayout, AbiError> {
        if members.is_empty() {
            return Err(AbiError::BadTypedef("struct without members".into()));
        }

        let fields = members.iter().map(ffi_type).collect::<Result<Vec<_>, _>>()?;
        let structure = Type::structure(fields);
        let mut offsets = vec![0usize; members.len()];

        // Also fills in the struct's size and alignment
        let status = unsafe {
            raw::ffi_get_struct_offsets(
                raw::ffi_abi_FFI_DEFAULT_ABI,
                structure.as_raw_ptr(),
                offsets.as_mut_ptr(),
            )
        };
        check(status, CallingConvention::C)?;

        let (size, align) = unsafe {
            let raw_type = &*structure.as_raw_ptr();
            (raw_type.size, usize::from(raw_type.alignment))
        };

        Ok(StructLayout { size, align, offsets })
    }

    fn return_slot_size(&self) -> usize {
        mem::size_of::<ffi_arg>()
    }

    fn prepare_call(
        &self,
        ret: &TypeDescriptor,
        args: &[TypeDescriptor],
        convention: CallingConvention,
        nfixed: Option<usize>,
    ) -> Result<CallPlan, AbiError> {
        if let Some(fixed) = nfixed {
            if fixed > args.len() {
                return Err(AbiError::BadTypedef(format!(
                    "{} fixed parameters but only {} arguments",
                    fixed,
                    args.len()
                )));
            }
        }

        let native = NativeCif::prepare(ret, args, convention, nfixed)?;
        Ok(CallPlan::new(
            ret.clone(),
            args.to_vec(),
            convention,
            nfixed.unwrap_or(args.len()),
            Box::new(native),
        ))
    }

    unsafe fn invoke(&self, plan: &CallPlan, function: CodePtr, args: &[*mut c_void], result: *mut c_void) {
        let Some(native) = plan.native::<NativeCif>() else {
            panic!("call plan was not prepared by the libffi engine");
        };

        let entry: unsafe extern "C" fn() = mem::transmute(function.as_ptr());
        raw::ffi_call(native.as_raw(), Some(entry), result, args.as_ptr() as *mut *mut c_void);
        narrow_return(plan.return_type().kind(), result);
    }

    fn make_trampoline(&self, plan: &CallPlan, dispatch: DispatchFn, ctx: *mut c_void) -> Result<Trampoline, AbiError> {
        let cif = NativeCif::prepare(plan.return_type(), plan.arg_types(), plan.convention(), None)?;
        let data = Box::new(ClosureData {
            dispatch,
            ctx,
            ret: plan.return_type().kind(),
        });

        let mut code: *mut c_void = core::ptr::null_mut();
        let closure = unsafe { raw::ffi_closure_alloc(mem::size_of::<raw::ffi_closure>(), &mut code) }
            as *mut raw::ffi_closure;
        if closure.is_null() {
            return Err(AbiError::AllocationFailed);
        }

        let status = unsafe {
            raw::ffi_prep_closure_loc(
                closure,
                cif.as_raw(),
                Some(closure_adapter),
                &*data as *const ClosureData as *mut c_void,
                code,
            )
        };
        if let Err(err) = check(status, plan.convention()) {
            unsafe { raw::ffi_closure_free(closure as *mut c_void) };
            return Err(err);
        }

        let handle = ClosureHandle {
            closure,
            _cif: cif,
            _data: data,
        };
        Ok(Trampoline::new(CodePtr::from_ptr(code), Box::new(handle)))
    }

    fn free_trampoline(&self, trampoline: Trampoline) {
        if let Some(handle) = trampoline.into_handle::<ClosureHandle>() {
            unsafe { raw::ffi_closure_free(handle.closure as *mut c_void) };
        }
    }
}
