//! ABI engine seam - layout computation, call plans, trampolines
//!
//! Everything platform-specific sits behind [`AbiEngine`]. The rest of the
//! crate only hands descriptors and raw buffers across this boundary.
//!
//! Architecture:
//! - `mod.rs` - engine trait, calling conventions, plans, trampolines
//! - `layout.rs` - natural C layout used by engines that don't override it
//! - `native.rs` - engine backed by the system libffi (feature `libffi`)
//! - `mock.rs` - in-process engine for tests and benchmarks

pub mod layout;

#[cfg(feature = "libffi")]
mod native;

pub mod mock;

#[cfg(feature = "libffi")]
pub use native::LibffiEngine;
pub use layout::StructLayout;

use crate::types::{Primitive, TypeDescriptor};
use core::any::Any;
use core::ffi::c_void;
use core::fmt;
use core::str::FromStr;
use serde::Deserialize;

/// Calling convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CallingConvention {
    /// C calling convention (platform default)
    C,
    /// System V AMD64 ABI (Unix x86-64)
    SysV,
    /// Microsoft x64 calling convention (Windows)
    Win64,
    /// ARM AAPCS (ARM 32-bit)
    Aapcs,
    /// ARM64 calling convention
    Aarch64,
}

impl CallingConvention {
    /// Convention native code on this target uses unless told otherwise
    #[inline]
    pub const fn platform() -> Self {
        #[cfg(all(target_arch = "x86_64", target_os = "windows"))]
        return Self::Win64;

        #[cfg(all(target_arch = "x86_64", not(target_os = "windows")))]
        return Self::SysV;

        #[cfg(target_arch = "aarch64")]
        return Self::Aarch64;

        #[cfg(target_arch = "arm")]
        return Self::Aapcs;

        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "arm")))]
        return Self::C;
    }

    /// Whether this target can call through the convention
    #[inline]
    pub const fn is_available(self) -> bool {
        match self {
            Self::C => true,
            Self::SysV => cfg!(all(target_arch = "x86_64", not(target_os = "windows"))),
            Self::Win64 => cfg!(target_arch = "x86_64"),
            Self::Aapcs => cfg!(target_arch = "arm"),
            Self::Aarch64 => cfg!(target_arch = "aarch64"),
        }
    }

    /// Collapse `C` to the concrete platform convention
    #[inline]
    pub const fn resolve(self) -> Self {
        match self {
            Self::C => Self::platform(),
            other => other,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::C => "c",
            Self::SysV => "sysv",
            Self::Win64 => "win64",
            Self::Aapcs => "aapcs",
            Self::Aarch64 => "aarch64",
        }
    }
}

impl Default for CallingConvention {
    #[inline]
    fn default() -> Self {
        Self::C
    }
}

impl fmt::Display for CallingConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CallingConvention {
    type Err = AbiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "c" | "default" => Ok(Self::C),
            "sysv" => Ok(Self::SysV),
            "win64" => Ok(Self::Win64),
            "aapcs" => Ok(Self::Aapcs),
            "aarch64" => Ok(Self::Aarch64),
            other => Err(AbiError::Unsupported(format!("calling convention '{}'", other))),
        }
    }
}

/// Rejection reported by an ABI engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiError {
    /// Descriptor the engine cannot represent
    BadTypedef(String),
    /// Convention not available on this target
    BadAbi(CallingConvention),
    /// Feature the engine does not implement
    Unsupported(String),
    /// Executable memory could not be obtained
    AllocationFailed,
}

impl fmt::Display for AbiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadTypedef(msg) => write!(f, "bad type definition: {}", msg),
            Self::BadAbi(conv) => write!(f, "calling convention {} is not available", conv),
            Self::Unsupported(what) => write!(f, "unsupported: {}", what),
            Self::AllocationFailed => f.write_str("could not allocate executable memory"),
        }
    }
}

impl std::error::Error for AbiError {}

/// Native function entry address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodePtr(*const c_void);

impl CodePtr {
    #[inline]
    pub const fn from_ptr(ptr: *const c_void) -> Self {
        Self(ptr)
    }

    #[inline]
    pub const fn as_ptr(self) -> *const c_void {
        self.0
    }

    #[inline]
    pub fn addr(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

/// Engine-prepared, reusable description of one call shape
pub struct CallPlan {
    ret: TypeDescriptor,
    args: Vec<TypeDescriptor>,
    convention: CallingConvention,
    nfixed: usize,
    native: Box<dyn Any>,
}

impl CallPlan {
    pub fn new(
        ret: TypeDescriptor,
        args: Vec<TypeDescriptor>,
        convention: CallingConvention,
        nfixed: usize,
        native: Box<dyn Any>,
    ) -> Self {
        Self { ret, args, convention, nfixed, native }
    }

    #[inline]
    pub fn return_type(&self) -> &TypeDescriptor {
        &self.ret
    }

    #[inline]
    pub fn arg_types(&self) -> &[TypeDescriptor] {
        &self.args
    }

    #[inline]
    pub fn convention(&self) -> CallingConvention {
        self.convention
    }

    /// Number of declared parameters; equals `arg_types().len()` unless variadic
    #[inline]
    pub fn nfixed(&self) -> usize {
        self.nfixed
    }

    #[inline]
    pub fn is_variadic(&self) -> bool {
        self.nfixed < self.args.len()
    }

    /// Engine-private state attached at preparation
    #[inline]
    pub fn native<T: 'static>(&self) -> Option<&T> {
        self.native.downcast_ref()
    }
}

impl fmt::Debug for CallPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPlan")
            .field("ret", &self.ret)
            .field("args", &self.args)
            .field("convention", &self.convention)
            .field("nfixed", &self.nfixed)
            .finish()
    }
}

/// Entry the engine's trampoline forwards native calls to
///
/// `args` points at one pointer per declared parameter, each addressing that
/// parameter's raw bytes. `result` has room for the return type and is at
/// least [`AbiEngine::return_slot_size`] bytes.
pub type DispatchFn = unsafe extern "C" fn(ctx: *mut c_void, args: *const *mut c_void, result: *mut c_void);

/// Executable entry point produced by an engine
pub struct Trampoline {
    code: CodePtr,
    handle: Box<dyn Any>,
}

impl Trampoline {
    pub fn new(code: CodePtr, handle: Box<dyn Any>) -> Self {
        Self { code, handle }
    }

    #[inline]
    pub fn code(&self) -> CodePtr {
        self.code
    }

    /// Recover the engine-private handle
    pub fn into_handle<T: 'static>(self) -> Option<Box<T>> {
        self.handle.downcast().ok()
    }
}

impl fmt::Debug for Trampoline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trampoline").field("code", &self.code).finish()
    }
}

/// Native ABI backend
pub trait AbiEngine {
    fn name(&self) -> &'static str;

    /// Size and alignment of a primitive on this target
    fn primitive_layout(&self, primitive: Primitive) -> (usize, usize) {
        layout::primitive_layout(primitive)
    }

    /// Member offsets, padded size and alignment of a struct
    fn compute_layout(&self, members: &[TypeDescriptor]) -> Result<StructLayout, AbiError> {
        layout::natural_layout(members)
    }

    /// Bytes a scalar return occupies in the return register
    fn return_slot_size(&self) -> usize {
        core::mem::size_of::<u64>()
    }

    /// Prepare a call plan; `nfixed` is `Some` for a variadic call
    fn prepare_call(
        &self,
        ret: &TypeDescriptor,
        args: &[TypeDescriptor],
        convention: CallingConvention,
        nfixed: Option<usize>,
    ) -> Result<CallPlan, AbiError>;

    /// Perform the call
    ///
    /// # Safety
    /// `function` must have the signature `plan` describes. Every entry of
    /// `args` must point at a valid value of the matching argument type and
    /// `result` must have room for the return type and at least
    /// [`return_slot_size`](AbiEngine::return_slot_size) bytes.
    unsafe fn invoke(&self, plan: &CallPlan, function: CodePtr, args: &[*mut c_void], result: *mut c_void);

    /// Produce an entry point that forwards to `dispatch` with `ctx`
    fn make_trampoline(&self, plan: &CallPlan, dispatch: DispatchFn, ctx: *mut c_void) -> Result<Trampoline, AbiError>;

    /// Release a trampoline; its code address must not be called afterwards
    fn free_trampoline(&self, trampoline: Trampoline);
}
