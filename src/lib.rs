//! dynffi - native calls and callbacks for dynamically typed runtimes
//!
//! Describes native types at runtime, marshals script values to and from raw
//! memory, calls native functions (fixed and variadic) and hands script
//! functions to native code as plain function pointers.
//!
//! Architecture:
//! - `types` - identity-compared type descriptors and struct layout
//! - `marshal` - value conversion in both directions
//! - `object` - script-owned native memory blocks
//! - `call` - call interfaces and foreign function handles
//! - `closure` - callback trampolines
//! - `abi` - the ABI engine seam (libffi backend behind feature `libffi`)

pub mod abi;
pub mod call;
pub mod closure;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod marshal;
pub mod object;
pub mod runtime;
pub mod types;
pub mod value;

pub use abi::{AbiEngine, CallingConvention, CodePtr};
pub use call::{CallInterface, CallStats, ForeignFunction};
pub use closure::{Closure, DispatchFault};
pub use config::FfiConfig;
pub use context::Ffi;
pub use error::{FfiError, FfiResult, ValueCategory};
pub use object::NativeObject;
pub use runtime::Runtime;
pub use types::{field_of, FieldKey, Primitive, TypeDescriptor, TypeKind, TypeRegistry};
pub use value::{Callable, ScriptFn, Value};

/// Initialize logging from the environment
pub fn init() {
    logging::init();
}
