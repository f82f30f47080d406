//! Error taxonomy for marshaling, layout and call preparation
//!
//! Every failure a script can observe is a variant of [`FfiError`]. ABI engine
//! rejections arrive as [`AbiError`] and are wrapped according to the phase
//! they happened in (layout, signature build, per-call preparation).

use crate::abi::AbiError;
use crate::types::TypeKind;
use core::fmt;

/// Result alias used throughout the crate
pub type FfiResult<T> = Result<T, FfiError>;

/// Dynamic category of a script value, used in error context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueCategory {
    Nil,
    Boolean,
    Integer,
    Float,
    String,
    Pointer,
    NativeObject,
    Callable,
}

impl ValueCategory {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Pointer => "pointer",
            Self::NativeObject => "native object",
            Self::Callable => "function",
        }
    }
}

impl fmt::Display for ValueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FfiError {
    /// Value and descriptor are incompatible
    TypeMismatch { expected: TypeKind, got: ValueCategory },
    /// Fewer arguments than the fixed prototype declares
    Arity { expected: usize, got: usize },
    /// Extra argument has no default native representation
    UnsupportedVariadicArg { index: usize, got: ValueCategory },
    /// Unknown field, or field access on a non-struct
    Field { key: String, reason: &'static str },
    /// Array index out of range
    Index { index: usize, len: usize },
    /// Indexing a value that is not an array
    NotIndexable { kind: TypeKind },
    /// Resolved field lies outside the owning object
    Bounds { offset: usize, size: usize, object_size: usize },
    /// Descriptor could not be laid out
    Layout(String),
    /// Engine rejected a declared signature
    BadSignature(AbiError),
    /// Engine rejected a per-call (variadic) plan
    NativePrep(AbiError),
    /// Callable with captured state where a bare function pointer is required
    UnsupportedClosure,
    /// Not enough runtime stack to re-enter from native code
    StackOverflow { needed: usize, available: usize },
    /// Marshaling failure for one call argument
    Argument { index: usize, source: Box<FfiError> },
    /// Error raised by a script callable
    Script(String),
    /// Configuration could not be read or parsed
    Config(String),
}

impl FfiError {
    /// Attach the offending argument position
    pub fn at_argument(self, index: usize) -> Self {
        Self::Argument { index, source: Box::new(self) }
    }

    /// Innermost error, skipping argument wrappers
    pub fn root(&self) -> &FfiError {
        match self {
            Self::Argument { source, .. } => source.root(),
            other => other,
        }
    }

    pub(crate) fn no_field(key: impl Into<String>) -> Self {
        Self::Field { key: key.into(), reason: "no such field" }
    }

    pub(crate) fn not_a_struct(key: impl Into<String>) -> Self {
        Self::Field { key: key.into(), reason: "not a struct" }
    }
}

impl fmt::Display for FfiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeMismatch { expected, got } => {
                write!(f, "type mismatch: expected {}, got {}", expected, got)
            }
            Self::Arity { expected, got } => {
                write!(f, "expect {} arguments, {} given", expected, got)
            }
            Self::UnsupportedVariadicArg { index, got } => {
                write!(f, "cannot pass a {} as variadic argument #{}", got, index + 1)
            }
            Self::Field { key, reason } => write!(f, "field '{}': {}", key, reason),
            Self::Index { index, len } => {
                write!(f, "index {} out of range (length {})", index, len)
            }
            Self::NotIndexable { kind } => write!(f, "attempt to index a {} value", kind),
            Self::Bounds { offset, size, object_size } => write!(
                f,
                "access of {} bytes at offset {} exceeds object of {} bytes",
                size, offset, object_size
            ),
            Self::Layout(msg) => write!(f, "layout error: {}", msg),
            Self::BadSignature(err) => write!(f, "bad signature: {}", err),
            Self::NativePrep(err) => write!(f, "call preparation failed: {}", err),
            Self::UnsupportedClosure => {
                write!(f, "function with captured state cannot be passed as a pointer")
            }
            Self::StackOverflow { needed, available } => write!(
                f,
                "stack overflow: callback needs {} slots, {} available",
                needed, available
            ),
            Self::Argument { index, source } => {
                write!(f, "bad argument #{}: {}", index + 1, source)
            }
            Self::Script(msg) => write!(f, "script error: {}", msg),
            Self::Config(msg) => write!(f, "config error: {}", msg),
        }
    }
}

impl std::error::Error for FfiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::BadSignature(err) | Self::NativePrep(err) => Some(err),
            Self::Argument { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
