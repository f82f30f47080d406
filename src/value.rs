//! Script-side values as the marshaler sees them

use crate::abi::CodePtr;
use crate::closure::Closure;
use crate::error::{FfiResult, ValueCategory};
use crate::object::NativeObject;
use core::ffi::c_void;
use core::fmt;
use core::ptr::NonNull;
use std::rc::Rc;

/// Script function: positional arguments in, results out
pub type ScriptFn = Rc<dyn Fn(&[Value]) -> FfiResult<Vec<Value>>>;

/// Immutable NUL-terminated byte string
///
/// Bytes may contain interior NULs; native code sees everything up to the first one.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ScriptStr(Rc<[u8]>);

impl ScriptStr {
    pub fn new(bytes: impl AsRef<[u8]>) -> Self {
        let bytes = bytes.as_ref();
        let mut buf = Vec::with_capacity(bytes.len() + 1);
        buf.extend_from_slice(bytes);
        buf.push(0);
        Self(buf.into())
    }

    /// Contents without the terminator
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..self.0.len() - 1]
    }

    /// Address of the first byte; stays valid while any clone is alive
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.0.as_ptr()
    }
}

impl fmt::Debug for ScriptStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.as_bytes()))
    }
}

/// Non-null opaque native address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawPointer(pub(crate) NonNull<c_void>);

impl RawPointer {
    #[inline]
    pub fn new(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    #[inline]
    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }

    #[inline]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }
}

/// Something a script can call
#[derive(Clone)]
pub enum Callable {
    /// Bare native entry point with no captured state
    Native(CodePtr),
    /// Script function, possibly capturing state
    Script(ScriptFn),
}

impl Callable {
    pub fn script<F>(function: F) -> Self
    where
        F: Fn(&[Value]) -> FfiResult<Vec<Value>> + 'static,
    {
        Callable::Script(Rc::new(function))
    }

    /// Native entry, if this callable can be passed as a plain function pointer
    #[inline]
    pub fn entry(&self) -> Option<CodePtr> {
        match self {
            Callable::Native(code) => Some(*code),
            Callable::Script(_) => None,
        }
    }
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Callable::Native(a), Callable::Native(b)) => a == b,
            (Callable::Script(a), Callable::Script(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Native(code) => write!(f, "Native({:#x})", code.addr()),
            Callable::Script(function) => write!(f, "Script({:p})", Rc::as_ptr(function) as *const ()),
        }
    }
}

/// Dynamically typed script value
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(ScriptStr),
    Pointer(RawPointer),
    Object(NativeObject),
    Function(Callable),
    Closure(Closure),
}

impl Value {
    pub fn string(bytes: impl AsRef<[u8]>) -> Self {
        Value::Str(ScriptStr::new(bytes))
    }

    /// Pointer value, or nil for a null address
    pub fn pointer(ptr: *mut c_void) -> Self {
        RawPointer::new(ptr).map_or(Value::Nil, Value::Pointer)
    }

    pub fn category(&self) -> ValueCategory {
        match self {
            Value::Nil => ValueCategory::Nil,
            Value::Bool(_) => ValueCategory::Boolean,
            Value::Int(_) => ValueCategory::Integer,
            Value::Float(_) => ValueCategory::Float,
            Value::Str(_) => ValueCategory::String,
            Value::Pointer(_) | Value::Closure(_) => ValueCategory::Pointer,
            Value::Object(_) => ValueCategory::NativeObject,
            Value::Function(_) => ValueCategory::Callable,
        }
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&NativeObject> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<RawPointer> {
        match self {
            Value::Pointer(ptr) => Some(*ptr),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<NativeObject> for Value {
    fn from(object: NativeObject) -> Self {
        Value::Object(object)
    }
}

impl From<Closure> for Value {
    fn from(closure: Closure) -> Self {
        Value::Closure(closure)
    }
}
