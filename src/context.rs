//! One-stop handle bundling an engine, its type registry and the runtime

use crate::abi::{AbiEngine, CodePtr};
use crate::call::{CallInterface, ForeignFunction};
use crate::closure::Closure;
use crate::config::FfiConfig;
use crate::error::FfiResult;
use crate::runtime::Runtime;
use crate::types::{TypeDescriptor, TypeRegistry};
use crate::value::ScriptFn;
use std::rc::Rc;

pub struct Ffi {
    types: Rc<TypeRegistry>,
    runtime: Runtime,
}

impl Ffi {
    pub fn new(engine: Rc<dyn AbiEngine>) -> Self {
        Self::with_config(engine, FfiConfig::default())
    }

    pub fn with_config(engine: Rc<dyn AbiEngine>, config: FfiConfig) -> Self {
        let types = TypeRegistry::with_default_int(engine, config.call.variadic_int.primitive());
        Self {
            types: Rc::new(types),
            runtime: Runtime::new(config),
        }
    }

    /// Context over the system libffi with configuration from the environment
    #[cfg(feature = "libffi")]
    pub fn native() -> FfiResult<Self> {
        let config = FfiConfig::from_env()?;
        Ok(Self::with_config(Rc::new(crate::abi::LibffiEngine::new()), config))
    }

    #[inline]
    pub fn types(&self) -> &Rc<TypeRegistry> {
        &self.types
    }

    #[inline]
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    #[inline]
    pub fn engine(&self) -> &Rc<dyn AbiEngine> {
        self.types.engine()
    }

    /// Interface under the configured default calling convention
    pub fn interface(&self, ret: TypeDescriptor, args: Vec<TypeDescriptor>) -> FfiResult<CallInterface> {
        let convention = self.runtime.config().call.default_convention;
        CallInterface::build(self.engine().as_ref(), ret, args, convention)
    }

    /// Bind a native address to the default `int f(...)` prototype
    pub fn symbol(&self, address: CodePtr) -> FfiResult<ForeignFunction> {
        let convention = self.runtime.config().call.default_convention;
        ForeignFunction::new(self.types.clone(), address, convention)
    }

    /// Bind a native address to a prototype
    pub fn function(&self, address: CodePtr, ret: TypeDescriptor, args: Vec<TypeDescriptor>) -> FfiResult<ForeignFunction> {
        let prototype = self.interface(ret, args)?;
        Ok(ForeignFunction::with_prototype(self.types.clone(), address, prototype))
    }

    /// Expose a script function to native code
    pub fn closure(&self, ret: TypeDescriptor, args: Vec<TypeDescriptor>, callable: ScriptFn) -> FfiResult<Closure> {
        let interface = self.interface(ret, args)?;
        Closure::create(self.engine().clone(), &self.runtime, interface, callable)
    }
}

impl std::fmt::Debug for Ffi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ffi")
            .field("types", &self.types)
            .field("runtime", &self.runtime)
            .finish()
    }
}
