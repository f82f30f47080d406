use crate::abi::CallingConvention;
use crate::error::{FfiError, FfiResult};
use crate::types::Primitive;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FfiConfig {
    #[serde(default)]
    pub call: CallConfig,

    #[serde(default)]
    pub callback: CallbackConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CallConfig {
    #[serde(default)]
    pub default_convention: CallingConvention,

    #[serde(default)]
    pub variadic_int: VariadicInt,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CallbackConfig {
    /// Runtime stack slots available to re-entrant callbacks
    #[serde(default = "default_stack_limit")]
    pub stack_limit: usize,

    /// Slots reserved per callback on top of its arguments
    #[serde(default = "default_frame_overhead")]
    pub frame_overhead: usize,

    #[serde(default)]
    pub return_error: ReturnErrorPolicy,
}

/// Native type untyped integer arguments take in a variadic tail
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariadicInt {
    #[default]
    Int,
    Long,
    Int64,
}

impl VariadicInt {
    pub fn primitive(self) -> Primitive {
        use core::mem::size_of;
        match self {
            VariadicInt::Int => Primitive::integer(size_of::<libc::c_int>(), true),
            VariadicInt::Long => Primitive::integer(size_of::<libc::c_long>(), true),
            VariadicInt::Int64 => Primitive::I64,
        }
    }
}

/// What happens when a callback's result cannot be converted to its native return type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnErrorPolicy {
    /// Queue the error on the runtime and return zero to the native caller
    #[default]
    Raise,
    /// Log and abort the process
    Abort,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            default_convention: CallingConvention::C,
            variadic_int: VariadicInt::Int,
        }
    }
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            stack_limit: default_stack_limit(),
            frame_overhead: default_frame_overhead(),
            return_error: ReturnErrorPolicy::Raise,
        }
    }
}

fn default_stack_limit() -> usize { 1_000_000 }
fn default_frame_overhead() -> usize { 1 }

impl FfiConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> FfiResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| FfiError::Config(format!("failed to read {}: {}", path.display(), e)))?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> FfiResult<Self> {
        toml::from_str(content).map_err(|e| FfiError::Config(format!("failed to parse config: {}", e)))
    }

    /// Defaults overlaid with `DYNFFI_STACK_LIMIT` and `DYNFFI_CALLBACK_RETURN_ERROR`
    pub fn from_env() -> FfiResult<Self> {
        Self::default().with_env()
    }

    /// Overlay environment variables onto this configuration
    pub fn with_env(mut self) -> FfiResult<Self> {
        if let Ok(limit) = std::env::var("DYNFFI_STACK_LIMIT") {
            self.callback.stack_limit = limit
                .trim()
                .parse()
                .map_err(|_| FfiError::Config(format!("DYNFFI_STACK_LIMIT: '{}' is not a slot count", limit)))?;
        }

        if let Ok(policy) = std::env::var("DYNFFI_CALLBACK_RETURN_ERROR") {
            self.callback.return_error = match policy.trim().to_lowercase().as_str() {
                "raise" => ReturnErrorPolicy::Raise,
                "abort" => ReturnErrorPolicy::Abort,
                other => {
                    return Err(FfiError::Config(format!(
                        "DYNFFI_CALLBACK_RETURN_ERROR: expected raise or abort, got '{}'",
                        other
                    )))
                }
            };
        }

        Ok(self)
    }
}
