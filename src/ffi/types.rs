//! FFI type definitions for the C API.

use std::ffi::CString;

use crate::config::RuntimeConfig;
use crate::runtime::{Runtime, Trap};

/// Result codes for FFI operations.
///
/// These map to the `JasmResult` enum in C.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JasmResult {
    /// Operation succeeded
    Ok = 0,
    /// Null reference dereferenced
    ErrorNullReference = 1,
    /// Array index or attribute slot out of range
    ErrorOutOfBounds = 2,
    /// Allocation failed after collection and growth
    ErrorOutOfMemory = 3,
    /// Integer division by zero
    ErrorArithmetic = 4,
    /// Address is not a live value of the expected kind
    ErrorInvalidReference = 5,
    /// Element or value type mismatch
    ErrorType = 6,
    /// Invalid argument passed to function
    ErrorInvalidArg = 7,
    /// Class or method not found
    ErrorNotFound = 8,
    /// Root registration or shadow stack misuse
    ErrorRoot = 9,
}

impl JasmResult {
    pub fn is_ok(self) -> bool {
        self == JasmResult::Ok
    }

    pub fn is_err(self) -> bool {
        self != JasmResult::Ok
    }
}

impl From<&Trap> for JasmResult {
    fn from(trap: &Trap) -> Self {
        match trap {
            Trap::NullReference { .. } => JasmResult::ErrorNullReference,
            Trap::IndexOutOfBounds { .. } | Trap::AttributeOutOfRange { .. } => {
                JasmResult::ErrorOutOfBounds
            }
            Trap::OutOfMemory { .. } => JasmResult::ErrorOutOfMemory,
            Trap::DivisionByZero => JasmResult::ErrorArithmetic,
            Trap::InvalidReference(_) | Trap::KindMismatch { .. } => {
                JasmResult::ErrorInvalidReference
            }
            Trap::ElementTypeMismatch { .. } => JasmResult::ErrorType,
            Trap::NegativeArraySize(_)
            | Trap::ArrayTooLarge(_)
            | Trap::InvalidAllocationSize(_)
            | Trap::InvalidConfig(_) => JasmResult::ErrorInvalidArg,
            Trap::UnknownClass(_) | Trap::UnknownMethodSlot { .. } => JasmResult::ErrorNotFound,
            Trap::InvalidRootLocation(_)
            | Trap::UnknownRoot(_)
            | Trap::ShadowStackOverflow
            | Trap::ShadowStackUnderflow
            | Trap::ShadowSlotOutOfRange { .. } => JasmResult::ErrorRoot,
        }
    }
}

/// Opaque runtime instance type.
///
/// This is the main entry point for the FFI. All operations require
/// a valid `JasmRuntime` pointer created by `jasm_runtime_new()`.
#[repr(C)]
pub struct JasmRuntime {
    _private: [u8; 0],
}

/// Internal wrapper that holds the actual runtime and FFI state.
pub(crate) struct RuntimeWrapper {
    pub runtime: Runtime,
    /// Last error message (as CString for FFI compatibility)
    pub last_error: Option<CString>,
}

impl RuntimeWrapper {
    pub fn new(config: RuntimeConfig) -> Result<Self, Trap> {
        Ok(Self {
            runtime: Runtime::new(config)?,
            last_error: None,
        })
    }

    /// Set an error message.
    pub fn set_error(&mut self, message: impl Into<String>) {
        let c_msg = CString::new(message.into()).unwrap_or_default();
        self.last_error = Some(c_msg);
    }

    /// Clear the last error.
    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Store the value of `result` through `out`, or record the trap.
    ///
    /// # Safety
    ///
    /// `out` must be null or valid for writes.
    pub unsafe fn finish<T>(&mut self, result: Result<T, Trap>, out: *mut T) -> JasmResult {
        match result {
            Ok(value) => {
                if !out.is_null() {
                    unsafe { out.write(value) };
                }
                JasmResult::Ok
            }
            Err(trap) => self.trap(trap),
        }
    }

    /// Record `trap` as the last error and map it to a result code.
    pub fn trap(&mut self, trap: Trap) -> JasmResult {
        let code = JasmResult::from(&trap);
        self.set_error(trap.to_string());
        code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_codes() {
        assert!(JasmResult::Ok.is_ok());
        assert!(!JasmResult::Ok.is_err());
        assert!(JasmResult::ErrorOutOfMemory.is_err());
    }

    #[test]
    fn test_trap_mapping() {
        assert_eq!(
            JasmResult::from(&Trap::NullReference { operation: "dispatch" }),
            JasmResult::ErrorNullReference
        );
        assert_eq!(
            JasmResult::from(&Trap::IndexOutOfBounds { index: 3, length: 3 }),
            JasmResult::ErrorOutOfBounds
        );
        assert_eq!(
            JasmResult::from(&Trap::DivisionByZero),
            JasmResult::ErrorArithmetic
        );
        assert_eq!(
            JasmResult::from(&Trap::UnknownRoot(8)),
            JasmResult::ErrorRoot
        );
    }

    #[test]
    fn test_wrapper_error() {
        let mut wrapper = RuntimeWrapper::new(RuntimeConfig::default()).unwrap();
        let code = wrapper.trap(Trap::DivisionByZero);
        assert_eq!(code, JasmResult::ErrorArithmetic);
        assert_eq!(
            wrapper.last_error.as_ref().unwrap().to_str().unwrap(),
            "integer division by zero"
        );
        wrapper.clear_error();
        assert!(wrapper.last_error.is_none());
    }

    #[test]
    fn test_finish_writes_output() {
        let mut wrapper = RuntimeWrapper::new(RuntimeConfig::default()).unwrap();
        let mut out = 0u32;
        let code = unsafe { wrapper.finish(Ok(7u32), &mut out) };
        assert_eq!(code, JasmResult::Ok);
        assert_eq!(out, 7);
        let code = unsafe { wrapper.finish(Err::<u32, _>(Trap::UnknownClass(1)), &mut out) };
        assert_eq!(code, JasmResult::ErrorNotFound);
        assert_eq!(out, 7);
    }
}
