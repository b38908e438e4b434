//! Error handling FFI functions.

#![allow(unsafe_op_in_unsafe_fn)]
#![allow(clippy::collapsible_if)]

use super::runtime_ffi::{get_wrapper, get_wrapper_mut};
use super::types::JasmRuntime;
use std::ffi::c_char;

/// Get the last error message.
///
/// Returns a pointer to the error message string, or NULL if no error.
/// The returned pointer is valid until the next API call that may set an error.
///
/// # Example (C)
/// ```c
/// JasmResult res = jasm_get_element_i32(rt, array, 10, &value);
/// if (res != JASM_RESULT_OK) {
///     printf("Trap: %s\n", jasm_get_error(rt));
/// }
/// ```
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jasm_get_error(rt: *const JasmRuntime) -> *const c_char {
    if let Some(wrapper) = get_wrapper(rt) {
        if let Some(ref error) = wrapper.last_error {
            return error.as_ptr();
        }
    }
    std::ptr::null()
}

/// Clear the last error.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jasm_clear_error(rt: *mut JasmRuntime) {
    if let Some(wrapper) = get_wrapper_mut(rt) {
        wrapper.clear_error();
    }
}

/// Check if there is a pending error.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jasm_has_error(rt: *const JasmRuntime) -> bool {
    get_wrapper(rt).is_some_and(|w| w.last_error.is_some())
}
