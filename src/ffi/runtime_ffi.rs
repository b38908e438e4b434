//! Runtime lifecycle, collection and root FFI functions.

#![allow(unsafe_op_in_unsafe_fn)]

use super::types::{JasmResult, JasmRuntime, RuntimeWrapper};
use crate::config::RuntimeConfig;

/// Create a new runtime with the default configuration.
///
/// The returned runtime must be freed with `jasm_runtime_free()`.
///
/// # Example (C)
/// ```c
/// JasmRuntime *rt = jasm_runtime_new();
/// // ... allocate and collect ...
/// jasm_runtime_free(rt);
/// ```
#[unsafe(no_mangle)]
pub extern "C" fn jasm_runtime_new() -> *mut JasmRuntime {
    match RuntimeWrapper::new(RuntimeConfig::default()) {
        Ok(wrapper) => Box::into_raw(Box::new(wrapper)) as *mut JasmRuntime,
        Err(_) => std::ptr::null_mut(),
    }
}

/// Create a runtime with explicit memory limits.
///
/// Returns NULL if the limits are inconsistent.
#[unsafe(no_mangle)]
pub extern "C" fn jasm_runtime_new_with_limits(
    initial_pages: u32,
    max_pages: u32,
    gc_enabled: bool,
) -> *mut JasmRuntime {
    let config = RuntimeConfig {
        initial_pages,
        max_pages,
        gc_enabled,
        ..RuntimeConfig::default()
    };
    match RuntimeWrapper::new(config) {
        Ok(wrapper) => Box::into_raw(Box::new(wrapper)) as *mut JasmRuntime,
        Err(_) => std::ptr::null_mut(),
    }
}

/// Free a runtime instance.
///
/// # Safety
///
/// - `rt` must be a valid pointer returned by `jasm_runtime_new*()`
/// - `rt` must not have been freed already
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jasm_runtime_free(rt: *mut JasmRuntime) {
    if rt.is_null() {
        return;
    }
    let _ = Box::from_raw(rt as *mut RuntimeWrapper);
}

/// Run a full collection.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jasm_collect(rt: *mut JasmRuntime) -> JasmResult {
    match get_wrapper_mut(rt) {
        Some(wrapper) => {
            wrapper.runtime.collect();
            JasmResult::Ok
        }
        None => JasmResult::ErrorInvalidArg,
    }
}

/// Current linear memory size in bytes (0 for a null runtime).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jasm_heap_size(rt: *const JasmRuntime) -> u64 {
    get_wrapper(rt).map_or(0, |w| w.runtime.heap_size())
}

/// Number of completed collections.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jasm_gc_cycles(rt: *const JasmRuntime) -> u64 {
    get_wrapper(rt).map_or(0, |w| w.runtime.stats().cycles as u64)
}

/// Address of global slot `index`, written to `out_location`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jasm_global_location(
    rt: *mut JasmRuntime,
    index: u32,
    out_location: *mut u32,
) -> JasmResult {
    let Some(wrapper) = get_wrapper_mut(rt) else {
        return JasmResult::ErrorInvalidArg;
    };
    let result = wrapper.runtime.global_location(index);
    wrapper.finish(result, out_location)
}

/// Treat the reference stored at `location` as a root.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jasm_register_root(rt: *mut JasmRuntime, location: u32) -> JasmResult {
    let Some(wrapper) = get_wrapper_mut(rt) else {
        return JasmResult::ErrorInvalidArg;
    };
    let result = wrapper.runtime.register_root(location);
    wrapper.finish(result, std::ptr::null_mut())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn jasm_unregister_root(rt: *mut JasmRuntime, location: u32) -> JasmResult {
    let Some(wrapper) = get_wrapper_mut(rt) else {
        return JasmResult::ErrorInvalidArg;
    };
    let result = wrapper.runtime.unregister_root(location);
    wrapper.finish(result, std::ptr::null_mut())
}

/// Store a reference into a root location.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jasm_store_reference(
    rt: *mut JasmRuntime,
    location: u32,
    reference: u32,
) -> JasmResult {
    let Some(wrapper) = get_wrapper_mut(rt) else {
        return JasmResult::ErrorInvalidArg;
    };
    let result = wrapper.runtime.store_reference(location, reference);
    wrapper.finish(result, std::ptr::null_mut())
}

/// Whether `reference` is null. Never fails.
#[unsafe(no_mangle)]
pub extern "C" fn jasm_is_null(reference: u32) -> bool {
    reference == crate::runtime::NULL
}

/// Helper to get a mutable reference to the wrapper from a raw pointer.
///
/// Returns None if the pointer is null.
pub(crate) unsafe fn get_wrapper_mut(rt: *mut JasmRuntime) -> Option<&'static mut RuntimeWrapper> {
    if rt.is_null() {
        None
    } else {
        Some(&mut *(rt as *mut RuntimeWrapper))
    }
}

/// Helper to get an immutable reference to the wrapper from a raw pointer.
///
/// Returns None if the pointer is null.
pub(crate) unsafe fn get_wrapper(rt: *const JasmRuntime) -> Option<&'static RuntimeWrapper> {
    if rt.is_null() {
        None
    } else {
        Some(&*(rt as *const RuntimeWrapper))
    }
}
