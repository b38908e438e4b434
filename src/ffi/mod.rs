//! C FFI for embedding the runtime
//!
//! This module provides a C-compatible API for hosts that drive the managed
//! heap directly. All public functions use `extern "C"` ABI.
//!
//! # Safety
//!
//! All FFI functions that take raw pointers require:
//! - Non-null pointers (unless documented otherwise)
//! - Valid runtime instances created by `jasm_runtime_new()`
//! - Proper lifetime management (the runtime must outlive all operations)

mod error;
mod heap_ffi;
mod runtime_ffi;
mod types;

// Re-export all FFI types and functions for public use
#[allow(unused_imports)]
pub use error::*;
#[allow(unused_imports)]
pub use heap_ffi::*;
#[allow(unused_imports)]
pub use runtime_ffi::*;
#[allow(unused_imports)]
pub use types::*;

/// Version information
pub const JASM_VERSION_MAJOR: u32 = 0;
pub const JASM_VERSION_MINOR: u32 = 1;
pub const JASM_VERSION_PATCH: u32 = 0;

/// Get the version string
#[unsafe(no_mangle)]
pub extern "C" fn jasm_version() -> *const std::ffi::c_char {
    static VERSION: &[u8] = b"0.1.0\0";
    VERSION.as_ptr() as *const std::ffi::c_char
}

/// Get the major version number
#[unsafe(no_mangle)]
pub extern "C" fn jasm_version_major() -> u32 {
    JASM_VERSION_MAJOR
}

/// Get the minor version number
#[unsafe(no_mangle)]
pub extern "C" fn jasm_version_minor() -> u32 {
    JASM_VERSION_MINOR
}

/// Get the patch version number
#[unsafe(no_mangle)]
pub extern "C" fn jasm_version_patch() -> u32 {
    JASM_VERSION_PATCH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(jasm_version_major(), 0);
        assert_eq!(jasm_version_minor(), 1);
        assert_eq!(jasm_version_patch(), 0);

        let version = unsafe { std::ffi::CStr::from_ptr(jasm_version()).to_str().unwrap() };
        assert_eq!(version, env!("CARGO_PKG_VERSION"));
    }
}
