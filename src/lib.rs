//! jasm-runtime - managed memory for programs compiled to linear memory
//!
//! This library provides the heap layout, allocator, mark-and-sweep collector
//! and dispatch support that compiled code calls into.
//! For C/C++ embedding, use the FFI module functions.

pub mod config;
pub mod ffi;
pub mod runtime;
pub mod workloads;

// Re-export commonly used types
pub use config::RuntimeConfig;
pub use runtime::{Address, Element, ElementType, Runtime, Trap, Word};

// Re-export FFI types for C bindings
pub use ffi::*;
