//! Class definition, allocation and field/element access FFI functions.
//!
//! Fallible functions return a `JasmResult` and write their value through an
//! out pointer; on failure the out pointer is left untouched and the message
//! is available from `jasm_get_error`.

#![allow(unsafe_op_in_unsafe_fn)]

use std::ffi::{CStr, c_char};

use super::runtime_ffi::{get_wrapper, get_wrapper_mut};
use super::types::{JasmResult, JasmRuntime};
use crate::runtime::{AttributeKind, ClassDefinition, Element, ElementType};

/// Attribute kind code for a primitive slot.
pub const JASM_ATTRIBUTE_PRIMITIVE: u8 = 0;
/// Attribute kind code for a reference slot.
pub const JASM_ATTRIBUTE_REFERENCE: u8 = 1;
/// Pass as `parent` to define a root class.
pub const JASM_NO_PARENT: i64 = -1;

// =============================================================================
// Classes and allocation
// =============================================================================

/// Define a class without methods.
///
/// # Arguments
/// - `name`: null-terminated class name
/// - `parent`: parent class id, or `JASM_NO_PARENT`
/// - `kinds`: `count` attribute kind codes, in declaration order
/// - `out_class`: receives the new class id
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jasm_define_class(
    rt: *mut JasmRuntime,
    name: *const c_char,
    parent: i64,
    kinds: *const u8,
    count: u32,
    out_class: *mut u32,
) -> JasmResult {
    let Some(wrapper) = get_wrapper_mut(rt) else {
        return JasmResult::ErrorInvalidArg;
    };
    if name.is_null() || (kinds.is_null() && count > 0) {
        wrapper.set_error("class name and attribute kinds must not be null");
        return JasmResult::ErrorInvalidArg;
    }

    let name = CStr::from_ptr(name).to_string_lossy().into_owned();
    let mut definition = ClassDefinition::new(name);
    if parent >= 0 {
        definition = definition.extends(parent as u32);
    }
    let kinds: &[u8] = if count == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(kinds, count as usize)
    };
    for (i, &code) in kinds.iter().enumerate() {
        let kind = match code {
            JASM_ATTRIBUTE_PRIMITIVE => AttributeKind::Primitive,
            JASM_ATTRIBUTE_REFERENCE => AttributeKind::Reference,
            other => {
                wrapper.set_error(format!("invalid attribute kind {} at index {}", other, i));
                return JasmResult::ErrorInvalidArg;
            }
        };
        definition = definition.attribute(format!("a{}", i), kind);
    }

    let result = wrapper.runtime.define_class(definition);
    wrapper.finish(result, out_class)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn jasm_allocate_object(
    rt: *mut JasmRuntime,
    class: u32,
    out_object: *mut u32,
) -> JasmResult {
    let Some(wrapper) = get_wrapper_mut(rt) else {
        return JasmResult::ErrorInvalidArg;
    };
    let result = wrapper.runtime.allocate_object(class);
    wrapper.finish(result, out_object)
}

/// Allocate an array. `element_type` is the header tag
/// (0 boolean, 1 byte, 2 char, 3 short, 4 int, 5 long, 6 float, 7 double,
/// 8 reference).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jasm_allocate_array(
    rt: *mut JasmRuntime,
    element_type: u8,
    count: i64,
    out_array: *mut u32,
) -> JasmResult {
    let Some(wrapper) = get_wrapper_mut(rt) else {
        return JasmResult::ErrorInvalidArg;
    };
    let Some(element_type) = ElementType::from_tag(element_type) else {
        wrapper.set_error(format!("invalid element type {}", element_type));
        return JasmResult::ErrorInvalidArg;
    };
    let result = wrapper.runtime.allocate_array(element_type, count);
    wrapper.finish(result, out_array)
}

// =============================================================================
// Attributes
// =============================================================================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn jasm_get_attribute(
    rt: *mut JasmRuntime,
    object: u32,
    index: u32,
    out_value: *mut u64,
) -> JasmResult {
    let Some(wrapper) = get_wrapper_mut(rt) else {
        return JasmResult::ErrorInvalidArg;
    };
    let result = wrapper.runtime.get_attribute_at(object, index);
    wrapper.finish(result, out_value)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn jasm_set_attribute(
    rt: *mut JasmRuntime,
    object: u32,
    index: u32,
    value: u64,
) -> JasmResult {
    let Some(wrapper) = get_wrapper_mut(rt) else {
        return JasmResult::ErrorInvalidArg;
    };
    let result = wrapper.runtime.set_attribute_at(object, index, value);
    wrapper.finish(result, std::ptr::null_mut())
}

// =============================================================================
// Elements
// =============================================================================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn jasm_array_length(
    rt: *mut JasmRuntime,
    array: u32,
    out_length: *mut u32,
) -> JasmResult {
    let Some(wrapper) = get_wrapper_mut(rt) else {
        return JasmResult::ErrorInvalidArg;
    };
    let result = wrapper.runtime.array_length(array);
    wrapper.finish(result, out_length)
}

/// Read an element as its raw little-endian payload, whatever its type.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jasm_get_element_bits(
    rt: *mut JasmRuntime,
    array: u32,
    index: i64,
    out_bits: *mut u64,
) -> JasmResult {
    let Some(wrapper) = get_wrapper_mut(rt) else {
        return JasmResult::ErrorInvalidArg;
    };
    let result = wrapper.runtime.get_element(array, index).map(Element::to_bits);
    wrapper.finish(result, out_bits)
}

/// Write an element from its raw payload; the array's own element type
/// decides how the bits are interpreted.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jasm_set_element_bits(
    rt: *mut JasmRuntime,
    array: u32,
    index: i64,
    bits: u64,
) -> JasmResult {
    let Some(wrapper) = get_wrapper_mut(rt) else {
        return JasmResult::ErrorInvalidArg;
    };
    let result = wrapper
        .runtime
        .array_element_type(array)
        .and_then(|ty| wrapper.runtime.set_element(array, index, Element::from_bits(ty, bits)));
    wrapper.finish(result, std::ptr::null_mut())
}

macro_rules! typed_element_accessors {
    ($get:ident, $set:ident, $ty:ty, $variant:ident) => {
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $get(
            rt: *mut JasmRuntime,
            array: u32,
            index: i64,
            out_value: *mut $ty,
        ) -> JasmResult {
            let Some(wrapper) = get_wrapper_mut(rt) else {
                return JasmResult::ErrorInvalidArg;
            };
            let result = wrapper.runtime.get_element(array, index).and_then(|e| match e {
                Element::$variant(v) => Ok(v),
                other => Err(crate::runtime::Trap::ElementTypeMismatch {
                    expected: other.element_type(),
                    found: Element::$variant(Default::default()).element_type(),
                }),
            });
            wrapper.finish(result, out_value)
        }

        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $set(
            rt: *mut JasmRuntime,
            array: u32,
            index: i64,
            value: $ty,
        ) -> JasmResult {
            let Some(wrapper) = get_wrapper_mut(rt) else {
                return JasmResult::ErrorInvalidArg;
            };
            let result = wrapper
                .runtime
                .set_element(array, index, Element::$variant(value));
            wrapper.finish(result, std::ptr::null_mut())
        }
    };
}

typed_element_accessors!(jasm_get_element_i32, jasm_set_element_i32, i32, Int);
typed_element_accessors!(jasm_get_element_i64, jasm_set_element_i64, i64, Long);
typed_element_accessors!(jasm_get_element_f64, jasm_set_element_f64, f64, Double);
typed_element_accessors!(jasm_get_element_ref, jasm_set_element_ref, u32, Reference);

/// Whether attribute `index` of `object` is reference-typed. Returns false for
/// invalid objects.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jasm_is_pointer(rt: *const JasmRuntime, object: u32, index: u32) -> bool {
    get_wrapper(rt)
        .and_then(|w| w.runtime.inspector().is_pointer(object, index).ok())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::error::jasm_get_error;
    use crate::ffi::runtime_ffi::{jasm_runtime_free, jasm_runtime_new};

    #[test]
    fn test_object_roundtrip() {
        let rt = jasm_runtime_new();
        unsafe {
            let kinds = [JASM_ATTRIBUTE_PRIMITIVE, JASM_ATTRIBUTE_REFERENCE];
            let mut class = u32::MAX;
            let name = c"Node";
            assert_eq!(
                jasm_define_class(rt, name.as_ptr(), JASM_NO_PARENT, kinds.as_ptr(), 2, &mut class),
                JasmResult::Ok
            );
            assert_eq!(class, 0);

            let mut object = 0u32;
            assert_eq!(jasm_allocate_object(rt, class, &mut object), JasmResult::Ok);
            assert_eq!(jasm_set_attribute(rt, object, 0, 99), JasmResult::Ok);
            let mut value = 0u64;
            assert_eq!(jasm_get_attribute(rt, object, 0, &mut value), JasmResult::Ok);
            assert_eq!(value, 99);
            assert!(jasm_is_pointer(rt, object, 1));
            assert!(!jasm_is_pointer(rt, object, 0));

            assert_eq!(
                jasm_get_attribute(rt, 0, 0, &mut value),
                JasmResult::ErrorNullReference
            );
            assert!(!jasm_get_error(rt).is_null());
            jasm_runtime_free(rt);
        }
    }

    #[test]
    fn test_typed_elements() {
        let rt = jasm_runtime_new();
        unsafe {
            let mut array = 0u32;
            assert_eq!(jasm_allocate_array(rt, 4, 3, &mut array), JasmResult::Ok);
            let mut length = 0u32;
            assert_eq!(jasm_array_length(rt, array, &mut length), JasmResult::Ok);
            assert_eq!(length, 3);

            assert_eq!(jasm_set_element_i32(rt, array, 2, -5), JasmResult::Ok);
            let mut value = 0i32;
            assert_eq!(jasm_get_element_i32(rt, array, 2, &mut value), JasmResult::Ok);
            assert_eq!(value, -5);

            assert_eq!(jasm_set_element_i32(rt, array, 3, 1), JasmResult::ErrorOutOfBounds);
            assert_eq!(jasm_set_element_f64(rt, array, 0, 1.5), JasmResult::ErrorType);
            let mut wide = 0i64;
            assert_eq!(jasm_get_element_i64(rt, array, 0, &mut wide), JasmResult::ErrorType);
            jasm_runtime_free(rt);
        }
    }

    #[test]
    fn test_element_bits() {
        let rt = jasm_runtime_new();
        unsafe {
            let mut array = 0u32;
            // short array
            assert_eq!(jasm_allocate_array(rt, 3, 1, &mut array), JasmResult::Ok);
            assert_eq!(jasm_set_element_bits(rt, array, 0, 0xffff), JasmResult::Ok);
            let mut bits = 0u64;
            assert_eq!(jasm_get_element_bits(rt, array, 0, &mut bits), JasmResult::Ok);
            assert_eq!(bits, 0xffff);
            jasm_runtime_free(rt);
        }
    }

    #[test]
    fn test_invalid_arguments() {
        let rt = jasm_runtime_new();
        unsafe {
            let mut out = 0u32;
            assert_eq!(jasm_allocate_array(rt, 42, 1, &mut out), JasmResult::ErrorInvalidArg);
            assert_eq!(jasm_allocate_array(rt, 4, -1, &mut out), JasmResult::ErrorInvalidArg);
            assert_eq!(jasm_allocate_object(rt, 5, &mut out), JasmResult::ErrorNotFound);
            let kinds = [7u8];
            assert_eq!(
                jasm_define_class(rt, c"Bad".as_ptr(), JASM_NO_PARENT, kinds.as_ptr(), 1, &mut out),
                JasmResult::ErrorInvalidArg
            );
            jasm_runtime_free(rt);
        }
    }
}
