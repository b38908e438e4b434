use std::fmt;

use serde::Serialize;

use super::Runtime;
use super::header::{
    self, Address, ELEMENT_TYPE_POS, HeapKind, SIZE_FIELD_POS, array_size_bytes, element_offset,
};
use super::trap::Trap;

/// Largest element count an array may have (exclusive).
pub const MAX_ARRAY_LENGTH: i64 = 1 << 31;

// =============================================================================
// ElementType - element storage kind for arrays
// =============================================================================

/// The element type tag stored in an array header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ElementType {
    Boolean = 0,
    Byte = 1,
    Char = 2,
    Short = 3,
    Int = 4,
    Long = 5,
    Float = 6,
    Double = 7,
    Reference = 8,
}

impl ElementType {
    pub const ALL: [ElementType; 9] = [
        ElementType::Boolean,
        ElementType::Byte,
        ElementType::Char,
        ElementType::Short,
        ElementType::Int,
        ElementType::Long,
        ElementType::Float,
        ElementType::Double,
        ElementType::Reference,
    ];

    /// Decode from the tag byte stored in the header.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Bytes occupied by one element.
    pub fn width(self) -> usize {
        match self {
            ElementType::Boolean | ElementType::Byte => 1,
            ElementType::Char | ElementType::Short => 2,
            ElementType::Int | ElementType::Float => 4,
            ElementType::Long | ElementType::Double | ElementType::Reference => 8,
        }
    }

    /// Whether arrays of this type are traced by the collector.
    pub fn contains_pointers(self) -> bool {
        matches!(self, ElementType::Reference)
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementType::Boolean => "boolean",
            ElementType::Byte => "byte",
            ElementType::Char => "char",
            ElementType::Short => "short",
            ElementType::Int => "int",
            ElementType::Long => "long",
            ElementType::Float => "float",
            ElementType::Double => "double",
            ElementType::Reference => "reference",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Element - a typed array element
// =============================================================================

/// A value read from or written to an array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Element {
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Reference(Address),
}

impl Element {
    pub fn element_type(&self) -> ElementType {
        match self {
            Element::Boolean(_) => ElementType::Boolean,
            Element::Byte(_) => ElementType::Byte,
            Element::Char(_) => ElementType::Char,
            Element::Short(_) => ElementType::Short,
            Element::Int(_) => ElementType::Int,
            Element::Long(_) => ElementType::Long,
            Element::Float(_) => ElementType::Float,
            Element::Double(_) => ElementType::Double,
            Element::Reference(_) => ElementType::Reference,
        }
    }

    /// The raw little-endian payload, zero-extended to 64 bits.
    pub fn to_bits(self) -> u64 {
        match self {
            Element::Boolean(b) => b as u64,
            Element::Byte(v) => v as u8 as u64,
            Element::Char(v) => v as u64,
            Element::Short(v) => v as u16 as u64,
            Element::Int(v) => v as u32 as u64,
            Element::Long(v) => v as u64,
            Element::Float(v) => v.to_bits() as u64,
            Element::Double(v) => v.to_bits(),
            Element::Reference(r) => r as u64,
        }
    }

    /// Rebuild an element of `element_type` from its raw payload.
    /// Bits above the element width are ignored.
    pub fn from_bits(element_type: ElementType, bits: u64) -> Self {
        match element_type {
            ElementType::Boolean => Element::Boolean(bits & 0xff != 0),
            ElementType::Byte => Element::Byte(bits as u8 as i8),
            ElementType::Char => Element::Char(bits as u16),
            ElementType::Short => Element::Short(bits as u16 as i16),
            ElementType::Int => Element::Int(bits as u32 as i32),
            ElementType::Long => Element::Long(bits as i64),
            ElementType::Float => Element::Float(f32::from_bits(bits as u32)),
            ElementType::Double => Element::Double(f64::from_bits(bits)),
            ElementType::Reference => Element::Reference(bits as u32),
        }
    }

    pub fn as_reference(&self) -> Option<Address> {
        match self {
            Element::Reference(r) => Some(*r),
            _ => None,
        }
    }
}

// =============================================================================
// Array operations
// =============================================================================

impl Runtime {
    /// Allocate a zero-filled array of `count` elements.
    pub fn allocate_array(&mut self, element_type: ElementType, count: i64) -> Result<Address, Trap> {
        if count < 0 {
            return Err(Trap::NegativeArraySize(count));
        }
        if count >= MAX_ARRAY_LENGTH {
            return Err(Trap::ArrayTooLarge(count));
        }
        let count = count as u32;
        let address = self.allocate(array_size_bytes(count, element_type))?;

        let flags = header::with_mark(
            header::encode_array_header(element_type.contains_pointers()),
            self.collector.allocation_mark(),
        );
        let base = address as usize;
        let memory = self.heap.memory_mut();
        memory.write_u8(base, flags);
        memory.write_u32(base + SIZE_FIELD_POS, count);
        memory.write_u8(base + ELEMENT_TYPE_POS, element_type.tag());
        Ok(address)
    }

    /// Number of elements in an array.
    pub fn array_length(&self, array: Address) -> Result<u32, Trap> {
        self.expect_kind(array, HeapKind::Array, "array length")?;
        Ok(self.heap.memory().read_u32(array as usize + SIZE_FIELD_POS))
    }

    /// Element type of an array.
    pub fn array_element_type(&self, array: Address) -> Result<ElementType, Trap> {
        self.expect_kind(array, HeapKind::Array, "array element type")?;
        self.element_type_at(array)
    }

    /// Read element `index`. Traps unless `0 <= index < length`.
    pub fn get_element(&self, array: Address, index: i64) -> Result<Element, Trap> {
        let (element_type, offset) = self.element_location(array, index, "element read")?;
        let memory = self.heap.memory();
        let bits = match element_type.width() {
            1 => memory.read_u8(offset) as u64,
            2 => memory.read_u16(offset) as u64,
            4 => memory.read_u32(offset) as u64,
            _ => memory.read_u64(offset),
        };
        Ok(Element::from_bits(element_type, bits))
    }

    /// Write element `index`. Traps unless `0 <= index < length` and the value
    /// matches the array's element type.
    pub fn set_element(&mut self, array: Address, index: i64, value: Element) -> Result<(), Trap> {
        let (element_type, offset) = self.element_location(array, index, "element write")?;
        if value.element_type() != element_type {
            return Err(Trap::ElementTypeMismatch {
                expected: element_type,
                found: value.element_type(),
            });
        }
        if let Element::Reference(r) = value {
            self.check_reference(r)?;
        }

        let bits = value.to_bits();
        let memory = self.heap.memory_mut();
        match element_type.width() {
            1 => memory.write_u8(offset, bits as u8),
            2 => memory.write_u16(offset, bits as u16),
            4 => memory.write_u32(offset, bits as u32),
            _ => memory.write_u64(offset, bits),
        }
        Ok(())
    }

    /// Resolve the element type and byte address of `array[index]`.
    fn element_location(
        &self,
        array: Address,
        index: i64,
        operation: &'static str,
    ) -> Result<(ElementType, usize), Trap> {
        self.expect_kind(array, HeapKind::Array, operation)?;
        let length = self.heap.memory().read_u32(array as usize + SIZE_FIELD_POS);
        if index < 0 || index >= length as i64 {
            return Err(Trap::IndexOutOfBounds { index, length });
        }
        let element_type = self.element_type_at(array)?;
        Ok((
            element_type,
            array as usize + element_offset(index as usize, element_type),
        ))
    }

    pub(crate) fn element_type_at(&self, array: Address) -> Result<ElementType, Trap> {
        let tag = self.heap.memory().read_u8(array as usize + ELEMENT_TYPE_POS);
        ElementType::from_tag(tag).ok_or(Trap::KindMismatch {
            address: array,
            expected: "array with a valid element type",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::runtime::header::NULL;

    fn runtime() -> Runtime {
        Runtime::new(RuntimeConfig::default()).unwrap()
    }

    fn sample(element_type: ElementType) -> Element {
        match element_type {
            ElementType::Boolean => Element::Boolean(true),
            ElementType::Byte => Element::Byte(-7),
            ElementType::Char => Element::Char(0xfffe),
            ElementType::Short => Element::Short(-12345),
            ElementType::Int => Element::Int(i32::MIN + 3),
            ElementType::Long => Element::Long(i64::MAX - 9),
            ElementType::Float => Element::Float(3.25),
            ElementType::Double => Element::Double(-1.0e300),
            ElementType::Reference => Element::Reference(NULL),
        }
    }

    #[test]
    fn test_widths() {
        assert_eq!(ElementType::Byte.width(), 1);
        assert_eq!(ElementType::Short.width(), 2);
        assert_eq!(ElementType::Int.width(), 4);
        assert_eq!(ElementType::Float.width(), 4);
        assert_eq!(ElementType::Long.width(), 8);
        assert_eq!(ElementType::Double.width(), 8);
        assert_eq!(ElementType::Reference.width(), 8);
    }

    #[test]
    fn test_tag_decoding() {
        for element_type in ElementType::ALL {
            assert_eq!(ElementType::from_tag(element_type.tag()), Some(element_type));
        }
        assert_eq!(ElementType::from_tag(9), None);
    }

    #[test]
    fn test_only_reference_arrays_contain_pointers() {
        for element_type in ElementType::ALL {
            assert_eq!(
                element_type.contains_pointers(),
                element_type == ElementType::Reference
            );
        }
    }

    #[test]
    fn test_set_then_get_every_type() {
        let mut rt = runtime();
        for element_type in ElementType::ALL {
            let array = rt.allocate_array(element_type, 4).unwrap();
            let value = sample(element_type);
            rt.set_element(array, 2, value).unwrap();
            assert_eq!(rt.get_element(array, 2).unwrap(), value);
            // neighbours untouched
            assert_eq!(rt.get_element(array, 1).unwrap().to_bits(), 0);
            assert_eq!(rt.get_element(array, 3).unwrap().to_bits(), 0);
        }
    }

    #[test]
    fn test_new_array_is_zeroed() {
        let mut rt = runtime();
        let array = rt.allocate_array(ElementType::Long, 5).unwrap();
        for i in 0..5 {
            assert_eq!(rt.get_element(array, i).unwrap(), Element::Long(0));
        }
        assert_eq!(rt.array_length(array).unwrap(), 5);
        assert_eq!(rt.array_element_type(array).unwrap(), ElementType::Long);
    }

    #[test]
    fn test_bounds_on_empty_array() {
        let mut rt = runtime();
        let array = rt.allocate_array(ElementType::Int, 0).unwrap();
        assert!(rt.get_element(array, 0).unwrap_err().is_out_of_bounds());
        assert!(rt.get_element(array, -1).unwrap_err().is_out_of_bounds());
        assert!(
            rt.set_element(array, 0, Element::Int(1))
                .unwrap_err()
                .is_out_of_bounds()
        );
    }

    #[test]
    fn test_bounds_boundaries() {
        let mut rt = runtime();
        for n in [1i64, 2, 17] {
            let array = rt.allocate_array(ElementType::Short, n).unwrap();
            assert!(rt.get_element(array, 0).is_ok());
            assert!(rt.get_element(array, n - 1).is_ok());
            assert_eq!(
                rt.get_element(array, n).unwrap_err(),
                Trap::IndexOutOfBounds {
                    index: n,
                    length: n as u32
                }
            );
            assert!(rt.get_element(array, -1).unwrap_err().is_out_of_bounds());
            assert!(
                rt.set_element(array, n, Element::Short(1))
                    .unwrap_err()
                    .is_out_of_bounds()
            );
        }
    }

    #[test]
    fn test_invalid_counts_trap() {
        let mut rt = runtime();
        assert_eq!(
            rt.allocate_array(ElementType::Int, -1).unwrap_err(),
            Trap::NegativeArraySize(-1)
        );
        assert_eq!(
            rt.allocate_array(ElementType::Int, MAX_ARRAY_LENGTH).unwrap_err(),
            Trap::ArrayTooLarge(MAX_ARRAY_LENGTH)
        );
    }

    #[test]
    fn test_type_mismatch_traps() {
        let mut rt = runtime();
        let array = rt.allocate_array(ElementType::Int, 1).unwrap();
        assert_eq!(
            rt.set_element(array, 0, Element::Long(1)).unwrap_err(),
            Trap::ElementTypeMismatch {
                expected: ElementType::Int,
                found: ElementType::Long
            }
        );
    }

    #[test]
    fn test_reference_element_must_be_live_value() {
        let mut rt = runtime();
        let array = rt.allocate_array(ElementType::Reference, 1).unwrap();
        let target = rt.allocate_array(ElementType::Int, 1).unwrap();
        rt.set_element(array, 0, Element::Reference(target)).unwrap();
        assert_eq!(
            rt.get_element(array, 0).unwrap().as_reference(),
            Some(target)
        );
        assert_eq!(
            rt.set_element(array, 0, Element::Reference(target + 8))
                .unwrap_err(),
            Trap::InvalidReference(target + 8)
        );
    }

    #[test]
    fn test_null_array_traps() {
        let mut rt = runtime();
        assert!(rt.get_element(NULL, 0).unwrap_err().is_null_reference());
        assert!(
            rt.set_element(NULL, 0, Element::Int(0))
                .unwrap_err()
                .is_null_reference()
        );
        assert!(rt.array_length(NULL).unwrap_err().is_null_reference());
    }

    #[test]
    fn test_element_bits_roundtrip_sign() {
        assert_eq!(
            Element::from_bits(ElementType::Byte, Element::Byte(-1).to_bits()),
            Element::Byte(-1)
        );
        assert_eq!(Element::Byte(-1).to_bits(), 0xff);
        assert_eq!(Element::Short(-1).to_bits(), 0xffff);
        assert_eq!(Element::Int(-1).to_bits(), 0xffff_ffff);
    }
}
