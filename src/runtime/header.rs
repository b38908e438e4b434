use super::array::ElementType;
use super::memory::LinearMemory;

/// A byte offset into linear memory. Address 0 is the null reference.
pub type Address = u32;

/// An attribute slot's contents. References occupy the low 32 bits.
pub type Word = u64;

/// The null reference.
pub const NULL: Address = 0;

// =============================================================================
// Header Layout
// =============================================================================
//
// Every heap value starts with a flag byte followed by a 32-bit count field.
//
// Object:
// +-------+-----------------+-------------+----------------+-----------------+
// | flags | attr count (32) | class (32)  | inline slots   | overflow ptr    |
// | 0     | 1..5            | 5..9        | 9.. (8B each)  | only if flagged |
// +-------+-----------------+-------------+----------------+-----------------+
//
// Array:
// +-------+-----------------+-----------+-------------------------+
// | flags | count (32)      | elem type | elements (width x count)|
// | 0     | 1..5            | 5         | 6..                     |
// +-------+-----------------+-----------+-------------------------+
//
// Overflow block:
// +-------+-----------------+-------------+----------------+
// | flags | slot count (32) | next (32)   | slots (8B each)|
// | 0     | 1..5            | 5..9        | 9..            |
// +-------+-----------------+-------------+----------------+
//
// Flag byte:
// - Bit 0: value is an object
// - Bit 1: GC mark (compared against the collector's current sense)
// - Bit 2: objects: has overflow attributes; arrays: contains pointers
// - Bit 3: value is an overflow block

pub const FLAG_IS_OBJECT: u8 = 1 << 0;
pub const FLAG_GC_MARK: u8 = 1 << 1;
pub const FLAG_TYPE_SPECIFIC: u8 = 1 << 2;
pub const FLAG_OVERFLOW_BLOCK: u8 = 1 << 3;

pub const FLAGS_POS: usize = 0;
pub const SIZE_FIELD_POS: usize = 1;
pub const VTABLE_POINTER_POS: usize = 5;
pub const ELEMENT_TYPE_POS: usize = 5;
pub const NEXT_BLOCK_POS: usize = 5;

pub const OBJECT_HEADER_LENGTH: usize = 9;
pub const ARRAY_HEADER_LENGTH: usize = 6;
pub const OVERFLOW_HEADER_LENGTH: usize = 9;

/// Attribute slots stored directly in an object.
pub const INLINE_SLOTS: usize = 32;
/// Attribute slots stored in each overflow block.
pub const OVERFLOW_BLOCK_SLOTS: usize = 32;
/// Width of one attribute slot in bytes.
pub const SLOT_SIZE: usize = 8;
/// Every allocation is rounded up to this many bytes.
pub const ALIGNMENT: usize = 8;

/// The three shapes a heap value can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapKind {
    Object,
    Array,
    OverflowBlock,
}

impl HeapKind {
    pub fn name(self) -> &'static str {
        match self {
            HeapKind::Object => "object",
            HeapKind::Array => "array",
            HeapKind::OverflowBlock => "overflow block",
        }
    }
}

/// A decoded flag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedHeader {
    pub kind: HeapKind,
    pub gc_mark: bool,
    /// `hasOverflowAttributes` for objects, `containsPointers` for arrays.
    pub flag: bool,
}

impl DecodedHeader {
    pub fn is_object(&self) -> bool {
        self.kind == HeapKind::Object
    }

    pub fn has_overflow(&self) -> bool {
        self.kind == HeapKind::Object && self.flag
    }

    pub fn contains_pointers(&self) -> bool {
        self.kind == HeapKind::Array && self.flag
    }
}

/// Encode the flag byte for an object.
pub fn encode_object_header(has_overflow: bool) -> u8 {
    let mut header = FLAG_IS_OBJECT;
    if has_overflow {
        header |= FLAG_TYPE_SPECIFIC;
    }
    header
}

/// Encode the flag byte for an array.
pub fn encode_array_header(contains_pointers: bool) -> u8 {
    if contains_pointers {
        FLAG_TYPE_SPECIFIC
    } else {
        0
    }
}

/// Encode the flag byte for an overflow block.
pub fn encode_overflow_header() -> u8 {
    FLAG_OVERFLOW_BLOCK
}

/// Return `header` with its mark bit set to `marked`.
pub fn with_mark(header: u8, marked: bool) -> u8 {
    if marked {
        header | FLAG_GC_MARK
    } else {
        header & !FLAG_GC_MARK
    }
}

/// Decode a flag byte.
pub fn decode_header(header: u8) -> DecodedHeader {
    let kind = if header & FLAG_IS_OBJECT != 0 {
        HeapKind::Object
    } else if header & FLAG_OVERFLOW_BLOCK != 0 {
        HeapKind::OverflowBlock
    } else {
        HeapKind::Array
    };
    DecodedHeader {
        kind,
        gc_mark: header & FLAG_GC_MARK != 0,
        flag: header & FLAG_TYPE_SPECIFIC != 0,
    }
}

/// A fully decoded value header: flags plus the count and type fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueHeader {
    pub decoded: DecodedHeader,
    /// Attribute count, element count or overflow slot count.
    pub count: u32,
    /// Class id for objects, element type tag for arrays, next block for
    /// overflow blocks.
    pub type_field: u32,
    pub size_bytes: u64,
}

impl ValueHeader {
    pub fn kind(&self) -> HeapKind {
        self.decoded.kind
    }

    pub fn element_type(&self) -> Option<ElementType> {
        match self.decoded.kind {
            HeapKind::Array => ElementType::from_tag(self.type_field as u8),
            _ => None,
        }
    }
}

/// Read and decode the header of the value at `address`.
/// Returns None if the header is truncated or names an unknown element type.
pub fn read_value_header(memory: &LinearMemory, address: Address) -> Option<ValueHeader> {
    let base = address as usize;
    let flags = memory.try_read_u8(base + FLAGS_POS)?;
    let count = memory.try_read_u32(base + SIZE_FIELD_POS)?;
    let decoded = decode_header(flags);
    let (type_field, size_bytes) = match decoded.kind {
        HeapKind::Object => (
            memory.try_read_u32(base + VTABLE_POINTER_POS)?,
            object_size_bytes(count),
        ),
        HeapKind::Array => {
            let tag = memory.try_read_u8(base + ELEMENT_TYPE_POS)?;
            let element_type = ElementType::from_tag(tag)?;
            (tag as u32, array_size_bytes(count, element_type))
        }
        HeapKind::OverflowBlock => (
            memory.try_read_u32(base + NEXT_BLOCK_POS)?,
            overflow_block_size_bytes(count),
        ),
    };
    Some(ValueHeader {
        decoded,
        count,
        type_field,
        size_bytes,
    })
}

// =============================================================================
// Sizes and offsets
// =============================================================================

pub const fn align_up(n: u64) -> u64 {
    let a = ALIGNMENT as u64;
    (n + a - 1) & !(a - 1)
}

/// Number of attributes kept inline for an object with `attribute_count` attributes.
pub fn inline_slot_count(attribute_count: u32) -> usize {
    (attribute_count as usize).min(INLINE_SLOTS)
}

/// Number of overflow blocks needed for `attribute_count` attributes.
pub fn overflow_block_count(attribute_count: u32) -> usize {
    let extra = (attribute_count as usize).saturating_sub(INLINE_SLOTS);
    extra.div_ceil(OVERFLOW_BLOCK_SLOTS)
}

/// Total size in bytes of an object (excluding its overflow blocks).
pub fn object_size_bytes(attribute_count: u32) -> u64 {
    let mut size = (OBJECT_HEADER_LENGTH + inline_slot_count(attribute_count) * SLOT_SIZE) as u64;
    if attribute_count as usize > INLINE_SLOTS {
        size += SLOT_SIZE as u64;
    }
    align_up(size)
}

/// Total size in bytes of an array.
pub fn array_size_bytes(count: u32, element_type: ElementType) -> u64 {
    align_up(ARRAY_HEADER_LENGTH as u64 + count as u64 * element_type.width() as u64)
}

/// Total size in bytes of an overflow block holding `slots` slots.
pub fn overflow_block_size_bytes(slots: u32) -> u64 {
    align_up((OVERFLOW_HEADER_LENGTH + slots as usize * SLOT_SIZE) as u64)
}

/// Byte offset of inline slot `index` from the start of an object.
pub const fn inline_slot_offset(index: usize) -> usize {
    OBJECT_HEADER_LENGTH + index * SLOT_SIZE
}

/// Byte offset of the first-overflow-block pointer within an object.
pub const fn overflow_pointer_offset() -> usize {
    OBJECT_HEADER_LENGTH + INLINE_SLOTS * SLOT_SIZE
}

/// Byte offset of slot `index` from the start of an overflow block.
pub const fn overflow_slot_offset(index: usize) -> usize {
    OVERFLOW_HEADER_LENGTH + index * SLOT_SIZE
}

/// Byte offset of element `index` from the start of an array.
pub fn element_offset(index: usize, element_type: ElementType) -> usize {
    ARRAY_HEADER_LENGTH + index * element_type.width()
}
