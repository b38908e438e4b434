use thiserror::Error;

use super::array::ElementType;
use super::class::ClassId;
use super::header::Address;

/// An unrecoverable runtime contract violation.
///
/// Every fallible runtime operation returns `Result<_, Trap>`; a trap unwinds
/// to the execution boundary and terminates the running program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Trap {
    #[error("null reference in {operation}")]
    NullReference { operation: &'static str },

    #[error("index {index} out of bounds (length {length})")]
    IndexOutOfBounds { index: i64, length: u32 },

    #[error("negative array size {0}")]
    NegativeArraySize(i64),

    #[error("array size {0} exceeds the maximum element count")]
    ArrayTooLarge(i64),

    #[error("integer division by zero")]
    DivisionByZero,

    #[error("out of memory: cannot allocate {requested} bytes ({reason})")]
    OutOfMemory { requested: u64, reason: &'static str },

    #[error("invalid allocation size {0}")]
    InvalidAllocationSize(u64),

    #[error("invalid reference {0:#x}")]
    InvalidReference(Address),

    #[error("expected {expected} at {address:#x}")]
    KindMismatch {
        address: Address,
        expected: &'static str,
    },

    #[error("element type mismatch: array holds {expected}, got {found}")]
    ElementTypeMismatch {
        expected: ElementType,
        found: ElementType,
    },

    #[error("unknown class id {0}")]
    UnknownClass(ClassId),

    #[error("class {class} has no method slot {slot}")]
    UnknownMethodSlot { class: ClassId, slot: u32 },

    #[error("attribute slot {slot} out of range (class has {count} attributes)")]
    AttributeOutOfRange { slot: u32, count: u32 },

    #[error("invalid root location {0:#x}")]
    InvalidRootLocation(Address),

    #[error("root location {0:#x} is not registered")]
    UnknownRoot(Address),

    #[error("shadow stack overflow")]
    ShadowStackOverflow,

    #[error("shadow stack underflow")]
    ShadowStackUnderflow,

    #[error("shadow stack slot {slot} outside the current frame ({size} slots)")]
    ShadowSlotOutOfRange { slot: u32, size: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Trap {
    /// Whether this trap is a null dereference.
    pub fn is_null_reference(&self) -> bool {
        matches!(self, Trap::NullReference { .. })
    }

    /// Whether this trap is a bounds violation.
    pub fn is_out_of_bounds(&self) -> bool {
        matches!(self, Trap::IndexOutOfBounds { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trap_messages() {
        assert_eq!(
            Trap::NullReference {
                operation: "attribute read"
            }
            .to_string(),
            "null reference in attribute read"
        );
        assert_eq!(
            Trap::IndexOutOfBounds {
                index: -1,
                length: 0
            }
            .to_string(),
            "index -1 out of bounds (length 0)"
        );
        assert_eq!(Trap::InvalidReference(0x40).to_string(), "invalid reference 0x40");
        assert_eq!(
            Trap::ElementTypeMismatch {
                expected: ElementType::Int,
                found: ElementType::Double
            }
            .to_string(),
            "element type mismatch: array holds int, got double"
        );
    }

    #[test]
    fn test_trap_predicates() {
        assert!(Trap::NullReference { operation: "dispatch" }.is_null_reference());
        assert!(!Trap::DivisionByZero.is_null_reference());
        assert!(
            Trap::IndexOutOfBounds {
                index: 3,
                length: 3
            }
            .is_out_of_bounds()
        );
    }
}
