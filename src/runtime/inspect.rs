//! Read-only views of the heap for debugging tools and the CLI.

use std::collections::BTreeSet;

use serde::Serialize;

use super::Runtime;
use super::array::{Element, ElementType};
use super::class::{AttributeKind, SlotDescriptor};
use super::header::{self, Address, HeapKind, NULL, Word};
use super::trap::Trap;

/// Nesting limit of a recursive dump. Deeper values become
/// [`HeapDump::Truncated`], keeping the dump tree shallow enough to build,
/// drop and render without recursing on the whole object graph.
pub const MAX_DUMP_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderFlags {
    pub is_object: bool,
    pub gc_mark: bool,
    pub has_overflow: bool,
    pub contains_pointers: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeDump {
    pub index: u32,
    pub name: String,
    pub kind: AttributeKind,
    pub value: Word,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<Box<HeapDump>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementDump {
    pub index: u32,
    pub value: Element,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<Box<HeapDump>>,
}

/// A decoded heap value, optionally with everything it references.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HeapDump {
    Null,
    Object {
        address: Address,
        flags: HeaderFlags,
        size_bytes: u64,
        class_id: u32,
        class_name: String,
        attributes: Vec<AttributeDump>,
    },
    Array {
        address: Address,
        flags: HeaderFlags,
        size_bytes: u64,
        element_type: ElementType,
        length: u32,
        elements: Vec<ElementDump>,
    },
    /// A value already dumped higher up; cycles end here.
    Visited { address: Address },
    /// A value below [`MAX_DUMP_DEPTH`]; dump it separately to continue.
    Truncated { address: Address },
}

/// Heap occupancy at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeapSummary {
    pub pages: u32,
    pub heap_size: u64,
    pub heap_base: Address,
    pub next_alloc: Address,
    pub bytes_allocated: u64,
    pub free_bytes: u64,
    pub free_blocks: usize,
    pub objects: usize,
    pub arrays: usize,
    pub overflow_blocks: usize,
    pub registered_roots: usize,
}

pub struct Inspector<'a> {
    runtime: &'a Runtime,
}

impl<'a> Inspector<'a> {
    pub fn new(runtime: &'a Runtime) -> Self {
        Self { runtime }
    }

    /// Dump the value at `address`. With `recurse`, referenced values are
    /// dumped inline up to [`MAX_DUMP_DEPTH`] levels; each value appears once.
    pub fn dump(&self, address: Address, recurse: bool) -> Result<HeapDump, Trap> {
        let mut visited = BTreeSet::new();
        self.dump_value(address, recurse, 0, &mut visited)
    }

    fn dump_value(
        &self,
        address: Address,
        recurse: bool,
        depth: usize,
        visited: &mut BTreeSet<Address>,
    ) -> Result<HeapDump, Trap> {
        if address == NULL {
            return Ok(HeapDump::Null);
        }
        if visited.contains(&address) {
            return Ok(HeapDump::Visited { address });
        }
        if depth >= MAX_DUMP_DEPTH {
            return Ok(HeapDump::Truncated { address });
        }
        visited.insert(address);
        let rt = self.runtime;
        if !rt.heap.is_allocated(address) {
            return Err(Trap::InvalidReference(address));
        }
        let value = header::read_value_header(rt.heap.memory(), address)
            .ok_or(Trap::InvalidReference(address))?;
        let flags = HeaderFlags {
            is_object: value.decoded.is_object(),
            gc_mark: value.decoded.gc_mark,
            has_overflow: value.decoded.has_overflow(),
            contains_pointers: value.decoded.contains_pointers(),
        };

        match value.kind() {
            HeapKind::Object => {
                let class = rt.classes.get(value.type_field)?;
                let mut attributes = Vec::with_capacity(value.count as usize);
                for (i, definition) in class.attributes.iter().enumerate() {
                    let index = i as u32;
                    let word = rt.get_attribute(address, SlotDescriptor::for_index(index))?;
                    let target = if recurse && definition.kind == AttributeKind::Reference && word != 0 {
                        Some(Box::new(self.dump_value(word as Address, true, depth + 1, visited)?))
                    } else {
                        None
                    };
                    attributes.push(AttributeDump {
                        index,
                        name: definition.name.clone(),
                        kind: definition.kind,
                        value: word,
                        target,
                    });
                }
                Ok(HeapDump::Object {
                    address,
                    flags,
                    size_bytes: value.size_bytes,
                    class_id: class.id,
                    class_name: class.name.clone(),
                    attributes,
                })
            }
            HeapKind::Array => {
                let element_type = rt.element_type_at(address)?;
                let mut elements = Vec::with_capacity(value.count as usize);
                for index in 0..value.count {
                    let element = rt.get_element(address, index as i64)?;
                    let target = match element {
                        Element::Reference(r) if recurse && r != NULL => {
                            Some(Box::new(self.dump_value(r, true, depth + 1, visited)?))
                        }
                        _ => None,
                    };
                    elements.push(ElementDump {
                        index,
                        value: element,
                        target,
                    });
                }
                Ok(HeapDump::Array {
                    address,
                    flags,
                    size_bytes: value.size_bytes,
                    element_type,
                    length: value.count,
                    elements,
                })
            }
            HeapKind::OverflowBlock => Err(Trap::KindMismatch {
                address,
                expected: "object or array",
            }),
        }
    }

    pub fn summary(&self) -> HeapSummary {
        let rt = self.runtime;
        let heap = &rt.heap;
        let mut summary = HeapSummary {
            pages: heap.memory().pages(),
            heap_size: heap.memory().len() as u64,
            heap_base: heap.heap_base(),
            next_alloc: heap.next_alloc(),
            bytes_allocated: heap.bytes_allocated(),
            free_bytes: heap.free_bytes(),
            free_blocks: heap.free_list().len(),
            registered_roots: rt.roots.len(),
            ..HeapSummary::default()
        };
        for (address, _) in heap.regions() {
            let flags = heap.memory().read_u8(address as usize);
            match header::decode_header(flags).kind {
                HeapKind::Object => summary.objects += 1,
                HeapKind::Array => summary.arrays += 1,
                HeapKind::OverflowBlock => summary.overflow_blocks += 1,
            }
        }
        summary
    }

    /// Whether attribute `index` of `object` holds a reference.
    pub fn is_pointer(&self, object: Address, index: u32) -> Result<bool, Trap> {
        let class = self.runtime.classes.get(self.runtime.class_of(object)?)?;
        Ok(class.is_reference_slot(index))
    }
}

/// Render any inspection result as pretty JSON.
pub fn to_json<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("failed to serialize: {}", e))
}
