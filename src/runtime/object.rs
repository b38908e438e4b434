use super::Runtime;
use super::class::{ClassId, SlotDescriptor};
use super::header::{
    self, Address, HeapKind, INLINE_SLOTS, NEXT_BLOCK_POS, NULL, OVERFLOW_BLOCK_SLOTS,
    SIZE_FIELD_POS, VTABLE_POINTER_POS, Word, inline_slot_offset, overflow_pointer_offset,
    overflow_slot_offset,
};
use super::trap::Trap;

// =============================================================================
// Object allocation
// =============================================================================

impl Runtime {
    /// Allocate a zero-initialised instance of `class`, including any overflow
    /// blocks its attribute count requires.
    pub fn allocate_object(&mut self, class: ClassId) -> Result<Address, Trap> {
        let info = self.classes.get(class)?;
        let count = info.attribute_count();
        let has_overflow = info.has_overflow();

        let address = self.allocate(header::object_size_bytes(count))?;
        let flags = header::with_mark(
            header::encode_object_header(has_overflow),
            self.collector.allocation_mark(),
        );
        let memory = self.heap.memory_mut();
        memory.write_u8(address as usize, flags);
        memory.write_u32(address as usize + SIZE_FIELD_POS, count);
        memory.write_u32(address as usize + VTABLE_POINTER_POS, class);

        if has_overflow {
            // each block allocation may collect; the object must survive it
            self.roots.pin(address);
            let chained = self.allocate_overflow_chain(address, count);
            self.roots.unpin(address);
            chained?;
        }
        Ok(address)
    }

    /// Allocate and link the overflow blocks of `object` in declaration order.
    /// Each block is linked as soon as it exists so a collection in between
    /// sees the partial chain.
    fn allocate_overflow_chain(&mut self, object: Address, count: u32) -> Result<(), Trap> {
        let mut remaining = count as usize - INLINE_SLOTS;
        let mut link = object as usize + overflow_pointer_offset();
        let mut first_link = true;

        while remaining > 0 {
            let slots = remaining.min(OVERFLOW_BLOCK_SLOTS) as u32;
            let block = self.allocate(header::overflow_block_size_bytes(slots))?;
            let flags = header::with_mark(
                header::encode_overflow_header(),
                self.collector.allocation_mark(),
            );
            let memory = self.heap.memory_mut();
            memory.write_u8(block as usize, flags);
            memory.write_u32(block as usize + SIZE_FIELD_POS, slots);
            if first_link {
                memory.write_u64(link, block as u64);
                first_link = false;
            } else {
                memory.write_u32(link, block);
            }

            link = block as usize + NEXT_BLOCK_POS;
            remaining -= slots as usize;
        }
        Ok(())
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    /// The class an object was allocated as.
    pub fn class_of(&self, object: Address) -> Result<ClassId, Trap> {
        self.expect_kind(object, HeapKind::Object, "class lookup")?;
        Ok(self.read_class_id(object))
    }

    /// Number of attribute slots of an object.
    pub fn attribute_count(&self, object: Address) -> Result<u32, Trap> {
        self.expect_kind(object, HeapKind::Object, "attribute count")?;
        Ok(self.heap.memory().read_u32(object as usize + SIZE_FIELD_POS))
    }

    pub fn get_attribute(&self, object: Address, slot: SlotDescriptor) -> Result<Word, Trap> {
        let (at, _) = self.attribute_location(object, slot, "attribute read")?;
        Ok(self.heap.memory().read_u64(at))
    }

    /// Write an attribute slot. Reference-typed slots only accept null or the
    /// address of a live value.
    pub fn set_attribute(&mut self, object: Address, slot: SlotDescriptor, value: Word) -> Result<(), Trap> {
        let (at, index) = self.attribute_location(object, slot, "attribute write")?;
        let class = self.classes.get(self.read_class_id(object))?;
        if class.is_reference_slot(index) {
            let reference =
                Address::try_from(value).map_err(|_| Trap::InvalidReference(value as Address))?;
            self.check_reference(reference)?;
        }
        self.heap.memory_mut().write_u64(at, value);
        Ok(())
    }

    /// [`Runtime::get_attribute`] by flattened attribute index.
    pub fn get_attribute_at(&self, object: Address, index: u32) -> Result<Word, Trap> {
        self.get_attribute(object, SlotDescriptor::for_index(index))
    }

    /// [`Runtime::set_attribute`] by flattened attribute index.
    pub fn set_attribute_at(&mut self, object: Address, index: u32, value: Word) -> Result<(), Trap> {
        self.set_attribute(object, SlotDescriptor::for_index(index), value)
    }

    /// Read a reference-typed attribute.
    pub fn get_reference(&self, object: Address, slot: SlotDescriptor) -> Result<Address, Trap> {
        Ok(self.get_attribute(object, slot)? as Address)
    }

    /// Resolve the byte address and flattened index of an attribute slot,
    /// walking the overflow chain when needed.
    fn attribute_location(
        &self,
        object: Address,
        slot: SlotDescriptor,
        operation: &'static str,
    ) -> Result<(usize, u32), Trap> {
        self.expect_kind(object, HeapKind::Object, operation)?;
        let memory = self.heap.memory();
        let count = memory.read_u32(object as usize + SIZE_FIELD_POS);
        let index = match slot.index() {
            Some(index) if index < count => index,
            _ => {
                return Err(Trap::AttributeOutOfRange {
                    slot: slot.nominal_index(),
                    count,
                });
            }
        };

        match slot {
            SlotDescriptor::Inline(n) => Ok((object as usize + inline_slot_offset(n as usize), index)),
            SlotDescriptor::Overflow { block, slot } => {
                let mut current = memory.read_u32(object as usize + overflow_pointer_offset());
                for _ in 0..block {
                    if current == NULL {
                        break;
                    }
                    current = memory.read_u32(current as usize + NEXT_BLOCK_POS);
                }
                if current == NULL || !self.heap.is_allocated(current) {
                    return Err(Trap::KindMismatch {
                        address: object,
                        expected: "object with a complete overflow chain",
                    });
                }
                Ok((current as usize + overflow_slot_offset(slot as usize), index))
            }
        }
    }

    fn read_class_id(&self, object: Address) -> ClassId {
        self.heap
            .memory()
            .read_u32(object as usize + VTABLE_POINTER_POS)
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Invoke method `slot` of the receiver's allocation-time class.
    pub fn dispatch(&mut self, object: Address, slot: u32, args: &[Word]) -> Result<Word, Trap> {
        self.expect_kind(object, HeapKind::Object, "dispatch")?;
        let class = self.read_class_id(object);
        let entry = self
            .classes
            .get(class)?
            .method_table
            .get(slot)
            .ok_or(Trap::UnknownMethodSlot { class, slot })?
            .entry;
        entry(self, object, args)
    }
}
