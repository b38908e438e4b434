use std::collections::BTreeMap;

use super::header::{Address, align_up};
use super::memory::LinearMemory;

/// Minimum size worth keeping on the free list after a split.
pub const MIN_FREE_BLOCK_SIZE: u32 = 16;

/// A reclaimed region available for reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeListEntry {
    pub address: Address,
    pub size: u32,
}

// =============================================================================
// Heap - bump region, free list and the table of allocated regions
// =============================================================================

/// The allocator's view of linear memory.
///
/// Memory below `heap_base` belongs to the static region (globals and the
/// shadow stack). Values are carved out of `[heap_base, next_alloc)`, either
/// by bumping `next_alloc` or by reusing a free-list entry. Every handed-out
/// region is recorded in `regions` so the sweep can walk them without trusting
/// partially written headers.
#[derive(Debug)]
pub struct Heap {
    memory: LinearMemory,
    heap_base: Address,
    next_alloc: Address,
    free_list: Vec<FreeListEntry>,
    regions: BTreeMap<Address, u32>,
    bytes_allocated: u64,
}

impl Heap {
    pub fn new(memory: LinearMemory, heap_base: Address) -> Self {
        let heap_base = align_up(heap_base as u64) as Address;
        Self {
            memory,
            heap_base,
            next_alloc: heap_base,
            free_list: Vec::new(),
            regions: BTreeMap::new(),
            bytes_allocated: 0,
        }
    }

    pub fn memory(&self) -> &LinearMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut LinearMemory {
        &mut self.memory
    }

    pub fn heap_base(&self) -> Address {
        self.heap_base
    }

    pub fn next_alloc(&self) -> Address {
        self.next_alloc
    }

    /// Bytes currently handed out to live or not-yet-swept values.
    pub fn bytes_allocated(&self) -> u64 {
        self.bytes_allocated
    }

    pub fn free_list(&self) -> &[FreeListEntry] {
        &self.free_list
    }

    pub fn free_bytes(&self) -> u64 {
        self.free_list.iter().map(|e| e.size as u64).sum()
    }

    /// Bytes still available to the bump pointer.
    pub fn bump_remaining(&self) -> u64 {
        (self.memory.len() as u64).saturating_sub(self.next_alloc as u64)
    }

    /// Size of the region starting at `address`, if one is allocated there.
    pub fn region_size(&self, address: Address) -> Option<u32> {
        self.regions.get(&address).copied()
    }

    pub fn is_allocated(&self, address: Address) -> bool {
        self.regions.contains_key(&address)
    }

    /// All allocated regions as (address, size), in address order.
    pub fn regions(&self) -> impl Iterator<Item = (Address, u32)> + '_ {
        self.regions.iter().map(|(&a, &s)| (a, s))
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Allocate `size` bytes (already aligned) from the bump region, falling
    /// back to the free list. The returned memory is zero-filled.
    pub fn try_allocate(&mut self, size: u32) -> Option<Address> {
        debug_assert!(size > 0 && size as u64 == align_up(size as u64));

        let (address, granted) = match self.bump(size) {
            Some(address) => (address, size),
            None => self.find_free_block(size)?,
        };

        self.memory.fill_zero(address, granted as usize);
        self.regions.insert(address, granted);
        self.bytes_allocated += granted as u64;
        log::trace!("allocated {} bytes at {:#x}", granted, address);
        Some(address)
    }

    fn bump(&mut self, size: u32) -> Option<Address> {
        let end = self.next_alloc as u64 + size as u64;
        // the last byte of a value must stay addressable by a u32
        if end > self.memory.len() as u64 || end > Address::MAX as u64 {
            return None;
        }
        let address = self.next_alloc;
        self.next_alloc = end as Address;
        Some(address)
    }

    /// Find a free block of at least `needed` bytes (first-fit) and remove it
    /// from the free list. Blocks with a usable remainder are split; the
    /// remainder stays on the list. Returns the address and granted size.
    fn find_free_block(&mut self, needed: u32) -> Option<(Address, u32)> {
        let index = self.free_list.iter().position(|e| e.size >= needed)?;
        let entry = self.free_list[index];
        let remaining = entry.size - needed;

        if remaining >= MIN_FREE_BLOCK_SIZE {
            self.free_list[index] = FreeListEntry {
                address: entry.address + needed,
                size: remaining,
            };
            Some((entry.address, needed))
        } else {
            self.free_list.swap_remove(index);
            Some((entry.address, entry.size))
        }
    }

    /// Return the region at `address` to the free list.
    /// Returns the reclaimed size, or None if nothing was allocated there.
    pub fn release(&mut self, address: Address) -> Option<u32> {
        let size = self.regions.remove(&address)?;
        self.bytes_allocated -= size as u64;
        self.free_list.push(FreeListEntry { address, size });
        Some(size)
    }

    /// Merge adjacent free regions and hand a free tail back to the bump pointer.
    pub fn coalesce_free_list(&mut self) {
        if self.free_list.is_empty() {
            return;
        }
        self.free_list.sort_unstable_by_key(|e| e.address);

        let mut merged: Vec<FreeListEntry> = Vec::with_capacity(self.free_list.len());
        for entry in self.free_list.drain(..) {
            match merged.last_mut() {
                Some(last) if last.address as u64 + last.size as u64 == entry.address as u64 => {
                    last.size += entry.size;
                }
                _ => merged.push(entry),
            }
        }

        if let Some(last) = merged.last() {
            if last.address as u64 + last.size as u64 == self.next_alloc as u64 {
                self.next_alloc = last.address;
                merged.pop();
            }
        }
        self.free_list = merged;
    }

    /// Extend linear memory by `delta_pages` pages.
    pub fn grow(&mut self, delta_pages: u32) {
        self.memory.grow(delta_pages);
    }
}
