//! Stop-the-world mark-and-sweep collector.
//!
//! The mark bit is never cleared. Each cycle flips `current_mark` first, so
//! every value written with the previous sense reads as unmarked; marking sets
//! reachable values to the new sense and the sweep frees whatever still
//! differs from it.

use std::time::Instant;

use serde::Serialize;

use super::class::ClassRegistry;
use super::header::{
    self, Address, FLAGS_POS, HeapKind, INLINE_SLOTS, NEXT_BLOCK_POS, NULL, OVERFLOW_BLOCK_SLOTS,
    ValueHeader, element_offset, inline_slot_offset, overflow_pointer_offset, overflow_slot_offset,
};
use super::heap::Heap;

/// Cumulative collector statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcStats {
    pub cycles: usize,
    pub bytes_reclaimed: u64,
    pub values_reclaimed: u64,
    pub total_pause_us: u64,
    pub max_pause_us: u64,
    pub heap_growths: usize,
}

/// Outcome of a single collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub values_marked: u64,
    pub values_reclaimed: u64,
    pub bytes_reclaimed: u64,
    pub pause_us: u64,
}

#[derive(Debug, Default)]
pub struct Collector {
    current_mark: bool,
    stats: GcStats,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark sense that freshly allocated values are written with.
    pub fn allocation_mark(&self) -> bool {
        self.current_mark
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    pub(crate) fn record_growth(&mut self) {
        self.stats.heap_growths += 1;
    }

    /// Run a full collection from `roots`.
    pub fn collect(&mut self, heap: &mut Heap, classes: &ClassRegistry, roots: &[Address]) -> CycleReport {
        let start = Instant::now();
        self.current_mark = !self.current_mark;

        let values_marked = self.mark(heap, classes, roots);
        let (values_reclaimed, bytes_reclaimed) = self.sweep(heap);

        let pause_us = start.elapsed().as_micros() as u64;
        self.stats.cycles += 1;
        self.stats.values_reclaimed += values_reclaimed;
        self.stats.bytes_reclaimed += bytes_reclaimed;
        self.stats.total_pause_us += pause_us;
        self.stats.max_pause_us = self.stats.max_pause_us.max(pause_us);

        log::debug!(
            "gc cycle {}: marked {} values, reclaimed {} values ({} bytes) in {}us",
            self.stats.cycles,
            values_marked,
            values_reclaimed,
            bytes_reclaimed,
            pause_us
        );

        CycleReport {
            values_marked,
            values_reclaimed,
            bytes_reclaimed,
            pause_us,
        }
    }

    /// Whether the value at `address` carries the current mark.
    fn is_marked(&self, heap: &Heap, address: Address) -> bool {
        let flags = heap.memory().read_u8(address as usize + FLAGS_POS);
        header::decode_header(flags).gc_mark == self.current_mark
    }

    fn set_marked(&self, heap: &mut Heap, address: Address) {
        let at = address as usize + FLAGS_POS;
        let memory = heap.memory_mut();
        let flags = memory.read_u8(at);
        memory.write_u8(at, header::with_mark(flags, self.current_mark));
    }

    /// Mark phase: mark everything reachable from `roots`.
    /// Returns the number of values marked.
    fn mark(&self, heap: &mut Heap, classes: &ClassRegistry, roots: &[Address]) -> u64 {
        let mut worklist: Vec<Address> = roots.to_vec();
        let mut marked = 0;

        while let Some(address) = worklist.pop() {
            // stale or null references are never traced
            if address == NULL || !heap.is_allocated(address) {
                continue;
            }
            if self.is_marked(heap, address) {
                continue;
            }
            self.set_marked(heap, address);
            marked += 1;

            let Some(value) = header::read_value_header(heap.memory(), address) else {
                continue;
            };
            match value.kind() {
                HeapKind::Object => {
                    marked += self.trace_object(heap, classes, address, &value, &mut worklist);
                }
                HeapKind::Array => {
                    if !value.decoded.contains_pointers() {
                        continue;
                    }
                    let Some(element_type) = value.element_type() else {
                        continue;
                    };
                    for i in 0..value.count as usize {
                        let at = address as usize + element_offset(i, element_type);
                        worklist.push(heap.memory().read_u32(at));
                    }
                }
                // reached only through its owner, which traces its slots
                HeapKind::OverflowBlock => {}
            }
        }
        marked
    }

    /// Push the reference slots of an object, marking its overflow blocks on
    /// the way. Returns the number of overflow blocks marked.
    fn trace_object(
        &self,
        heap: &mut Heap,
        classes: &ClassRegistry,
        address: Address,
        value: &ValueHeader,
        worklist: &mut Vec<Address>,
    ) -> u64 {
        let Ok(class) = classes.get(value.type_field) else {
            log::warn!("object at {:#x} has unknown class {}", address, value.type_field);
            return 0;
        };
        let map = &class.pointer_map;
        let count = value.count as usize;

        for i in map.iter_set_in(0..count.min(INLINE_SLOTS)) {
            worklist.push(heap.memory().read_u32(address as usize + inline_slot_offset(i)));
        }
        if !value.decoded.has_overflow() {
            return 0;
        }

        let mut marked = 0;
        let mut block = heap
            .memory()
            .read_u32(address as usize + overflow_pointer_offset());
        let mut first = INLINE_SLOTS;
        while block != NULL && first < count && heap.is_allocated(block) {
            if !self.is_marked(heap, block) {
                self.set_marked(heap, block);
                marked += 1;
            }
            let end = (first + OVERFLOW_BLOCK_SLOTS).min(count);
            for i in map.iter_set_in(first..end) {
                let at = block as usize + overflow_slot_offset(i - first);
                worklist.push(heap.memory().read_u32(at));
            }
            block = heap.memory().read_u32(block as usize + NEXT_BLOCK_POS);
            first = end;
        }
        marked
    }

    /// Sweep phase: release every region whose mark differs from the current
    /// sense, then coalesce the free list.
    fn sweep(&self, heap: &mut Heap) -> (u64, u64) {
        let snapshot: &Heap = heap;
        let dead: Vec<Address> = snapshot
            .regions()
            .map(|(address, _)| address)
            .filter(|&address| !self.is_marked(snapshot, address))
            .collect();

        let mut bytes = 0u64;
        for &address in &dead {
            if let Some(size) = heap.release(address) {
                log::trace!("reclaimed {} bytes at {:#x}", size, address);
                bytes += size as u64;
            }
        }
        heap.coalesce_free_list();
        (dead.len() as u64, bytes)
    }
}
