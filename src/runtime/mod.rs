//! The managed-memory runtime: heap layout, allocation, collection, arrays,
//! objects and dispatch over a single linear memory.

pub mod array;
pub mod class;
pub mod gc;
pub mod header;
pub mod heap;
pub mod inspect;
pub mod memory;
pub mod numeric;
pub mod object;
pub mod roots;
pub mod trap;

pub use array::{Element, ElementType};
pub use class::{AttributeKind, ClassDefinition, ClassId, ClassInfo, ClassRegistry, MethodFn, SlotDescriptor};
pub use gc::{CycleReport, GcStats};
pub use header::{Address, NULL, Word};
pub use inspect::{HeapDump, HeapSummary, Inspector};
pub use memory::{Host, PAGE_SIZE, PageLimitHost};
pub use numeric::IntType;
pub use trap::Trap;

use std::fmt;

use crate::config::RuntimeConfig;
use gc::Collector;
use header::{HeapKind, align_up};
use heap::Heap;
use memory::{LinearMemory, MAX_PAGES};
use roots::{ROOT_SLOT_SIZE, RootSet, ShadowStack, StaticLayout};

/// One managed heap together with everything that owns or traces it.
pub struct Runtime {
    config: RuntimeConfig,
    layout: StaticLayout,
    heap: Heap,
    classes: ClassRegistry,
    roots: RootSet,
    shadow: ShadowStack,
    collector: Collector,
    host: Box<dyn Host>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("pages", &self.heap_pages())
            .field("heap_base", &self.layout.heap_base)
            .field("next_alloc", &self.heap.next_alloc())
            .field("classes", &self.classes.len())
            .field("roots", &self.roots.len())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Create a runtime whose memory grows up to `config.max_pages`.
    pub fn new(config: RuntimeConfig) -> Result<Self, Trap> {
        let host = PageLimitHost::new(config.max_pages);
        Self::with_host(config, Box::new(host))
    }

    /// Create a runtime that asks `host` before growing memory.
    ///
    /// Traps with [`Trap::InvalidConfig`] when `config` fails validation.
    pub fn with_host(config: RuntimeConfig, host: Box<dyn Host>) -> Result<Self, Trap> {
        config.validate().map_err(Trap::InvalidConfig)?;
        let layout = StaticLayout::new(config.global_slots, config.shadow_stack_slots)
            .ok_or_else(|| Trap::InvalidConfig("static region exceeds the address space".to_string()))?;
        // the static region always fits, whatever the configured start size
        let static_pages = (layout.heap_base as usize).div_ceil(PAGE_SIZE) as u32;
        let pages = config.initial_pages.max(static_pages).max(1);
        let memory = LinearMemory::new(pages);
        log::debug!(
            "runtime created: {} pages, heap base {:#x}, {} globals, {} shadow slots",
            pages,
            layout.heap_base,
            layout.global_slots,
            layout.shadow_slots
        );

        Ok(Self {
            heap: Heap::new(memory, layout.heap_base),
            shadow: ShadowStack::new(layout.shadow_base, layout.shadow_slots),
            layout,
            classes: ClassRegistry::new(),
            roots: RootSet::new(),
            collector: Collector::new(),
            host,
            config,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    pub fn layout(&self) -> &StaticLayout {
        &self.layout
    }

    pub fn define_class(&mut self, definition: ClassDefinition) -> Result<ClassId, Trap> {
        self.classes.define(definition)
    }

    pub fn class(&self, id: ClassId) -> Result<&ClassInfo, Trap> {
        self.classes.get(id)
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocate `size` zero-filled bytes.
    ///
    /// Escalates through the bump region, the free list, a collection (when
    /// enabled) and finally host memory growth. The caller must write a
    /// header before the address becomes reachable.
    pub fn allocate(&mut self, size: u64) -> Result<Address, Trap> {
        if size == 0 || size > u32::MAX as u64 {
            return Err(Trap::InvalidAllocationSize(size));
        }
        let aligned = align_up(size);
        if aligned > u32::MAX as u64 {
            return Err(Trap::InvalidAllocationSize(size));
        }
        let aligned = aligned as u32;

        if let Some(address) = self.heap.try_allocate(aligned) {
            return Ok(address);
        }

        if self.config.gc_enabled {
            self.collect();
            if let Some(address) = self.heap.try_allocate(aligned) {
                return Ok(address);
            }
        }

        self.grow_for(aligned)?;
        self.heap.try_allocate(aligned).ok_or(Trap::OutOfMemory {
            requested: size,
            reason: "allocation failed after growth",
        })
    }

    /// Grow memory by the fewest pages that let the bump region fit `size`.
    fn grow_for(&mut self, size: u32) -> Result<(), Trap> {
        let current = self.heap.memory().pages();
        let needed_end = self.heap.next_alloc() as u64 + size as u64;
        let shortfall = needed_end.saturating_sub(self.heap.memory().len() as u64);
        let delta = shortfall.div_ceil(PAGE_SIZE as u64).max(1);

        let limit = self.config.max_pages.min(MAX_PAGES) as u64;
        if needed_end > Address::MAX as u64 || current as u64 + delta > limit {
            log::warn!(
                "cannot grow memory by {} pages (current {}, limit {})",
                delta,
                current,
                limit
            );
            return Err(Trap::OutOfMemory {
                requested: size as u64,
                reason: "page limit reached",
            });
        }
        let delta = delta as u32;
        if !self.host.request_memory_growth(current, delta) {
            log::warn!("host refused memory growth of {} pages", delta);
            return Err(Trap::OutOfMemory {
                requested: size as u64,
                reason: "host refused memory growth",
            });
        }

        self.heap.grow(delta);
        self.collector.record_growth();
        log::debug!("memory grown by {} pages to {}", delta, current + delta);
        Ok(())
    }

    /// Run a full collection now.
    pub fn collect(&mut self) -> CycleReport {
        let roots = self.root_references();
        self.collector.collect(&mut self.heap, &self.classes, &roots)
    }

    pub fn stats(&self) -> &GcStats {
        self.collector.stats()
    }

    pub fn heap_pages(&self) -> u32 {
        self.heap.memory().pages()
    }

    /// Current linear memory size in bytes.
    pub fn heap_size(&self) -> u64 {
        self.heap.memory().len() as u64
    }

    pub fn inspector(&self) -> Inspector<'_> {
        Inspector::new(self)
    }

    pub fn is_null(&self, reference: Address) -> bool {
        reference == NULL
    }

    // =========================================================================
    // Roots
    // =========================================================================

    /// Treat the 32-bit reference stored at `location` as a root.
    pub fn register_root(&mut self, location: Address) -> Result<(), Trap> {
        self.check_root_location(location)?;
        self.roots.register(location);
        Ok(())
    }

    pub fn unregister_root(&mut self, location: Address) -> Result<(), Trap> {
        self.roots.unregister(location)
    }

    pub fn is_root(&self, location: Address) -> bool {
        self.roots.is_registered(location)
    }

    /// Address of global slot `index` in the static region.
    pub fn global_location(&self, index: u32) -> Result<Address, Trap> {
        self.layout.global(index).ok_or(Trap::InvalidRootLocation(
            self.layout.globals_base.wrapping_add(index.wrapping_mul(ROOT_SLOT_SIZE)),
        ))
    }

    /// Store a reference into a static-region location.
    pub fn store_reference(&mut self, location: Address, reference: Address) -> Result<(), Trap> {
        self.check_root_location(location)?;
        self.check_reference(reference)?;
        self.heap.memory_mut().write_u32(location as usize, reference);
        Ok(())
    }

    pub fn load_reference(&self, location: Address) -> Result<Address, Trap> {
        self.check_root_location(location)?;
        Ok(self.heap.memory().read_u32(location as usize))
    }

    /// Open a shadow-stack frame of `slots` null slots.
    pub fn push_frame(&mut self, slots: u32) -> Result<(), Trap> {
        self.shadow.push_frame(self.heap.memory_mut(), slots)
    }

    pub fn pop_frame(&mut self) -> Result<(), Trap> {
        self.shadow.pop_frame()
    }

    pub fn shadow_store(&mut self, slot: u32, reference: Address) -> Result<(), Trap> {
        let location = self.shadow.frame_slot(slot)?;
        self.check_reference(reference)?;
        self.heap.memory_mut().write_u32(location as usize, reference);
        Ok(())
    }

    pub fn shadow_load(&self, slot: u32) -> Result<Address, Trap> {
        let location = self.shadow.frame_slot(slot)?;
        Ok(self.heap.memory().read_u32(location as usize))
    }

    pub fn shadow_depth(&self) -> usize {
        self.shadow.depth()
    }

    /// Every reference currently reachable from a root.
    fn root_references(&self) -> Vec<Address> {
        let memory = self.heap.memory();
        let mut references: Vec<Address> = self
            .roots
            .locations()
            .map(|location| memory.read_u32(location as usize))
            .filter(|&r| r != NULL)
            .collect();
        references.extend_from_slice(self.roots.pinned());
        references.extend(self.shadow.references(memory));
        references
    }

    fn check_root_location(&self, location: Address) -> Result<(), Trap> {
        if self.layout.is_root_location(location) {
            Ok(())
        } else {
            Err(Trap::InvalidRootLocation(location))
        }
    }

    // =========================================================================
    // Reference validation
    // =========================================================================

    /// Check that `address` is a live value of `kind`; null traps as a null
    /// dereference in `operation`.
    pub(crate) fn expect_kind(
        &self,
        address: Address,
        kind: HeapKind,
        operation: &'static str,
    ) -> Result<(), Trap> {
        if address == NULL {
            return Err(Trap::NullReference { operation });
        }
        if !self.heap.is_allocated(address) {
            return Err(Trap::InvalidReference(address));
        }
        let flags = self.heap.memory().read_u8(address as usize);
        if header::decode_header(flags).kind != kind {
            return Err(Trap::KindMismatch {
                address,
                expected: kind.name(),
            });
        }
        Ok(())
    }

    /// Check that `reference` may be stored in a reference-typed location.
    pub(crate) fn check_reference(&self, reference: Address) -> Result<(), Trap> {
        if reference == NULL {
            return Ok(());
        }
        if !self.heap.is_allocated(reference) {
            return Err(Trap::InvalidReference(reference));
        }
        let flags = self.heap.memory().read_u8(reference as usize);
        if header::decode_header(flags).kind == HeapKind::OverflowBlock {
            return Err(Trap::InvalidReference(reference));
        }
        Ok(())
    }
}
