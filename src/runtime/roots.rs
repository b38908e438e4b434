use std::collections::BTreeMap;

use super::header::{Address, NULL, align_up};
use super::memory::LinearMemory;
use super::trap::Trap;

/// Bytes at the bottom of linear memory that never hold a value.
pub const RESERVED_BYTES: u32 = 8;

/// Width of a root location (global slot or shadow-stack slot).
pub const ROOT_SLOT_SIZE: u32 = 4;

// =============================================================================
// Static region layout
// =============================================================================
//
// +----------+---------------------+------------------------+------------
// | reserved | global slots        | shadow stack           | heap ...
// | 0..8     | 8..                 | ..                     | heap_base..
// +----------+---------------------+------------------------+------------
//
// Every global and shadow-stack slot holds one 32-bit reference.

/// Placement of the static region below the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticLayout {
    pub globals_base: Address,
    pub global_slots: u32,
    pub shadow_base: Address,
    pub shadow_slots: u32,
    pub heap_base: Address,
}

impl StaticLayout {
    /// Lay out the static region, or `None` if it does not fit below 4 GiB.
    pub fn new(global_slots: u32, shadow_slots: u32) -> Option<Self> {
        let globals_base = RESERVED_BYTES;
        let shadow_base = globals_base as u64 + global_slots as u64 * ROOT_SLOT_SIZE as u64;
        let shadow_end = shadow_base + shadow_slots as u64 * ROOT_SLOT_SIZE as u64;
        let heap_base = Address::try_from(align_up(shadow_end)).ok()?;
        Some(Self {
            globals_base,
            global_slots,
            shadow_base: shadow_base as Address,
            shadow_slots,
            heap_base,
        })
    }

    /// Address of global slot `index`.
    pub fn global(&self, index: u32) -> Option<Address> {
        (index < self.global_slots).then(|| self.globals_base + index * ROOT_SLOT_SIZE)
    }

    /// Whether `location` may be registered as a root.
    pub fn is_root_location(&self, location: Address) -> bool {
        location >= RESERVED_BYTES
            && location % ROOT_SLOT_SIZE == 0
            && location as u64 + ROOT_SLOT_SIZE as u64 <= self.heap_base as u64
    }
}

// =============================================================================
// RootSet - registered locations and pinned values
// =============================================================================

/// Registered root locations (counted) and values pinned by the runtime itself.
#[derive(Debug, Default)]
pub struct RootSet {
    locations: BTreeMap<Address, u32>,
    pinned: Vec<Address>,
}

impl RootSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `location`. Registering the same location twice needs two
    /// unregistrations.
    pub fn register(&mut self, location: Address) {
        *self.locations.entry(location).or_insert(0) += 1;
    }

    pub fn unregister(&mut self, location: Address) -> Result<(), Trap> {
        let Some(count) = self.locations.get_mut(&location) else {
            return Err(Trap::UnknownRoot(location));
        };
        *count -= 1;
        if *count == 0 {
            self.locations.remove(&location);
        }
        Ok(())
    }

    pub fn is_registered(&self, location: Address) -> bool {
        self.locations.contains_key(&location)
    }

    pub fn locations(&self) -> impl Iterator<Item = Address> + '_ {
        self.locations.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Keep `value` alive until the matching [`RootSet::unpin`].
    pub fn pin(&mut self, value: Address) {
        self.pinned.push(value);
    }

    pub fn unpin(&mut self, value: Address) {
        if let Some(i) = self.pinned.iter().rposition(|&p| p == value) {
            self.pinned.swap_remove(i);
        }
    }

    pub fn pinned(&self) -> &[Address] {
        &self.pinned
    }
}

// =============================================================================
// ShadowStack - reference-typed locals of compiled frames
// =============================================================================

/// A stack of frames stored in the static region. Every slot below `top` is
/// a root.
#[derive(Debug)]
pub struct ShadowStack {
    base: Address,
    capacity: u32,
    top: u32,
    /// Start slot of each open frame.
    frames: Vec<u32>,
}

impl ShadowStack {
    pub fn new(base: Address, capacity: u32) -> Self {
        Self {
            base,
            capacity,
            top: 0,
            frames: Vec::new(),
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Slots in use across all frames.
    pub fn used(&self) -> u32 {
        self.top
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Open a frame of `slots` null-initialised slots.
    pub fn push_frame(&mut self, memory: &mut LinearMemory, slots: u32) -> Result<(), Trap> {
        let new_top = self
            .top
            .checked_add(slots)
            .filter(|&t| t <= self.capacity)
            .ok_or(Trap::ShadowStackOverflow)?;
        memory.fill_zero(
            self.slot_address(self.top),
            (slots * ROOT_SLOT_SIZE) as usize,
        );
        self.frames.push(self.top);
        self.top = new_top;
        Ok(())
    }

    pub fn pop_frame(&mut self) -> Result<(), Trap> {
        let start = self.frames.pop().ok_or(Trap::ShadowStackUnderflow)?;
        self.top = start;
        Ok(())
    }

    /// Address of `slot` within the current frame.
    pub fn frame_slot(&self, slot: u32) -> Result<Address, Trap> {
        let start = *self.frames.last().ok_or(Trap::ShadowStackUnderflow)?;
        let size = self.top - start;
        if slot >= size {
            return Err(Trap::ShadowSlotOutOfRange { slot, size });
        }
        Ok(self.slot_address(start + slot))
    }

    /// References held in every occupied slot.
    pub fn references<'a>(&self, memory: &'a LinearMemory) -> impl Iterator<Item = Address> + 'a {
        let base = self.base;
        (0..self.top)
            .map(move |i| memory.read_u32((base + i * ROOT_SLOT_SIZE) as usize))
            .filter(|&r| r != NULL)
    }

    fn slot_address(&self, slot: u32) -> Address {
        self.base + slot * ROOT_SLOT_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_layout() {
        let layout = StaticLayout::new(64, 4096).unwrap();
        assert_eq!(layout.globals_base, 8);
        assert_eq!(layout.shadow_base, 8 + 256);
        assert_eq!(layout.heap_base, 8 + 256 + 4096 * 4);
        assert_eq!(layout.global(0), Some(8));
        assert_eq!(layout.global(63), Some(8 + 63 * 4));
        assert_eq!(layout.global(64), None);
    }

    #[test]
    fn test_static_layout_beyond_address_space() {
        assert_eq!(StaticLayout::new(u32::MAX, u32::MAX), None);
        assert!(StaticLayout::new(1 << 30, 0).is_none());
    }

    #[test]
    fn test_root_location_validation() {
        let layout = StaticLayout::new(2, 2).unwrap();
        assert!(layout.is_root_location(8));
        assert!(layout.is_root_location(20));
        assert!(!layout.is_root_location(0));
        assert!(!layout.is_root_location(4));
        assert!(!layout.is_root_location(10));
        assert!(!layout.is_root_location(layout.heap_base));
    }

    #[test]
    fn test_counted_registration() {
        let mut roots = RootSet::new();
        roots.register(8);
        roots.register(8);
        roots.unregister(8).unwrap();
        assert!(roots.is_registered(8));
        roots.unregister(8).unwrap();
        assert!(!roots.is_registered(8));
        assert_eq!(roots.unregister(8).unwrap_err(), Trap::UnknownRoot(8));
    }

    #[test]
    fn test_pinning() {
        let mut roots = RootSet::new();
        roots.pin(64);
        roots.pin(64);
        roots.unpin(64);
        assert_eq!(roots.pinned(), &[64]);
        roots.unpin(64);
        assert!(roots.pinned().is_empty());
    }

    #[test]
    fn test_shadow_stack_frames() {
        let mut memory = LinearMemory::new(1);
        let mut stack = ShadowStack::new(16, 4);

        stack.push_frame(&mut memory, 2).unwrap();
        let slot = stack.frame_slot(1).unwrap();
        assert_eq!(slot, 20);
        memory.write_u32(slot as usize, 128);

        stack.push_frame(&mut memory, 2).unwrap();
        assert_eq!(stack.used(), 4);
        assert_eq!(stack.references(&memory).collect::<Vec<_>>(), vec![128]);
        assert_eq!(
            stack.frame_slot(2).unwrap_err(),
            Trap::ShadowSlotOutOfRange { slot: 2, size: 2 }
        );
        assert_eq!(
            stack.push_frame(&mut memory, 1).unwrap_err(),
            Trap::ShadowStackOverflow
        );

        stack.pop_frame().unwrap();
        stack.pop_frame().unwrap();
        assert_eq!(stack.references(&memory).count(), 0);
        assert_eq!(stack.pop_frame().unwrap_err(), Trap::ShadowStackUnderflow);
    }

    #[test]
    fn test_new_frame_slots_are_null() {
        let mut memory = LinearMemory::new(1);
        let mut stack = ShadowStack::new(16, 4);
        stack.push_frame(&mut memory, 1).unwrap();
        memory.write_u32(16, 99);
        stack.pop_frame().unwrap();
        stack.push_frame(&mut memory, 1).unwrap();
        assert_eq!(memory.read_u32(16), 0);
    }
}
