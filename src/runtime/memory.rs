use super::header::Address;

/// Size of one linear-memory page (the WebAssembly page size).
pub const PAGE_SIZE: usize = 64 * 1024;

/// Pages needed to cover the whole 32-bit address space.
pub const MAX_PAGES: u32 = 65536;

// =============================================================================
// Host - owner of linear memory growth
// =============================================================================

/// The environment that owns linear memory and services growth requests.
pub trait Host {
    /// Ask for `delta_pages` more pages on top of `current_pages`.
    /// Returning `false` refuses the request, which is fatal to the allocation.
    fn request_memory_growth(&mut self, current_pages: u32, delta_pages: u32) -> bool;
}

/// Grants every request that keeps the memory at or below a page ceiling.
#[derive(Debug, Clone)]
pub struct PageLimitHost {
    max_pages: u32,
    granted: u32,
}

impl PageLimitHost {
    pub fn new(max_pages: u32) -> Self {
        Self {
            max_pages: max_pages.min(MAX_PAGES),
            granted: 0,
        }
    }

    /// Number of growth requests granted so far.
    pub fn granted(&self) -> u32 {
        self.granted
    }
}

impl Host for PageLimitHost {
    fn request_memory_growth(&mut self, current_pages: u32, delta_pages: u32) -> bool {
        let Some(total) = current_pages.checked_add(delta_pages) else {
            return false;
        };
        if total > self.max_pages {
            return false;
        }
        self.granted += 1;
        true
    }
}

// =============================================================================
// LinearMemory - byte-addressed, page-granular buffer
// =============================================================================

/// The linear memory buffer. Always a whole number of pages long.
#[derive(Debug)]
pub struct LinearMemory {
    bytes: Vec<u8>,
}

impl LinearMemory {
    pub fn new(pages: u32) -> Self {
        Self {
            bytes: vec![0u8; pages as usize * PAGE_SIZE],
        }
    }

    pub fn pages(&self) -> u32 {
        (self.bytes.len() / PAGE_SIZE) as u32
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Extend the memory by `delta_pages` zeroed pages.
    pub fn grow(&mut self, delta_pages: u32) {
        let new_len = self.bytes.len() + delta_pages as usize * PAGE_SIZE;
        self.bytes.resize(new_len, 0);
    }

    /// Whether `[address, address + len)` lies inside the memory.
    pub fn contains(&self, address: Address, len: usize) -> bool {
        (address as usize)
            .checked_add(len)
            .is_some_and(|end| end <= self.bytes.len())
    }

    pub fn fill_zero(&mut self, address: Address, len: usize) {
        let start = address as usize;
        self.bytes[start..start + len].fill(0);
    }

    pub fn read_u8(&self, address: usize) -> u8 {
        self.bytes[address]
    }

    pub fn write_u8(&mut self, address: usize, value: u8) {
        self.bytes[address] = value;
    }

    pub fn read_u16(&self, address: usize) -> u16 {
        u16::from_le_bytes(self.read_array(address))
    }

    pub fn write_u16(&mut self, address: usize, value: u16) {
        self.bytes[address..address + 2].copy_from_slice(&value.to_le_bytes());
    }

    pub fn read_u32(&self, address: usize) -> u32 {
        u32::from_le_bytes(self.read_array(address))
    }

    pub fn write_u32(&mut self, address: usize, value: u32) {
        self.bytes[address..address + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn read_u64(&self, address: usize) -> u64 {
        u64::from_le_bytes(self.read_array(address))
    }

    pub fn write_u64(&mut self, address: usize, value: u64) {
        self.bytes[address..address + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Try to read a u32, returning None if out of bounds.
    pub fn try_read_u32(&self, address: usize) -> Option<u32> {
        let slice = self.bytes.get(address..address.checked_add(4)?)?;
        Some(u32::from_le_bytes(slice.try_into().ok()?))
    }

    /// Try to read a byte, returning None if out of bounds.
    pub fn try_read_u8(&self, address: usize) -> Option<u8> {
        self.bytes.get(address).copied()
    }

    fn read_array<const N: usize>(&self, address: usize) -> [u8; N] {
        let mut buf = [0u8; N];
        buf.copy_from_slice(&self.bytes[address..address + N]);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_memory_is_zeroed() {
        let memory = LinearMemory::new(1);
        assert_eq!(memory.len(), PAGE_SIZE);
        assert_eq!(memory.pages(), 1);
        assert_eq!(memory.read_u64(0), 0);
        assert_eq!(memory.read_u64(PAGE_SIZE - 8), 0);
    }

    #[test]
    fn test_little_endian_access() {
        let mut memory = LinearMemory::new(1);
        memory.write_u32(16, 0x0403_0201);
        assert_eq!(memory.read_u8(16), 0x01);
        assert_eq!(memory.read_u8(19), 0x04);
        assert_eq!(memory.read_u16(17), 0x0302);

        // unaligned 64-bit access is fine
        memory.write_u64(21, u64::MAX - 1);
        assert_eq!(memory.read_u64(21), u64::MAX - 1);
    }

    #[test]
    fn test_grow_and_contains() {
        let mut memory = LinearMemory::new(1);
        assert!(memory.contains(0, PAGE_SIZE));
        assert!(!memory.contains(1, PAGE_SIZE));
        assert!(!memory.contains(u32::MAX, 2));

        memory.grow(2);
        assert_eq!(memory.pages(), 3);
        assert!(memory.contains(PAGE_SIZE as u32, 2 * PAGE_SIZE));
        assert_eq!(memory.read_u64(3 * PAGE_SIZE - 8), 0);
    }

    #[test]
    fn test_try_read_out_of_bounds() {
        let memory = LinearMemory::new(1);
        assert_eq!(memory.try_read_u32(PAGE_SIZE - 4), Some(0));
        assert_eq!(memory.try_read_u32(PAGE_SIZE - 3), None);
        assert_eq!(memory.try_read_u8(PAGE_SIZE), None);
    }

    #[test]
    fn test_page_limit_host() {
        let mut host = PageLimitHost::new(4);
        assert!(host.request_memory_growth(1, 3));
        assert!(!host.request_memory_growth(4, 1));
        assert!(!host.request_memory_growth(u32::MAX, 1));
        assert_eq!(host.granted(), 1);
    }

    #[test]
    fn test_page_limit_host_caps_at_address_space() {
        let mut host = PageLimitHost::new(u32::MAX);
        assert!(host.request_memory_growth(0, MAX_PAGES));
        assert!(!host.request_memory_growth(MAX_PAGES, 1));
    }
}
