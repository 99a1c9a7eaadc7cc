//! Resolving caller-supplied bus addresses to memory the kernel may touch.

use core::ops::Range;
use core::ptr::NonNull;

pub trait AddressSpace {
    /// Pointer to `len` bytes at bus address `addr`, if a caller may read
    /// all of them.
    fn readable(&self, addr: u32, len: usize) -> Option<NonNull<u8>>;

    /// Like [`readable`](Self::readable), for ranges a caller may also write.
    fn writable(&self, addr: u32, len: usize) -> Option<NonNull<u8>>;

    /// Bus address of a kernel pointer, if callers can reach it.
    fn address_of(&self, ptr: *const u8) -> Option<u32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    start: usize,
    end: usize,
    writable: bool,
}

impl Region {
    pub const fn read_only(range: Range<usize>) -> Region {
        Region {
            start: range.start,
            end: range.end,
            writable: false,
        }
    }

    pub const fn read_write(range: Range<usize>) -> Region {
        Region {
            start: range.start,
            end: range.end,
            writable: true,
        }
    }

    fn covers(&self, start: usize, len: usize) -> bool {
        match start.checked_add(len) {
            Some(end) => start >= self.start && start < self.end && end <= self.end,
            None => false,
        }
    }
}

/// Identity mapping restricted to a fixed set of regions.
#[derive(Clone, Copy)]
pub struct Flat<const N: usize> {
    regions: [Region; N],
}

impl<const N: usize> Flat<N> {
    pub const fn new(regions: [Region; N]) -> Flat<N> {
        Flat { regions }
    }

    fn resolve(&self, addr: u32, len: usize, write: bool) -> Option<NonNull<u8>> {
        let start = addr as usize;
        self.regions
            .iter()
            .find(|r| r.covers(start, len) && (r.writable || !write))?;
        NonNull::new(start as *mut u8)
    }
}

impl<const N: usize> AddressSpace for Flat<N> {
    fn readable(&self, addr: u32, len: usize) -> Option<NonNull<u8>> {
        self.resolve(addr, len, false)
    }

    fn writable(&self, addr: u32, len: usize) -> Option<NonNull<u8>> {
        self.resolve(addr, len, true)
    }

    fn address_of(&self, ptr: *const u8) -> Option<u32> {
        let addr = ptr as usize;
        if !self.regions.iter().any(|r| r.covers(addr, 0)) {
            return None;
        }
        u32::try_from(addr).ok()
    }
}

/// A bus range `[base, base + len)` backed by memory the kernel owns.
///
/// Lets the kernel run against simulated memory on a host.
#[derive(Clone, Copy)]
pub struct Window {
    base: u32,
    mem: NonNull<u8>,
    len: usize,
    writable: bool,
}

// SAFETY: a Window is only a description of memory; whoever dereferences a
// translated pointer is responsible for synchronising access to it.
unsafe impl Send for Window {}
unsafe impl Sync for Window {}

impl Window {
    /// # Safety
    ///
    /// `mem` must be valid for reads and writes of `len` bytes for as long as
    /// the window or any pointer it hands out is in use.
    pub unsafe fn new(base: u32, mem: NonNull<u8>, len: usize) -> Window {
        debug_assert!(base as u64 + len as u64 <= 1 << 32);
        Window {
            base,
            mem,
            len,
            writable: true,
        }
    }

    /// The same window, refusing writes.
    pub fn read_only(self) -> Window {
        Window {
            writable: false,
            ..self
        }
    }

    fn resolve(&self, addr: u32, len: usize) -> Option<NonNull<u8>> {
        let offset = addr.checked_sub(self.base)? as usize;
        if offset >= self.len || len > self.len - offset {
            return None;
        }
        // SAFETY: offset is inside the backing memory.
        Some(unsafe { self.mem.add(offset) })
    }
}

impl AddressSpace for Window {
    fn readable(&self, addr: u32, len: usize) -> Option<NonNull<u8>> {
        self.resolve(addr, len)
    }

    fn writable(&self, addr: u32, len: usize) -> Option<NonNull<u8>> {
        if !self.writable {
            return None;
        }
        self.resolve(addr, len)
    }

    fn address_of(&self, ptr: *const u8) -> Option<u32> {
        let offset = (ptr as usize).checked_sub(self.mem.as_ptr() as usize)?;
        if offset >= self.len {
            return None;
        }
        Some(self.base + offset as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAP: Flat<2> = Flat::new([
        Region::read_only(0x0000..0x4_0000),
        Region::read_write(0x2000_1000..0x2000_7000),
    ]);

    #[test]
    fn flat_accepts_only_whole_ranges_inside_a_region() {
        assert_eq!(
            MAP.readable(0x2000_1100, 16).map(|p| p.as_ptr() as usize),
            Some(0x2000_1100)
        );
        assert!(MAP.writable(0x2000_6FF8, 8).is_some());
        assert!(MAP.writable(0x2000_6FF8, 9).is_none());
        assert!(MAP.readable(0x2000_0100, 4).is_none());
        assert!(MAP.readable(0x4000_C000, 1).is_none());
        assert!(MAP.readable(0xFFFF_FFF0, 0x20).is_none());
        // Null is never handed out even though flash starts there.
        assert!(MAP.readable(0, 4).is_none());
    }

    #[test]
    fn flash_is_read_only() {
        assert!(MAP.readable(0x0000_0400, 64).is_some());
        assert!(MAP.writable(0x0000_0400, 64).is_none());
    }

    #[test]
    fn flat_address_of_is_identity_inside_regions() {
        assert_eq!(MAP.address_of(0x2000_1000 as *const u8), Some(0x2000_1000));
        assert_eq!(MAP.address_of(0x3000_0000 as *const u8), None);
    }

    #[test]
    fn window_maps_bus_addresses_onto_host_memory() {
        let mut mem = [0u8; 64];
        let base = mem.as_mut_ptr();
        let window = unsafe { Window::new(0x2000_0000, NonNull::new(base).unwrap(), 64) };

        let p = window.writable(0x2000_0010, 8).unwrap();
        assert_eq!(p.as_ptr(), base.wrapping_add(0x10));
        assert_eq!(window.address_of(p.as_ptr()), Some(0x2000_0010));

        assert!(window.readable(0x2000_0038, 8).is_some());
        assert!(window.readable(0x2000_0038, 9).is_none());
        assert!(window.readable(0x2000_0040, 0).is_none());
        assert!(window.readable(0x1FFF_FFFF, 1).is_none());
        assert_eq!(window.address_of(base.wrapping_add(64)), None);

        let rom = window.read_only();
        assert!(rom.readable(0x2000_0010, 8).is_some());
        assert!(rom.writable(0x2000_0010, 8).is_none());
    }
}
