//! Host-side doubles shared by the unit tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::vec::Vec;
use core::ptr::NonNull;

use crate::heap::Heap;
use crate::kernel::Kernel;
use crate::memory::{AddressSpace, Window};
use crate::serial::SerialPort;

/// Serial port that records what is sent and replays scripted input.
#[derive(Default)]
pub struct Recorder {
    sent: RefCell<Vec<u8>>,
    input: RefCell<VecDeque<u8>>,
}

impl Recorder {
    pub fn with_input(bytes: &[u8]) -> Recorder {
        let port = Recorder::default();
        port.input.borrow_mut().extend(bytes);
        port
    }

    pub fn sent(&self) -> Vec<u8> {
        self.sent.borrow().clone()
    }

    pub fn push_input(&self, bytes: &[u8]) {
        self.input.borrow_mut().extend(bytes);
    }

    pub fn pending_input(&self) -> usize {
        self.input.borrow().len()
    }
}

impl SerialPort for Recorder {
    fn send_byte(&self, byte: u8) {
        self.sent.borrow_mut().push(byte);
    }

    fn try_receive_byte(&self) -> Option<u8> {
        self.input.borrow_mut().pop_front()
    }
}

pub const FLASH_BASE: u32 = 0x0000_0400;
pub const FLASH_SIZE: usize = 0x400;
pub const RAM_BASE: u32 = 0x2000_0000;
pub const RAM_SIZE: usize = 0x8000;
pub const HEAP_OFFSET: usize = 0x1000;
pub const HEAP_SIZE: usize = 0x6000;

/// Read-write RAM plus read-only flash.
#[derive(Clone, Copy)]
pub struct Bus {
    pub ram: Window,
    pub flash: Window,
}

impl AddressSpace for Bus {
    fn readable(&self, addr: u32, len: usize) -> Option<NonNull<u8>> {
        self.ram
            .readable(addr, len)
            .or_else(|| self.flash.readable(addr, len))
    }

    fn writable(&self, addr: u32, len: usize) -> Option<NonNull<u8>> {
        self.ram
            .writable(addr, len)
            .or_else(|| self.flash.writable(addr, len))
    }

    fn address_of(&self, ptr: *const u8) -> Option<u32> {
        self.ram
            .address_of(ptr)
            .or_else(|| self.flash.address_of(ptr))
    }
}

/// Simulated flash and SRAM with a kernel whose heap lives in the SRAM.
///
/// Field order matters: the kernel points into `ram` and `rom` and is
/// dropped first.
pub struct Board {
    pub kernel: Kernel<Recorder, Bus>,
    pub window: Window,
    pub bus: Bus,
    ram: Vec<u64>,
    _rom: Vec<u64>,
}

impl Board {
    pub fn new() -> Board {
        let mut ram = vec![0u64; RAM_SIZE / 8];
        let base = ram.as_mut_ptr() as *mut u8;
        let mem = NonNull::new(base).unwrap();
        // SAFETY: `ram` outlives the window; see the field order above.
        let window = unsafe { Window::new(RAM_BASE, mem, RAM_SIZE) };
        let mut rom = vec![0u64; FLASH_SIZE / 8];
        let rom_mem = NonNull::new(rom.as_mut_ptr() as *mut u8).unwrap();
        let flash = unsafe { Window::new(FLASH_BASE, rom_mem, FLASH_SIZE) }.read_only();
        let mut heap = Heap::empty();
        unsafe { heap.init(base as usize + HEAP_OFFSET, HEAP_SIZE) };
        let bus = Bus { ram: window, flash };
        Board {
            kernel: Kernel::new(heap, Recorder::default(), bus),
            window,
            bus,
            ram,
            _rom: rom,
        }
    }

    /// Copy `bytes` into simulated RAM at `offset` and return its bus address.
    pub fn stage(&mut self, offset: usize, bytes: &[u8]) -> u32 {
        let ram = self.ram.as_mut_ptr() as *mut u8;
        assert!(offset + bytes.len() <= HEAP_OFFSET, "staging area overlaps the heap");
        unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), ram.add(offset), bytes.len()) };
        RAM_BASE + offset as u32
    }

    /// Bytes at a bus address in either RAM or flash.
    pub fn bytes(&self, addr: u32, len: usize) -> &[u8] {
        let ptr = self.bus.readable(addr, len).expect("address outside memory");
        unsafe { core::slice::from_raw_parts(ptr.as_ptr(), len) }
    }
}
