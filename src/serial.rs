//! Polled serial port.

use core::fmt;
use core::ptr;

pub trait SerialPort {
    /// Busy-wait until the transmitter has room, then send `byte`.
    fn send_byte(&self, byte: u8);

    /// Take one received byte if one is waiting.
    fn try_receive_byte(&self) -> Option<u8>;

    /// Busy-wait for a byte.
    fn receive_byte(&self) -> u8 {
        loop {
            if let Some(byte) = self.try_receive_byte() {
                return byte;
            }
            core::hint::spin_loop();
        }
    }

    fn send_bytes(&self, bytes: &[u8]) {
        for &byte in bytes {
            self.send_byte(byte);
        }
    }

    fn send_str(&self, s: &str) {
        self.send_bytes(s.as_bytes());
    }
}

/// `core::fmt` adapter that turns `\n` into `\r\n`.
///
/// Only formatted text goes through here; raw writes use
/// [`SerialPort::send_bytes`] untouched.
pub struct Writer<'a, P: ?Sized>(pub &'a P);

impl<P: SerialPort + ?Sized> fmt::Write for Writer<'_, P> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.0.send_byte(b'\r');
            }
            self.0.send_byte(byte);
        }
        Ok(())
    }
}

#[repr(C)]
struct Registers {
    dr: u32,
    _rsr_ecr: u32,
    _reserved0: [u32; 4],
    fr: u32,
    _reserved1: u32,
    _ilpr: u32,
    ibrd: u32,
    fbrd: u32,
    lcrh: u32,
    ctl: u32,
}

const FR_RXFE: u32 = 1 << 4;
const FR_TXFF: u32 = 1 << 5;
const FR_BUSY: u32 = 1 << 3;

const LCRH_FEN: u32 = 1 << 4;
const LCRH_WLEN_8: u32 = 0b11 << 5;

const CTL_UARTEN: u32 = 1 << 0;
const CTL_TXE: u32 = 1 << 8;
const CTL_RXE: u32 = 1 << 9;

/// Integer and fractional baud divisors for `clock_hz / (16 * baud)`.
pub const fn baud_divisors(clock_hz: u32, baud: u32) -> (u32, u32) {
    // 64 * clock / (16 * baud), rounded to nearest.
    let scaled = ((clock_hz as u64) * 4 + (baud as u64) / 2) / (baud as u64);
    ((scaled >> 6) as u32, (scaled & 0x3F) as u32)
}

pub struct Pl011 {
    base: usize,
}

impl Pl011 {
    /// `base` must be the address of a PL011-compatible register block.
    pub const fn new(base: usize) -> Pl011 {
        Pl011 { base }
    }

    fn regs(&self) -> *mut Registers {
        self.base as *mut Registers
    }

    /// Program the line for 8N1 with FIFOs at `baud` and enable TX and RX.
    pub fn init(&self, clock_hz: u32, baud: u32) {
        let (ibrd, fbrd) = baud_divisors(clock_hz, baud);
        let regs = self.regs();
        // SAFETY: `base` addresses the UART register block.
        unsafe {
            ptr::write_volatile(ptr::addr_of_mut!((*regs).ctl), 0);
            while ptr::read_volatile(ptr::addr_of!((*regs).fr)) & FR_BUSY != 0 {}
            ptr::write_volatile(ptr::addr_of_mut!((*regs).ibrd), ibrd);
            ptr::write_volatile(ptr::addr_of_mut!((*regs).fbrd), fbrd);
            ptr::write_volatile(ptr::addr_of_mut!((*regs).lcrh), LCRH_WLEN_8 | LCRH_FEN);
            ptr::write_volatile(
                ptr::addr_of_mut!((*regs).ctl),
                CTL_UARTEN | CTL_TXE | CTL_RXE,
            );
        }
    }

    fn flags(&self) -> u32 {
        // SAFETY: see `init`.
        unsafe { ptr::read_volatile(ptr::addr_of!((*self.regs()).fr)) }
    }
}

impl SerialPort for Pl011 {
    fn send_byte(&self, byte: u8) {
        while self.flags() & FR_TXFF != 0 {
            core::hint::spin_loop();
        }
        // SAFETY: see `init`.
        unsafe { ptr::write_volatile(ptr::addr_of_mut!((*self.regs()).dr), byte as u32) }
    }

    fn try_receive_byte(&self) -> Option<u8> {
        if self.flags() & FR_RXFE != 0 {
            return None;
        }
        // SAFETY: see `init`.
        let data = unsafe { ptr::read_volatile(ptr::addr_of!((*self.regs()).dr)) };
        Some(data as u8)
    }
}
