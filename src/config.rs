//! Board and kernel configuration. Layout constants must agree with `memory.x`.

use core::ops::Range;

use log::LevelFilter;

/// Start of the heap region handed to the allocator at boot.
pub const HEAP_START: usize = 0x2000_1000;
/// 24 KiB
pub const HEAP_SIZE: usize = 0x6000;

/// Value the hardware loads into MSP from vector slot 0.
pub const INITIAL_STACK_POINTER: u32 = 0x2000_7F00;

/// LM3S6965 UART0.
pub const UART0_BASE: usize = 0x4000_C000;
pub const UART_BAUD: u32 = 115_200;
pub const SYSTEM_CLOCK_HZ: u32 = 12_000_000;

pub const FLASH: Range<usize> = 0x0000_0000..0x0004_0000;
pub const SRAM: Range<usize> = 0x2000_0000..0x2001_0000;
pub const HEAP: Range<usize> = HEAP_START..HEAP_START + HEAP_SIZE;

/// Largest single WRITE or READ transfer.
pub const MAX_IO_LEN: usize = 1024;

/// SLEEP requests are clamped to this many milliseconds.
pub const MAX_SLEEP_MS: u32 = 1000;

/// Size of the unprivileged thread stack, in words.
pub const USER_STACK_WORDS: usize = 512;

#[cfg(feature = "log-trace")]
pub const LOG_LEVEL: LevelFilter = LevelFilter::Trace;
#[cfg(all(feature = "log-debug", not(feature = "log-trace")))]
pub const LOG_LEVEL: LevelFilter = LevelFilter::Debug;
#[cfg(not(any(feature = "log-debug", feature = "log-trace")))]
pub const LOG_LEVEL: LevelFilter = LevelFilter::Info;
