//! A small Cortex-M kernel with a syscall gate and a first-fit heap.

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod config;
pub mod error;
pub mod heap;
pub mod kernel;
pub mod logger;
pub mod memory;
pub mod selftest;
pub mod serial;
pub mod sync;
pub mod syscall;
pub mod trap;
pub mod vectors;

#[cfg(test)]
mod testing;

pub use error::{HeapError, SyscallError};
pub use heap::Heap;
pub use kernel::Kernel;
