//! Syscall interface: number in r0, arguments in r1..r3, result back in r0,
//! negative on error.

pub mod numbers;

use crate::arch;
use crate::error::SyscallError;
use crate::trap::FrameHandle;

pub use numbers::*;

/// A decoded syscall: what the caller had in r0..r3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallRequest {
    pub number: u32,
    pub args: [u32; 3],
}

impl SyscallRequest {
    pub const fn new(number: u32, args: [u32; 3]) -> SyscallRequest {
        SyscallRequest { number, args }
    }

    pub fn from_frame(frame: &FrameHandle<'_>) -> SyscallRequest {
        SyscallRequest {
            number: frame.number(),
            args: frame.args(),
        }
    }
}

/// Outcome of dispatching one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Value for the caller's r0.
    Return(i32),
    /// The caller asked to stop; nothing is returned to it.
    Exit(i32),
}

/// Turn a raw r0 value into a typed result.
pub fn decode(ret: i32) -> Result<u32, SyscallError> {
    if ret >= 0 {
        return Ok(ret as u32);
    }
    // Codes outside the table only come from a mismatched kernel.
    Err(SyscallError::from_code(ret).unwrap_or(SyscallError::InvalidSyscall))
}

pub trait Syscalls {
    /// Issue one raw syscall.
    fn syscall(&mut self, number: u32, args: [u32; 3]) -> i32;

    fn write(&mut self, fd: u32, buf: u32, len: u32) -> Result<u32, SyscallError> {
        decode(self.syscall(SYS_WRITE, [fd, buf, len]))
    }

    fn read(&mut self, fd: u32, buf: u32, len: u32) -> Result<u32, SyscallError> {
        decode(self.syscall(SYS_READ, [fd, buf, len]))
    }

    fn sleep(&mut self, ms: u32) -> Result<(), SyscallError> {
        decode(self.syscall(SYS_SLEEP, [ms, 0, 0])).map(|_| ())
    }

    /// Returns the bus address of at least `size` fresh bytes.
    fn alloc(&mut self, size: u32) -> Result<u32, SyscallError> {
        decode(self.syscall(SYS_ALLOC, [size, 0, 0]))
    }

    fn free(&mut self, addr: u32) -> Result<(), SyscallError> {
        decode(self.syscall(SYS_FREE, [addr, 0, 0])).map(|_| ())
    }

    fn exit(&mut self, code: i32) -> ! {
        self.syscall(SYS_EXIT, [code as u32, 0, 0]);
        arch::halt()
    }
}
