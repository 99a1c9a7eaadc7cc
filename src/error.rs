//! Error types shared across the kernel.

use thiserror::Error;

/// Errors reported by the heap allocator.
///
/// None of these leave the heap in a modified state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("heap used before init")]
    Uninitialized,
    #[error("zero-size allocation")]
    ZeroSize,
    #[error("out of memory ({requested} bytes requested)")]
    OutOfMemory { requested: usize },
    #[error("address {0:#x} is outside the heap")]
    Foreign(usize),
    #[error("address {0:#x} is not the base of an allocated block")]
    NotAllocated(usize),
    #[error("block at {0:#x} is already free")]
    AlreadyFree(usize),
    #[error("corrupted block header at {0:#x}")]
    Corrupted(usize),
}

/// Errors a syscall can return to its caller.
///
/// The discriminant is the value placed in r0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[repr(i32)]
pub enum SyscallError {
    #[error("invalid syscall number")]
    InvalidSyscall = -1,
    #[error("invalid argument")]
    InvalidArgument = -2,
    #[error("bad file descriptor")]
    BadDescriptor = -3,
    #[error("out of memory")]
    OutOfMemory = -4,
    #[error("bad address")]
    BadAddress = -5,
    #[error("kernel busy")]
    Busy = -6,
}

impl SyscallError {
    pub const fn code(self) -> i32 {
        self as i32
    }

    pub const fn from_code(code: i32) -> Option<SyscallError> {
        Some(match code {
            -1 => SyscallError::InvalidSyscall,
            -2 => SyscallError::InvalidArgument,
            -3 => SyscallError::BadDescriptor,
            -4 => SyscallError::OutOfMemory,
            -5 => SyscallError::BadAddress,
            -6 => SyscallError::Busy,
            _ => return None,
        })
    }
}

impl From<HeapError> for SyscallError {
    fn from(err: HeapError) -> Self {
        match err {
            HeapError::ZeroSize => SyscallError::InvalidArgument,
            HeapError::OutOfMemory { .. } => SyscallError::OutOfMemory,
            HeapError::Uninitialized => SyscallError::Busy,
            HeapError::Foreign(_)
            | HeapError::NotAllocated(_)
            | HeapError::AlreadyFree(_)
            | HeapError::Corrupted(_) => SyscallError::BadAddress,
        }
    }
}
