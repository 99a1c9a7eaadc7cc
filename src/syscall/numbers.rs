//! Syscall numbers. Both sides of the `svc` boundary use these.

pub const SYS_WRITE: u32 = 1;
pub const SYS_READ: u32 = 2;
pub const SYS_EXIT: u32 = 10;
pub const SYS_SLEEP: u32 = 11;
pub const SYS_ALLOC: u32 = 20;
pub const SYS_FREE: u32 = 21;

pub const STDIN: u32 = 0;
pub const STDOUT: u32 = 1;
pub const STDERR: u32 = 2;
