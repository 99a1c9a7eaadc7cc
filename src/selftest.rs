//! Boot-time self-tests, narrated through the log.

use core::ptr;

use log::{error, info};

use crate::error::SyscallError;
use crate::heap::Heap;
use crate::memory::AddressSpace;
use crate::syscall::{Syscalls, STDOUT};

pub const WRITE_MESSAGE: &[u8] = b"Hello from an unprivileged write\r\n";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub passed: u32,
    pub failed: u32,
}

impl Report {
    pub fn ok(&self) -> bool {
        self.failed == 0
    }

    fn check(&mut self, name: &str, ok: bool) {
        if ok {
            self.passed += 1;
            info!("PASS {}", name);
        } else {
            self.failed += 1;
            error!("FAIL {}", name);
        }
    }

    fn merge(&mut self, other: Report) {
        self.passed += other.passed;
        self.failed += other.failed;
    }
}

/// Allocator checks against the heap itself, no syscalls involved.
pub fn heap_direct(heap: &mut Heap) -> Report {
    let mut report = Report::default();
    let before = heap.stats();

    let a = heap.alloc(64);
    let b = heap.alloc(128);
    report.check("heap: two allocations", a.is_ok() && b.is_ok());
    if let (Ok(a), Ok(b)) = (a, b) {
        let (a, b) = (a.as_ptr() as usize, b.as_ptr() as usize);
        report.check("heap: blocks do not overlap", a + 64 <= b || b + 128 <= a);
        report.check("heap: free", heap.free(a).is_ok() && heap.free(b).is_ok());
        report.check("heap: double free refused", heap.free(a).is_err());
    }
    report.check("heap: zero size refused", heap.alloc(0).is_err());
    report.check("heap: oversized refused", heap.alloc(heap.size() + 1).is_err());
    report.check(
        "heap: everything coalesced",
        heap.verify().map(|s| s == before).unwrap_or(false),
    );
    report
}

/// End-to-end checks through `sys`. `mem` resolves the addresses the kernel
/// hands back so the caller can use the memory.
pub fn run<S: Syscalls, M: AddressSpace>(sys: &mut S, mem: &M) -> Report {
    let mut report = Report::default();
    report.merge(write_round_trip(sys, mem));
    report.merge(alloc_round_trip(sys, mem));

    report.check(
        "syscall: unknown number",
        sys.syscall(999, [0; 3]) == SyscallError::InvalidSyscall.code(),
    );

    report.check(
        "syscall: exhaustion reported",
        sys.alloc(0x7FFF_FFFF) == Err(SyscallError::OutOfMemory),
    );
    let recovered = sys.alloc(64);
    report.check(
        "syscall: alloc after exhaustion",
        matches!(recovered, Ok(addr) if sys.free(addr).is_ok()),
    );

    report.check("syscall: sleep", sys.sleep(10).is_ok());

    info!("self-test: {} passed, {} failed", report.passed, report.failed);
    report
}

fn write_round_trip<S: Syscalls, M: AddressSpace>(sys: &mut S, mem: &M) -> Report {
    let mut report = Report::default();
    let len = WRITE_MESSAGE.len() as u32;
    let Ok(buf) = sys.alloc(len) else {
        report.check("syscall: write buffer", false);
        return report;
    };
    let Some(dst) = mem.writable(buf, WRITE_MESSAGE.len()) else {
        report.check("syscall: write buffer reachable", false);
        return report;
    };
    // SAFETY: freshly allocated and at least `len` bytes long.
    unsafe { ptr::copy_nonoverlapping(WRITE_MESSAGE.as_ptr(), dst.as_ptr(), WRITE_MESSAGE.len()) };

    report.check("syscall: write", sys.write(STDOUT, buf, len) == Ok(len));
    report.check("syscall: write bad fd", sys.write(7, buf, len) == Err(SyscallError::BadDescriptor));
    report.check("syscall: free write buffer", sys.free(buf).is_ok());
    report
}

fn alloc_round_trip<S: Syscalls, M: AddressSpace>(sys: &mut S, mem: &M) -> Report {
    let mut report = Report::default();
    let addr = match sys.alloc(128) {
        Ok(addr) => addr,
        Err(err) => {
            error!("alloc(128): {}", err);
            report.check("syscall: alloc", false);
            return report;
        }
    };
    report.check("syscall: alloc", addr != 0 && addr % 8 == 0);

    match mem.writable(addr, 10) {
        Some(p) => {
            let p = p.as_ptr();
            // SAFETY: the block holds at least 128 bytes.
            let readback = unsafe {
                for i in 0..10 {
                    p.add(i).write_volatile(0xA0 + i as u8);
                }
                (0..10).all(|i| p.add(i).read_volatile() == 0xA0 + i as u8)
            };
            report.check("syscall: readback", readback);
        }
        None => report.check("syscall: readback", false),
    }

    report.check("syscall: free", sys.free(addr).is_ok());
    report.check("syscall: double free refused", sys.free(addr).is_err());
    report
}
