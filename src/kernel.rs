//! Syscall dispatcher. Request errors never touch kernel state.

use core::cmp::min;
use core::ptr::NonNull;
use core::slice;

use log::{info, trace, warn};

use crate::arch;
use crate::config::{MAX_IO_LEN, MAX_SLEEP_MS};
use crate::error::SyscallError;
use crate::heap::Heap;
use crate::memory::AddressSpace;
use crate::serial::SerialPort;
use crate::syscall::{self, Dispatch, SyscallRequest, Syscalls};
use crate::trap::{write_result, FrameHandle, SavedFrame, StackKind};
use crate::vectors::Disposition;

type SysResult = Result<u32, SyscallError>;

pub struct Kernel<P, M> {
    heap: Heap,
    serial: P,
    memory: M,
}

impl<P: SerialPort, M: AddressSpace> Kernel<P, M> {
    /// `heap` should already be initialized; until it is, ALLOC and FREE
    /// report `Busy`.
    pub fn new(heap: Heap, serial: P, memory: M) -> Kernel<P, M> {
        Kernel {
            heap,
            serial,
            memory,
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn serial(&self) -> &P {
        &self.serial
    }

    pub fn dispatch(&mut self, request: SyscallRequest) -> Dispatch {
        let [a0, a1, a2] = request.args;
        trace!("syscall {} args {:#x?}", request.number, request.args);

        let result = match request.number {
            syscall::SYS_WRITE => self.sys_write(a0, a1, a2),
            syscall::SYS_READ => self.sys_read(a0, a1, a2),
            syscall::SYS_EXIT => {
                let code = a0 as i32;
                info!("exit({})", code);
                return Dispatch::Exit(code);
            }
            syscall::SYS_SLEEP => self.sys_sleep(a0),
            syscall::SYS_ALLOC => self.sys_alloc(a0),
            syscall::SYS_FREE => self.sys_free(a0),
            _ => {
                warn!("unknown syscall number {}", request.number);
                Err(SyscallError::InvalidSyscall)
            }
        };

        match result {
            Ok(value) => Dispatch::Return(value as i32),
            Err(err) => {
                trace!("syscall {} failed: {}", request.number, err);
                Dispatch::Return(err.code())
            }
        }
    }

    /// Service the SVC whose frame is `frame`, writing the result into its
    /// r0. EXIT leaves the frame alone and asks for a halt.
    pub fn handle_svc(&mut self, frame: &mut FrameHandle<'_>) -> Disposition {
        match self.dispatch(SyscallRequest::from_frame(frame)) {
            Dispatch::Return(value) => {
                write_result(frame, value);
                Disposition::Resume
            }
            Dispatch::Exit(_) => Disposition::Halt,
        }
    }

    fn sys_write(&mut self, fd: u32, buf: u32, len: u32) -> SysResult {
        if fd != syscall::STDOUT && fd != syscall::STDERR {
            return Err(SyscallError::BadDescriptor);
        }
        let len = checked_io_len(buf, len)?;
        if len == 0 {
            return Ok(0);
        }
        let src = self.caller_buffer(buf, len, false)?;
        // SAFETY: `caller_buffer` vouched for `len` readable bytes.
        let bytes = unsafe { slice::from_raw_parts(src.as_ptr(), len) };
        self.serial.send_bytes(bytes);
        Ok(len as u32)
    }

    fn sys_read(&mut self, fd: u32, buf: u32, len: u32) -> SysResult {
        if fd != syscall::STDIN {
            return Err(SyscallError::BadDescriptor);
        }
        let len = checked_io_len(buf, len)?;
        if len == 0 {
            return Ok(0);
        }
        let dst = self.caller_buffer(buf, len, true)?;
        // SAFETY: `caller_buffer` vouched for `len` writable bytes that no
        // kernel structure lives in.
        let dst = unsafe { slice::from_raw_parts_mut(dst.as_ptr(), len) };

        dst[0] = self.serial.receive_byte();
        let mut count = 1;
        while count < len {
            match self.serial.try_receive_byte() {
                Some(byte) => {
                    dst[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count as u32)
    }

    fn sys_sleep(&mut self, ms: u32) -> SysResult {
        arch::delay_ms(min(ms, MAX_SLEEP_MS));
        Ok(0)
    }

    fn sys_alloc(&mut self, size: u32) -> SysResult {
        if size == 0 {
            return Err(SyscallError::InvalidArgument);
        }
        let ptr = self.heap.alloc(size as usize)?;
        match self.memory.address_of(ptr.as_ptr()) {
            // Must stay positive in r0.
            Some(addr) if addr <= i32::MAX as u32 => Ok(addr),
            _ => {
                warn!("heap block {:p} is not reachable by callers", ptr);
                self.heap.free(ptr.as_ptr() as usize)?;
                Err(SyscallError::OutOfMemory)
            }
        }
    }

    fn sys_free(&mut self, addr: u32) -> SysResult {
        if addr == 0 {
            return Err(SyscallError::InvalidArgument);
        }
        let ptr = self
            .memory
            .readable(addr, 0)
            .ok_or(SyscallError::BadAddress)?;
        self.heap.free(ptr.as_ptr() as usize)?;
        Ok(0)
    }

    /// Resolve a caller's I/O buffer. Ranges reaching into the heap must sit
    /// inside one live block's payload.
    fn caller_buffer(&self, buf: u32, len: usize, write: bool) -> Result<NonNull<u8>, SyscallError> {
        let ptr = if write {
            self.memory.writable(buf, len)
        } else {
            self.memory.readable(buf, len)
        }
        .ok_or(SyscallError::BadAddress)?;
        let start = ptr.as_ptr() as usize;
        if self.heap.overlaps(start, len) && !self.heap.in_live_payload(start, len) {
            warn!("buffer {:#x}+{} overlaps heap metadata", buf, len);
            return Err(SyscallError::BadAddress);
        }
        Ok(ptr)
    }
}

fn checked_io_len(buf: u32, len: u32) -> Result<usize, SyscallError> {
    let len = len as usize;
    if buf == 0 || len > MAX_IO_LEN {
        return Err(SyscallError::InvalidArgument);
    }
    Ok(len)
}

/// In-process syscalls: the request goes through the same frame handling an
/// SVC would, minus the trap.
impl<P: SerialPort, M: AddressSpace> Syscalls for Kernel<P, M> {
    fn syscall(&mut self, number: u32, args: [u32; 3]) -> i32 {
        let mut frame = SavedFrame::syscall(number, args);
        let mut handle = FrameHandle::from_frame(&mut frame, StackKind::Main);
        if self.handle_svc(&mut handle) == Disposition::Halt {
            arch::halt();
        }
        frame.r0 as i32
    }
}
