//! Trap context adapter: (EXC_RETURN, MSP, PSP) to the frame the hardware
//! stacked. The only place the kernel touches another context's registers.

use core::fmt;
use core::mem::size_of;

use static_assertions::const_assert_eq;

/// Registers stacked by the hardware on exception entry, lowest address first.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SavedFrame {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
}

const_assert_eq!(size_of::<SavedFrame>(), 32);

impl SavedFrame {
    /// Frame as an `svc` with these argument registers would leave it.
    pub const fn syscall(number: u32, args: [u32; 3]) -> SavedFrame {
        SavedFrame {
            r0: number,
            r1: args[0],
            r2: args[1],
            r3: args[2],
            r12: 0,
            lr: 0,
            pc: 0,
            // Thumb bit.
            xpsr: 1 << 24,
        }
    }
}

/// The EXC_RETURN value found in LR on exception entry.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ExcReturn(u32);

impl ExcReturn {
    pub const HANDLER_MSP: ExcReturn = ExcReturn(0xFFFF_FFF1);
    pub const THREAD_MSP: ExcReturn = ExcReturn(0xFFFF_FFF9);
    pub const THREAD_PSP: ExcReturn = ExcReturn(0xFFFF_FFFD);

    pub const fn new(raw: u32) -> ExcReturn {
        ExcReturn(raw)
    }

    /// One of the six encodings ARMv7-M defines.
    pub const fn is_valid(self) -> bool {
        self.0 & 0xFFFF_FFE0 == 0xFFFF_FFE0 && matches!(self.0 & 0xF, 0x1 | 0x9 | 0xD)
    }

    /// Bit 2: the frame was pushed onto PSP rather than MSP.
    pub const fn uses_process_stack(self) -> bool {
        self.0 & (1 << 2) != 0
    }

    /// Bit 3: returning to thread mode.
    pub const fn returns_to_thread(self) -> bool {
        self.0 & (1 << 3) != 0
    }

    /// Bit 4 clear means the frame also holds FP state. The integer
    /// registers sit at the same offsets either way.
    pub const fn has_fp_frame(self) -> bool {
        self.0 & (1 << 4) == 0
    }
}

impl fmt::Debug for ExcReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExcReturn({:#010x})", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackKind {
    Main,
    Process,
}

/// Exclusive access to a saved frame for the duration of one trap.
pub struct FrameHandle<'a> {
    frame: &'a mut SavedFrame,
    number: u32,
    stack: StackKind,
}

impl<'a> FrameHandle<'a> {
    /// Wrap a saved frame, snapshotting its r0 as the syscall number.
    pub fn from_frame(frame: &'a mut SavedFrame, stack: StackKind) -> FrameHandle<'a> {
        let number = frame.r0;
        FrameHandle {
            frame,
            number,
            stack,
        }
    }

    /// Syscall number as it was in r0 when the trap was taken.
    pub fn number(&self) -> u32 {
        self.number
    }

    /// r1..r3.
    pub fn args(&self) -> [u32; 3] {
        [self.frame.r1, self.frame.r2, self.frame.r3]
    }

    pub fn stack(&self) -> StackKind {
        self.stack
    }

    /// Address the caller resumes at.
    pub fn return_address(&self) -> u32 {
        self.frame.pc
    }

    pub fn frame(&self) -> &SavedFrame {
        self.frame
    }
}

/// Locate the frame the hardware stacked for the current trap. The syscall
/// number is taken from the stacked r0.
///
/// Returns `None` for an EXC_RETURN that is not one of the architectural
/// encodings, or a stack pointer that cannot hold a frame.
///
/// # Safety
///
/// Must be called from the exception handler that `exc_return` belongs to,
/// with `msp` and `psp` read on entry before anything was pushed. The frame
/// must not be accessed any other way while the handle lives.
pub unsafe fn capture_context<'a>(
    exc_return: ExcReturn,
    msp: usize,
    psp: usize,
) -> Option<FrameHandle<'a>> {
    if !exc_return.is_valid() {
        return None;
    }
    let (stack, sp) = if exc_return.uses_process_stack() {
        (StackKind::Process, psp)
    } else {
        (StackKind::Main, msp)
    };
    if sp == 0 || sp % 4 != 0 {
        return None;
    }
    Some(FrameHandle::from_frame(&mut *(sp as *mut SavedFrame), stack))
}

/// Store `value` in the saved r0, which the caller sees as the syscall result.
pub fn write_result(frame: &mut FrameHandle<'_>, value: i32) {
    frame.frame.r0 = value as u32;
}
