//! Processor-specific pieces, with host stand-ins off target.

use core::cell::UnsafeCell;
use core::mem::size_of;

#[cfg(target_arch = "arm")]
use crate::config;
#[cfg(target_arch = "arm")]
use crate::syscall::Syscalls;

/// Data type for a properly aligned stack of `WORDS` machine words.
#[repr(C, align(32))]
pub struct Stack<const WORDS: usize> {
    mem: UnsafeCell<[usize; WORDS]>,
}

// SAFETY: the memory is only ever used as a stack by the one context that
// gets switched onto it.
unsafe impl<const WORDS: usize> Sync for Stack<WORDS> {}

impl<const WORDS: usize> Stack<WORDS> {
    pub const fn new() -> Stack<WORDS> {
        Stack {
            mem: UnsafeCell::new([0; WORDS]),
        }
    }

    pub fn bottom(&self) -> usize {
        self.mem.get() as usize
    }

    /// Initial stack pointer; stacks grow down.
    pub fn top(&self) -> usize {
        self.bottom() + size_of::<[usize; WORDS]>()
    }
}

impl<const WORDS: usize> Default for Stack<WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

/// Stop forever. Used for faults, EXIT and panics.
#[cfg(target_arch = "arm")]
pub fn halt() -> ! {
    cortex_m::interrupt::disable();
    loop {
        cortex_m::asm::wfi();
    }
}

#[cfg(not(target_arch = "arm"))]
pub fn halt() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

/// Busy-wait. Stands in for a real timer.
#[cfg(target_arch = "arm")]
pub fn delay_ms(ms: u32) {
    cortex_m::asm::delay(ms.saturating_mul(config::SYSTEM_CLOCK_HZ / 1000));
}

#[cfg(not(target_arch = "arm"))]
pub fn delay_ms(_ms: u32) {}

/// Mask interrupts, returning whether they were enabled before.
#[cfg(target_arch = "arm")]
pub(crate) fn interrupts_disable() -> bool {
    let was_enabled = cortex_m::register::primask::read().is_active();
    cortex_m::interrupt::disable();
    was_enabled
}

#[cfg(target_arch = "arm")]
pub(crate) fn interrupts_restore(was_enabled: bool) {
    if was_enabled {
        // SAFETY: only re-enables what `interrupts_disable` turned off.
        unsafe { cortex_m::interrupt::enable() }
    }
}

#[cfg(not(target_arch = "arm"))]
pub(crate) fn interrupts_disable() -> bool {
    false
}

#[cfg(not(target_arch = "arm"))]
pub(crate) fn interrupts_restore(_was_enabled: bool) {}

/// Route MemManage, BusFault and UsageFault to their own vectors instead of
/// escalating them to HardFault.
#[cfg(target_arch = "arm")]
pub fn enable_fault_handlers() {
    const MEMFAULTENA: u32 = 1 << 16;
    const BUSFAULTENA: u32 = 1 << 17;
    const USGFAULTENA: u32 = 1 << 18;
    // SAFETY: SCB::PTR is the architectural SCB address; SHCSR is only
    // written here, during boot.
    unsafe {
        let scb = &*cortex_m::peripheral::SCB::PTR;
        scb.shcsr.modify(|r| r | MEMFAULTENA | BUSFAULTENA | USGFAULTENA);
    }
}

/// Switch thread mode to `stack_top` on PSP, drop privilege, and jump to
/// `entry`.
///
/// # Safety
///
/// `stack_top` must be the 8-byte aligned top of a stack nothing else uses.
/// Must be called from privileged thread mode.
#[cfg(target_arch = "arm")]
pub unsafe fn enter_unprivileged(stack_top: usize, entry: extern "C" fn() -> !) -> ! {
    // CONTROL.SPSEL = 1 (PSP), CONTROL.nPRIV = 1.
    core::arch::asm!(
        "msr PSP, {sp}",
        "msr CONTROL, {control}",
        "isb",
        "bx {entry}",
        sp = in(reg) stack_top,
        control = in(reg) 0b11u32,
        entry = in(reg) entry,
        options(noreturn),
    )
}

/// Execute a permanently undefined instruction.
#[cfg(target_arch = "arm")]
pub fn trigger_usage_fault() -> ! {
    cortex_m::asm::udf()
}

/// Syscalls through the `svc` instruction. The only way unprivileged code
/// reaches the kernel.
#[cfg(target_arch = "arm")]
pub struct SvcGate;

#[cfg(target_arch = "arm")]
impl Syscalls for SvcGate {
    fn syscall(&mut self, number: u32, args: [u32; 3]) -> i32 {
        let result: u32;
        // SAFETY: the SVCall handler only reads r0-r3 and writes r0 in the
        // stacked frame; the hardware restores everything else.
        unsafe {
            core::arch::asm!(
                "svc 0",
                inlateout("r0") number => result,
                in("r1") args[0],
                in("r2") args[1],
                in("r3") args[2],
            );
        }
        result as i32
    }
}
