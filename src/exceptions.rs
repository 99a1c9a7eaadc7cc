//! Hardware entry points, all funnelled into [`VECTORS`].

use core::arch::global_asm;

use cortex_m_rt::{exception, ExceptionFrame};
use log::error;

use cpos::{
    arch,
    config::INITIAL_STACK_POINTER,
    error::SyscallError,
    trap::{self, ExcReturn},
    vectors::{Disposition, Exception, Trap, VectorTable},
};

use crate::KERNEL;

static VECTORS: VectorTable =
    VectorTable::new(INITIAL_STACK_POINTER).with_handler(Exception::SVCall, service_call);

fn service_call(trap: &mut Trap<'_>) -> Disposition {
    let Some(frame) = trap.frame.as_mut() else {
        return Disposition::Halt;
    };
    // The kernel is never held across an `svc`, so failing here means boot
    // has not installed it yet.
    let mut guard = KERNEL.try_lock();
    match guard.as_deref_mut().and_then(Option::as_mut) {
        Some(kernel) => kernel.handle_svc(frame),
        None => {
            trap::write_result(frame, SyscallError::Busy.code());
            Disposition::Resume
        }
    }
}

// Replaces cortex-m-rt's weak SVCall. MSP, PSP and EXC_RETURN are read before
// anything is pushed; the syscall number comes from the stacked r0, not the
// live one. r4 keeps the stack 8-byte aligned across the call.
global_asm!(
    ".section .text.SVCall",
    ".global SVCall",
    ".type SVCall,%function",
    ".thumb_func",
    "SVCall:",
    "    mrs r0, MSP",
    "    mrs r1, PSP",
    "    mov r2, lr",
    "    push {{r4, lr}}",
    "    bl svc_entry",
    "    pop {{r4, pc}}",
);

#[no_mangle]
unsafe extern "C" fn svc_entry(msp: usize, psp: usize, exc_return: u32) {
    let exc_return = ExcReturn::new(exc_return);
    let Some(frame) = trap::capture_context(exc_return, msp, psp) else {
        error!("SVC with unusable context {:?}", exc_return);
        arch::halt();
    };
    if VECTORS.dispatch(&mut Trap::with_frame(Exception::SVCall, frame)) == Disposition::Halt {
        arch::halt();
    }
}

#[exception]
unsafe fn DefaultHandler(irqn: i16) {
    let disposition = match Exception::from_irqn(irqn) {
        Some(exception) => VECTORS.dispatch(&mut Trap::new(exception)),
        None => {
            error!("unhandled interrupt {}, halting", irqn);
            Disposition::Halt
        }
    };
    if disposition == Disposition::Halt {
        arch::halt();
    }
}

#[exception]
unsafe fn HardFault(ef: &ExceptionFrame) -> ! {
    error!("HardFault at pc={:#010x} lr={:#010x}", ef.pc(), ef.lr());
    VECTORS.dispatch(&mut Trap::new(Exception::HardFault));
    arch::halt()
}
