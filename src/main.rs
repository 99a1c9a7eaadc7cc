#![cfg_attr(target_arch = "arm", no_std)]
#![cfg_attr(target_arch = "arm", no_main)]

#[cfg(target_arch = "arm")]
mod exceptions;

#[cfg(target_arch = "arm")]
use {
    core::panic::PanicInfo,
    cortex_m_rt::entry,
    cpos::{
        arch::{self, Stack, SvcGate},
        config,
        heap::Heap,
        kernel::Kernel,
        logger::{self, SerialLogger},
        memory::{Flat, Region},
        selftest,
        serial::{Pl011, SerialPort},
        sync::Mutex,
    },
    log::{error, info},
};

#[cfg(target_arch = "arm")]
static LOGGER: SerialLogger<Pl011> =
    SerialLogger::new(Pl011::new(config::UART0_BASE), config::LOG_LEVEL);

/// The one kernel instance. Installed during boot, then only touched by the
/// SVC handler.
#[cfg(target_arch = "arm")]
static KERNEL: Mutex<Option<Kernel<Pl011, UserMemory>>> = Mutex::new(None);

#[cfg(target_arch = "arm")]
static USER_STACK: Stack<{ config::USER_STACK_WORDS }> = Stack::new();

#[cfg(target_arch = "arm")]
type UserMemory = Flat<3>;

/// What unprivileged code may hand the kernel: flash to read from, its own
/// stack and the heap. Kernel statics are in none of them.
#[cfg(target_arch = "arm")]
fn user_memory() -> UserMemory {
    Flat::new([
        Region::read_only(config::FLASH),
        Region::read_write(USER_STACK.bottom()..USER_STACK.top()),
        Region::read_write(config::HEAP),
    ])
}

#[cfg(target_arch = "arm")]
#[entry]
fn main() -> ! {
    let console = Pl011::new(config::UART0_BASE);
    console.init(config::SYSTEM_CLOCK_HZ, config::UART_BAUD);
    if logger::init(&LOGGER).is_err() {
        console.send_str("logger already installed\r\n");
    }
    info!("cpos booting");

    arch::enable_fault_handlers();

    let mut heap = Heap::empty();
    // SAFETY: memory.x keeps .data and .bss below HEAP_START and the main
    // stack above the end of the heap.
    unsafe { heap.init(config::HEAP_START, config::HEAP_SIZE) };
    let report = selftest::heap_direct(&mut heap);
    info!(
        "heap self-test: {} passed, {} failed",
        report.passed, report.failed
    );

    *KERNEL.lock() = Some(Kernel::new(
        heap,
        Pl011::new(config::UART0_BASE),
        user_memory(),
    ));

    info!("entering unprivileged mode");
    // SAFETY: USER_STACK is used by nothing else, and we are still
    // privileged thread code on MSP.
    unsafe { arch::enter_unprivileged(USER_STACK.top(), user_main) }
}

/// Unprivileged thread. Reaches the kernel only through `svc`.
#[cfg(target_arch = "arm")]
extern "C" fn user_main() -> ! {
    let report = selftest::run(&mut SvcGate, &user_memory());
    if report.ok() {
        info!("all self-tests passed");
    } else {
        error!("{} self-test(s) failed", report.failed);
    }

    if cfg!(feature = "fault-test") {
        info!("raising a UsageFault");
        arch::trigger_usage_fault();
    }

    loop {
        cortex_m::asm::wfi();
    }
}

#[cfg(target_arch = "arm")]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    error!("{}", info);
    arch::halt()
}

#[cfg(not(target_arch = "arm"))]
fn main() {
    eprintln!("cpos is firmware; build it for thumbv7m-none-eabi");
}
