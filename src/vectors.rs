//! Software mirror of the sixteen ARMv7-M system vectors.

use core::fmt;

use log::error;

use crate::trap::FrameHandle;

/// Number of system slots, including the initial stack pointer.
pub const SYSTEM_VECTORS: usize = 16;

/// System exceptions that can be routed through the table.
///
/// Reset is absent on purpose: its entry is owned by the runtime and can
/// neither be replaced nor return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Exception {
    NonMaskableInt = 2,
    HardFault = 3,
    MemoryManagement = 4,
    BusFault = 5,
    UsageFault = 6,
    SVCall = 11,
    DebugMonitor = 12,
    PendSV = 14,
    SysTick = 15,
}

impl Exception {
    pub const ALL: [Exception; 9] = [
        Exception::NonMaskableInt,
        Exception::HardFault,
        Exception::MemoryManagement,
        Exception::BusFault,
        Exception::UsageFault,
        Exception::SVCall,
        Exception::DebugMonitor,
        Exception::PendSV,
        Exception::SysTick,
    ];

    /// Slot index, which is also the architectural exception number.
    pub const fn number(self) -> usize {
        self as usize
    }

    pub fn from_number(number: usize) -> Option<Exception> {
        Exception::ALL.into_iter().find(|e| e.number() == number)
    }

    /// Map the IRQ number cortex-m-rt passes to `DefaultHandler`. System
    /// exceptions are negative; device interrupts are not in this table.
    pub fn from_irqn(irqn: i16) -> Option<Exception> {
        if irqn >= 0 {
            return None;
        }
        Exception::from_number((irqn + 16) as usize)
    }

    pub const fn is_fault(self) -> bool {
        matches!(
            self,
            Exception::HardFault
                | Exception::MemoryManagement
                | Exception::BusFault
                | Exception::UsageFault
        )
    }
}

/// What the glue code should do once a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Return from the exception and resume the interrupted code.
    Resume,
    /// Stop the processor for good.
    Halt,
}

/// One trap in flight.
pub struct Trap<'a> {
    pub exception: Exception,
    /// Present for SVCall, whose caller's registers the handler needs.
    pub frame: Option<FrameHandle<'a>>,
}

impl<'a> Trap<'a> {
    pub fn new(exception: Exception) -> Trap<'a> {
        Trap {
            exception,
            frame: None,
        }
    }

    pub fn with_frame(exception: Exception, frame: FrameHandle<'a>) -> Trap<'a> {
        Trap {
            exception,
            frame: Some(frame),
        }
    }
}

pub type Handler = fn(&mut Trap<'_>) -> Disposition;

#[derive(Clone, Copy)]
pub enum Vector {
    InitialStack(u32),
    Reset,
    Reserved,
    Default,
    Handler(Handler),
}

impl fmt::Debug for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vector::InitialStack(sp) => write!(f, "InitialStack({sp:#010x})"),
            Vector::Reset => f.write_str("Reset"),
            Vector::Reserved => f.write_str("Reserved"),
            Vector::Default => f.write_str("Default"),
            Vector::Handler(h) => write!(f, "Handler({:p})", *h as *const ()),
        }
    }
}

pub struct VectorTable {
    slots: [Vector; SYSTEM_VECTORS],
}

impl VectorTable {
    /// Table with every exception on the default handler.
    pub const fn new(initial_sp: u32) -> VectorTable {
        let mut slots = [Vector::Default; SYSTEM_VECTORS];
        slots[0] = Vector::InitialStack(initial_sp);
        slots[1] = Vector::Reset;
        slots[7] = Vector::Reserved;
        slots[8] = Vector::Reserved;
        slots[9] = Vector::Reserved;
        slots[10] = Vector::Reserved;
        slots[13] = Vector::Reserved;
        VectorTable { slots }
    }

    /// Route `exception` to `handler` instead of the default.
    pub const fn with_handler(mut self, exception: Exception, handler: Handler) -> VectorTable {
        self.slots[exception.number()] = Vector::Handler(handler);
        self
    }

    pub fn slot(&self, index: usize) -> Option<&Vector> {
        self.slots.get(index)
    }

    pub fn slots(&self) -> &[Vector] {
        &self.slots
    }

    pub fn initial_stack_pointer(&self) -> u32 {
        match self.slots[0] {
            Vector::InitialStack(sp) => sp,
            _ => 0,
        }
    }

    pub fn dispatch(&self, trap: &mut Trap<'_>) -> Disposition {
        match self.slots[trap.exception.number()] {
            Vector::Handler(handler) => handler(trap),
            Vector::Default => default_handler(trap),
            // Not reachable through `Exception`; treat like an unhandled trap.
            Vector::InitialStack(_) | Vector::Reset | Vector::Reserved => default_handler(trap),
        }
    }
}

/// Shared handler for every slot nothing was registered for.
pub fn default_handler(trap: &mut Trap<'_>) -> Disposition {
    match &trap.frame {
        Some(frame) => error!(
            "unhandled {:?} from pc={:#010x}, halting",
            trap.exception,
            frame.return_address()
        ),
        None => error!("unhandled {:?}, halting", trap.exception),
    }
    Disposition::Halt
}
