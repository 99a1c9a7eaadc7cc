use core::{
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
};

use crate::arch;

/// Spin lock that also masks interrupts while held, so nothing on this core
/// can preempt the holder.
///
/// Handlers must use [`Mutex::try_lock`]; if they interrupted the holder,
/// spinning would never finish.
pub struct Mutex<T> {
    inner: spin::Mutex<T>,
}

pub struct MutexGuard<'a, T> {
    inner: ManuallyDrop<spin::MutexGuard<'a, T>>,
    irqs_were_enabled: bool,
}

impl<T> Mutex<T> {
    pub const fn new(data: T) -> Self {
        Mutex {
            inner: spin::Mutex::new(data),
        }
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        let irqs_were_enabled = arch::interrupts_disable();
        match self.inner.try_lock() {
            Some(inner) => Some(MutexGuard {
                inner: ManuallyDrop::new(inner),
                irqs_were_enabled,
            }),
            None => {
                arch::interrupts_restore(irqs_were_enabled);
                None
            }
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            core::hint::spin_loop(); // spinloop wheeeee
        }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        // Release before unmasking, so an interrupt taken right after sees
        // the lock free.
        // Safety: `inner` is never touched again.
        unsafe { ManuallyDrop::drop(&mut self.inner) };
        arch::interrupts_restore(self.irqs_were_enabled);
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}
