use crate::context::KernelContext;
use crate::error::KernelError;
use crate::platform::Platform;
use kernel_sync::{SpinLock, SyncOnceCell};

/// The one published kernel context, for code that cannot be handed a
/// reference: interrupt handlers and the first instructions of a new task.
///
/// Task switches happen while the context lock is held. The task that is
/// switched out keeps its guard parked on its own stack, and the task that
/// resumes drops the guard it parked earlier, so the lock stays held across
/// the switch and is released by whoever runs next. A task that runs for the
/// first time has no parked guard and calls
/// [`release_after_switch`](Self::release_after_switch) instead.
pub struct GlobalKernel<P: Platform> {
    cell: SyncOnceCell<SpinLock<KernelContext<'static, P>>>,
}

impl<P: Platform> Default for GlobalKernel<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Platform> GlobalKernel<P> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cell: SyncOnceCell::new(),
        }
    }

    /// # Errors
    /// [`KernelError::AlreadyPublished`] on the second call.
    pub fn publish(&self, context: KernelContext<'static, P>) -> Result<(), KernelError> {
        self.cell
            .set(SpinLock::new(context))
            .map(|_| ())
            .map_err(|_| KernelError::AlreadyPublished)
    }

    #[must_use]
    pub fn is_published(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Run `f` with the context locked.
    ///
    /// # Errors
    /// [`KernelError::NotPublished`] before [`publish`](Self::publish).
    pub fn with<R>(&self, f: impl FnOnce(&mut KernelContext<'static, P>) -> R) -> Result<R, KernelError> {
        let lock = self.cell.get().ok_or(KernelError::NotPublished)?;
        Ok(lock.with_lock(f))
    }

    /// Like [`with`](Self::with) for fallible operations.
    ///
    /// # Errors
    /// [`KernelError::NotPublished`], or whatever `f` returns.
    pub fn try_with<R>(
        &self,
        f: impl FnOnce(&mut KernelContext<'static, P>) -> Result<R, KernelError>,
    ) -> Result<R, KernelError> {
        self.with(f)?
    }

    /// Timer interrupt entry. Returns whether the tick was delivered.
    ///
    /// A tick that interrupts code holding the context is dropped; the
    /// interrupted critical section is exactly what a scheduler lock would
    /// have protected.
    pub fn tick(&self) -> bool {
        let Some(lock) = self.cell.get() else {
            return false;
        };
        let Some(mut context) = lock.try_lock() else {
            return false;
        };
        context.tick();
        true
    }

    /// Release the context lock inherited from the task that switched here.
    ///
    /// # Safety
    /// Only for the first instructions of a task that has never run, while
    /// the switching task's guard is parked on the stack it left behind.
    pub unsafe fn release_after_switch(&self) {
        if let Some(lock) = self.cell.get() {
            // SAFETY: forwarded from the caller.
            unsafe { lock.force_unlock() };
        }
    }
}
