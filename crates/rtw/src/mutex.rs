//! Binary exclusion between tasks.

use core::time::Duration;

use crate::error::MutexError;
use crate::port::{MutexHandle, Port};
use crate::sync::{Arc, Mutex};
use crate::system::Rtos;
use crate::time::FOREVER;

/// Kernel mutex owned by one task at a time.
///
/// Not recursive: a holder locking again waits like any other task.
pub struct RtosMutex<P: Port> {
    rtos: Arc<Rtos<P>>,
    handle: Mutex<Option<MutexHandle>>,
}

impl<P: Port> RtosMutex<P> {
    pub fn new(rtos: &Arc<Rtos<P>>) -> Result<Self, MutexError> {
        let handle = rtos
            .port()
            .mutex_create()
            .ok_or(MutexError::CreationFailed)?;
        Ok(Self {
            rtos: Arc::clone(rtos),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn is_created(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Acquires the mutex, waiting up to `timeout`.
    pub fn lock(&self, timeout: Duration) -> Result<(), MutexError> {
        let handle = self.live_handle()?;
        let port = self.rtos.port();
        if port.in_isr() {
            return Err(MutexError::InterruptContext);
        }
        if port.mutex_take(handle, self.rtos.ticks_for(timeout)) {
            Ok(())
        } else {
            Err(MutexError::Timeout)
        }
    }

    /// Acquires the mutex only if it is free right now.
    pub fn try_lock(&self) -> Result<(), MutexError> {
        self.lock(Duration::ZERO)
    }

    pub fn lock_forever(&self) -> Result<(), MutexError> {
        self.lock(FOREVER)
    }

    pub fn unlock(&self) -> Result<(), MutexError> {
        let handle = self.live_handle()?;
        let port = self.rtos.port();
        if port.in_isr() {
            return Err(MutexError::InterruptContext);
        }
        if port.mutex_give(handle) {
            Ok(())
        } else {
            Err(MutexError::InvalidOperation)
        }
    }

    pub fn is_locked(&self) -> bool {
        self.live_handle()
            .is_ok_and(|handle| self.rtos.port().mutex_is_held(handle))
    }

    /// Deletes the kernel mutex. Refused while some task holds it.
    pub fn remove(&self) -> Result<(), MutexError> {
        let handle = self.live_handle()?;
        let port = self.rtos.port();
        if port.mutex_is_held(handle) {
            return Err(MutexError::InvalidOperation);
        }
        *self.handle.lock() = None;
        port.mutex_delete(handle);
        Ok(())
    }

    fn live_handle(&self) -> Result<MutexHandle, MutexError> {
        self.handle.lock().ok_or(MutexError::InvalidOperation)
    }
}

impl<P: Port> Drop for RtosMutex<P> {
    fn drop(&mut self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            self.rtos.port().mutex_delete(handle);
        }
    }
}
