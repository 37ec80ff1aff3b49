//! 64-bit millisecond wall clock.

use crate::port::Port;
use crate::sync::Arc;
use crate::system::Rtos;

pub const MS_IN_SEC: u64 = 1_000;
pub const MS_IN_MIN: u64 = 60 * MS_IN_SEC;
pub const MS_IN_HR: u64 = 60 * MS_IN_MIN;
pub const MS_IN_DAY: u64 = 24 * MS_IN_HR;

/// Milliseconds since the Unix epoch.
pub trait Time64 {
    fn time64(&self) -> u64;
    fn set_time64(&self, ms: u64);

    fn seconds(&self) -> u64 {
        self.time64() / MS_IN_SEC
    }
}

/// Wall clock kept by the kernel port.
pub struct SystemClock<P: Port> {
    rtos: Arc<Rtos<P>>,
}

impl<P: Port> SystemClock<P> {
    pub fn new(rtos: &Arc<Rtos<P>>) -> Self {
        Self {
            rtos: Arc::clone(rtos),
        }
    }
}

impl<P: Port> Time64 for SystemClock<P> {
    fn time64(&self) -> u64 {
        self.rtos.port().system_time_ms()
    }

    fn set_time64(&self, ms: u64) {
        log::debug!("wall clock set to {} ms", ms);
        self.rtos.port().set_system_time_ms(ms);
    }
}
