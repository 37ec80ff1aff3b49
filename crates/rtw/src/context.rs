//! Choice between the task-context and interrupt-context kernel primitive.
//!
//! Every wrapper call that may be made from an interrupt goes through
//! [`dispatch`], which applies the same three rules everywhere:
//! task context gets the blocking primitive with the converted timeout,
//! interrupt context refuses any non-zero wait outright, and a successful
//! interrupt primitive that woke a higher-priority task is followed by a
//! yield request.

use core::time::Duration;

use crate::port::Port;
use crate::time::{self, Ticks};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ExecutionContext {
    Task,
    Interrupt,
}

impl ExecutionContext {
    pub fn of<P: Port>(port: &P) -> Self {
        if port.in_isr() {
            Self::Interrupt
        } else {
            Self::Task
        }
    }
}

/// Runs `task` or `isr` depending on the caller's execution context.
///
/// `state` is handed to whichever primitive runs. `task` also receives
/// `wait` converted to ticks; `isr` receives the "higher-priority task
/// woken" flag, and when it comes back set the port is asked to switch on
/// interrupt exit. `refused` is returned for an interrupt-context call with
/// a non-zero `wait`.
pub fn dispatch<P, S, R>(
    port: &P,
    wait: Duration,
    state: S,
    task: impl FnOnce(S, Ticks) -> R,
    isr: impl FnOnce(S, &mut bool) -> R,
    refused: R,
) -> R
where
    P: Port + ?Sized,
{
    if !port.in_isr() {
        return task(state, time::to_ticks(wait, port.tick_rate_hz()));
    }

    if !wait.is_zero() {
        log::warn!("refusing a {:?} wait in interrupt context", wait);
        return refused;
    }

    let mut woken = false;
    let result = isr(state, &mut woken);
    if woken {
        port.yield_from_isr();
    }
    result
}
