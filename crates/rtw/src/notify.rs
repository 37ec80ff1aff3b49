//! Direct-to-task notifications.
//!
//! Every task owns one 32-bit notification word. Senders act on it through
//! [`Signal`] (implemented by [`Thread`]); only the owning task can wait on
//! it, through [`SignalWaiter`] (implemented by [`TaskContext`]).

use core::time::Duration;

use crate::context;
use crate::error::NotifyError;
use crate::port::{NotifyWait, Port, TaskHandle};
use crate::system::Rtos;
use crate::task::{Lifecycle, TaskContext, Thread};
use crate::time::FOREVER;
use crate::trace;

/// Mask with only bit `n` set; empty when `n` is 32 or more.
pub const fn sig_bit(n: u32) -> u32 {
    match 1u32.checked_shl(n) {
        Some(mask) => mask,
        None => 0,
    }
}

/// How a notification changes the target's notification word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NotifyAction {
    /// Mark the notification pending without touching the word.
    NoAction,
    /// OR the value into the word.
    SetBits,
    /// Add one to the word, ignoring the value.
    Increment,
    /// Replace the word unconditionally.
    SetValueWithOverwrite,
    /// Replace the word only if the previous notification was consumed.
    SetValueWithoutOverwrite,
}

impl NotifyAction {
    fn code(self) -> u8 {
        match self {
            Self::NoAction => 0,
            Self::SetBits => 1,
            Self::Increment => 2,
            Self::SetValueWithOverwrite => 3,
            Self::SetValueWithoutOverwrite => 4,
        }
    }
}

/// Result of waiting for a set of signal bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SignalOutcome {
    /// A notification arrived carrying every bit of the mask.
    ExpectedReceived,
    /// A notification arrived but some mask bits were missing.
    UnexpectedReceived,
    TimedOut,
}

/// Result of waiting for a notification value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyValue {
    pub timed_out: bool,
    pub value: u32,
}

/// Sending side of a task's notification word.
pub trait Signal: Send + Sync {
    /// Sets `mask` bits in the target's word and wakes it.
    fn signal_on_bits(&self, mask: u32);

    /// Replaces the target's word, discarding any unconsumed value.
    fn send_value_with_overwrite(&self, value: u32);

    /// Replaces the target's word unless the previous value is still unread,
    /// in which case [`NotifyError::Pending`] is returned and nothing changes.
    fn send_value_without_overwrite(&self, value: u32) -> Result<(), NotifyError>;

    fn notify(&self, value: u32, action: NotifyAction) -> Result<(), NotifyError>;
}

/// Receiving side, available to the task that owns the word.
pub trait SignalWaiter {
    /// Waits for a notification, clearing `mask` on entry and exit.
    fn wait_for_signal_on_bits(&self, mask: u32, timeout: Duration) -> SignalOutcome;

    fn wait_for_signal_on_bits_forever(&self, mask: u32) -> SignalOutcome {
        self.wait_for_signal_on_bits(mask, FOREVER)
    }

    /// Waits for a notification and returns the whole word, clearing it on
    /// exit.
    fn wait_for_value(&self, timeout: Duration) -> NotifyValue;

    fn wait_for_value_forever(&self) -> NotifyValue {
        self.wait_for_value(FOREVER)
    }

    /// General form: returns the word if a notification arrived.
    fn wait_for_notification(
        &self,
        clear_on_entry: u32,
        clear_on_exit: u32,
        timeout: Duration,
    ) -> Option<u32>;
}

fn deliver<P: Port>(rtos: &Rtos<P>, handle: TaskHandle, value: u32, action: NotifyAction) -> bool {
    let port = rtos.port();
    context::dispatch(
        port,
        Duration::ZERO,
        (),
        |_, _| port.notify(handle, value, action),
        |_, woken| port.notify_from_isr(handle, value, action, woken),
        false,
    )
}

impl<P: Port> Thread<P> {
    fn send(&self, value: u32, action: NotifyAction) -> Option<bool> {
        let handle = match self.handle() {
            Some(handle) => handle,
            None => {
                log::warn!(
                    "task '{}' {}: notification dropped, task not joined",
                    self.name(),
                    self.id()
                );
                return None;
            }
        };
        let accepted = deliver(self.rtos(), handle, value, action);

        let mut payload = [0u8; 8];
        payload[..2].copy_from_slice(&self.id().raw().to_le_bytes());
        payload[2] = action.code();
        payload[3..7].copy_from_slice(&value.to_le_bytes());
        payload[7] = accepted as u8;
        self.rtos().trace(trace::NOTIFY, &payload);
        Some(accepted)
    }
}

impl<P: Port> Signal for Thread<P> {
    fn signal_on_bits(&self, mask: u32) {
        self.send(mask, NotifyAction::SetBits);
    }

    fn send_value_with_overwrite(&self, value: u32) {
        self.send(value, NotifyAction::SetValueWithOverwrite);
    }

    fn send_value_without_overwrite(&self, value: u32) -> Result<(), NotifyError> {
        match self.send(value, NotifyAction::SetValueWithoutOverwrite) {
            Some(true) => Ok(()),
            Some(false) => Err(NotifyError::Pending),
            None => Err(NotifyError::Rejected),
        }
    }

    fn notify(&self, value: u32, action: NotifyAction) -> Result<(), NotifyError> {
        match self.send(value, action) {
            Some(true) => Ok(()),
            _ => Err(NotifyError::Rejected),
        }
    }
}

impl<P: Port> TaskContext<P> {
    fn wait_raw(&self, clear_on_entry: u32, clear_on_exit: u32, timeout: Duration) -> NotifyWait {
        let port = self.port();
        if port.in_isr() {
            log::warn!("notification wait refused in interrupt context");
            return NotifyWait {
                received: false,
                value: 0,
            };
        }
        port.notify_wait(clear_on_entry, clear_on_exit, self.rtos.ticks_for(timeout))
    }
}

impl<P: Port> SignalWaiter for TaskContext<P> {
    fn wait_for_signal_on_bits(&self, mask: u32, timeout: Duration) -> SignalOutcome {
        let wait = self.wait_raw(mask, mask, timeout);
        if !wait.received {
            SignalOutcome::TimedOut
        } else if wait.value & mask == mask {
            SignalOutcome::ExpectedReceived
        } else {
            SignalOutcome::UnexpectedReceived
        }
    }

    fn wait_for_value(&self, timeout: Duration) -> NotifyValue {
        let wait = self.wait_raw(0, u32::MAX, timeout);
        NotifyValue {
            timed_out: !wait.received,
            value: wait.value,
        }
    }

    fn wait_for_notification(
        &self,
        clear_on_entry: u32,
        clear_on_exit: u32,
        timeout: Duration,
    ) -> Option<u32> {
        let wait = self.wait_raw(clear_on_entry, clear_on_exit, timeout);
        if wait.received {
            Some(wait.value)
        } else {
            None
        }
    }
}
