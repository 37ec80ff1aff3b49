//! The boundary to the underlying tick-driven, priority-preemptive kernel.
//!
//! Everything this crate needs from the kernel is a method on [`Port`].
//! Blocking calls take a tick count where [`crate::time::MAX_DELAY`] means
//! "forever" and zero means "do not block". Any call made from task context
//! may switch to a higher-priority task before it returns; `*_from_isr`
//! variants never switch and instead report through `woken` whether a
//! higher-priority task became ready.

use alloc::boxed::Box;
use core::num::NonZeroU32;

use crate::arena::Region;
use crate::notify::NotifyAction;
use crate::task::{Priority, TaskName};
use crate::time::Ticks;

macro_rules! kernel_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(NonZeroU32);

        impl $name {
            pub const fn from_raw(raw: NonZeroU32) -> Self {
                Self(raw)
            }

            pub const fn raw(self) -> NonZeroU32 {
                self.0
            }
        }
    };
}

kernel_handle!(
    /// Kernel-side identity of a registered task.
    TaskHandle
);
kernel_handle!(
    /// Kernel-side identity of a queue.
    QueueHandle
);
kernel_handle!(
    /// Kernel-side identity of a mutex.
    MutexHandle
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SchedulerState {
    NotStarted,
    Running,
    Stopped,
}

/// End of the queue an item is inserted at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPosition {
    Back,
    Front,
}

/// Result of waiting on the calling task's notification word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyWait {
    /// A notification arrived before the timeout.
    pub received: bool,
    /// The notification word as read before exit clearing.
    pub value: u32,
}

/// Entry point handed to the kernel; it never returns control normally.
pub type TaskEntry = Box<dyn FnOnce() + Send + 'static>;

/// Everything the kernel needs to register a task.
pub struct TaskSpawn<'a> {
    pub name: &'a str,
    pub priority: Priority,
    pub stack: &'a Region,
    pub control_block: &'a Region,
    pub entry: TaskEntry,
    /// Receives the new task's handle before the task can first run.
    pub publish: &'a dyn Fn(TaskHandle),
}

/// Everything the kernel needs to create a queue.
///
/// Regions are arena accounting spans, not memory. A port backs them with
/// its own storage and must refuse a queue whose `capacity * item_size`
/// does not fit in `storage`.
pub struct QueueSpec<'a> {
    pub capacity: usize,
    pub item_size: usize,
    pub storage: &'a Region,
    pub control_block: &'a Region,
}

/// Kernel services consumed by the wrappers.
pub trait Port: Send + Sync + 'static {
    /// Whether the caller runs in interrupt context.
    fn in_isr(&self) -> bool;

    fn scheduler_state(&self) -> SchedulerState;
    /// Starts scheduling. Does not return while the scheduler runs.
    fn start_scheduler(&self);
    fn end_scheduler(&self);
    fn yield_now(&self);
    /// Requests a context switch on exit from the current interrupt.
    fn yield_from_isr(&self);
    fn delay(&self, ticks: Ticks);
    fn tick_rate_hz(&self) -> u32;
    fn tick_count(&self) -> u64;
    /// Stops the calling task for good after a fatal contract violation.
    fn halt(&self) -> !;

    /// Registers a task. On success the port calls `spawn.publish` with the
    /// handle before the task becomes ready, so code that the new task or
    /// any other task runs can already reach it by handle.
    fn task_create(&self, spawn: TaskSpawn<'_>) -> Option<TaskHandle>;
    fn task_delete(&self, task: TaskHandle);
    fn task_suspend(&self, task: TaskHandle);
    /// Returns whether a context switch is required on interrupt exit.
    fn task_suspend_from_isr(&self, task: TaskHandle) -> bool;
    fn task_resume(&self, task: TaskHandle);
    /// Returns whether a context switch is required on interrupt exit.
    fn task_resume_from_isr(&self, task: TaskHandle) -> bool;
    fn task_priority(&self, task: TaskHandle) -> Priority;
    fn task_set_priority(&self, task: TaskHandle, priority: Priority);
    fn task_name(&self, task: TaskHandle) -> TaskName;
    fn current_task(&self) -> Option<TaskHandle>;

    /// Updates the target's notification word. Returns `false` only when
    /// `SetValueWithoutOverwrite` finds an unconsumed value.
    fn notify(&self, task: TaskHandle, value: u32, action: NotifyAction) -> bool;
    fn notify_from_isr(
        &self,
        task: TaskHandle,
        value: u32,
        action: NotifyAction,
        woken: &mut bool,
    ) -> bool;
    /// Waits on the calling task's notification word.
    fn notify_wait(&self, clear_on_entry: u32, clear_on_exit: u32, ticks: Ticks) -> NotifyWait;

    fn queue_create(&self, spec: QueueSpec<'_>) -> Option<QueueHandle>;
    fn queue_delete(&self, queue: QueueHandle);
    fn queue_send(
        &self,
        queue: QueueHandle,
        item: &[u8],
        position: SendPosition,
        ticks: Ticks,
    ) -> bool;
    fn queue_send_from_isr(
        &self,
        queue: QueueHandle,
        item: &[u8],
        position: SendPosition,
        woken: &mut bool,
    ) -> bool;
    fn queue_receive(&self, queue: QueueHandle, out: &mut [u8], ticks: Ticks) -> bool;
    fn queue_receive_from_isr(&self, queue: QueueHandle, out: &mut [u8], woken: &mut bool) -> bool;
    fn queue_peek(&self, queue: QueueHandle, out: &mut [u8], ticks: Ticks) -> bool;
    fn queue_peek_from_isr(&self, queue: QueueHandle, out: &mut [u8]) -> bool;
    fn queue_len(&self, queue: QueueHandle) -> usize;

    fn mutex_create(&self) -> Option<MutexHandle>;
    fn mutex_take(&self, mutex: MutexHandle, ticks: Ticks) -> bool;
    fn mutex_give(&self, mutex: MutexHandle) -> bool;
    fn mutex_is_held(&self, mutex: MutexHandle) -> bool;
    fn mutex_delete(&self, mutex: MutexHandle);

    /// Milliseconds since the Unix epoch.
    fn system_time_ms(&self) -> u64;
    fn set_system_time_ms(&self, ms: u64);
}
