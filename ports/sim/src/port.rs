use std::num::NonZeroU32;
use std::sync::Arc;

use rtw::port::{
    MutexHandle, NotifyWait, Port, QueueHandle, QueueSpec, SchedulerState, SendPosition,
    TaskHandle, TaskSpawn,
};
use rtw::task::{task_name, Priority, TaskName};
use rtw::time::Ticks;
use rtw::NotifyAction;

use crate::config::SimConfig;
use crate::error::SimError;
use crate::kernel::{self, IsrGuard, Kernel, SimStats, TaskState};

/// A simulated kernel instance. Clones share the same kernel.
#[derive(Clone)]
pub struct SimPort {
    kernel: Arc<Kernel>,
}

impl Default for SimPort {
    fn default() -> Self {
        Self {
            kernel: Arc::new(Kernel::new(SimConfig::default())),
        }
    }
}

impl SimPort {
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        config.validate()?;
        Ok(Self {
            kernel: Arc::new(Kernel::new(config)),
        })
    }

    pub fn config(&self) -> &SimConfig {
        self.kernel.config()
    }

    /// Runs `isr` as an interrupt handler on the calling thread.
    ///
    /// A context switch requested by the handler happens after it returns.
    pub fn interrupt<R>(&self, isr: impl FnOnce() -> R) -> R {
        let guard = IsrGuard::enter();
        let result = isr();
        drop(guard);
        if !kernel::in_isr() {
            self.kernel.after_isr();
        }
        result
    }

    /// Current virtual tick.
    pub fn tick(&self) -> u64 {
        self.kernel.tick()
    }

    pub fn stats(&self) -> SimStats {
        self.kernel.stats()
    }

    pub fn task_state(&self, task: TaskHandle) -> Option<TaskState> {
        self.kernel.task_state(key(task.raw()))
    }
}

fn key(raw: NonZeroU32) -> usize {
    raw.get() as usize - 1
}

fn raw(key: usize) -> NonZeroU32 {
    NonZeroU32::MIN.saturating_add(key as u32)
}

impl Port for SimPort {
    fn in_isr(&self) -> bool {
        kernel::in_isr()
    }

    fn scheduler_state(&self) -> SchedulerState {
        self.kernel.scheduler_state()
    }

    fn start_scheduler(&self) {
        self.kernel.run();
    }

    fn end_scheduler(&self) {
        self.kernel.end();
    }

    fn yield_now(&self) {
        self.kernel.yield_now();
    }

    fn yield_from_isr(&self) {
        self.kernel.request_isr_yield();
    }

    fn delay(&self, ticks: Ticks) {
        self.kernel.delay(ticks);
    }

    fn tick_rate_hz(&self) -> u32 {
        self.kernel.config().tick_rate_hz
    }

    fn tick_count(&self) -> u64 {
        self.kernel.tick()
    }

    fn halt(&self) -> ! {
        self.kernel.halt()
    }

    fn task_create(&self, spawn: TaskSpawn<'_>) -> Option<TaskHandle> {
        let publish = spawn.publish;
        self.kernel
            .create(
                spawn.name,
                spawn.priority.level(),
                spawn.stack.size(),
                spawn.entry,
                |key| publish(TaskHandle::from_raw(raw(key))),
            )
            .map(|key| TaskHandle::from_raw(raw(key)))
    }

    fn task_delete(&self, task: TaskHandle) {
        self.kernel.delete(key(task.raw()));
    }

    fn task_suspend(&self, task: TaskHandle) {
        self.kernel.suspend(key(task.raw()));
    }

    fn task_suspend_from_isr(&self, task: TaskHandle) -> bool {
        self.kernel.suspend_from_isr(key(task.raw()))
    }

    fn task_resume(&self, task: TaskHandle) {
        self.kernel.resume(key(task.raw()));
    }

    fn task_resume_from_isr(&self, task: TaskHandle) -> bool {
        self.kernel.resume_from_isr(key(task.raw()))
    }

    fn task_priority(&self, task: TaskHandle) -> Priority {
        Priority::new(self.kernel.priority(key(task.raw())).unwrap_or(0))
    }

    fn task_set_priority(&self, task: TaskHandle, priority: Priority) {
        self.kernel.set_priority(key(task.raw()), priority.level());
    }

    fn task_name(&self, task: TaskHandle) -> TaskName {
        self.kernel
            .name(key(task.raw()))
            .unwrap_or_else(|| task_name(""))
    }

    fn current_task(&self) -> Option<TaskHandle> {
        self.kernel
            .current()
            .map(|key| TaskHandle::from_raw(raw(key)))
    }

    fn notify(&self, task: TaskHandle, value: u32, action: NotifyAction) -> bool {
        self.kernel.notify(key(task.raw()), value, action)
    }

    fn notify_from_isr(
        &self,
        task: TaskHandle,
        value: u32,
        action: NotifyAction,
        woken: &mut bool,
    ) -> bool {
        self.kernel
            .notify_from_isr(key(task.raw()), value, action, woken)
    }

    fn notify_wait(&self, clear_on_entry: u32, clear_on_exit: u32, ticks: Ticks) -> NotifyWait {
        self.kernel.notify_wait(clear_on_entry, clear_on_exit, ticks)
    }

    fn queue_create(&self, spec: QueueSpec<'_>) -> Option<QueueHandle> {
        let needed = spec.capacity.checked_mul(spec.item_size)?;
        if spec.capacity == 0 || spec.item_size == 0 || spec.storage.size() < needed {
            log::warn!(
                "sim: queue of {} x {} bytes refused with {} bytes of storage",
                spec.capacity,
                spec.item_size,
                spec.storage.size()
            );
            return None;
        }
        let queue = self.kernel.queue_create(spec.capacity, spec.item_size);
        Some(QueueHandle::from_raw(raw(queue)))
    }

    fn queue_delete(&self, queue: QueueHandle) {
        self.kernel.queue_delete(key(queue.raw()));
    }

    fn queue_send(
        &self,
        queue: QueueHandle,
        item: &[u8],
        position: SendPosition,
        ticks: Ticks,
    ) -> bool {
        self.kernel
            .queue_send(key(queue.raw()), item, position, ticks)
    }

    fn queue_send_from_isr(
        &self,
        queue: QueueHandle,
        item: &[u8],
        position: SendPosition,
        woken: &mut bool,
    ) -> bool {
        self.kernel
            .queue_send_from_isr(key(queue.raw()), item, position, woken)
    }

    fn queue_receive(&self, queue: QueueHandle, out: &mut [u8], ticks: Ticks) -> bool {
        self.kernel.queue_receive(key(queue.raw()), out, ticks, true)
    }

    fn queue_receive_from_isr(&self, queue: QueueHandle, out: &mut [u8], woken: &mut bool) -> bool {
        self.kernel
            .queue_receive_from_isr(key(queue.raw()), out, woken)
    }

    fn queue_peek(&self, queue: QueueHandle, out: &mut [u8], ticks: Ticks) -> bool {
        self.kernel.queue_receive(key(queue.raw()), out, ticks, false)
    }

    fn queue_peek_from_isr(&self, queue: QueueHandle, out: &mut [u8]) -> bool {
        self.kernel.queue_peek_from_isr(key(queue.raw()), out)
    }

    fn queue_len(&self, queue: QueueHandle) -> usize {
        self.kernel.queue_len(key(queue.raw()))
    }

    fn mutex_create(&self) -> Option<MutexHandle> {
        Some(MutexHandle::from_raw(raw(self.kernel.mutex_create())))
    }

    fn mutex_take(&self, mutex: MutexHandle, ticks: Ticks) -> bool {
        self.kernel.mutex_take(key(mutex.raw()), ticks)
    }

    fn mutex_give(&self, mutex: MutexHandle) -> bool {
        self.kernel.mutex_give(key(mutex.raw()))
    }

    fn mutex_is_held(&self, mutex: MutexHandle) -> bool {
        self.kernel.mutex_is_held(key(mutex.raw()))
    }

    fn mutex_delete(&self, mutex: MutexHandle) {
        self.kernel.mutex_delete(key(mutex.raw()));
    }

    fn system_time_ms(&self) -> u64 {
        self.kernel.system_time_ms()
    }

    fn set_system_time_ms(&self, ms: u64) {
        self.kernel.set_system_time_ms(ms);
    }
}
