//! Task objects with an explicit lifecycle.
//!
//! A [`Thread`] reserves its control block and stack from the arena when it
//! is constructed, registers with the kernel on [`Lifecycle::join`], and runs
//! its [`Runnable`] body through a trampoline. The body must never return;
//! if it does, the task is marked `Completed` and halted.
//!
//! ```text
//! NotStarted --join--> Started <--suspend/resume--> Suspended
//!     |                   |
//!     |                   +--run() returned--> Completed
//!     +--kernel refused--> CreationFailed
//! (construction) --arena exhausted--> MemoryAllocationFailed
//! ```

use alloc::boxed::Box;
use core::fmt;
use core::time::Duration;

use crate::arena::Region;
use crate::context;
use crate::error::TaskError;
use crate::ids::TaskId;
use crate::port::{Port, TaskEntry, TaskHandle, TaskSpawn};
use crate::sync::{Arc, Mutex};
use crate::system::Rtos;
use crate::time::Ticks;
use crate::trace;

pub const MAX_TASK_NAME_LEN: usize = 16;

/// Bounded task name; longer names are truncated.
pub type TaskName = heapless::String<MAX_TASK_NAME_LEN>;

/// Builds a [`TaskName`], cutting `name` at the last character that fits.
pub fn task_name(name: &str) -> TaskName {
    let mut out = TaskName::new();
    for ch in name.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

/// Task priority; higher values are more urgent. Level 0 belongs to the
/// kernel's idle task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Priority(u8);

impl Priority {
    pub const IDLE: Priority = Priority(0);

    pub const fn new(level: u8) -> Self {
        Self(level)
    }

    pub const fn level(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskStatus {
    NotStarted,
    Started,
    Suspended,
    Completed,
    MemoryAllocationFailed,
    CreationFailed,
}

/// Construction parameters of a [`Thread`].
#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub name: TaskName,
    pub priority: Priority,
    /// Bytes reserved for the task's call stack.
    pub stack_size: usize,
    /// Explicit identity; the registry's counter value is used otherwise.
    pub id: Option<TaskId>,
}

impl TaskConfig {
    pub fn new(name: &str, priority: Priority, stack_size: usize) -> Self {
        Self {
            name: task_name(name),
            priority,
            stack_size,
            id: None,
        }
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }
}

/// The body of a task.
pub trait Runnable<P: Port>: Send + 'static {
    /// Task main loop. Must not return.
    fn run(&mut self, ctx: &TaskContext<P>);

    /// Called when a task object that was never joined is dropped.
    fn thread_delete(&mut self) {}
}

impl<P, F> Runnable<P> for F
where
    P: Port,
    F: FnMut(&TaskContext<P>) + Send + 'static,
{
    fn run(&mut self, ctx: &TaskContext<P>) {
        self(ctx)
    }
}

/// Lifecycle operations of a task, independent of its signalling surface.
pub trait Lifecycle: Send + Sync {
    /// Registers the task with the kernel and starts the scheduler if needed.
    fn join(&self) -> Result<(), TaskError>;
    fn suspend(&self) -> Result<(), TaskError>;
    fn resume(&self) -> Result<(), TaskError>;
    fn status(&self) -> TaskStatus;
    fn id(&self) -> TaskId;
    fn name(&self) -> TaskName;
    fn priority(&self) -> Priority;
    fn set_priority(&self, priority: Priority);
    /// Whether construction reserved everything the task needs.
    fn is_created(&self) -> bool;
}

/// State shared between a [`Thread`] and its running body.
pub(crate) struct ThreadShared {
    status: Mutex<TaskStatus>,
    handle: Mutex<Option<TaskHandle>>,
}

impl ThreadShared {
    fn new(status: TaskStatus) -> Self {
        Self {
            status: Mutex::new(status),
            handle: Mutex::new(None),
        }
    }

    pub(crate) fn status(&self) -> TaskStatus {
        *self.status.lock()
    }

    pub(crate) fn set_status(&self, status: TaskStatus) {
        *self.status.lock() = status;
    }

    fn transition(&self, from: TaskStatus, to: TaskStatus) -> Result<(), TaskStatus> {
        let mut status = self.status.lock();
        if *status == from {
            *status = to;
            Ok(())
        } else {
            Err(*status)
        }
    }

    pub(crate) fn handle(&self) -> Option<TaskHandle> {
        *self.handle.lock()
    }
}

struct TaskRegions {
    control_block: Region,
    stack: Region,
}

/// A kernel task driven by a [`Runnable`] body.
///
/// All operations take `&self`, so a thread can be shared through an `Arc`
/// with the tasks that signal, suspend or resume it.
pub struct Thread<P: Port> {
    rtos: Arc<Rtos<P>>,
    id: TaskId,
    name: TaskName,
    stack_size: usize,
    priority: Mutex<Priority>,
    shared: Arc<ThreadShared>,
    regions: Option<TaskRegions>,
    body: Mutex<Option<Box<dyn Runnable<P>>>>,
}

impl<P: Port> Thread<P> {
    /// Constructs a task, reserving its control block and stack.
    ///
    /// Construction never fails outright: when the arena is exhausted the
    /// returned object reports [`TaskStatus::MemoryAllocationFailed`] and
    /// every operation on it is refused.
    pub fn new(rtos: &Arc<Rtos<P>>, config: TaskConfig, body: impl Runnable<P>) -> Self {
        let arena = rtos.arena();
        let regions = match arena.acquire_control_block() {
            Ok(control_block) => match arena.acquire_stack(config.stack_size) {
                Ok(stack) => Some(TaskRegions {
                    control_block,
                    stack,
                }),
                Err(err) => {
                    arena.release(control_block);
                    rtos.trace(trace::ARENA_EXHAUSTED, &(err.requested as u32).to_le_bytes());
                    None
                }
            },
            Err(err) => {
                rtos.trace(trace::ARENA_EXHAUSTED, &(err.requested as u32).to_le_bytes());
                None
            }
        };

        let (id, status) = if regions.is_some() {
            (rtos.ids().issue(config.id), TaskStatus::NotStarted)
        } else {
            log::warn!(
                "task '{}': no memory for a {} byte stack",
                config.name,
                config.stack_size
            );
            (
                config.id.unwrap_or(TaskId::UNASSIGNED),
                TaskStatus::MemoryAllocationFailed,
            )
        };
        log::debug!(
            "task '{}' {} constructed at priority {}",
            config.name,
            id,
            config.priority
        );

        let body: Box<dyn Runnable<P>> = Box::new(body);
        Self {
            rtos: Arc::clone(rtos),
            id,
            name: config.name,
            stack_size: config.stack_size,
            priority: Mutex::new(config.priority),
            shared: Arc::new(ThreadShared::new(status)),
            regions,
            body: Mutex::new(Some(body)),
        }
    }

    /// Constructs a task whose body is the closure `f`.
    pub fn from_fn<F>(rtos: &Arc<Rtos<P>>, config: TaskConfig, f: F) -> Self
    where
        F: FnMut(&TaskContext<P>) + Send + 'static,
    {
        Self::new(rtos, config, f)
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// Kernel handle, available once the task has been joined.
    pub fn handle(&self) -> Option<TaskHandle> {
        self.shared.handle()
    }

    pub fn rtos(&self) -> &Arc<Rtos<P>> {
        &self.rtos
    }

    fn trace_id(&self, record: u8) {
        self.rtos.trace(record, &self.id.raw().to_le_bytes());
    }
}

impl<P: Port> Lifecycle for Thread<P> {
    fn join(&self) -> Result<(), TaskError> {
        let regions = match &self.regions {
            Some(regions) => regions,
            None => return Err(TaskError::MemoryAllocationFailed),
        };
        self.shared
            .transition(TaskStatus::NotStarted, TaskStatus::Started)
            .map_err(TaskError::NotJoinable)?;

        let body = match self.body.lock().take() {
            Some(body) => body,
            None => {
                self.shared.set_status(TaskStatus::CreationFailed);
                return Err(TaskError::CreationFailed);
            }
        };
        let ctx = TaskContext {
            rtos: Arc::clone(&self.rtos),
            shared: Arc::clone(&self.shared),
            id: self.id,
            name: self.name.clone(),
        };
        let entry: TaskEntry = Box::new(move || {
            trampoline(ctx, body);
        });

        let priority = *self.priority.lock();
        let publish = |handle: TaskHandle| *self.shared.handle.lock() = Some(handle);
        let spawned = self.rtos.port().task_create(TaskSpawn {
            name: &self.name,
            priority,
            stack: &regions.stack,
            control_block: &regions.control_block,
            entry,
            publish: &publish,
        });

        if spawned.is_none() {
            self.shared.set_status(TaskStatus::CreationFailed);
            log::warn!("task '{}' {}: kernel refused creation", self.name, self.id);
            return Err(TaskError::CreationFailed);
        }

        let mut payload = [0u8; 3];
        payload[..2].copy_from_slice(&self.id.raw().to_le_bytes());
        payload[2] = priority.level();
        self.rtos.trace(trace::TASK_CREATE, &payload);
        log::debug!("task '{}' {} joined", self.name, self.id);

        if !self.rtos.is_scheduler_running() {
            self.rtos.start_scheduler();
        }
        Ok(())
    }

    fn suspend(&self) -> Result<(), TaskError> {
        let status = self.status();
        match status {
            TaskStatus::Started => {}
            TaskStatus::Suspended => return Ok(()),
            other => return Err(TaskError::InvalidState(other)),
        }
        let handle = self.handle().ok_or(TaskError::InvalidState(status))?;

        self.shared.set_status(TaskStatus::Suspended);
        self.trace_id(trace::TASK_SUSPEND);
        let port = self.rtos.port();
        context::dispatch(
            port,
            Duration::ZERO,
            handle,
            |handle, _| port.task_suspend(handle),
            |handle, woken| *woken = port.task_suspend_from_isr(handle),
            (),
        );
        Ok(())
    }

    fn resume(&self) -> Result<(), TaskError> {
        let status = self.status();
        match status {
            TaskStatus::Completed => return Ok(()),
            TaskStatus::Started | TaskStatus::Suspended => {}
            other => return Err(TaskError::InvalidState(other)),
        }
        let handle = self.handle().ok_or(TaskError::InvalidState(status))?;

        self.shared.set_status(TaskStatus::Started);
        self.trace_id(trace::TASK_RESUME);
        let port = self.rtos.port();
        context::dispatch(
            port,
            Duration::ZERO,
            handle,
            |handle, _| port.task_resume(handle),
            |handle, woken| *woken = port.task_resume_from_isr(handle),
            (),
        );
        Ok(())
    }

    fn status(&self) -> TaskStatus {
        self.shared.status()
    }

    fn id(&self) -> TaskId {
        self.id
    }

    fn name(&self) -> TaskName {
        self.name.clone()
    }

    fn priority(&self) -> Priority {
        match self.handle() {
            Some(handle) => self.rtos.port().task_priority(handle),
            None => *self.priority.lock(),
        }
    }

    fn set_priority(&self, priority: Priority) {
        *self.priority.lock() = priority;
        if let Some(handle) = self.handle() {
            self.rtos.port().task_set_priority(handle, priority);
        }
    }

    fn is_created(&self) -> bool {
        self.regions.is_some()
    }
}

impl<P: Port> Drop for Thread<P> {
    fn drop(&mut self) {
        let body = self.body.lock().take();
        if let Some(mut body) = body {
            body.thread_delete();
        }

        let handle = self.shared.handle.lock().take();
        let deleting_self = handle.is_some() && self.rtos.port().current_task() == handle;

        // A task deleting itself does not come back from `task_delete`.
        if deleting_self {
            self.release_regions();
        }
        if let Some(handle) = handle {
            if self.rtos.is_scheduler_running() {
                self.trace_id(trace::TASK_DELETE);
                log::debug!("task '{}' {} deleted", self.name, self.id);
                self.rtos.port().task_delete(handle);
            }
        }
        self.release_regions();
    }
}

impl<P: Port> Thread<P> {
    fn release_regions(&mut self) {
        if let Some(regions) = self.regions.take() {
            let arena = self.rtos.arena();
            arena.release(regions.control_block);
            arena.release(regions.stack);
        }
    }
}

impl<P: Port> fmt::Debug for Thread<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status())
            .field("handle", &self.handle())
            .finish()
    }
}

fn trampoline<P: Port>(ctx: TaskContext<P>, mut body: Box<dyn Runnable<P>>) {
    log::debug!("task '{}' {} running", ctx.name, ctx.id);
    body.run(&ctx);

    ctx.shared.set_status(TaskStatus::Completed);
    log::error!(
        "task '{}' {} returned from its run loop; halting it",
        ctx.name,
        ctx.id
    );
    ctx.rtos.port().halt();
}

/// The running task's view of itself, passed to [`Runnable::run`].
pub struct TaskContext<P: Port> {
    pub(crate) rtos: Arc<Rtos<P>>,
    pub(crate) shared: Arc<ThreadShared>,
    id: TaskId,
    name: TaskName,
}

impl<P: Port> TaskContext<P> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> TaskStatus {
        self.shared.status()
    }

    pub fn priority(&self) -> Priority {
        match self.shared.handle().or_else(|| self.rtos.port().current_task()) {
            Some(handle) => self.rtos.port().task_priority(handle),
            None => Priority::IDLE,
        }
    }

    pub fn rtos(&self) -> &Arc<Rtos<P>> {
        &self.rtos
    }

    pub fn port(&self) -> &P {
        self.rtos.port()
    }

    /// Blocks for `duration`, truncated to whole ticks.
    pub fn delay(&self, duration: Duration) {
        self.rtos.delay(duration);
    }

    pub fn delay_ticks(&self, ticks: Ticks) {
        self.rtos.port().delay(ticks);
    }

    pub fn yield_now(&self) {
        self.rtos.yield_now();
    }

    /// Suspends the calling task until another context resumes it.
    pub fn suspend_self(&self) {
        let port = self.rtos.port();
        if let Some(handle) = port.current_task() {
            self.shared.set_status(TaskStatus::Suspended);
            port.task_suspend(handle);
        }
    }

    pub fn end_scheduler(&self) {
        self.rtos.end_scheduler();
    }
}
