//! Scheduling core of the simulation.
//!
//! Every task is a host thread, but only the task recorded as `current`
//! ever executes; all others sit in [`Kernel::wait_turn`] on the shared
//! condition variable. A context switch is therefore a change of `current`
//! followed by `notify_all`. Time is virtual: it advances only when no
//! task can run, jumping straight to the earliest pending timeout.
//!
//! Stopping the scheduler marks every task as killed. A killed task thread
//! unwinds with a private sentinel payload the next time it reaches a
//! scheduling point, so its stack is dropped normally.

use std::any::Any;
use std::cell::Cell;
use std::cmp::Reverse;
use std::collections::VecDeque;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex, MutexGuard};
use rtw::port::{NotifyWait, SchedulerState, SendPosition, TaskEntry};
use rtw::task::{task_name, TaskName};
use rtw::time::{Ticks, MAX_DELAY};
use rtw::NotifyAction;

use crate::config::SimConfig;
use crate::error::SimError;
use crate::queue::Ring;

/// Highest priority level the simulation schedules.
pub const MAX_PRIORITY: u8 = 63;

static NEXT_KERNEL_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// `(kernel id, task key)` of the task owning this host thread.
    static CURRENT: Cell<Option<(u64, usize)>> = const { Cell::new(None) };
    static ISR_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Unwind payload that tears a task thread down.
struct Teardown;

pub(crate) fn in_isr() -> bool {
    ISR_DEPTH.with(|depth| depth.get() > 0)
}

/// Marks the calling thread as running an interrupt handler while alive.
pub(crate) struct IsrGuard;

impl IsrGuard {
    pub(crate) fn enter() -> Self {
        ISR_DEPTH.with(|depth| depth.set(depth.get() + 1));
        IsrGuard
    }
}

impl Drop for IsrGuard {
    fn drop(&mut self) {
        ISR_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Scheduling state of a simulated task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Blocked,
    Suspended,
    /// Stopped for good; still counts against the task limit.
    Halted,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitOn {
    Delay,
    Notify,
    Send(usize),
    Receive(usize),
    Mutex(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NotifyState {
    Idle,
    Waiting,
    Received,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Holder {
    Task(usize),
    Host,
}

struct Task {
    name: TaskName,
    priority: u8,
    state: TaskState,
    wait: Option<WaitOn>,
    deadline: Option<u64>,
    blocked_seq: u64,
    value: u32,
    notify: NotifyState,
    killed: bool,
}

/// Counters collected while the simulation runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub context_switches: u64,
    pub created: u64,
    pub deleted: u64,
    pub halted: u64,
    /// Interrupts that ended with a requested context switch.
    pub isr_yields: u64,
}

/// Bitmap of priority levels holding at least one ready task.
#[derive(Debug, Clone, Copy, Default)]
struct ReadyLevels {
    bits: u64,
}

impl ReadyLevels {
    fn insert(&mut self, level: u8) {
        self.bits |= 1u64 << level;
    }

    fn remove(&mut self, level: u8) {
        self.bits &= !(1u64 << level);
    }

    fn highest(&self) -> Option<u8> {
        if self.bits == 0 {
            None
        } else {
            Some((63 - self.bits.leading_zeros()) as u8)
        }
    }
}

struct State {
    scheduler: SchedulerState,
    tick: u64,
    current: Option<usize>,
    tasks: Vec<Task>,
    ready: Vec<VecDeque<usize>>,
    levels: ReadyLevels,
    queues: Vec<Option<Ring>>,
    mutexes: Vec<Option<Option<Holder>>>,
    seq: u64,
    live_threads: usize,
    isr_yield: bool,
    wall_base_ms: u64,
    wall_base_tick: u64,
    fault: Option<Box<dyn Any + Send>>,
    stats: SimStats,
}

impl State {
    fn new(epoch_ms: u64) -> Self {
        Self {
            scheduler: SchedulerState::NotStarted,
            tick: 0,
            current: None,
            tasks: Vec::new(),
            ready: (0..=MAX_PRIORITY).map(|_| VecDeque::new()).collect(),
            levels: ReadyLevels::default(),
            queues: Vec::new(),
            mutexes: Vec::new(),
            seq: 0,
            live_threads: 0,
            isr_yield: false,
            wall_base_ms: epoch_ms,
            wall_base_tick: 0,
            fault: None,
            stats: SimStats::default(),
        }
    }

    fn live(&self, key: usize) -> bool {
        self.tasks
            .get(key)
            .is_some_and(|task| task.state != TaskState::Deleted)
    }

    fn push_ready(&mut self, key: usize, front: bool) {
        let task = &mut self.tasks[key];
        task.state = TaskState::Ready;
        task.wait = None;
        task.deadline = None;
        let level = task.priority;
        let list = &mut self.ready[usize::from(level)];
        if front {
            list.push_front(key);
        } else {
            list.push_back(key);
        }
        self.levels.insert(level);
    }

    fn unready(&mut self, key: usize) {
        if self.tasks[key].state != TaskState::Ready {
            return;
        }
        let level = self.tasks[key].priority;
        let list = &mut self.ready[usize::from(level)];
        list.retain(|&queued| queued != key);
        if list.is_empty() {
            self.levels.remove(level);
        }
    }

    fn peek_ready(&self) -> Option<usize> {
        let level = self.levels.highest()?;
        self.ready[usize::from(level)].front().copied()
    }

    fn pop_ready(&mut self) -> Option<usize> {
        let level = self.levels.highest()?;
        let list = &mut self.ready[usize::from(level)];
        let key = list.pop_front();
        if list.is_empty() {
            self.levels.remove(level);
        }
        key
    }

    /// Readies every task blocked on `on`, highest priority and longest
    /// waiting first. Returns the highest priority woken.
    fn wake(&mut self, on: WaitOn) -> Option<u8> {
        let mut waiters: Vec<usize> = (0..self.tasks.len())
            .filter(|&key| {
                let task = &self.tasks[key];
                task.state == TaskState::Blocked && task.wait == Some(on)
            })
            .collect();
        waiters.sort_by_key(|&key| (Reverse(self.tasks[key].priority), self.tasks[key].blocked_seq));
        let top = waiters.first().map(|&key| self.tasks[key].priority);
        for key in waiters {
            self.push_ready(key, false);
        }
        top
    }

    fn expire(&mut self) {
        let tick = self.tick;
        let mut expired: Vec<usize> = (0..self.tasks.len())
            .filter(|&key| {
                let task = &self.tasks[key];
                task.state == TaskState::Blocked && task.deadline.is_some_and(|at| at <= tick)
            })
            .collect();
        expired.sort_by_key(|&key| (Reverse(self.tasks[key].priority), self.tasks[key].blocked_seq));
        for key in expired {
            self.push_ready(key, false);
        }
    }

    fn next_deadline(&self) -> Option<u64> {
        self.tasks
            .iter()
            .filter(|task| task.state == TaskState::Blocked)
            .filter_map(|task| task.deadline)
            .min()
    }

    fn deadline(&self, ticks: Ticks) -> Option<u64> {
        if ticks == MAX_DELAY {
            None
        } else {
            Some(self.tick + u64::from(ticks))
        }
    }

    fn expired(&self, deadline: Option<u64>) -> bool {
        deadline.is_some_and(|at| self.tick >= at)
    }

    fn running_priority(&self) -> Option<u8> {
        self.current.map(|key| self.tasks[key].priority)
    }

    /// Whether a task at `level` should preempt the running one.
    fn outranks_running(&self, level: Option<u8>) -> bool {
        match (level, self.running_priority()) {
            (Some(level), Some(running)) => level > running,
            (Some(_), None) => self.scheduler == SchedulerState::Running,
            (None, _) => false,
        }
    }
}

pub(crate) struct Kernel {
    id: u64,
    config: SimConfig,
    state: Mutex<State>,
    cond: Condvar,
}

impl Kernel {
    pub(crate) fn new(config: SimConfig) -> Self {
        let state = State::new(config.epoch_ms);
        Self {
            id: NEXT_KERNEL_ID.fetch_add(1, Ordering::Relaxed),
            config,
            state: Mutex::new(state),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Key of the task owning the calling host thread, if any.
    fn caller(&self) -> Option<usize> {
        CURRENT.with(|current| match current.get() {
            Some((kernel, key)) if kernel == self.id => Some(key),
            _ => None,
        })
    }

    /// The calling task when it may block: task context, not an interrupt.
    fn blocking_caller(&self, st: &State) -> Option<usize> {
        if in_isr() {
            return None;
        }
        self.caller().filter(|&key| st.current == Some(key))
    }

    fn switch_context(&self, st: &mut State) {
        st.current = st.pop_ready();
        if let Some(next) = st.current {
            st.tasks[next].state = TaskState::Running;
            st.stats.context_switches += 1;
            log::trace!("sim: tick {} -> '{}'", st.tick, st.tasks[next].name);
        }
        self.cond.notify_all();
    }

    /// Parks the calling task thread until it is `current` again.
    ///
    /// A killed task unwinds from here; if it is already unwinding it gets
    /// `false` back instead.
    fn wait_turn(&self, st: &mut MutexGuard<'_, State>, me: usize) -> bool {
        loop {
            if st.tasks[me].killed {
                if thread::panicking() {
                    return false;
                }
                panic::resume_unwind(Box::new(Teardown));
            }
            if st.current == Some(me) {
                return true;
            }
            self.cond.wait(st);
        }
    }

    fn relinquish(&self, st: &mut MutexGuard<'_, State>, me: usize) -> bool {
        self.switch_context(st);
        self.wait_turn(st, me)
    }

    /// Switches away from the calling task if a higher-priority one is ready.
    fn preempt(&self, st: &mut MutexGuard<'_, State>) {
        if st.scheduler != SchedulerState::Running {
            return;
        }
        let Some(me) = self.blocking_caller(st) else {
            return;
        };
        let outranked = st
            .peek_ready()
            .is_some_and(|next| st.tasks[next].priority > st.tasks[me].priority);
        if outranked {
            st.push_ready(me, true);
            self.relinquish(st, me);
        }
    }

    fn block(
        &self,
        st: &mut MutexGuard<'_, State>,
        me: usize,
        on: WaitOn,
        deadline: Option<u64>,
    ) -> bool {
        if st.tasks[me].killed {
            return self.wait_turn(st, me);
        }
        st.seq += 1;
        let seq = st.seq;
        let task = &mut st.tasks[me];
        task.state = TaskState::Blocked;
        task.wait = Some(on);
        task.deadline = deadline;
        task.blocked_seq = seq;
        self.relinquish(st, me)
    }

    fn stop(&self, st: &mut State) {
        st.scheduler = SchedulerState::Stopped;
        st.current = None;
        for task in &mut st.tasks {
            task.killed = true;
        }
        self.cond.notify_all();
    }

    // Scheduler

    pub(crate) fn scheduler_state(&self) -> SchedulerState {
        self.state.lock().scheduler
    }

    /// Idle loop of the simulation; returns once every task thread is gone.
    pub(crate) fn run(&self) {
        if self.caller().is_some() {
            log::warn!("sim: the scheduler can only be started from outside a task");
            return;
        }
        let mut st = self.state.lock();
        if st.scheduler != SchedulerState::NotStarted {
            return;
        }
        st.scheduler = SchedulerState::Running;
        log::debug!("sim: scheduler running with {} task(s)", st.tasks.len());

        while st.scheduler == SchedulerState::Running {
            if st.current.is_none() {
                if st.peek_ready().is_some() {
                    self.switch_context(&mut st);
                    continue;
                }
                match st.next_deadline() {
                    Some(at) => {
                        st.tick = st.tick.max(at);
                        st.expire();
                        continue;
                    }
                    None => {
                        log::info!(
                            "sim: nothing runnable and no timeout pending at tick {}; stopping",
                            st.tick
                        );
                        self.stop(&mut st);
                        break;
                    }
                }
            }
            self.cond.wait(&mut st);
        }

        while st.live_threads > 0 {
            self.cond.wait(&mut st);
        }
        let fault = st.fault.take();
        drop(st);
        if let Some(payload) = fault {
            panic::resume_unwind(payload);
        }
    }

    pub(crate) fn end(&self) {
        let mut st = self.state.lock();
        if st.scheduler != SchedulerState::Stopped {
            log::info!("sim: scheduler ended at tick {}", st.tick);
            self.stop(&mut st);
        }
        if in_isr() {
            return;
        }
        if let Some(me) = self.caller() {
            self.wait_turn(&mut st, me);
        }
    }

    pub(crate) fn tick(&self) -> u64 {
        self.state.lock().tick
    }

    pub(crate) fn stats(&self) -> SimStats {
        self.state.lock().stats
    }

    pub(crate) fn yield_now(&self) {
        let mut st = self.state.lock();
        if let Some(me) = self.blocking_caller(&st) {
            st.push_ready(me, false);
            self.relinquish(&mut st, me);
        }
    }

    pub(crate) fn request_isr_yield(&self) {
        if in_isr() {
            self.state.lock().isr_yield = true;
        }
    }

    /// Runs on the interrupted thread once the outermost handler returns.
    pub(crate) fn after_isr(&self) {
        let mut st = self.state.lock();
        let requested = mem::take(&mut st.isr_yield);
        let Some(me) = self.caller() else {
            return;
        };
        if st.current != Some(me) {
            return;
        }
        if requested {
            st.stats.isr_yields += 1;
        }
        if st.tasks[me].state != TaskState::Running {
            self.relinquish(&mut st, me);
        } else if requested {
            self.preempt(&mut st);
        }
    }

    pub(crate) fn delay(&self, ticks: Ticks) {
        if ticks == 0 {
            self.yield_now();
            return;
        }
        let mut st = self.state.lock();
        let Some(me) = self.blocking_caller(&st) else {
            log::warn!("sim: delay outside a running task ignored");
            return;
        };
        let deadline = st.deadline(ticks);
        while !st.expired(deadline) {
            if !self.block(&mut st, me, WaitOn::Delay, deadline) {
                return;
            }
        }
    }

    pub(crate) fn halt(&self) -> ! {
        let mut st = self.state.lock();
        let Some(me) = self.caller() else {
            drop(st);
            panic!("halt requested outside a simulated task");
        };
        log::error!("sim: task '{}' halted at tick {}", st.tasks[me].name, st.tick);
        st.unready(me);
        st.tasks[me].state = TaskState::Halted;
        st.stats.halted += 1;
        if st.current == Some(me) {
            self.switch_context(&mut st);
        }
        loop {
            if st.tasks[me].killed {
                drop(st);
                panic::resume_unwind(Box::new(Teardown));
            }
            self.cond.wait(&mut st);
        }
    }

    // Tasks

    pub(crate) fn create(
        self: &Arc<Self>,
        name: &str,
        priority: u8,
        stack_size: usize,
        entry: TaskEntry,
        publish: impl FnOnce(usize),
    ) -> Option<usize> {
        if priority == 0 || priority > MAX_PRIORITY {
            log::warn!("sim: task '{name}' refused: priority {priority} outside 1..={MAX_PRIORITY}");
            return None;
        }
        if stack_size < self.config.min_stack_size {
            log::warn!(
                "sim: task '{name}' refused: stack of {stack_size} bytes is below {}",
                self.config.min_stack_size
            );
            return None;
        }

        let mut st = self.state.lock();
        if st.scheduler == SchedulerState::Stopped {
            log::warn!("sim: task '{name}' refused: scheduler stopped");
            return None;
        }
        let existing = st
            .tasks
            .iter()
            .filter(|task| task.state != TaskState::Deleted)
            .count();
        if existing >= self.config.max_tasks {
            log::warn!("sim: task '{name}' refused: {existing} tasks already exist");
            return None;
        }

        let key = st.tasks.len();
        st.tasks.push(Task {
            name: task_name(name),
            priority,
            state: TaskState::Suspended,
            wait: None,
            deadline: None,
            blocked_seq: 0,
            value: 0,
            notify: NotifyState::Idle,
            killed: false,
        });

        let kernel = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("sim-{name}"))
            .stack_size(self.config.host_stack_size)
            .spawn(move || task_main(kernel, key, entry))
            .map_err(SimError::from);
        if let Err(err) = spawned {
            log::error!("sim: task '{name}' refused: {err}");
            st.tasks[key].state = TaskState::Deleted;
            return None;
        }

        // The handle is visible before the task can be scheduled.
        publish(key);
        st.live_threads += 1;
        st.stats.created += 1;
        st.push_ready(key, false);
        log::debug!("sim: task '{name}' created at priority {priority}");
        self.preempt(&mut st);
        Some(key)
    }

    pub(crate) fn delete(&self, key: usize) {
        let mut st = self.state.lock();
        if !st.live(key) {
            return;
        }
        st.unready(key);
        let task = &mut st.tasks[key];
        task.state = TaskState::Deleted;
        task.killed = true;
        task.wait = None;
        task.deadline = None;
        st.stats.deleted += 1;
        log::debug!("sim: task '{}' deleted", st.tasks[key].name);

        if st.current == Some(key) {
            if in_isr() {
                st.isr_yield = true;
            } else if self.caller() == Some(key) {
                self.relinquish(&mut st, key);
                return;
            }
        }
        self.cond.notify_all();
    }

    /// Returns whether the target was the running task.
    fn suspend_locked(&self, st: &mut State, key: usize) -> bool {
        if !st.live(key) {
            return false;
        }
        match st.tasks[key].state {
            TaskState::Running => {
                st.tasks[key].state = TaskState::Suspended;
                true
            }
            TaskState::Ready => {
                st.unready(key);
                st.tasks[key].state = TaskState::Suspended;
                false
            }
            TaskState::Blocked => {
                let task = &mut st.tasks[key];
                task.state = TaskState::Suspended;
                task.wait = None;
                task.deadline = None;
                false
            }
            TaskState::Suspended | TaskState::Halted | TaskState::Deleted => false,
        }
    }

    pub(crate) fn suspend(&self, key: usize) {
        let mut st = self.state.lock();
        if self.suspend_locked(&mut st, key) && self.blocking_caller(&st) == Some(key) {
            self.relinquish(&mut st, key);
        }
    }

    pub(crate) fn suspend_from_isr(&self, key: usize) -> bool {
        let mut st = self.state.lock();
        self.suspend_locked(&mut st, key)
    }

    /// Returns the priority of the task made ready, if any.
    fn resume_locked(&self, st: &mut State, key: usize) -> Option<u8> {
        if !st.live(key) || st.tasks[key].state != TaskState::Suspended {
            return None;
        }
        st.push_ready(key, false);
        Some(st.tasks[key].priority)
    }

    pub(crate) fn resume(&self, key: usize) {
        let mut st = self.state.lock();
        if self.resume_locked(&mut st, key).is_some() {
            self.cond.notify_all();
            self.preempt(&mut st);
        }
    }

    pub(crate) fn resume_from_isr(&self, key: usize) -> bool {
        let mut st = self.state.lock();
        let level = self.resume_locked(&mut st, key);
        st.outranks_running(level)
    }

    pub(crate) fn priority(&self, key: usize) -> Option<u8> {
        self.state.lock().tasks.get(key).map(|task| task.priority)
    }

    pub(crate) fn set_priority(&self, key: usize, priority: u8) {
        let priority = priority.clamp(1, MAX_PRIORITY);
        let mut st = self.state.lock();
        if !st.live(key) {
            return;
        }
        if st.tasks[key].state == TaskState::Ready {
            st.unready(key);
            st.tasks[key].priority = priority;
            st.push_ready(key, false);
        } else {
            st.tasks[key].priority = priority;
        }
        self.preempt(&mut st);
    }

    pub(crate) fn name(&self, key: usize) -> Option<TaskName> {
        self.state.lock().tasks.get(key).map(|task| task.name.clone())
    }

    pub(crate) fn current(&self) -> Option<usize> {
        let st = self.state.lock();
        self.caller().filter(|&key| st.live(key))
    }

    pub(crate) fn task_state(&self, key: usize) -> Option<TaskState> {
        self.state.lock().tasks.get(key).map(|task| task.state)
    }

    // Notifications

    fn notify_locked(&self, st: &mut State, key: usize, value: u32, action: NotifyAction) -> Option<Option<u8>> {
        if !st.live(key) {
            return None;
        }
        let task = &mut st.tasks[key];
        match action {
            NotifyAction::NoAction => {}
            NotifyAction::SetBits => task.value |= value,
            NotifyAction::Increment => task.value = task.value.wrapping_add(1),
            NotifyAction::SetValueWithOverwrite => task.value = value,
            NotifyAction::SetValueWithoutOverwrite => {
                if task.notify == NotifyState::Received {
                    return None;
                }
                task.value = value;
            }
        }
        let was = mem::replace(&mut task.notify, NotifyState::Received);
        if was == NotifyState::Waiting && task.state == TaskState::Blocked && task.wait == Some(WaitOn::Notify) {
            let level = task.priority;
            st.push_ready(key, false);
            return Some(Some(level));
        }
        Some(None)
    }

    pub(crate) fn notify(&self, key: usize, value: u32, action: NotifyAction) -> bool {
        let mut st = self.state.lock();
        match self.notify_locked(&mut st, key, value, action) {
            None => false,
            Some(woken) => {
                if woken.is_some() {
                    self.cond.notify_all();
                    self.preempt(&mut st);
                }
                true
            }
        }
    }

    pub(crate) fn notify_from_isr(
        &self,
        key: usize,
        value: u32,
        action: NotifyAction,
        woken: &mut bool,
    ) -> bool {
        let mut st = self.state.lock();
        match self.notify_locked(&mut st, key, value, action) {
            None => false,
            Some(level) => {
                *woken = st.outranks_running(level);
                true
            }
        }
    }

    pub(crate) fn notify_wait(&self, clear_on_entry: u32, clear_on_exit: u32, ticks: Ticks) -> NotifyWait {
        let mut st = self.state.lock();
        let Some(me) = self.blocking_caller(&st) else {
            return NotifyWait { received: false, value: 0 };
        };

        if st.tasks[me].notify != NotifyState::Received {
            st.tasks[me].value &= !clear_on_entry;
            st.tasks[me].notify = NotifyState::Waiting;
            if ticks > 0 {
                let deadline = st.deadline(ticks);
                while st.tasks[me].notify == NotifyState::Waiting && !st.expired(deadline) {
                    if !self.block(&mut st, me, WaitOn::Notify, deadline) {
                        break;
                    }
                }
            }
        }

        let task = &mut st.tasks[me];
        let value = task.value;
        let received = task.notify == NotifyState::Received;
        if received {
            task.value &= !clear_on_exit;
        }
        task.notify = NotifyState::Idle;
        NotifyWait { received, value }
    }

    // Queues

    pub(crate) fn queue_create(&self, capacity: usize, item_size: usize) -> usize {
        let mut st = self.state.lock();
        st.queues.push(Some(Ring::new(capacity, item_size)));
        st.queues.len() - 1
    }

    pub(crate) fn queue_delete(&self, queue: usize) {
        let mut st = self.state.lock();
        if let Some(slot) = st.queues.get_mut(queue) {
            *slot = None;
        }
        let woken = st.wake(WaitOn::Send(queue)).max(st.wake(WaitOn::Receive(queue)));
        if woken.is_some() {
            self.cond.notify_all();
            self.preempt(&mut st);
        }
    }

    pub(crate) fn queue_send(&self, queue: usize, item: &[u8], position: SendPosition, ticks: Ticks) -> bool {
        let mut st = self.state.lock();
        let me = self.blocking_caller(&st);
        let deadline = st.deadline(ticks);
        loop {
            let Some(ring) = st.queues.get_mut(queue).and_then(Option::as_mut) else {
                return false;
            };
            if item.len() != ring.item_size() {
                return false;
            }
            if ring.push(item, position) {
                if st.wake(WaitOn::Receive(queue)).is_some() {
                    self.cond.notify_all();
                    self.preempt(&mut st);
                }
                return true;
            }
            let Some(me) = me else {
                return false;
            };
            if ticks == 0 || st.expired(deadline) {
                return false;
            }
            if !self.block(&mut st, me, WaitOn::Send(queue), deadline) {
                return false;
            }
        }
    }

    pub(crate) fn queue_send_from_isr(
        &self,
        queue: usize,
        item: &[u8],
        position: SendPosition,
        woken: &mut bool,
    ) -> bool {
        let mut st = self.state.lock();
        let pushed = st
            .queues
            .get_mut(queue)
            .and_then(Option::as_mut)
            .is_some_and(|ring| ring.push(item, position));
        if pushed {
            let level = st.wake(WaitOn::Receive(queue));
            *woken = st.outranks_running(level);
        }
        pushed
    }

    pub(crate) fn queue_receive(&self, queue: usize, out: &mut [u8], ticks: Ticks, remove: bool) -> bool {
        let mut st = self.state.lock();
        let me = self.blocking_caller(&st);
        let deadline = st.deadline(ticks);
        loop {
            let Some(ring) = st.queues.get_mut(queue).and_then(Option::as_mut) else {
                return false;
            };
            if out.len() != ring.item_size() {
                return false;
            }
            let taken = if remove { ring.pop(out) } else { ring.peek(out) };
            if taken {
                if remove && st.wake(WaitOn::Send(queue)).is_some() {
                    self.cond.notify_all();
                    self.preempt(&mut st);
                }
                return true;
            }
            let Some(me) = me else {
                return false;
            };
            if ticks == 0 || st.expired(deadline) {
                return false;
            }
            if !self.block(&mut st, me, WaitOn::Receive(queue), deadline) {
                return false;
            }
        }
    }

    pub(crate) fn queue_receive_from_isr(&self, queue: usize, out: &mut [u8], woken: &mut bool) -> bool {
        let mut st = self.state.lock();
        let popped = st
            .queues
            .get_mut(queue)
            .and_then(Option::as_mut)
            .is_some_and(|ring| ring.pop(out));
        if popped {
            let level = st.wake(WaitOn::Send(queue));
            *woken = st.outranks_running(level);
        }
        popped
    }

    pub(crate) fn queue_peek_from_isr(&self, queue: usize, out: &mut [u8]) -> bool {
        let st = self.state.lock();
        st.queues
            .get(queue)
            .and_then(Option::as_ref)
            .is_some_and(|ring| ring.peek(out))
    }

    pub(crate) fn queue_len(&self, queue: usize) -> usize {
        let st = self.state.lock();
        st.queues
            .get(queue)
            .and_then(Option::as_ref)
            .map_or(0, Ring::len)
    }

    // Mutexes

    pub(crate) fn mutex_create(&self) -> usize {
        let mut st = self.state.lock();
        st.mutexes.push(Some(None));
        st.mutexes.len() - 1
    }

    fn holder(&self) -> Holder {
        self.caller().map_or(Holder::Host, Holder::Task)
    }

    pub(crate) fn mutex_take(&self, mutex: usize, ticks: Ticks) -> bool {
        let holder = self.holder();
        let mut st = self.state.lock();
        let me = self.blocking_caller(&st);
        let deadline = st.deadline(ticks);
        loop {
            let Some(slot) = st.mutexes.get_mut(mutex).and_then(Option::as_mut) else {
                return false;
            };
            if slot.is_none() {
                *slot = Some(holder);
                return true;
            }
            let Some(me) = me else {
                return false;
            };
            if ticks == 0 || st.expired(deadline) {
                return false;
            }
            if !self.block(&mut st, me, WaitOn::Mutex(mutex), deadline) {
                return false;
            }
        }
    }

    pub(crate) fn mutex_give(&self, mutex: usize) -> bool {
        let holder = self.holder();
        let mut st = self.state.lock();
        let Some(slot) = st.mutexes.get_mut(mutex).and_then(Option::as_mut) else {
            return false;
        };
        if *slot != Some(holder) {
            return false;
        }
        *slot = None;
        if st.wake(WaitOn::Mutex(mutex)).is_some() {
            self.cond.notify_all();
            self.preempt(&mut st);
        }
        true
    }

    pub(crate) fn mutex_is_held(&self, mutex: usize) -> bool {
        let st = self.state.lock();
        matches!(st.mutexes.get(mutex), Some(Some(Some(_))))
    }

    pub(crate) fn mutex_delete(&self, mutex: usize) {
        let mut st = self.state.lock();
        if let Some(slot) = st.mutexes.get_mut(mutex) {
            *slot = None;
        }
        if st.wake(WaitOn::Mutex(mutex)).is_some() {
            self.cond.notify_all();
        }
    }

    // Clock

    pub(crate) fn system_time_ms(&self) -> u64 {
        let st = self.state.lock();
        let elapsed = st.tick - st.wall_base_tick;
        st.wall_base_ms + elapsed * 1000 / u64::from(self.config.tick_rate_hz)
    }

    pub(crate) fn set_system_time_ms(&self, ms: u64) {
        let mut st = self.state.lock();
        st.wall_base_ms = ms;
        st.wall_base_tick = st.tick;
    }
}

/// Body of every task thread.
fn task_main(kernel: Arc<Kernel>, key: usize, entry: TaskEntry) {
    CURRENT.with(|current| current.set(Some((kernel.id, key))));

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let scheduled = {
            let mut st = kernel.state.lock();
            kernel.wait_turn(&mut st, key)
        };
        if scheduled {
            entry();
        }
    }));

    let mut st = kernel.state.lock();
    if let Err(payload) = outcome {
        if !payload.is::<Teardown>() {
            log::error!("sim: task '{}' panicked; stopping the scheduler", st.tasks[key].name);
            if st.fault.is_none() {
                st.fault = Some(payload);
            }
            kernel.stop(&mut st);
        }
    }
    if st.tasks[key].state != TaskState::Deleted {
        st.unready(key);
        st.tasks[key].state = TaskState::Halted;
    }
    if st.current == Some(key) {
        kernel.switch_context(&mut st);
    }
    st.live_threads -= 1;
    kernel.cond.notify_all();
}
