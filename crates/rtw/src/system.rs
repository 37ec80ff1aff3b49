//! The shared context every task, queue and mutex is constructed from.

use core::time::Duration;

use crate::arena::Arena;
use crate::config::RtosConfig;
use crate::ids::IdRegistry;
use crate::port::{Port, SchedulerState};
use crate::sync::Arc;
use crate::time::{self, Ticks};
use crate::trace::TraceHook;

/// Owns the kernel port, the arena and the identity registry.
///
/// Wrapper objects hold an `Arc<Rtos<P>>`, so several independent instances
/// can coexist in one process (each test builds its own).
pub struct Rtos<P: Port> {
    port: P,
    arena: Arena,
    ids: IdRegistry,
    config: RtosConfig,
    trace: Option<TraceHook>,
}

impl<P: Port> Rtos<P> {
    pub fn builder(port: P) -> RtosBuilder<P> {
        RtosBuilder::new(port)
    }

    /// Builds a context with the default configuration.
    pub fn new(port: P) -> Arc<Self> {
        Self::builder(port).build()
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn ids(&self) -> &IdRegistry {
        &self.ids
    }

    pub fn config(&self) -> &RtosConfig {
        &self.config
    }

    pub fn is_scheduler_running(&self) -> bool {
        self.port.scheduler_state() == SchedulerState::Running
    }

    /// Starts the kernel scheduler if it has never been started.
    ///
    /// On hosted ports this call returns only after the scheduler stops.
    pub fn start_scheduler(&self) {
        if self.port.scheduler_state() != SchedulerState::NotStarted {
            return;
        }
        log::info!("{}: starting scheduler", self.config.name);
        self.port.start_scheduler();
        log::info!("{}: scheduler stopped", self.config.name);
    }

    pub fn end_scheduler(&self) {
        self.port.end_scheduler();
    }

    /// Blocks the calling task for `duration`, truncated to whole ticks.
    pub fn delay(&self, duration: Duration) {
        self.port.delay(self.ticks_for(duration));
    }

    pub fn yield_now(&self) {
        self.port.yield_now();
    }

    /// Converts a duration to kernel ticks at the port's tick rate.
    pub fn ticks_for(&self, duration: Duration) -> Ticks {
        time::to_ticks(duration, self.port.tick_rate_hz())
    }

    /// Kernel time elapsed since the scheduler started.
    pub fn uptime(&self) -> Duration {
        time::to_duration(self.port.tick_count(), self.port.tick_rate_hz())
    }

    pub(crate) fn tracing(&self) -> bool {
        self.trace.is_some()
    }

    pub(crate) fn trace(&self, record: u8, payload: &[u8]) {
        if let Some(hook) = &self.trace {
            let _ = hook(record, payload, true);
        }
    }
}

pub struct RtosBuilder<P: Port> {
    port: P,
    config: RtosConfig,
    trace: Option<TraceHook>,
}

impl<P: Port> RtosBuilder<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            config: RtosConfig::default(),
            trace: None,
        }
    }

    pub fn config(mut self, config: RtosConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_trace_hook(mut self, hook: TraceHook) -> Self {
        self.trace = Some(hook);
        self
    }

    pub fn build(self) -> Arc<Rtos<P>> {
        let arena = Arena::from_config(&self.config);
        log::debug!(
            "{}: arena of {} bytes, {} byte control blocks",
            self.config.name,
            arena.capacity(),
            arena.control_block_size()
        );
        Arc::new(Rtos {
            port: self.port,
            arena,
            ids: IdRegistry::new(),
            config: self.config,
            trace: self.trace,
        })
    }
}
