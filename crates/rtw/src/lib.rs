//! # rtw
//!
//! A thin, strongly typed task layer over a tick-driven, priority-preemptive
//! kernel. The kernel itself is reached only through the [`port::Port`]
//! trait; this crate adds the pieces applications actually program against.
//!
//! ## Module Overview
//! - [`arena`]   – Fixed-capacity pool handing out control-block and stack regions.
//! - [`task`]    – Task object with an explicit lifecycle and a trampoline entry.
//! - [`notify`]  – Direct-to-task notification channel (bits and values).
//! - [`queue`]   – Bounded FIFO/LIFO queue, raw and typed.
//! - [`mutex`]   – Binary exclusion wrapper.
//! - [`clock`]   – 64-bit millisecond wall clock.
//! - [`context`] – Task/interrupt execution-context dispatch.
//! - [`system`]  – The shared [`Rtos`] context every component is built from.
//!
//! Nothing here keeps global state: the arena, the identity registry and the
//! port are owned by an [`Rtos`] value and handed to each object at
//! construction.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod arena;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod ids;
pub mod mutex;
pub mod notify;
pub mod port;
pub mod queue;
pub mod sync;
pub mod system;
pub mod task;
pub mod time;
pub mod trace;

pub use arena::{Arena, ArenaStats, Region, RegionClass, MAX_REGIONS};
pub use clock::{SystemClock, Time64};
pub use config::{RtosConfig, RtosConfigBuilder};
pub use error::{AllocationFailed, MutexError, NotifyError, QueueError, TaskError};
pub use ids::{IdRegistry, TaskId};
pub use mutex::RtosMutex;
pub use notify::{sig_bit, NotifyAction, NotifyValue, Signal, SignalOutcome, SignalWaiter};
pub use port::{Port, SchedulerState};
pub use queue::{Queue, QueueReceiver, QueueSender, RawQueue};
pub use system::{Rtos, RtosBuilder};
pub use task::{Lifecycle, Priority, Runnable, TaskConfig, TaskContext, TaskName, TaskStatus, Thread};
pub use time::{Ticks, FOREVER, MAX_DELAY};
pub use trace::{TraceHook, TraceResult};

#[cfg(test)]
mod tests;
