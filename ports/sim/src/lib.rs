//! Host simulation port for `rtw`.
//!
//! Runs a priority-preemptive kernel inside one process so tasks,
//! notifications and queues can be exercised without hardware. Each task
//! gets a host thread; exactly one of them executes at a time, chosen by
//! priority, and the tick counter is virtual.
//!
//! ```no_run
//! use rtw::{Lifecycle, Priority, Rtos, TaskConfig, Thread};
//! use rtw_port_sim::SimPort;
//!
//! let rtos = Rtos::new(SimPort::default());
//! let worker = Thread::from_fn(&rtos, TaskConfig::new("worker", Priority::new(1), 512), |ctx| {
//!     log::info!("hello from {}", ctx.name());
//!     ctx.end_scheduler();
//! });
//! worker.join().ok();
//! ```

mod config;
mod error;
mod kernel;
mod port;
mod queue;

pub use config::{SimConfig, SimConfigBuilder};
pub use error::SimError;
pub use kernel::{SimStats, TaskState, MAX_PRIORITY};
pub use port::SimPort;
