//! Reads the wall clock around a one second delay.

use std::time::Duration;

use rtw::{Lifecycle, Priority, SystemClock, TaskConfig, TaskContext, Thread, Time64};
use rtw_port_sim::{SimConfig, SimPort};

fn main() -> anyhow::Result<()> {
    rtw_demos::init_logging();
    let sim = SimConfig::builder().epoch_ms(1_600_000_000_000).build();
    let rtos = rtw_demos::simulated("system-time", sim)?;
    let clock = SystemClock::new(&rtos);

    let task = Thread::from_fn(
        &rtos,
        TaskConfig::new("clock", Priority::new(1), 100),
        move |ctx: &TaskContext<SimPort>| {
            let start = clock.time64();
            log::info!("time at start: {start} ms");
            ctx.delay(Duration::from_millis(1000));
            let now = clock.time64();
            log::info!("time after the delay: {now} ms (delta {} ms)", now - start);
            ctx.end_scheduler();
        },
    );
    task.join()?;
    Ok(())
}
