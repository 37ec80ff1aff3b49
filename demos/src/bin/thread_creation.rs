//! Creates tasks until the arena runs dry, then shows what a failed
//! construction and a refused join look like.

use rtw::{Lifecycle, Priority, RtosConfig, Rtos, TaskConfig, TaskContext, TaskStatus, Thread};
use rtw_port_sim::{SimConfig, SimPort};

fn main() -> anyhow::Result<()> {
    rtw_demos::init_logging();
    let port = SimPort::new(SimConfig::default())?;
    let config = RtosConfig::builder()
        .name("thread-creation")
        .arena_size(2 * 1024)
        .build();
    let rtos = Rtos::builder(port).config(config).build();

    let mut threads = Vec::new();
    for n in 0..8 {
        let name = format!("worker-{n}");
        let thread = Thread::from_fn(
            &rtos,
            TaskConfig::new(&name, Priority::new(1), 400),
            |ctx: &TaskContext<SimPort>| ctx.suspend_self(),
        );
        let stats = rtos.arena().stats();
        log::info!(
            "{name}: id {} status {:?}, arena {} of {} bytes used",
            thread.id(),
            thread.status(),
            stats.used,
            stats.total
        );
        threads.push(thread);
    }

    if let Some(failed) = threads.iter().find(|t| t.status() == TaskStatus::MemoryAllocationFailed) {
        log::info!("joining {} fails with: {:?}", failed.name(), failed.join());
    }

    drop(threads);
    let tiny = Thread::from_fn(
        &rtos,
        TaskConfig::new("tiny", Priority::new(1), 16),
        |ctx: &TaskContext<SimPort>| ctx.suspend_self(),
    );
    log::info!("a 16 byte stack is refused by the kernel: {:?}", tiny.join());
    Ok(())
}
