//! Two tasks of different priority share a counter guarded by a kernel mutex.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rtw::{Lifecycle, Priority, RtosMutex, TaskConfig, TaskContext, Thread};
use rtw_port_sim::{SimConfig, SimPort};

const ROUNDS: u32 = 5;

fn worker(
    name: &'static str,
    mutex: Arc<RtosMutex<SimPort>>,
    counter: Arc<AtomicU32>,
    hold: Duration,
) -> impl FnMut(&TaskContext<SimPort>) + Send + 'static {
    move |ctx: &TaskContext<SimPort>| {
        for _ in 0..ROUNDS {
            if let Err(err) = mutex.lock(Duration::from_millis(500)) {
                log::warn!("{name}: {err}");
                continue;
            }
            let seen = counter.fetch_add(1, Ordering::SeqCst);
            log::info!("{name}: counter {seen} -> {}", seen + 1);
            ctx.delay(hold);
            if let Err(err) = mutex.unlock() {
                log::error!("{name}: {err}");
            }
            ctx.delay(Duration::from_millis(1));
        }
        log::info!("{name}: done");
        ctx.suspend_self();
    }
}

fn main() -> anyhow::Result<()> {
    rtw_demos::init_logging();
    let rtos = rtw_demos::simulated("mutex", SimConfig::default())?;
    let mutex = Arc::new(RtosMutex::new(&rtos)?);
    let counter = Arc::new(AtomicU32::new(0));

    let fast = Arc::new(Thread::from_fn(
        &rtos,
        TaskConfig::new("fast", Priority::new(3), 256),
        worker("fast", Arc::clone(&mutex), Arc::clone(&counter), Duration::from_millis(2)),
    ));
    let slow = Thread::from_fn(
        &rtos,
        TaskConfig::new("slow", Priority::new(2), 256),
        {
            let mut body = worker(
                "slow",
                Arc::clone(&mutex),
                Arc::clone(&counter),
                Duration::from_millis(10),
            );
            let fast = Arc::clone(&fast);
            move |ctx: &TaskContext<SimPort>| {
                if let Err(err) = fast.join() {
                    log::error!("fast worker failed to start: {err}");
                }
                body(ctx);
            }
        },
    );
    slow.join()?;

    log::info!("final counter: {}", counter.load(Ordering::SeqCst));
    Ok(())
}
