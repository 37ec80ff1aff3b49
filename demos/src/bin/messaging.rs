//! Value notifications: overwrite, refused overwrite while a value is
//! pending, a wrong value, and finally a timeout on the receiving side.

use std::sync::Arc;
use std::time::Duration;

use rtw::{Lifecycle, NotifyError, Priority, Runnable, Signal, SignalWaiter, TaskConfig, TaskContext, Thread};
use rtw_port_sim::{SimConfig, SimPort};

const MESSAGE: u32 = 0xf0ff_0fff;

struct Master {
    slave: Arc<Thread<SimPort>>,
}

impl Runnable<SimPort> for Master {
    fn run(&mut self, ctx: &TaskContext<SimPort>) {
        if let Err(err) = self.slave.join() {
            log::error!("slave failed to start: {err}");
            ctx.end_scheduler();
            return;
        }

        self.slave.send_value_with_overwrite(MESSAGE);
        match self.slave.send_value_without_overwrite(MESSAGE) {
            Err(NotifyError::Pending) => log::info!("refused as expected: a value is still pending"),
            other => log::warn!("expected a pending value, got {other:?}"),
        }
        ctx.delay(Duration::from_millis(400));

        match self.slave.send_value_without_overwrite(MESSAGE) {
            Ok(()) => log::info!("accepted as expected: nothing pending"),
            Err(err) => log::warn!("expected acceptance, got {err}"),
        }
        ctx.delay(Duration::from_millis(400));

        self.slave.send_value_with_overwrite(MESSAGE + 2);
        ctx.delay(Duration::from_millis(400));

        ctx.delay(Duration::from_millis(704));
        log::info!("ending the run");
        ctx.end_scheduler();
    }
}

struct Slave;

impl Runnable<SimPort> for Slave {
    fn run(&mut self, ctx: &TaskContext<SimPort>) {
        loop {
            let got = ctx.wait_for_value(Duration::from_millis(700));
            if got.timed_out {
                log::info!("value wait timed out");
            } else if got.value == MESSAGE {
                log::info!("correct value received: {:#x}", got.value);
            } else {
                log::info!("incorrect value received: {:#x}", got.value);
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    rtw_demos::init_logging();
    let rtos = rtw_demos::simulated("messaging", SimConfig::default())?;

    let slave = Arc::new(Thread::new(&rtos, TaskConfig::new("slave", Priority::new(4), 400), Slave));
    let master = Thread::new(
        &rtos,
        TaskConfig::new("master", Priority::new(5), 400),
        Master { slave },
    );
    master.join()?;
    Ok(())
}
