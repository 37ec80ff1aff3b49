//! A master task signals a slave on the bit it waits for, then on one it
//! does not, then lets the slave's wait time out.

use std::sync::Arc;
use std::time::Duration;

use rtw::{
    sig_bit, Lifecycle, Priority, Runnable, Signal, SignalOutcome, SignalWaiter, TaskConfig,
    TaskContext, Thread,
};
use rtw_port_sim::{SimConfig, SimPort};

const WATCHED: u32 = sig_bit(12);
const STRAY: u32 = sig_bit(13);

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
        self.slave.signal_on_bits(WATCHED);
        ctx.delay(Duration::from_millis(100));
        self.slave.signal_on_bits(STRAY);
        ctx.delay(Duration::from_millis(1000));
        log::info!("ending the run");
        ctx.end_scheduler();
    }
}

struct Slave;

impl Runnable<SimPort> for Slave {
    fn run(&mut self, ctx: &TaskContext<SimPort>) {
        loop {
            match ctx.wait_for_signal_on_bits(WATCHED, Duration::from_millis(700)) {
                SignalOutcome::ExpectedReceived => log::info!("expected signal received"),
                SignalOutcome::UnexpectedReceived => log::info!("unexpected signal received"),
                SignalOutcome::TimedOut => log::info!("signal wait timed out"),
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    rtw_demos::init_logging();
    let rtos = rtw_demos::simulated("signaling", SimConfig::default())?;

    let slave = Arc::new(Thread::new(&rtos, TaskConfig::new("slave", Priority::new(4), 400), Slave));
    let master = Thread::new(
        &rtos,
        TaskConfig::new("master", Priority::new(5), 400),
        Master { slave },
    );
    master.join()?;
    Ok(())
}
