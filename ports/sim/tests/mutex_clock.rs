//! Mutex contention and the wall clock under virtual time.

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rtw::clock::MS_IN_SEC;
use rtw::{
    Lifecycle, MutexError, Port, Priority, Rtos, RtosMutex, SystemClock, TaskConfig, TaskContext,
    Thread, Time64,
};
use rtw_port_sim::{SimConfig, SimPort};

type Ctx = TaskContext<SimPort>;

fn rtos() -> Arc<Rtos<SimPort>> {
    common::init_logging();
    Rtos::new(SimPort::default())
}

#[test]
fn waiting_task_takes_the_mutex_once_released() {
    let rtos = rtos();
    let mutex = Arc::new(RtosMutex::new(&rtos).unwrap());
    let trail = Arc::new(Mutex::new(Vec::new()));

    let high = Arc::new(Thread::from_fn(
        &rtos,
        TaskConfig::new("high", Priority::new(2), 512),
        {
            let mutex = Arc::clone(&mutex);
            let trail = Arc::clone(&trail);
            move |ctx: &Ctx| {
                mutex.lock_forever().unwrap();
                trail.lock().push("high:locked");
                mutex.unlock().unwrap();
                ctx.suspend_self();
            }
        },
    ));
    let low = Thread::from_fn(&rtos, TaskConfig::new("low", Priority::new(1), 512), {
        let mutex = Arc::clone(&mutex);
        let trail = Arc::clone(&trail);
        let high = Arc::clone(&high);
        move |ctx: &Ctx| {
            mutex.lock_forever().unwrap();
            high.join().unwrap();
            trail.lock().push("low:unlocking");
            mutex.unlock().unwrap();
            trail.lock().push("low:done");
            ctx.suspend_self();
        }
    });
    low.join().unwrap();

    assert_eq!(
        *trail.lock(),
        vec!["low:unlocking", "high:locked", "low:done"]
    );
    assert!(!mutex.is_locked());
}

#[test]
fn lock_times_out_while_held() {
    let rtos = rtos();
    let mutex = Arc::new(RtosMutex::new(&rtos).unwrap());
    let outcome = Arc::new(Mutex::new(None));

    let high = Arc::new(Thread::from_fn(
        &rtos,
        TaskConfig::new("high", Priority::new(2), 512),
        {
            let mutex = Arc::clone(&mutex);
            let outcome = Arc::clone(&outcome);
            move |ctx: &Ctx| {
                let started = ctx.port().tick_count();
                let result = mutex.lock(Duration::from_millis(30));
                let busy = mutex.try_lock();
                *outcome.lock() = Some((result, busy, ctx.port().tick_count() - started));
                ctx.suspend_self();
            }
        },
    ));
    let low = Thread::from_fn(&rtos, TaskConfig::new("low", Priority::new(1), 512), {
        let mutex = Arc::clone(&mutex);
        let high = Arc::clone(&high);
        move |ctx: &Ctx| {
            mutex.try_lock().unwrap();
            high.join().unwrap();
            ctx.suspend_self();
        }
    });
    low.join().unwrap();

    assert_eq!(
        *outcome.lock(),
        Some((Err(MutexError::Timeout), Err(MutexError::Timeout), 30))
    );
}

#[test]
fn only_the_holder_may_unlock() {
    let rtos = rtos();
    let mutex = Arc::new(RtosMutex::new(&rtos).unwrap());
    let outcome = Arc::new(Mutex::new(None));

    let other = Arc::new(Thread::from_fn(
        &rtos,
        TaskConfig::new("other", Priority::new(2), 512),
        {
            let mutex = Arc::clone(&mutex);
            let outcome = Arc::clone(&outcome);
            move |ctx: &Ctx| {
                *outcome.lock() = Some((mutex.unlock(), mutex.remove()));
                ctx.suspend_self();
            }
        },
    ));
    let holder = Thread::from_fn(&rtos, TaskConfig::new("holder", Priority::new(1), 512), {
        let mutex = Arc::clone(&mutex);
        let other = Arc::clone(&other);
        move |ctx: &Ctx| {
            mutex.lock_forever().unwrap();
            other.join().unwrap();
            mutex.unlock().unwrap();
            mutex.remove().unwrap();
            ctx.end_scheduler();
        }
    });
    holder.join().unwrap();

    assert_eq!(
        *outcome.lock(),
        Some((
            Err(MutexError::InvalidOperation),
            Err(MutexError::InvalidOperation)
        ))
    );
    assert!(!mutex.is_created());
}

#[test]
fn mutexes_refuse_interrupt_context() {
    let port = SimPort::default();
    let rtos = Rtos::new(port.clone());
    let mutex = RtosMutex::new(&rtos).unwrap();

    assert_eq!(port.interrupt(|| mutex.try_lock()), Err(MutexError::InterruptContext));
    mutex.try_lock().unwrap();
    assert_eq!(port.interrupt(|| mutex.unlock()), Err(MutexError::InterruptContext));
    assert!(mutex.is_locked());
}

#[test]
fn wall_clock_follows_virtual_ticks() {
    let epoch = 1_700_000_000_000;
    let port = SimPort::new(SimConfig::builder().epoch_ms(epoch).build()).unwrap();
    let rtos = Rtos::new(port);
    let clock = Arc::new(SystemClock::new(&rtos));
    let readings = Arc::new(Mutex::new(Vec::new()));

    assert_eq!(clock.time64(), epoch);

    let root = Thread::from_fn(&rtos, TaskConfig::new("root", Priority::new(1), 512), {
        let clock = Arc::clone(&clock);
        let readings = Arc::clone(&readings);
        move |ctx: &Ctx| {
            ctx.delay(Duration::from_millis(1_500));
            readings.lock().push(clock.time64());
            clock.set_time64(42 * MS_IN_SEC);
            ctx.delay(Duration::from_secs(2));
            readings.lock().push(clock.time64());
            readings.lock().push(clock.seconds());
            ctx.end_scheduler();
        }
    });
    root.join().unwrap();

    assert_eq!(*readings.lock(), vec![epoch + 1_500, 44_000, 44]);
}

#[test]
fn slower_tick_rates_round_delays_down() {
    let port = SimPort::new(SimConfig::builder().tick_rate_hz(100).build()).unwrap();
    let rtos = Rtos::new(port.clone());
    let clock = SystemClock::new(&rtos);

    let root = Thread::from_fn(&rtos, TaskConfig::new("root", Priority::new(1), 512), |ctx: &Ctx| {
        ctx.delay(Duration::from_millis(255));
        ctx.end_scheduler();
    });
    root.join().unwrap();

    assert_eq!(port.tick(), 25);
    assert_eq!(clock.time64(), 250);
}
