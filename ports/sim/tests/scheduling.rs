//! Priority scheduling, virtual time and task lifecycle on the simulated kernel.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rtw::{
    Lifecycle, Port, Priority, Rtos, SchedulerState, SignalWaiter, TaskConfig, TaskContext,
    TaskError, TaskStatus, Thread,
};
use rtw_port_sim::{SimConfig, SimPort, TaskState};

type Ctx = TaskContext<SimPort>;
type Trail = Arc<Mutex<Vec<&'static str>>>;

fn rtos() -> Arc<Rtos<SimPort>> {
    common::init_logging();
    Rtos::new(SimPort::default())
}

fn trail() -> Trail {
    Arc::new(Mutex::new(Vec::new()))
}

#[test]
fn joining_a_higher_priority_task_runs_it_first() {
    let rtos = rtos();
    let trail = trail();

    let high = Arc::new(Thread::from_fn(
        &rtos,
        TaskConfig::new("high", Priority::new(3), 800),
        {
            let trail = Arc::clone(&trail);
            move |ctx: &Ctx| {
                trail.lock().push("high");
                ctx.suspend_self();
            }
        },
    ));
    let root = Thread::from_fn(&rtos, TaskConfig::new("root", Priority::new(1), 100), {
        let trail = Arc::clone(&trail);
        let high = Arc::clone(&high);
        move |ctx: &Ctx| {
            trail.lock().push("root:before");
            high.join().unwrap();
            trail.lock().push("root:after");
            ctx.suspend_self();
        }
    });

    root.join().unwrap();

    assert_eq!(*trail.lock(), vec!["root:before", "high", "root:after"]);
    assert_eq!(high.status(), TaskStatus::Suspended);
    assert_eq!(rtos.port().scheduler_state(), SchedulerState::Stopped);
}

#[test]
fn three_tasks_preempt_by_priority_once_all_are_joined() {
    let rtos = rtos();
    let trail = trail();

    let stepper = |name: &'static str, level: u8, stack: usize, steps: [&'static str; 2]| {
        let trail = Arc::clone(&trail);
        Arc::new(Thread::from_fn(
            &rtos,
            TaskConfig::new(name, Priority::new(level), stack),
            move |ctx: &Ctx| {
                trail.lock().push(steps[0]);
                ctx.delay(Duration::from_millis(10));
                trail.lock().push(steps[1]);
                ctx.suspend_self();
            },
        ))
    };
    let mid = stepper("mid", 2, 100, ["mid:1", "mid:2"]);
    let high = stepper("high", 3, 800, ["high:1", "high:2"]);

    let low = Thread::from_fn(&rtos, TaskConfig::new("low", Priority::new(1), 100), {
        let trail = Arc::clone(&trail);
        let (mid, high) = (Arc::clone(&mid), Arc::clone(&high));
        move |ctx: &Ctx| {
            trail.lock().push("low:start");
            mid.join().unwrap();
            trail.lock().push("low:joined mid");
            high.join().unwrap();
            trail.lock().push("low:joined high");
            ctx.delay(Duration::from_millis(20));
            trail.lock().push("low:done");
            ctx.suspend_self();
        }
    });
    low.join().unwrap();

    assert_eq!(
        *trail.lock(),
        vec![
            "low:start",
            "mid:1",
            "low:joined mid",
            "high:1",
            "low:joined high",
            "high:2",
            "mid:2",
            "low:done",
        ]
    );
    assert_eq!(low.status(), TaskStatus::Suspended);
    assert_eq!(mid.status(), TaskStatus::Suspended);
    assert_eq!(high.status(), TaskStatus::Suspended);
}

#[test]
fn yielding_alternates_equal_priorities() {
    let rtos = rtos();
    let trail = trail();

    let worker = |name: &'static str, first: &'static str, second: &'static str| {
        let trail = Arc::clone(&trail);
        Arc::new(Thread::from_fn(
            &rtos,
            TaskConfig::new(name, Priority::new(2), 256),
            move |ctx: &Ctx| {
                trail.lock().push(first);
                ctx.yield_now();
                trail.lock().push(second);
                ctx.suspend_self();
            },
        ))
    };
    let a = worker("a", "a1", "a2");
    let b = worker("b", "b1", "b2");

    let root = Thread::from_fn(&rtos, TaskConfig::new("root", Priority::new(3), 256), {
        let (a, b) = (Arc::clone(&a), Arc::clone(&b));
        move |ctx: &Ctx| {
            a.join().unwrap();
            b.join().unwrap();
            ctx.suspend_self();
        }
    });
    root.join().unwrap();

    assert_eq!(*trail.lock(), vec!["a1", "b1", "a2", "b2"]);
}

#[test]
fn delays_advance_virtual_time() {
    let rtos = rtos();
    let ticks = Arc::new(Mutex::new(Vec::new()));

    let root = Thread::from_fn(&rtos, TaskConfig::new("sleeper", Priority::new(1), 256), {
        let ticks = Arc::clone(&ticks);
        move |ctx: &Ctx| {
            let port = ctx.port();
            ticks.lock().push(port.tick_count());
            ctx.delay(Duration::from_millis(250));
            ticks.lock().push(port.tick_count());
            ctx.delay_ticks(40);
            ticks.lock().push(port.tick_count());
            ctx.end_scheduler();
        }
    });
    root.join().unwrap();

    assert_eq!(*ticks.lock(), vec![0, 250, 290]);
    assert_eq!(rtos.uptime(), Duration::from_millis(290));
}

#[test]
fn shorter_delay_wakes_first() {
    let rtos = rtos();
    let trail = trail();

    let sleeper = |name: &'static str, ms: u64| {
        let trail = Arc::clone(&trail);
        Arc::new(Thread::from_fn(
            &rtos,
            TaskConfig::new(name, Priority::new(2), 256),
            move |ctx: &Ctx| {
                ctx.delay(Duration::from_millis(ms));
                trail.lock().push(name);
                ctx.suspend_self();
            },
        ))
    };
    let slow = sleeper("slow", 30);
    let fast = sleeper("fast", 10);

    let root = Thread::from_fn(&rtos, TaskConfig::new("root", Priority::new(1), 256), {
        let (slow, fast) = (Arc::clone(&slow), Arc::clone(&fast));
        move |ctx: &Ctx| {
            slow.join().unwrap();
            fast.join().unwrap();
            ctx.suspend_self();
        }
    });
    root.join().unwrap();

    assert_eq!(*trail.lock(), vec!["fast", "slow"]);
    assert_eq!(rtos.port().tick(), 30);
}

#[test]
fn raising_a_ready_task_above_the_caller_preempts() {
    let rtos = rtos();
    let trail = trail();

    let low = Arc::new(Thread::from_fn(
        &rtos,
        TaskConfig::new("low", Priority::new(1), 256),
        {
            let trail = Arc::clone(&trail);
            move |ctx: &Ctx| {
                trail.lock().push("low");
                ctx.suspend_self();
            }
        },
    ));
    let root = Thread::from_fn(&rtos, TaskConfig::new("root", Priority::new(2), 256), {
        let trail = Arc::clone(&trail);
        let low = Arc::clone(&low);
        move |ctx: &Ctx| {
            low.join().unwrap();
            trail.lock().push("root:joined");
            low.set_priority(Priority::new(3));
            trail.lock().push("root:raised");
            ctx.suspend_self();
        }
    });
    root.join().unwrap();

    assert_eq!(*trail.lock(), vec!["root:joined", "low", "root:raised"]);
    assert_eq!(low.priority(), Priority::new(3));
}

#[test]
fn suspend_and_resume_between_tasks() {
    let rtos = rtos();
    let trail = trail();

    let worker = Arc::new(Thread::from_fn(
        &rtos,
        TaskConfig::new("worker", Priority::new(2), 256),
        {
            let trail = Arc::clone(&trail);
            move |ctx: &Ctx| {
                trail.lock().push("w1");
                ctx.suspend_self();
                trail.lock().push("w2");
                ctx.suspend_self();
            }
        },
    ));
    let root = Thread::from_fn(&rtos, TaskConfig::new("root", Priority::new(1), 256), {
        let trail = Arc::clone(&trail);
        let worker = Arc::clone(&worker);
        move |ctx: &Ctx| {
            worker.join().unwrap();
            trail.lock().push("r1");
            assert_eq!(worker.status(), TaskStatus::Suspended);
            worker.resume().unwrap();
            trail.lock().push("r2");
            ctx.suspend_self();
        }
    });
    root.join().unwrap();

    assert_eq!(*trail.lock(), vec!["w1", "r1", "w2", "r2"]);
}

#[test]
fn suspending_a_lower_task_keeps_it_off_the_cpu() {
    let rtos = rtos();
    let ran = Arc::new(AtomicBool::new(false));

    let low = Arc::new(Thread::from_fn(
        &rtos,
        TaskConfig::new("low", Priority::new(1), 256),
        {
            let ran = Arc::clone(&ran);
            move |ctx: &Ctx| {
                ran.store(true, Ordering::SeqCst);
                ctx.suspend_self();
            }
        },
    ));
    let root = Thread::from_fn(&rtos, TaskConfig::new("root", Priority::new(2), 256), {
        let low = Arc::clone(&low);
        move |ctx: &Ctx| {
            low.join().unwrap();
            low.suspend().unwrap();
            ctx.delay(Duration::from_millis(5));
            ctx.end_scheduler();
        }
    });
    root.join().unwrap();

    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(low.status(), TaskStatus::Suspended);
}

struct SetOnDrop(Arc<AtomicBool>);

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[test]
fn dropping_a_joined_task_deletes_it() {
    let port = SimPort::default();
    let rtos = Rtos::new(port.clone());
    let released = Arc::new(AtomicBool::new(false));

    let root = Thread::from_fn(&rtos, TaskConfig::new("root", Priority::new(1), 256), {
        let released = Arc::clone(&released);
        move |ctx: &Ctx| {
            let guard = SetOnDrop(Arc::clone(&released));
            let worker = Thread::from_fn(
                ctx.rtos(),
                TaskConfig::new("worker", Priority::new(2), 256),
                move |ctx: &Ctx| {
                    let _guard = &guard;
                    ctx.wait_for_value_forever();
                },
            );
            worker.join().unwrap();
            let handle = worker.handle().unwrap();
            assert_eq!(ctx.port().task_state(handle), Some(TaskState::Blocked));

            let before = ctx.rtos().arena().stats().used;
            drop(worker);
            assert_eq!(ctx.port().task_state(handle), Some(TaskState::Deleted));
            assert!(ctx.rtos().arena().stats().used < before);
            ctx.end_scheduler();
        }
    });
    root.join().unwrap();

    assert!(released.load(Ordering::SeqCst));
    assert_eq!(port.stats().deleted, 1);
}

#[test]
fn returning_from_run_halts_the_task() {
    let port = SimPort::default();
    let rtos = Rtos::new(port.clone());

    let quick = Arc::new(Thread::from_fn(
        &rtos,
        TaskConfig::new("quick", Priority::new(2), 256),
        |_ctx: &Ctx| {},
    ));
    let root = Thread::from_fn(&rtos, TaskConfig::new("root", Priority::new(1), 256), {
        let quick = Arc::clone(&quick);
        move |ctx: &Ctx| {
            quick.join().unwrap();
            assert_eq!(quick.status(), TaskStatus::Completed);
            let handle = quick.handle().unwrap();
            assert_eq!(ctx.port().task_state(handle), Some(TaskState::Halted));
            assert_eq!(quick.resume(), Ok(()));
            ctx.end_scheduler();
        }
    });
    root.join().unwrap();

    assert_eq!(port.stats().halted, 1);
}

#[test]
fn ending_the_scheduler_returns_to_the_caller_of_join() {
    let rtos = rtos();
    let after_end = Arc::new(AtomicBool::new(false));

    let root = Thread::from_fn(&rtos, TaskConfig::new("root", Priority::new(1), 256), {
        let after_end = Arc::clone(&after_end);
        move |ctx: &Ctx| {
            ctx.end_scheduler();
            after_end.store(true, Ordering::SeqCst);
        }
    });

    assert_eq!(root.join(), Ok(()));
    assert!(!after_end.load(Ordering::SeqCst));
    assert_eq!(rtos.port().scheduler_state(), SchedulerState::Stopped);
}

#[test]
fn the_kernel_refuses_small_stacks_and_idle_priority() {
    let rtos = rtos();

    let tiny = Thread::from_fn(&rtos, TaskConfig::new("tiny", Priority::new(1), 32), |_: &Ctx| {});
    assert_eq!(tiny.join(), Err(TaskError::CreationFailed));
    assert_eq!(tiny.status(), TaskStatus::CreationFailed);

    let idle = Thread::from_fn(&rtos, TaskConfig::new("idle", Priority::IDLE, 256), |_: &Ctx| {});
    assert_eq!(idle.join(), Err(TaskError::CreationFailed));

    assert_eq!(rtos.port().scheduler_state(), SchedulerState::NotStarted);
}

#[test]
fn the_kernel_enforces_its_task_limit() {
    let port = SimPort::new(SimConfig::builder().max_tasks(2).build()).unwrap();
    let rtos = Rtos::new(port);
    let outcome = Arc::new(Mutex::new(None));

    let root = Thread::from_fn(&rtos, TaskConfig::new("root", Priority::new(3), 256), {
        let outcome = Arc::clone(&outcome);
        move |ctx: &Ctx| {
            let first = Thread::from_fn(ctx.rtos(), TaskConfig::new("first", Priority::new(1), 256), |ctx: &Ctx| ctx.suspend_self());
            let second = Thread::from_fn(ctx.rtos(), TaskConfig::new("second", Priority::new(1), 256), |ctx: &Ctx| ctx.suspend_self());
            first.join().unwrap();
            *outcome.lock() = Some(second.join());
            ctx.end_scheduler();
        }
    });
    root.join().unwrap();

    assert_eq!(*outcome.lock(), Some(Err(TaskError::CreationFailed)));
}

#[test]
#[should_panic(expected = "boom")]
fn a_panicking_task_surfaces_on_the_joining_thread() {
    let rtos = rtos();
    let root = Thread::from_fn(&rtos, TaskConfig::new("root", Priority::new(1), 256), |_: &Ctx| {
        panic!("boom");
    });
    let _ = root.join();
}
