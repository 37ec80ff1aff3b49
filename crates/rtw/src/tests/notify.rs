use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::mock::{rtos, Call, MockPort};
use crate::error::NotifyError;
use crate::notify::{sig_bit, NotifyAction, NotifyValue, Signal, SignalOutcome, SignalWaiter};
use crate::system::Rtos;
use crate::task::{Lifecycle, Priority, TaskConfig, TaskContext, Thread};
use crate::time::MAX_DELAY;

fn joined<F>(rtos: &Arc<Rtos<MockPort>>, body: F) -> Thread<MockPort>
where
    F: FnMut(&TaskContext<MockPort>) + Send + 'static,
{
    rtos.port().set_running();
    let task = Thread::from_fn(rtos, TaskConfig::new("rx", Priority::new(2), 128), body);
    task.join().unwrap();
    rtos.port().clear_calls();
    task
}

#[test]
fn sig_bit_sets_single_bit() {
    assert_eq!(sig_bit(0), 1);
    assert_eq!(sig_bit(12), 0x1000);
    assert_eq!(sig_bit(12) | sig_bit(13), 0x3000);
    assert_eq!(sig_bit(31), 0x8000_0000);
    assert_eq!(sig_bit(32), 0);
    assert_eq!(sig_bit(u32::MAX), 0);
}

#[test]
fn sends_to_unjoined_task_are_refused() {
    let rtos = rtos();
    let task = Thread::from_fn(&rtos, TaskConfig::new("idle", Priority::new(1), 64), |_| {});

    task.signal_on_bits(sig_bit(3));
    task.send_value_with_overwrite(5);
    assert_eq!(task.send_value_without_overwrite(5), Err(NotifyError::Rejected));
    assert_eq!(task.notify(1, NotifyAction::Increment), Err(NotifyError::Rejected));
    assert!(rtos.port().calls().is_empty());
}

#[test]
fn second_value_without_overwrite_is_pending() {
    let rtos = rtos();
    let task = joined(&rtos, |_| {});
    let handle = task.handle().unwrap();

    assert_eq!(task.send_value_without_overwrite(0xf0ff_0fff), Ok(()));
    assert_eq!(
        task.send_value_without_overwrite(0x1234),
        Err(NotifyError::Pending)
    );
    assert_eq!(rtos.port().task_value(handle), (0xf0ff_0fff, true));

    task.send_value_with_overwrite(0x1234);
    assert_eq!(rtos.port().task_value(handle), (0x1234, true));
}

#[test]
fn interrupt_send_yields_only_when_woken() {
    let rtos = rtos();
    let task = joined(&rtos, |_| {});
    let raw = task.handle().unwrap().raw().get();

    rtos.port().set_in_isr(true);
    rtos.port().set_isr_woken(true);
    task.signal_on_bits(sig_bit(12));
    assert_eq!(
        rtos.port().calls(),
        vec![
            Call::NotifyFromIsr(raw, NotifyAction::SetBits, 0x1000),
            Call::YieldFromIsr
        ]
    );

    rtos.port().clear_calls();
    rtos.port().set_isr_woken(false);
    task.send_value_with_overwrite(9);
    assert_eq!(
        rtos.port().calls(),
        vec![Call::NotifyFromIsr(
            raw,
            NotifyAction::SetValueWithOverwrite,
            9
        )]
    );
}

#[test]
fn bit_wait_outcomes() {
    let rtos = rtos();
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&outcomes);
    let mask = sig_bit(12) | sig_bit(13);

    let task = joined(&rtos, move |ctx| {
        let mut out = sink.lock().unwrap();
        out.push(ctx.wait_for_signal_on_bits(mask, Duration::from_millis(700)));
    });
    let handle = task.handle().unwrap();

    rtos.port().deliver(handle, mask);
    rtos.port().run_task(handle);
    assert_eq!(outcomes.lock().unwrap().as_slice(), &[SignalOutcome::ExpectedReceived]);
    assert_eq!(rtos.port().task_value(handle), (0, false));
    assert!(rtos.port().calls().contains(&Call::NotifyWait(700)));
}

#[test]
fn partial_bits_and_silence() {
    let mask = sig_bit(12) | sig_bit(13);

    for (delivered, expected) in [
        (Some(sig_bit(12)), SignalOutcome::UnexpectedReceived),
        (None, SignalOutcome::TimedOut),
    ] {
        let rtos = rtos();
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&outcomes);
        let task = joined(&rtos, move |ctx| {
            let outcome = ctx.wait_for_signal_on_bits(mask, Duration::from_millis(10));
            sink.lock().unwrap().push(outcome);
        });
        let handle = task.handle().unwrap();
        if let Some(bits) = delivered {
            rtos.port().deliver(handle, bits);
        }
        rtos.port().run_task(handle);
        assert_eq!(outcomes.lock().unwrap().as_slice(), &[expected]);
    }
}

#[test]
fn value_wait_reads_and_clears_word() {
    let rtos = rtos();
    let values = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&values);
    let task = joined(&rtos, move |ctx| {
        sink.lock().unwrap().push(ctx.wait_for_value_forever());
    });
    let handle = task.handle().unwrap();

    task.send_value_without_overwrite(0xf0ff_0fff).unwrap();
    rtos.port().run_task(handle);

    assert_eq!(
        values.lock().unwrap().as_slice(),
        &[NotifyValue {
            timed_out: false,
            value: 0xf0ff_0fff
        }]
    );
    assert_eq!(rtos.port().task_value(handle), (0, false));
    assert!(rtos.port().calls().contains(&Call::NotifyWait(MAX_DELAY)));

    task.send_value_without_overwrite(7).unwrap();
    assert_eq!(rtos.port().task_value(handle), (7, true));
}

#[test]
fn wait_in_interrupt_context_times_out_without_kernel_call() {
    let rtos = rtos();
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&outcomes);
    let port_flag = Arc::clone(&rtos);
    let task = joined(&rtos, move |ctx| {
        port_flag.port().set_in_isr(true);
        sink
            .lock()
            .unwrap()
            .push(ctx.wait_for_signal_on_bits(1, Duration::from_millis(5)));
        port_flag.port().set_in_isr(false);
    });
    let handle = task.handle().unwrap();
    rtos.port().deliver(handle, 1);

    rtos.port().run_task(handle);

    assert_eq!(outcomes.lock().unwrap().as_slice(), &[SignalOutcome::TimedOut]);
    assert!(!rtos
        .port()
        .calls()
        .iter()
        .any(|c| matches!(c, Call::NotifyWait(_))));
}
