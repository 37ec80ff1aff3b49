//! A sender posts three messages to a typed queue and suspends; the
//! receiver prints them and ends the run.

use std::sync::Arc;

use rtw::{
    Lifecycle, Priority, Queue, QueueReceiver, QueueSender, Runnable, TaskConfig, TaskContext,
    Thread,
};
use rtw_port_sim::{SimConfig, SimPort};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct Message {
    id: u8,
    name: [u8; 12],
}

impl Message {
    fn new(id: u8, name: &str) -> Self {
        let mut text = [0u8; 12];
        let len = name.len().min(text.len() - 1);
        text[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self { id, name: text }
    }

    fn name(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        std::str::from_utf8(&self.name[..end]).unwrap_or("<invalid>")
    }
}

struct Receiver {
    queue: Arc<dyn QueueReceiver<Message>>,
}

impl Runnable<SimPort> for Receiver {
    fn run(&mut self, ctx: &TaskContext<SimPort>) {
        for _ in 0..3 {
            match self.queue.dequeue_forever() {
                Ok(message) => log::info!("message {}: {}", message.id, message.name()),
                Err(err) => log::error!("dequeue failed: {err}"),
            }
        }
        ctx.end_scheduler();
    }
}

struct Sender {
    queue: Arc<dyn QueueSender<Message>>,
    receiver: Arc<Thread<SimPort>>,
}

impl Runnable<SimPort> for Sender {
    fn run(&mut self, ctx: &TaskContext<SimPort>) {
        if let Err(err) = self.receiver.join() {
            log::error!("receiver failed to start: {err}");
            ctx.end_scheduler();
            return;
        }
        let messages = [
            Message::new(1, "Hello"),
            Message::new(2, "Hello w"),
            Message::new(3, "Hello wo"),
        ];
        loop {
            for message in &messages {
                if let Err(err) = self.queue.enqueue_back_forever(message) {
                    log::error!("enqueue failed: {err}");
                }
            }
            ctx.suspend_self();
        }
    }
}

fn main() -> anyhow::Result<()> {
    rtw_demos::init_logging();
    let rtos = rtw_demos::simulated("queue-post", SimConfig::default())?;

    let queue: Arc<Queue<SimPort, Message>> = Arc::new(Queue::new(&rtos, 10)?);
    let receiver = Arc::new(Thread::new(
        &rtos,
        TaskConfig::new("RcvThr", Priority::new(1), 100),
        Receiver { queue: queue.clone() },
    ));
    let sender = Thread::new(
        &rtos,
        TaskConfig::new("SndThr", Priority::new(1), 100),
        Sender { queue, receiver },
    );
    sender.join()?;
    Ok(())
}
