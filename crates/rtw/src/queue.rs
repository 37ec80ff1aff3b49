//! Bounded queues with fixed-size items.
//!
//! [`RawQueue`] moves byte slices of one fixed size; [`Queue`] layers a
//! typed interface on top for any plain-old-data `T`. Both reserve a control
//! block and `capacity * item_size` bytes of item storage from the arena and
//! give them back when dropped.
//!
//! Items are copied in and out by value. Every operation takes a timeout;
//! in interrupt context only a zero timeout is accepted, anything else is
//! refused with [`QueueError::Full`] or [`QueueError::Empty`] without
//! touching the queue.

use core::marker::PhantomData;
use core::time::Duration;

use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes};

use crate::arena::Region;
use crate::context;
use crate::error::QueueError;
use crate::port::{Port, QueueHandle, QueueSpec, SendPosition};
use crate::sync::Arc;
use crate::system::Rtos;
use crate::time::FOREVER;
use crate::trace;

/// Queue of fixed-size byte items.
pub struct RawQueue<P: Port> {
    rtos: Arc<Rtos<P>>,
    handle: QueueHandle,
    capacity: usize,
    item_size: usize,
    control_block: Option<Region>,
    storage: Option<Region>,
}

impl<P: Port> RawQueue<P> {
    pub fn new(rtos: &Arc<Rtos<P>>, capacity: usize, item_size: usize) -> Result<Self, QueueError> {
        if capacity == 0 || item_size == 0 {
            log::warn!("queue of {} x {} bytes refused", capacity, item_size);
            return Err(QueueError::CreationFailed);
        }
        let bytes = capacity
            .checked_mul(item_size)
            .ok_or(QueueError::CreationFailed)?;

        let arena = rtos.arena();
        let control_block = arena.acquire_control_block().map_err(|err| {
            rtos.trace(trace::ARENA_EXHAUSTED, &(err.requested as u32).to_le_bytes());
            err
        })?;
        let storage = match arena.acquire_bytes(bytes) {
            Ok(storage) => storage,
            Err(err) => {
                arena.release(control_block);
                rtos.trace(trace::ARENA_EXHAUSTED, &(err.requested as u32).to_le_bytes());
                return Err(err.into());
            }
        };

        let created = rtos.port().queue_create(QueueSpec {
            capacity,
            item_size,
            storage: &storage,
            control_block: &control_block,
        });
        let handle = match created {
            Some(handle) => handle,
            None => {
                arena.release(storage);
                arena.release(control_block);
                log::warn!("kernel refused a queue of {} x {} bytes", capacity, item_size);
                return Err(QueueError::CreationFailed);
            }
        };
        log::debug!("queue of {} x {} bytes created", capacity, item_size);

        Ok(Self {
            rtos: Arc::clone(rtos),
            handle,
            capacity,
            item_size,
            control_block: Some(control_block),
            storage: Some(storage),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn item_size(&self) -> usize {
        self.item_size
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.rtos.port().queue_len(self.handle)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn handle(&self) -> QueueHandle {
        self.handle
    }

    /// Appends `item`, waiting up to `timeout` for space.
    pub fn enqueue_back(&self, item: &[u8], timeout: Duration) -> Result<(), QueueError> {
        self.send(item, SendPosition::Back, timeout)
    }

    /// Inserts `item` ahead of everything queued, waiting up to `timeout`.
    pub fn enqueue_front(&self, item: &[u8], timeout: Duration) -> Result<(), QueueError> {
        self.send(item, SendPosition::Front, timeout)
    }

    pub fn enqueue_back_forever(&self, item: &[u8]) -> Result<(), QueueError> {
        self.send(item, SendPosition::Back, FOREVER)
    }

    pub fn enqueue_front_forever(&self, item: &[u8]) -> Result<(), QueueError> {
        self.send(item, SendPosition::Front, FOREVER)
    }

    /// Removes the oldest item into `out`, waiting up to `timeout`.
    pub fn dequeue(&self, out: &mut [u8], timeout: Duration) -> Result<(), QueueError> {
        self.check_size(out.len())?;
        let port = self.rtos.port();
        let handle = self.handle;
        let received = context::dispatch(
            port,
            timeout,
            out,
            |out, ticks| port.queue_receive(handle, out, ticks),
            |out, woken| port.queue_receive_from_isr(handle, out, woken),
            false,
        );
        self.trace(trace::QUEUE_RECEIVE, received);
        if received {
            Ok(())
        } else {
            Err(QueueError::Empty)
        }
    }

    pub fn dequeue_forever(&self, out: &mut [u8]) -> Result<(), QueueError> {
        self.dequeue(out, FOREVER)
    }

    /// Copies the oldest item into `out` without removing it.
    pub fn peek(&self, out: &mut [u8], timeout: Duration) -> Result<(), QueueError> {
        self.check_size(out.len())?;
        let port = self.rtos.port();
        let handle = self.handle;
        let copied = context::dispatch(
            port,
            timeout,
            out,
            |out, ticks| port.queue_peek(handle, out, ticks),
            |out, _| port.queue_peek_from_isr(handle, out),
            false,
        );
        if copied {
            Ok(())
        } else {
            Err(QueueError::Empty)
        }
    }

    pub fn peek_forever(&self, out: &mut [u8]) -> Result<(), QueueError> {
        self.peek(out, FOREVER)
    }

    fn send(&self, item: &[u8], position: SendPosition, timeout: Duration) -> Result<(), QueueError> {
        self.check_size(item.len())?;
        let port = self.rtos.port();
        let handle = self.handle;
        let sent = context::dispatch(
            port,
            timeout,
            item,
            |item, ticks| port.queue_send(handle, item, position, ticks),
            |item, woken| port.queue_send_from_isr(handle, item, position, woken),
            false,
        );
        self.trace(trace::QUEUE_SEND, sent);
        if sent {
            Ok(())
        } else {
            Err(QueueError::Full)
        }
    }

    fn check_size(&self, len: usize) -> Result<(), QueueError> {
        if len == self.item_size {
            Ok(())
        } else {
            Err(QueueError::ItemSize {
                expected: self.item_size,
                actual: len,
            })
        }
    }

    fn trace(&self, record: u8, accepted: bool) {
        if !self.rtos.tracing() {
            return;
        }
        let mut payload = [0u8; 5];
        payload[..2].copy_from_slice(&(self.capacity as u16).to_le_bytes());
        payload[2..4].copy_from_slice(&(self.len() as u16).to_le_bytes());
        payload[4] = accepted as u8;
        self.rtos.trace(record, &payload);
    }
}

impl<P: Port> Drop for RawQueue<P> {
    fn drop(&mut self) {
        self.rtos.port().queue_delete(self.handle);
        let arena = self.rtos.arena();
        if let Some(storage) = self.storage.take() {
            arena.release(storage);
        }
        if let Some(control_block) = self.control_block.take() {
            arena.release(control_block);
        }
    }
}

/// Queue of `T` values copied by value.
pub struct Queue<P: Port, T> {
    raw: RawQueue<P>,
    _item: PhantomData<fn(T) -> T>,
}

impl<P, T> Queue<P, T>
where
    P: Port,
    T: FromBytes + IntoBytes + Immutable,
{
    /// Creates a queue holding up to `capacity` items.
    pub fn new(rtos: &Arc<Rtos<P>>, capacity: usize) -> Result<Self, QueueError> {
        Ok(Self {
            raw: RawQueue::new(rtos, capacity, core::mem::size_of::<T>())?,
            _item: PhantomData,
        })
    }

    pub fn capacity(&self) -> usize {
        self.raw.capacity()
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.raw.is_full()
    }

    pub fn raw(&self) -> &RawQueue<P> {
        &self.raw
    }

    pub fn enqueue_back(&self, item: &T, timeout: Duration) -> Result<(), QueueError> {
        self.raw.enqueue_back(item.as_bytes(), timeout)
    }

    pub fn enqueue_front(&self, item: &T, timeout: Duration) -> Result<(), QueueError> {
        self.raw.enqueue_front(item.as_bytes(), timeout)
    }

    pub fn dequeue(&self, timeout: Duration) -> Result<T, QueueError> {
        let mut item = T::new_zeroed();
        self.raw.dequeue(item.as_mut_bytes(), timeout)?;
        Ok(item)
    }

    pub fn peek(&self, timeout: Duration) -> Result<T, QueueError> {
        let mut item = T::new_zeroed();
        self.raw.peek(item.as_mut_bytes(), timeout)?;
        Ok(item)
    }
}

/// Producer end of a queue.
pub trait QueueSender<T>: Send + Sync {
    fn enqueue_back(&self, item: &T, timeout: Duration) -> Result<(), QueueError>;
    fn enqueue_front(&self, item: &T, timeout: Duration) -> Result<(), QueueError>;

    fn enqueue_back_forever(&self, item: &T) -> Result<(), QueueError> {
        self.enqueue_back(item, FOREVER)
    }

    fn enqueue_front_forever(&self, item: &T) -> Result<(), QueueError> {
        self.enqueue_front(item, FOREVER)
    }
}

/// Consumer end of a queue.
pub trait QueueReceiver<T>: Send + Sync {
    fn dequeue(&self, timeout: Duration) -> Result<T, QueueError>;
    fn peek(&self, timeout: Duration) -> Result<T, QueueError>;

    fn dequeue_forever(&self) -> Result<T, QueueError> {
        self.dequeue(FOREVER)
    }

    fn peek_forever(&self) -> Result<T, QueueError> {
        self.peek(FOREVER)
    }
}

impl<P, T> QueueSender<T> for Queue<P, T>
where
    P: Port,
    T: FromBytes + IntoBytes + Immutable,
{
    fn enqueue_back(&self, item: &T, timeout: Duration) -> Result<(), QueueError> {
        Queue::enqueue_back(self, item, timeout)
    }

    fn enqueue_front(&self, item: &T, timeout: Duration) -> Result<(), QueueError> {
        Queue::enqueue_front(self, item, timeout)
    }
}

impl<P, T> QueueReceiver<T> for Queue<P, T>
where
    P: Port,
    T: FromBytes + IntoBytes + Immutable,
{
    fn dequeue(&self, timeout: Duration) -> Result<T, QueueError> {
        Queue::dequeue(self, timeout)
    }

    fn peek(&self, timeout: Duration) -> Result<T, QueueError> {
        Queue::peek(self, timeout)
    }
}
