//! Binary trace records for lifecycle, notification and queue events.
//!
//! A [`TraceHook`] receives a record id, a little-endian payload and whether
//! the backend should timestamp the frame.

use crate::sync::Arc;

pub type TraceError = core::convert::Infallible;

pub type TraceResult = Result<(), TraceError>;

pub type TraceHook = Arc<dyn Fn(u8, &[u8], bool) -> TraceResult + Send + Sync>;

/// Task registered with the kernel: `[id: u16, priority: u8]`.
pub const TASK_CREATE: u8 = 70;
/// Task removed from the kernel: `[id: u16]`.
pub const TASK_DELETE: u8 = 71;
/// Task suspended: `[id: u16]`.
pub const TASK_SUSPEND: u8 = 72;
/// Task resumed: `[id: u16]`.
pub const TASK_RESUME: u8 = 73;
/// Notification sent: `[id: u16, action: u8, value: u32, accepted: u8]`.
pub const NOTIFY: u8 = 74;
/// Item enqueued: `[capacity: u16, len: u16, accepted: u8]`.
pub const QUEUE_SEND: u8 = 75;
/// Item dequeued: `[capacity: u16, len: u16, accepted: u8]`.
pub const QUEUE_RECEIVE: u8 = 76;
/// Arena request refused: `[requested: u32]`.
pub const ARENA_EXHAUSTED: u8 = 77;
