//! Error types shared by the task, notification, queue and arena layers.

use core::fmt;

use crate::task::TaskStatus;

/// The arena could not satisfy a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationFailed {
    /// Bytes asked for, after alignment rounding.
    pub requested: usize,
    /// Largest contiguous free span at the time of the request.
    pub largest_free: usize,
}

impl fmt::Display for AllocationFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arena exhausted: requested {} bytes, largest free span {} bytes",
            self.requested, self.largest_free
        )
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AllocationFailed {}

#[cfg(feature = "defmt")]
impl defmt::Format for AllocationFailed {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "AllocationFailed{{ requested: {}, largest_free: {} }}",
            self.requested,
            self.largest_free
        );
    }
}

/// Lifecycle failures reported by [`crate::task::Thread`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskError {
    /// Control block or stack could not be reserved at construction.
    MemoryAllocationFailed,
    /// The kernel refused to register the task.
    CreationFailed,
    /// `join` is only valid on a task that has not been started.
    NotJoinable(TaskStatus),
    /// The requested transition is not defined from the current status.
    InvalidState(TaskStatus),
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MemoryAllocationFailed => write!(f, "task memory could not be reserved"),
            Self::CreationFailed => write!(f, "kernel rejected task creation"),
            Self::NotJoinable(status) => write!(f, "task cannot be joined while {:?}", status),
            Self::InvalidState(status) => write!(f, "operation not valid while {:?}", status),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TaskError {}

/// Failures of the sending side of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyError {
    /// The previous value has not been consumed yet.
    Pending,
    /// The target has no kernel identity or the kernel refused the action.
    Rejected,
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "previous notification value not yet consumed"),
            Self::Rejected => write!(f, "notification rejected"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for NotifyError {}

/// Failures of the bounded queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// No space became available before the timeout.
    Full,
    /// No item became available before the timeout.
    Empty,
    /// Control block or item storage could not be reserved.
    Allocation(AllocationFailed),
    /// The kernel refused to create the queue.
    CreationFailed,
    /// A raw item did not match the queue's fixed item size.
    ItemSize { expected: usize, actual: usize },
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "queue is full"),
            Self::Empty => write!(f, "queue is empty"),
            Self::Allocation(err) => write!(f, "queue storage: {}", err),
            Self::CreationFailed => write!(f, "kernel rejected queue creation"),
            Self::ItemSize { expected, actual } => {
                write!(f, "item is {} bytes, queue holds {} byte items", actual, expected)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for QueueError {}

impl From<AllocationFailed> for QueueError {
    fn from(err: AllocationFailed) -> Self {
        Self::Allocation(err)
    }
}

/// Failures of [`crate::mutex::RtosMutex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexError {
    /// The kernel could not create the mutex.
    CreationFailed,
    /// The mutex was not acquired before the timeout.
    Timeout,
    /// Unlock by a task that does not hold the mutex, or use after removal.
    InvalidOperation,
    /// Blocking exclusion is not available in interrupt context.
    InterruptContext,
}

impl fmt::Display for MutexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreationFailed => write!(f, "kernel rejected mutex creation"),
            Self::Timeout => write!(f, "mutex lock timed out"),
            Self::InvalidOperation => write!(f, "invalid mutex operation"),
            Self::InterruptContext => write!(f, "mutex used from interrupt context"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for MutexError {}
