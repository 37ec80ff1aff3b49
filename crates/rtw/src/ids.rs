//! Task identities.

use core::cell::Cell;
use core::fmt;

use critical_section::Mutex;

/// Application-visible task identity. Zero means "not assigned".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskId(u16);

impl TaskId {
    pub const UNASSIGNED: TaskId = TaskId(0);

    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn is_assigned(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Issues task identities from one serialized counter.
///
/// The counter advances once for every task that is constructed, whether or
/// not the caller supplied its own identity.
pub struct IdRegistry {
    counter: Mutex<Cell<u16>>,
}

impl IdRegistry {
    pub const fn new() -> Self {
        Self {
            counter: Mutex::new(Cell::new(0)),
        }
    }

    /// Advances the counter and returns the identity for a new task.
    ///
    /// An assigned `explicit` identity takes precedence over the counter value.
    pub fn issue(&self, explicit: Option<TaskId>) -> TaskId {
        let fresh = critical_section::with(|cs| {
            let counter = self.counter.borrow(cs);
            let mut next = counter.get().wrapping_add(1);
            if next == 0 {
                next = 1;
            }
            counter.set(next);
            next
        });
        match explicit {
            Some(id) if id.is_assigned() => id,
            _ => TaskId(fresh),
        }
    }

    /// The last counter value handed out.
    pub fn last_issued(&self) -> u16 {
        critical_section::with(|cs| self.counter.borrow(cs).get())
    }
}

impl Default for IdRegistry {
    fn default() -> Self {
        Self::new()
    }
}
