//! Item storage of a simulated queue.

use std::ops::Range;

use rtw::port::SendPosition;

/// Fixed-capacity ring of equally sized items in one flat buffer.
pub(crate) struct Ring {
    buf: Vec<u8>,
    item_size: usize,
    capacity: usize,
    head: usize,
    len: usize,
}

impl Ring {
    pub(crate) fn new(capacity: usize, item_size: usize) -> Self {
        Self {
            buf: vec![0; capacity * item_size],
            item_size,
            capacity,
            head: 0,
            len: 0,
        }
    }

    pub(crate) fn item_size(&self) -> usize {
        self.item_size
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    pub(crate) fn push(&mut self, item: &[u8], position: SendPosition) -> bool {
        if self.is_full() || item.len() != self.item_size {
            return false;
        }
        let index = match position {
            SendPosition::Back => (self.head + self.len) % self.capacity,
            SendPosition::Front => {
                self.head = (self.head + self.capacity - 1) % self.capacity;
                self.head
            }
        };
        let slot = self.slot(index);
        self.buf[slot].copy_from_slice(item);
        self.len += 1;
        true
    }

    pub(crate) fn pop(&mut self, out: &mut [u8]) -> bool {
        if !self.peek(out) {
            return false;
        }
        self.head = (self.head + 1) % self.capacity;
        self.len -= 1;
        true
    }

    pub(crate) fn peek(&self, out: &mut [u8]) -> bool {
        if self.len == 0 || out.len() != self.item_size {
            return false;
        }
        out.copy_from_slice(&self.buf[self.slot(self.head)]);
        true
    }

    fn slot(&self, index: usize) -> Range<usize> {
        let start = index * self.item_size;
        start..start + self.item_size
    }
}
