//! Fixed-capacity ring buffer over a heap-allocated backing slice.
//!
//! Used for small bounded queues (device byte streams, debug log scratch
//! space) where an unbounded `VecDeque` would be overkill and the capacity
//! is known up front.

use alloc::vec::Vec;

pub struct RingBuffer<T> {
    buf: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut buf = Vec::with_capacity(capacity);
        buf.resize_with(capacity, || None);
        Self { buf, head: 0, len: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Push an item, overwriting the oldest one if the buffer is full.
    pub fn push_overwrite(&mut self, value: T) {
        let cap = self.capacity();
        let tail = (self.head + self.len) % cap;
        self.buf[tail] = Some(value);
        if self.len == cap {
            self.head = (self.head + 1) % cap;
        } else {
            self.len += 1;
        }
    }

    /// Push an item, failing if the buffer is full.
    pub fn push(&mut self, value: T) -> Result<(), T> {
        if self.is_full() {
            return Err(value);
        }
        let cap = self.capacity();
        let tail = (self.head + self.len) % cap;
        self.buf[tail] = Some(value);
        self.len += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let cap = self.capacity();
        let value = self.buf[self.head].take();
        self.head = (self.head + 1) % cap;
        self.len -= 1;
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut rb = RingBuffer::with_capacity(3);
        rb.push(1).unwrap();
        rb.push(2).unwrap();
        assert_eq!(rb.pop(), Some(1));
        rb.push(3).unwrap();
        rb.push(4).unwrap();
        assert_eq!(rb.pop(), Some(2));
        assert_eq!(rb.pop(), Some(3));
        assert_eq!(rb.pop(), Some(4));
        assert_eq!(rb.pop(), None);
    }

    #[test]
    fn overwrite_when_full() {
        let mut rb = RingBuffer::with_capacity(2);
        rb.push_overwrite(1);
        rb.push_overwrite(2);
        rb.push_overwrite(3);
        assert_eq!(rb.pop(), Some(2));
        assert_eq!(rb.pop(), Some(3));
    }

    #[test]
    fn push_fails_when_full() {
        let mut rb = RingBuffer::with_capacity(1);
        assert!(rb.push(1).is_ok());
        assert_eq!(rb.push(2), Err(2));
    }
}
