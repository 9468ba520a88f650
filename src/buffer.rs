//! Bounded FIFO buffer and the overflow strategies shared by buffering sources.

use std::collections::VecDeque;
use std::fmt;

/// What a buffering stage does when an element arrives and the buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OverflowStrategy {
    /// Drop the oldest buffered element to make room
    DropHead,
    /// Drop the newest buffered element to make room
    DropTail,
    /// Drop every buffered element to make room
    DropBuffer,
    /// Drop the incoming element
    DropNew,
    /// Fail the stage with [`Error::BufferOverflow`](crate::Error::BufferOverflow)
    Fail,
    /// Hold the incoming element back until the buffer has room
    Backpressure,
}

impl fmt::Display for OverflowStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OverflowStrategy::DropHead => "drop-head",
            OverflowStrategy::DropTail => "drop-tail",
            OverflowStrategy::DropBuffer => "drop-buffer",
            OverflowStrategy::DropNew => "drop-new",
            OverflowStrategy::Fail => "fail",
            OverflowStrategy::Backpressure => "backpressure",
        };
        f.write_str(name)
    }
}

/// How an element made it into a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EnqueueKind {
    /// There was room, nothing was dropped
    Plain,
    /// The oldest element was dropped first
    DroppedHead,
    /// The newest element was dropped first
    DroppedTail,
    /// The whole buffer was cleared first
    DroppedBuffer,
}

/// Outcome of [`Buffer::admit`].
#[derive(Debug, PartialEq, Eq)]
pub enum Admission<T> {
    /// The element is in the buffer
    Enqueued(EnqueueKind),
    /// The element was discarded
    Dropped(T),
    /// The buffer is full and the strategy is `Fail`
    Overflow(T),
    /// The buffer is full and the strategy is `Backpressure`; the caller keeps the element
    Backpressured(T),
}

/// A bounded FIFO buffer exclusively owned by one stage.
pub struct Buffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> Buffer<T> {
    /// Create an empty buffer holding at most `capacity` elements
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Maximum number of elements
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffered elements
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the buffer holds no elements
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether one more element would exceed the capacity
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Append an element, ignoring capacity.
    ///
    /// Callers check [`is_full`](Self::is_full) first or go through [`admit`](Self::admit).
    pub fn enqueue(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Remove and return the oldest element
    pub fn dequeue(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Remove and return the oldest element
    pub fn drop_head(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Remove and return the newest element
    pub fn drop_tail(&mut self) -> Option<T> {
        self.items.pop_back()
    }

    /// Remove every element
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Iterate over the buffered elements, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Insert `item`, applying `strategy` when the buffer is full.
    ///
    /// The buffer never grows past its capacity: with a capacity of zero the
    /// drop strategies have nothing to make room from and discard the element.
    pub fn admit(&mut self, item: T, strategy: OverflowStrategy) -> Admission<T> {
        if !self.is_full() {
            self.enqueue(item);
            return Admission::Enqueued(EnqueueKind::Plain);
        }

        match strategy {
            OverflowStrategy::DropHead | OverflowStrategy::DropTail | OverflowStrategy::DropBuffer
                if self.capacity == 0 =>
            {
                Admission::Dropped(item)
            }
            OverflowStrategy::DropHead => {
                self.drop_head();
                self.enqueue(item);
                Admission::Enqueued(EnqueueKind::DroppedHead)
            }
            OverflowStrategy::DropTail => {
                self.drop_tail();
                self.enqueue(item);
                Admission::Enqueued(EnqueueKind::DroppedTail)
            }
            OverflowStrategy::DropBuffer => {
                self.clear();
                self.enqueue(item);
                Admission::Enqueued(EnqueueKind::DroppedBuffer)
            }
            OverflowStrategy::DropNew => Admission::Dropped(item),
            OverflowStrategy::Fail => Admission::Overflow(item),
            OverflowStrategy::Backpressure => Admission::Backpressured(item),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("items", &self.items)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(buffer: &Buffer<i32>) -> Vec<i32> {
        buffer.iter().copied().collect()
    }

    #[test]
    fn test_fifo_order() {
        let mut buffer = Buffer::new(3);
        buffer.enqueue(1);
        buffer.enqueue(2);
        assert_eq!(buffer.dequeue(), Some(1));
        assert_eq!(buffer.dequeue(), Some(2));
        assert_eq!(buffer.dequeue(), None);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drop_head_keeps_newest() {
        let mut buffer = Buffer::new(2);
        assert_eq!(buffer.admit(1, OverflowStrategy::DropHead), Admission::Enqueued(EnqueueKind::Plain));
        assert_eq!(buffer.admit(2, OverflowStrategy::DropHead), Admission::Enqueued(EnqueueKind::Plain));
        assert_eq!(
            buffer.admit(3, OverflowStrategy::DropHead),
            Admission::Enqueued(EnqueueKind::DroppedHead)
        );
        assert_eq!(contents(&buffer), vec![2, 3]);
    }

    #[test]
    fn test_drop_tail_replaces_newest() {
        let mut buffer = Buffer::new(2);
        buffer.admit(1, OverflowStrategy::DropTail);
        buffer.admit(2, OverflowStrategy::DropTail);
        assert_eq!(
            buffer.admit(3, OverflowStrategy::DropTail),
            Admission::Enqueued(EnqueueKind::DroppedTail)
        );
        assert_eq!(contents(&buffer), vec![1, 3]);
    }

    #[test]
    fn test_drop_buffer_clears() {
        let mut buffer = Buffer::new(3);
        for i in 1..=3 {
            buffer.admit(i, OverflowStrategy::DropBuffer);
        }
        assert_eq!(
            buffer.admit(4, OverflowStrategy::DropBuffer),
            Admission::Enqueued(EnqueueKind::DroppedBuffer)
        );
        assert_eq!(contents(&buffer), vec![4]);
    }

    #[test]
    fn test_drop_new_fail_and_backpressure_hand_element_back() {
        let mut buffer = Buffer::new(1);
        buffer.admit(1, OverflowStrategy::DropNew);
        assert_eq!(buffer.admit(2, OverflowStrategy::DropNew), Admission::Dropped(2));
        assert_eq!(buffer.admit(3, OverflowStrategy::Fail), Admission::Overflow(3));
        assert_eq!(buffer.admit(4, OverflowStrategy::Backpressure), Admission::Backpressured(4));
        assert_eq!(contents(&buffer), vec![1]);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let strategies = [
            OverflowStrategy::DropHead,
            OverflowStrategy::DropTail,
            OverflowStrategy::DropBuffer,
            OverflowStrategy::DropNew,
        ];
        for capacity in 0..4 {
            for strategy in strategies {
                let mut buffer = Buffer::new(capacity);
                for i in 0..10 {
                    buffer.admit(i, strategy);
                    assert!(buffer.len() <= capacity, "{strategy} exceeded {capacity}");
                }
            }
        }
    }
}
