/// Fixed-capacity FIFO over a preallocated slot array. Pushing into a full
/// buffer evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be greater than zero");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
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

    /// Append `item`, returning the evicted oldest entry when full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let capacity = self.capacity();
        if self.len < capacity {
            let index = (self.head + self.len) % capacity;
            self.slots[index] = Some(item);
            self.len += 1;
            None
        } else {
            let evicted = self.slots[self.head].replace(item);
            self.head = (self.head + 1) % capacity;
            evicted
        }
    }

    /// Element `offset` positions back from the newest (0 = newest).
    pub fn from_end(&self, offset: usize) -> Option<&T> {
        if offset >= self.len {
            return None;
        }
        let index = (self.head + self.len - 1 - offset) % self.capacity();
        self.slots[index].as_ref()
    }

    pub fn latest(&self) -> Option<&T> {
        self.from_end(0)
    }

    /// Second-to-newest entry; `None` until two items have been pushed.
    pub fn previous(&self) -> Option<&T> {
        self.from_end(1)
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let capacity = self.capacity();
        (0..self.len).filter_map(move |i| self.slots[(self.head + i) % capacity].as_ref())
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_three_keeps_last_three() {
        let mut ring = RingBuffer::new(3);
        for frame in ["F1", "F2", "F3", "F4", "F5"] {
            ring.push(frame);
        }
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec!["F3", "F4", "F5"]);
        assert_eq!(ring.latest(), Some(&"F5"));
        assert_eq!(ring.previous(), Some(&"F4"));
    }

    #[test]
    fn length_tracks_min_of_pushes_and_capacity() {
        for capacity in 2..6 {
            let mut ring = RingBuffer::new(capacity);
            for pushed in 1..=capacity + 4 {
                ring.push(pushed);
                assert_eq!(ring.len(), pushed.min(capacity));
            }
            let expected: Vec<usize> = (5..=capacity + 4).collect();
            assert_eq!(ring.iter().copied().collect::<Vec<_>>(), expected);
        }
    }

    #[test]
    fn push_returns_evicted_oldest() {
        let mut ring = RingBuffer::new(2);
        assert_eq!(ring.push(1), None);
        assert_eq!(ring.push(2), None);
        assert_eq!(ring.push(3), Some(1));
        assert!(ring.is_full());
    }

    #[test]
    fn previous_requires_two_entries() {
        let mut ring = RingBuffer::new(4);
        assert!(ring.latest().is_none());
        ring.push('a');
        assert!(ring.previous().is_none());
        ring.push('b');
        assert_eq!(ring.previous(), Some(&'a'));
        ring.clear();
        assert!(ring.is_empty());
        assert!(ring.latest().is_none());
    }

    #[test]
    #[should_panic]
    fn zero_capacity_is_rejected() {
        let _ = RingBuffer::<u8>::new(0);
    }
}
