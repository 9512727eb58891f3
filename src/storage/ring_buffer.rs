use managed::ManagedSlice;

use crate::storage::{Empty, Full};

/// A ring buffer.
///
/// Alongside the usual FIFO enqueue/dequeue operations, the buffer gives
/// random access to both of its regions: `read_allocated` addresses bytes
/// that are queued but not yet consumed, and `write_unallocated` fills
/// bytes ahead of the queue tail before they are committed with
/// `enqueue_unallocated`. The TCP engine maps sequence-number arithmetic
/// directly onto these offsets, which is what keeps the retransmission
/// queue free of payload copies.
#[derive(Debug)]
pub struct RingBuffer<'a, T: 'a> {
    storage: ManagedSlice<'a, T>,
    read_at: usize,
    length: usize,
}

impl<'a, T: 'a> RingBuffer<'a, T> {
    /// Create a ring buffer with the given storage.
    ///
    /// During creation, every element in `storage` is reset.
    pub fn new<S>(storage: S) -> RingBuffer<'a, T>
    where
        S: Into<ManagedSlice<'a, T>>,
    {
        RingBuffer {
            storage: storage.into(),
            read_at: 0,
            length: 0,
        }
    }

    /// Clear the ring buffer.
    pub fn clear(&mut self) {
        self.read_at = 0;
        self.length = 0;
    }

    /// Return the maximum number of elements in the ring buffer.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Return the current number of elements in the ring buffer.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Return the number of elements that can be added to the ring buffer.
    pub fn window(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Query whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Query whether the buffer is full.
    pub fn is_full(&self) -> bool {
        self.window() == 0
    }

    fn get_idx(&self, idx: usize) -> usize {
        let len = self.capacity();
        if len > 0 {
            (self.read_at + idx) % len
        } else {
            0
        }
    }
}

/// This is the "continuous" ring buffer interface: it operates with element
/// slices, and boundary conditions are handled by copying in two runs.
impl<'a, T: Copy + 'a> RingBuffer<'a, T> {
    /// Enqueue a single element and return a reference to it.
    pub fn enqueue_one(&mut self) -> Result<&mut T, Full> {
        if self.is_full() {
            return Err(Full);
        }
        let index = self.get_idx(self.length);
        self.length += 1;
        Ok(&mut self.storage[index])
    }

    /// Dequeue a single element.
    pub fn dequeue_one(&mut self) -> Result<T, Empty> {
        if self.is_empty() {
            return Err(Empty);
        }
        let index = self.read_at;
        self.length -= 1;
        self.read_at = self.get_idx(1);
        Ok(self.storage[index])
    }

    /// Enqueue as many elements from the given slice as fit, and return the
    /// number enqueued.
    pub fn enqueue_slice(&mut self, data: &[T]) -> usize {
        let count = data.len().min(self.window());
        for (i, element) in data[..count].iter().enumerate() {
            let index = self.get_idx(self.length + i);
            self.storage[index] = *element;
        }
        self.length += count;
        count
    }

    /// Dequeue as many elements as fit into the given slice, and return the
    /// number dequeued.
    pub fn dequeue_slice(&mut self, data: &mut [T]) -> usize {
        let count = data.len().min(self.len());
        for (i, element) in data[..count].iter_mut().enumerate() {
            *element = self.storage[self.get_idx(i)];
        }
        self.read_at = self.get_idx(count);
        self.length -= count;
        count
    }
}

/// This is the random-access interface: it operates at an offset from the
/// queue head or tail without consuming elements.
impl<'a, T: Copy + 'a> RingBuffer<'a, T> {
    /// Write elements into the unallocated region starting `offset`
    /// elements past the queue tail, and return the number written.
    ///
    /// The written elements stay unallocated until committed with
    /// [RingBuffer::enqueue_unallocated].
    pub fn write_unallocated(&mut self, offset: usize, data: &[T]) -> usize {
        if offset >= self.window() {
            return 0;
        }
        let count = data.len().min(self.window() - offset);
        for (i, element) in data[..count].iter().enumerate() {
            let index = self.get_idx(self.length + offset + i);
            self.storage[index] = *element;
        }
        count
    }

    /// Commit `count` elements previously written with
    /// [RingBuffer::write_unallocated] into the allocated region.
    pub fn enqueue_unallocated(&mut self, count: usize) {
        assert!(count <= self.window(), "commit past the buffer window");
        self.length += count;
    }

    /// Read elements from the allocated region starting `offset` elements
    /// past the queue head, without dequeuing them. Returns the number
    /// read.
    pub fn read_allocated(&self, offset: usize, data: &mut [T]) -> usize {
        if offset >= self.len() {
            return 0;
        }
        let count = data.len().min(self.len() - offset);
        for (i, element) in data[..count].iter_mut().enumerate() {
            *element = self.storage[self.get_idx(offset + i)];
        }
        count
    }

    /// Drop `count` elements from the front of the allocated region.
    pub fn dequeue_allocated(&mut self, count: usize) {
        assert!(count <= self.len(), "dequeue past the buffer length");
        self.read_at = self.get_idx(count);
        self.length -= count;
    }
}

impl<'a, T: Copy + 'a> From<ManagedSlice<'a, T>> for RingBuffer<'a, T> {
    fn from(slice: ManagedSlice<'a, T>) -> RingBuffer<'a, T> {
        RingBuffer::new(slice)
    }
}

impl<'a> From<Vec<u8>> for RingBuffer<'a, u8> {
    fn from(vec: Vec<u8>) -> RingBuffer<'a, u8> {
        RingBuffer::new(vec)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn enqueue_dequeue_slice() {
        let mut ring: RingBuffer<u8> = RingBuffer::new(vec![0; 8]);
        assert_eq!(ring.capacity(), 8);
        assert!(ring.is_empty());

        assert_eq!(ring.enqueue_slice(b"abcdef"), 6);
        assert_eq!(ring.len(), 6);
        assert_eq!(ring.window(), 2);

        let mut buf = [0; 4];
        assert_eq!(ring.dequeue_slice(&mut buf), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(ring.len(), 2);

        // wrap around the storage boundary
        assert_eq!(ring.enqueue_slice(b"ghijkl"), 6);
        assert!(ring.is_full());
        let mut buf = [0; 8];
        assert_eq!(ring.dequeue_slice(&mut buf), 8);
        assert_eq!(&buf, b"efghijkl");
        assert!(ring.is_empty());
    }

    #[test]
    fn enqueue_slice_beyond_window() {
        let mut ring: RingBuffer<u8> = RingBuffer::new(vec![0; 4]);
        assert_eq!(ring.enqueue_slice(b"abcdef"), 4);
        let mut buf = [0; 6];
        assert_eq!(ring.dequeue_slice(&mut buf), 4);
        assert_eq!(&buf[..4], b"abcd");
    }

    #[test]
    fn random_access_unallocated() {
        let mut ring: RingBuffer<u8> = RingBuffer::new(vec![0; 8]);
        assert_eq!(ring.enqueue_slice(b"ab"), 2);

        // write out of order: offset 2 first, then offset 0
        assert_eq!(ring.write_unallocated(2, b"ef"), 2);
        assert_eq!(ring.write_unallocated(0, b"cd"), 2);
        ring.enqueue_unallocated(4);
        assert_eq!(ring.len(), 6);

        let mut buf = [0; 6];
        assert_eq!(ring.dequeue_slice(&mut buf), 6);
        assert_eq!(&buf, b"abcdef");
    }

    #[test]
    fn write_unallocated_past_window() {
        let mut ring: RingBuffer<u8> = RingBuffer::new(vec![0; 4]);
        ring.enqueue_slice(b"ab");
        assert_eq!(ring.write_unallocated(1, b"xyz"), 1);
        assert_eq!(ring.write_unallocated(2, b"xyz"), 0);
    }

    #[test]
    fn random_access_allocated() {
        let mut ring: RingBuffer<u8> = RingBuffer::new(vec![0; 8]);
        ring.enqueue_slice(b"abcdef");

        let mut buf = [0; 2];
        assert_eq!(ring.read_allocated(2, &mut buf), 2);
        assert_eq!(&buf, b"cd");
        // reading does not consume
        assert_eq!(ring.len(), 6);

        ring.dequeue_allocated(3);
        assert_eq!(ring.len(), 3);
        let mut buf = [0; 3];
        assert_eq!(ring.read_allocated(0, &mut buf), 3);
        assert_eq!(&buf, b"def");
    }

    #[test]
    fn read_allocated_past_length() {
        let ring_data = b"abc";
        let mut ring: RingBuffer<u8> = RingBuffer::new(vec![0; 8]);
        ring.enqueue_slice(ring_data);
        let mut buf = [0; 4];
        assert_eq!(ring.read_allocated(3, &mut buf), 0);
        assert_eq!(ring.read_allocated(1, &mut buf), 2);
        assert_eq!(&buf[..2], b"bc");
    }

    #[test]
    fn one_element_ops() {
        let mut ring: RingBuffer<u8> = RingBuffer::new(vec![0; 2]);
        *ring.enqueue_one().unwrap() = 1;
        *ring.enqueue_one().unwrap() = 2;
        assert_eq!(ring.enqueue_one(), Err(Full));
        assert_eq!(ring.dequeue_one(), Ok(1));
        assert_eq!(ring.dequeue_one(), Ok(2));
        assert_eq!(ring.dequeue_one(), Err(Empty));
    }
}
