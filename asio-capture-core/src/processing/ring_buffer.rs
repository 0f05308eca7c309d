/// Fixed-capacity circular buffer of f32 samples.
///
/// Not synchronised; `BufferedSink` wraps one per channel in a
/// `parking_lot::Mutex`. Writes never allocate.
///
/// Overflow behavior: drops the oldest samples and counts them.
#[derive(Debug)]
pub struct RingBuffer {
    buffer: Box<[f32]>,
    write_index: usize,
    read_index: usize,
    available: usize,
    dropped: u64,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity].into_boxed_slice(),
            write_index: 0,
            read_index: 0,
            available: 0,
            dropped: 0,
        }
    }

    /// Append samples, overwriting the oldest on overflow.
    ///
    /// If `samples` is longer than the capacity only its tail is kept.
    pub fn write(&mut self, samples: &[f32]) {
        let capacity = self.capacity();
        if samples.is_empty() || capacity == 0 {
            return;
        }

        let samples = if samples.len() > capacity {
            self.dropped += (samples.len() - capacity) as u64;
            &samples[samples.len() - capacity..]
        } else {
            samples
        };

        let overflow = (self.available + samples.len()).saturating_sub(capacity);
        if overflow > 0 {
            self.read_index = (self.read_index + overflow) % capacity;
            self.available -= overflow;
            self.dropped += overflow as u64;
        }

        // Two contiguous copies at most
        let first = samples.len().min(capacity - self.write_index);
        self.buffer[self.write_index..self.write_index + first].copy_from_slice(&samples[..first]);
        self.buffer[..samples.len() - first].copy_from_slice(&samples[first..]);

        self.write_index = (self.write_index + samples.len()) % capacity;
        self.available += samples.len();
    }

    /// Move up to `out.len()` samples into `out`. Returns how many were read.
    pub fn read_into(&mut self, out: &mut [f32]) -> usize {
        let to_read = out.len().min(self.available);
        if to_read == 0 {
            return 0;
        }

        let capacity = self.capacity();
        let first = to_read.min(capacity - self.read_index);
        out[..first].copy_from_slice(&self.buffer[self.read_index..self.read_index + first]);
        out[first..to_read].copy_from_slice(&self.buffer[..to_read - first]);

        self.read_index = (self.read_index + to_read) % capacity;
        self.available -= to_read;
        to_read
    }

    /// Read and remove up to `count` samples.
    pub fn read(&mut self, count: usize) -> Vec<f32> {
        let mut result = vec![0.0; count.min(self.available)];
        self.read_into(&mut result);
        result
    }

    /// Number of samples currently available for reading.
    pub fn count(&self) -> usize {
        self.available
    }

    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    /// Samples discarded by overflow since creation or the last reset.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn reset(&mut self) {
        self.write_index = 0;
        self.read_index = 0;
        self.available = 0;
        self.dropped = 0;
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(start: f32, len: usize) -> Vec<f32> {
        (0..len).map(|i| start + i as f32).collect()
    }

    #[test]
    fn blocks_come_out_in_order() {
        let mut ring = RingBuffer::new(16);
        ring.write(&block(0.0, 4));
        ring.write(&block(4.0, 4));

        assert_eq!(ring.count(), 8);
        assert_eq!(ring.read(8), block(0.0, 8));
        assert!(ring.is_empty());
    }

    #[test]
    fn reader_can_drain_in_smaller_pieces() {
        let mut ring = RingBuffer::new(16);
        ring.write(&block(10.0, 5));

        let mut head = [0.0; 3];
        assert_eq!(ring.read_into(&mut head), 3);
        assert_eq!(head, [10.0, 11.0, 12.0]);

        let mut tail = [0.0; 8];
        assert_eq!(ring.read_into(&mut tail), 2);
        assert_eq!(&tail[..2], &[13.0, 14.0]);
    }

    #[test]
    fn slow_reader_loses_the_oldest_samples() {
        let mut ring = RingBuffer::new(6);
        ring.write(&block(0.0, 4));
        ring.write(&block(4.0, 4));

        assert_eq!(ring.dropped(), 2);
        assert_eq!(ring.read(6), block(2.0, 6));
    }

    #[test]
    fn oversized_block_keeps_its_tail() {
        let mut ring = RingBuffer::new(3);
        ring.write(&block(0.0, 5));

        assert_eq!(ring.read(3), block(2.0, 3));
        assert_eq!(ring.dropped(), 2);
    }

    #[test]
    fn indices_wrap_across_the_end() {
        let mut ring = RingBuffer::new(5);
        ring.write(&block(0.0, 4));
        assert_eq!(ring.read(3), block(0.0, 3));
        ring.write(&block(4.0, 4));

        assert_eq!(ring.count(), 5);
        assert_eq!(ring.read(5), block(3.0, 5));
    }

    #[test]
    fn reset_forgets_data_and_drops() {
        let mut ring = RingBuffer::new(4);
        ring.write(&block(0.0, 6));
        ring.reset();

        assert!(ring.is_empty());
        assert_eq!(ring.dropped(), 0);
        assert!(ring.read(4).is_empty());
    }

    #[test]
    fn zero_capacity_is_inert() {
        let mut ring = RingBuffer::new(0);
        ring.write(&[1.0, 2.0]);
        assert!(ring.is_empty());
        assert!(ring.read(2).is_empty());
    }
}
