use std::ptr;

/// The two halves of one channel's hardware buffer (`ASIOBufferInfo.buffers`).
///
/// The memory belongs to the driver and stays valid from `createBuffers`
/// until `disposeBuffers`. While streaming, the driver fills one half while
/// the host reads the other, so a half is only touched inside the buffer
/// switch that names it.
#[derive(Debug, Clone, Copy)]
pub struct DoubleBuffer {
    halves: [*mut u8; 2],
    len: usize,
}

// The pointers are plain addresses into driver memory; access is confined to
// the buffer-switch protocol above.
unsafe impl Send for DoubleBuffer {}
unsafe impl Sync for DoubleBuffer {}

impl DoubleBuffer {
    /// Wrap driver-owned halves of `len` bytes each.
    ///
    /// # Safety
    /// Both pointers must be null or valid for reads and writes of `len`
    /// bytes until the driver's buffers are disposed.
    pub unsafe fn from_raw(halves: [*mut u8; 2], len: usize) -> Self {
        Self { halves, len }
    }

    pub fn empty() -> Self {
        Self {
            halves: [ptr::null_mut(); 2],
            len: 0,
        }
    }

    /// Bytes per half.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0 || self.halves.iter().any(|p| p.is_null())
    }

    /// # Safety
    /// The buffers must not have been disposed, and the driver must not be
    /// writing to this half.
    pub unsafe fn half(&self, index: usize) -> &[u8] {
        let p = self.halves[index & 1];
        if p.is_null() {
            return &[];
        }
        std::slice::from_raw_parts(p, self.len)
    }

    /// # Safety
    /// As for [`half`](Self::half), and no other reference to this half may
    /// be live.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn half_mut(&self, index: usize) -> &mut [u8] {
        let p = self.halves[index & 1];
        if p.is_null() {
            return &mut [];
        }
        std::slice::from_raw_parts_mut(p, self.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halves_address_separate_regions() {
        let mut storage = vec![0u8; 8];
        let base = storage.as_mut_ptr();
        let buffer = unsafe { DoubleBuffer::from_raw([base, base.add(4)], 4) };

        unsafe {
            buffer.half_mut(1).copy_from_slice(&[1, 2, 3, 4]);
            assert_eq!(buffer.half(0), &[0, 0, 0, 0]);
            assert_eq!(buffer.half(1), &[1, 2, 3, 4]);
            // index is taken modulo two
            assert_eq!(buffer.half(3), &[1, 2, 3, 4]);
        }
        drop(storage);
    }

    #[test]
    fn null_halves_read_as_empty() {
        let buffer = DoubleBuffer::empty();
        assert!(buffer.is_empty());
        unsafe {
            assert!(buffer.half(0).is_empty());
            assert!(buffer.half_mut(1).is_empty());
        }
    }
}
