use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::processing::ring_buffer::RingBuffer;
use crate::traits::audio_sink::{AudioFrame, AudioSink};

/// `AudioSink` that parks delivered audio in per-channel ring buffers for a
/// non-real-time reader.
///
/// The real-time side only uses `try_lock`; a channel whose buffer is held by
/// the reader misses that block, and the miss is counted.
pub struct BufferedSink {
    channels: Vec<Mutex<RingBuffer>>,
    sample_rate_bits: AtomicU64,
    frames_written: AtomicU64,
    missed_blocks: AtomicU64,
}

impl BufferedSink {
    /// `capacity` is in frames per channel.
    pub fn new(channels: usize, capacity: usize) -> Self {
        Self {
            channels: (0..channels).map(|_| Mutex::new(RingBuffer::new(capacity))).collect(),
            sample_rate_bits: AtomicU64::new(0f64.to_bits()),
            frames_written: AtomicU64::new(0),
            missed_blocks: AtomicU64::new(0),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels.len()
    }

    /// Rate of the most recent frame, 0 before any audio arrived.
    pub fn sample_rate(&self) -> f64 {
        f64::from_bits(self.sample_rate_bits.load(Ordering::Relaxed))
    }

    /// Samples waiting in `channel`.
    pub fn available(&self, channel: usize) -> usize {
        self.channels.get(channel).map_or(0, |ring| ring.lock().count())
    }

    /// Drain up to `out.len()` samples of `channel`. Returns how many were read.
    pub fn read(&self, channel: usize, out: &mut [f32]) -> usize {
        self.channels
            .get(channel)
            .map_or(0, |ring| ring.lock().read_into(out))
    }

    /// Frames delivered since creation.
    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    /// Channel blocks skipped because the reader held the buffer.
    pub fn missed_blocks(&self) -> u64 {
        self.missed_blocks.load(Ordering::Relaxed)
    }

    /// Samples overwritten before the reader got to them, across channels.
    pub fn overflowed(&self) -> u64 {
        self.channels.iter().map(|ring| ring.lock().dropped()).sum()
    }

    pub fn clear(&self) {
        for ring in &self.channels {
            ring.lock().reset();
        }
    }
}

impl AudioSink for BufferedSink {
    fn on_audio(&self, frame: &AudioFrame<'_>) {
        self.sample_rate_bits
            .store(frame.sample_rate.to_bits(), Ordering::Relaxed);

        for (ring, samples) in self.channels.iter().zip(frame.channels) {
            match ring.try_lock() {
                Some(mut ring) => ring.write(samples),
                None => {
                    self.missed_blocks.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        self.frames_written
            .fetch_add(frame.frames as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame<'a>(channels: &'a [&'a [f32]]) -> AudioFrame<'a> {
        AudioFrame {
            sample_rate: 48000.0,
            frames: channels.first().map_or(0, |c| c.len()),
            timestamp_ns: 0,
            channels,
        }
    }

    #[test]
    fn buffers_each_channel() {
        let sink = BufferedSink::new(2, 16);
        let left = [0.1f32; 4];
        let right = [0.2f32; 4];
        sink.on_audio(&frame(&[&left, &right]));

        assert_eq!(sink.sample_rate(), 48000.0);
        assert_eq!(sink.available(0), 4);
        assert_eq!(sink.frames_written(), 4);

        let mut out = [0.0f32; 8];
        assert_eq!(sink.read(1, &mut out), 4);
        assert_eq!(&out[..4], &right);
        assert_eq!(sink.available(1), 0);
        assert_eq!(sink.read(5, &mut out), 0);
    }

    #[test]
    fn extra_frame_channels_are_ignored() {
        let sink = BufferedSink::new(1, 8);
        let a = [1.0f32; 2];
        let b = [2.0f32; 2];
        sink.on_audio(&frame(&[&a, &b]));
        assert_eq!(sink.available(0), 2);
    }

    #[test]
    fn held_channel_misses_the_block() {
        let sink = BufferedSink::new(1, 8);
        let samples = [0.5f32; 4];

        let held = sink.channels[0].lock();
        sink.on_audio(&frame(&[&samples]));
        drop(held);

        assert_eq!(sink.missed_blocks(), 1);
        assert_eq!(sink.available(0), 0);
    }

    #[test]
    fn overflow_is_counted() {
        let sink = BufferedSink::new(1, 4);
        let samples = [0.5f32; 3];
        sink.on_audio(&frame(&[&samples]));
        sink.on_audio(&frame(&[&samples]));

        assert_eq!(sink.available(0), 4);
        assert_eq!(sink.overflowed(), 2);

        sink.clear();
        assert_eq!(sink.available(0), 0);
    }
}
