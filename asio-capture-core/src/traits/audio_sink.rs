/// One buffer switch worth of canonical planar audio.
///
/// `channels` borrows from the device's scratch space and is only valid for
/// the duration of the `on_audio` call.
#[derive(Debug, Clone, Copy)]
pub struct AudioFrame<'a> {
    /// The negotiated sample rate.
    pub sample_rate: f64,
    /// Frames per channel (the negotiated block size).
    pub frames: usize,
    /// Monotonic clock read at callback time, in nanoseconds.
    pub timestamp_ns: u64,
    /// One slice per channel the binding expects, each `frames` long.
    pub channels: &'a [&'a [f32]],
}

impl AudioFrame<'_> {
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// Receiver of captured audio.
///
/// `on_audio` fires on the driver's real-time thread. It must not block,
/// allocate, or panic; copy the samples out and return.
pub trait AudioSink: Send + Sync {
    fn on_audio(&self, frame: &AudioFrame<'_>);
}

impl<F> AudioSink for F
where
    F: Fn(&AudioFrame<'_>) + Send + Sync,
{
    fn on_audio(&self, frame: &AudioFrame<'_>) {
        self(frame)
    }
}
