//! Multi-format interleaved frame demuxing
//!
//! A drained capture batch is a typed view over raw interleaved PCM. The
//! demuxer yields normalized per-channel samples for the level path and a
//! single selected-channel (or stereo-sum) scalar per frame for the
//! spectral ring buffer.

/// Number of concrete capture channels tracked per pipeline.
pub const MAX_CHANNELS: usize = 8;

/// Capture channel selector.
///
/// `Sum` is a derived pseudo-channel: the average of the first two channels
/// on stereo input, the lone sample on mono. It is never a capture channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Channel {
    FrontLeft,
    FrontRight,
    Center,
    Lfe,
    BackLeft,
    BackRight,
    SideLeft,
    SideRight,
    #[default]
    Sum,
}

impl Channel {
    /// Interleave position of a concrete channel; `Sum` has none.
    pub fn index(self) -> Option<usize> {
        match self {
            Channel::FrontLeft => Some(0),
            Channel::FrontRight => Some(1),
            Channel::Center => Some(2),
            Channel::Lfe => Some(3),
            Channel::BackLeft => Some(4),
            Channel::BackRight => Some(5),
            Channel::SideLeft => Some(6),
            Channel::SideRight => Some(7),
            Channel::Sum => None,
        }
    }
}

/// Negotiated sample format of the capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// 16-bit signed integer PCM, normalized by 1/32767.
    Pcm16,
    /// 32-bit float PCM, passed through unchanged.
    PcmF32,
}

impl SampleFormat {
    pub fn describe(self) -> &'static str {
        match self {
            SampleFormat::Pcm16 => "PCM 16b",
            SampleFormat::PcmF32 => "PCM 32b",
        }
    }
}

/// One drained batch of interleaved frames, borrowed from the capture queue.
#[derive(Debug, Clone, Copy)]
pub enum SampleChunk<'a> {
    F32(&'a [f32]),
    S16(&'a [i16]),
}

impl SampleChunk<'_> {
    /// Number of complete frames for the given channel count.
    pub fn frames(&self, channels: usize) -> usize {
        let samples = match self {
            SampleChunk::F32(s) => s.len(),
            SampleChunk::S16(s) => s.len(),
        };
        samples / channels
    }

    /// Normalized sample of one channel of one frame.
    #[inline]
    pub fn sample(&self, frame: usize, channel: usize, channels: usize) -> f32 {
        let i = frame * channels + channel;
        match self {
            SampleChunk::F32(s) => s[i],
            SampleChunk::S16(s) => f32::from(s[i]) / 32767.0,
        }
    }

    /// The scalar fed to the spectral ring buffer for one frame: the
    /// selected channel's sample, the stereo average for `Sum`, or an inert
    /// zero when the selection is outside the actual channel layout.
    #[inline]
    pub fn ring_sample(&self, frame: usize, selected: Channel, channels: usize) -> f32 {
        match selected.index() {
            None => {
                if channels >= 2 {
                    0.5 * (self.sample(frame, 0, channels) + self.sample(frame, 1, channels))
                } else {
                    self.sample(frame, 0, channels)
                }
            }
            Some(ch) if ch < channels => self.sample(frame, ch, channels),
            Some(_) => 0.0,
        }
    }
}
