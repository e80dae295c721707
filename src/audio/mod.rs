use std::{error, fmt};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

mod circ_buf;
mod null_sink;
#[cfg(feature = "pulse")]
pub mod pulse;

pub use circ_buf::{CircBuf, CircBufError, ReadBlock, WriteBlock};
pub use null_sink::{NullBackend, NullSink};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    U8,
    S16LE,
    S24LE,
    S32LE,
}

impl SampleFormat {
    pub fn sample_bytes(self) -> usize {
        use SampleFormat::*;
        match self {
            U8 => 1,
            S16LE => 2,
            S24LE => 4, // Not a typo, S24_LE samples are stored in 4 byte chunks.
            S32LE => 4,
        }
    }
}

impl Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use SampleFormat::*;
        match self {
            U8 => write!(f, "Unsigned 8 bit"),
            S16LE => write!(f, "Signed 16 bit Little Endian"),
            S24LE => write!(f, "Signed 24 bit Little Endian"),
            S32LE => write!(f, "Signed 32 bit Little Endian"),
        }
    }
}

impl FromStr for SampleFormat {
    type Err = SampleFormatError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "U8" => Ok(SampleFormat::U8),
            "S16_LE" => Ok(SampleFormat::S16LE),
            "S24_LE" => Ok(SampleFormat::S24LE),
            "S32_LE" => Ok(SampleFormat::S32LE),
            _ => Err(SampleFormatError::InvalidSampleFormat),
        }
    }
}

/// Errors that are possible from a `SampleFormat`.
#[derive(Error, Debug)]
pub enum SampleFormatError {
    #[error("Must be in [U8, S16_LE, S24_LE, S32_LE]")]
    InvalidSampleFormat,
}

/// Valid directions of an audio stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StreamDirection {
    Playback,
    Capture,
}

/// Sample layout of a PCM stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PcmProps {
    pub format: SampleFormat,
    pub channels: usize,
    pub frame_rate: u32,
}

impl PcmProps {
    pub fn new(format: SampleFormat, channels: usize, frame_rate: u32) -> Self {
        PcmProps { format, channels, frame_rate }
    }

    pub fn sample_bytes(&self) -> usize {
        self.format.sample_bytes()
    }

    pub fn frame_bytes(&self) -> usize {
        self.format.sample_bytes() * self.channels
    }

    /// Rounds `bytes` down to a whole number of frames.
    pub fn floor_to_frame(&self, bytes: usize) -> usize {
        match self.frame_bytes() {
            0 => 0,
            fb => bytes - bytes % fb,
        }
    }

    /// Number of bytes making up `ms` milliseconds of audio.
    pub fn millis_to_bytes(&self, ms: u64) -> usize {
        let frames = u64::from(self.frame_rate) * ms / 1000;
        frames as usize * self.frame_bytes()
    }

    /// Playback duration of `bytes` in nanoseconds. Partial frames are ignored.
    pub fn bytes_to_nanos(&self, bytes: usize) -> u64 {
        if self.frame_rate == 0 || self.frame_bytes() == 0 {
            return 0;
        }
        let frames = (bytes / self.frame_bytes()) as u64;
        frames * 1_000_000_000 / u64::from(self.frame_rate)
    }
}

impl Display for PcmProps {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}Hz {}ch {}", self.frame_rate, self.channels, self.format)
    }
}

/// The host endpoint a controller stream is routed to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SinkPath {
    FrontOut,
    LineIn,
    MicIn,
}

/// Everything a backend needs to open a sink for one controller stream.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub name: &'static str,
    pub direction: StreamDirection,
    pub path: SinkPath,
    pub props: PcmProps,
    /// How often the device intends to service the sink.
    pub scheduling_hint: Duration,
}

pub const VOLUME_MAX: u8 = 255;

/// Stereo volume on a linear 0..=255 scale, 0.375dB per step.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Volume {
    pub muted: bool,
    pub left: u8,
    pub right: u8,
}

impl Volume {
    pub const MAX: Volume = Volume { muted: false, left: VOLUME_MAX, right: VOLUME_MAX };

    pub fn new(muted: bool, left: u8, right: u8) -> Self {
        Volume { muted, left, right }
    }

    /// Applies `other` on top of `self`, as a master control would on a channel control.
    pub fn combine(self, other: Volume) -> Volume {
        fn scale(a: u8, b: u8) -> u8 {
            (u16::from(a) * u16::from(b) / u16::from(VOLUME_MAX)) as u8
        }
        Volume {
            muted: self.muted || other.muted,
            left: scale(self.left, other.left),
            right: scale(self.right, other.right),
        }
    }

    /// Loudest channel as a 0.0..=1.0 scaler, 0.0 when muted.
    pub fn scaler(&self) -> f64 {
        if self.muted {
            return 0.0;
        }
        f64::from(self.left.max(self.right)) / f64::from(VOLUME_MAX)
    }
}

impl Default for Volume {
    fn default() -> Self {
        Volume::MAX
    }
}

/// Recording source selectable through the codec record-select register.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RecordSource {
    Mic,
    Cd,
    Video,
    Aux,
    LineIn,
    Phone,
}

/// Errors that can pass across threads.
pub type BoxError = Box<dyn error::Error + Send + Sync>;

/// A host audio endpoint bound to one controller stream.
///
/// Reads and writes may move fewer bytes than offered and, unless the device
/// runs with asynchronous I/O, may block.
pub trait AudioSink: Send {
    /// False once the host side has gone away. The device stops servicing an inactive sink.
    fn is_active(&self) -> bool;

    /// Bytes that can currently be written without blocking.
    fn writable(&self) -> usize;

    /// Bytes that can currently be read without blocking.
    fn readable(&self) -> usize;

    /// Reads captured audio into `dst`, returning the number of bytes read.
    fn read(&mut self, dst: &mut [u8]) -> Result<usize, BoxError>;

    /// Writes audio from `src`, returning the number of bytes consumed.
    fn write(&mut self, src: &[u8]) -> Result<usize, BoxError>;

    fn set_volume(&mut self, _volume: Volume) {}

    fn set_recording_source(&mut self, _source: RecordSource) {}

    /// Gives the sink a chance to do periodic work after a read or write pass.
    fn update(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Opens host sinks for controller streams.
pub trait AudioBackend: Send {
    fn name(&self) -> &str;

    fn open_sink(&mut self, config: &StreamConfig) -> Result<Box<dyn AudioSink>, BoxError>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pcm_props_conversions() {
        let props = PcmProps::new(SampleFormat::S16LE, 2, 48000);
        assert_eq!(props.frame_bytes(), 4);
        assert_eq!(props.millis_to_bytes(100), 19200);
        assert_eq!(props.bytes_to_nanos(19200), 100_000_000);
        // A trailing partial frame does not count.
        assert_eq!(props.bytes_to_nanos(19203), 100_000_000);
        assert_eq!(props.floor_to_frame(7), 4);
    }

    #[test]
    fn volume_combine() {
        let half = Volume::new(false, 127, 255);
        assert_eq!(Volume::MAX.combine(half), half);
        let muted = Volume::new(true, 255, 255);
        assert!(half.combine(muted).muted);
        assert_eq!(half.combine(Volume::new(false, 0, 255)).left, 0);
    }

    #[test]
    fn sample_format_parse() {
        assert_eq!("S16_LE".parse::<SampleFormat>().unwrap(), SampleFormat::S16LE);
        assert!("S16".parse::<SampleFormat>().is_err());
    }
}
