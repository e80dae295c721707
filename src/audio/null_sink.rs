use std::time::Instant;

use crate::audio::{AudioBackend, AudioSink, BoxError, PcmProps, StreamConfig, StreamDirection};

/// Sink that discards playback samples and captures silence at the stream's real-time rate.
pub struct NullSink {
    props: PcmProps,
    direction: StreamDirection,
    start_time: Instant,
    captured: u64,
}

impl NullSink {
    pub fn new(config: &StreamConfig) -> Self {
        NullSink {
            props: config.props,
            direction: config.direction,
            start_time: Instant::now(),
            captured: 0,
        }
    }

    // Bytes of silence that would have been produced by now.
    fn produced(&self) -> u64 {
        let elapsed = self.start_time.elapsed().as_nanos() as u64;
        let frames = elapsed * u64::from(self.props.frame_rate) / 1_000_000_000;
        frames * self.props.frame_bytes() as u64
    }
}

impl AudioSink for NullSink {
    fn is_active(&self) -> bool {
        true
    }

    fn writable(&self) -> usize {
        match self.direction {
            StreamDirection::Playback => usize::MAX,
            StreamDirection::Capture => 0,
        }
    }

    fn readable(&self) -> usize {
        match self.direction {
            StreamDirection::Playback => 0,
            StreamDirection::Capture => self.produced().saturating_sub(self.captured) as usize,
        }
    }

    fn read(&mut self, dst: &mut [u8]) -> Result<usize, BoxError> {
        let n = self.props.floor_to_frame(dst.len().min(self.readable()));
        for b in &mut dst[..n] {
            *b = 0;
        }
        self.captured += n as u64;
        Ok(n)
    }

    fn write(&mut self, src: &[u8]) -> Result<usize, BoxError> {
        Ok(src.len())
    }
}

/// Backend handing out `NullSink`s, used when no host audio is available.
#[derive(Default)]
pub struct NullBackend;

impl NullBackend {
    pub fn new() -> Self {
        NullBackend
    }
}

impl AudioBackend for NullBackend {
    fn name(&self) -> &str {
        "null"
    }

    fn open_sink(&mut self, config: &StreamConfig) -> Result<Box<dyn AudioSink>, BoxError> {
        Ok(Box::new(NullSink::new(config)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::audio::{SampleFormat, SinkPath};
    use std::time::Duration;

    fn config(direction: StreamDirection) -> StreamConfig {
        StreamConfig {
            name: "test",
            direction,
            path: SinkPath::LineIn,
            props: PcmProps::new(SampleFormat::S16LE, 2, 48000),
            scheduling_hint: Duration::from_millis(10),
        }
    }

    #[test]
    fn playback_discards_everything() {
        let mut sink = NullBackend::new()
            .open_sink(&config(StreamDirection::Playback))
            .unwrap();
        assert_eq!(sink.write(&[1u8; 100]).unwrap(), 100);
        assert_eq!(sink.readable(), 0);
    }

    #[test]
    fn capture_produces_silence_over_time() {
        let mut sink = NullSink::new(&config(StreamDirection::Capture));
        std::thread::sleep(Duration::from_millis(5));
        let avail = sink.readable();
        assert!(avail > 0);
        let mut buf = [0xffu8; 64];
        let n = sink.read(&mut buf).unwrap();
        assert_eq!(n % 4, 0);
        assert!(buf[..n].iter().all(|&b| b == 0));
    }
}
