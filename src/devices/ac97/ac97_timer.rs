use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::audio::PcmProps;

/// Device default polling frequency. Leaving the configured frequency at this value lets
/// streams pick their own rate.
pub const TIMER_HZ_DEFAULT: u16 = 100;
// Used instead of the default for sample rates above 44.1kHz.
const TIMER_HZ_HIGH_RATE: u16 = 200;
const HIGH_RATE_THRESHOLD: u32 = 44100;

/// Source of virtual time, in nanoseconds. Stream timers expire against this clock.
pub trait VirtualClock: Send + Sync {
    fn now_ns(&self) -> u64;
}

/// Clock that only moves when told to. Lets the VMM drive time explicitly.
#[derive(Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock { now: AtomicU64::new(0) }
    }

    pub fn advance(&self, d: Duration) {
        self.now.fetch_add(d.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn set_ns(&self, ns: u64) {
        self.now.store(ns, Ordering::SeqCst);
    }
}

impl VirtualClock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Monotonic host time since creation.
pub struct HostClock {
    start: Instant,
}

impl HostClock {
    pub fn new() -> Self {
        HostClock { start: Instant::now() }
    }
}

impl Default for HostClock {
    fn default() -> Self {
        HostClock::new()
    }
}

impl VirtualClock for HostClock {
    fn now_ns(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }
}

/// Picks the polling frequency for a stream running at `frame_rate`.
pub fn stream_timer_hz(configured_hz: u16, frame_rate: u32) -> u16 {
    if configured_hz != TIMER_HZ_DEFAULT {
        return configured_hz.max(1);
    }
    if frame_rate > HIGH_RATE_THRESHOLD {
        TIMER_HZ_HIGH_RATE
    } else {
        TIMER_HZ_DEFAULT
    }
}

/// One-shot timer in virtual time.
#[derive(Debug, Default)]
pub struct StreamTimer {
    expire: Option<u64>,
}

impl StreamTimer {
    /// Arms the timer for `deadline`, never earlier than `now`. Returns the effective deadline.
    pub fn set(&mut self, now: u64, deadline: u64) -> u64 {
        let deadline = deadline.max(now);
        self.expire = Some(deadline);
        deadline
    }

    pub fn stop(&mut self) {
        self.expire = None;
    }

    pub fn expire(&self) -> Option<u64> {
        self.expire
    }

    pub fn is_armed(&self) -> bool {
        self.expire.is_some()
    }

    /// Disarms and returns true if the deadline has passed.
    pub fn take_due(&mut self, now: u64) -> bool {
        match self.expire {
            Some(t) if t <= now => {
                self.expire = None;
                true
            }
            _ => false,
        }
    }
}

/// How much a stream moves per timer tick and how long that takes.
#[derive(Copy, Clone, Debug)]
pub struct StreamSchedule {
    pub props: PcmProps,
    pub timer_hz: u16,
    /// Bytes covering one timer period.
    pub period_bytes: usize,
    pub period_ticks: u64,
    /// Bytes to move on the next tick.
    pub transfer_bytes: usize,
    /// Ticks until the next tick.
    pub transfer_ticks: u64,
    pub scheduling_hint: Duration,
}

impl StreamSchedule {
    pub fn new(props: PcmProps, timer_hz: u16) -> Self {
        let timer_hz = timer_hz.max(1);
        let period_bytes = props.floor_to_frame(
            props.frame_rate as usize / usize::from(timer_hz) * props.frame_bytes(),
        );
        let period_ticks = props.bytes_to_nanos(period_bytes);
        StreamSchedule {
            props,
            timer_hz,
            period_bytes,
            period_ticks,
            transfer_bytes: period_bytes,
            transfer_ticks: period_ticks,
            scheduling_hint: Duration::from_millis(1000 / u64::from(timer_hz)),
        }
    }

    pub fn ticks_for(&self, bytes: usize) -> u64 {
        self.props.bytes_to_nanos(bytes)
    }

    /// Sizes the next tick for `bytes` of pending guest data, at most one period. With nothing
    /// pending the previous size is kept, so a stream restarted by the guest moves data on its
    /// very next tick.
    pub fn update(&mut self, bytes: usize) {
        let bytes = self.props.floor_to_frame(bytes.min(self.period_bytes));
        if bytes == 0 {
            return;
        }
        self.transfer_bytes = bytes;
        self.transfer_ticks = self.ticks_for(bytes);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::audio::SampleFormat;

    #[test]
    fn timer_hz_selection() {
        assert_eq!(stream_timer_hz(TIMER_HZ_DEFAULT, 48000), 200);
        assert_eq!(stream_timer_hz(TIMER_HZ_DEFAULT, 44100), 100);
        assert_eq!(stream_timer_hz(TIMER_HZ_DEFAULT, 22050), 100);
        // An override always wins.
        assert_eq!(stream_timer_hz(50, 48000), 50);
        assert_eq!(stream_timer_hz(400, 8000), 400);
    }

    #[test]
    fn timer_never_in_the_past() {
        let mut timer = StreamTimer::default();
        assert_eq!(timer.set(1000, 500), 1000);
        assert!(!timer.take_due(999));
        assert!(timer.take_due(1000));
        assert!(!timer.is_armed());
        assert_eq!(timer.set(1000, 2000), 2000);
        timer.stop();
        assert_eq!(timer.expire(), None);
    }

    #[test]
    fn schedule_sizes() {
        let props = PcmProps::new(SampleFormat::S16LE, 2, 48000);
        let mut sched = StreamSchedule::new(props, 200);
        assert_eq!(sched.period_bytes, 960);
        assert_eq!(sched.period_ticks, 5_000_000);
        assert_eq!(sched.scheduling_hint, Duration::from_millis(5));

        sched.update(480);
        assert_eq!(sched.transfer_bytes, 480);
        assert_eq!(sched.transfer_ticks, 2_500_000);

        sched.update(1_000_000);
        assert_eq!(sched.transfer_bytes, 960);

        sched.update(480);
        sched.update(0);
        assert_eq!(sched.transfer_bytes, 480);
        assert_eq!(sched.transfer_ticks, 2_500_000);
        // Less than a frame counts as nothing pending.
        sched.update(3);
        assert_eq!(sched.transfer_bytes, 480);
    }

    #[test]
    fn manual_clock_moves_on_request() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_ns(), 0);
        clock.advance(Duration::from_millis(3));
        assert_eq!(clock.now_ns(), 3_000_000);
        clock.set_ns(10);
        assert_eq!(clock.now_ns(), 10);
    }
}
