use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use thiserror::Error;
use vm_memory::{Bytes, GuestAddress, GuestMemoryError, GuestMemoryMmap};

use crate::audio::{
    AudioBackend, AudioSink, BoxError, CircBuf, CircBufError, NullSink, PcmProps, SampleFormat,
    SinkPath, StreamConfig, StreamDirection,
};
use crate::devices::ac97::ac97_aio::AsyncIoWorker;
use crate::devices::ac97::ac97_bdl::advance_bdle;
use crate::devices::ac97::ac97_bus_master::{update_sr, Ac97BusMasterRegs};
use crate::devices::ac97::ac97_mixer::Ac97Mixer;
use crate::devices::ac97::ac97_params::Ac97Parameters;
use crate::devices::ac97::ac97_regs::*;
use crate::devices::ac97::ac97_timer::{stream_timer_hz, StreamSchedule, StreamTimer};

// Samples in guest buffers are always 16 bit. PICB counts them.
const SAMPLE_BYTES: usize = 2;
const CHANNELS: usize = 2;
// FIFO between guest memory and the host sink.
const FIFO_MILLIS: u64 = 100;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Failed to allocate stream FIFO: {0}")]
    CreateFifo(CircBufError),
    #[error("Failed to start async I/O worker: {0}")]
    CreateWorker(io::Error),
    #[error("Guest memory access failed: {0}")]
    GuestMemory(GuestMemoryError),
}

pub type AudioResult<T> = std::result::Result<T, AudioError>;

/// Who is servicing a host sink.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IoContext {
    Timer,
    Worker,
}

/// Outcome of one DMA pass.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Transferred {
    pub bytes: usize,
    /// The last valid buffer completed, or the engine was already halted.
    pub end_of_stream: bool,
}

/// The part of a stream shared with its async I/O worker.
///
/// Two locks protect it. The sink lock is held while a host sink is serviced and while the sink
/// is swapped. The FIFO lock is held during a DMA pass and, briefly, to look up the FIFO. When
/// both are needed the sink lock is always taken first.
pub struct StreamShared {
    func: Ac97Function,
    direction: StreamDirection,
    fifo: Mutex<Option<Arc<CircBuf>>>,
    sink: Mutex<Option<Box<dyn AudioSink>>>,
    enabled: AtomicBool,
    sink_active: AtomicBool,
}

impl StreamShared {
    pub(crate) fn new(func: Ac97Function) -> Self {
        StreamShared {
            func,
            direction: stream_direction(func),
            fifo: Mutex::new(None),
            sink: Mutex::new(None),
            enabled: AtomicBool::new(false),
            sink_active: AtomicBool::new(false),
        }
    }

    fn fifo_lock(&self) -> MutexGuard<Option<Arc<CircBuf>>> {
        self.fifo.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sink_lock(&self) -> MutexGuard<Option<Box<dyn AudioSink>>> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_fifo(&self) -> Option<Arc<CircBuf>> {
        self.fifo_lock().clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Enabled with a sink that can still move data.
    pub fn is_active(&self) -> bool {
        self.is_enabled() && self.sink_active.load(Ordering::Acquire)
    }

    pub fn fifo_used(&self) -> usize {
        self.current_fifo().map_or(0, |f| f.used())
    }

    fn reset_fifo(&self) {
        let _sink = self.sink_lock();
        if let Some(fifo) = self.fifo_lock().as_ref() {
            fifo.reset();
        }
    }

    /// Moves data between the FIFO and the host sink. Playback drains the FIFO into the sink,
    /// capture fills it from the sink.
    pub fn service_sink(&self, ctx: IoContext) {
        let mut slot = self.sink_lock();
        let sink = match slot.as_mut() {
            Some(sink) => sink,
            None => return,
        };
        let fifo = match self.current_fifo() {
            Some(fifo) => fifo,
            None => return,
        };

        let result = match self.direction {
            StreamDirection::Playback => drain_to_sink(&fifo, sink.as_mut()),
            StreamDirection::Capture => fill_from_sink(&fifo, sink.as_mut()),
        };
        match result {
            Ok(bytes) if bytes > 0 => {
                trace!("AC97: {} moved {} bytes ({:?})", self.func.name(), bytes, ctx)
            }
            Ok(_) => {}
            Err(e) => warn!("AC97: {} sink I/O failed: {}", self.func.name(), e),
        }
        self.sink_active.store(sink.is_active(), Ordering::Release);
    }
}

fn drain_to_sink(fifo: &CircBuf, sink: &mut dyn AudioSink) -> Result<usize, BoxError> {
    let mut left = fifo.used().min(sink.writable());
    let mut done = 0;
    while left > 0 {
        let block = match fifo.acquire_read_block(left) {
            Some(block) if !block.is_empty() => block,
            _ => break,
        };
        let written = sink.write(&block)?.min(block.len());
        block.release(written);
        if written == 0 {
            break;
        }
        left -= written;
        done += written;
    }
    sink.update()?;
    Ok(done)
}

fn fill_from_sink(fifo: &CircBuf, sink: &mut dyn AudioSink) -> Result<usize, BoxError> {
    sink.update()?;
    let mut left = sink.readable().min(fifo.free());
    let mut done = 0;
    while left > 0 {
        let mut block = match fifo.acquire_write_block(left) {
            Some(block) if !block.is_empty() => block,
            _ => break,
        };
        let read = sink.read(&mut block)?.min(block.len());
        block.release(read);
        if read == 0 {
            break;
        }
        left -= read;
        done += read;
    }
    Ok(done)
}

fn stream_direction(func: Ac97Function) -> StreamDirection {
    match func {
        Ac97Function::Output => StreamDirection::Playback,
        Ac97Function::Input | Ac97Function::Microphone => StreamDirection::Capture,
    }
}

fn sink_path(func: Ac97Function) -> SinkPath {
    match func {
        Ac97Function::Input => SinkPath::LineIn,
        Ac97Function::Output => SinkPath::FrontOut,
        Ac97Function::Microphone => SinkPath::MicIn,
    }
}

// Copies guest samples at `addr` into the FIFO. Returns 0 when the FIFO is full.
fn guest_to_fifo(
    mem: &GuestMemoryMmap,
    fifo: &CircBuf,
    addr: GuestAddress,
    max: usize,
) -> Result<usize, GuestMemoryError> {
    let mut block = match fifo.acquire_write_block(max) {
        Some(block) => block,
        None => return Ok(0),
    };
    let len = block.len() - block.len() % SAMPLE_BYTES;
    if len > 0 {
        mem.read_slice(&mut block[..len], addr)?;
    }
    block.release(len);
    Ok(len)
}

// Copies FIFO contents to the guest buffer at `addr`. Returns 0 when the FIFO is empty.
fn fifo_to_guest(
    mem: &GuestMemoryMmap,
    fifo: &CircBuf,
    addr: GuestAddress,
    max: usize,
) -> Result<usize, GuestMemoryError> {
    let block = match fifo.acquire_read_block(max) {
        Some(block) => block,
        None => return Ok(0),
    };
    let len = block.len() - block.len() % SAMPLE_BYTES;
    if len > 0 {
        mem.write_slice(&block[..len], addr)?;
    }
    block.release(len);
    Ok(len)
}

/// One bus master function's connection to the host: FIFO, sink, timer and optional worker.
pub struct Ac97Stream {
    func: Ac97Function,
    shared: Arc<StreamShared>,
    config: Option<StreamConfig>,
    schedule: Option<StreamSchedule>,
    timer: StreamTimer,
    worker: Option<AsyncIoWorker>,
    last_notify: Option<Instant>,
}

impl Ac97Stream {
    pub fn new(func: Ac97Function) -> Self {
        Ac97Stream {
            func,
            shared: Arc::new(StreamShared::new(func)),
            config: None,
            schedule: None,
            timer: StreamTimer::default(),
            worker: None,
            last_notify: None,
        }
    }

    pub fn func(&self) -> Ac97Function {
        self.func
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.is_enabled()
    }

    pub fn is_active(&self) -> bool {
        self.shared.is_active()
    }

    pub fn config(&self) -> Option<&StreamConfig> {
        self.config.as_ref()
    }

    pub fn schedule(&self) -> Option<&StreamSchedule> {
        self.schedule.as_ref()
    }

    pub fn fifo_used(&self) -> usize {
        self.shared.fifo_used()
    }

    pub fn timer(&self) -> &StreamTimer {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut StreamTimer {
        &mut self.timer
    }

    /// Starts or stops the stream. Enabling opens the host sink at the codec's current rate.
    pub fn enable(
        &mut self,
        enable: bool,
        mixer: &Ac97Mixer,
        backend: &mut dyn AudioBackend,
        params: &Ac97Parameters,
    ) -> AudioResult<()> {
        if !enable {
            if self.is_enabled() {
                debug!("AC97: disabling {}", self.func.name());
            }
            self.close();
            self.shared.enabled.store(false, Ordering::Release);
            self.timer.stop();
            if let Some(worker) = &self.worker {
                worker.set_enabled(false);
            }
            return Ok(());
        }

        if params.async_io && self.worker.is_none() {
            let worker =
                AsyncIoWorker::create(self.shared.clone()).map_err(AudioError::CreateWorker)?;
            self.worker = Some(worker);
        }
        self.reset_fifo();
        self.open(false, mixer, backend, params)?;
        self.shared.enabled.store(true, Ordering::Release);
        if let Some(worker) = &self.worker {
            worker.set_enabled(true);
        }
        debug!("AC97: enabled {}", self.func.name());
        Ok(())
    }

    /// Opens the host sink. Without `force` nothing happens if the stream already runs with the
    /// codec's current properties.
    pub fn open(
        &mut self,
        force: bool,
        mixer: &Ac97Mixer,
        backend: &mut dyn AudioBackend,
        params: &Ac97Parameters,
    ) -> AudioResult<()> {
        let rate = mixer.sample_rate(self.func);
        if rate == 0 {
            warn!("AC97: {} has a zero sample rate, not opening", self.func.name());
            return Ok(());
        }
        let props = PcmProps::new(SampleFormat::S16LE, CHANNELS, rate);
        if !force {
            if let Some(config) = &self.config {
                if config.props == props {
                    return Ok(());
                }
            }
        }

        let schedule = StreamSchedule::new(props, stream_timer_hz(params.timer_hz, rate));
        let config = StreamConfig {
            name: self.func.name(),
            direction: self.shared.direction,
            path: sink_path(self.func),
            props,
            scheduling_hint: schedule.scheduling_hint,
        };
        let fifo = CircBuf::new(props.millis_to_bytes(FIFO_MILLIS)).map_err(AudioError::CreateFifo)?;
        let mut sink = match backend.open_sink(&config) {
            Ok(sink) => sink,
            Err(e) => {
                warn!(
                    "AC97: {} backend failed to open {} ({}), using a null sink",
                    backend.name(),
                    self.func.name(),
                    e
                );
                Box::new(NullSink::new(&config))
            }
        };
        apply_mixer_to_sink(self.func, sink.as_mut(), mixer);
        let active = sink.is_active();

        {
            let mut slot = self.shared.sink_lock();
            *slot = Some(sink);
            *self.shared.fifo_lock() = Some(Arc::new(fifo));
        }
        self.shared.sink_active.store(active, Ordering::Release);

        info!(
            "AC97: opened {} at {}, timer {}Hz, {} bytes per period",
            self.func.name(),
            props,
            schedule.timer_hz,
            schedule.period_bytes
        );
        self.config = Some(config);
        self.schedule = Some(schedule);
        Ok(())
    }

    /// Releases the host sink and drops buffered data. The FIFO is kept for reuse.
    pub fn close(&mut self) {
        {
            let mut slot = self.shared.sink_lock();
            *slot = None;
            if let Some(fifo) = self.shared.fifo_lock().as_ref() {
                fifo.reset();
            }
        }
        self.shared.sink_active.store(false, Ordering::Release);
        self.config = None;
    }

    /// Re-opens the sink of an enabled stream, picking up a new sample rate.
    pub fn reopen(
        &mut self,
        mixer: &Ac97Mixer,
        backend: &mut dyn AudioBackend,
        params: &Ac97Parameters,
    ) -> AudioResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.close();
        self.open(true, mixer, backend, params)
    }

    pub fn reset_fifo(&self) {
        self.shared.reset_fifo();
    }

    /// Stops the worker and frees everything.
    pub fn destroy(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.destroy();
        }
        self.close();
        self.shared.enabled.store(false, Ordering::Release);
        self.timer.stop();
        *self.shared.fifo_lock() = None;
        self.schedule = None;
    }

    /// Pushes the mixer's volume and record source to the open sink.
    pub fn apply_mixer(&self, mixer: &Ac97Mixer) {
        let mut slot = self.shared.sink_lock();
        if let Some(sink) = slot.as_mut() {
            apply_mixer_to_sink(self.func, sink.as_mut(), mixer);
        }
    }

    /// Runs the DMA engine for up to `max_bytes`, moving samples between the current guest buffer
    /// and the FIFO. A pass never goes past the end of the current buffer, so every completed
    /// descriptor gets its own completion status.
    pub fn transfer(
        &mut self,
        regs: &mut Ac97BusMasterRegs,
        mem: &GuestMemoryMmap,
        max_bytes: usize,
    ) -> Transferred {
        let func = self.func;
        let mut done = Transferred::default();
        if max_bytes == 0 {
            return done;
        }

        let fifo_slot = self.shared.fifo_lock();
        let fifo = match fifo_slot.as_ref() {
            Some(fifo) => fifo,
            None => return done,
        };
        if regs.func_regs(func).is_halted() {
            done.end_of_stream = true;
            return done;
        }
        // Wait for the guest to acknowledge the previous completion.
        if regs.func_regs(func).sr & SR_BCIS != 0 {
            trace!("AC97: {} waiting for BCIS to clear", func.name());
            return done;
        }

        // Empty buffers are passed over without any completion status.
        let mut empty_bdles = 0;
        while regs.func_regs(func).picb == 0 {
            let func_regs = regs.func_regs_mut(func);
            if func_regs.civ == func_regs.lvi {
                debug!("AC97: {} last valid buffer {} is empty", func.name(), func_regs.civ);
                let sr = func_regs.sr | SR_DCH;
                update_sr(regs, func, sr);
                done.end_of_stream = true;
                return done;
            }
            empty_bdles += 1;
            if empty_bdles > usize::from(MAX_BDLE) {
                warn!("AC97: {} descriptor list holds only empty buffers", func.name());
                return done;
            }
            func_regs.sr &= !SR_CELV;
            if let Err(e) = advance_bdle(mem, func_regs) {
                warn!("AC97: {} failed to fetch descriptor: {}", func.name(), e);
                let sr = func_regs.sr | SR_FIFOE;
                update_sr(regs, func, sr);
                return done;
            }
        }

        let mut left = max_bytes.min(usize::from(regs.func_regs(func).picb) * SAMPLE_BYTES);
        while left > 0 {
            let func_regs = regs.func_regs_mut(func);
            let addr = GuestAddress(u64::from(func_regs.bd.addr));
            let moved = match self.shared.direction {
                StreamDirection::Playback => guest_to_fifo(mem, fifo, addr, left),
                StreamDirection::Capture => fifo_to_guest(mem, fifo, addr, left),
            };
            let n = match moved {
                Ok(n) => n,
                Err(e) => {
                    warn!("AC97: {} DMA at {:#x} failed: {}", func.name(), addr.0, e);
                    let sr = func_regs.sr | SR_FIFOE;
                    update_sr(regs, func, sr);
                    break;
                }
            };
            if n == 0 {
                // FIFO full on output, empty on input.
                break;
            }
            func_regs.picb -= (n / SAMPLE_BYTES) as u16;
            func_regs.bd.addr = func_regs.bd.addr.wrapping_add(n as u32);
            left -= n;
            done.bytes += n;
            if func_regs.picb > 0 {
                continue;
            }

            // Buffer complete. BUP is not emulated: an underrun just halts.
            let mut new_sr = func_regs.sr & !SR_CELV;
            if func_regs.bd.ioc() {
                new_sr |= SR_BCIS;
            }
            if func_regs.civ == func_regs.lvi {
                debug!("AC97: {} reached last valid buffer {}", func.name(), func_regs.civ);
                new_sr |= SR_LVBCI | SR_DCH | SR_CELV;
                done.end_of_stream = true;
            } else if let Err(e) = advance_bdle(mem, func_regs) {
                warn!("AC97: {} failed to fetch descriptor: {}", func.name(), e);
                new_sr |= SR_FIFOE;
            }
            update_sr(regs, func, new_sr);
            break;
        }
        done
    }

    /// Timer side of the stream: DMA plus, unless a worker does it, sink servicing.
    pub fn update(&mut self, regs: &mut Ac97BusMasterRegs, mem: &GuestMemoryMmap) {
        if !self.is_enabled() {
            return;
        }
        let fifo = match self.shared.current_fifo() {
            Some(fifo) => fifo,
            None => return,
        };
        let chunk = self.schedule.map_or(0, |s| s.transfer_bytes);

        match self.shared.direction {
            StreamDirection::Playback => {
                let free = fifo.free();
                if free > 0 {
                    self.transfer(regs, mem, chunk.min(free));
                }
                match &self.worker {
                    Some(worker) => worker.notify(),
                    None => self.shared.service_sink(IoContext::Timer),
                }
            }
            StreamDirection::Capture => {
                match &self.worker {
                    Some(worker) => {
                        let hint = self.schedule.map(|s| s.scheduling_hint).unwrap_or_default();
                        let due = self.last_notify.map_or(true, |t| t.elapsed() >= hint);
                        if due {
                            worker.notify();
                            self.last_notify = Some(Instant::now());
                        }
                    }
                    None => self.shared.service_sink(IoContext::Timer),
                }
                let used = fifo.used();
                if used > 0 {
                    self.transfer(regs, mem, used);
                }
            }
        }
    }

    /// Arms the timer for the next tick, sized to the data left in the current buffer.
    pub fn arm_timer(&mut self, regs: &Ac97BusMasterRegs, now: u64) {
        let picb = usize::from(regs.func_regs(self.func).picb);
        if let Some(schedule) = self.schedule.as_mut() {
            schedule.update(picb * SAMPLE_BYTES);
            self.timer.set(now, now.saturating_add(schedule.transfer_ticks));
        }
    }

    /// Timer callback. Stops re-arming once the sink goes inactive.
    pub fn timer_expired(&mut self, regs: &mut Ac97BusMasterRegs, mem: &GuestMemoryMmap, now: u64) {
        self.update(regs, mem);
        if self.is_active() {
            self.arm_timer(regs, now);
        } else if self.is_enabled() {
            debug!("AC97: {} sink inactive, timer stopped", self.func.name());
        }
    }
}

fn apply_mixer_to_sink(func: Ac97Function, sink: &mut dyn AudioSink, mixer: &Ac97Mixer) {
    match sink_path(func) {
        SinkPath::FrontOut => sink.set_volume(mixer.output_volume()),
        SinkPath::LineIn => {
            sink.set_volume(mixer.line_in_volume().combine(mixer.line_in_gain()));
            sink.set_recording_source(mixer.record_source());
        }
        SinkPath::MicIn => sink.set_volume(mixer.mic_volume().combine(mixer.mic_gain())),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::audio::{RecordSource, Volume};
    use crate::devices::ac97::ac97_params::CodecModel;
    use std::collections::VecDeque;

    const MEM_BASE: u64 = 0x10_0000;
    const MEM_SIZE: usize = 0x4_0000;
    const BDBAR: u64 = MEM_BASE;
    const BUF0: u64 = MEM_BASE + 0x1000;
    const BUF1: u64 = MEM_BASE + 0x2000;

    #[derive(Default)]
    struct SinkLog {
        written: Vec<u8>,
        to_capture: VecDeque<u8>,
        volume: Option<Volume>,
        source: Option<RecordSource>,
        inactive: bool,
    }

    struct TestSink {
        log: Arc<Mutex<SinkLog>>,
    }

    impl AudioSink for TestSink {
        fn is_active(&self) -> bool {
            !self.log.lock().unwrap().inactive
        }

        fn writable(&self) -> usize {
            usize::MAX
        }

        fn readable(&self) -> usize {
            self.log.lock().unwrap().to_capture.len()
        }

        fn read(&mut self, dst: &mut [u8]) -> Result<usize, BoxError> {
            let mut log = self.log.lock().unwrap();
            let n = dst.len().min(log.to_capture.len());
            for b in dst[..n].iter_mut() {
                *b = log.to_capture.pop_front().unwrap();
            }
            Ok(n)
        }

        fn write(&mut self, src: &[u8]) -> Result<usize, BoxError> {
            self.log.lock().unwrap().written.extend_from_slice(src);
            Ok(src.len())
        }

        fn set_volume(&mut self, volume: Volume) {
            self.log.lock().unwrap().volume = Some(volume);
        }

        fn set_recording_source(&mut self, source: RecordSource) {
            self.log.lock().unwrap().source = Some(source);
        }
    }

    struct TestBackend {
        log: Arc<Mutex<SinkLog>>,
        fail: bool,
    }

    impl AudioBackend for TestBackend {
        fn name(&self) -> &str {
            "test"
        }

        fn open_sink(&mut self, _config: &StreamConfig) -> Result<Box<dyn AudioSink>, BoxError> {
            if self.fail {
                return Err("no audio".into());
            }
            Ok(Box::new(TestSink { log: self.log.clone() }))
        }
    }

    struct Fixture {
        mem: GuestMemoryMmap,
        regs: Ac97BusMasterRegs,
        mixer: Ac97Mixer,
        backend: TestBackend,
        params: Ac97Parameters,
        log: Arc<Mutex<SinkLog>>,
    }

    impl Fixture {
        fn new() -> Self {
            let log = Arc::new(Mutex::new(SinkLog::default()));
            Fixture {
                mem: GuestMemoryMmap::from_ranges(&[(GuestAddress(MEM_BASE), MEM_SIZE)]).unwrap(),
                regs: Ac97BusMasterRegs::new(),
                mixer: Ac97Mixer::new(CodecModel::Stac9700),
                backend: TestBackend { log: log.clone(), fail: false },
                params: Ac97Parameters::default(),
                log,
            }
        }

        fn descriptor(&self, index: u64, addr: u64, ctl_len: u32) {
            self.mem.write_obj(addr as u32, GuestAddress(BDBAR + index * 8)).unwrap();
            self.mem.write_obj(ctl_len, GuestAddress(BDBAR + index * 8 + 4)).unwrap();
        }

        // Programs the registers the way the guest driver would before setting RPBM.
        fn start(&mut self, stream: &mut Ac97Stream, lvi: u8) {
            let regs = self.regs.func_regs_mut(stream.func());
            regs.bdbar = BDBAR as u32;
            regs.lvi = lvi;
            regs.cr = CR_RPBM | CR_IOCE | CR_LVBIE;
            regs.move_to_next_buffer();
            regs.sr = 0;
            crate::devices::ac97::ac97_bdl::fetch_bdle(&self.mem, regs).unwrap();
            stream.enable(true, &self.mixer, &mut self.backend, &self.params).unwrap();
        }
    }

    #[test]
    fn output_two_buffers_to_end_of_stream() {
        let mut f = Fixture::new();
        let pattern: Vec<u8> = (0..64u8).collect();
        f.mem.write_slice(&pattern[..32], GuestAddress(BUF0)).unwrap();
        f.mem.write_slice(&pattern[32..], GuestAddress(BUF1)).unwrap();
        f.descriptor(0, BUF0, 16);
        f.descriptor(1, BUF1, BD_IOC | 16);

        let mut stream = Ac97Stream::new(Ac97Function::Output);
        f.start(&mut stream, 1);

        // One pass stops at the end of the current buffer.
        let done = stream.transfer(&mut f.regs, &f.mem, 4096);
        assert_eq!(done, Transferred { bytes: 32, end_of_stream: false });
        let regs = f.regs.func_regs(Ac97Function::Output);
        assert_eq!((regs.civ, regs.piv, regs.picb), (1, 2, 16));
        assert_eq!(regs.sr, 0);

        let done = stream.transfer(&mut f.regs, &f.mem, 4096);
        assert_eq!(done, Transferred { bytes: 32, end_of_stream: true });
        let regs = f.regs.func_regs(Ac97Function::Output);
        assert_eq!(regs.civ, 1);
        assert_eq!(regs.picb, 0);
        assert_eq!(regs.sr, SR_BCIS | SR_LVBCI | SR_DCH | SR_CELV);
        assert_eq!(f.regs.glob_sta & GS_POINT, GS_POINT);

        stream.shared.service_sink(IoContext::Timer);
        assert_eq!(f.log.lock().unwrap().written, pattern);

        // Halted: nothing more is read from the guest.
        let again = stream.transfer(&mut f.regs, &f.mem, 4096);
        assert_eq!(again, Transferred { bytes: 0, end_of_stream: true });
    }

    #[test]
    fn chunks_stop_mid_buffer() {
        let mut f = Fixture::new();
        f.descriptor(0, BUF0, 100);
        f.descriptor(1, BUF1, 100);
        let mut stream = Ac97Stream::new(Ac97Function::Output);
        f.start(&mut stream, 1);

        let done = stream.transfer(&mut f.regs, &f.mem, 60);
        assert_eq!(done, Transferred { bytes: 60, end_of_stream: false });
        let regs = f.regs.func_regs(Ac97Function::Output);
        assert_eq!(regs.picb, 70);
        assert_eq!(u64::from(regs.bd.addr), BUF0 + 60);
        assert_eq!(regs.sr & SR_DCH, 0);
        assert_eq!(stream.fifo_used(), 60);
    }

    #[test]
    fn completion_waits_for_bcis_ack() {
        let mut f = Fixture::new();
        f.descriptor(0, BUF0, BD_IOC | 8);
        f.descriptor(1, BUF1, BD_IOC | 8);
        f.descriptor(2, BUF1, 8);
        let mut stream = Ac97Stream::new(Ac97Function::Output);
        f.start(&mut stream, 2);

        let done = stream.transfer(&mut f.regs, &f.mem, 16);
        assert_eq!(done.bytes, 16);
        assert_eq!(f.regs.po_regs.sr, SR_BCIS);
        assert_eq!(f.regs.po_regs.civ, 1);

        // BCIS is still pending so the engine does not move.
        assert_eq!(stream.transfer(&mut f.regs, &f.mem, 16).bytes, 0);

        crate::devices::ac97::ac97_bus_master::write_sr(&mut f.regs, Ac97Function::Output, SR_BCIS);
        assert_eq!(f.regs.glob_sta & GS_POINT, 0);
        assert_eq!(stream.transfer(&mut f.regs, &f.mem, 16).bytes, 16);
        assert_eq!(f.regs.po_regs.sr & SR_BCIS, SR_BCIS);
    }

    #[test]
    fn capture_completes_one_buffer_per_pass() {
        let mut f = Fixture::new();
        f.descriptor(0, BUF0, BD_IOC | 8);
        f.descriptor(1, BUF0 + 0x100, BD_IOC | 8);
        f.descriptor(2, BUF0 + 0x200, BD_IOC | 8);
        let mut stream = Ac97Stream::new(Ac97Function::Input);
        f.start(&mut stream, 2);
        let captured: Vec<u8> = (1..=48u8).collect();
        let fifo = stream.shared.current_fifo().unwrap();
        assert_eq!(fifo.write_from(&captured), 48);

        let done = stream.transfer(&mut f.regs, &f.mem, 4096);
        assert_eq!(done, Transferred { bytes: 16, end_of_stream: false });
        assert_eq!((f.regs.pi_regs.civ, f.regs.pi_regs.sr), (1, SR_BCIS));
        assert_eq!(f.regs.glob_sta & GS_PIINT, GS_PIINT);
        assert_eq!(stream.fifo_used(), 32);

        for (civ, sr) in [(2, SR_BCIS), (2, SR_BCIS | SR_LVBCI | SR_DCH | SR_CELV)].iter() {
            assert_eq!(stream.transfer(&mut f.regs, &f.mem, 4096).bytes, 0);
            crate::devices::ac97::ac97_bus_master::write_sr(&mut f.regs, Ac97Function::Input, SR_BCIS);
            assert_eq!(stream.transfer(&mut f.regs, &f.mem, 4096).bytes, 16);
            assert_eq!((f.regs.pi_regs.civ, f.regs.pi_regs.sr), (*civ, *sr));
        }

        for (i, chunk) in captured.chunks(16).enumerate() {
            let mut buf = [0u8; 16];
            f.mem.read_slice(&mut buf, GuestAddress(BUF0 + i as u64 * 0x100)).unwrap();
            assert_eq!(&buf[..], chunk);
        }
    }

    #[test]
    fn empty_descriptors_are_skipped() {
        let mut f = Fixture::new();
        f.descriptor(0, BUF0, BD_IOC);
        f.descriptor(1, BUF0, 0);
        f.descriptor(2, BUF1, 4);
        let mut stream = Ac97Stream::new(Ac97Function::Output);
        f.start(&mut stream, 2);

        let done = stream.transfer(&mut f.regs, &f.mem, 4096);
        assert_eq!(done, Transferred { bytes: 8, end_of_stream: true });
        assert_eq!(f.regs.po_regs.civ, 2);
        // The empty IOC buffer did not signal a completion.
        assert_eq!(f.regs.po_regs.sr, SR_LVBCI | SR_DCH | SR_CELV);
    }

    #[test]
    fn empty_last_buffer_only_halts() {
        let mut f = Fixture::new();
        f.descriptor(0, BUF0, BD_IOC);
        let mut stream = Ac97Stream::new(Ac97Function::Output);
        f.start(&mut stream, 0);

        let done = stream.transfer(&mut f.regs, &f.mem, 4096);
        assert_eq!(done, Transferred { bytes: 0, end_of_stream: true });
        assert_eq!(f.regs.po_regs.sr, SR_DCH);
        assert_eq!(f.regs.glob_sta & GS_POINT, 0);
    }

    #[test]
    fn all_empty_list_gives_up() {
        let mut f = Fixture::new();
        for i in 0..32 {
            f.descriptor(i, BUF0, 0);
        }
        let mut stream = Ac97Stream::new(Ac97Function::Output);
        // LVI never matches CIV, so only the empty buffer guard ends the walk.
        f.start(&mut stream, 31);
        f.regs.po_regs.lvi = 40;
        let done = stream.transfer(&mut f.regs, &f.mem, 4096);
        assert_eq!(done, Transferred { bytes: 0, end_of_stream: false });
    }

    #[test]
    fn bad_buffer_address_raises_fifo_error() {
        let mut f = Fixture::new();
        f.descriptor(0, 0x10, 16);
        let mut stream = Ac97Stream::new(Ac97Function::Output);
        f.start(&mut stream, 0);
        f.regs.po_regs.cr |= CR_FEIE;

        let done = stream.transfer(&mut f.regs, &f.mem, 4096);
        assert_eq!(done.bytes, 0);
        assert_eq!(f.regs.po_regs.sr & SR_FIFOE, SR_FIFOE);
        assert_eq!(f.regs.glob_sta & GS_POINT, GS_POINT);
    }

    #[test]
    fn input_writes_captured_samples_to_guest() {
        let mut f = Fixture::new();
        f.descriptor(0, BUF0, BD_IOC | 8);
        let mut stream = Ac97Stream::new(Ac97Function::Input);
        f.start(&mut stream, 0);
        assert_eq!(f.log.lock().unwrap().source, Some(RecordSource::Mic));

        f.log.lock().unwrap().to_capture.extend(1..=20u8);
        stream.update(&mut f.regs, &f.mem);

        let mut buf = [0u8; 16];
        f.mem.read_slice(&mut buf, GuestAddress(BUF0)).unwrap();
        assert_eq!(buf.to_vec(), (1..=16u8).collect::<Vec<_>>());
        assert_eq!(f.regs.pi_regs.sr, SR_BCIS | SR_LVBCI | SR_DCH | SR_CELV);
        assert_eq!(stream.fifo_used(), 4);
        assert_eq!(f.regs.glob_sta & GS_PIINT, GS_PIINT);
    }

    #[test]
    fn output_update_feeds_the_sink_inline() {
        let mut f = Fixture::new();
        let samples = vec![0x5a; 64];
        f.mem.write_slice(&samples, GuestAddress(BUF0)).unwrap();
        f.descriptor(0, BUF0, 32);
        let mut stream = Ac97Stream::new(Ac97Function::Output);
        f.start(&mut stream, 0);

        stream.arm_timer(&f.regs, 0);
        assert_eq!(stream.schedule().unwrap().transfer_bytes, 64);
        stream.timer_expired(&mut f.regs, &f.mem, 0);
        assert_eq!(f.log.lock().unwrap().written, samples);
        assert!(stream.timer().is_armed());
    }

    #[test]
    fn restart_moves_data_on_the_next_tick() {
        let mut f = Fixture::new();
        f.descriptor(0, BUF0, 32);
        f.descriptor(1, BUF1, BD_IOC | 32);
        let mut stream = Ac97Stream::new(Ac97Function::Output);
        f.start(&mut stream, 0);
        stream.arm_timer(&f.regs, 0);
        stream.timer_expired(&mut f.regs, &f.mem, 0);
        assert!(f.regs.po_regs.is_halted());
        // Rearmed with nothing left in the buffer, the tick keeps its size.
        assert_eq!(stream.schedule().unwrap().transfer_bytes, 64);

        // The guest queues another buffer.
        {
            let regs = f.regs.func_regs_mut(Ac97Function::Output);
            regs.lvi = 1;
            regs.sr &= !(SR_DCH | SR_CELV);
            advance_bdle(&f.mem, regs).unwrap();
        }
        stream.timer_expired(&mut f.regs, &f.mem, 1);
        assert_eq!(f.log.lock().unwrap().written.len(), 128);
        assert_eq!(f.regs.po_regs.sr & SR_BCIS, SR_BCIS);
    }

    #[test]
    fn inactive_sink_stops_the_timer() {
        let mut f = Fixture::new();
        f.descriptor(0, BUF0, 32);
        let mut stream = Ac97Stream::new(Ac97Function::Output);
        f.start(&mut stream, 0);
        stream.arm_timer(&f.regs, 0);

        f.log.lock().unwrap().inactive = true;
        assert!(stream.timer_mut().take_due(u64::MAX));
        stream.timer_expired(&mut f.regs, &f.mem, 10);
        assert!(!stream.timer().is_armed());
        assert!(stream.is_enabled());
        assert!(!stream.is_active());
    }

    #[test]
    fn failing_backend_falls_back_to_null_sink() {
        let mut f = Fixture::new();
        f.backend.fail = true;
        f.descriptor(0, BUF0, 32);
        let mut stream = Ac97Stream::new(Ac97Function::Output);
        f.start(&mut stream, 0);
        assert!(stream.is_active());
        assert_eq!(stream.transfer(&mut f.regs, &f.mem, 4096).bytes, 64);
    }

    #[test]
    fn disable_drops_sink_and_data() {
        let mut f = Fixture::new();
        f.descriptor(0, BUF0, 32);
        let mut stream = Ac97Stream::new(Ac97Function::Output);
        f.start(&mut stream, 0);
        stream.transfer(&mut f.regs, &f.mem, 4096);
        assert_eq!(stream.fifo_used(), 64);

        stream.enable(false, &f.mixer, &mut f.backend, &f.params).unwrap();
        assert!(!stream.is_enabled());
        assert_eq!(stream.fifo_used(), 0);
        assert!(stream.config().is_none());
    }

    #[test]
    fn rate_change_reopens_sink() {
        let mut f = Fixture::new();
        f.descriptor(0, BUF0, 32);
        let mut stream = Ac97Stream::new(Ac97Function::Output);
        f.start(&mut stream, 0);
        assert_eq!(stream.config().unwrap().props.frame_rate, 48000);

        f.mixer.set(MIXER_PCM_FRONT_DAC_RATE_2C, 22050);
        stream.reopen(&f.mixer, &mut f.backend, &f.params).unwrap();
        let config = stream.config().unwrap();
        assert_eq!(config.props.frame_rate, 22050);
        assert_eq!(config.path, SinkPath::FrontOut);
        assert_eq!(stream.schedule().unwrap().timer_hz, 100);
    }

    #[test]
    fn volume_follows_mixer() {
        let mut f = Fixture::new();
        f.descriptor(0, BUF0, 32);
        let mut stream = Ac97Stream::new(Ac97Function::Output);
        f.start(&mut stream, 0);
        assert_eq!(f.log.lock().unwrap().volume, Some(f.mixer.output_volume()));

        assert!(f.log.lock().unwrap().volume.unwrap().muted);

        f.mixer.writew(MIXER_MASTER_VOL_MUTE_02, 0x0000);
        f.mixer.writew(MIXER_PCM_OUT_VOL_MUTE_18, 0x0808);
        stream.apply_mixer(&f.mixer);
        let volume = f.log.lock().unwrap().volume.unwrap();
        assert!(!volume.muted);
        assert_eq!(volume, f.mixer.output_volume());
    }

    #[test]
    fn line_in_volume_includes_record_gain() {
        let mut f = Fixture::new();
        f.descriptor(0, BUF0, 32);
        f.mixer.writew(MIXER_LINE_IN_VOL_MUTE_10, 0x0808);
        f.mixer.writew(MIXER_RECORD_GAIN_MUTE_1C, 0x0000);
        let mut stream = Ac97Stream::new(Ac97Function::Input);
        f.start(&mut stream, 0);
        let volume = f.log.lock().unwrap().volume.unwrap();
        assert!(!volume.muted);
        assert_eq!(volume, f.mixer.line_in_volume().combine(f.mixer.line_in_gain()));

        // Either control mutes the input.
        f.mixer.writew(MIXER_RECORD_GAIN_MUTE_1C, MIXER_MUTE_BIT);
        stream.apply_mixer(&f.mixer);
        assert!(f.log.lock().unwrap().volume.unwrap().muted);
        f.mixer.writew(MIXER_RECORD_GAIN_MUTE_1C, 0x0000);
        f.mixer.writew(MIXER_LINE_IN_VOL_MUTE_10, MIXER_MUTE_BIT | 0x0808);
        stream.apply_mixer(&f.mixer);
        assert!(f.log.lock().unwrap().volume.unwrap().muted);
    }
}
