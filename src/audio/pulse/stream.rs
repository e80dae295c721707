use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use pulse::sample::Spec;
use pulse::stream::{FlagSet, SeekMode, State, Stream};
use crate::audio::pulse::{PulseError, Result};
use crate::audio::pulse::context::PulseContext;
use crate::audio::pulse::message::PulseMessageChannel;
use crate::audio::{AudioSink, BoxError, Volume};

// Bytes the server is ready to take, as reported by the write callback.
struct Available {
    byte_count: Mutex<usize>,
}

impl Available {
    fn new() -> Self {
        Available {
            byte_count: Mutex::new(0),
        }
    }

    fn byte_count_lock(&self) -> MutexGuard<usize> {
        self.byte_count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, value: usize) {
        *self.byte_count_lock() = value;
    }

    fn decrement(&self, amount: usize) {
        let mut byte_count = self.byte_count_lock();
        *byte_count = byte_count.saturating_sub(amount);
    }

    fn get(&self) -> usize {
        *self.byte_count_lock()
    }
}

pub struct PulseStream {
    spec: Spec,
    buffer_size: usize,
    stream: Arc<Mutex<Stream>>,
    avail: Arc<Available>,
    channel: PulseMessageChannel,
}

impl PulseStream {

    fn stream_connected_finish(&mut self, ctx: &PulseContext) {
        self.stream().set_state_callback(None);
        ctx.mainloop_unlock();
    }

    fn wait_stream_connected(&mut self, ctx: &PulseContext) -> Result<()> {
        loop {
            let state = self.stream().get_state();
            if state == State::Ready {
                break;
            } else if !state.is_good() {
                return Err(PulseError::StreamConnectFailed);
            }
            ctx.mainloop_wait();
        }
        Ok(())
    }

    pub fn connect(&mut self, ctx: &PulseContext) -> Result<()> {
        ctx.mainloop_lock();

        self.stream().set_state_callback(Some(Box::new({
            let ml_ref = ctx.mainloop();
            move || unsafe {
                (*ml_ref.as_ptr()).signal(false);
            }
        })));


        if let Err(err) = self.stream().connect_playback(
            None,
            None,
            FlagSet::NOFLAGS,
            None,
            None) {
            self.stream().set_state_callback(None);
            ctx.mainloop_unlock();
            return Err(PulseError::StreamConnect(err))
        }

        let result = self.wait_stream_connected(ctx);
        self.stream_connected_finish(ctx);
        result
    }

    pub fn new_playback(mut stream: Stream, spec: Spec, buffer_size: usize, channel: PulseMessageChannel) -> Self {
        let avail = Arc::new(Available::new());

        stream.set_write_callback(Some(Box::new({
            let avail = avail.clone();
            move |writeable_bytes| {
                avail.update(writeable_bytes);
            }
        })));

        let stream = Arc::new(Mutex::new(stream));
        PulseStream {
            spec,
            buffer_size,
            avail,
            stream,
            channel,
        }
    }

    fn stream(&self) -> MutexGuard<Stream> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn uncork(&self) -> Result<()> {
        self.channel.send_mainloop_lock()?;
        if self.stream().is_corked().unwrap_or(false) {
            self.stream().uncork(None);
        }
        self.channel.send_mainloop_unlock()?;
        Ok(())
    }
}

impl AudioSink for PulseStream {
    fn is_active(&self) -> bool {
        self.stream().get_state().is_good()
    }

    fn writable(&self) -> usize {
        let frame_size = self.spec.frame_size();
        let bytes = self.avail.get().min(self.buffer_size);
        bytes - bytes % frame_size.max(1)
    }

    fn readable(&self) -> usize {
        0
    }

    fn read(&mut self, _dst: &mut [u8]) -> std::result::Result<usize, BoxError> {
        Ok(0)
    }

    fn write(&mut self, src: &[u8]) -> std::result::Result<usize, BoxError> {
        if src.is_empty() {
            return Ok(0);
        }
        self.uncork()?;
        self.channel.send_mainloop_lock()?;
        let result = self.stream().write_copy(src, 0, SeekMode::Relative);
        self.channel.send_mainloop_unlock()?;
        result.map_err(PulseError::StreamWrite)?;
        self.avail.decrement(src.len());
        Ok(src.len())
    }

    fn set_volume(&mut self, volume: Volume) {
        let index = match self.stream().get_index() {
            Some(index) => index,
            None => return,
        };
        if let Err(err) = self.channel.send_set_volume(index, self.spec.channels, volume) {
            warn!("PulseAudio: failed to set volume: {}", err);
        }
    }
}
