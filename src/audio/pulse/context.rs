use std::cell::RefCell;
use std::ops::DerefMut;
use std::rc::Rc;
use std::sync::mpsc::Receiver;
use pulse::context::{Context, FlagSet, State};
use pulse::mainloop::threaded::Mainloop;
use pulse::proplist::{properties, Proplist};
use pulse::sample::Spec;
use pulse::stream::Stream;
use pulse::volume::{ChannelVolumes, Volume as PaVolume};
use crate::audio::Volume;
use crate::audio::pulse::{Result, PulseError, PulseStream};
use crate::audio::pulse::message::{PulseContextMessage, PulseContextRequest, PulseMessageChannel};

pub struct PulseContext {
    mainloop: Rc<RefCell<Mainloop>>,
    context: Rc<RefCell<Context>>,
}

impl PulseContext {
    pub fn mainloop_lock(&self) {
        self.mainloop.borrow_mut().lock();
    }

    pub fn mainloop_unlock(&self) {
        self.mainloop.borrow_mut().unlock();
    }

    pub fn mainloop_wait(&self) {
        self.mainloop.borrow_mut().wait();
    }

    pub fn mainloop(&self) -> Rc<RefCell<Mainloop>> {
        self.mainloop.clone()
    }

    pub fn new() -> Result<Self> {
        let mainloop = Mainloop::new()
            .ok_or(PulseError::CreateFailed("mainloop"))?;

        let mut proplist = Proplist::new()
            .ok_or(PulseError::CreateFailed("proplist"))?;

        proplist.set_str(properties::APPLICATION_NAME, "ich-ac97")
            .map_err(|_| PulseError::CreateFailed("application name property"))?;

        let context = Context::new_with_proplist(
            &mainloop,
            "AC97Context",
            &proplist
        ).ok_or(PulseError::CreateFailed("context"))?;

        Ok(PulseContext {
            mainloop: Rc::new(RefCell::new(mainloop)),
            context: Rc::new(RefCell::new(context)),
        })
    }

    fn start_and_connect(&self) -> Result<()> {
        self.mainloop_lock();

        self.context.borrow_mut().set_state_callback(Some(Box::new({
            let ml_ref = self.mainloop.clone();
            move || unsafe {
                (*ml_ref.as_ptr()).signal(false);
            }
        })));

        self.context.borrow_mut().connect(None, FlagSet::NOFLAGS, None)
            .map_err(PulseError::ConnectFailed)?;

        self.mainloop.borrow_mut().start()
            .map_err(PulseError::StartFailed)?;

        Ok(())
    }

    fn wait_context_connected(&self) -> Result<()> {
        loop {
            let st = self.context.borrow().get_state();
            if st == State::Ready {
                break;
            } else if !st.is_good() {
                return Err(PulseError::ConnectFailedErr)
            }
            self.mainloop.borrow_mut().wait();
        }
        Ok(())
    }

    fn context_connect_finish(&self) {
        self.context.borrow_mut().set_state_callback(None);
        self.mainloop_unlock();
    }

    pub fn connect(&self) -> Result<()> {
        let result = self.start_and_connect().and_then(|()| {
            self.wait_context_connected()
        });
        self.context_connect_finish();
        result
    }

    fn new_playback_stream(&self, spec: Spec, name: &str, buffer_size: usize, channel: PulseMessageChannel) -> Result<PulseStream> {
        self.mainloop_lock();

        let stream = Stream::new(self.context.borrow_mut().deref_mut(),
                                 name,
                                 &spec,
                                 None);
        let result = match stream {
            Some(stream) => Ok(PulseStream::new_playback(stream, spec, buffer_size, channel)),
            None => Err(PulseError::CreateFailed("stream")),
        };
        self.mainloop_unlock();
        result
    }

    fn set_volume(&self, index: u32, channels: u8, volume: Volume) {
        let level = (f64::from(PaVolume::NORMAL.0) * volume.scaler()) as u32;
        let mut cv = ChannelVolumes::default();
        cv.set(channels, PaVolume(level));

        self.mainloop_lock();
        let mut introspect = self.context.borrow().introspect();
        introspect.set_sink_input_volume(index, &cv, None);
        introspect.set_sink_input_mute(index, volume.muted, None);
        self.mainloop_unlock();
    }

    pub fn run(&mut self, receiver: Receiver<PulseContextMessage>) {
        loop {
            match receiver.recv() {
                Ok(msg) => self.dispatch_message(msg),
                Err(_) => break,
            }
        }
    }

    fn dispatch_message(&mut self, msg: PulseContextMessage) {
        match msg.request() {
            PulseContextRequest::MainloopLock => {
                self.mainloop_lock();
                msg.respond_ok();
            }
            PulseContextRequest::MainloopUnlock => {
                self.mainloop_unlock();
                msg.respond_ok();
            }
            PulseContextRequest::NewPlaybackStream {spec, name, buffer_size, channel} => {
                let result = self.new_playback_stream(*spec, name, *buffer_size, channel.clone())
                    .and_then(|mut ps| ps.connect(self).map(|()| ps));
                match result {
                    Ok(ps) => msg.respond_stream(ps),
                    Err(err) => msg.respond_err(err),
                }
            }
            PulseContextRequest::SetVolume {index, channels, volume} => {
                self.set_volume(*index, *channels, *volume);
                msg.respond_ok();
            }
        }
    }
}
