use std::sync::mpsc;
use std::thread;
use pulse::sample::{Format, Spec};
use crate::audio::pulse::context::PulseContext;
use crate::audio::pulse::message::PulseMessageChannel;
use crate::audio::pulse::{PulseError, Result};
use crate::audio::{AudioBackend, AudioSink, BoxError, NullSink, PcmProps, SampleFormat, StreamConfig, StreamDirection};

/// Backend playing PCM out through a PulseAudio server. The context lives on its own thread and
/// is driven through a message channel. Capture is not routed to the server and gets silence.
pub struct PulseClient {
    channel: PulseMessageChannel,
}

impl PulseClient {
    /// Connects to the default server, failing if it cannot be reached.
    pub fn connect() -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let (connected_tx, connected_rx) = mpsc::channel();

        thread::Builder::new()
            .name("ac97-pulse".to_string())
            .spawn(move || {
                let mut ctx = match PulseContext::new() {
                    Ok(ctx) => ctx,
                    Err(err) => {
                        let _ = connected_tx.send(Err(err));
                        return;
                    }
                };
                match ctx.connect() {
                    Ok(()) => {
                        let _ = connected_tx.send(Ok(()));
                        ctx.run(rx);
                    }
                    Err(err) => {
                        let _ = connected_tx.send(Err(err));
                    }
                }
            })
            .map_err(|_| PulseError::CreateFailed("context thread"))?;

        connected_rx.recv().map_err(|_| PulseError::RecvMessageFailed)??;
        Ok(PulseClient {
            channel: PulseMessageChannel::new(tx),
        })
    }

    fn create_spec(props: &PcmProps) -> Spec {
        let format = match props.format {
            SampleFormat::U8 => Format::U8,
            SampleFormat::S16LE => Format::S16le,
            SampleFormat::S24LE => Format::S24le,
            SampleFormat::S32LE => Format::S32le,
        };

        Spec {
            format,
            rate: props.frame_rate,
            channels: props.channels as u8,
        }
    }
}

impl AudioBackend for PulseClient {
    fn name(&self) -> &str {
        "pulse"
    }

    fn open_sink(&mut self, config: &StreamConfig) -> std::result::Result<Box<dyn AudioSink>, BoxError> {
        if config.direction != StreamDirection::Playback {
            return Ok(Box::new(NullSink::new(config)));
        }
        let spec = PulseClient::create_spec(&config.props);
        // Let the server buffer a few service intervals.
        let buffer_size = config.props.millis_to_bytes(config.scheduling_hint.as_millis() as u64 * 4);
        let stream = self.channel.send_new_playback_stream(
            spec,
            config.name,
            buffer_size,
            self.channel.clone(),
        )?;
        Ok(Box::new(stream))
    }
}
