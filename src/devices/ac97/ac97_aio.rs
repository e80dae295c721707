use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use vmm_sys_util::eventfd::EventFd;

use crate::devices::ac97::ac97_stream::{IoContext, StreamShared};

/// Thread servicing one stream's host sink, woken by the timer through an eventfd.
pub struct AsyncIoWorker {
    thread: Option<JoinHandle<()>>,
    event: EventFd,
    shutdown: Arc<AtomicBool>,
    enabled: Arc<AtomicBool>,
}

impl AsyncIoWorker {
    /// Spawns the worker and waits until it runs.
    pub fn create(shared: Arc<StreamShared>) -> io::Result<Self> {
        let event = EventFd::new(0)?;
        let thread_event = event.try_clone()?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let enabled = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = mpsc::channel();

        let thread_shutdown = shutdown.clone();
        let thread_enabled = enabled.clone();
        let thread = thread::Builder::new()
            .name("ac97-aio".to_string())
            .spawn(move || {
                // The receiver only goes away if `create` gave up on us.
                if started_tx.send(()).is_err() {
                    return;
                }
                run_worker(&shared, &thread_event, &thread_shutdown, &thread_enabled);
            })?;

        started_rx
            .recv()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "AC97 worker exited at startup"))?;

        Ok(AsyncIoWorker {
            thread: Some(thread),
            event,
            shutdown,
            enabled,
        })
    }

    /// Wakes the worker.
    pub fn notify(&self) {
        if let Err(e) = self.event.write(1) {
            warn!("AC97: failed to notify worker: {}", e);
        }
    }

    /// While disabled the worker wakes but leaves the sink alone.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Stops the thread and waits for it.
    pub fn destroy(&mut self) {
        let thread = match self.thread.take() {
            Some(thread) => thread,
            None => return,
        };
        self.shutdown.store(true, Ordering::Release);
        self.notify();
        if thread.join().is_err() {
            warn!("AC97: worker thread panicked");
        }
    }
}

impl Drop for AsyncIoWorker {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn run_worker(shared: &StreamShared, event: &EventFd, shutdown: &AtomicBool, enabled: &AtomicBool) {
    loop {
        if let Err(e) = event.read() {
            warn!("AC97: worker wait failed: {}", e);
            return;
        }
        if shutdown.load(Ordering::Acquire) {
            return;
        }
        if enabled.load(Ordering::Acquire) {
            shared.service_sink(IoContext::Worker);
        }
    }
}
