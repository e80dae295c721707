// Copyright 2018 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::{self, JoinHandle};

use kvm_ioctls::VmFd;
use thiserror::Error;
use vm_memory::GuestMemoryMmap;

use crate::audio::{AudioBackend, NullBackend};
use crate::devices::ac97::ac97_bus_master::Ac97BusMaster;
use crate::devices::ac97::ac97_mixer::Ac97Mixer;
use crate::devices::ac97::ac97_params::Ac97Parameters;
use crate::devices::ac97::ac97_regs::{Ac97Function, MASTER_REGS_SIZE, MIXER_REGS_SIZE};
use crate::devices::ac97::ac97_snapshot::{self, SnapshotError};
use crate::devices::ac97::ac97_timer::{HostClock, VirtualClock};
use crate::devices::irq_event::{IrqLevelEvent, IrqLine};

// Use 82801AA because it's what qemu does.
const PCI_DEVICE_ID_INTEL_82801AA_5: u16 = 0x2415;
const PCI_CLASS_MULTIMEDIA_AUDIO: u16 = 0x0401;
const PCI_VENDOR_ID_INTEL: u16 = 0x8086;

/// Errors that are possible from a `Ac97`.
#[derive(Error, Debug)]
pub enum Ac97Error {
    #[error("Error creating IRQ level event: {0}")]
    IrqLevelEventError(io::Error),
    #[error("Error starting IRQ resample thread: {0}")]
    ResampleThread(io::Error),
    #[error("Saved state: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// The two I/O regions of the device.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Ac97Bar {
    /// Native Audio Mixer, the codec registers.
    Mixer,
    /// Native Audio Bus Master.
    BusMaster,
}

/// Result of a non-blocking port access.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PortIoStatus {
    Done,
    /// The device is busy; the access must be replayed later.
    Retry,
}

/// PCI identity of the controller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Ac97PciIds {
    pub vendor_id: u16,
    pub device_id: u16,
    pub class_code: u16,
    pub subsystem_vendor_id: u16,
    pub subsystem_id: u16,
}

/// Everything guarded by the device lock.
pub struct Ac97State {
    pub bus_master: Ac97BusMaster,
    pub mixer: Ac97Mixer,
}

impl Ac97State {
    fn read_mixer(&mut self, offset: u64, data: &mut [u8]) {
        // Any codec access completes the one the semaphore was taken for.
        self.bus_master.regs_mut().acc_sema = 0;
        match data.len() {
            // The mixer is only accessed with 16-bit words.
            2 => data.copy_from_slice(&self.mixer.readw(offset).to_le_bytes()),
            l => {
                warn!("AC97: mixer read length of {}", l);
                for b in data.iter_mut() {
                    *b = 0xff;
                }
            }
        }
    }

    fn write_mixer(&mut self, offset: u64, data: &[u8]) {
        self.bus_master.regs_mut().acc_sema = 0;
        match data.len() {
            // The mixer is only accessed with 16-bit words.
            2 => {
                let effect = self.mixer.writew(offset, u16::from_le_bytes([data[0], data[1]]));
                // Apply the new mixer settings to the bus master.
                self.bus_master.apply_mixer_effect(effect, &mut self.mixer);
            }
            l => warn!("AC97: mixer write length of {}", l),
        }
    }

    fn read_bus_master(&mut self, offset: u64, data: &mut [u8]) {
        match data.len() {
            1 => data[0] = self.bus_master.readb(offset),
            2 => data.copy_from_slice(&self.bus_master.readw(offset).to_le_bytes()),
            4 => data.copy_from_slice(&self.bus_master.readl(offset).to_le_bytes()),
            l => {
                warn!("AC97: read length of {}", l);
                for b in data.iter_mut() {
                    *b = 0xff;
                }
            }
        }
    }

    fn write_bus_master(&mut self, offset: u64, data: &[u8]) {
        match data.len() {
            1 => self.bus_master.writeb(offset, data[0], &self.mixer),
            2 => self.bus_master.writew(offset, u16::from_le_bytes([data[0], data[1]])),
            4 => self
                .bus_master
                .writel(offset, u32::from_le_bytes([data[0], data[1], data[2], data[3]])),
            l => warn!("AC97: write length of {}", l),
        }
    }

    fn read_bar(&mut self, bar: Ac97Bar, offset: u64, data: &mut [u8]) {
        match bar {
            Ac97Bar::Mixer => self.read_mixer(offset, data),
            Ac97Bar::BusMaster => self.read_bus_master(offset, data),
        }
    }

    fn write_bar(&mut self, bar: Ac97Bar, offset: u64, data: &[u8]) {
        match bar {
            Ac97Bar::Mixer => self.write_mixer(offset, data),
            Ac97Bar::BusMaster => self.write_bus_master(offset, data),
        }
    }
}

/// AC97 audio device emulation.
/// Provides the port I/O interface for the internal Ac97 emulation.
/// Internally the `Ac97BusMaster` and `Ac97Mixer` structs are used to emulated the bus master and
/// mixer registers respectively. `Ac97BusMaster` handles moving samples between guest memory and
/// the audio backend.
pub struct Ac97Dev {
    params: Ac97Parameters,
    state: Arc<Mutex<Ac97State>>,
    irq_event: Option<IrqLevelEvent>,
    resample_thread: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl Ac97Dev {
    /// Creates an 'Ac97Dev' that uses the given guest memory and starts with all registers at
    /// default values.
    pub fn new(
        mem: GuestMemoryMmap,
        backend: Box<dyn AudioBackend>,
        params: Ac97Parameters,
        clock: Arc<dyn VirtualClock>,
    ) -> Self {
        info!("AC97: {} codec, {} backend", params.codec, backend.name());
        let state = Ac97State {
            bus_master: Ac97BusMaster::new(mem, backend, params, clock),
            mixer: Ac97Mixer::new(params.codec),
        };
        Ac97Dev {
            params,
            state: Arc::new(Mutex::new(state)),
            irq_event: None,
            resample_thread: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates an `Ac97Dev` wired to `irq` of the VM and to the host audio server. If no server
    /// can be reached the device falls back to the null backend.
    pub fn try_new(
        vm_fd: &VmFd,
        irq: u8,
        mem: GuestMemoryMmap,
        params: Ac97Parameters,
    ) -> Result<Self, Ac97Error> {
        let mut ac97 = Self::new(mem, Self::default_backend(), params, Arc::new(HostClock::new()));
        let irq_event = IrqLevelEvent::register(vm_fd, irq).map_err(Ac97Error::IrqLevelEventError)?;
        ac97.set_irq_event(irq_event)?;
        Ok(ac97)
    }

    #[cfg(feature = "pulse")]
    fn default_backend() -> Box<dyn AudioBackend> {
        match crate::audio::pulse::PulseClient::connect() {
            Ok(client) => Box::new(client),
            Err(e) => {
                warn!("AC97: PulseAudio unavailable ({}), using null audio", e);
                Box::new(NullBackend::new())
            }
        }
    }

    #[cfg(not(feature = "pulse"))]
    fn default_backend() -> Box<dyn AudioBackend> {
        Box::new(NullBackend::new())
    }

    fn lock_state(&self) -> MutexGuard<Ac97State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn params(&self) -> &Ac97Parameters {
        &self.params
    }

    /// Routes interrupts to `irq`.
    pub fn set_irq_line(&self, irq: Box<dyn IrqLine>) {
        self.lock_state().bus_master.set_irq(irq);
    }

    /// Routes interrupts to a KVM irqfd pair and starts a thread re-raising the line after each
    /// EOI while an interrupt is still pending.
    pub fn set_irq_event(&mut self, irq_event: IrqLevelEvent) -> Result<(), Ac97Error> {
        let line = irq_event.try_clone().map_err(Ac97Error::IrqLevelEventError)?;
        let resample = irq_event.try_clone().map_err(Ac97Error::IrqLevelEventError)?;
        self.set_irq_line(Box::new(line));

        let state = self.state.clone();
        let shutdown = self.shutdown.clone();
        let thread = thread::Builder::new()
            .name("ac97-resample".to_string())
            .spawn(move || loop {
                if let Err(e) = resample.wait_resample() {
                    warn!("AC97: failed to wait for irq resample: {}", e);
                    return;
                }
                if shutdown.load(Ordering::Acquire) {
                    return;
                }
                let state = state.lock().unwrap_or_else(PoisonError::into_inner);
                if state.bus_master.has_irq() {
                    if let Err(e) = resample.trigger() {
                        warn!("AC97: failed to re-trigger irq: {}", e);
                    }
                }
            })
            .map_err(Ac97Error::ResampleThread)?;

        self.irq_event = Some(irq_event);
        self.resample_thread = Some(thread);
        Ok(())
    }

    /// Handles a guest read of `data.len()` bytes at `offset` in `bar`.
    pub fn read_bar(&self, bar: Ac97Bar, offset: u64, data: &mut [u8]) {
        self.lock_state().read_bar(bar, offset, data);
    }

    /// Handles a guest write of `data` at `offset` in `bar`.
    pub fn write_bar(&self, bar: Ac97Bar, offset: u64, data: &[u8]) {
        self.lock_state().write_bar(bar, offset, data);
    }

    /// Like `read_bar` but returns `Retry` instead of waiting for a busy device.
    pub fn try_read_bar(&self, bar: Ac97Bar, offset: u64, data: &mut [u8]) -> PortIoStatus {
        match self.state.try_lock() {
            Ok(mut state) => {
                state.read_bar(bar, offset, data);
                PortIoStatus::Done
            }
            Err(TryLockError::Poisoned(e)) => {
                e.into_inner().read_bar(bar, offset, data);
                PortIoStatus::Done
            }
            Err(TryLockError::WouldBlock) => PortIoStatus::Retry,
        }
    }

    /// Like `write_bar` but returns `Retry` instead of waiting for a busy device.
    pub fn try_write_bar(&self, bar: Ac97Bar, offset: u64, data: &[u8]) -> PortIoStatus {
        match self.state.try_lock() {
            Ok(mut state) => {
                state.write_bar(bar, offset, data);
                PortIoStatus::Done
            }
            Err(TryLockError::Poisoned(e)) => {
                e.into_inner().write_bar(bar, offset, data);
                PortIoStatus::Done
            }
            Err(TryLockError::WouldBlock) => PortIoStatus::Retry,
        }
    }

    /// Runs the stream timers that are due on the device clock. Returns how many fired.
    pub fn run_timers(&self) -> usize {
        self.lock_state().bus_master.run_timers()
    }

    /// Earliest pending timer deadline in clock nanoseconds.
    pub fn next_deadline(&self) -> Option<u64> {
        self.lock_state().bus_master.next_deadline()
    }

    /// Resets the device as on a guest reset.
    pub fn reset(&self) {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        state.bus_master.reset(&mut state.mixer);
    }

    pub fn is_stream_enabled(&self, func: Ac97Function) -> bool {
        self.lock_state().bus_master.stream(func).is_enabled()
    }

    pub fn has_irq(&self) -> bool {
        self.lock_state().bus_master.has_irq()
    }

    pub fn save_state<W: Write>(&self, w: &mut W) -> Result<(), Ac97Error> {
        let state = self.lock_state();
        ac97_snapshot::save_state(&state.bus_master, &state.mixer, w)?;
        Ok(())
    }

    pub fn load_state<R: Read>(&self, r: &mut R) -> Result<(), Ac97Error> {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        ac97_snapshot::load_state(&mut state.bus_master, &mut state.mixer, r)?;
        Ok(())
    }

    pub fn pci_ids(&self) -> Ac97PciIds {
        let (subsystem_vendor_id, subsystem_id) = self.params.codec.pci_subsystem_ids();
        Ac97PciIds {
            vendor_id: PCI_VENDOR_ID_INTEL,
            device_id: PCI_DEVICE_ID_INTEL_82801AA_5,
            class_code: PCI_CLASS_MULTIMEDIA_AUDIO,
            subsystem_vendor_id,
            subsystem_id,
        }
    }

    /// Sizes of the I/O regions the VMM has to map.
    pub fn bar_sizes() -> [(Ac97Bar, u64); 2] {
        [(Ac97Bar::Mixer, MIXER_REGS_SIZE), (Ac97Bar::BusMaster, MASTER_REGS_SIZE)]
    }
}

impl Drop for Ac97Dev {
    fn drop(&mut self) {
        let thread = match self.resample_thread.take() {
            Some(thread) => thread,
            None => return,
        };
        self.shutdown.store(true, Ordering::Release);
        if let Some(irq_event) = &self.irq_event {
            if let Err(e) = irq_event.resample() {
                warn!("AC97: failed to wake resample thread: {}", e);
                return;
            }
        }
        if thread.join().is_err() {
            warn!("AC97: resample thread panicked");
        }
    }
}
