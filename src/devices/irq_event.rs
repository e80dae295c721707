use std::{io, result};
use kvm_ioctls::VmFd;
use vmm_sys_util::eventfd::EventFd;

/// A level-triggered interrupt line as seen from the device side.
pub trait IrqLine: Send {
    /// Drives the line to `asserted`.
    fn set_level(&self, asserted: bool);
}

/// KVM irqfd pair: `trigger_event` raises the line, `resample_event` fires when the guest EOIs it
/// so the device can re-raise the line if it is still asserted.
pub struct IrqLevelEvent {
    trigger_event: EventFd,
    resample_event: EventFd,
}

type Result<T> = result::Result<T, io::Error>;

impl IrqLevelEvent {
    pub fn register(vm_fd: &VmFd, irq: u8) -> Result<Self> {
        let ev = Self::new()?;
        vm_fd.register_irqfd_with_resample(&ev.trigger_event, &ev.resample_event, irq as u32)?;
        Ok(ev)
    }

    pub fn new() -> Result<Self> {
        let trigger_event = EventFd::new(0)?;
        let resample_event = EventFd::new(0)?;
        Ok(IrqLevelEvent {
            trigger_event, resample_event,
        })
    }

    pub fn try_clone(&self) -> Result<IrqLevelEvent> {
        let trigger_event = self.trigger_event.try_clone()?;
        let resample_event = self.resample_event.try_clone()?;
        Ok(IrqLevelEvent {
            trigger_event,
            resample_event,
        })
    }

    pub fn trigger(&self) -> Result<()> {
        self.trigger_event.write(1)
    }

    pub fn wait_resample(&self) -> Result<()> {
        let _ = self.resample_event.read()?;
        Ok(())
    }

    /// Signals the resample event, as KVM does on EOI.
    pub fn resample(&self) -> Result<()> {
        self.resample_event.write(1)
    }
}

impl IrqLine for IrqLevelEvent {
    // Deassertion is implicit: KVM lowers the line on EOI and the resample thread only re-raises
    // it while the device still has an interrupt pending.
    fn set_level(&self, asserted: bool) {
        if asserted {
            if let Err(e) = self.trigger() {
                warn!("AC97: failed to trigger irq: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn trigger_counts() {
        let ev = IrqLevelEvent::new().unwrap();
        let clone = ev.try_clone().unwrap();
        ev.set_level(true);
        ev.set_level(false);
        clone.set_level(true);
        assert_eq!(ev.trigger_event.read().unwrap(), 2);
    }

    #[test]
    fn resample_wakes_waiter() {
        let ev = IrqLevelEvent::new().unwrap();
        ev.resample().unwrap();
        ev.wait_resample().unwrap();
    }
}
