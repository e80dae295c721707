// Copyright 2018 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::sync::Arc;

use vm_memory::GuestMemoryMmap;

use crate::audio::AudioBackend;
use crate::devices::ac97::ac97_bdl::{advance_bdle, fetch_bdle, BufferDescriptor};
use crate::devices::ac97::ac97_mixer::{Ac97Mixer, MixerEffect};
use crate::devices::ac97::ac97_params::Ac97Parameters;
use crate::devices::ac97::ac97_regs::*;
use crate::devices::ac97::ac97_stream::{Ac97Stream, Transferred};
use crate::devices::ac97::ac97_timer::VirtualClock;
use crate::devices::irq_event::IrqLine;

/// Registers of one bus master function (PCM in, PCM out or mic in), plus the cached copy of
/// the descriptor being processed.
#[derive(Clone, Debug)]
pub struct Ac97FunctionRegs {
    pub bdbar: u32,
    pub civ: u8,
    pub lvi: u8,
    pub sr: u16,
    pub picb: u16,
    pub piv: u8,
    pub cr: u8,
    pub bd: BufferDescriptor,
    pub bd_valid: bool,
}

impl Ac97FunctionRegs {
    /// Creates a new set of function registers, these can be used for the capture, playback, or
    /// microphone functions.
    pub fn new() -> Self {
        Ac97FunctionRegs {
            bdbar: 0,
            civ: 0,
            lvi: 0,
            sr: SR_DCH,
            picb: 0,
            piv: 0,
            cr: 0,
            bd: BufferDescriptor::default(),
            bd_valid: false,
        }
    }

    /// Reset all the registers to the PoR defaults. `sr` is left to the caller so the interrupt
    /// state can be updated with it.
    pub fn do_reset(&mut self) {
        self.bdbar = 0;
        self.civ = 0;
        self.lvi = 0;
        self.picb = 0;
        self.piv = 0;
        self.cr &= CR_DONT_CLEAR_MASK;
        self.bd = BufferDescriptor::default();
        self.bd_valid = false;
    }

    /// Read register 4, 5, and 6 as one 32 bit word.
    /// According to the ICH spec, reading these three with one 32 bit access is allowed.
    pub fn atomic_status_regs(&self) -> u32 {
        u32::from(self.civ) | u32::from(self.lvi) << 8 | u32::from(self.sr) << 16
    }

    /// Read registers 8, 10, and 11 as one 32 bit word.
    pub fn atomic_position_regs(&self) -> u32 {
        u32::from(self.picb) | u32::from(self.piv) << 16 | u32::from(self.cr) << 24
    }

    pub fn is_running(&self) -> bool {
        self.cr & CR_RPBM != 0
    }

    pub fn is_halted(&self) -> bool {
        self.sr & SR_DCH != 0
    }

    pub fn move_to_next_buffer(&mut self) {
        self.civ = self.piv;
        self.piv = (self.piv + 1) % MAX_BDLE;
    }
}

impl Default for Ac97FunctionRegs {
    fn default() -> Self {
        Self::new()
    }
}

// Bus Master registers shared by all three functions, plus the interrupt line they drive.
pub struct Ac97BusMasterRegs {
    pub pi_regs: Ac97FunctionRegs, // Input
    pub po_regs: Ac97FunctionRegs, // Output
    pub mc_regs: Ac97FunctionRegs, // Microphone
    pub glob_cnt: u32,
    pub glob_sta: u32,
    pub acc_sema: u8,

    // Interrupt line, driven by the stream bits of glob_sta.
    irq: Option<Box<dyn IrqLine>>,
}

impl Ac97BusMasterRegs {
    pub fn new() -> Ac97BusMasterRegs {
        Ac97BusMasterRegs {
            pi_regs: Ac97FunctionRegs::new(),
            po_regs: Ac97FunctionRegs::new(),
            mc_regs: Ac97FunctionRegs::new(),
            glob_cnt: 0,
            glob_sta: 0,
            acc_sema: 0,
            irq: None,
        }
    }

    pub fn func_regs(&self, func: Ac97Function) -> &Ac97FunctionRegs {
        match func {
            Ac97Function::Input => &self.pi_regs,
            Ac97Function::Output => &self.po_regs,
            Ac97Function::Microphone => &self.mc_regs,
        }
    }

    pub fn func_regs_mut(&mut self, func: Ac97Function) -> &mut Ac97FunctionRegs {
        match func {
            Ac97Function::Input => &mut self.pi_regs,
            Ac97Function::Output => &mut self.po_regs,
            Ac97Function::Microphone => &mut self.mc_regs,
        }
    }

    pub fn set_irq(&mut self, irq: Box<dyn IrqLine>) {
        self.irq = Some(irq);
    }

    /// Returns whether the irq is set for any one of the bus master function registers.
    pub fn has_irq(&self) -> bool {
        self.glob_sta & GS_STREAM_INT_MASK != 0
    }

    fn update_irq(&self) {
        let level = self.has_irq();
        match self.irq {
            Some(ref irq) => irq.set_level(level),
            None => debug!("AC97: no interrupt line, level {} dropped", level),
        }
    }
}

impl Default for Ac97BusMasterRegs {
    fn default() -> Self {
        Self::new()
    }
}

// Whether `sr` holds a status bit whose interrupt is enabled in `cr`.
fn wants_interrupt(sr: u16, cr: u8) -> bool {
    (sr & SR_LVBCI != 0 && cr & CR_LVBIE != 0)
        || (sr & SR_BCIS != 0 && cr & CR_IOCE != 0)
        || (sr & SR_FIFOE != 0 && cr & CR_FEIE != 0)
}

/// Stores a new status register value and, if the interrupt bits changed, updates the function's
/// contribution to global status and the interrupt line.
pub fn update_sr(regs: &mut Ac97BusMasterRegs, func: Ac97Function, val: u16) {
    let changed;
    let asserted;
    {
        let func_regs = regs.func_regs_mut(func);
        changed = (func_regs.sr ^ val) & SR_INT_MASK != 0;
        asserted = wants_interrupt(val, func_regs.cr);
        func_regs.sr = val;
    }
    if !changed {
        return;
    }

    let int_mask = func.glob_sta_int();
    if asserted {
        regs.glob_sta |= int_mask;
    } else {
        regs.glob_sta &= !int_mask;
    }
    // The line is shared, it stays up while any function still contributes.
    regs.update_irq();
}

/// Guest write to a status register: clears the write-one-to-clear bits that are set in `val`.
pub fn write_sr(regs: &mut Ac97BusMasterRegs, func: Ac97Function, val: u16) {
    let func_regs = regs.func_regs_mut(func);
    func_regs.sr |= val & SR_VALID_MASK & !(SR_RO_MASK | SR_WCLEAR_MASK);
    let new_sr = func_regs.sr & !(val & SR_WCLEAR_MASK);
    update_sr(regs, func, new_sr);
}

/// `Ac97BusMaster` emulates the bus master portion of AC97. It exposes a register read/write
/// interface compliant with the ICH bus master and runs the DMA engine of each function.
pub struct Ac97BusMaster {
    // Keep guest memory as each function will use it for buffer descriptors.
    mem: GuestMemoryMmap,
    regs: Ac97BusMasterRegs,
    streams: [Ac97Stream; 3],

    // Audio backend used to open playback or capture sinks.
    backend: Box<dyn AudioBackend>,
    clock: Arc<dyn VirtualClock>,
    params: Ac97Parameters,
}

impl Ac97BusMaster {
    /// Creates an Ac97BusMaster` object that moves audio between `mem` and sinks provided by
    /// `backend`, paced by `clock`.
    pub fn new(
        mem: GuestMemoryMmap,
        backend: Box<dyn AudioBackend>,
        params: Ac97Parameters,
        clock: Arc<dyn VirtualClock>,
    ) -> Self {
        Ac97BusMaster {
            mem,
            regs: Ac97BusMasterRegs::new(),
            streams: [
                Ac97Stream::new(Ac97Function::Input),
                Ac97Stream::new(Ac97Function::Output),
                Ac97Stream::new(Ac97Function::Microphone),
            ],
            backend,
            clock,
            params,
        }
    }

    pub fn regs(&self) -> &Ac97BusMasterRegs {
        &self.regs
    }

    pub fn regs_mut(&mut self) -> &mut Ac97BusMasterRegs {
        &mut self.regs
    }

    pub fn stream(&self, func: Ac97Function) -> &Ac97Stream {
        &self.streams[func.index()]
    }

    pub fn params(&self) -> &Ac97Parameters {
        &self.params
    }

    pub fn now(&self) -> u64 {
        self.clock.now_ns()
    }

    /// Provides the line used to raise interrupts in the guest.
    pub fn set_irq(&mut self, irq: Box<dyn IrqLine>) {
        self.regs.set_irq(irq);
    }

    pub fn has_irq(&self) -> bool {
        self.regs.has_irq()
    }

    /// Reads a byte from the given `offset`.
    pub fn readb(&mut self, offset: u64) -> u8 {
        match BusMasterReg::decode(offset) {
            BusMasterReg::Stream(func, reg) => {
                let func_regs = self.regs.func_regs(func);
                match reg {
                    StreamReg::Civ => func_regs.civ,
                    StreamReg::Lvi => func_regs.lvi,
                    StreamReg::Sr => func_regs.sr as u8,
                    StreamReg::Piv => func_regs.piv,
                    StreamReg::Cr => func_regs.cr,
                    _ => {
                        debug!("AC97: unsupported byte read at 0x{:x}", offset);
                        0xff
                    }
                }
            }
            BusMasterReg::AccSema => {
                // Reading the semaphore claims it. The next codec access releases it.
                let val = self.regs.acc_sema;
                self.regs.acc_sema = 1;
                val
            }
            _ => {
                debug!("AC97: unsupported byte read at 0x{:x}", offset);
                0xff
            }
        }
    }

    /// Reads a word from the given `offset`.
    pub fn readw(&mut self, offset: u64) -> u16 {
        match BusMasterReg::decode(offset) {
            BusMasterReg::Stream(func, StreamReg::Sr) => self.regs.func_regs(func).sr,
            BusMasterReg::Stream(func, StreamReg::Picb) => self.regs.func_regs(func).picb,
            _ => {
                debug!("AC97: unsupported word read at 0x{:x}", offset);
                0xffff
            }
        }
    }

    /// Reads a 32-bit word from the given `offset`.
    pub fn readl(&mut self, offset: u64) -> u32 {
        match BusMasterReg::decode(offset) {
            BusMasterReg::Stream(func, StreamReg::Bdbar) => self.regs.func_regs(func).bdbar,
            BusMasterReg::Stream(func, StreamReg::Civ) => {
                self.regs.func_regs(func).atomic_status_regs()
            }
            BusMasterReg::Stream(func, StreamReg::Picb) => {
                self.regs.func_regs(func).atomic_position_regs()
            }
            BusMasterReg::GlobCnt => self.regs.glob_cnt,
            // The primary codec is always ready.
            BusMasterReg::GlobSta => self.regs.glob_sta | GS_S0CR,
            _ => {
                debug!("AC97: unsupported long read at 0x{:x}", offset);
                0xffff_ffff
            }
        }
    }

    /// Writes the byte `val` to the register specified by `offset`.
    pub fn writeb(&mut self, offset: u64, val: u8, mixer: &Ac97Mixer) {
        match BusMasterReg::decode(offset) {
            BusMasterReg::Stream(func, StreamReg::Lvi) => self.set_lvi(func, val),
            BusMasterReg::Stream(func, StreamReg::Cr) => self.set_cr(func, val, mixer),
            BusMasterReg::Stream(func, StreamReg::Sr) => write_sr(&mut self.regs, func, u16::from(val)),
            BusMasterReg::Stream(_, StreamReg::Civ) | BusMasterReg::Stream(_, StreamReg::Piv) => (), // RO
            BusMasterReg::AccSema => debug!("AC97: ignoring codec semaphore write {:#x}", val),
            _ => warn!("AC97: write byte 0x{:x} to 0x{:x}", val, offset),
        }
    }

    /// Writes the word `val` to the register specified by `offset`.
    pub fn writew(&mut self, offset: u64, val: u16) {
        match BusMasterReg::decode(offset) {
            BusMasterReg::Stream(func, StreamReg::Sr) => write_sr(&mut self.regs, func, val),
            BusMasterReg::Stream(_, StreamReg::Picb) => (), // RO
            _ => warn!("AC97: write word 0x{:x} to 0x{:x}", val, offset),
        }
    }

    /// Writes the 32-bit `val` to the register specified by `offset`.
    pub fn writel(&mut self, offset: u64, val: u32) {
        match BusMasterReg::decode(offset) {
            BusMasterReg::Stream(func, StreamReg::Bdbar) => {
                self.regs.func_regs_mut(func).bdbar = val & !0x03;
            }
            BusMasterReg::GlobCnt => self.set_glob_cnt(val),
            BusMasterReg::GlobSta => self.set_glob_sta(val),
            _ => warn!("AC97: write long 0x{:x} to 0x{:x}", val, offset),
        }
    }

    fn set_lvi(&mut self, func: Ac97Function, val: u8) {
        let func_regs = self.regs.func_regs_mut(func);
        // If running and stalled on the last valid buffer, restart with the next one.
        if func_regs.is_running() && func_regs.is_halted() {
            func_regs.sr &= !(SR_DCH | SR_CELV);
            if let Err(e) = advance_bdle(&self.mem, func_regs) {
                warn!("AC97: {} restart failed to fetch descriptor: {}", func.name(), e);
                let sr = func_regs.sr | SR_FIFOE;
                update_sr(&mut self.regs, func, sr);
            }
        }
        self.regs.func_regs_mut(func).lvi = val % MAX_BDLE;
    }

    fn set_cr(&mut self, func: Ac97Function, val: u8, mixer: &Ac97Mixer) {
        if val & CR_RR != 0 {
            self.enable_stream(func, false, mixer);
            self.reset_stream(func);
            return;
        }

        let old_cr = self.regs.func_regs(func).cr;
        self.regs.func_regs_mut(func).cr = val & CR_VALID_MASK;

        if val & CR_RPBM == 0 {
            // Run/Pause set to pause.
            self.enable_stream(func, false, mixer);
            self.regs.func_regs_mut(func).sr |= SR_DCH;
        } else if old_cr & CR_RPBM == 0 || self.regs.func_regs(func).is_halted() {
            // Not already running, or halted with RPBM still set.
            {
                let func_regs = self.regs.func_regs_mut(func);
                func_regs.move_to_next_buffer();
                func_regs.sr &= !(SR_DCH | SR_CELV);
            }
            if let Err(e) = fetch_bdle(&self.mem, self.regs.func_regs_mut(func)) {
                warn!("AC97: {} failed to fetch descriptor: {}", func.name(), e);
                let sr = self.regs.func_regs(func).sr | SR_FIFOE | SR_DCH;
                update_sr(&mut self.regs, func, sr);
                return;
            }
            if !self.enable_stream(func, true, mixer) {
                self.regs.func_regs_mut(func).sr |= SR_DCH;
                return;
            }
            let now = self.clock.now_ns();
            self.streams[func.index()].arm_timer(&self.regs, now);
        }
    }

    fn set_glob_cnt(&mut self, val: u32) {
        // Only the register itself is emulated. There is a single, always ready codec, so both
        // resets complete immediately.
        if val & GLOB_CNT_WARM_RESET != 0 {
            debug!("AC97: warm reset");
        }
        if val & GLOB_CNT_COLD_RESET != 0 {
            debug!("AC97: cold reset");
        }
        if val & (GLOB_CNT_WARM_RESET | GLOB_CNT_COLD_RESET) == 0 {
            self.regs.glob_cnt = val & GLOB_CNT_VALID_MASK;
        }
    }

    fn set_glob_sta(&mut self, val: u32) {
        let glob_sta = &mut self.regs.glob_sta;
        *glob_sta &= !(val & GS_WCLEAR_MASK);
        *glob_sta |= (val & !(GS_WCLEAR_MASK | GS_RO_MASK)) & GS_VALID_MASK;
    }

    /// Enables or disables the stream of `func`. Returns false if enabling failed, in which case
    /// the stream stays disabled.
    pub fn enable_stream(&mut self, func: Ac97Function, enable: bool, mixer: &Ac97Mixer) -> bool {
        let stream = &mut self.streams[func.index()];
        if !enable {
            stream.enable(false, mixer, self.backend.as_mut(), &self.params).ok();
            return true;
        }
        match stream.enable(true, mixer, self.backend.as_mut(), &self.params) {
            Ok(()) => true,
            Err(e) => {
                warn!("AC97: failed to enable {}: {}", func.name(), e);
                stream.enable(false, mixer, self.backend.as_mut(), &self.params).ok();
                false
            }
        }
    }

    // Registers back to defaults, FIFO emptied. The stream must already be disabled.
    fn reset_stream(&mut self, func: Ac97Function) {
        self.streams[func.index()].reset_fifo();
        self.regs.func_regs_mut(func).do_reset();
        update_sr(&mut self.regs, func, SR_DCH);
    }

    /// Resets every function and the codec, as on a guest reset.
    pub fn reset(&mut self, mixer: &mut Ac97Mixer) {
        info!("AC97: reset");
        mixer.reset();
        for &func in AC97_FUNCTIONS.iter() {
            self.enable_stream(func, false, mixer);
            self.reset_stream(func);
        }
    }

    /// Applies the result of a codec register write.
    pub fn apply_mixer_effect(&mut self, effect: MixerEffect, mixer: &mut Ac97Mixer) {
        match effect {
            MixerEffect::None => {}
            MixerEffect::Reset => self.reset(mixer),
            MixerEffect::Volumes | MixerEffect::RecordSource => {
                for stream in self.streams.iter() {
                    stream.apply_mixer(mixer);
                }
            }
            MixerEffect::Reopen(funcs) => {
                for &func in AC97_FUNCTIONS.iter() {
                    if !funcs[func.index()] {
                        continue;
                    }
                    let stream = &mut self.streams[func.index()];
                    if let Err(e) = stream.reopen(mixer, self.backend.as_mut(), &self.params) {
                        warn!("AC97: failed to reopen {}: {}", func.name(), e);
                        self.enable_stream(func, false, mixer);
                    }
                }
            }
        }
    }

    /// Moves up to `max_bytes` between guest memory and the FIFO of `func`.
    pub fn transfer(&mut self, func: Ac97Function, max_bytes: usize) -> Transferred {
        self.streams[func.index()].transfer(&mut self.regs, &self.mem, max_bytes)
    }

    /// Runs the callback of every stream timer that is due. Returns how many fired.
    pub fn run_timers(&mut self) -> usize {
        let now = self.clock.now_ns();
        let mut fired = 0;
        for &func in AC97_FUNCTIONS.iter() {
            let stream = &mut self.streams[func.index()];
            if stream.timer_mut().take_due(now) {
                stream.timer_expired(&mut self.regs, &self.mem, now);
                fired += 1;
            }
        }
        fired
    }

    /// Earliest armed stream timer deadline.
    pub fn next_deadline(&self) -> Option<u64> {
        self.streams.iter().filter_map(|s| s.timer().expire()).min()
    }

    /// Re-enables the streams flagged in `active` after the registers were restored, and arms
    /// their timers.
    pub fn restore_streams(&mut self, active: [bool; 3], mixer: &Ac97Mixer) {
        let now = self.clock.now_ns();
        for &func in AC97_FUNCTIONS.iter() {
            let enable = active[func.index()];
            if self.enable_stream(func, enable, mixer) && enable {
                self.streams[func.index()].arm_timer(&self.regs, now);
            }
        }
        // Global status may have been restored with pending interrupts.
        self.regs.update_irq();
    }
}

impl Drop for Ac97BusMaster {
    fn drop(&mut self) {
        for stream in self.streams.iter_mut() {
            stream.destroy();
        }
    }
}
