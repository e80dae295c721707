// Copyright 2018 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// Size of IO register regions
pub const MIXER_REGS_SIZE: u64 = 0x100;
pub const MASTER_REGS_SIZE: u64 = 0x40;

// Bus master stream registers, relative to the stream's base.
pub const BDBAR_OFFSET: u64 = 0x00;
pub const CIV_OFFSET: u64 = 0x04;
pub const LVI_OFFSET: u64 = 0x05;
pub const SR_OFFSET: u64 = 0x06;
pub const PICB_OFFSET: u64 = 0x08;
pub const PIV_OFFSET: u64 = 0x0a;
pub const CR_OFFSET: u64 = 0x0b;

pub const STREAM_REGS_STRIDE: u64 = 0x10;

// Global bus master registers.
pub const GLOB_CNT_2C: u64 = 0x2c;
pub const GLOB_STA_30: u64 = 0x30;
pub const ACC_SEMA_34: u64 = 0x34;

// Status Register Bits.
pub const SR_DCH: u16 = 0x01; // DMA controller halted.
pub const SR_CELV: u16 = 0x02; // Current equals last valid.
pub const SR_LVBCI: u16 = 0x04; // Last valid buffer completion interrupt.
pub const SR_BCIS: u16 = 0x08; // Buffer completion interrupt status.
pub const SR_FIFOE: u16 = 0x10; // FIFO error.
pub const SR_VALID_MASK: u16 = 0x1f;
pub const SR_WCLEAR_MASK: u16 = SR_FIFOE | SR_BCIS | SR_LVBCI;
pub const SR_RO_MASK: u16 = SR_DCH | SR_CELV;
pub const SR_INT_MASK: u16 = SR_FIFOE | SR_BCIS | SR_LVBCI;

// Control Register Bits.
pub const CR_RPBM: u8 = 0x01; // Run/Pause bus master.
pub const CR_RR: u8 = 0x02; // Reset registers.
pub const CR_LVBIE: u8 = 0x04; // Last valid buffer interrupt enable.
pub const CR_FEIE: u8 = 0x08; // FIFO error interrupt enable.
pub const CR_IOCE: u8 = 0x10; // Interrupt on completion enable.
pub const CR_VALID_MASK: u8 = 0x1f;
pub const CR_DONT_CLEAR_MASK: u8 = CR_IOCE | CR_FEIE | CR_LVBIE;

// Global Control
pub const GLOB_CNT_COLD_RESET: u32 = 0x0000_0002;
pub const GLOB_CNT_WARM_RESET: u32 = 0x0000_0004;
pub const GLOB_CNT_VALID_MASK: u32 = 0x3f;

// Global status
pub const GS_MD3: u32 = 1 << 17;
pub const GS_AD3: u32 = 1 << 16;
pub const GS_RCS: u32 = 1 << 15;
pub const GS_B3S12: u32 = 1 << 14;
pub const GS_B2S12: u32 = 1 << 13;
pub const GS_B1S12: u32 = 1 << 12;
pub const GS_S1R1: u32 = 1 << 11;
pub const GS_S0R1: u32 = 1 << 10;
pub const GS_S1CR: u32 = 1 << 9;
pub const GS_S0CR: u32 = 1 << 8;
pub const GS_MINT: u32 = 1 << 7;
pub const GS_POINT: u32 = 1 << 6;
pub const GS_PIINT: u32 = 1 << 5;
pub const GS_RSRVD: u32 = (1 << 4) | (1 << 3);
pub const GS_MOINT: u32 = 1 << 2;
pub const GS_MIINT: u32 = 1 << 1;
pub const GS_GSCI: u32 = 1;
pub const GS_RO_MASK: u32 = GS_B3S12
    | GS_B2S12
    | GS_B1S12
    | GS_S1CR
    | GS_S0CR
    | GS_MINT
    | GS_POINT
    | GS_PIINT
    | GS_RSRVD
    | GS_MOINT
    | GS_MIINT;
pub const GS_VALID_MASK: u32 = (1 << 18) - 1;
pub const GS_WCLEAR_MASK: u32 = GS_RCS | GS_S1R1 | GS_S0R1 | GS_GSCI;
pub const GS_STREAM_INT_MASK: u32 = GS_PIINT | GS_POINT | GS_MINT;

// Buffer descriptors are two dwords: address, then control and length.
pub const DESCRIPTOR_LENGTH: u64 = 8;
pub const BD_IOC: u32 = 1 << 31; // Interrupt on completion.
pub const BD_BUP: u32 = 1 << 30; // Buffer underrun policy.
pub const BD_LEN_MASK: u32 = 0xffff;
pub const MAX_BDLE: u8 = 32;

// Mixer registers.
pub const MIXER_RESET_00: u64 = 0x00;
pub const MIXER_MASTER_VOL_MUTE_02: u64 = 0x02;
pub const MIXER_HEADPHONE_VOL_MUTE_04: u64 = 0x04;
pub const MIXER_MASTER_MONO_VOL_MUTE_06: u64 = 0x06;
pub const MIXER_MASTER_TONE_08: u64 = 0x08;
pub const MIXER_PC_BEEP_VOL_MUTE_0A: u64 = 0x0a;
pub const MIXER_PHONE_VOL_MUTE_0C: u64 = 0x0c;
pub const MIXER_MIC_VOL_MUTE_0E: u64 = 0x0e;
pub const MIXER_LINE_IN_VOL_MUTE_10: u64 = 0x10;
pub const MIXER_CD_VOL_MUTE_12: u64 = 0x12;
pub const MIXER_VIDEO_VOL_MUTE_14: u64 = 0x14;
pub const MIXER_AUX_VOL_MUTE_16: u64 = 0x16;
pub const MIXER_PCM_OUT_VOL_MUTE_18: u64 = 0x18;
pub const MIXER_RECORD_SELECT_1A: u64 = 0x1a;
pub const MIXER_RECORD_GAIN_MUTE_1C: u64 = 0x1c;
pub const MIXER_RECORD_GAIN_MIC_MUTE_1E: u64 = 0x1e;
pub const MIXER_GENERAL_PURPOSE_20: u64 = 0x20;
pub const MIXER_3D_CONTROL_22: u64 = 0x22;
pub const MIXER_POWER_DOWN_CONTROL_26: u64 = 0x26;
pub const MIXER_EXTENDED_AUDIO_ID_28: u64 = 0x28;
pub const MIXER_EXTENDED_AUDIO_CTRL_2A: u64 = 0x2a;
pub const MIXER_PCM_FRONT_DAC_RATE_2C: u64 = 0x2c;
pub const MIXER_PCM_SURR_DAC_RATE_2E: u64 = 0x2e;
pub const MIXER_PCM_LFE_DAC_RATE_30: u64 = 0x30;
pub const MIXER_PCM_LR_ADC_RATE_32: u64 = 0x32;
pub const MIXER_MIC_ADC_RATE_34: u64 = 0x34;
pub const MIXER_AD_MISC_76: u64 = 0x76;
pub const MIXER_VENDOR_ID1_7C: u64 = 0x7c;
pub const MIXER_VENDOR_ID2_7E: u64 = 0x7e;

// Extended audio ID and control/status bits.
pub const EAID_VRA: u16 = 1 << 0;
pub const EAID_VRM: u16 = 1 << 3;
pub const EAID_REV0: u16 = 1 << 10;
pub const EAID_REV1: u16 = 1 << 11;
pub const EACS_VRA: u16 = 1 << 0;
pub const EACS_VRM: u16 = 1 << 3;

// AD1980 misc control.
pub const AD_MISC_LOSEL: u16 = 1 << 5;
pub const AD_MISC_HPSEL: u16 = 1 << 10;

pub const MIXER_MUTE_BIT: u16 = 1 << 15;
pub const MIXER_POWER_DOWN_RO_MASK: u16 = 0x000f;
pub const DEFAULT_SAMPLE_RATE: u16 = 48000;

/// The functions (streams) of the bus master.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Ac97Function {
    Input,
    Output,
    Microphone,
}

pub const AC97_FUNCTIONS: [Ac97Function; 3] =
    [Ac97Function::Input, Ac97Function::Output, Ac97Function::Microphone];

// Base of each function's register block, indexed by `Ac97Function::index`.
const FUNCTION_BASE: [u64; 3] = [0x00, 0x10, 0x20];

impl Ac97Function {
    pub fn index(self) -> usize {
        match self {
            Ac97Function::Input => 0,
            Ac97Function::Output => 1,
            Ac97Function::Microphone => 2,
        }
    }

    pub fn base(self) -> u64 {
        FUNCTION_BASE[self.index()]
    }

    /// Bit this function owns in the global status register.
    pub fn glob_sta_int(self) -> u32 {
        match self {
            Ac97Function::Input => GS_PIINT,
            Ac97Function::Output => GS_POINT,
            Ac97Function::Microphone => GS_MINT,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Ac97Function::Input => "PCM In",
            Ac97Function::Output => "PCM Out",
            Ac97Function::Microphone => "Mic In",
        }
    }
}

/// Per-stream bus master register.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StreamReg {
    Bdbar,
    Civ,
    Lvi,
    Sr,
    Picb,
    Piv,
    Cr,
}

/// What a bus master offset refers to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusMasterReg {
    Stream(Ac97Function, StreamReg),
    GlobCnt,
    GlobSta,
    AccSema,
    Unknown,
}

impl BusMasterReg {
    pub fn decode(offset: u64) -> BusMasterReg {
        let index = ((offset >> 4) & 3) as usize;
        if index < AC97_FUNCTIONS.len() {
            let func = AC97_FUNCTIONS[index];
            let reg = match offset - func.base() {
                BDBAR_OFFSET => Some(StreamReg::Bdbar),
                CIV_OFFSET => Some(StreamReg::Civ),
                LVI_OFFSET => Some(StreamReg::Lvi),
                SR_OFFSET => Some(StreamReg::Sr),
                PICB_OFFSET => Some(StreamReg::Picb),
                PIV_OFFSET => Some(StreamReg::Piv),
                CR_OFFSET => Some(StreamReg::Cr),
                _ => None,
            };
            if let Some(reg) = reg {
                return BusMasterReg::Stream(func, reg);
            }
        }
        match offset {
            GLOB_CNT_2C => BusMasterReg::GlobCnt,
            GLOB_STA_30 => BusMasterReg::GlobSta,
            ACC_SEMA_34 => BusMasterReg::AccSema,
            _ => BusMasterReg::Unknown,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decode_offsets() {
        assert_eq!(
            BusMasterReg::decode(0x00),
            BusMasterReg::Stream(Ac97Function::Input, StreamReg::Bdbar)
        );
        assert_eq!(
            BusMasterReg::decode(0x1b),
            BusMasterReg::Stream(Ac97Function::Output, StreamReg::Cr)
        );
        assert_eq!(
            BusMasterReg::decode(0x28),
            BusMasterReg::Stream(Ac97Function::Microphone, StreamReg::Picb)
        );
        // Falls inside the mic block but is the global control register.
        assert_eq!(BusMasterReg::decode(0x2c), BusMasterReg::GlobCnt);
        assert_eq!(BusMasterReg::decode(0x30), BusMasterReg::GlobSta);
        assert_eq!(BusMasterReg::decode(0x34), BusMasterReg::AccSema);
        assert_eq!(BusMasterReg::decode(0x07), BusMasterReg::Unknown);
        assert_eq!(BusMasterReg::decode(0x3c), BusMasterReg::Unknown);
    }
}
