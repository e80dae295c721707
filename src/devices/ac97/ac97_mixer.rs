// Copyright 2018 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::audio::{RecordSource, Volume, VOLUME_MAX};
use crate::devices::ac97::ac97_params::CodecModel;
use crate::devices::ac97::ac97_regs::*;

const MIXER_BANK_SIZE: usize = MIXER_REGS_SIZE as usize;

// Volume fields are 5 bits of 1.5dB attenuation steps. Internal volumes use 0.375dB steps.
const VOL_MASK: u16 = 0x1f;
const GAIN_MASK: u16 = 0x0f;
const DB_FACTOR: u8 = 4;

/// Side effect of a mixer register write that the rest of the device has to apply.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MixerEffect {
    None,
    /// The codec reset register was written; the whole device resets.
    Reset,
    /// One of the volumes or gains pushed to host sinks changed.
    Volumes,
    RecordSource,
    /// Streams whose sample rate may have changed, indexed by `Ac97Function::index`.
    Reopen([bool; 3]),
}

/// Codec register bank and the host-side mixer state derived from it.
pub struct Ac97Mixer {
    codec: CodecModel,
    regs: [u8; MIXER_BANK_SIZE],
    master: Volume,
    pcm_out: Volume,
    line_in: Volume,
    mic: Volume,
    line_in_gain: Volume,
    mic_gain: Volume,
    record_source: RecordSource,
}

impl Ac97Mixer {
    /// Creates an 'Ac97Mixer' with the standard default register values.
    pub fn new(codec: CodecModel) -> Self {
        let mut mixer = Ac97Mixer {
            codec,
            regs: [0; MIXER_BANK_SIZE],
            master: Volume::MAX,
            pcm_out: Volume::MAX,
            line_in: Volume::MAX,
            mic: Volume::MAX,
            line_in_gain: Volume::MAX,
            mic_gain: Volume::MAX,
            record_source: RecordSource::Mic,
        };
        mixer.reset();
        mixer
    }

    pub fn codec(&self) -> CodecModel {
        self.codec
    }

    /// Restores every codec register to its power-on value.
    pub fn reset(&mut self) {
        self.regs = [0; MIXER_BANK_SIZE];

        self.set(MIXER_RESET_00, 0x0000);
        self.set(MIXER_MASTER_MONO_VOL_MUTE_06, 0x8000);
        self.set(MIXER_PC_BEEP_VOL_MUTE_0A, 0x0000);
        self.set(MIXER_PHONE_VOL_MUTE_0C, 0x8008);
        self.set(MIXER_MIC_VOL_MUTE_0E, 0x8008);
        self.set(MIXER_CD_VOL_MUTE_12, 0x8808);
        self.set(MIXER_AUX_VOL_MUTE_16, 0x8808);
        self.set(MIXER_RECORD_GAIN_MIC_MUTE_1E, 0x8000);
        self.set(MIXER_GENERAL_PURPOSE_20, 0x0000);
        self.set(MIXER_3D_CONTROL_22, 0x0000);
        self.set(MIXER_POWER_DOWN_CONTROL_26, 0x000f);

        self.set(MIXER_EXTENDED_AUDIO_ID_28, EAID_REV1 | EAID_VRA | EAID_VRM);
        self.set(MIXER_EXTENDED_AUDIO_CTRL_2A, EACS_VRA | EACS_VRM);
        self.set(MIXER_PCM_FRONT_DAC_RATE_2C, DEFAULT_SAMPLE_RATE);
        self.set(MIXER_PCM_SURR_DAC_RATE_2E, DEFAULT_SAMPLE_RATE);
        self.set(MIXER_PCM_LFE_DAC_RATE_30, DEFAULT_SAMPLE_RATE);
        self.set(MIXER_PCM_LR_ADC_RATE_32, DEFAULT_SAMPLE_RATE);
        self.set(MIXER_MIC_ADC_RATE_34, DEFAULT_SAMPLE_RATE);

        let (id1, id2) = self.codec.vendor_ids();
        self.set(MIXER_VENDOR_ID1_7C, id1);
        self.set(MIXER_VENDOR_ID2_7E, id2);
        if self.codec == CodecModel::Ad1980 {
            self.set(MIXER_RESET_00, 0x0010); // Headphone output supported.
            self.set(MIXER_HEADPHONE_VOL_MUTE_04, 0x8000);
        }

        self.record_select(0);

        self.set_volume(MIXER_MASTER_VOL_MUTE_02, 0x8000);
        self.set_volume(MIXER_PCM_OUT_VOL_MUTE_18, 0x8808);
        self.set_volume(MIXER_LINE_IN_VOL_MUTE_10, 0x8808);
        self.set_volume(MIXER_MIC_VOL_MUTE_0E, 0x8008);
        self.set_gain(MIXER_RECORD_GAIN_MUTE_1C, 0x8000);
        self.set_gain(MIXER_RECORD_GAIN_MIC_MUTE_1E, 0x8000);
    }

    /// Reads a raw register. Out of range offsets read as all ones.
    pub fn get(&self, offset: u64) -> u16 {
        let i = offset as usize;
        if i + 1 >= MIXER_BANK_SIZE {
            warn!("AC97: mixer get at invalid offset 0x{:x}", offset);
            return 0xffff;
        }
        u16::from_le_bytes([self.regs[i], self.regs[i + 1]])
    }

    /// Stores a raw register. Out of range offsets are ignored.
    pub fn set(&mut self, offset: u64, val: u16) {
        let i = offset as usize;
        if i + 1 >= MIXER_BANK_SIZE {
            warn!("AC97: mixer set at invalid offset 0x{:x}", offset);
            return;
        }
        self.regs[i..i + 2].copy_from_slice(&val.to_le_bytes());
    }

    /// The raw register bank, for saving.
    pub fn bank(&self) -> &[u8; MIXER_BANK_SIZE] {
        &self.regs
    }

    /// Replaces the raw register bank and re-derives the host mixer state from it.
    pub fn restore_bank(&mut self, bank: &[u8; MIXER_BANK_SIZE]) {
        self.regs = *bank;
        self.record_select(self.get(MIXER_RECORD_SELECT_1A));
        self.set_volume(MIXER_MASTER_VOL_MUTE_02, self.get(MIXER_MASTER_VOL_MUTE_02));
        self.set_volume(MIXER_PCM_OUT_VOL_MUTE_18, self.get(MIXER_PCM_OUT_VOL_MUTE_18));
        self.set_volume(MIXER_LINE_IN_VOL_MUTE_10, self.get(MIXER_LINE_IN_VOL_MUTE_10));
        self.set_volume(MIXER_MIC_VOL_MUTE_0E, self.get(MIXER_MIC_VOL_MUTE_0E));
        self.set_gain(MIXER_RECORD_GAIN_MIC_MUTE_1E, self.get(MIXER_RECORD_GAIN_MIC_MUTE_1E));
        self.set_gain(MIXER_RECORD_GAIN_MUTE_1C, self.get(MIXER_RECORD_GAIN_MUTE_1C));
        if self.headphone_drives_master() {
            self.set_volume(
                MIXER_HEADPHONE_VOL_MUTE_04,
                self.get(MIXER_HEADPHONE_VOL_MUTE_04),
            );
        }
    }

    /// Reads a 16-bit register.
    pub fn readw(&self, offset: u64) -> u16 {
        self.get(offset)
    }

    /// Writes a 16-bit register and reports what else has to happen as a result.
    pub fn writew(&mut self, offset: u64, val: u16) -> MixerEffect {
        match offset {
            MIXER_RESET_00 => MixerEffect::Reset,
            MIXER_POWER_DOWN_CONTROL_26 => {
                // The low bits are ready flags.
                let ro = self.get(offset) & MIXER_POWER_DOWN_RO_MASK;
                self.set(offset, (val & !MIXER_POWER_DOWN_RO_MASK) | ro);
                MixerEffect::None
            }
            MIXER_MASTER_VOL_MUTE_02 => {
                if self.codec == CodecModel::Ad1980
                    && self.get(MIXER_AD_MISC_76) & AD_MISC_LOSEL != 0
                {
                    // Surround DACs drive the line out; the master control does not apply.
                    self.set(offset, apply_six_bit_quirk(val));
                    return MixerEffect::None;
                }
                self.set_volume(offset, val);
                MixerEffect::Volumes
            }
            MIXER_HEADPHONE_VOL_MUTE_04 => {
                if self.headphone_drives_master() {
                    self.set_volume(offset, val);
                    MixerEffect::Volumes
                } else {
                    // Kept so the register reads back; without HPSEL it has no effect on output.
                    self.set(offset, apply_six_bit_quirk(val));
                    MixerEffect::None
                }
            }
            MIXER_MASTER_MONO_VOL_MUTE_06 => {
                self.set(offset, apply_six_bit_quirk(val));
                MixerEffect::None
            }
            MIXER_PCM_OUT_VOL_MUTE_18 | MIXER_LINE_IN_VOL_MUTE_10 | MIXER_MIC_VOL_MUTE_0E => {
                self.set_volume(offset, val);
                MixerEffect::Volumes
            }
            MIXER_RECORD_SELECT_1A => {
                self.record_select(val);
                MixerEffect::RecordSource
            }
            MIXER_RECORD_GAIN_MUTE_1C | MIXER_RECORD_GAIN_MIC_MUTE_1E => {
                self.set_gain(offset, val);
                MixerEffect::Volumes
            }
            MIXER_VENDOR_ID1_7C | MIXER_VENDOR_ID2_7E | MIXER_EXTENDED_AUDIO_ID_28 => {
                debug!("AC97: ignoring write to read-only codec register 0x{:x}", offset);
                MixerEffect::None
            }
            MIXER_EXTENDED_AUDIO_CTRL_2A => {
                let mut reopen = [false; 3];
                if val & EACS_VRA == 0 {
                    self.set(MIXER_PCM_FRONT_DAC_RATE_2C, DEFAULT_SAMPLE_RATE);
                    self.set(MIXER_PCM_LR_ADC_RATE_32, DEFAULT_SAMPLE_RATE);
                    reopen[Ac97Function::Output.index()] = true;
                    reopen[Ac97Function::Input.index()] = true;
                }
                if val & EACS_VRM == 0 {
                    self.set(MIXER_MIC_ADC_RATE_34, DEFAULT_SAMPLE_RATE);
                    reopen[Ac97Function::Microphone.index()] = true;
                }
                self.set(offset, val);
                MixerEffect::Reopen(reopen)
            }
            MIXER_PCM_FRONT_DAC_RATE_2C | MIXER_PCM_LR_ADC_RATE_32 => {
                if self.get(MIXER_EXTENDED_AUDIO_CTRL_2A) & EACS_VRA == 0 {
                    info!("AC97: variable rate audio disabled, ignoring rate {}", val);
                    return MixerEffect::None;
                }
                self.set(offset, val);
                let func = if offset == MIXER_PCM_FRONT_DAC_RATE_2C {
                    Ac97Function::Output
                } else {
                    Ac97Function::Input
                };
                let mut reopen = [false; 3];
                reopen[func.index()] = true;
                MixerEffect::Reopen(reopen)
            }
            MIXER_MIC_ADC_RATE_34 => {
                if self.get(MIXER_EXTENDED_AUDIO_CTRL_2A) & EACS_VRM == 0 {
                    info!("AC97: variable rate mic disabled, ignoring rate {}", val);
                    return MixerEffect::None;
                }
                self.set(offset, val);
                let mut reopen = [false; 3];
                reopen[Ac97Function::Microphone.index()] = true;
                MixerEffect::Reopen(reopen)
            }
            _ => {
                self.set(offset, val);
                MixerEffect::None
            }
        }
    }

    fn headphone_drives_master(&self) -> bool {
        self.codec == CodecModel::Ad1980 && self.get(MIXER_AD_MISC_76) & AD_MISC_HPSEL != 0
    }

    // Stores a volume register and updates the derived volume it controls.
    fn set_volume(&mut self, offset: u64, val: u16) {
        let val = match offset {
            MIXER_MASTER_VOL_MUTE_02 | MIXER_HEADPHONE_VOL_MUTE_04 => apply_six_bit_quirk(val),
            _ => val,
        };
        let is_master = offset == MIXER_MASTER_VOL_MUTE_02 || offset == MIXER_HEADPHONE_VOL_MUTE_04;
        let vol = volume_from_reg(val, is_master);
        match offset {
            MIXER_MASTER_VOL_MUTE_02 | MIXER_HEADPHONE_VOL_MUTE_04 => self.master = vol,
            MIXER_PCM_OUT_VOL_MUTE_18 => self.pcm_out = vol,
            MIXER_LINE_IN_VOL_MUTE_10 => self.line_in = vol,
            MIXER_MIC_VOL_MUTE_0E => self.mic = vol,
            _ => {}
        }
        self.set(offset, val);
    }

    // Recording gains cannot attenuate, so anything but mute maps to full volume.
    fn set_gain(&mut self, offset: u64, val: u16) {
        let muted = val & MIXER_MUTE_BIT != 0;
        let left = u16::from(VOLUME_MAX) + ((val >> 8) & GAIN_MASK) * u16::from(DB_FACTOR);
        let right = u16::from(VOLUME_MAX) + (val & GAIN_MASK) * u16::from(DB_FACTOR);
        let vol = Volume::new(
            muted,
            left.min(u16::from(VOLUME_MAX)) as u8,
            right.min(u16::from(VOLUME_MAX)) as u8,
        );
        if offset == MIXER_RECORD_GAIN_MUTE_1C {
            // The codecs modeled have no dedicated mic gain, the record gain covers both inputs.
            self.line_in_gain = vol;
            self.mic_gain = vol;
        } else {
            self.mic_gain = vol;
        }
        self.set(offset, val);
    }

    fn record_select(&mut self, val: u16) {
        let right = record_source_from_index((val & 7) as u8);
        let left = record_source_from_index(((val >> 8) & 7) as u8);
        self.record_source = left;
        self.set(
            MIXER_RECORD_SELECT_1A,
            u16::from(record_source_index(right)) | (u16::from(record_source_index(left)) << 8),
        );
    }

    /// Volume for the PCM output sink: master applied on top of the PCM out control.
    pub fn output_volume(&self) -> Volume {
        self.pcm_out.combine(self.master)
    }

    pub fn master_volume(&self) -> Volume {
        self.master
    }

    pub fn line_in_volume(&self) -> Volume {
        self.line_in
    }

    pub fn mic_volume(&self) -> Volume {
        self.mic
    }

    pub fn line_in_gain(&self) -> Volume {
        self.line_in_gain
    }

    pub fn mic_gain(&self) -> Volume {
        self.mic_gain
    }

    pub fn record_source(&self) -> RecordSource {
        self.record_source
    }

    /// Sample rate a stream of `func` runs at.
    pub fn sample_rate(&self, func: Ac97Function) -> u32 {
        let reg = match func {
            Ac97Function::Input => MIXER_PCM_LR_ADC_RATE_32,
            Ac97Function::Output => MIXER_PCM_FRONT_DAC_RATE_2C,
            Ac97Function::Microphone => MIXER_MIC_ADC_RATE_34,
        };
        u32::from(self.get(reg))
    }
}

// Volume fields are six bits wide in the AC97 spec but five here. Setting the top bit of a
// field makes the codec report the lower five as ones, which is how drivers detect that.
fn apply_six_bit_quirk(mut val: u16) -> u16 {
    if val & (1 << 5) != 0 {
        val |= 0x1f;
    }
    if val & (1 << 13) != 0 {
        val |= 0x1f << 8;
    }
    val
}

// Master and headphone: 0 is 0dB. Other controls: 0 is +12dB and 8 is unity, gain is not
// supported so anything below 8 is treated as unity.
fn volume_from_reg(val: u16, is_master: bool) -> Volume {
    let muted = val & MIXER_MUTE_BIT != 0;
    let mut att_left = ((val >> 8) & VOL_MASK) as u8;
    let mut att_right = (val & VOL_MASK) as u8;
    if !is_master {
        att_left = att_left.saturating_sub(8);
        att_right = att_right.saturating_sub(8);
    }
    Volume::new(
        muted,
        VOLUME_MAX - att_left * DB_FACTOR,
        VOLUME_MAX - att_right * DB_FACTOR,
    )
}

fn record_source_from_index(i: u8) -> RecordSource {
    match i {
        0 => RecordSource::Mic,
        1 => RecordSource::Cd,
        2 => RecordSource::Video,
        3 => RecordSource::Aux,
        4 => RecordSource::LineIn,
        7 => RecordSource::Phone,
        // Stereo and mono mix are not routable.
        _ => RecordSource::Mic,
    }
}

fn record_source_index(src: RecordSource) -> u8 {
    match src {
        RecordSource::Mic => 0,
        RecordSource::Cd => 1,
        RecordSource::Video => 2,
        RecordSource::Aux => 3,
        RecordSource::LineIn => 4,
        RecordSource::Phone => 7,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reset_defaults() {
        let mixer = Ac97Mixer::new(CodecModel::Stac9700);
        assert_eq!(mixer.readw(MIXER_RESET_00), 0x0000);
        assert_eq!(mixer.readw(MIXER_MASTER_VOL_MUTE_02), 0x8000);
        assert_eq!(mixer.readw(MIXER_PCM_OUT_VOL_MUTE_18), 0x8808);
        assert_eq!(mixer.readw(MIXER_POWER_DOWN_CONTROL_26), 0x000f);
        assert_eq!(mixer.readw(MIXER_EXTENDED_AUDIO_ID_28), EAID_REV1 | EAID_VRA | EAID_VRM);
        assert_eq!(mixer.readw(MIXER_PCM_FRONT_DAC_RATE_2C), 48000);
        assert_eq!(mixer.readw(MIXER_VENDOR_ID1_7C), 0x8384);
        assert_eq!(mixer.readw(MIXER_VENDOR_ID2_7E), 0x7600);
        assert!(mixer.master_volume().muted);
        assert_eq!(mixer.sample_rate(Ac97Function::Microphone), 48000);
    }

    #[test]
    fn ad1980_defaults() {
        let mixer = Ac97Mixer::new(CodecModel::Ad1980);
        assert_eq!(mixer.readw(MIXER_RESET_00), 0x0010);
        assert_eq!(mixer.readw(MIXER_HEADPHONE_VOL_MUTE_04), 0x8000);
        assert_eq!(mixer.readw(MIXER_VENDOR_ID2_7E), 0x5370);
    }

    #[test]
    fn volume_registers_round_trip() {
        let mut mixer = Ac97Mixer::new(CodecModel::Stac9700);
        for &reg in &[MIXER_PCM_OUT_VOL_MUTE_18, MIXER_LINE_IN_VOL_MUTE_10, MIXER_CD_VOL_MUTE_12] {
            for &val in &[0x0000u16, 0x1f1f, 0x8808, 0x0a05, 0xffff, 0x1234] {
                mixer.writew(reg, val);
                assert_eq!(mixer.readw(reg), val, "reg 0x{:x}", reg);
            }
        }
    }

    #[test]
    fn master_volume_six_bit_quirk() {
        let mut mixer = Ac97Mixer::new(CodecModel::Stac9700);
        mixer.writew(MIXER_MASTER_VOL_MUTE_02, 0x0020);
        assert_eq!(mixer.readw(MIXER_MASTER_VOL_MUTE_02), 0x003f);
        mixer.writew(MIXER_MASTER_VOL_MUTE_02, 0x2000);
        assert_eq!(mixer.readw(MIXER_MASTER_VOL_MUTE_02), 0x3f00);
        mixer.writew(MIXER_MASTER_MONO_VOL_MUTE_06, 0x0020);
        assert_eq!(mixer.readw(MIXER_MASTER_MONO_VOL_MUTE_06), 0x003f);
        // Without the top bit the value is kept as written.
        mixer.writew(MIXER_MASTER_VOL_MUTE_02, 0x0a05);
        assert_eq!(mixer.readw(MIXER_MASTER_VOL_MUTE_02), 0x0a05);
    }

    #[test]
    fn volume_conversion() {
        let mut mixer = Ac97Mixer::new(CodecModel::Stac9700);
        mixer.writew(MIXER_MASTER_VOL_MUTE_02, 0x0102);
        assert_eq!(mixer.master_volume(), Volume::new(false, 251, 247));
        // Unity gain at 8 for non-master controls, louder settings clamp to unity.
        mixer.writew(MIXER_PCM_OUT_VOL_MUTE_18, 0x0809);
        assert_eq!(mixer.output_volume(), Volume::new(false, 251, 243));
        mixer.writew(MIXER_PCM_OUT_VOL_MUTE_18, 0x0000);
        assert_eq!(mixer.output_volume(), Volume::new(false, 251, 247));
        assert_eq!(mixer.writew(MIXER_PCM_OUT_VOL_MUTE_18, 0x8000), MixerEffect::Volumes);
        assert!(mixer.output_volume().muted);
    }

    #[test]
    fn gain_clamps_to_max() {
        let mut mixer = Ac97Mixer::new(CodecModel::Stac9700);
        mixer.writew(MIXER_RECORD_GAIN_MUTE_1C, 0x0f0f);
        assert_eq!(mixer.line_in_gain(), Volume::MAX);
        assert_eq!(mixer.mic_gain(), Volume::MAX);
        assert_eq!(mixer.readw(MIXER_RECORD_GAIN_MUTE_1C), 0x0f0f);
        mixer.writew(MIXER_RECORD_GAIN_MIC_MUTE_1E, 0x8000);
        assert!(mixer.mic_gain().muted);
        assert!(!mixer.line_in_gain().muted);
    }

    #[test]
    fn record_select_symmetric() {
        let mut mixer = Ac97Mixer::new(CodecModel::Stac9700);
        for &(idx, src) in &[
            (0u16, RecordSource::Mic),
            (1, RecordSource::Cd),
            (2, RecordSource::Video),
            (3, RecordSource::Aux),
            (4, RecordSource::LineIn),
            (7, RecordSource::Phone),
        ] {
            assert_eq!(mixer.writew(MIXER_RECORD_SELECT_1A, idx << 8 | idx), MixerEffect::RecordSource);
            assert_eq!(mixer.record_source(), src);
            assert_eq!(mixer.readw(MIXER_RECORD_SELECT_1A), idx << 8 | idx);
        }
        // Stereo mix is not supported and reads back as mic.
        mixer.writew(MIXER_RECORD_SELECT_1A, 0x0505);
        assert_eq!(mixer.readw(MIXER_RECORD_SELECT_1A), 0x0000);
        assert_eq!(mixer.record_source(), RecordSource::Mic);
    }

    #[test]
    fn read_only_registers() {
        let mut mixer = Ac97Mixer::new(CodecModel::Stac9700);
        mixer.writew(MIXER_VENDOR_ID1_7C, 0x1234);
        mixer.writew(MIXER_EXTENDED_AUDIO_ID_28, 0);
        assert_eq!(mixer.readw(MIXER_VENDOR_ID1_7C), 0x8384);
        assert_eq!(mixer.readw(MIXER_EXTENDED_AUDIO_ID_28), EAID_REV1 | EAID_VRA | EAID_VRM);
        mixer.writew(MIXER_POWER_DOWN_CONTROL_26, 0xff00);
        assert_eq!(mixer.readw(MIXER_POWER_DOWN_CONTROL_26), 0xff0f);
        assert_eq!(mixer.writew(MIXER_RESET_00, 0), MixerEffect::Reset);
    }

    #[test]
    fn rates_need_variable_rate_audio() {
        let mut mixer = Ac97Mixer::new(CodecModel::Stac9700);
        let mut out = [false; 3];
        out[Ac97Function::Output.index()] = true;
        assert_eq!(mixer.writew(MIXER_PCM_FRONT_DAC_RATE_2C, 44100), MixerEffect::Reopen(out));
        assert_eq!(mixer.sample_rate(Ac97Function::Output), 44100);

        // Turning off VRA resets the PCM rates and reopens both PCM streams.
        let effect = mixer.writew(MIXER_EXTENDED_AUDIO_CTRL_2A, EACS_VRM);
        assert_eq!(effect, MixerEffect::Reopen([true, true, false]));
        assert_eq!(mixer.sample_rate(Ac97Function::Output), 48000);
        assert_eq!(mixer.writew(MIXER_PCM_LR_ADC_RATE_32, 22050), MixerEffect::None);
        assert_eq!(mixer.sample_rate(Ac97Function::Input), 48000);

        // Mic rate still follows VRM.
        let mut mic = [false; 3];
        mic[Ac97Function::Microphone.index()] = true;
        assert_eq!(mixer.writew(MIXER_MIC_ADC_RATE_34, 8000), MixerEffect::Reopen(mic));
        assert_eq!(mixer.sample_rate(Ac97Function::Microphone), 8000);
    }

    #[test]
    fn ad1980_headphone_and_line_out_select() {
        let mut mixer = Ac97Mixer::new(CodecModel::Ad1980);
        mixer.writew(MIXER_MASTER_VOL_MUTE_02, 0x0000);
        assert!(!mixer.master_volume().muted);

        mixer.writew(MIXER_AD_MISC_76, AD_MISC_LOSEL);
        assert_eq!(mixer.writew(MIXER_MASTER_VOL_MUTE_02, 0x8000), MixerEffect::None);
        assert!(!mixer.master_volume().muted);
        assert_eq!(mixer.readw(MIXER_MASTER_VOL_MUTE_02), 0x8000);

        mixer.writew(MIXER_AD_MISC_76, AD_MISC_HPSEL);
        assert_eq!(mixer.writew(MIXER_HEADPHONE_VOL_MUTE_04, 0x8000), MixerEffect::Volumes);
        assert!(mixer.master_volume().muted);
    }

    #[test]
    fn headphone_without_hpsel_only_reads_back() {
        let mut mixer = Ac97Mixer::new(CodecModel::Stac9700);
        mixer.writew(MIXER_MASTER_VOL_MUTE_02, 0x0000);
        let output = mixer.output_volume();

        assert_eq!(mixer.writew(MIXER_HEADPHONE_VOL_MUTE_04, 0x8020), MixerEffect::None);
        assert_eq!(mixer.readw(MIXER_HEADPHONE_VOL_MUTE_04), 0x803f);
        assert_eq!(mixer.output_volume(), output);
        assert!(!mixer.master_volume().muted);
    }

    #[test]
    fn restore_bank_rederives_state() {
        let mut mixer = Ac97Mixer::new(CodecModel::Stac9700);
        mixer.writew(MIXER_MASTER_VOL_MUTE_02, 0x0404);
        mixer.writew(MIXER_RECORD_SELECT_1A, 0x0404);
        let bank = *mixer.bank();

        let mut restored = Ac97Mixer::new(CodecModel::Stac9700);
        restored.restore_bank(&bank);
        assert_eq!(restored.bank()[..], bank[..]);
        assert_eq!(restored.master_volume(), mixer.master_volume());
        assert_eq!(restored.record_source(), RecordSource::LineIn);
    }

    #[test]
    fn out_of_range_access() {
        let mut mixer = Ac97Mixer::new(CodecModel::Stac9700);
        mixer.set(0xff, 0x1234);
        assert_eq!(mixer.get(0xff), 0xffff);
    }
}
