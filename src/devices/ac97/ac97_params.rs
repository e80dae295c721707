use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::devices::ac97::ac97_timer::TIMER_HZ_DEFAULT;

/// Errors from parsing `Ac97Parameters`.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParamsError {
    #[error("unknown codec `{0}`, must be one of [stac9700, ad1980, ad1981b]")]
    InvalidCodec(String),
    #[error("invalid timer_hz `{0}`, must be in 1..=1000")]
    InvalidTimerHz(String),
    #[error("invalid async_io `{0}`, must be a boolean")]
    InvalidAsyncIo(String),
    #[error("unknown parameter `{0}`")]
    UnknownKey(String),
    #[error("expected key=value, got `{0}`")]
    Malformed(String),
}

/// Codec chip presented to the guest. Changes the vendor ID and a few register defaults.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CodecModel {
    Stac9700,
    Ad1980,
    Ad1981b,
}

impl CodecModel {
    /// Contents of the vendor ID 1 and 2 registers.
    pub fn vendor_ids(self) -> (u16, u16) {
        match self {
            CodecModel::Stac9700 => (0x8384, 0x7600),
            CodecModel::Ad1980 => (0x4144, 0x5370),
            CodecModel::Ad1981b => (0x4144, 0x5374),
        }
    }

    /// PCI subsystem vendor and device IDs of a board carrying this codec.
    pub fn pci_subsystem_ids(self) -> (u16, u16) {
        match self {
            CodecModel::Stac9700 => (0x8086, 0x0000),
            CodecModel::Ad1980 => (0x1028, 0x0177),
            CodecModel::Ad1981b => (0x1028, 0x01ad),
        }
    }
}

impl Default for CodecModel {
    fn default() -> Self {
        CodecModel::Stac9700
    }
}

impl fmt::Display for CodecModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CodecModel::Stac9700 => write!(f, "STAC9700"),
            CodecModel::Ad1980 => write!(f, "AD1980"),
            CodecModel::Ad1981b => write!(f, "AD1981B"),
        }
    }
}

impl FromStr for CodecModel {
    type Err = ParamsError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stac9700" => Ok(CodecModel::Stac9700),
            "ad1980" => Ok(CodecModel::Ad1980),
            "ad1981b" => Ok(CodecModel::Ad1981b),
            _ => Err(ParamsError::InvalidCodec(s.to_string())),
        }
    }
}

/// Runtime options of an `Ac97Dev`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Ac97Parameters {
    pub codec: CodecModel,
    /// Stream polling frequency. `TIMER_HZ_DEFAULT` lets each stream adapt to its sample rate.
    pub timer_hz: u16,
    /// Service host sinks from a worker thread per stream instead of the timer callback.
    pub async_io: bool,
}

impl Default for Ac97Parameters {
    fn default() -> Self {
        Ac97Parameters {
            codec: CodecModel::default(),
            timer_hz: TIMER_HZ_DEFAULT,
            async_io: false,
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "on" | "1" | "yes" => Some(true),
        "false" | "off" | "0" | "no" => Some(false),
        _ => None,
    }
}

impl FromStr for Ac97Parameters {
    type Err = ParamsError;

    /// Parses a comma separated `key=value` list, e.g. `codec=ad1980,timer_hz=200`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut params = Ac97Parameters::default();
        for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            let mut kv = item.splitn(2, '=');
            let key = kv.next().unwrap_or("").trim();
            let value = kv
                .next()
                .map(str::trim)
                .ok_or_else(|| ParamsError::Malformed(item.to_string()))?;
            match key {
                "codec" => params.codec = value.parse()?,
                "timer_hz" => {
                    params.timer_hz = value
                        .parse::<u16>()
                        .ok()
                        .filter(|hz| (1..=1000).contains(hz))
                        .ok_or_else(|| ParamsError::InvalidTimerHz(value.to_string()))?;
                }
                "async_io" => {
                    params.async_io = parse_bool(value)
                        .ok_or_else(|| ParamsError::InvalidAsyncIo(value.to_string()))?;
                }
                _ => return Err(ParamsError::UnknownKey(key.to_string())),
            }
        }
        Ok(params)
    }
}
