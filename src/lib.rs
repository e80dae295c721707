//! Emulation of the Intel ICH AC'97 audio controller: the native audio bus master DMA engine,
//! the codec mixer registers, and the host side plumbing that moves PCM between guest memory
//! and an audio backend.

#[macro_use]
extern crate log;

pub mod audio;
pub mod devices;

pub use devices::ac97::{Ac97Bar, Ac97Dev, Ac97Error, Ac97Parameters, CodecModel, PortIoStatus};
