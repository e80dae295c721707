use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::devices::ac97::ac97_bdl::BufferDescriptor;
use crate::devices::ac97::ac97_bus_master::{Ac97BusMaster, Ac97FunctionRegs};
use crate::devices::ac97::ac97_mixer::Ac97Mixer;
use crate::devices::ac97::ac97_regs::{AC97_FUNCTIONS, MIXER_REGS_SIZE};

pub const SAVED_STATE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("unsupported saved state version {0}")]
    UnsupportedVersion(u32),
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

fn write_func_regs<W: Write>(w: &mut W, regs: &Ac97FunctionRegs) -> io::Result<()> {
    w.write_u32::<LittleEndian>(regs.bdbar)?;
    w.write_u8(regs.civ)?;
    w.write_u8(regs.lvi)?;
    w.write_u16::<LittleEndian>(regs.sr)?;
    w.write_u16::<LittleEndian>(regs.picb)?;
    w.write_u8(regs.piv)?;
    w.write_u8(regs.cr)?;
    w.write_i32::<LittleEndian>(regs.bd_valid as i32)?;
    w.write_u32::<LittleEndian>(regs.bd.addr)?;
    w.write_u32::<LittleEndian>(regs.bd.ctl_len)
}

fn read_func_regs<R: Read>(r: &mut R) -> io::Result<Ac97FunctionRegs> {
    let mut regs = Ac97FunctionRegs::new();
    regs.bdbar = r.read_u32::<LittleEndian>()?;
    regs.civ = r.read_u8()?;
    regs.lvi = r.read_u8()?;
    regs.sr = r.read_u16::<LittleEndian>()?;
    regs.picb = r.read_u16::<LittleEndian>()?;
    regs.piv = r.read_u8()?;
    regs.cr = r.read_u8()?;
    regs.bd_valid = r.read_i32::<LittleEndian>()? != 0;
    regs.bd = BufferDescriptor {
        addr: r.read_u32::<LittleEndian>()?,
        ctl_len: r.read_u32::<LittleEndian>()?,
    };
    Ok(regs)
}

/// Writes the device state: global registers, the three functions, the codec bank and which
/// streams are running.
pub fn save_state<W: Write>(bm: &Ac97BusMaster, mixer: &Ac97Mixer, w: &mut W) -> Result<()> {
    let regs = bm.regs();
    w.write_u32::<LittleEndian>(SAVED_STATE_VERSION)?;
    w.write_u32::<LittleEndian>(regs.glob_cnt)?;
    w.write_u32::<LittleEndian>(regs.glob_sta)?;
    w.write_u32::<LittleEndian>(u32::from(regs.acc_sema))?;
    for &func in AC97_FUNCTIONS.iter() {
        write_func_regs(w, regs.func_regs(func))?;
    }
    w.write_all(mixer.bank())?;
    for &func in AC97_FUNCTIONS.iter() {
        w.write_u8(bm.stream(func).is_enabled() as u8)?;
    }
    Ok(())
}

/// Restores what `save_state` wrote. Nothing is applied unless the whole stream parses. Running
/// streams reopen their sinks and continue from the saved descriptor, which is not fetched again.
pub fn load_state<R: Read>(bm: &mut Ac97BusMaster, mixer: &mut Ac97Mixer, r: &mut R) -> Result<()> {
    let version = r.read_u32::<LittleEndian>()?;
    if version != SAVED_STATE_VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }
    let glob_cnt = r.read_u32::<LittleEndian>()?;
    let glob_sta = r.read_u32::<LittleEndian>()?;
    let acc_sema = r.read_u32::<LittleEndian>()? as u8;
    let pi_regs = read_func_regs(r)?;
    let po_regs = read_func_regs(r)?;
    let mc_regs = read_func_regs(r)?;
    let mut bank = [0u8; MIXER_REGS_SIZE as usize];
    r.read_exact(&mut bank)?;
    let mut active = [false; 3];
    for a in active.iter_mut() {
        *a = r.read_u8()? != 0;
    }

    mixer.restore_bank(&bank);
    {
        let regs = bm.regs_mut();
        regs.glob_cnt = glob_cnt;
        regs.glob_sta = glob_sta;
        regs.acc_sema = acc_sema;
        regs.pi_regs = pi_regs;
        regs.po_regs = po_regs;
        regs.mc_regs = mc_regs;
    }
    bm.restore_streams(active, mixer);
    info!("AC97: state restored, streams running {:?}", active);
    Ok(())
}
