use std::fmt::{Debug, Formatter};

use vm_memory::{Bytes, GuestAddress, GuestMemoryError, GuestMemoryMmap};

use crate::devices::ac97::ac97_bus_master::Ac97FunctionRegs;
use crate::devices::ac97::ac97_regs::*;

/// One buffer descriptor list entry as found in guest memory.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Guest physical address of the buffer, advanced as samples are moved.
    pub addr: u32,
    /// Flags in the top bits, length in samples in the low 16.
    pub ctl_len: u32,
}

impl BufferDescriptor {
    /// Reads entry `index` of the list at `bdbar`.
    pub fn read(mem: &GuestMemoryMmap, bdbar: u32, index: u8) -> Result<Self, GuestMemoryError> {
        let entry = u64::from(bdbar) + u64::from(index % MAX_BDLE) * DESCRIPTOR_LENGTH;
        let addr: u32 = mem.read_obj(GuestAddress(entry))?;
        let ctl_len: u32 = mem.read_obj(GuestAddress(entry + 4))?;
        Ok(BufferDescriptor {
            addr: u32::from_le(addr) & !0x03, // The address must be aligned to four bytes.
            ctl_len: u32::from_le(ctl_len),
        })
    }

    pub fn samples(&self) -> u16 {
        (self.ctl_len & BD_LEN_MASK) as u16
    }

    pub fn ioc(&self) -> bool {
        self.ctl_len & BD_IOC != 0
    }

    pub fn bup(&self) -> bool {
        self.ctl_len & BD_BUP != 0
    }
}

impl Debug for BufferDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "BDLE(0x{:08x}, {} samples{}{})",
            self.addr,
            self.samples(),
            if self.ioc() { ", IOC" } else { "" },
            if self.bup() { ", BUP" } else { "" },
        )
    }
}

/// Loads the descriptor at CIV into the register cache and resets PICB to its length.
pub fn fetch_bdle(mem: &GuestMemoryMmap, regs: &mut Ac97FunctionRegs) -> Result<(), GuestMemoryError> {
    let bd = BufferDescriptor::read(mem, regs.bdbar, regs.civ)?;
    trace!("AC97: fetched {:?} at index {}", bd, regs.civ);
    regs.bd = bd;
    regs.bd_valid = true;
    regs.picb = bd.samples();
    Ok(())
}

/// Moves to the prefetched descriptor and loads it.
pub fn advance_bdle(mem: &GuestMemoryMmap, regs: &mut Ac97FunctionRegs) -> Result<(), GuestMemoryError> {
    regs.move_to_next_buffer();
    fetch_bdle(mem, regs)
}

#[cfg(test)]
mod test {
    use super::*;

    fn guest_mem() -> GuestMemoryMmap {
        GuestMemoryMmap::from_ranges(&[(GuestAddress(0), 0x10000)]).unwrap()
    }

    #[test]
    fn fetch_sets_picb_and_masks_address() {
        let mem = guest_mem();
        let mut regs = Ac97FunctionRegs::new();
        regs.bdbar = 0x1000;
        regs.civ = 1;
        mem.write_obj(0x2003u32, GuestAddress(0x1008)).unwrap();
        mem.write_obj(BD_IOC | 0x200, GuestAddress(0x100c)).unwrap();

        fetch_bdle(&mem, &mut regs).unwrap();
        assert!(regs.bd_valid);
        assert_eq!(regs.bd.addr, 0x2000);
        assert!(regs.bd.ioc());
        assert!(!regs.bd.bup());
        assert_eq!(regs.picb, 0x200);
    }

    #[test]
    fn advance_wraps_indices() {
        let mem = guest_mem();
        let mut regs = Ac97FunctionRegs::new();
        regs.bdbar = 0x1000;
        regs.civ = 30;
        regs.piv = 31;
        for i in 0..32u64 {
            mem.write_obj(0x4000u32 + i as u32 * 0x100, GuestAddress(0x1000 + i * 8)).unwrap();
            mem.write_obj(i as u32 + 1, GuestAddress(0x1000 + i * 8 + 4)).unwrap();
        }

        advance_bdle(&mem, &mut regs).unwrap();
        assert_eq!((regs.civ, regs.piv), (31, 0));
        assert_eq!(regs.picb, 32);
        advance_bdle(&mem, &mut regs).unwrap();
        assert_eq!((regs.civ, regs.piv), (0, 1));
        assert_eq!(regs.bd.addr, 0x4000);
        assert_eq!(regs.picb, 1);
    }

    #[test]
    fn fetch_outside_guest_memory_fails() {
        let mem = guest_mem();
        let mut regs = Ac97FunctionRegs::new();
        regs.bdbar = 0xffff_0000;
        assert!(fetch_bdle(&mem, &mut regs).is_err());
        assert!(!regs.bd_valid);
    }
}
