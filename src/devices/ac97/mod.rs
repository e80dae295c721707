mod ac97;
mod ac97_aio;
pub mod ac97_bdl;
pub mod ac97_bus_master;
pub mod ac97_mixer;
pub mod ac97_params;
pub mod ac97_regs;
pub mod ac97_snapshot;
pub mod ac97_stream;
pub mod ac97_timer;

pub use self::ac97::{Ac97Bar, Ac97Dev, Ac97Error, Ac97PciIds, Ac97State, PortIoStatus};
pub use self::ac97_params::{Ac97Parameters, CodecModel, ParamsError};
pub use self::ac97_regs::Ac97Function;
pub use self::ac97_timer::{HostClock, ManualClock, VirtualClock};
