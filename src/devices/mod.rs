pub mod ac97;
pub mod irq_event;

pub use irq_event::{IrqLevelEvent, IrqLine};
