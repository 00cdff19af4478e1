//! An RV32IM + Zicsr instruction-set simulator.
//!
//! The crate is built around four pieces: the [`Hart`](core::Hart) with its
//! fetch/decode/dispatch loop, the [`device`] bus with the memory-mapped
//! peripherals (memory, interrupt controller, system timer, UART, LCD), the
//! program [`loader`], and the [`machine`] builder that wires them together
//! the way the emulated board is laid out.
//!
//! ```no_run
//! use rv32sim::machine::{Machine, MachineConfig};
//!
//! let mut machine = Machine::new(MachineConfig::default());
//! machine.load_program("firmware.bin".as_ref())?;
//! machine.hart_mut().reset();
//! let reason = machine.hart_mut().run(None);
//! println!("stopped: {reason:?}");
//! # Ok::<(), rv32sim::loader::LoaderError>(())
//! ```

pub mod asm;
pub mod core;
pub mod device;
mod error;
pub mod loader;
pub mod machine;
pub mod selftest;

pub use crate::core::{BreakpointSet, CsrFile, Hart, Instruction, StopReason};
pub use crate::error::{BusError, Error};
