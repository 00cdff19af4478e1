//! The hart: register state, the fetch/decode/dispatch loop and run control.

mod breakpoint;
pub mod csr;
mod execute;
pub mod instruction;
mod trap;

pub use breakpoint::BreakpointSet;
pub use csr::{CsrFile, Mstatus};
pub use instruction::{DecodeError, Instruction};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::device::{AddressRange, Bus, Device, Memory, Pfic};
use crate::error::BusError;

/// Number of general-purpose registers.
pub const REGS: usize = 32;

/// Why the execution loop handed control back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The hart retired an `ebreak`; the PC still points at it.
    Ebreak,
    /// A debugger breakpoint matched the current PC.
    Breakpoint,
    /// The debugger requested a halt.
    Paused,
    /// The PC left the flash window.
    OutOfFlash,
    /// Single-step mode retired exactly one instruction.
    Stepped,
}

/// One hardware-thread context: the register file, PC, CSRs, the device bus
/// and the debugger-facing run control.
pub struct Hart {
    regs: [u32; REGS],
    pc: u32,
    /// The last fetched instruction word.
    instr: u32,
    csrs: CsrFile,
    /// IRQ line currently being serviced, 0 when not in a handler.
    active_irq: u32,
    breakpoints: BreakpointSet,
    bus: Bus,
    flash: Option<Arc<Memory>>,
    pfic: Option<Arc<Pfic>>,
    retired: u64,
}

impl Hart {
    /// Create a hart with nothing attached. Call [`Hart::reset`] before
    /// executing.
    pub fn new() -> Self {
        Self {
            regs: [0; REGS],
            pc: 0,
            instr: 0,
            csrs: CsrFile::new(),
            active_irq: 0,
            breakpoints: BreakpointSet::new(),
            bus: Bus::new(),
            flash: None,
            pfic: None,
            retired: 0,
        }
    }

    /// Attach a device to the bus.
    pub fn attach_device(&mut self, device: Arc<dyn Device>) {
        self.bus.attach(device);
    }

    /// Designate the flash device instructions are fetched from.
    pub fn set_flash(&mut self, flash: Arc<Memory>) {
        self.flash = Some(flash);
    }

    /// Designate the interrupt controller consulted between retirements.
    pub fn set_pfic(&mut self, pfic: Arc<Pfic>) {
        self.pfic = Some(pfic);
    }

    /// Address window of the attached flash, if any.
    pub fn flash_range(&self) -> Option<AddressRange> {
        self.flash.as_ref().map(|flash| flash.range())
    }

    /// Zero the registers, PC and instruction latch, drop the bus caches
    /// and restore the identity CSRs. Breakpoints survive a reset.
    pub fn reset(&mut self) {
        self.regs = [0; REGS];
        self.pc = 0;
        self.instr = 0;
        self.active_irq = 0;
        self.retired = 0;
        self.bus.invalidate_cache();
        self.csrs.reset();
    }

    /// Read general-purpose register `reg`; `x0` always reads zero.
    pub fn read_reg(&self, reg: u32) -> u32 {
        self.regs[reg as usize]
    }

    /// Write general-purpose register `reg`; writes to `x0` are discarded.
    pub fn write_reg(&mut self, reg: u32, value: u32) {
        if reg != 0 {
            self.regs[reg as usize] = value;
        }
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
    }

    /// The last instruction word the hart fetched.
    pub fn last_instruction(&self) -> u32 {
        self.instr
    }

    /// Instructions retired since the last reset.
    pub fn instructions_retired(&self) -> u64 {
        self.retired
    }

    pub fn csrs(&self) -> &CsrFile {
        &self.csrs
    }

    pub fn csrs_mut(&mut self) -> &mut CsrFile {
        &mut self.csrs
    }

    /// The IRQ line whose handler is active, 0 when none.
    pub fn active_irq(&self) -> u32 {
        self.active_irq
    }

    pub(crate) fn set_active_irq(&mut self, irq: u32) {
        self.active_irq = irq;
    }

    pub(crate) fn pfic(&self) -> Option<&Arc<Pfic>> {
        self.pfic.as_ref()
    }

    pub fn breakpoints(&self) -> &BreakpointSet {
        &self.breakpoints
    }

    pub fn breakpoints_mut(&mut self) -> &mut BreakpointSet {
        &mut self.breakpoints
    }

    /// Bus read at `addr`, one of 1, 2 or 4 bytes.
    pub fn mem_read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), BusError> {
        self.bus.read(addr, buf)
    }

    /// Bus write at `addr`, one of 1, 2 or 4 bytes.
    pub fn mem_write(&mut self, addr: u32, data: &[u8]) -> Result<(), BusError> {
        self.bus.write(addr, data)
    }

    /// Host-privileged image copy, used by the program loader.
    pub fn load_image(&mut self, addr: u32, data: &[u8]) -> Result<(), BusError> {
        self.bus.load(addr, data)
    }

    /// Retire exactly one instruction.
    pub fn step(&mut self) -> StopReason {
        self.execute_loop(false, None)
    }

    /// Run until `ebreak`, a breakpoint, a debugger pause or the PC leaving
    /// flash.
    pub fn run(&mut self, pause: Option<&AtomicBool>) -> StopReason {
        self.execute_loop(true, pause)
    }

    /// The shared single-step/continue loop.
    ///
    /// Per iteration: breakpoint and pause checks (continue mode only),
    /// fetch from flash, dispatch, then the interrupt check once the
    /// instruction has retired.
    fn execute_loop(&mut self, forever: bool, pause: Option<&AtomicBool>) -> StopReason {
        let Some(flash) = self.flash.clone() else {
            tracing::error!("no flash attached, cannot fetch");
            return StopReason::OutOfFlash;
        };

        loop {
            if !flash.range().contains(self.pc) {
                tracing::warn!("pc {:#010x} left flash", self.pc);
                return StopReason::OutOfFlash;
            }

            if forever {
                if self.breakpoints.contains(self.pc) {
                    return StopReason::Breakpoint;
                }
                if let Some(pause) = pause {
                    if pause.load(Ordering::Acquire) {
                        return StopReason::Paused;
                    }
                }
            }

            let Some(word) = flash.fetch_word(self.pc) else {
                return StopReason::OutOfFlash;
            };
            self.instr = word;

            let ebreak = match Instruction::decode(word) {
                Ok(instruction) => self.execute(instruction),
                Err(err) => {
                    // Unimplemented encodings retire as no-ops for now.
                    tracing::warn!("at pc {:#010x}: {err}", self.pc);
                    self.pc = self.pc.wrapping_add(4);
                    false
                }
            };
            self.retired += 1;

            if ebreak {
                return StopReason::Ebreak;
            }

            if self.csrs.interrupts_enabled() {
                let pending = self.pfic.as_ref().and_then(|pfic| pfic.pending_irq());
                if let Some(irq) = pending {
                    // Re-entrancy guard: never re-enter the handler that is
                    // already active.
                    if irq != self.active_irq {
                        let next_pc = self.pc;
                        self.enter_irq(irq, next_pc, irq, 0);
                    }
                }
            }

            if !forever {
                return StopReason::Stepped;
            }
        }
    }
}

impl Default for Hart {
    fn default() -> Self {
        Self::new()
    }
}
