//! Controlled transfer into and out of interrupt handlers.

use crate::core::{csr, Hart};

impl Hart {
    /// Enter the handler for `irq`.
    ///
    /// Saves the interrupted PC and cause, rotates MIE into MPIE with
    /// interrupts disabled, and jumps through the vectored handler table:
    /// the 4-byte handler pointer lives at `(mtvec & ~3) + irq * 4`.
    pub(crate) fn enter_irq(&mut self, irq: u32, mepc: u32, mcause: u32, mtval: u32) {
        self.csrs_mut().write(csr::MEPC, mepc);
        self.csrs_mut().write(csr::MCAUSE, mcause);
        self.csrs_mut().write(csr::MTVAL, mtval);

        let mut status = self.csrs().mstatus();
        status.set_mpie(status.mie());
        status.set_mie(false);
        self.csrs_mut().set_mstatus(status);

        let slot = self.csrs().trap_vector_base() + irq * 4;
        let mut handler = [0u8; 4];
        match self.mem_read(slot, &mut handler) {
            Ok(()) => self.set_pc(u32::from_le_bytes(handler)),
            Err(err) => {
                tracing::error!(irq, "reading handler vector failed: {err}");
            }
        }

        tracing::debug!(irq, "entering handler, interrupted pc {mepc:#010x}");
        self.set_active_irq(irq);
    }

    /// Return from the active handler (`mret`).
    ///
    /// Restores the PC from `mepc`, rotates MPIE back into MIE, and drops
    /// the pending bit of the serviced line so it does not immediately
    /// re-enter.
    pub(crate) fn exit_irq(&mut self) {
        let mepc = self.csrs().read(csr::MEPC);
        self.set_pc(mepc);

        let mut status = self.csrs().mstatus();
        status.set_mie(status.mpie());
        status.set_mpie(false);
        self.csrs_mut().set_mstatus(status);

        let irq = self.active_irq();
        if let Some(pfic) = self.pfic() {
            pfic.clear_pending(irq);
        }
        tracing::debug!(irq, "handler done");
        self.set_active_irq(0);
    }
}
