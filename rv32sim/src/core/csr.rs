use bitfield::bitfield;

/// Machine status register.
pub const MSTATUS: u16 = 0x300;
/// Trap-handler vector table base.
pub const MTVEC: u16 = 0x305;
/// Machine scratch register.
pub const MSCRATCH: u16 = 0x340;
/// Exception program counter.
pub const MEPC: u16 = 0x341;
/// Trap cause.
pub const MCAUSE: u16 = 0x342;
/// Trap value.
pub const MTVAL: u16 = 0x343;
/// Architecture ID, read-only.
pub const MARCHID: u16 = 0xF12;
/// Implementation ID, read-only.
pub const MIMPID: u16 = 0xF13;

const MARCHID_RESET: u32 = 0xDC68_D886;
const MIMPID_RESET: u32 = 0xDC68_8001;

bitfield! {
    /// `mstatus`, of which the core only consumes the two
    /// interrupt-enable rotation bits.
    #[derive(Copy, Clone)]
    pub struct Mstatus(u32);
    impl Debug;

    /// Global machine interrupt enable.
    pub mie, set_mie: 3;
    /// Interrupt enable as it was before the active trap was entered.
    pub mpie, set_mpie: 7;
}

/// The machine-mode control and status registers.
///
/// Unknown addresses read as zero and swallow writes; `marchid` and
/// `mimpid` are read-only identity values re-initialized on every reset.
#[derive(Debug, Clone)]
pub struct CsrFile {
    marchid: u32,
    mimpid: u32,
    mstatus: Mstatus,
    mtvec: u32,
    mscratch: u32,
    mepc: u32,
    mcause: u32,
    mtval: u32,
}

impl CsrFile {
    pub fn new() -> Self {
        Self {
            marchid: MARCHID_RESET,
            mimpid: MIMPID_RESET,
            mstatus: Mstatus(0),
            mtvec: 0,
            mscratch: 0,
            mepc: 0,
            mcause: 0,
            mtval: 0,
        }
    }

    /// Restore the reset state, including the identity registers.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Read the CSR at `addr`; unknown addresses read as zero.
    pub fn read(&self, addr: u16) -> u32 {
        match addr {
            MARCHID => self.marchid,
            MIMPID => self.mimpid,
            MSTATUS => self.mstatus.0,
            MTVEC => self.mtvec,
            MSCRATCH => self.mscratch,
            MEPC => self.mepc,
            MCAUSE => self.mcause,
            MTVAL => self.mtval,
            _ => {
                tracing::debug!("read of unimplemented CSR {addr:#05x}");
                0
            }
        }
    }

    /// Write the CSR at `addr`; unknown and read-only addresses swallow the
    /// write.
    pub fn write(&mut self, addr: u16, value: u32) {
        match addr {
            MSTATUS => self.mstatus = Mstatus(value),
            MTVEC => self.mtvec = value,
            MSCRATCH => self.mscratch = value,
            MEPC => self.mepc = value,
            MCAUSE => self.mcause = value,
            MTVAL => self.mtval = value,
            MARCHID | MIMPID => {}
            _ => {
                tracing::debug!("write of {value:#010x} to unimplemented CSR {addr:#05x}");
            }
        }
    }

    pub fn mstatus(&self) -> Mstatus {
        self.mstatus
    }

    pub fn set_mstatus(&mut self, status: Mstatus) {
        self.mstatus = status;
    }

    /// Whether the global interrupt enable is set.
    pub fn interrupts_enabled(&self) -> bool {
        self.mstatus.mie()
    }

    /// Base of the vectored handler table, low two bits reserved.
    pub fn trap_vector_base(&self) -> u32 {
        self.mtvec & !3
    }
}

impl Default for CsrFile {
    fn default() -> Self {
        Self::new()
    }
}
