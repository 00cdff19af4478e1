use std::io::Write as _;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::device::{AddressRange, Device};
use crate::error::BusError;

/// Base address of UART1.
pub const USART1_BASE: u32 = 0x4001_3800;

const STATR_OFF: u32 = 0;
const DATAR_OFF: u32 = 4;
const BRR_OFF: u32 = 8;
const CTRL_OFF: u32 = 12;

// Transmit-enable bit in CTRL1.
const CTRL_TE: u32 = 1 << 13;

/// Memory-mapped UART register window.
///
/// Only the subset of registers the guest firmware touches is modelled.
/// Bytes written to DATAR while the transmit-enable bit is set are echoed
/// to host stdout; STATR and BRR accept writes and read back as zero.
pub struct Usart {
    ctrl: AtomicU32,
}

impl Usart {
    pub fn new() -> Self {
        Self {
            ctrl: AtomicU32::new(0),
        }
    }
}

impl Default for Usart {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for Usart {
    fn name(&self) -> &'static str {
        "usart1"
    }

    fn range(&self) -> AddressRange {
        AddressRange::new(USART1_BASE, 16)
    }

    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), BusError> {
        let offset = addr - USART1_BASE;
        let value = match offset {
            STATR_OFF | DATAR_OFF | BRR_OFF => 0,
            CTRL_OFF => self.ctrl.load(Ordering::Acquire),
            _ => return Err(BusError::BadOffset { name: "usart1", address: addr }),
        };
        buf.copy_from_slice(&value.to_le_bytes()[..buf.len()]);
        Ok(())
    }

    fn write(&self, addr: u32, data: &[u8]) -> Result<(), BusError> {
        let offset = addr - USART1_BASE;
        match offset {
            STATR_OFF | BRR_OFF => {}
            DATAR_OFF => {
                if self.ctrl.load(Ordering::Acquire) & CTRL_TE != 0 {
                    let mut stdout = std::io::stdout().lock();
                    let _ = stdout.write_all(&data[..1]);
                    let _ = stdout.flush();
                }
            }
            CTRL_OFF => {
                let mut bytes = [0u8; 4];
                bytes[..data.len()].copy_from_slice(data);
                self.ctrl.store(u32::from_le_bytes(bytes), Ordering::Release);
            }
            _ => return Err(BusError::BadOffset { name: "usart1", address: addr }),
        }
        Ok(())
    }
}
