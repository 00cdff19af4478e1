use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::device::{AddressRange, Device};
use crate::error::BusError;

/// Base address of the programmable fast interrupt controller.
pub const PFIC_BASE: u32 = 0xE000_E000;

/// IRQ line wired to the system timer.
pub const IRQ_SYSTICK: u32 = 12;
/// IRQ line raised by software through the timer control register.
pub const IRQ_SOFTWARE: u32 = 14;

const WINDOW_SIZE: u32 = 0x1000;

// Register windows, as offsets from the device base.
const ISR_OFF: u32 = 0x000; // enable state, read
const IPR_OFF: u32 = 0x020; // pending state, read
const IENR_OFF: u32 = 0x100; // write 1-bits to set enables
const IRER_OFF: u32 = 0x180; // write 1-bits to clear enables
const IPSR_OFF: u32 = 0x200; // write 1-bits to set pending
const IPRR_OFF: u32 = 0x280; // write 1-bits to clear pending
const IPRIOR_OFF: u32 = 0x400; // one priority byte per IRQ

/// Priority-encoded interrupt controller with 256 IRQ lines.
///
/// Enable and pending state live in 8 32-bit words each; priorities are one
/// byte per line, lower value meaning higher priority. All state is atomic
/// because the timer thread posts pending bits while the hart is executing.
pub struct Pfic {
    enable: [AtomicU32; 8],
    pending: [AtomicU32; 8],
    priority: [AtomicU8; 256],
}

impl Pfic {
    pub fn new() -> Self {
        Self {
            enable: std::array::from_fn(|_| AtomicU32::new(0)),
            pending: std::array::from_fn(|_| AtomicU32::new(0)),
            priority: std::array::from_fn(|_| AtomicU8::new(0)),
        }
    }

    /// Mark `irq` pending.
    pub fn set_pending(&self, irq: u32) {
        let (word, bit) = (irq as usize / 32, irq % 32);
        self.pending[word].fetch_or(1 << bit, Ordering::AcqRel);
    }

    /// Clear the pending bit of `irq`.
    pub fn clear_pending(&self, irq: u32) {
        let (word, bit) = (irq as usize / 32, irq % 32);
        self.pending[word].fetch_and(!(1 << bit), Ordering::AcqRel);
    }

    /// Enable `irq` delivery.
    pub fn set_enabled(&self, irq: u32) {
        let (word, bit) = (irq as usize / 32, irq % 32);
        self.enable[word].fetch_or(1 << bit, Ordering::AcqRel);
    }

    /// Arbitrate the pending IRQs.
    ///
    /// Returns the line that is both enabled and pending with the
    /// numerically smallest priority byte; ties go to the lowest IRQ index.
    /// `None` when no line is eligible.
    pub fn pending_irq(&self) -> Option<u32> {
        let mut best: Option<(u8, u32)> = None;

        for word in 0..8 {
            let pending = self.pending[word].load(Ordering::Acquire);
            if pending == 0 {
                continue;
            }
            let eligible = pending & self.enable[word].load(Ordering::Acquire);
            for bit in 0..32 {
                if eligible & (1 << bit) == 0 {
                    continue;
                }
                let irq = word as u32 * 32 + bit;
                let prio = self.priority[irq as usize].load(Ordering::Relaxed);
                match best {
                    Some((best_prio, _)) if prio >= best_prio => {}
                    _ => best = Some((prio, irq)),
                }
            }
        }

        best.map(|(_, irq)| irq)
    }

    /// Reset all enable, pending and priority state.
    pub fn reset(&self) {
        for word in 0..8 {
            self.enable[word].store(0, Ordering::Release);
            self.pending[word].store(0, Ordering::Release);
        }
        for prio in &self.priority {
            prio.store(0, Ordering::Relaxed);
        }
    }

    fn word_value(data: &[u8]) -> u32 {
        let mut bytes = [0u8; 4];
        bytes[..data.len()].copy_from_slice(data);
        u32::from_le_bytes(bytes)
    }

    fn read_word(value: u32, buf: &mut [u8]) {
        buf.copy_from_slice(&value.to_le_bytes()[..buf.len()]);
    }
}

impl Default for Pfic {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for Pfic {
    fn name(&self) -> &'static str {
        "pfic"
    }

    fn range(&self) -> AddressRange {
        AddressRange::new(PFIC_BASE, WINDOW_SIZE)
    }

    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), BusError> {
        let offset = addr - PFIC_BASE;
        match offset {
            ISR_OFF..=0x01F => {
                let word = ((offset - ISR_OFF) / 4) as usize;
                Self::read_word(self.enable[word].load(Ordering::Acquire), buf);
            }
            IPR_OFF..=0x03F => {
                let word = ((offset - IPR_OFF) / 4) as usize;
                Self::read_word(self.pending[word].load(Ordering::Acquire), buf);
            }
            IPRIOR_OFF..=0x4FF => {
                let start = (offset - IPRIOR_OFF) as usize;
                for (i, byte) in buf.iter_mut().enumerate() {
                    let prio = self
                        .priority
                        .get(start + i)
                        .ok_or(BusError::BadOffset { name: "pfic", address: addr })?;
                    *byte = prio.load(Ordering::Relaxed);
                }
            }
            _ => return Err(BusError::BadOffset { name: "pfic", address: addr }),
        }
        Ok(())
    }

    fn write(&self, addr: u32, data: &[u8]) -> Result<(), BusError> {
        let offset = addr - PFIC_BASE;
        match offset {
            IENR_OFF..=0x11F => {
                let word = ((offset - IENR_OFF) / 4) as usize;
                self.enable[word].fetch_or(Self::word_value(data), Ordering::AcqRel);
            }
            IRER_OFF..=0x19F => {
                let word = ((offset - IRER_OFF) / 4) as usize;
                self.enable[word].fetch_and(!Self::word_value(data), Ordering::AcqRel);
            }
            IPSR_OFF..=0x21F => {
                let word = ((offset - IPSR_OFF) / 4) as usize;
                self.pending[word].fetch_or(Self::word_value(data), Ordering::AcqRel);
            }
            IPRR_OFF..=0x29F => {
                let word = ((offset - IPRR_OFF) / 4) as usize;
                self.pending[word].fetch_and(!Self::word_value(data), Ordering::AcqRel);
            }
            IPRIOR_OFF..=0x4FF => {
                let start = (offset - IPRIOR_OFF) as usize;
                for (i, byte) in data.iter().enumerate() {
                    let prio = self
                        .priority
                        .get(start + i)
                        .ok_or(BusError::BadOffset { name: "pfic", address: addr })?;
                    prio.store(*byte, Ordering::Relaxed);
                }
            }
            _ => return Err(BusError::BadOffset { name: "pfic", address: addr }),
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn arbitration_requires_enable_and_pending() {
        let pfic = Pfic::new();
        assert_eq!(pfic.pending_irq(), None);

        pfic.set_pending(IRQ_SYSTICK);
        assert_eq!(pfic.pending_irq(), None);

        pfic.set_enabled(IRQ_SYSTICK);
        assert_eq!(pfic.pending_irq(), Some(IRQ_SYSTICK));

        pfic.clear_pending(IRQ_SYSTICK);
        assert_eq!(pfic.pending_irq(), None);
    }

    #[test]
    fn lowest_priority_byte_wins() {
        let pfic = Pfic::new();
        pfic.set_enabled(12);
        pfic.set_enabled(40);
        pfic.set_pending(12);
        pfic.set_pending(40);

        // Same priority: the lower index wins.
        assert_eq!(pfic.pending_irq(), Some(12));

        // Give line 40 a numerically smaller (= higher) priority.
        pfic.write(PFIC_BASE + 0x400 + 40, &[0x10]).unwrap();
        pfic.write(PFIC_BASE + 0x400 + 12, &[0x20]).unwrap();
        assert_eq!(pfic.pending_irq(), Some(40));
    }

    #[test]
    fn set_and_clear_windows() {
        let pfic = Pfic::new();

        // Enable IRQ 12 through the set-enable window.
        pfic.write(PFIC_BASE + 0x100, &(1u32 << 12).to_le_bytes())
            .unwrap();
        // Pend it through the set-pending window.
        pfic.write(PFIC_BASE + 0x200, &(1u32 << 12).to_le_bytes())
            .unwrap();
        assert_eq!(pfic.pending_irq(), Some(12));

        let mut buf = [0u8; 4];
        pfic.read(PFIC_BASE, &mut buf).unwrap();
        assert_eq!(u32::from_le_bytes(buf), 1 << 12);
        pfic.read(PFIC_BASE + 0x20, &mut buf).unwrap();
        assert_eq!(u32::from_le_bytes(buf), 1 << 12);

        // Clear both through the clear windows.
        pfic.write(PFIC_BASE + 0x280, &(1u32 << 12).to_le_bytes())
            .unwrap();
        pfic.write(PFIC_BASE + 0x180, &(1u32 << 12).to_le_bytes())
            .unwrap();
        assert_eq!(pfic.pending_irq(), None);
        pfic.read(PFIC_BASE, &mut buf).unwrap();
        assert_eq!(u32::from_le_bytes(buf), 0);
    }

    #[test]
    fn irq_lines_above_the_first_word() {
        let pfic = Pfic::new();
        pfic.set_enabled(200);
        pfic.set_pending(200);
        assert_eq!(pfic.pending_irq(), Some(200));
    }
}
