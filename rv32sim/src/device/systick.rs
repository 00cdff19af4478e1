use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::device::pfic::{Pfic, IRQ_SOFTWARE, IRQ_SYSTICK};
use crate::device::{AddressRange, Device};
use crate::error::BusError;

/// Base address of the system timer.
pub const SYSTICK_BASE: u32 = 0xE000_F000;
/// Nominal counting frequency of the timer.
pub const SYSTICK_FREQ_HZ: u64 = 100_000_000;

const CTLR_OFF: u32 = 0x00;
const SR_OFF: u32 = 0x04;
const CNT_OFF: u32 = 0x08;
const CMP_OFF: u32 = 0x10;

const CTLR_ENABLE: u32 = 1 << 0;
const CTLR_IRQ_ENABLE: u32 = 1 << 1;
const CTLR_RELOAD_CMP: u32 = 1 << 4;
const CTLR_RELOAD: u32 = 1 << 5;
const CTLR_SWI: u32 = 1 << 31;

/// Periodic system timer.
///
/// The expiry itself is modelled in host time: a worker thread sleeps for
/// `CMP / (freq / 1000)` milliseconds, then sets the status-ready bit and,
/// when the interrupt enable bit is set, posts the timer IRQ in the PFIC.
/// Writing the software-interrupt bit in CTLR posts the software IRQ
/// immediately from the writing thread.
pub struct Systick {
    ctlr: AtomicU32,
    sr: AtomicU32,
    cnt: AtomicU64,
    cmp: AtomicU64,
    pfic: Arc<Pfic>,
    shutdown: AtomicBool,
}

impl Systick {
    pub fn new(pfic: Arc<Pfic>) -> Self {
        Self {
            ctlr: AtomicU32::new(0),
            sr: AtomicU32::new(0),
            cnt: AtomicU64::new(0),
            cmp: AtomicU64::new(0),
            pfic,
            shutdown: AtomicBool::new(false),
        }
    }

    /// Start the host-time countdown thread.
    ///
    /// The thread idles while the enable bit is clear and exits once
    /// [`Systick::shutdown`] is called.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let systick = Arc::clone(self);
        std::thread::spawn(move || systick.countdown_loop())
    }

    /// Ask the countdown thread to exit at its next wake-up.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    fn countdown_loop(&self) {
        while !self.shutdown.load(Ordering::Acquire) {
            if self.ctlr.load(Ordering::Acquire) & CTLR_ENABLE == 0 {
                std::thread::sleep(Duration::from_millis(1));
                continue;
            }

            let cmp = self.cmp.load(Ordering::Acquire);
            std::thread::sleep(Duration::from_millis(cmp / (SYSTICK_FREQ_HZ / 1000)));

            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            self.sr.fetch_or(1, Ordering::AcqRel);
            if self.ctlr.load(Ordering::Acquire) & CTLR_IRQ_ENABLE != 0 {
                self.pfic.set_pending(IRQ_SYSTICK);
            }
        }
    }

    fn write_ctlr(&self, value: u32) {
        self.ctlr.store(value, Ordering::Release);

        // CNT reloads at the moment the counter is (re)started.
        match (value & CTLR_RELOAD_CMP != 0, value & CTLR_RELOAD != 0) {
            (true, true) => {
                let cmp = self.cmp.load(Ordering::Acquire);
                self.cnt.store(cmp, Ordering::Release);
            }
            (false, true) => self.cnt.store(0, Ordering::Release),
            _ => {}
        }

        if value & CTLR_SWI != 0 {
            self.pfic.set_pending(IRQ_SOFTWARE);
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

    fn half(value: u64, high: bool) -> u32 {
        if high {
            (value >> 32) as u32
        } else {
            value as u32
        }
    }

    fn set_half(reg: &AtomicU64, high: bool, word: u32) {
        let old = reg.load(Ordering::Acquire);
        let new = if high {
            (old & 0x0000_0000_FFFF_FFFF) | (u64::from(word) << 32)
        } else {
            (old & 0xFFFF_FFFF_0000_0000) | u64::from(word)
        };
        reg.store(new, Ordering::Release);
    }
}

impl Device for Systick {
    fn name(&self) -> &'static str {
        "systick"
    }

    fn range(&self) -> AddressRange {
        AddressRange::new(SYSTICK_BASE, 0x20)
    }

    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), BusError> {
        let offset = addr - SYSTICK_BASE;
        let value = match offset {
            CTLR_OFF => self.ctlr.load(Ordering::Acquire),
            SR_OFF => self.sr.load(Ordering::Acquire),
            CNT_OFF => Self::half(self.cnt.load(Ordering::Acquire), false),
            0x0C => Self::half(self.cnt.load(Ordering::Acquire), true),
            CMP_OFF => Self::half(self.cmp.load(Ordering::Acquire), false),
            0x14 => Self::half(self.cmp.load(Ordering::Acquire), true),
            _ => return Err(BusError::BadOffset { name: "systick", address: addr }),
        };
        Self::read_word(value, buf);
        Ok(())
    }

    fn write(&self, addr: u32, data: &[u8]) -> Result<(), BusError> {
        let offset = addr - SYSTICK_BASE;
        let value = Self::word_value(data);
        match offset {
            CTLR_OFF => self.write_ctlr(value),
            // Status is write-0-to-clear.
            SR_OFF => {
                if value & 1 == 0 {
                    self.sr.store(0, Ordering::Release);
                }
            }
            CNT_OFF => Self::set_half(&self.cnt, false, value),
            0x0C => Self::set_half(&self.cnt, true, value),
            CMP_OFF => Self::set_half(&self.cmp, false, value),
            0x14 => Self::set_half(&self.cmp, true, value),
            _ => return Err(BusError::BadOffset { name: "systick", address: addr }),
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn systick() -> (Arc<Pfic>, Systick) {
        let pfic = Arc::new(Pfic::new());
        let systick = Systick::new(Arc::clone(&pfic));
        (pfic, systick)
    }

    #[test]
    fn compare_register_is_64_bits_wide() {
        let (_pfic, systick) = systick();
        systick
            .write(SYSTICK_BASE + CMP_OFF, &0xAABB_CCDDu32.to_le_bytes())
            .unwrap();
        systick
            .write(SYSTICK_BASE + 0x14, &0x0011_2233u32.to_le_bytes())
            .unwrap();
        assert_eq!(systick.cmp.load(Ordering::Acquire), 0x0011_2233_AABB_CCDD);

        let mut buf = [0u8; 4];
        systick.read(SYSTICK_BASE + 0x14, &mut buf).unwrap();
        assert_eq!(u32::from_le_bytes(buf), 0x0011_2233);
    }

    #[test]
    fn software_interrupt_bit_posts_immediately() {
        let (pfic, systick) = systick();
        pfic.set_enabled(IRQ_SOFTWARE);
        systick
            .write(SYSTICK_BASE + CTLR_OFF, &CTLR_SWI.to_le_bytes())
            .unwrap();
        assert_eq!(pfic.pending_irq(), Some(IRQ_SOFTWARE));
    }

    #[test]
    fn counter_reloads_on_start() {
        let (_pfic, systick) = systick();
        systick.cmp.store(500, Ordering::Release);

        systick.write_ctlr(CTLR_RELOAD_CMP | CTLR_RELOAD);
        assert_eq!(systick.cnt.load(Ordering::Acquire), 500);

        systick.write_ctlr(CTLR_RELOAD);
        assert_eq!(systick.cnt.load(Ordering::Acquire), 0);
    }

    #[test]
    fn status_register_clears_on_writing_zero() {
        let (_pfic, systick) = systick();
        systick.sr.store(1, Ordering::Release);
        systick.write(SYSTICK_BASE + SR_OFF, &[0, 0, 0, 0]).unwrap();
        assert_eq!(systick.sr.load(Ordering::Acquire), 0);
    }

    #[test]
    fn expiry_sets_status_and_pends_timer_irq() {
        let (pfic, systick) = systick();
        let systick = Arc::new(systick);
        let handle = systick.spawn();

        pfic.set_enabled(IRQ_SYSTICK);
        // 10 ms worth of timer ticks.
        let ticks = (SYSTICK_FREQ_HZ / 1000) * 10;
        systick
            .write(SYSTICK_BASE + CMP_OFF, &(ticks as u32).to_le_bytes())
            .unwrap();
        systick
            .write(
                SYSTICK_BASE + CTLR_OFF,
                &(CTLR_ENABLE | CTLR_IRQ_ENABLE).to_le_bytes(),
            )
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_millis(500);
        while pfic.pending_irq() != Some(IRQ_SYSTICK) {
            assert!(std::time::Instant::now() < deadline, "timer IRQ never fired");
            std::thread::sleep(Duration::from_millis(1));
        }

        let mut buf = [0u8; 4];
        systick.read(SYSTICK_BASE + SR_OFF, &mut buf).unwrap();
        assert_eq!(u32::from_le_bytes(buf) & 1, 1);

        systick.shutdown();
        handle.join().unwrap();
    }
}
