use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::device::{AddressRange, Device};
use crate::error::BusError;

/// Base address of the LCD control register window.
pub const LCD_BASE: u32 = 0xA000_0000;
/// Base address of the pixel framebuffer.
pub const LCD_FRAMEBUFFER_BASE: u32 = 0xA100_0000;

const CTRL_OFF: u32 = 0;
const MOUSEX_OFF: u32 = 4;
const MOUSEY_OFF: u32 = 8;
const MOUSE_ST_OFF: u32 = 12;

const CTRL_FLUSH: u32 = 1 << 0;

const BYTES_PER_PIXEL: u32 = 4;

/// Host side of the display: receives completed frames.
///
/// The simulator core stays free of GUI concerns; whatever event loop the
/// host runs implements this trait and calls [`Lcd::set_mouse_position`] /
/// [`Lcd::set_mouse_pressed`] to push input back into the register window.
pub trait FrameSink: Send {
    /// Called on the display-pump thread with the current pixel contents
    /// (ARGB8888, row-major) whenever the guest requests a flush.
    fn present(&mut self, width: u32, height: u32, pixels: &[u8]);
}

/// A [`FrameSink`] that discards frames but counts them, for tests and
/// headless runs.
#[derive(Default)]
pub struct HeadlessSink {
    frames: Arc<AtomicUsize>,
}

impl HeadlessSink {
    /// Shared counter of frames presented so far.
    pub fn frame_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.frames)
    }
}

impl FrameSink for HeadlessSink {
    fn present(&mut self, _width: u32, _height: u32, _pixels: &[u8]) {
        self.frames.fetch_add(1, Ordering::AcqRel);
    }
}

/// LCD control window plus pixel framebuffer.
///
/// The guest writes pixels into the framebuffer window and sets the flush
/// bit in CTRL to publish a frame; the display-pump thread then hands the
/// pixel buffer to the attached [`FrameSink`]. Mouse state flows the other
/// way: the host event loop stores it and the guest polls the registers.
pub struct Lcd {
    width: u32,
    height: u32,
    ctrl: AtomicU32,
    mousex: AtomicU32,
    mousey: AtomicU32,
    mouse_st: AtomicU32,
    framebuffer: Mutex<Box<[u8]>>,
    flush_tx: Mutex<Option<Sender<()>>>,
}

impl Lcd {
    pub fn new(width: u32, height: u32) -> Self {
        let size = (width * height * BYTES_PER_PIXEL) as usize;
        Self {
            width,
            height,
            ctrl: AtomicU32::new(0),
            mousex: AtomicU32::new(0),
            mousey: AtomicU32::new(0),
            mouse_st: AtomicU32::new(0),
            framebuffer: Mutex::new(vec![0; size].into_boxed_slice()),
            flush_tx: Mutex::new(None),
        }
    }

    /// Start the display-pump thread feeding `sink`.
    ///
    /// The thread wakes on every guest flush request and exits once
    /// [`Lcd::shutdown`] drops the event channel.
    pub fn spawn_display(self: &Arc<Self>, mut sink: Box<dyn FrameSink>) -> JoinHandle<()> {
        let (tx, rx) = mpsc::channel();
        *self.flush_tx.lock() = Some(tx);

        let lcd = Arc::clone(self);
        std::thread::spawn(move || {
            while rx.recv().is_ok() {
                let pixels = lcd.framebuffer.lock();
                sink.present(lcd.width, lcd.height, &pixels);
            }
        })
    }

    /// Tear down the display pump; the thread exits after the last queued
    /// flush has been presented.
    pub fn shutdown(&self) {
        self.flush_tx.lock().take();
    }

    /// Record the host mouse position (called from the display side).
    pub fn set_mouse_position(&self, x: u32, y: u32) {
        self.mousex.store(x, Ordering::Release);
        self.mousey.store(y, Ordering::Release);
    }

    /// Record the host mouse button state (called from the display side).
    pub fn set_mouse_pressed(&self, pressed: bool) {
        self.mouse_st.store(pressed as u32, Ordering::Release);
    }

    fn post_flush(&self) {
        if let Some(tx) = &*self.flush_tx.lock() {
            let _ = tx.send(());
        }
    }
}

impl Device for Lcd {
    fn name(&self) -> &'static str {
        "lcd"
    }

    fn range(&self) -> AddressRange {
        AddressRange {
            base: LCD_BASE,
            end: LCD_FRAMEBUFFER_BASE + self.width * self.height * BYTES_PER_PIXEL,
        }
    }

    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), BusError> {
        let value = match addr.wrapping_sub(LCD_BASE) {
            CTRL_OFF => self.ctrl.load(Ordering::Acquire),
            MOUSEX_OFF => self.mousex.load(Ordering::Acquire),
            MOUSEY_OFF => self.mousey.load(Ordering::Acquire),
            MOUSE_ST_OFF => self.mouse_st.load(Ordering::Acquire),
            _ => return Err(BusError::BadOffset { name: "lcd", address: addr }),
        };
        buf.copy_from_slice(&value.to_le_bytes()[..buf.len()]);
        Ok(())
    }

    fn write(&self, addr: u32, data: &[u8]) -> Result<(), BusError> {
        if addr >= LCD_FRAMEBUFFER_BASE {
            let offset = (addr - LCD_FRAMEBUFFER_BASE) as usize;
            let mut pixels = self.framebuffer.lock();
            let end = offset + data.len();
            let dst = pixels
                .get_mut(offset..end)
                .ok_or(BusError::BadOffset { name: "lcd", address: addr })?;
            dst.copy_from_slice(data);
            return Ok(());
        }

        match addr - LCD_BASE {
            CTRL_OFF => {
                let mut bytes = [0u8; 4];
                bytes[..data.len()].copy_from_slice(data);
                let value = u32::from_le_bytes(bytes);
                self.ctrl.store(value, Ordering::Release);
                if value & CTRL_FLUSH != 0 {
                    self.post_flush();
                }
            }
            _ => return Err(BusError::BadOffset { name: "lcd", address: addr }),
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn flush_reaches_the_sink() {
        let lcd = Arc::new(Lcd::new(4, 4));
        let sink = HeadlessSink::default();
        let frames = sink.frame_counter();
        let handle = lcd.spawn_display(Box::new(sink));

        lcd.write(LCD_FRAMEBUFFER_BASE, &[0xFF, 0x00, 0x00, 0xFF])
            .unwrap();
        lcd.write(LCD_BASE, &CTRL_FLUSH.to_le_bytes()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(1);
        while frames.load(Ordering::Acquire) == 0 {
            assert!(Instant::now() < deadline, "flush never presented");
            std::thread::sleep(Duration::from_millis(1));
        }

        lcd.shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn mouse_state_is_guest_visible() {
        let lcd = Lcd::new(4, 4);
        lcd.set_mouse_position(17, 23);
        lcd.set_mouse_pressed(true);

        let mut buf = [0u8; 4];
        lcd.read(LCD_BASE + MOUSEX_OFF, &mut buf).unwrap();
        assert_eq!(u32::from_le_bytes(buf), 17);
        lcd.read(LCD_BASE + MOUSEY_OFF, &mut buf).unwrap();
        assert_eq!(u32::from_le_bytes(buf), 23);
        lcd.read(LCD_BASE + MOUSE_ST_OFF, &mut buf).unwrap();
        assert_eq!(u32::from_le_bytes(buf), 1);
    }

    #[test]
    fn framebuffer_is_not_guest_readable() {
        let lcd = Lcd::new(4, 4);
        let mut buf = [0u8; 4];
        assert!(lcd.read(LCD_FRAMEBUFFER_BASE, &mut buf).is_err());
    }
}
