//! Construction of a complete simulated machine.
//!
//! Owns the hart, the fixed device map and the auxiliary threads, so that
//! front ends only deal with one handle.

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::core::Hart;
use crate::device::{
    Device, FrameSink, Lcd, Memory, Pfic, Systick, Usart, MEM_ATTR_READABLE, MEM_ATTR_WRITABLE,
};
use crate::loader::{self, LoaderError};

/// Default flash window: 16 MiB at address zero.
pub const DEFAULT_FLASH_BASE: u32 = 0;
pub const DEFAULT_FLASH_SIZE: u32 = 16 * 1024 * 1024;
/// Default RAM window: 16 MiB at 0x2000_0000.
pub const DEFAULT_RAM_BASE: u32 = 0x2000_0000;
pub const DEFAULT_RAM_SIZE: u32 = 16 * 1024 * 1024;

const LCD_WIDTH: u32 = 320;
const LCD_HEIGHT: u32 = 240;

/// Memory-map parameters of a [`Machine`].
#[derive(Debug, Clone, Copy)]
pub struct MachineConfig {
    pub flash_base: u32,
    pub flash_size: u32,
    pub ram_base: u32,
    pub ram_size: u32,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            flash_base: DEFAULT_FLASH_BASE,
            flash_size: DEFAULT_FLASH_SIZE,
            ram_base: DEFAULT_RAM_BASE,
            ram_size: DEFAULT_RAM_SIZE,
        }
    }
}

/// A hart with the full fixed device map attached and the timer thread
/// running.
pub struct Machine {
    hart: Hart,
    flash: Arc<Memory>,
    ram: Arc<Memory>,
    pfic: Arc<Pfic>,
    systick: Arc<Systick>,
    lcd: Arc<Lcd>,
    timer_thread: Option<JoinHandle<()>>,
    display_thread: Option<JoinHandle<()>>,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Self {
        let mut hart = Hart::new();

        let ram = Arc::new(Memory::new(
            "ram",
            MEM_ATTR_READABLE | MEM_ATTR_WRITABLE,
            config.ram_base,
            config.ram_size,
        ));
        let flash = Arc::new(Memory::new(
            "flash",
            MEM_ATTR_READABLE,
            config.flash_base,
            config.flash_size,
        ));
        let pfic = Arc::new(Pfic::new());
        let systick = Arc::new(Systick::new(Arc::clone(&pfic)));
        let uart = Arc::new(Usart::new());
        let lcd = Arc::new(Lcd::new(LCD_WIDTH, LCD_HEIGHT));

        hart.attach_device(Arc::clone(&ram) as Arc<dyn Device>);
        hart.attach_device(Arc::clone(&flash) as Arc<dyn Device>);
        hart.attach_device(Arc::clone(&pfic) as Arc<dyn Device>);
        hart.attach_device(Arc::clone(&systick) as Arc<dyn Device>);
        hart.attach_device(uart as Arc<dyn Device>);
        hart.attach_device(Arc::clone(&lcd) as Arc<dyn Device>);
        hart.set_flash(Arc::clone(&flash));
        hart.set_pfic(Arc::clone(&pfic));
        hart.reset();

        let timer_thread = Some(systick.spawn());

        Self {
            hart,
            flash,
            ram,
            pfic,
            systick,
            lcd,
            timer_thread,
            display_thread: None,
        }
    }

    pub fn hart(&self) -> &Hart {
        &self.hart
    }

    pub fn hart_mut(&mut self) -> &mut Hart {
        &mut self.hart
    }

    pub fn flash(&self) -> &Arc<Memory> {
        &self.flash
    }

    pub fn ram(&self) -> &Arc<Memory> {
        &self.ram
    }

    pub fn pfic(&self) -> &Arc<Pfic> {
        &self.pfic
    }

    pub fn lcd(&self) -> &Arc<Lcd> {
        &self.lcd
    }

    /// Start the display pump feeding frames to `sink`.
    pub fn attach_display(&mut self, sink: Box<dyn FrameSink>) {
        self.display_thread = Some(self.lcd.spawn_display(sink));
    }

    /// Load an ELF or raw binary image.
    pub fn load_program(&mut self, path: &Path) -> Result<(), LoaderError> {
        loader::load_file(&mut self.hart, path)
    }

    /// Stop and join the auxiliary threads. Idempotent; also runs on drop.
    pub fn shutdown(&mut self) {
        self.systick.shutdown();
        if let Some(handle) = self.timer_thread.take() {
            let _ = handle.join();
        }
        self.lcd.shutdown();
        if let Some(handle) = self.display_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
