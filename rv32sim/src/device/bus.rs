use std::sync::Arc;

use crate::device::{AddressRange, Device};
use crate::error::BusError;

/// Address-range dispatch to the attached devices.
///
/// Devices are kept in the order they were attached, newest first, and the
/// first device whose range contains the address wins. A one-entry cache per
/// direction amortizes the scan; a hit is only valid while the address stays
/// inside the cached range, and any miss falls back to the full scan.
pub struct Bus {
    devices: Vec<Arc<dyn Device>>,
    read_cache: Option<(AddressRange, Arc<dyn Device>)>,
    write_cache: Option<(AddressRange, Arc<dyn Device>)>,
}

impl Bus {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            read_cache: None,
            write_cache: None,
        }
    }

    /// Attach a device at the head of the dispatch order.
    pub fn attach(&mut self, device: Arc<dyn Device>) {
        self.devices.insert(0, device);
    }

    /// Drop both direction caches. Called on hart reset.
    pub fn invalidate_cache(&mut self) {
        self.read_cache = None;
        self.write_cache = None;
    }

    fn find(&self, addr: u32) -> Option<&Arc<dyn Device>> {
        self.devices.iter().find(|dev| dev.range().contains(addr))
    }

    fn check_width(addr: u32, width: usize) -> Result<(), BusError> {
        match width {
            1 | 2 | 4 => Ok(()),
            _ => Err(BusError::Width { address: addr, width }),
        }
    }

    /// Read `buf.len()` bytes at `addr` from whichever device claims it.
    pub fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), BusError> {
        Self::check_width(addr, buf.len())?;

        if let Some((range, dev)) = &self.read_cache {
            if range.contains(addr) {
                return dev.read(addr, buf);
            }
        }

        let device = self
            .find(addr)
            .ok_or(BusError::Unmapped { address: addr })?
            .clone();
        self.read_cache = Some((device.range(), device.clone()));
        device.read(addr, buf)
    }

    /// Write `data` at `addr` to whichever device claims it.
    pub fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), BusError> {
        Self::check_width(addr, data.len())?;

        if let Some((range, dev)) = &self.write_cache {
            if range.contains(addr) {
                return dev.write(addr, data);
            }
        }

        let device = self
            .find(addr)
            .ok_or(BusError::Unmapped { address: addr })?
            .clone();
        self.write_cache = Some((device.range(), device.clone()));
        device.write(addr, data)
    }

    /// Host-privileged image load. No caching, no width restriction.
    pub fn load(&self, addr: u32, data: &[u8]) -> Result<(), BusError> {
        let device = self.find(addr).ok_or(BusError::Unmapped { address: addr })?;
        device.load(addr, data)
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}
