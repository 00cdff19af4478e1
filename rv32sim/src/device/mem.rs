use parking_lot::RwLock;

use crate::device::{AddressRange, Device};
use crate::error::BusError;

/// The memory may be read by the guest.
pub const MEM_ATTR_READABLE: u32 = 1 << 0;
/// The memory may be written by the guest.
pub const MEM_ATTR_WRITABLE: u32 = 1 << 1;

/// A plain byte-array device with readable/writable attribute flags.
///
/// Backs both flash and RAM; flash is created without
/// [`MEM_ATTR_WRITABLE`] so guest stores into it fail on the bus while the
/// host-side [`Device::load`] path still works.
pub struct Memory {
    name: &'static str,
    attr: u32,
    range: AddressRange,
    bytes: RwLock<Box<[u8]>>,
}

impl Memory {
    pub fn new(name: &'static str, attr: u32, base: u32, size: u32) -> Self {
        Self {
            name,
            attr,
            range: AddressRange::new(base, size),
            bytes: RwLock::new(vec![0; size as usize].into_boxed_slice()),
        }
    }

    /// Fetch one aligned 32-bit word, the hot path for instruction fetch.
    ///
    /// Returns `None` when the address is outside the window; alignment is
    /// the caller's concern (the PC is kept 4-byte aligned).
    pub fn fetch_word(&self, addr: u32) -> Option<u32> {
        if !self.range.contains(addr) {
            return None;
        }
        let offset = (addr - self.range.base) as usize;
        let bytes = self.bytes.read();
        let word = bytes.get(offset..offset + 4)?;
        Some(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
    }

    pub fn range(&self) -> AddressRange {
        self.range
    }
}

impl Device for Memory {
    fn name(&self) -> &'static str {
        self.name
    }

    fn range(&self) -> AddressRange {
        self.range
    }

    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), BusError> {
        if self.attr & MEM_ATTR_READABLE == 0 {
            return Err(BusError::NotReadable { name: self.name });
        }
        let offset = (addr - self.range.base) as usize;
        let bytes = self.bytes.read();
        let end = offset + buf.len();
        let src = bytes
            .get(offset..end)
            .ok_or(BusError::BadOffset { name: self.name, address: addr })?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write(&self, addr: u32, data: &[u8]) -> Result<(), BusError> {
        if self.attr & MEM_ATTR_WRITABLE == 0 {
            return Err(BusError::NotWritable { name: self.name });
        }
        let offset = (addr - self.range.base) as usize;
        let mut bytes = self.bytes.write();
        let end = offset + data.len();
        let dst = bytes
            .get_mut(offset..end)
            .ok_or(BusError::BadOffset { name: self.name, address: addr })?;
        dst.copy_from_slice(data);
        Ok(())
    }

    fn load(&self, addr: u32, data: &[u8]) -> Result<(), BusError> {
        let offset = (addr - self.range.base) as usize;
        let mut bytes = self.bytes.write();
        let end = offset + data.len();
        let dst = bytes
            .get_mut(offset..end)
            .ok_or(BusError::BadOffset { name: self.name, address: addr })?;
        dst.copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn read_only_memory_rejects_guest_writes() {
        let flash = Memory::new("flash", MEM_ATTR_READABLE, 0, 0x1000);
        assert_eq!(
            flash.write(0, &[1, 2, 3, 4]),
            Err(BusError::NotWritable { name: "flash" })
        );
        // The host load path is exempt from the attribute check.
        flash.load(0, &[1, 2, 3, 4]).unwrap();
        let mut buf = [0; 4];
        flash.read(0, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn fetch_word_is_bounds_checked() {
        let flash = Memory::new("flash", MEM_ATTR_READABLE, 0x100, 0x10);
        flash.load(0x100, &0x1234_5678u32.to_le_bytes()).unwrap();
        assert_eq!(flash.fetch_word(0x100), Some(0x1234_5678));
        assert_eq!(flash.fetch_word(0x0FC), None);
        assert_eq!(flash.fetch_word(0x110), None);
        assert_eq!(flash.fetch_word(0x10E), None);
    }
}
