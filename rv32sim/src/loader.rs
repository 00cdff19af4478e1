//! Program image loading: raw binaries and ELF32 executables.

use std::path::Path;

use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;

use crate::core::Hart;
use crate::error::BusError;

/// Errors raised while loading a program image.
#[derive(thiserror::Error, Debug)]
pub enum LoaderError {
    /// The image file could not be read.
    #[error("could not read the program image")]
    Io(#[from] std::io::Error),
    /// The ELF container could not be parsed.
    #[error("could not parse the ELF image")]
    Elf(#[from] goblin::error::Error),
    /// A segment pointed outside the file.
    #[error("segment at {offset:#x}+{size:#x} lies outside the image")]
    BadSegment {
        /// File offset of the segment.
        offset: u64,
        /// Size of the segment in the file.
        size: u64,
    },
    /// The target address range is not backed by a loadable device.
    #[error("image does not fit the memory map")]
    Bus(#[from] BusError),
    /// No flash device is attached to copy a raw binary into.
    #[error("no flash attached")]
    NoFlash,
}

/// Load `path` into the machine, auto-detecting the format: files starting
/// with the `\x7fELF` magic load as ELF32, everything else is copied
/// verbatim into flash.
pub fn load_file(hart: &mut Hart, path: &Path) -> Result<(), LoaderError> {
    let image = std::fs::read(path)?;
    if image.starts_with(b"\x7fELF") {
        load_elf(hart, &image)
    } else {
        load_binary(hart, &image)
    }
}

/// Copy a raw binary into flash starting at offset 0.
pub fn load_binary(hart: &mut Hart, image: &[u8]) -> Result<(), LoaderError> {
    let base = hart.flash_range().ok_or(LoaderError::NoFlash)?.base;
    hart.load_image(base, image)?;
    tracing::debug!(bytes = image.len(), "loaded raw binary into flash");
    Ok(())
}

/// Copy every `PT_LOAD` segment of an ELF32 image to its physical address.
pub fn load_elf(hart: &mut Hart, image: &[u8]) -> Result<(), LoaderError> {
    let elf = Elf::parse(image)?;
    for header in &elf.program_headers {
        if header.p_type != PT_LOAD || header.p_filesz == 0 {
            continue;
        }
        let start = header.p_offset as usize;
        let end = start + header.p_filesz as usize;
        let segment = image
            .get(start..end)
            .ok_or(LoaderError::BadSegment { offset: header.p_offset, size: header.p_filesz })?;
        hart.load_image(header.p_paddr as u32, segment)?;
        tracing::debug!("loaded {} bytes at {:#010x}", segment.len(), header.p_paddr);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::{Memory, MEM_ATTR_READABLE};
    use std::sync::Arc;

    #[test]
    fn raw_binaries_land_at_flash_offset_zero() {
        let mut hart = Hart::new();
        let flash = Arc::new(Memory::new("flash", MEM_ATTR_READABLE, 0x100, 0x100));
        hart.attach_device(flash.clone());
        hart.set_flash(flash.clone());

        load_binary(&mut hart, &[0x13, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(flash.fetch_word(0x100), Some(0x0000_0013));
    }

    #[test]
    fn binary_without_flash_is_an_error() {
        let mut hart = Hart::new();
        assert!(matches!(
            load_binary(&mut hart, &[0x13]),
            Err(LoaderError::NoFlash)
        ));
    }
}
