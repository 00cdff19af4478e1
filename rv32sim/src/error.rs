use crate::loader::LoaderError;

/// The overarching error type which contains all possible errors as variants.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A bus access could not be completed.
    #[error("A bus access failed")]
    Bus(#[from] BusError),
    /// A program image could not be loaded.
    #[error("A program image could not be loaded")]
    Loader(#[from] LoaderError),
    /// A built-in self test failed.
    #[error("self test `{name}` failed: {details}")]
    SelfTest {
        /// Name of the failing test program.
        name: &'static str,
        /// What went wrong.
        details: String,
    },
}

/// Errors produced by the device bus and the devices behind it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// No attached device claims the address.
    #[error("no device maps address {address:#010x}")]
    Unmapped {
        /// The faulting address.
        address: u32,
    },
    /// The device exists but its attributes forbid reading.
    #[error("device {name} is not readable")]
    NotReadable {
        /// Name of the device.
        name: &'static str,
    },
    /// The device exists but its attributes forbid writing.
    #[error("device {name} is not writable")]
    NotWritable {
        /// Name of the device.
        name: &'static str,
    },
    /// The address falls into a device window but not onto a register the
    /// device implements.
    #[error("address {address:#010x} does not hit a register of device {name}")]
    BadOffset {
        /// Name of the device.
        name: &'static str,
        /// The faulting address.
        address: u32,
    },
    /// The access width is not one of the supported widths 1, 2 or 4.
    #[error("unsupported access width {width} at {address:#010x}")]
    Width {
        /// The faulting address.
        address: u32,
        /// The requested width in bytes.
        width: usize,
    },
    /// The device does not accept host-loaded images.
    #[error("device {name} cannot be loaded with a host image")]
    NotLoadable {
        /// Name of the device.
        name: &'static str,
    },
}
