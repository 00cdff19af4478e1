//! A GDB Remote-Serial-Protocol stub for the rv32sim core.
//!
//! The server listens on TCP, frames packets per RSP ([`packet`]), decodes
//! commands ([`parser`]) and drives the hart ([`GdbServer`]): register and
//! memory access, single-step and continue, breakpoints, and the
//! asynchronous Ctrl-C pause that must be able to halt a running program at
//! any moment.

pub mod packet;
pub mod parser;
mod stub;

pub use stub::GdbServer;

/// Errors of the GDB server itself; protocol-level problems are answered
/// on the wire (`-`, `E01` or the empty packet) instead.
#[derive(thiserror::Error, Debug)]
pub enum GdbServerError {
    /// Socket I/O failed.
    #[error("socket I/O failed")]
    Io(#[from] std::io::Error),
    /// The client went away; the server returns to accepting.
    #[error("the client closed the connection")]
    ConnectionClosed,
    /// An incoming packet exceeded the advertised maximum size.
    #[error("packet exceeds the maximum size")]
    PacketTooLarge,
    /// The debugger-pause thread died; the connection is unusable.
    #[error("the pause thread panicked")]
    PauseThread,
}
