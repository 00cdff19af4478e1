//! RSP packet framing.
//!
//! Packets travel as `$<payload>#<checksum>` where the checksum is the low
//! byte of the sum of the on-wire payload bytes, sent as two lowercase hex
//! digits. Inside the payload the characters `$`, `#`, `{` and `*` are
//! escaped as `{` followed by the character XORed with 0x20; the escaping
//! and the checksum apply symmetrically in both directions.

use std::io::{Read, Write};

use crate::GdbServerError;

/// Advertised maximum packet size.
pub const PACKET_SIZE: usize = 4096;

/// The single byte GDB sends to interrupt a running program (Ctrl-C).
pub const PAUSE_BYTE: u8 = 0x03;

const ESCAPE: u8 = b'{';
const ESCAPED: [u8; 4] = [b'$', b'#', b'{', b'*'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Invalid,
    Normal,
    Escape,
    Checksum0,
    Checksum1,
}

/// One framed RSP connection over a byte stream.
///
/// Reading handles acknowledgement: a packet that checks out is answered
/// with `+`, a corrupted one with `-` and then skipped. Writing appends the
/// checksum and waits for the peer's acknowledgement byte.
pub struct Connection<S> {
    stream: S,
    buf: [u8; 1024],
    /// Unconsumed tail of the receive buffer.
    start: usize,
    end: usize,
    debug: bool,
}

impl<S: Read + Write> Connection<S> {
    pub fn new(stream: S, debug: bool) -> Self {
        Self {
            stream,
            buf: [0; 1024],
            start: 0,
            end: 0,
            debug,
        }
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    fn next_byte(&mut self) -> Result<u8, GdbServerError> {
        if self.start == self.end {
            let read = self.stream.read(&mut self.buf)?;
            if read == 0 {
                return Err(GdbServerError::ConnectionClosed);
            }
            self.start = 0;
            self.end = read;
        }
        let byte = self.buf[self.start];
        self.start += 1;
        Ok(byte)
    }

    /// Read the next correctly-checksummed packet and return its unescaped
    /// payload. Corrupted packets are NAKed and skipped rather than
    /// dropping the connection.
    pub fn read_packet(&mut self) -> Result<Vec<u8>, GdbServerError> {
        loop {
            let mut state = State::Invalid;
            let mut payload = Vec::new();
            let mut wire_sum = 0u8;
            let mut checksum = [0u8; 2];

            loop {
                let byte = self.next_byte()?;
                match state {
                    State::Invalid => {
                        // Everything before the packet start is ack noise.
                        if byte == b'$' {
                            state = State::Normal;
                        }
                    }
                    State::Normal => match byte {
                        b'#' => state = State::Checksum0,
                        ESCAPE => {
                            wire_sum = wire_sum.wrapping_add(byte);
                            state = State::Escape;
                        }
                        _ => {
                            if payload.len() >= PACKET_SIZE {
                                return Err(GdbServerError::PacketTooLarge);
                            }
                            wire_sum = wire_sum.wrapping_add(byte);
                            payload.push(byte);
                        }
                    },
                    State::Escape => {
                        if payload.len() >= PACKET_SIZE {
                            return Err(GdbServerError::PacketTooLarge);
                        }
                        wire_sum = wire_sum.wrapping_add(byte);
                        payload.push(byte ^ 0x20);
                        state = State::Normal;
                    }
                    State::Checksum0 => {
                        checksum[0] = byte;
                        state = State::Checksum1;
                    }
                    State::Checksum1 => {
                        checksum[1] = byte;
                        break;
                    }
                }
            }

            let claimed = hex::decode(checksum)
                .ok()
                .and_then(|bytes| bytes.first().copied());
            if claimed == Some(wire_sum) {
                if self.debug {
                    tracing::debug!("<-${}", String::from_utf8_lossy(&payload));
                }
                self.stream.write_all(b"+")?;
                return Ok(payload);
            }

            tracing::warn!(
                "checksum mismatch on {:?}, dropping packet",
                String::from_utf8_lossy(&payload)
            );
            self.stream.write_all(b"-")?;
        }
    }

    /// Frame and send `payload`, then wait for the acknowledgement byte.
    ///
    /// TCP is trusted: a `-` is not retransmitted, because a reliable
    /// transport delivering a corrupted packet means the packet itself was
    /// built wrong and a resend would fare no better.
    pub fn write_packet(&mut self, payload: &[u8]) -> Result<(), GdbServerError> {
        let mut frame = Vec::with_capacity(payload.len() + 4);
        frame.push(b'$');
        let mut wire_sum = 0u8;
        for &byte in payload {
            if ESCAPED.contains(&byte) {
                frame.push(ESCAPE);
                frame.push(byte ^ 0x20);
                wire_sum = wire_sum.wrapping_add(ESCAPE);
                wire_sum = wire_sum.wrapping_add(byte ^ 0x20);
            } else {
                frame.push(byte);
                wire_sum = wire_sum.wrapping_add(byte);
            }
        }
        frame.push(b'#');
        frame.extend_from_slice(format!("{wire_sum:02x}").as_bytes());
        self.stream.write_all(&frame)?;

        if self.debug {
            tracing::debug!("->${}", String::from_utf8_lossy(payload));
        }

        self.next_byte()?;
        Ok(())
    }
}
