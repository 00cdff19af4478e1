//! Parser for GDB packets.
//!
//! GDB packets have the format `$packet-data#checksum`. This parser is
//! focused on the packet-data, after the framing layer has unescaped it and
//! verified the checksum.

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::char;
use nom::combinator::{map, map_res, rest, value};
use nom::sequence::preceded;
use nom::IResult;

/// A decoded command packet.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Packet {
    /// Packet `?`
    HaltReason,
    /// Packet `g`
    ReadRegisters,
    /// Packet `p`
    ReadRegister(u32),
    /// Packet `m`
    ReadMemory { address: u32, length: u32 },
    /// Packet `M`
    WriteMemory { address: u32, length: u32, data: Vec<u8> },
    /// Packet `s`
    SingleStep,
    /// Packet `c`
    Continue,
    /// Packet `Z`
    InsertBreakpoint { kind: BreakpointType, address: u32 },
    /// Packet `z`
    RemoveBreakpoint { kind: BreakpointType, address: u32 },
    /// Packet `k`
    Kill,
    /// Packet `q`
    Query(QueryPacket),
    /// Anything else answers with the empty packet.
    Unsupported,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BreakpointType {
    Software,
    Hardware,
    WriteWatchpoint,
    ReadWatchpoint,
    AccessWatchpoint,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum QueryPacket {
    /// `qSupported`: feature negotiation.
    Supported,
    /// `qAttached`
    Attached,
    /// `qRcmd,<hex>`: a monitor command, already hex-decoded.
    Command(Vec<u8>),
    /// Any other query answers with the empty packet.
    Other,
}

/// Decode a command packet. Unknown commands map to
/// [`Packet::Unsupported`] so the dispatcher can answer them with the empty
/// reply the protocol asks for.
pub fn parse_packet(input: &[u8]) -> Packet {
    let result = alt((
        halt_reason,
        read_registers,
        read_register,
        read_memory,
        write_memory,
        single_step,
        continue_packet,
        insert_breakpoint,
        remove_breakpoint,
        kill,
        query,
    ))(input);

    match result {
        Ok((_remaining, packet)) => packet,
        Err(_) => Packet::Unsupported,
    }
}

fn is_hex_digit(byte: u8) -> bool {
    byte.is_ascii_hexdigit()
}

fn hex_u32(input: &[u8]) -> IResult<&[u8], u32> {
    map_res(take_while1(is_hex_digit), |digits: &[u8]| -> Result<u32, ()> {
        let digits = std::str::from_utf8(digits).map_err(|_| ())?;
        u32::from_str_radix(digits, 16).map_err(|_| ())
    })(input)
}

fn hex_bytes(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    map_res(rest, hex::decode)(input)
}

fn halt_reason(input: &[u8]) -> IResult<&[u8], Packet> {
    value(Packet::HaltReason, char('?'))(input)
}

fn read_registers(input: &[u8]) -> IResult<&[u8], Packet> {
    value(Packet::ReadRegisters, char('g'))(input)
}

fn read_register(input: &[u8]) -> IResult<&[u8], Packet> {
    let (input, _) = char('p')(input)?;
    let (input, number) = hex_u32(input)?;

    Ok((input, Packet::ReadRegister(number)))
}

fn read_memory(input: &[u8]) -> IResult<&[u8], Packet> {
    let (input, _) = char('m')(input)?;
    let (input, address) = hex_u32(input)?;
    let (input, _) = char(',')(input)?;
    let (input, length) = hex_u32(input)?;

    Ok((input, Packet::ReadMemory { address, length }))
}

fn write_memory(input: &[u8]) -> IResult<&[u8], Packet> {
    let (input, _) = char('M')(input)?;
    let (input, address) = hex_u32(input)?;
    let (input, _) = char(',')(input)?;
    let (input, length) = hex_u32(input)?;
    let (input, _) = char(':')(input)?;
    let (input, data) = hex_bytes(input)?;

    Ok((input, Packet::WriteMemory { address, length, data }))
}

fn single_step(input: &[u8]) -> IResult<&[u8], Packet> {
    value(Packet::SingleStep, char('s'))(input)
}

fn continue_packet(input: &[u8]) -> IResult<&[u8], Packet> {
    value(Packet::Continue, char('c'))(input)
}

fn breakpoint_type(input: &[u8]) -> IResult<&[u8], BreakpointType> {
    alt((
        value(BreakpointType::Software, char('0')),
        value(BreakpointType::Hardware, char('1')),
        value(BreakpointType::WriteWatchpoint, char('2')),
        value(BreakpointType::ReadWatchpoint, char('3')),
        value(BreakpointType::AccessWatchpoint, char('4')),
    ))(input)
}

fn insert_breakpoint(input: &[u8]) -> IResult<&[u8], Packet> {
    let (input, _) = char('Z')(input)?;
    let (input, kind) = breakpoint_type(input)?;
    let (input, _) = char(',')(input)?;
    let (input, address) = hex_u32(input)?;
    let (input, _) = char(',')(input)?;
    let (input, _kind) = hex_u32(input)?;

    Ok((input, Packet::InsertBreakpoint { kind, address }))
}

fn remove_breakpoint(input: &[u8]) -> IResult<&[u8], Packet> {
    let (input, _) = char('z')(input)?;
    let (input, kind) = breakpoint_type(input)?;
    let (input, _) = char(',')(input)?;
    let (input, address) = hex_u32(input)?;
    let (input, _) = char(',')(input)?;
    let (input, _kind) = hex_u32(input)?;

    Ok((input, Packet::RemoveBreakpoint { kind, address }))
}

fn kill(input: &[u8]) -> IResult<&[u8], Packet> {
    value(Packet::Kill, char('k'))(input)
}

fn query(input: &[u8]) -> IResult<&[u8], Packet> {
    let (input, _) = char('q')(input)?;
    let (input, packet) = alt((
        map(preceded(tag("Supported"), rest), |_| QueryPacket::Supported),
        map(preceded(tag("Attached"), rest), |_| QueryPacket::Attached),
        map(preceded(tag("Rcmd,"), hex_bytes), QueryPacket::Command),
        map(rest, |_| QueryPacket::Other),
    ))(input)?;

    Ok((input, Packet::Query(packet)))
}
