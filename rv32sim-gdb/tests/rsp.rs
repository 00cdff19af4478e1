//! End-to-end RSP sessions against a live server over TCP.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use rv32sim::asm;
use rv32sim::loader;
use rv32sim::machine::{Machine, MachineConfig};
use rv32sim_gdb::GdbServer;

fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

fn send_packet(stream: &mut TcpStream, payload: &[u8]) {
    let mut frame = vec![b'$'];
    frame.extend_from_slice(payload);
    frame.extend_from_slice(format!("#{:02x}", checksum(payload)).as_bytes());
    stream.write_all(&frame).unwrap();

    let mut ack = [0u8; 1];
    stream.read_exact(&mut ack).unwrap();
    assert_eq!(ack[0], b'+', "packet {payload:?} was not acknowledged");
}

fn recv_packet(stream: &mut TcpStream) -> Vec<u8> {
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).unwrap();
        if byte[0] == b'$' {
            break;
        }
    }
    let mut payload = Vec::new();
    loop {
        stream.read_exact(&mut byte).unwrap();
        if byte[0] == b'#' {
            break;
        }
        payload.push(byte[0]);
    }
    let mut check = [0u8; 2];
    stream.read_exact(&mut check).unwrap();
    assert_eq!(checksum(&payload), u8::from_str_radix(std::str::from_utf8(&check).unwrap(), 16).unwrap());
    stream.write_all(b"+").unwrap();
    payload
}

fn roundtrip(stream: &mut TcpStream, payload: &[u8]) -> Vec<u8> {
    send_packet(stream, payload);
    recv_packet(stream)
}

/// Boot a machine with `words` in flash and a GDB server on an ephemeral
/// port; returns the address to connect to.
fn start_server(words: &[u32]) -> SocketAddr {
    let mut machine = Machine::new(MachineConfig {
        flash_size: 0x1000,
        ram_size: 0x1000,
        ..MachineConfig::default()
    });
    let image: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    loader::load_binary(machine.hart_mut(), &image).unwrap();

    let server = GdbServer::new(0, false).unwrap();
    let addr = server.local_addr().unwrap();
    std::thread::spawn(move || {
        let _ = server.run(machine.hart_mut());
    });
    addr
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    stream
}

#[test]
fn breakpoint_session() {
    let addr = start_server(&[
        asm::addi(1, 0, 5),
        asm::addi(2, 0, 7),
        asm::add(3, 1, 2),
        asm::ebreak(),
    ]);
    let mut stream = connect(addr);

    let supported = roundtrip(&mut stream, b"qSupported:xmlRegisters=riscv");
    assert!(supported.starts_with(b"PacketSize="));
    assert_eq!(roundtrip(&mut stream, b"qAttached"), b"1");
    assert_eq!(roundtrip(&mut stream, b"?"), b"S05");
    // Unknown commands answer with the empty packet.
    assert_eq!(roundtrip(&mut stream, b"vMustReplyEmpty"), b"");

    // Break on the `add`, then continue into it.
    assert_eq!(roundtrip(&mut stream, b"Z0,8,4"), b"OK");
    assert_eq!(roundtrip(&mut stream, b"c"), b"S05");

    // Registers reflect the two retired `addi`s; x3 is still untouched.
    let regs = roundtrip(&mut stream, b"g");
    assert_eq!(regs.len(), 32 * 8);
    assert_eq!(&regs[8..16], b"05000000");
    assert_eq!(&regs[16..24], b"07000000");
    assert_eq!(&regs[24..32], b"00000000");

    // The PC (register 32) parks on the breakpoint address.
    assert_eq!(roundtrip(&mut stream, b"p20"), b"08000000");
    assert_eq!(roundtrip(&mut stream, b"p1"), b"05000000");
    assert_eq!(roundtrip(&mut stream, b"p63"), b"E01");

    // Flash reads back the first instruction's encoding.
    let first = asm::addi(1, 0, 5).to_le_bytes();
    assert_eq!(roundtrip(&mut stream, b"m0,4"), hex::encode(first).into_bytes());

    // Memory write/read round trip through RAM.
    assert_eq!(roundtrip(&mut stream, b"M20000000,4:78563412"), b"OK");
    assert_eq!(roundtrip(&mut stream, b"m20000000,4"), b"78563412");

    // Breakpoint removal: the second attempt reports not-found.
    assert_eq!(roundtrip(&mut stream, b"z0,8,4"), b"OK");
    assert_eq!(roundtrip(&mut stream, b"z0,8,4"), b"E01");

    // Step over the add, then the PC sits on the ebreak.
    assert_eq!(roundtrip(&mut stream, b"s"), b"S05");
    assert_eq!(roundtrip(&mut stream, b"p20"), b"0c000000");
    let regs = roundtrip(&mut stream, b"g");
    assert_eq!(&regs[24..32], b"0c000000"); // x3 = 5 + 7

    // Monitor reset zeroes the machine state.
    assert_eq!(roundtrip(&mut stream, b"qRcmd,7265736574"), b"OK");
    assert_eq!(roundtrip(&mut stream, b"p20"), b"00000000");

    send_packet(&mut stream, b"k");
}

#[test]
fn async_pause_interrupts_a_running_program() {
    // An endless loop: jal x0, 0.
    let addr = start_server(&[asm::jal(0, 0)]);
    let mut stream = connect(addr);

    assert_eq!(roundtrip(&mut stream, b"qAttached"), b"1");

    // Continue, give the hart some time to spin, then send the raw
    // interrupt byte (GDB's Ctrl-C). It is not a framed packet.
    send_packet(&mut stream, b"c");
    std::thread::sleep(Duration::from_millis(50));
    stream.write_all(&[0x03]).unwrap();

    // The stop reply must arrive within one poll interval.
    stream
        .set_read_timeout(Some(Duration::from_millis(2000)))
        .unwrap();
    assert_eq!(recv_packet(&mut stream), b"S05");

    // The session is intact afterwards.
    let regs = roundtrip(&mut stream, b"g");
    assert_eq!(regs.len(), 32 * 8);

    send_packet(&mut stream, b"k");
}
