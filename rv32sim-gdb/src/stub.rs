//! The command dispatcher and the debug-server run loop.

use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rv32sim::Hart;

use crate::packet::{Connection, PACKET_SIZE, PAUSE_BYTE};
use crate::parser::{parse_packet, Packet, QueryPacket};
use crate::GdbServerError;

/// GDB numbers the PC as register 32, after the 32 general registers.
const PC_REGISTER: u32 = 32;

/// Receive timeout of the pause thread; bounds how long a halt request and
/// the thread's own shutdown can take to be noticed.
const POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// A GDB remote-debugging endpoint.
///
/// One client at a time: the server accepts, serves the session until the
/// kill command or a hangup, then re-accepts.
pub struct GdbServer {
    listener: TcpListener,
    debug: bool,
}

impl GdbServer {
    /// Bind the listening socket. `debug` enables logging of the RSP
    /// traffic.
    pub fn new(port: u16, debug: bool) -> Result<Self, GdbServerError> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        tracing::info!("GDB server listening on {}", listener.local_addr()?);
        Ok(Self { listener, debug })
    }

    /// The bound address, useful when port 0 asked for an ephemeral port.
    pub fn local_addr(&self) -> Result<SocketAddr, GdbServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients forever, serving one debug session at a time.
    pub fn run(&self, hart: &mut Hart) -> Result<(), GdbServerError> {
        loop {
            let (stream, peer) = self.listener.accept()?;
            tracing::info!(%peer, "debugger attached");
            match self.serve_client(stream, hart) {
                Ok(()) => tracing::info!("debugger detached"),
                Err(GdbServerError::ConnectionClosed) => {
                    tracing::info!("debugger connection closed")
                }
                Err(err) => tracing::warn!("debug session failed: {err}"),
            }
        }
    }

    fn serve_client(&self, stream: TcpStream, hart: &mut Hart) -> Result<(), GdbServerError> {
        let mut conn = Connection::new(stream, self.debug);
        loop {
            let payload = conn.read_packet()?;
            match parse_packet(&payload) {
                Packet::HaltReason => conn.write_packet(b"S05")?,
                Packet::ReadRegisters => read_registers(&mut conn, hart)?,
                Packet::ReadRegister(number) => read_register(&mut conn, hart, number)?,
                Packet::ReadMemory { address, length } => {
                    read_memory(&mut conn, hart, address, length)?
                }
                Packet::WriteMemory { address, length, data } => {
                    write_memory(&mut conn, hart, address, length, &data)?
                }
                Packet::SingleStep => {
                    hart.step();
                    conn.write_packet(b"S05")?;
                }
                Packet::Continue => {
                    self.continue_with_pause(&mut conn, hart)?;
                    conn.write_packet(b"S05")?;
                }
                Packet::InsertBreakpoint { address, .. } => {
                    hart.breakpoints_mut().add(address);
                    conn.write_packet(b"OK")?;
                }
                Packet::RemoveBreakpoint { address, .. } => {
                    if hart.breakpoints_mut().remove(address) {
                        conn.write_packet(b"OK")?;
                    } else {
                        conn.write_packet(b"E01")?;
                    }
                }
                Packet::Kill => return Ok(()),
                Packet::Query(query) => handle_query(&mut conn, hart, query)?,
                Packet::Unsupported => conn.write_packet(b"")?,
            }
        }
    }

    /// Run the hart while a second thread owns the socket's receive side,
    /// watching for GDB's asynchronous interrupt byte.
    ///
    /// The watcher uses a bounded receive timeout so that it also notices
    /// `thread_stop` within one poll interval once the run loop finishes on
    /// its own; it is always joined before the stop reply goes out.
    fn continue_with_pause(
        &self,
        conn: &mut Connection<TcpStream>,
        hart: &mut Hart,
    ) -> Result<(), GdbServerError> {
        let gdb_stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::new(AtomicBool::new(false));

        let mut sock = conn.stream().try_clone()?;
        sock.set_read_timeout(Some(POLL_TIMEOUT))?;

        let pause = Arc::clone(&gdb_stop);
        let stop = Arc::clone(&thread_stop);
        let watcher = std::thread::spawn(move || {
            let mut byte = [0u8; 1];
            while !stop.load(Ordering::Acquire) {
                match sock.read(&mut byte) {
                    // Hangup also halts the run; there is nobody left to
                    // report to but the hart should not spin forever.
                    Ok(0) => {
                        pause.store(true, Ordering::Release);
                        break;
                    }
                    Ok(_) if byte[0] == PAUSE_BYTE => {
                        pause.store(true, Ordering::Release);
                        break;
                    }
                    Ok(_) => {}
                    // Timeout: re-check the stop flag.
                    Err(_) => {}
                }
            }
            sock
        });

        let reason = hart.run(Some(&gdb_stop));
        tracing::debug!(?reason, "continue finished");

        thread_stop.store(true, Ordering::Release);
        let sock = watcher.join().map_err(|_| GdbServerError::PauseThread)?;
        sock.set_read_timeout(None)?;
        Ok(())
    }
}

fn hex_reg(value: u32) -> String {
    hex::encode(value.to_le_bytes())
}

fn read_registers(
    conn: &mut Connection<TcpStream>,
    hart: &mut Hart,
) -> Result<(), GdbServerError> {
    let mut response = String::with_capacity(32 * 8);
    for reg in 0..32 {
        response.push_str(&hex_reg(hart.read_reg(reg)));
    }
    conn.write_packet(response.as_bytes())
}

fn read_register(
    conn: &mut Connection<TcpStream>,
    hart: &mut Hart,
    number: u32,
) -> Result<(), GdbServerError> {
    let value = match number {
        0..=31 => hart.read_reg(number),
        PC_REGISTER => hart.pc(),
        _ => return conn.write_packet(b"E01"),
    };
    conn.write_packet(hex_reg(value).as_bytes())
}

fn read_memory(
    conn: &mut Connection<TcpStream>,
    hart: &mut Hart,
    address: u32,
    length: u32,
) -> Result<(), GdbServerError> {
    if length as usize * 2 > PACKET_SIZE {
        return conn.write_packet(b"E01");
    }

    // Unbacked bytes read as zero; GDB routinely peeks around the stack
    // and a hard error would abort otherwise-fine sessions.
    let mut bytes = vec![0u8; length as usize];
    for (i, byte) in bytes.iter_mut().enumerate() {
        let mut buf = [0u8; 1];
        match hart.mem_read(address.wrapping_add(i as u32), &mut buf) {
            Ok(()) => *byte = buf[0],
            Err(err) => {
                tracing::debug!("memory read for debugger failed: {err}");
            }
        }
    }
    conn.write_packet(hex::encode(bytes).as_bytes())
}

fn write_memory(
    conn: &mut Connection<TcpStream>,
    hart: &mut Hart,
    address: u32,
    length: u32,
    data: &[u8],
) -> Result<(), GdbServerError> {
    if data.len() != length as usize {
        return conn.write_packet(b"E01");
    }
    for (i, byte) in data.iter().enumerate() {
        if let Err(err) = hart.mem_write(address.wrapping_add(i as u32), &[*byte]) {
            tracing::debug!("memory write for debugger failed: {err}");
            return conn.write_packet(b"E01");
        }
    }
    conn.write_packet(b"OK")
}

fn handle_query(
    conn: &mut Connection<TcpStream>,
    hart: &mut Hart,
    query: QueryPacket,
) -> Result<(), GdbServerError> {
    match query {
        QueryPacket::Supported => {
            conn.write_packet(format!("PacketSize={PACKET_SIZE:x}").as_bytes())
        }
        QueryPacket::Attached => conn.write_packet(b"1"),
        QueryPacket::Command(command) => {
            if command == b"reset" {
                hart.reset();
                conn.write_packet(b"OK")
            } else {
                // Other monitor commands are unsupported.
                conn.write_packet(b"")
            }
        }
        QueryPacket::Other => conn.write_packet(b""),
    }
}
