//! The emulator's text command port, spoken over a local UDP socket.

use std::io::{self, ErrorKind};
use std::net::UdpSocket;
use std::time::Duration;

use tandem_core::constants::WRITE_CHUNK;
use tandem_core::error::SyncError;

/// RAM access seam. Production talks to RetroArch; committer tests run
/// against a scripted in-memory double.
pub trait MemoryBus {
    fn read(&mut self, address: u32, count: usize) -> Result<Vec<u8>, SyncError>;
    fn write(&mut self, address: u32, bytes: &[u8]) -> Result<(), SyncError>;
    fn frame_advance(&mut self) -> Result<(), SyncError>;
    fn pause_toggle(&mut self) -> Result<(), SyncError>;
}

pub struct RetroArchPort {
    socket: UdpSocket,
}

impl RetroArchPort {
    /// Bind an ephemeral local socket and point it at the emulator's command
    /// port. `read_timeout` should be a fifth of the poll interval.
    pub fn connect(port: u16, read_timeout: Duration) -> io::Result<RetroArchPort> {
        let socket = UdpSocket::bind(("127.0.0.1", 0))?;
        socket.connect(("127.0.0.1", port))?;
        socket.set_read_timeout(Some(read_timeout))?;
        Ok(RetroArchPort { socket })
    }

    fn send_command(&self, command: &str) -> Result<(), SyncError> {
        self.socket
            .send(command.as_bytes())
            .map(|_| ())
            .map_err(|_| SyncError::EmulatorUnresponsive)
    }
}

impl MemoryBus for RetroArchPort {
    fn read(&mut self, address: u32, count: usize) -> Result<Vec<u8>, SyncError> {
        self.send_command(&format!("READ_CORE_RAM {address:06x} {count}"))?;

        // Worst case reply: header plus three characters per byte.
        let mut buf = vec![0u8; 32 + 3 * count];
        let received = self.socket.recv(&mut buf).map_err(|e| match e.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => SyncError::EmulatorUnresponsive,
            _ => SyncError::EmulatorReadError(e.to_string()),
        })?;

        parse_read_reply(&buf[..received], address, count)
    }

    fn write(&mut self, address: u32, bytes: &[u8]) -> Result<(), SyncError> {
        // Long WRITE_CORE_RAM payloads silently truncate on some emulator
        // builds, so every write goes out in small commands.
        let mut addr = address;
        for chunk in bytes.chunks(WRITE_CHUNK) {
            let mut command = format!("WRITE_CORE_RAM {addr:06x}");
            for byte in chunk {
                command.push_str(&format!(" {byte:02X}"));
            }
            self.send_command(&command)?;
            addr += chunk.len() as u32;
        }
        Ok(())
    }

    fn frame_advance(&mut self) -> Result<(), SyncError> {
        self.send_command("FRAMEADVANCE")
    }

    fn pause_toggle(&mut self) -> Result<(), SyncError> {
        self.send_command("PAUSE_TOGGLE")
    }
}

/// Parse `READ_CORE_RAM <addr> <b0> <b1> ...`, validating the byte count
/// against what was asked for.
fn parse_read_reply(reply: &[u8], address: u32, count: usize) -> Result<Vec<u8>, SyncError> {
    let text = std::str::from_utf8(reply)
        .map_err(|_| SyncError::EmulatorReadError("reply is not ASCII".to_string()))?;

    let mut fields = text.split_ascii_whitespace();
    match fields.next() {
        Some("READ_CORE_RAM") => {}
        other => {
            return Err(SyncError::EmulatorReadError(format!(
                "unexpected reply head {other:?}"
            )))
        }
    }
    fields
        .next()
        .ok_or_else(|| SyncError::EmulatorReadError("reply missing address".to_string()))?;

    let data = fields
        .map(|field| {
            u8::from_str_radix(field, 16)
                .map_err(|_| SyncError::EmulatorReadError(format!("bad hex byte {field:?}")))
        })
        .collect::<Result<Vec<u8>, _>>()?;

    if data.len() != count {
        return Err(SyncError::EmulatorReadError(format!(
            "read {} bytes at {address:06x}, expected {count}",
            data.len()
        )));
    }
    Ok(data)
}
