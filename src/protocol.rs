//! Wire-level framing shared by the daemon and the client.
//!
//! Every reply starts with exactly one status byte, `'1'` for success and
//! `'0'` for failure, followed by a command-specific payload. Most
//! payloads are free-form text framed by the connection itself: the
//! reader drains until the peer stops sending, using a short receive
//! timeout. The only length-prefixed exchange is the upload size, an
//! 8-byte little-endian integer.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

pub const STATUS_OK: u8 = b'1';
pub const STATUS_ERR: u8 = b'0';

/// How long a reader waits for more payload bytes before deciding the
/// peer is done sending.
pub const REPLY_TIMEOUT: Duration = Duration::from_millis(300);

/// Commands and payload chunks travel in block-sized pieces.
pub const MSG_SIZE: usize = 1024;

pub fn send_success(stream: &mut TcpStream) -> io::Result<()> {
    stream.write_all(&[STATUS_OK])
}

pub fn send_failure(stream: &mut TcpStream, reason: &str) -> io::Result<()> {
    stream.write_all(&[STATUS_ERR])?;
    stream.write_all(reason.as_bytes())?;
    if !reason.ends_with('\n') {
        stream.write_all(b"\n")?;
    }
    Ok(())
}

pub fn send_msg(stream: &mut TcpStream, text: &str) -> io::Result<()> {
    stream.write_all(text.as_bytes())
}

/// Receives one message. Zero means the peer closed the connection.
pub fn recv_msg(stream: &mut TcpStream, buf: &mut [u8; MSG_SIZE]) -> io::Result<usize> {
    stream.read(&mut buf[..])
}

/// Reads the one status byte of a reply.
pub fn read_status(stream: &mut TcpStream) -> io::Result<bool> {
    let mut status = [0u8; 1];
    stream.read_exact(&mut status)?;
    Ok(status[0] == STATUS_OK)
}

pub fn send_size(stream: &mut TcpStream, size: u64) -> io::Result<()> {
    stream.write_all(&size.to_le_bytes())
}

pub fn recv_size(stream: &mut TcpStream) -> io::Result<u64> {
    let mut raw = [0u8; 8];
    stream.read_exact(&mut raw)?;
    Ok(u64::from_le_bytes(raw))
}

/// Drains a connection-framed payload into `sink`, stopping at EOF or
/// when `REPLY_TIMEOUT` passes without data. The socket's read timeout
/// must already be set.
pub fn drain(stream: &mut TcpStream, sink: &mut impl Write) -> io::Result<usize> {
    let mut buf = [0u8; MSG_SIZE];
    let mut total = 0;
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                sink.write_all(&buf[..n])?;
                total += n;
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                break
            }
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

pub fn drain_to_string(stream: &mut TcpStream) -> io::Result<String> {
    let mut bytes = Vec::new();
    drain(stream, &mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
