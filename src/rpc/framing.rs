//! Length-prefixed JSON framing shared by the client and server sides of the
//! RAFT transport: a 4-byte big-endian length, then that many bytes of UTF-8
//! JSON.

use std::io::{Read, Write};
use std::net::SocketAddr;

use crate::error::TransportError;

const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

pub fn write_frame<W: Write>(mut w: W, addr: SocketAddr, bytes: &[u8]) -> Result<(), TransportError> {
    let len = bytes.len() as u32;
    w.write_all(&len.to_be_bytes())
        .and_then(|_| w.write_all(bytes))
        .map_err(|source| TransportError::Io { addr, source })
}

pub fn read_frame<R: Read>(mut r: R, addr: SocketAddr) -> Result<Vec<u8>, TransportError> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)
        .map_err(|source| io_to_transport_error(addr, source))?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(TransportError::UnexpectedReply { addr });
    }
    let mut body = vec![0u8; len as usize];
    r.read_exact(&mut body)
        .map_err(|source| io_to_transport_error(addr, source))?;
    Ok(body)
}

fn io_to_transport_error(addr: SocketAddr, source: std::io::Error) -> TransportError {
    use std::io::ErrorKind;
    match source.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => TransportError::Timeout { addr },
        _ => TransportError::Io { addr, source },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_frame() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let mut buf = Vec::new();
        write_frame(&mut buf, addr, b"hello").unwrap();
        let decoded = read_frame(&buf[..], addr).unwrap();
        assert_eq!(decoded, b"hello");
    }

    #[test]
    fn rejects_oversized_frame() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let mut huge_len = Vec::new();
        huge_len.extend_from_slice(&(MAX_FRAME_BYTES + 1).to_be_bytes());
        assert!(read_frame(&huge_len[..], addr).is_err());
    }
}
