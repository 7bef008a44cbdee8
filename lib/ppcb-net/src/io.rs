//! Transport I/O primitives: framed stream read/write and timeout-aware
//! datagram send/recv. Follows the same loop-until-done shape as a
//! ring-buffered `Buffer::ingress`/`egress`, simplified for single-shot
//! (not ring-buffered) transfers.

use ppcb_proto::error::Result;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;

/// Reads until `buf` is full, EOF, or an error. Returns the number of
/// bytes actually read so the caller can tell a clean EOF-before-complete
/// apart from success: `0` means EOF arrived before any bytes did, a
/// value strictly between `0` and `buf.len()` means EOF arrived mid
/// message.
pub fn read_exact_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match r.read(&mut buf[total..]) {
            Ok(0) => return Ok(total),
            Ok(n) => total += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// One write call, one datagram. Errors unless the whole buffer was
/// accepted in a single `send_to`.
pub fn send_datagram(socket: &UdpSocket, buf: &[u8], addr: SocketAddr) -> Result<()> {
    let written = socket.send_to(buf, addr)?;
    if written != buf.len() {
        return Err(ppcb_proto::Error::Fatal(ppcb_proto::Kind::ShortWrite));
    }
    Ok(())
}

/// Receives one datagram into `buf`, honoring whatever timeout is
/// currently set on `socket`. A timeout or a `WouldBlock` surfaces as
/// `Error::Wait`, distinct from other I/O errors, so UDPR's retransmit
/// loop can react specifically to "nothing arrived in time".
pub fn recv_datagram(socket: &UdpSocket, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
    socket.recv_from(buf).map_err(Into::into)
}

/// Sets the socket's receive timeout. `None` blocks forever, used only
/// while the UDP/UDPR server is waiting for the first `CONN` of a new
/// session.
pub fn set_udp_timeout(socket: &UdpSocket, timeout: Option<Duration>) -> io::Result<()> {
    socket.set_read_timeout(timeout)
}

pub fn set_tcp_timeout(stream: &TcpStream, timeout: Option<Duration>) -> io::Result<()> {
    stream.set_read_timeout(timeout)
}

pub fn write_all<W: Write>(w: &mut W, buf: &[u8]) -> io::Result<()> {
    w.write_all(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct Choppy {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
    }

    impl Read for Choppy {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let remaining = self.data.len() - self.pos;
            if remaining == 0 {
                return Ok(0);
            }
            let n = remaining.min(self.chunk).min(buf.len());
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn test_read_exact_or_eof_assembles_partial_reads() {
        let mut source = Choppy { data: vec![1, 2, 3, 4, 5], pos: 0, chunk: 2 };
        let mut buf = [0u8; 5];
        let n = read_exact_or_eof(&mut source, &mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(buf, [1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_read_exact_or_eof_reports_short_read_on_eof() {
        let mut source = Choppy { data: vec![1, 2, 3], pos: 0, chunk: 2 };
        let mut buf = [0u8; 5];
        let n = read_exact_or_eof(&mut source, &mut buf).unwrap();
        assert_eq!(n, 3);
    }

    #[test]
    fn test_read_exact_or_eof_on_cursor() {
        let mut source = Cursor::new(vec![9u8; 4]);
        let mut buf = [0u8; 4];
        let n = read_exact_or_eof(&mut source, &mut buf).unwrap();
        assert_eq!(n, 4);
    }
}
