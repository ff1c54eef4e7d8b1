// Length-prefixed framing: a little-endian u64 length, then that many bytes.

use byteorder::{ByteOrder, LittleEndian};
use std::io::{ErrorKind, Read, Write};

use crate::error::{RegressError, Result};

/// Upper bound any peer accepts for a single frame
pub const MAX_FRAME_LEN: u64 = 16 * 1024 * 1024;

pub fn send_u64<W: Write>(stream: &mut W, val: u64) -> Result<()> {
    let mut buf = [0u8; 8];
    LittleEndian::write_u64(&mut buf, val);
    send_loop(stream, &buf, buf.len() as u64)?;
    Ok(())
}

pub fn recv_u64<R: Read>(stream: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    recv_loop(stream, &mut buf, 8)?;
    let val = LittleEndian::read_u64(&buf);
    Ok(val)
}

/// Send `len` bytes from `buf`, retrying on partial writes.
pub fn send_loop<W: Write>(stream: &mut W, buf: &[u8], len: u64) -> Result<()> {
    let len = checked_len(buf.len(), len)?;
    let mut send_bytes = 0;

    while send_bytes < len {
        match stream.write(&buf[send_bytes..len]) {
            Ok(0) => {
                return Err(RegressError::Io(std::io::Error::new(
                    ErrorKind::WriteZero,
                    "peer stopped accepting data",
                )))
            }
            Ok(size) => send_bytes += size,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(RegressError::from_stream_io(e, "send")),
        }
    }
    stream
        .flush()
        .map_err(|e| RegressError::from_stream_io(e, "flush"))?;

    Ok(())
}

/// Receive exactly `len` bytes into `buf`. End of stream before that is a
/// short read, distinct from an I/O error.
pub fn recv_loop<R: Read>(stream: &mut R, buf: &mut [u8], len: u64) -> Result<()> {
    let len = checked_len(buf.len(), len)?;
    let mut recv_bytes = 0;

    while recv_bytes < len {
        match stream.read(&mut buf[recv_bytes..len]) {
            Ok(0) => {
                return Err(RegressError::ShortRead {
                    expected: len as u64,
                    received: recv_bytes as u64,
                })
            }
            Ok(size) => recv_bytes += size,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(RegressError::from_stream_io(e, "receive")),
        }
    }

    Ok(())
}

/// Write one complete frame.
pub fn send_frame<W: Write>(stream: &mut W, payload: &[u8]) -> Result<()> {
    let len = payload.len() as u64;
    send_u64(stream, len)?;
    send_loop(stream, payload, len)
}

/// Read one complete frame, refusing lengths above `limit`.
pub fn recv_frame<R: Read>(stream: &mut R, limit: u64) -> Result<Vec<u8>> {
    let limit = limit.min(MAX_FRAME_LEN);
    let len = recv_u64(stream)?;
    if len > limit {
        return Err(RegressError::InvalidFrame { len, limit });
    }

    let mut buf = vec![0u8; len as usize];
    recv_loop(stream, &mut buf, len)?;
    Ok(buf)
}

fn checked_len(buf_len: usize, len: u64) -> Result<usize> {
    if len > buf_len as u64 {
        return Err(RegressError::InvalidFrame {
            len,
            limit: buf_len as u64,
        });
    }
    Ok(len as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};

    /// Reader that hands out at most `chunk` bytes per call
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.chunk.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn u64_is_little_endian() {
        let mut out = Vec::new();
        send_u64(&mut out, 0x0102_0304_0506_0708).unwrap();
        assert_eq!(out, vec![8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(recv_u64(&mut Cursor::new(out)).unwrap(), 0x0102_0304_0506_0708);
    }

    #[test]
    fn recv_loop_reassembles_partial_reads() {
        let mut wire = Vec::new();
        send_frame(&mut wire, b"hello, vsock").unwrap();
        let mut reader = Trickle {
            data: wire,
            pos: 0,
            chunk: 3,
        };
        assert_eq!(recv_frame(&mut reader, 1024).unwrap(), b"hello, vsock");
    }

    #[test]
    fn truncated_frame_is_short_read() {
        let mut wire = Vec::new();
        send_frame(&mut wire, &[0xAA; 100]).unwrap();
        wire.truncate(8 + 40);

        match recv_frame(&mut Cursor::new(wire), 1024) {
            Err(RegressError::ShortRead { expected, received }) => {
                assert_eq!(expected, 100);
                assert_eq!(received, 40);
            }
            other => panic!("expected short read, got {:?}", other),
        }
    }

    #[test]
    fn oversized_frame_is_rejected_before_body() {
        let mut wire = Vec::new();
        send_u64(&mut wire, 4096).unwrap();

        match recv_frame(&mut Cursor::new(wire), 1024) {
            Err(RegressError::InvalidFrame { len, limit }) => {
                assert_eq!(len, 4096);
                assert_eq!(limit, 1024);
            }
            other => panic!("expected invalid frame, got {:?}", other),
        }
    }

    #[test]
    fn empty_frame_round_trips() {
        let mut wire = Vec::new();
        send_frame(&mut wire, &[]).unwrap();
        assert_eq!(wire.len(), 8);
        assert!(recv_frame(&mut Cursor::new(wire), 0).unwrap().is_empty());
    }
}
