//! Variable-length integer and byte-string primitives.
//!
//! Longs are zig-zag mapped and then written as little-endian base-128
//! groups, seven bits per byte, high bit set on every byte but the last.
//! Byte strings and UTF-8 strings are a long length followed by the raw
//! bytes. Fixed-size arrays are raw bytes with no prefix. Block framing and
//! the file header are both built from these.

use std::io::{self, ErrorKind, Read, Write};

/// Longest encoding of an `i64` (ceil(64 / 7) bytes).
pub const MAX_VARINT_LEN: usize = 10;

#[inline]
pub fn zigzag(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

#[inline]
pub fn unzigzag(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

/// Append the encoding of `n` to `out`.
pub fn encode_long(n: i64, out: &mut Vec<u8>) {
    let mut v = zigzag(n);
    while v >= 0x80 {
        out.push((v as u8 & 0x7f) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

pub fn write_long<W: Write + ?Sized>(w: &mut W, n: i64) -> io::Result<()> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let mut v = zigzag(n);
    let mut len = 0;
    while v >= 0x80 {
        buf[len] = (v as u8 & 0x7f) | 0x80;
        v >>= 7;
        len += 1;
    }
    buf[len] = v as u8;
    w.write_all(&buf[..=len])
}

/// Read a long, distinguishing a clean end-of-stream from truncation.
///
/// Returns `Ok(None)` when the stream had no bytes left before the first
/// varint byte. Running out of bytes after the first one is
/// `UnexpectedEof`.
pub fn read_long_or_eof<R: Read + ?Sized>(r: &mut R) -> io::Result<Option<i64>> {
    let mut value = 0u64;
    for i in 0..MAX_VARINT_LEN {
        let byte = match read_byte(r)? {
            Some(b) => b,
            None if i == 0 => return Ok(None),
            None => {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "stream ended inside a varint",
                ))
            }
        };
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some(unzigzag(value)));
        }
    }
    Err(io::Error::new(
        ErrorKind::InvalidData,
        format!("varint longer than {} bytes", MAX_VARINT_LEN),
    ))
}

pub fn read_long<R: Read + ?Sized>(r: &mut R) -> io::Result<i64> {
    read_long_or_eof(r)?
        .ok_or_else(|| io::Error::new(ErrorKind::UnexpectedEof, "expected varint, found end of stream"))
}

pub fn write_bytes<W: Write + ?Sized>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    write_long(w, bytes.len() as i64)?;
    w.write_all(bytes)
}

/// Read a length-prefixed byte string.
///
/// The buffer grows with the bytes actually received, so a corrupted
/// length cannot force a huge up-front allocation.
pub fn read_bytes<R: Read + ?Sized>(r: &mut R) -> io::Result<Vec<u8>> {
    let len = read_long(r)?;
    if len < 0 {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            format!("negative byte string length {}", len),
        ));
    }
    let mut buf = Vec::new();
    r.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() as u64 != len as u64 {
        return Err(io::Error::new(
            ErrorKind::UnexpectedEof,
            format!("byte string truncated: expected {} bytes, got {}", len, buf.len()),
        ));
    }
    Ok(buf)
}

pub fn write_string<W: Write + ?Sized>(w: &mut W, s: &str) -> io::Result<()> {
    write_bytes(w, s.as_bytes())
}

pub fn read_string<R: Read + ?Sized>(r: &mut R) -> io::Result<String> {
    String::from_utf8(read_bytes(r)?).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))
}

/// Write a fixed-size byte array: raw bytes, no length prefix.
pub fn write_fixed<W: Write + ?Sized>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    w.write_all(bytes)
}

/// Read a fixed-size byte array of `N` bytes.
///
/// Fails with `UnexpectedEof` if the stream ends first.
pub fn read_fixed<const N: usize, R: Read + ?Sized>(r: &mut R) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    let filled = read_full(r, &mut buf)?;
    if filled < N {
        return Err(io::Error::new(
            ErrorKind::UnexpectedEof,
            format!("fixed truncated: expected {} bytes, got {}", N, filled),
        ));
    }
    Ok(buf)
}

/// Read as many bytes as the stream offers, up to `buf.len()`.
///
/// Returns the number of bytes filled; less than `buf.len()` means the
/// stream ended.
pub fn read_full<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

fn read_byte<R: Read + ?Sized>(r: &mut R) -> io::Result<Option<u8>> {
    let mut byte = [0u8; 1];
    loop {
        match r.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}
