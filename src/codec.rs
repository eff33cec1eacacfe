//! Shared binary framing used by every tree family's `save`/`load`
//! (spec.md §6): a 4-byte magic tag, a 2-byte LE version, a family-specific
//! header, and a pre-order body of leaf/internal nodes.
//!
//! Each family module builds its header and body on top of the primitives
//! here; this module owns only the parts that are identical across
//! families (primitive LE/BE integer and float I/O, the magic/version
//! frame, and point entry framing).

use std::io::{Read, Write};

use crate::error::{Result, SpartError};
use crate::geometry::Point;
use crate::payload::Payload;

pub const CURRENT_VERSION: u16 = 1;

/// Node tag written before every node in the pre-order body.
pub const TAG_LEAF: u8 = 0;
pub const TAG_INTERNAL: u8 = 1;

pub fn write_magic(w: &mut impl Write, magic: &[u8; 4]) -> Result<()> {
    w.write_all(magic)?;
    Ok(())
}

pub fn write_u16(w: &mut impl Write, v: u16) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_u32(w: &mut impl Write, v: u32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_f64(w: &mut impl Write, v: f64) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn read_magic(r: &mut impl Read) -> Result<[u8; 4]> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_u16(r: &mut impl Read) -> Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

pub fn read_u32(r: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn read_f64(r: &mut impl Read) -> Result<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

/// Verifies the magic tag and reads/validates the version, as every
/// family's `load` must do first (spec.md §6 ¶5, §7 `FormatError`).
pub fn read_and_check_header(r: &mut impl Read, expected_magic: &[u8; 4]) -> Result<()> {
    let magic = read_magic(r)?;
    if &magic != expected_magic {
        return Err(SpartError::Format(format!(
            "bad magic tag: expected {:?}, got {:?}",
            std::str::from_utf8(expected_magic).unwrap_or("?"),
            String::from_utf8_lossy(&magic)
        )));
    }
    let version = read_u16(r)?;
    if version != CURRENT_VERSION {
        return Err(SpartError::Format(format!(
            "unknown version: {version}"
        )));
    }
    Ok(())
}

/// Writes one point entry: `D` little-endian f64 coordinates followed by a
/// 4-byte big-endian length-prefixed payload blob (spec.md §6 ¶4).
pub fn write_point<const D: usize>(w: &mut impl Write, p: &Point<D>) -> Result<()> {
    for c in p.coords {
        write_f64(w, c)?;
    }
    let encoded = p.data.encode();
    w.write_all(&(encoded.len() as u32).to_be_bytes())?;
    w.write_all(&encoded)?;
    Ok(())
}

/// Reads one point entry written by [`write_point`].
pub fn read_point<const D: usize>(r: &mut impl Read) -> Result<Point<D>> {
    let mut coords = [0.0f64; D];
    for c in coords.iter_mut() {
        *c = read_f64(r)?;
    }
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut payload_buf = vec![0u8; len];
    r.read_exact(&mut payload_buf)?;
    let data = Payload::decode(&payload_buf)?;
    Ok(Point { coords, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_round_trip() {
        let p = Point::<2>::new([1.5, -2.5], Payload::Str("x".to_string()));
        let mut buf = Vec::new();
        write_point(&mut buf, &p).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let back = read_point::<2>(&mut cursor).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn header_rejects_wrong_magic() {
        let mut buf = Vec::new();
        write_magic(&mut buf, b"XXXX").unwrap();
        write_u16(&mut buf, CURRENT_VERSION).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        assert!(read_and_check_header(&mut cursor, b"QUAD").is_err());
    }

    #[test]
    fn header_rejects_unknown_version() {
        let mut buf = Vec::new();
        write_magic(&mut buf, b"QUAD").unwrap();
        write_u16(&mut buf, 99).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        assert!(read_and_check_header(&mut cursor, b"QUAD").is_err());
    }
}
