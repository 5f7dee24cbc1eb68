//! Little-endian cursor and the `#Strings` / `#Blob` heaps.

use crate::error::MetadataError;

/// Forward-only little-endian reader over a byte slice.
pub(crate) struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(data: &'a [u8], what: &'static str) -> Self {
        Self { data, pos: 0, what }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    fn truncated(&self) -> MetadataError {
        MetadataError::Truncated {
            what: self.what,
            offset: self.pos,
        }
    }

    pub(crate) fn bytes(&mut self, len: usize) -> Result<&'a [u8], MetadataError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| self.truncated())?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn skip(&mut self, len: usize) -> Result<(), MetadataError> {
        self.bytes(len).map(|_| ())
    }

    /// Advance to the next multiple of 4 (relative to the slice start).
    pub(crate) fn align4(&mut self) -> Result<(), MetadataError> {
        let padding = (4 - self.pos % 4) % 4;
        self.skip(padding)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, MetadataError> {
        Ok(self.bytes(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, MetadataError> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, MetadataError> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u64(&mut self) -> Result<u64, MetadataError> {
        let b = self.bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    /// Null-terminated byte string; the terminator is consumed, not returned.
    pub(crate) fn cstr(&mut self) -> Result<&'a [u8], MetadataError> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let len = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| self.truncated())?;
        let s = &rest[..len];
        self.pos += len + 1;
        Ok(s)
    }
}

/// Read an ECMA-335 compressed unsigned integer (II.23.2).
pub(crate) fn read_compressed(data: &[u8], pos: &mut usize) -> Option<u32> {
    let b0 = *data.get(*pos)? as u32;
    if b0 & 0x80 == 0 {
        *pos += 1;
        Some(b0)
    } else if b0 & 0xC0 == 0x80 {
        let b1 = *data.get(*pos + 1)? as u32;
        *pos += 2;
        Some(((b0 & 0x3F) << 8) | b1)
    } else if b0 & 0xE0 == 0xC0 {
        let b1 = *data.get(*pos + 1)? as u32;
        let b2 = *data.get(*pos + 2)? as u32;
        let b3 = *data.get(*pos + 3)? as u32;
        *pos += 4;
        Some(((b0 & 0x1F) << 24) | (b1 << 16) | (b2 << 8) | b3)
    } else {
        None
    }
}

/// Encode a compressed unsigned integer. Values above `0x1FFF_FFFF` do not fit.
#[cfg(any(test, feature = "test-support"))]
pub(crate) fn write_compressed(out: &mut Vec<u8>, value: u32) {
    if value < 0x80 {
        out.push(value as u8);
    } else if value < 0x4000 {
        out.push(0x80 | (value >> 8) as u8);
        out.push(value as u8);
    } else {
        out.push(0xC0 | ((value >> 24) & 0x1F) as u8);
        out.push((value >> 16) as u8);
        out.push((value >> 8) as u8);
        out.push(value as u8);
    }
}

/// The `#Strings` heap: UTF-8, null-terminated, indexed by byte offset.
pub(crate) struct StringHeap<'a> {
    data: &'a [u8],
}

impl<'a> StringHeap<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub(crate) fn get(&self, index: u32) -> Result<String, MetadataError> {
        let start = index as usize;
        if start >= self.data.len() {
            if start == 0 {
                return Ok(String::new());
            }
            return Err(MetadataError::Truncated {
                what: "#Strings heap",
                offset: start,
            });
        }
        let mut cursor = Cursor::new(&self.data[start..], "#Strings heap");
        let raw = cursor.cstr()?;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }
}

/// The `#Blob` heap: length-prefixed byte runs indexed by byte offset.
pub(crate) struct BlobHeap<'a> {
    data: &'a [u8],
}

impl<'a> BlobHeap<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub(crate) fn get(&self, index: u32) -> Result<&'a [u8], MetadataError> {
        if index == 0 {
            return Ok(&[]);
        }
        let mut pos = index as usize;
        let truncated = MetadataError::Truncated {
            what: "#Blob heap",
            offset: index as usize,
        };
        let len = read_compressed(self.data, &mut pos).ok_or(truncated)? as usize;
        self.data
            .get(pos..pos + len)
            .ok_or(MetadataError::Truncated {
                what: "#Blob heap",
                offset: pos,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compressed_round_trip_boundaries() {
        for value in [0u32, 0x7F, 0x80, 0x3FFF, 0x4000, 0x1FFF_FFFF] {
            let mut buf = Vec::new();
            write_compressed(&mut buf, value);
            let mut pos = 0;
            assert_eq!(read_compressed(&buf, &mut pos), Some(value));
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn test_compressed_known_encodings() {
        // Examples from ECMA-335 II.23.2
        let mut pos = 0;
        assert_eq!(read_compressed(&[0x03], &mut pos), Some(0x03));
        pos = 0;
        assert_eq!(read_compressed(&[0x80, 0x80], &mut pos), Some(0x80));
        pos = 0;
        assert_eq!(read_compressed(&[0xC0, 0x00, 0x40, 0x00], &mut pos), Some(0x4000));
        pos = 0;
        assert_eq!(read_compressed(&[0xFF], &mut pos), None);
    }

    #[test]
    fn test_cursor_reads_and_truncates() {
        let data = [0x01, 0x00, 0x02, 0x00, 0x00, 0x00, b'h', b'i', 0];
        let mut cursor = Cursor::new(&data, "test");
        assert_eq!(cursor.u16().unwrap(), 1);
        assert_eq!(cursor.u32().unwrap(), 2);
        assert_eq!(cursor.cstr().unwrap(), b"hi");
        assert!(matches!(
            cursor.u8(),
            Err(MetadataError::Truncated { what: "test", .. })
        ));
    }

    #[test]
    fn test_string_heap() {
        let heap = StringHeap::new(b"\0Person\0System\0");
        assert_eq!(heap.get(0).unwrap(), "");
        assert_eq!(heap.get(1).unwrap(), "Person");
        assert_eq!(heap.get(8).unwrap(), "System");
        assert!(heap.get(100).is_err());
    }

    #[test]
    fn test_blob_heap() {
        let heap = BlobHeap::new(&[0x00, 0x03, 0x28, 0x00, 0x08]);
        assert!(heap.get(0).unwrap().is_empty());
        assert_eq!(heap.get(1).unwrap(), &[0x28, 0x00, 0x08]);
        assert!(heap.get(4).is_err());
    }
}
