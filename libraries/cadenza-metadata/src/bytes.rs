//! Byte primitives
//!
//! Endian-aware integer reads over slices, synchsafe integers, the ASF GUID
//! formatter and FILETIME conversion. Nothing in here does I/O.
use crate::error::{MetadataError, Result};

/// FILETIME ticks between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_OFFSET: i128 = 116_444_736_000_000_000;
const FILETIME_TICKS_PER_SECOND: i128 = 10_000_000;

fn take<const N: usize>(bytes: &[u8], offset: usize) -> Result<[u8; N]> {
    let remaining = bytes.len().saturating_sub(offset);
    bytes
        .get(offset..)
        .and_then(|rest| rest.get(..N))
        .and_then(|slice| <[u8; N]>::try_from(slice).ok())
        .ok_or(MetadataError::Truncated {
            needed: N as u64,
            remaining: remaining as u64,
        })
}

pub fn read_u16_le(bytes: &[u8], offset: usize) -> Result<u16> {
    take(bytes, offset).map(u16::from_le_bytes)
}

pub fn read_u32_le(bytes: &[u8], offset: usize) -> Result<u32> {
    take(bytes, offset).map(u32::from_le_bytes)
}

pub fn read_u64_le(bytes: &[u8], offset: usize) -> Result<u64> {
    take(bytes, offset).map(u64::from_le_bytes)
}

pub fn read_u16_be(bytes: &[u8], offset: usize) -> Result<u16> {
    take(bytes, offset).map(u16::from_be_bytes)
}

/// Three-byte big-endian integer (FLAC block lengths)
pub fn read_u24_be(bytes: &[u8], offset: usize) -> Result<u32> {
    let [a, b, c] = take::<3>(bytes, offset)?;
    Ok(u32::from_be_bytes([0, a, b, c]))
}

pub fn read_u32_be(bytes: &[u8], offset: usize) -> Result<u32> {
    take(bytes, offset).map(u32::from_be_bytes)
}

pub fn read_u64_be(bytes: &[u8], offset: usize) -> Result<u64> {
    take(bytes, offset).map(u64::from_be_bytes)
}

/// Decode an ID3v2 synchsafe integer: four bytes carrying 7 bits each
pub fn read_synchsafe32(bytes: &[u8], offset: usize) -> Result<u32> {
    let raw = take::<4>(bytes, offset)?;
    if raw.iter().any(|b| b & 0x80 != 0) {
        return Err(MetadataError::MalformedSynchsafe(raw));
    }
    Ok(raw.iter().fold(0u32, |acc, &b| (acc << 7) | u32::from(b)))
}

/// Encode a value below 2^28 as a synchsafe integer
pub fn encode_synchsafe32(value: u32) -> Result<[u8; 4]> {
    if value >= 1 << 28 {
        return Err(MetadataError::InvalidValue {
            field: "synchsafe size".to_string(),
            value: value.to_string(),
        });
    }
    Ok([
        ((value >> 21) & 0x7F) as u8,
        ((value >> 14) & 0x7F) as u8,
        ((value >> 7) & 0x7F) as u8,
        (value & 0x7F) as u8,
    ])
}

/// Canonical GUID text for a 16-byte ASF GUID
///
/// The first three groups are stored little-endian on the wire; the last
/// two keep their byte order.
pub fn format_guid(guid: &[u8; 16]) -> String {
    let data1 = u32::from_le_bytes([guid[0], guid[1], guid[2], guid[3]]);
    let data2 = u16::from_le_bytes([guid[4], guid[5]]);
    let data3 = u16::from_le_bytes([guid[6], guid[7]]);
    let tail: String = guid[10..].iter().map(|b| format!("{:02X}", b)).collect();
    format!(
        "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{}",
        data1, data2, data3, guid[8], guid[9], tail
    )
}

/// Windows FILETIME (100 ns ticks since 1601) to POSIX seconds
pub fn filetime_to_unix(filetime: u64) -> i64 {
    ((i128::from(filetime) - FILETIME_UNIX_OFFSET) / FILETIME_TICKS_PER_SECOND) as i64
}

/// Sequential reader over a byte slice
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Everything not yet consumed
    pub fn rest(&self) -> &'a [u8] {
        self.data.get(self.pos..).unwrap_or(&[])
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let slice = self
            .rest()
            .get(..len)
            .ok_or(MetadataError::Truncated {
                needed: len as u64,
                remaining: self.remaining() as u64,
            })?;
        self.pos += len;
        Ok(slice)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let value = take(self.data, self.pos)?;
        self.pos += N;
        Ok(value)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.bytes(len).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.array::<1>().map(|[b]| b)
    }

    pub fn u16_le(&mut self) -> Result<u16> {
        self.array().map(u16::from_le_bytes)
    }

    pub fn u32_le(&mut self) -> Result<u32> {
        self.array().map(u32::from_le_bytes)
    }

    pub fn u64_le(&mut self) -> Result<u64> {
        self.array().map(u64::from_le_bytes)
    }

    pub fn u16_be(&mut self) -> Result<u16> {
        self.array().map(u16::from_be_bytes)
    }

    pub fn u24_be(&mut self) -> Result<u32> {
        let [a, b, c] = self.array::<3>()?;
        Ok(u32::from_be_bytes([0, a, b, c]))
    }

    pub fn u32_be(&mut self) -> Result<u32> {
        self.array().map(u32::from_be_bytes)
    }

    pub fn u64_be(&mut self) -> Result<u64> {
        self.array().map(u64::from_be_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn integer_reads_respect_endianness() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(read_u16_le(&data, 0).unwrap(), 0x0201);
        assert_eq!(read_u16_be(&data, 0).unwrap(), 0x0102);
        assert_eq!(read_u24_be(&data, 1).unwrap(), 0x020304);
        assert_eq!(read_u32_le(&data, 4).unwrap(), 0x08070605);
        assert_eq!(read_u32_be(&data, 4).unwrap(), 0x05060708);
        assert_eq!(read_u64_le(&data, 0).unwrap(), 0x0807060504030201);
        assert_eq!(read_u64_be(&data, 0).unwrap(), 0x0102030405060708);
    }

    #[test]
    fn short_reads_are_truncated() {
        let data = [0u8; 3];
        assert!(matches!(
            read_u32_le(&data, 0),
            Err(MetadataError::Truncated { needed: 4, remaining: 3 })
        ));
        assert!(matches!(
            read_u16_be(&data, 10),
            Err(MetadataError::Truncated { needed: 2, remaining: 0 })
        ));
    }

    #[test]
    fn synchsafe_rejects_high_bit() {
        assert_eq!(read_synchsafe32(&[0x00, 0x00, 0x02, 0x01], 0).unwrap(), 257);
        assert!(matches!(
            read_synchsafe32(&[0x00, 0x80, 0x00, 0x00], 0),
            Err(MetadataError::MalformedSynchsafe(_))
        ));
        assert!(encode_synchsafe32(1 << 28).is_err());
    }

    #[test]
    fn guid_uses_mixed_endian_groups() {
        // ASF Header Object
        let guid = [
            0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62,
            0xCE, 0x6C,
        ];
        assert_eq!(format_guid(&guid), "75B22630-668E-11CF-A6D9-00AA0062CE6C");
    }

    #[test]
    fn filetime_epoch_boundaries() {
        assert_eq!(filetime_to_unix(0), -11_644_473_600);
        assert_eq!(filetime_to_unix(116_444_736_000_000_000), 0);
        assert_eq!(filetime_to_unix(116_444_736_000_000_000 + 15_000_000), 1);
    }

    #[test]
    fn reader_walks_sequentially() {
        let data = [1u8, 0, 0, 0, 2, 0xAA, 0xBB];
        let mut reader = ByteReader::new(&data);
        assert_eq!(reader.u32_le().unwrap(), 1);
        assert_eq!(reader.u8().unwrap(), 2);
        assert_eq!(reader.rest(), &[0xAA, 0xBB]);
        assert!(reader.bytes(3).is_err());
        assert_eq!(reader.position(), 5);
        reader.skip(2).unwrap();
        assert!(reader.is_empty());
    }

    proptest! {
        #[test]
        fn synchsafe_encode_decode(value in 0u32..(1 << 28)) {
            let encoded = encode_synchsafe32(value).unwrap();
            prop_assert!(encoded.iter().all(|b| b & 0x80 == 0));
            prop_assert_eq!(read_synchsafe32(&encoded, 0).unwrap(), value);
        }

        #[test]
        fn reads_never_panic(data in prop::collection::vec(any::<u8>(), 0..16), offset in 0usize..32) {
            let _ = read_u64_le(&data, offset);
            let _ = read_u24_be(&data, offset);
            let _ = read_synchsafe32(&data, offset);
        }
    }
}
