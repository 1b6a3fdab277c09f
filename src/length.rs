use bytes::Buf;

use crate::error::RdbError;

/// A decoded length tag: either a plain length or a marker saying the
/// following bytes hold a specially encoded string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthEncoding {
    Length(usize),
    Special(SpecialEncoding),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialEncoding {
    Int8,
    Int16,
    Int32,
    Lzf,
}

impl TryFrom<u8> for SpecialEncoding {
    type Error = RdbError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SpecialEncoding::Int8),
            1 => Ok(SpecialEncoding::Int16),
            2 => Ok(SpecialEncoding::Int32),
            3 => Ok(SpecialEncoding::Lzf),
            code => Err(RdbError::UnsupportedEncoding(code)),
        }
    }
}

/// Fails with `ShortRead` unless at least `needed` bytes remain.
pub fn ensure<B: Buf>(buf: &B, needed: usize, field: &'static str) -> Result<(), RdbError> {
    if buf.remaining() < needed {
        return Err(RdbError::ShortRead {
            field,
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

pub fn read_length<B: Buf>(buf: &mut B) -> Result<LengthEncoding, RdbError> {
    ensure(buf, 1, "length tag")?;
    let first = buf.get_u8();

    match first >> 6 {
        0b00 => Ok(LengthEncoding::Length((first & 0x3f) as usize)),
        0b01 => {
            // 6 low bits of the tag are the high bits of a 14-bit length
            ensure(buf, 1, "14-bit length")?;
            let low = buf.get_u8();
            Ok(LengthEncoding::Length(
                u16::from_be_bytes([first & 0x3f, low]) as usize,
            ))
        }
        0b10 => {
            ensure(buf, 4, "32-bit length")?;
            Ok(LengthEncoding::Length(buf.get_u32() as usize))
        }
        _ => SpecialEncoding::try_from(first & 0x3f).map(LengthEncoding::Special),
    }
}

/// Reads a length where a special encoding makes no sense (counts, db
/// indices, table size hints).
pub fn read_plain_length<B: Buf>(buf: &mut B, field: &'static str) -> Result<usize, RdbError> {
    match read_length(buf)? {
        LengthEncoding::Length(len) => Ok(len),
        LengthEncoding::Special(_) => Err(RdbError::UnexpectedSpecialEncoding(field)),
    }
}

/// Writes `len` using the smallest size class.
#[cfg(test)]
pub fn put_length(buf: &mut bytes::BytesMut, len: usize) {
    use bytes::BufMut;

    if len < 1 << 6 {
        buf.put_u8(len as u8);
    } else if len < 1 << 14 {
        buf.put_u8(0x40 | (len >> 8) as u8);
        buf.put_u8(len as u8);
    } else {
        buf.put_u8(0x80);
        buf.put_u32(len as u32);
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::{put_length, read_length, read_plain_length, LengthEncoding, SpecialEncoding};
    use crate::error::RdbError;

    #[test]
    fn size_classes_round_trip() {
        for n in [0, 63, 64, 16383, 16384, u32::MAX as usize] {
            let mut buf = BytesMut::new();
            put_length(&mut buf, n);
            let mut data = &buf[..];
            assert_eq!(read_length(&mut data).unwrap(), LengthEncoding::Length(n));
            assert!(data.is_empty(), "trailing bytes after {}", n);
        }
    }

    #[test]
    fn encoded_widths() {
        let widths = [(63, 1), (64, 2), (16383, 2), (16384, 5)];
        for (n, width) in widths {
            let mut buf = BytesMut::new();
            put_length(&mut buf, n);
            assert_eq!(buf.len(), width);
        }
    }

    #[test]
    fn thirty_two_bit_length_uses_following_bytes() {
        // Low bits of the tag byte are ignored
        let mut data = &[0xbf, 0x00, 0x00, 0x01, 0x00][..];
        assert_eq!(read_length(&mut data).unwrap(), LengthEncoding::Length(256));
    }

    #[test]
    fn special_encodings() {
        let expected = [
            (0xc0, SpecialEncoding::Int8),
            (0xc1, SpecialEncoding::Int16),
            (0xc2, SpecialEncoding::Int32),
            (0xc3, SpecialEncoding::Lzf),
        ];
        for (byte, special) in expected {
            let mut data = &[byte][..];
            assert_eq!(
                read_length(&mut data).unwrap(),
                LengthEncoding::Special(special)
            );
        }

        let mut data = &[0xc4][..];
        assert!(matches!(
            read_length(&mut data),
            Err(RdbError::UnsupportedEncoding(4))
        ));
    }

    #[test]
    fn truncated_lengths() {
        let cases: [&[u8]; 3] = [&[], &[0x41], &[0x80, 0x00, 0x00]];
        for case in cases {
            let mut data = case;
            assert!(
                matches!(read_length(&mut data), Err(RdbError::ShortRead { .. })),
                "{:?} should be a short read",
                case
            );
        }
    }

    #[test]
    fn plain_length_rejects_special() {
        let mut data = &[0xc0][..];
        assert!(matches!(
            read_plain_length(&mut data, "db index"),
            Err(RdbError::UnexpectedSpecialEncoding("db index"))
        ));
    }
}
