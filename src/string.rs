use bytes::{Buf, Bytes};

use crate::{
    error::RdbError,
    length::{ensure, read_length, read_plain_length, LengthEncoding, SpecialEncoding},
};

/// Reads a string in any of its encodings. Integer encodings are rendered as
/// decimal text, the way clients would have written them.
pub fn read_string<B: Buf>(buf: &mut B) -> Result<Bytes, RdbError> {
    match read_length(buf)? {
        LengthEncoding::Length(len) => {
            ensure(buf, len, "string body")?;
            Ok(buf.copy_to_bytes(len))
        }
        LengthEncoding::Special(SpecialEncoding::Int8) => {
            ensure(buf, 1, "int8 string")?;
            Ok(Bytes::from(buf.get_i8().to_string()))
        }
        LengthEncoding::Special(SpecialEncoding::Int16) => {
            ensure(buf, 2, "int16 string")?;
            Ok(Bytes::from(buf.get_i16_le().to_string()))
        }
        LengthEncoding::Special(SpecialEncoding::Int32) => {
            ensure(buf, 4, "int32 string")?;
            Ok(Bytes::from(buf.get_i32_le().to_string()))
        }
        LengthEncoding::Special(SpecialEncoding::Lzf) => {
            let compressed_len = read_plain_length(buf, "compressed length")?;
            let len = read_plain_length(buf, "uncompressed length")?;
            ensure(buf, compressed_len, "compressed string body")?;
            let compressed = buf.copy_to_bytes(compressed_len);
            lzf_decompress(&compressed, len)
        }
    }
}

/// Consumes a string without materializing it.
pub fn skip_string<B: Buf>(buf: &mut B) -> Result<(), RdbError> {
    let len = match read_length(buf)? {
        LengthEncoding::Length(len) => len,
        LengthEncoding::Special(SpecialEncoding::Int8) => 1,
        LengthEncoding::Special(SpecialEncoding::Int16) => 2,
        LengthEncoding::Special(SpecialEncoding::Int32) => 4,
        LengthEncoding::Special(SpecialEncoding::Lzf) => {
            let compressed_len = read_plain_length(buf, "compressed length")?;
            read_plain_length(buf, "uncompressed length")?;
            compressed_len
        }
    };
    ensure(buf, len, "skipped string")?;
    buf.advance(len);
    Ok(())
}

fn lzf_decompress(input: &[u8], expected_len: usize) -> Result<Bytes, RdbError> {
    let corrupt = RdbError::CorruptCompressedString;
    let mut output = Vec::with_capacity(expected_len.min(input.len().saturating_mul(4)));
    let mut i = 0;

    while i < input.len() {
        let ctrl = input[i] as usize;
        i += 1;

        if ctrl < 1 << 5 {
            // Literal run of ctrl + 1 bytes
            let run = input
                .get(i..i + ctrl + 1)
                .ok_or(corrupt("literal run past end of input"))?;
            output.extend_from_slice(run);
            i += ctrl + 1;
        } else {
            // Back reference: 3 bits of length, 13 bits of offset
            let mut len = ctrl >> 5;
            if len == 7 {
                len += *input.get(i).ok_or(corrupt("missing extended length"))? as usize;
                i += 1;
            }
            let low = *input.get(i).ok_or(corrupt("missing back reference offset"))? as usize;
            i += 1;

            let distance = ((ctrl & 0x1f) << 8) + low + 1;
            if distance > output.len() {
                return Err(corrupt("back reference before start of output"));
            }
            let start = output.len() - distance;
            for k in 0..len + 2 {
                let byte = output[start + k];
                output.push(byte);
            }
        }

        if output.len() > expected_len {
            return Err(corrupt("output longer than declared length"));
        }
    }

    if output.len() != expected_len {
        return Err(corrupt("output shorter than declared length"));
    }
    Ok(Bytes::from(output))
}
