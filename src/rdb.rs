use bytes::{Buf, Bytes};
use thiserror::Error;

use crate::{
    error::RdbError,
    length::{ensure, read_plain_length},
    string::{read_string, skip_string},
};

pub const MAGIC: &[u8] = b"REDIS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpCode {
    SlotInfo = 0xF4,
    Function2 = 0xF5,
    FunctionPreGa = 0xF6,
    ModuleAuxiliary = 0xF7,
    Idle = 0xF8,
    Frequency = 0xF9,
    Auxiliary = 0xFA,
    ResizeDatabase = 0xFB,
    ExpireTimeMillis = 0xFC,
    ExpireTimeSecs = 0xFD,
    SelectDatabase = 0xFE,
    EndOfFile = 0xFF,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String = 0,
    List = 1,
    Set = 2,
    SortedSet = 3,
    Hash = 4,
    SortedSet2 = 5,
    Module = 6,
    Module2 = 7,
    Zipmap = 9,
    Ziplist = 10,
    Intset = 11,
    SortedSetInZiplist = 12,
    HashmapInZiplist = 13,
    ListInQuicklist = 14,
    StreamListpacks = 15,
    HashInListpack = 16,
    SortedSetInListpack = 17,
    ListInQuicklist2 = 18,
    StreamListpacks2 = 19,
    SetInListpack = 20,
    StreamListpacks3 = 21,
}

/// A control byte: either an opcode or the type of the value record that
/// follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Op(OpCode),
    Value(ValueType),
}

impl TryFrom<u8> for Tag {
    type Error = RdbError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let tag = match value {
            0xF4 => Tag::Op(OpCode::SlotInfo),
            0xF5 => Tag::Op(OpCode::Function2),
            0xF6 => Tag::Op(OpCode::FunctionPreGa),
            0xF7 => Tag::Op(OpCode::ModuleAuxiliary),
            0xF8 => Tag::Op(OpCode::Idle),
            0xF9 => Tag::Op(OpCode::Frequency),
            0xFA => Tag::Op(OpCode::Auxiliary),
            0xFB => Tag::Op(OpCode::ResizeDatabase),
            0xFC => Tag::Op(OpCode::ExpireTimeMillis),
            0xFD => Tag::Op(OpCode::ExpireTimeSecs),
            0xFE => Tag::Op(OpCode::SelectDatabase),
            0xFF => Tag::Op(OpCode::EndOfFile),
            0 => Tag::Value(ValueType::String),
            1 => Tag::Value(ValueType::List),
            2 => Tag::Value(ValueType::Set),
            3 => Tag::Value(ValueType::SortedSet),
            4 => Tag::Value(ValueType::Hash),
            5 => Tag::Value(ValueType::SortedSet2),
            6 => Tag::Value(ValueType::Module),
            7 => Tag::Value(ValueType::Module2),
            9 => Tag::Value(ValueType::Zipmap),
            10 => Tag::Value(ValueType::Ziplist),
            11 => Tag::Value(ValueType::Intset),
            12 => Tag::Value(ValueType::SortedSetInZiplist),
            13 => Tag::Value(ValueType::HashmapInZiplist),
            14 => Tag::Value(ValueType::ListInQuicklist),
            15 => Tag::Value(ValueType::StreamListpacks),
            16 => Tag::Value(ValueType::HashInListpack),
            17 => Tag::Value(ValueType::SortedSetInListpack),
            18 => Tag::Value(ValueType::ListInQuicklist2),
            19 => Tag::Value(ValueType::StreamListpacks2),
            20 => Tag::Value(ValueType::SetInListpack),
            21 => Tag::Value(ValueType::StreamListpacks3),
            other => return Err(RdbError::UnknownOpcode(other)),
        };
        Ok(tag)
    }
}

/// One decoded unit of the snapshot body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Aux {
        key: Bytes,
        value: Bytes,
    },
    SelectDb(usize),
    ResizeDb {
        db_size: usize,
        expires_size: usize,
    },
    String {
        key: String,
        value: Bytes,
        /// Absolute unix time in milliseconds
        expires_at_ms: Option<u64>,
    },
    /// A non-string value whose bytes were consumed but not kept
    Skipped {
        key: String,
        value_type: ValueType,
    },
}

/// Decoding stopped before the end-of-file opcode. `records` holds
/// everything decoded up to that point.
#[derive(Debug, Error)]
#[error("snapshot decoding stopped after {} records", .records.len())]
pub struct PartialSnapshot {
    pub records: Vec<Record>,
    #[source]
    pub error: RdbError,
}

/// Pull-based decoder over a snapshot body (the bytes after the header).
pub struct Decoder<B> {
    buf: B,
    pending_expiry_ms: Option<u64>,
    finished: bool,
}

impl<B: Buf> Decoder<B> {
    pub fn new(buf: B) -> Self {
        Decoder {
            buf,
            pending_expiry_ms: None,
            finished: false,
        }
    }

    /// Returns the next record, or `None` once the end-of-file opcode has
    /// been consumed.
    pub fn next_record(&mut self) -> Result<Option<Record>, RdbError> {
        while !self.finished {
            ensure(&self.buf, 1, "opcode")?;
            match Tag::try_from(self.buf.get_u8())? {
                Tag::Op(op) => {
                    if let Some(record) = self.read_opcode(op)? {
                        return Ok(Some(record));
                    }
                }
                Tag::Value(value_type) => return self.read_value(value_type).map(Some),
            }
        }
        Ok(None)
    }

    fn read_opcode(&mut self, op: OpCode) -> Result<Option<Record>, RdbError> {
        match op {
            OpCode::EndOfFile => {
                // Checksum verification is not implemented; a missing or
                // short checksum still ends the file cleanly.
                if self.buf.remaining() >= 8 {
                    let checksum = self.buf.get_u64_le();
                    tracing::debug!("End of file, checksum {:#018x}", checksum);
                    if self.buf.has_remaining() {
                        tracing::warn!(
                            "{} trailing bytes after end of file",
                            self.buf.remaining()
                        );
                    }
                } else {
                    tracing::debug!(
                        "End of file without a full checksum ({} bytes)",
                        self.buf.remaining()
                    );
                }
                if let Some(expiry) = self.pending_expiry_ms.take() {
                    tracing::warn!("Expiry {} not followed by any key", expiry);
                }
                self.finished = true;
                Ok(None)
            }
            OpCode::SelectDatabase => {
                let index = read_plain_length(&mut self.buf, "database index")?;
                tracing::debug!("Select database: {}", index);
                Ok(Some(Record::SelectDb(index)))
            }
            OpCode::ResizeDatabase => {
                let db_size = read_plain_length(&mut self.buf, "hash table size")?;
                let expires_size = read_plain_length(&mut self.buf, "expiry table size")?;
                tracing::debug!(
                    "Resize database: db hash table size {}, expiry hash table size {}",
                    db_size,
                    expires_size
                );
                Ok(Some(Record::ResizeDb {
                    db_size,
                    expires_size,
                }))
            }
            OpCode::Auxiliary => {
                let key = read_string(&mut self.buf)?;
                let value = read_string(&mut self.buf)?;
                tracing::debug!(
                    "Aux field: {}, {}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&value)
                );
                Ok(Some(Record::Aux { key, value }))
            }
            OpCode::ExpireTimeMillis => {
                ensure(&self.buf, 8, "millisecond expiry")?;
                self.pending_expiry_ms = Some(self.buf.get_u64_le());
                Ok(None)
            }
            OpCode::ExpireTimeSecs => {
                ensure(&self.buf, 4, "second expiry")?;
                self.pending_expiry_ms = Some(u64::from(self.buf.get_u32()) * 1000);
                Ok(None)
            }
            OpCode::Idle => {
                read_plain_length(&mut self.buf, "idle time")?;
                Ok(None)
            }
            OpCode::Frequency => {
                ensure(&self.buf, 1, "access frequency")?;
                self.buf.advance(1);
                Ok(None)
            }
            OpCode::SlotInfo => {
                for field in ["slot id", "slot size", "slot expires size"] {
                    read_plain_length(&mut self.buf, field)?;
                }
                Ok(None)
            }
            OpCode::Function2 => {
                skip_string(&mut self.buf)?;
                Ok(None)
            }
            OpCode::FunctionPreGa | OpCode::ModuleAuxiliary => {
                Err(RdbError::UnsupportedOpcode(op as u8))
            }
        }
    }

    fn read_value(&mut self, value_type: ValueType) -> Result<Record, RdbError> {
        let key = String::from_utf8_lossy(&read_string(&mut self.buf)?).into_owned();
        let expires_at_ms = self.pending_expiry_ms.take();

        if value_type == ValueType::String {
            let value = read_string(&mut self.buf)?;
            tracing::debug!("Database key/value pair: {}, {} bytes", key, value.len());
            return Ok(Record::String {
                key,
                value,
                expires_at_ms,
            });
        }

        self.skip_value(value_type)?;
        tracing::debug!("Skipped {:?} value for key {}", value_type, key);
        Ok(Record::Skipped { key, value_type })
    }

    /// Consumes a non-string value using its own length fields. Every loop
    /// iteration consumes at least one byte, so a bogus count ends in a
    /// short read rather than a long spin.
    fn skip_value(&mut self, value_type: ValueType) -> Result<(), RdbError> {
        let buf = &mut self.buf;
        match value_type {
            ValueType::String
            | ValueType::Zipmap
            | ValueType::Ziplist
            | ValueType::Intset
            | ValueType::SortedSetInZiplist
            | ValueType::HashmapInZiplist
            | ValueType::HashInListpack
            | ValueType::SortedSetInListpack
            | ValueType::SetInListpack => skip_string(buf)?,
            ValueType::List | ValueType::Set | ValueType::ListInQuicklist => {
                for _ in 0..read_plain_length(buf, "element count")? {
                    skip_string(buf)?;
                }
            }
            ValueType::Hash => {
                for _ in 0..read_plain_length(buf, "field count")? {
                    skip_string(buf)?;
                    skip_string(buf)?;
                }
            }
            ValueType::SortedSet => {
                for _ in 0..read_plain_length(buf, "member count")? {
                    skip_string(buf)?;
                    skip_ascii_score(buf)?;
                }
            }
            ValueType::SortedSet2 => {
                for _ in 0..read_plain_length(buf, "member count")? {
                    skip_string(buf)?;
                    ensure(buf, 8, "binary score")?;
                    buf.advance(8);
                }
            }
            ValueType::ListInQuicklist2 => {
                for _ in 0..read_plain_length(buf, "node count")? {
                    read_plain_length(buf, "node container")?;
                    skip_string(buf)?;
                }
            }
            ValueType::Module
            | ValueType::Module2
            | ValueType::StreamListpacks
            | ValueType::StreamListpacks2
            | ValueType::StreamListpacks3 => {
                return Err(RdbError::UnsupportedValueType(value_type))
            }
        }
        Ok(())
    }
}

/// Scores in the old sorted set encoding are a length byte followed by ASCII,
/// except for the three special lengths that stand for NaN and infinities.
fn skip_ascii_score<B: Buf>(buf: &mut B) -> Result<(), RdbError> {
    ensure(buf, 1, "score length")?;
    match buf.get_u8() {
        253..=255 => Ok(()),
        len => {
            ensure(buf, len as usize, "score")?;
            buf.advance(len as usize);
            Ok(())
        }
    }
}

/// Validates the `REDIS` magic and returns the format version.
pub fn read_header<B: Buf>(buf: &mut B) -> Result<u16, RdbError> {
    ensure(buf, 9, "header")?;
    let mut header = [0; 9];
    buf.copy_to_slice(&mut header);

    if &header[0..5] != MAGIC {
        return Err(RdbError::InvalidHeader("invalid magic string"));
    }
    std::str::from_utf8(&header[5..9])
        .ok()
        .filter(|digits| digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse::<u16>().ok())
        .ok_or(RdbError::InvalidHeader("invalid version"))
}

/// Decodes a snapshot body positioned after the header.
pub fn parse_snapshot<B: Buf>(buf: B) -> Result<Vec<Record>, PartialSnapshot> {
    let mut decoder = Decoder::new(buf);
    let mut records = Vec::new();
    loop {
        match decoder.next_record() {
            Ok(Some(record)) => records.push(record),
            Ok(None) => return Ok(records),
            Err(error) => return Err(PartialSnapshot { records, error }),
        }
    }
}

/// Decodes a whole snapshot file. The header is validated when present;
/// data without the magic is decoded from its first byte.
pub fn decode_file(data: &[u8]) -> Result<Vec<Record>, PartialSnapshot> {
    let mut body = data;
    if body.starts_with(MAGIC) {
        match read_header(&mut body) {
            Ok(version) => tracing::debug!("File version: {}", version),
            Err(error) => {
                return Err(PartialSnapshot {
                    records: Vec::new(),
                    error,
                })
            }
        }
    }
    parse_snapshot(body)
}
