use std::path::PathBuf;

use thiserror::Error;

use crate::rdb::ValueType;

/// Failures while decoding a snapshot byte stream.
#[derive(Debug, Error)]
pub enum RdbError {
    #[error("short read: {field} needs {needed} bytes but only {remaining} remain")]
    ShortRead {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("unsupported special string encoding {0}")]
    UnsupportedEncoding(u8),

    #[error("expected a plain length for {0}, found a special encoding")]
    UnexpectedSpecialEncoding(&'static str),

    #[error("unsupported value type {0:?}")]
    UnsupportedValueType(ValueType),

    #[error("unsupported opcode {0:#04x}")]
    UnsupportedOpcode(u8),

    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    #[error("corrupt compressed string: {0}")]
    CorruptCompressedString(&'static str),
}

/// Failures locating or reading the snapshot file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("snapshot file {0:?} not found")]
    FileNotFound(PathBuf),

    #[error("snapshot file {path:?} is unreadable: {source}")]
    FileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Malformed command invocations. The display text is sent to the client
/// verbatim as a RESP error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpireTime(&'static str),

    #[error("ERR Protocol error: expected an array of bulk strings")]
    Protocol,
}
