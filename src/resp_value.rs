use bytes::{BufMut, Bytes, BytesMut};

const TERMINATOR: &[u8] = b"\r\n";
/// Largest bulk string a client may declare.
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;
/// Requests are flat arrays; anything nested deeper than this is refused.
const MAX_DEPTH: usize = 32;

/// The RESP2 values this server reads and writes.
#[derive(Debug, PartialEq, Clone)]
pub enum RespValue {
    SimpleString(String),
    SimpleError(String),
    Integer(i64),
    BulkString(Bytes),
    NullBulkString,
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    fn tag(&self) -> u8 {
        match self {
            RespValue::SimpleString(_) => b'+',
            RespValue::SimpleError(_) => b'-',
            RespValue::Integer(_) => b':',
            RespValue::BulkString(_) => b'$',
            RespValue::NullBulkString => b'$',
            RespValue::Array(_) => b'*',
        }
    }

    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u8(self.tag());
        match self {
            RespValue::SimpleString(s) | RespValue::SimpleError(s) => {
                buf.put(s.as_bytes());
                buf.put(TERMINATOR);
            }
            RespValue::Integer(n) => {
                buf.put(n.to_string().as_bytes());
                buf.put(TERMINATOR);
            }
            RespValue::BulkString(b) => {
                buf.put(b.len().to_string().as_bytes());
                buf.put(TERMINATOR);
                buf.put(&b[..]);
                buf.put(TERMINATOR);
            }
            RespValue::NullBulkString => {
                buf.put(&b"-1"[..]);
                buf.put(TERMINATOR);
            }
            RespValue::Array(elements) => {
                buf.put(elements.len().to_string().as_bytes());
                buf.put(TERMINATOR);
                for e in elements.iter() {
                    e.serialize(buf);
                }
            }
        }
    }

    /// Parses one value from the front of `data`, returning it with the
    /// number of bytes consumed, or `None` if the frame is not complete yet.
    pub fn deserialize(data: &[u8]) -> anyhow::Result<Option<(Self, usize)>> {
        Self::deserialize_at_depth(data, 0)
    }

    fn deserialize_at_depth(data: &[u8], depth: usize) -> anyhow::Result<Option<(Self, usize)>> {
        let Some(&tag) = data.first() else {
            return Ok(None);
        };
        let Some(terminator_index) = find_terminator(data) else {
            return Ok(None);
        };
        let line = std::str::from_utf8(&data[1..terminator_index])?;
        let rest = terminator_index + 2;

        match tag {
            // Simple string: "+OK\r\n"
            b'+' => Ok(Some((RespValue::SimpleString(line.to_string()), rest))),
            // Simple error: "-ERR message\r\n"
            b'-' => Ok(Some((RespValue::SimpleError(line.to_string()), rest))),
            // Integer: ":[<+|->]<value>\r\n"
            b':' => match line.parse::<i64>() {
                Ok(n) => Ok(Some((RespValue::Integer(n), rest))),
                Err(_) => Err(anyhow::format_err!("invalid integer {:?}", line)),
            },
            // Bulk string: "$<length>\r\n<data>\r\n"
            b'$' => {
                if line == "-1" {
                    return Ok(Some((RespValue::NullBulkString, rest)));
                }
                let len = line
                    .parse::<usize>()
                    .map_err(|_| anyhow::format_err!("invalid bulk string length {:?}", line))?;
                if len > MAX_BULK_LEN {
                    anyhow::bail!("bulk string length {} exceeds {}", len, MAX_BULK_LEN);
                }
                let end = rest
                    .checked_add(len)
                    .ok_or_else(|| anyhow::format_err!("bulk string length {} overflows", len))?;
                if data.len() < end + TERMINATOR.len() {
                    return Ok(None);
                }
                if &data[end..end + TERMINATOR.len()] != TERMINATOR {
                    anyhow::bail!("unterminated bulk string");
                }
                Ok(Some((
                    RespValue::BulkString(Bytes::copy_from_slice(&data[rest..end])),
                    end + TERMINATOR.len(),
                )))
            }
            // Array: "*<number-of-elements>\r\n<element-1>...<element-n>"
            b'*' => {
                if depth >= MAX_DEPTH {
                    anyhow::bail!("arrays nested deeper than {}", MAX_DEPTH);
                }
                let num_elements = line
                    .parse::<usize>()
                    .map_err(|_| anyhow::format_err!("invalid array length {:?}", line))?;
                let mut consumed = rest;
                let mut elements = Vec::with_capacity(num_elements.min(64));
                for _ in 0..num_elements {
                    match RespValue::deserialize_at_depth(&data[consumed..], depth + 1)? {
                        Some((element, used)) => {
                            elements.push(element);
                            consumed += used;
                        }
                        None => return Ok(None),
                    }
                }
                Ok(Some((RespValue::Array(elements), consumed)))
            }
            tag => Err(anyhow::format_err!("invalid RESP tag {}", tag)),
        }
    }
}

/// Find `Some(index)` of the first occurence of b'\r\n' in the slice,
/// or `None` if the slice doesn't contain a terminator.
fn find_terminator(data: &[u8]) -> Option<usize> {
    data.windows(TERMINATOR.len())
        .position(|window| window == TERMINATOR)
}
