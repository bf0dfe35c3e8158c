//! Protocol message decoding

use super::constants::{element, flags, section, HEADER_LEN, OP_MSG};
use super::document::{Bson, Document};
use super::message::OpMsg;
use bytes::BytesMut;
use std::io;

/// Maximum message length, matching the server's default `maxMessageSizeBytes`.
///
/// Any message whose length field exceeds this value is rejected before allocation
/// to prevent denial-of-service via crafted length headers.
const MAX_MESSAGE_LENGTH: usize = 48_000_000;

/// Nesting limit for embedded documents and arrays
const MAX_DEPTH: usize = 100;

/// Decode an OP_MSG frame from the front of `data` without consuming it.
///
/// # Returns
/// `Ok((msg, consumed))` - Message and number of bytes consumed
/// `Err(e)` with `UnexpectedEof` - frame is incomplete, read more and retry
/// `Err(e)` with any other kind - frame is invalid
pub fn decode_message(data: &mut BytesMut) -> io::Result<(OpMsg, usize)> {
    if data.len() < 4 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "incomplete message header",
        ));
    }

    let len = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if len < 0 || (len as usize) < HEADER_LEN + 5 {
        return Err(invalid(format!("invalid message length {}", len)));
    }
    let len = len as usize;

    if len > MAX_MESSAGE_LENGTH {
        return Err(invalid(format!(
            "message length {} exceeds maximum allowed {}",
            len, MAX_MESSAGE_LENGTH
        )));
    }

    if data.len() < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "incomplete message body",
        ));
    }

    let frame = &data[..len];
    let request_id = read_i32(frame, 4)?;
    let response_to = read_i32(frame, 8)?;
    let op_code = read_i32(frame, 12)?;
    if op_code != OP_MSG {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("unsupported opcode: {}", op_code),
        ));
    }

    let flag_bits = read_i32(frame, HEADER_LEN)? as u32;
    let mut end = len;
    if flag_bits & flags::CHECKSUM_PRESENT != 0 {
        // Trailing CRC-32C; integrity is already covered by TLS
        end = end
            .checked_sub(4)
            .ok_or_else(|| invalid("checksum flag set on a truncated frame"))?;
    }

    let mut offset = HEADER_LEN + 4;
    let mut body = None;
    while offset < end {
        let kind = frame[offset];
        offset += 1;
        match kind {
            section::BODY => {
                if body.is_some() {
                    return Err(invalid("more than one body section"));
                }
                let (doc, used) = decode_document(&frame[offset..end])?;
                offset += used;
                body = Some(doc);
            }
            section::DOCUMENT_SEQUENCE => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "document sequence sections are not supported",
                ));
            }
            other => return Err(invalid(format!("unknown section kind: {}", other))),
        }
    }

    let body = body.ok_or_else(|| invalid("message has no body section"))?;

    Ok((
        OpMsg {
            request_id,
            response_to,
            flags: flag_bits,
            body,
        },
        len,
    ))
}

/// Decode one BSON document from the front of `data`.
///
/// Returns the document and the number of bytes it occupied. A short buffer is
/// `InvalidData` here: documents are only decoded from complete frames.
pub fn decode_document(data: &[u8]) -> io::Result<(Document, usize)> {
    decode_document_at_depth(data, 0)
}

fn decode_document_at_depth(data: &[u8], depth: usize) -> io::Result<(Document, usize)> {
    if depth > MAX_DEPTH {
        return Err(invalid("document nesting too deep"));
    }
    let len = read_i32(data, 0)?;
    if len < 5 || len as usize > data.len() {
        return Err(invalid(format!("invalid document length {}", len)));
    }
    let len = len as usize;
    if data[len - 1] != 0 {
        return Err(invalid("document is missing its terminator"));
    }

    let body = &data[..len - 1];
    let mut doc = Document::new();
    let mut offset = 4;

    while offset < body.len() {
        let tag = body[offset];
        offset += 1;
        let (key, used) = read_cstring(body, offset)?;
        offset += used;
        let (value, used) = decode_value(tag, &body[offset..], depth)?;
        offset += used;
        doc.insert(key, value);
    }

    Ok((doc, len))
}

fn decode_value(tag: u8, data: &[u8], depth: usize) -> io::Result<(Bson, usize)> {
    let value = match tag {
        element::DOUBLE => (Bson::Double(f64::from_le_bytes(fixed::<8>(data)?)), 8),
        element::STRING => {
            let (s, used) = read_string(data)?;
            (Bson::String(s), used)
        }
        element::DOCUMENT => {
            let (doc, used) = decode_document_at_depth(data, depth + 1)?;
            (Bson::Document(doc), used)
        }
        element::ARRAY => {
            let (doc, used) = decode_document_at_depth(data, depth + 1)?;
            let items = doc.iter().map(|(_, v)| v.clone()).collect();
            (Bson::Array(items), used)
        }
        element::BINARY => {
            let n = read_i32(data, 0)?;
            if n < 0 {
                return Err(invalid("negative binary length"));
            }
            let n = n as usize;
            let subtype = *data.get(4).ok_or_else(|| invalid("truncated binary"))?;
            let bytes = data
                .get(5..5 + n)
                .ok_or_else(|| invalid("truncated binary"))?
                .to_vec();
            (Bson::Binary { subtype, bytes }, 5 + n)
        }
        element::OBJECT_ID => (Bson::ObjectId(fixed::<12>(data)?), 12),
        element::BOOLEAN => match data.first() {
            Some(0) => (Bson::Boolean(false), 1),
            Some(1) => (Bson::Boolean(true), 1),
            _ => return Err(invalid("invalid boolean")),
        },
        element::DATETIME => (Bson::DateTime(i64::from_le_bytes(fixed::<8>(data)?)), 8),
        element::NULL => (Bson::Null, 0),
        element::INT32 => (Bson::Int32(read_i32(data, 0)?), 4),
        element::TIMESTAMP => (Bson::Timestamp(u64::from_le_bytes(fixed::<8>(data)?)), 8),
        element::INT64 => (Bson::Int64(i64::from_le_bytes(fixed::<8>(data)?)), 8),
        element::DECIMAL128 => (Bson::Decimal128(fixed::<16>(data)?), 16),
        element::MIN_KEY => (Bson::MinKey, 0),
        element::MAX_KEY => (Bson::MaxKey, 0),
        other => return Err(invalid(format!("unsupported BSON element type: 0x{:02X}", other))),
    };
    Ok(value)
}

fn read_i32(data: &[u8], offset: usize) -> io::Result<i32> {
    let bytes = data
        .get(offset..offset + 4)
        .ok_or_else(|| invalid("truncated int32"))?;
    Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn fixed<const N: usize>(data: &[u8]) -> io::Result<[u8; N]> {
    data.get(..N)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| invalid("truncated fixed-width value"))
}

fn read_cstring(data: &[u8], offset: usize) -> io::Result<(String, usize)> {
    let rest = data
        .get(offset..)
        .ok_or_else(|| invalid("truncated element key"))?;
    let end = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| invalid("missing null terminator in string"))?;
    let s = std::str::from_utf8(&rest[..end])
        .map_err(|_| invalid("element key is not UTF-8"))?
        .to_string();
    Ok((s, end + 1))
}

fn read_string(data: &[u8]) -> io::Result<(String, usize)> {
    let n = read_i32(data, 0)?;
    if n < 1 {
        return Err(invalid("invalid string length"));
    }
    let n = n as usize;
    let raw = data
        .get(4..4 + n)
        .ok_or_else(|| invalid("truncated string"))?;
    if raw[n - 1] != 0 {
        return Err(invalid("string is missing its terminator"));
    }
    let s = std::str::from_utf8(&raw[..n - 1])
        .map_err(|_| invalid("string is not UTF-8"))?
        .to_string();
    Ok((s, 4 + n))
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}
