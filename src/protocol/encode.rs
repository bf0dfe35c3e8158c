//! Protocol message encoding

use super::constants::{element, section, HEADER_LEN, OP_MSG};
use super::document::{Bson, Document};
use super::message::OpMsg;
use bytes::{BufMut, BytesMut};
use std::io;

/// Encode an OP_MSG frame into bytes
pub fn encode_message(msg: &OpMsg) -> io::Result<BytesMut> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + 64);

    // Reserve space for length (will be filled at end)
    buf.put_i32_le(0);
    buf.put_i32_le(msg.request_id);
    buf.put_i32_le(msg.response_to);
    buf.put_i32_le(OP_MSG);

    // Checksums are never produced; clear the bit so peers do not look for one
    buf.put_u32_le(msg.flags & !super::constants::flags::CHECKSUM_PRESENT);

    buf.put_u8(section::BODY);
    encode_document(&mut buf, &msg.body)?;

    let len = checked_len(buf.len())?;
    buf[0..4].copy_from_slice(&len.to_le_bytes());

    Ok(buf)
}

/// Append a BSON document to `buf`
pub fn encode_document(buf: &mut BytesMut, doc: &Document) -> io::Result<()> {
    let len_pos = buf.len();
    buf.put_i32_le(0);

    for (key, value) in doc.iter() {
        encode_element(buf, key, value)?;
    }

    // Document terminator
    buf.put_u8(0);

    let len = checked_len(buf.len() - len_pos)?;
    buf[len_pos..len_pos + 4].copy_from_slice(&len.to_le_bytes());

    Ok(())
}

fn encode_element(buf: &mut BytesMut, key: &str, value: &Bson) -> io::Result<()> {
    match value {
        Bson::Double(v) => {
            put_header(buf, element::DOUBLE, key)?;
            buf.put_f64_le(*v);
        }
        Bson::String(s) => {
            put_header(buf, element::STRING, key)?;
            put_string(buf, s)?;
        }
        Bson::Document(d) => {
            put_header(buf, element::DOCUMENT, key)?;
            encode_document(buf, d)?;
        }
        Bson::Array(items) => {
            put_header(buf, element::ARRAY, key)?;
            // Arrays are documents keyed "0", "1", ...
            let len_pos = buf.len();
            buf.put_i32_le(0);
            for (i, item) in items.iter().enumerate() {
                encode_element(buf, &i.to_string(), item)?;
            }
            buf.put_u8(0);
            let len = checked_len(buf.len() - len_pos)?;
            buf[len_pos..len_pos + 4].copy_from_slice(&len.to_le_bytes());
        }
        Bson::Binary { subtype, bytes } => {
            put_header(buf, element::BINARY, key)?;
            buf.put_i32_le(checked_len(bytes.len())?);
            buf.put_u8(*subtype);
            buf.put_slice(bytes);
        }
        Bson::ObjectId(oid) => {
            put_header(buf, element::OBJECT_ID, key)?;
            buf.put_slice(oid);
        }
        Bson::Boolean(b) => {
            put_header(buf, element::BOOLEAN, key)?;
            buf.put_u8(u8::from(*b));
        }
        Bson::DateTime(ms) => {
            put_header(buf, element::DATETIME, key)?;
            buf.put_i64_le(*ms);
        }
        Bson::Null => put_header(buf, element::NULL, key)?,
        Bson::Int32(v) => {
            put_header(buf, element::INT32, key)?;
            buf.put_i32_le(*v);
        }
        Bson::Timestamp(ts) => {
            put_header(buf, element::TIMESTAMP, key)?;
            buf.put_u64_le(*ts);
        }
        Bson::Int64(v) => {
            put_header(buf, element::INT64, key)?;
            buf.put_i64_le(*v);
        }
        Bson::Decimal128(raw) => {
            put_header(buf, element::DECIMAL128, key)?;
            buf.put_slice(raw);
        }
        Bson::MinKey => put_header(buf, element::MIN_KEY, key)?,
        Bson::MaxKey => put_header(buf, element::MAX_KEY, key)?,
    }
    Ok(())
}

fn put_header(buf: &mut BytesMut, tag: u8, key: &str) -> io::Result<()> {
    buf.put_u8(tag);
    put_cstring(buf, key)
}

fn put_cstring(buf: &mut BytesMut, s: &str) -> io::Result<()> {
    if s.as_bytes().contains(&0) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "BSON key contains a NUL byte",
        ));
    }
    buf.put(s.as_bytes());
    buf.put_u8(0);
    Ok(())
}

fn put_string(buf: &mut BytesMut, s: &str) -> io::Result<()> {
    // Length includes the trailing NUL
    buf.put_i32_le(checked_len(s.len() + 1)?);
    buf.put(s.as_bytes());
    buf.put_u8(0);
    Ok(())
}

fn checked_len(len: usize) -> io::Result<i32> {
    i32::try_from(len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("length {} does not fit in a BSON int32", len),
        )
    })
}
