//! The FastCGI name-value pair format, used by PARAMS and GET-VALUES(-RESULT) records.
//!
//! Each pair is `nameLength valueLength name value`. A length below 0x80 takes one byte; anything
//! longer takes four big-endian bytes with the top bit set.

use crate::error::Error;

use byteorder::{ByteOrder, NetworkEndian};
use bytes::{Bytes, BytesMut};

pub type NameValuePairs = Vec<(Bytes, Bytes)>;

const LONG_FORM: u32 = 0x8000_0000;

fn truncated(what: &str) -> Error {
    Error::MalformedFrame(format!("name-value pair truncated in {}", what))
}

fn read_len(buf: &mut &[u8]) -> Result<usize, Error> {
    let first_byte = *buf.first().ok_or_else(|| truncated("length"))?;
    if first_byte < 0x80 {
        *buf = &buf[1..];
        Ok(first_byte as usize)
    } else {
        if buf.len() < 4 {
            return Err(truncated("long-form length"));
        }
        let len = NetworkEndian::read_u32(&buf[..4]) & !LONG_FORM;
        *buf = &buf[4..];
        Ok(len as usize)
    }
}

fn read_bytes(buf: &mut &[u8], len: usize, what: &str) -> Result<Bytes, Error> {
    if buf.len() < len {
        return Err(truncated(what));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(Bytes::copy_from_slice(head))
}

fn write_len(out: &mut BytesMut, len: usize) -> Result<(), Error> {
    if len < 0x80 {
        out.extend_from_slice(&[len as u8]);
    } else if len < LONG_FORM as usize {
        let mut bytes = [0u8; 4];
        NetworkEndian::write_u32(&mut bytes, len as u32 | LONG_FORM);
        out.extend_from_slice(&bytes);
    } else {
        return Err(Error::NameValueTooLong(len));
    }
    Ok(())
}

/// Decodes a complete name-value pair stream. Input that ends in the middle of a pair is an
/// error rather than a short read: callers only decode once the whole stream has arrived.
pub fn decode(mut buf: &[u8]) -> Result<NameValuePairs, Error> {
    let mut pairs = vec![];
    while !buf.is_empty() {
        let name_len = read_len(&mut buf)?;
        let value_len = read_len(&mut buf)?;
        let name = read_bytes(&mut buf, name_len, "name")?;
        let value = read_bytes(&mut buf, value_len, "value")?;
        trace!("param ({}, {})",
               String::from_utf8_lossy(&name),
               String::from_utf8_lossy(&value));
        pairs.push((name, value));
    }
    Ok(pairs)
}

pub fn encode<I, N, V>(pairs: I) -> Result<BytesMut, Error>
    where I: IntoIterator<Item = (N, V)>,
          N: AsRef<[u8]>,
          V: AsRef<[u8]>,
{
    let mut out = BytesMut::new();
    for (name, value) in pairs {
        let (name, value) = (name.as_ref(), value.as_ref());
        write_len(&mut out, name.len())?;
        write_len(&mut out, value.len())?;
        out.extend_from_slice(name);
        out.extend_from_slice(value);
    }
    Ok(out)
}
