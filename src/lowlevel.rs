use crate::s11n::*;

use bytes::{Buf, BufMut, BytesMut};
use enum_primitive::FromPrimitive;
use tokio_util::codec::{Decoder, Encoder};

use std::io;

/// One FastCGI record as it appears on the wire: header fields plus content. Padding is dropped
/// on decode and regenerated on encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastcgiFrame {
    pub version: u8,
    /// Raw type byte; see `FastcgiFrame::record_type`.
    pub record_type: u8,
    pub request_id: u16,
    pub content: BytesMut,
    pub padding_length: u8,
}

/// Padding that keeps records 8-byte aligned. Always adds at least one byte, even when the
/// content is already aligned.
pub fn padding_for(content_len: usize) -> u8 {
    (8 - (content_len % 8)) as u8
}

impl FastcgiFrame {
    pub fn new<C: Into<BytesMut>>(record_type: RecordType, request_id: u16, content: C)
        -> FastcgiFrame
    {
        let content = content.into();
        FastcgiFrame {
            version: FASTCGI_VERSION,
            record_type: record_type as u8,
            request_id,
            padding_length: padding_for(content.len()),
            content,
        }
    }

    pub fn empty(record_type: RecordType, request_id: u16) -> FastcgiFrame {
        FastcgiFrame::new(record_type, request_id, BytesMut::new())
    }

    /// The decoded record type, or `None` for a type byte this crate has never heard of.
    pub fn record_type(&self) -> Option<RecordType> {
        RecordType::from_u8(self.record_type)
    }

    /// Bytes this frame occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.content.len() + self.padding_length as usize
    }

    /// Takes one complete frame off the front of `buf`.
    ///
    /// Returns `None` if the header, content or padding hasn't fully arrived yet, in which case
    /// `buf` is left untouched and the caller should retry once more bytes are buffered.
    pub fn parse(buf: &mut BytesMut) -> Option<FastcgiFrame> {
        let header = match FastcgiRecordHeader::read(buf) {
            Some(header) => header,
            None => {
                trace!("insufficient buffer for header");
                return None;
            }
        };

        let record_len = header.record_len();
        if buf.len() < record_len {
            trace!("insufficient buffer for record: have {}, need {}", buf.len(), record_len);
            return None;
        }

        let mut record = buf.split_to(record_len);
        record.advance(HEADER_LEN);
        record.truncate(header.content_length as usize);

        trace!("request id: {}; record type: {}, {} bytes of content",
               header.request_id, header.record_type, header.content_length);

        Some(FastcgiFrame {
            version: header.version,
            record_type: header.record_type,
            request_id: header.request_id,
            content: record,
            padding_length: header.padding_length,
        })
    }

    /// Appends header, content and zero padding to `buf`.
    pub fn serialize(&self, buf: &mut BytesMut) -> io::Result<()> {
        if self.content.len() > MAX_CONTENT_LEN {
            let msg = format!("record type {} is too long: {}",
                              self.record_type, self.content.len());
            error!("{}", msg);
            return Err(io::Error::new(io::ErrorKind::InvalidInput, msg));
        }

        let header = FastcgiRecordHeader {
            version: self.version,
            record_type: self.record_type,
            request_id: self.request_id,
            content_length: self.content.len() as u16,
            padding_length: self.padding_length,
        };

        buf.reserve(self.encoded_len());
        buf.extend_from_slice(&header.to_bytes());
        buf.extend_from_slice(&self.content);
        buf.put_bytes(0, self.padding_length as usize);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FastcgiFrameCodec;

impl Decoder for FastcgiFrameCodec {
    type Item = FastcgiFrame;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<FastcgiFrame>, Self::Error> {
        trace!("buffer: {} bytes", buf.len());
        Ok(FastcgiFrame::parse(buf))
    }
}

impl Encoder<FastcgiFrame> for FastcgiFrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: FastcgiFrame, buf: &mut BytesMut) -> Result<(), Self::Error> {
        frame.serialize(buf)
    }
}
