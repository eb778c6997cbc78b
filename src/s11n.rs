//! s11n == serialization. Wire constants and the fixed-size FastCGI bodies.

use byteorder::{ByteOrder, NetworkEndian};

pub const FASTCGI_VERSION: u8 = 1;

/// Length of every record header.
pub const HEADER_LEN: usize = 8;

/// Largest content a single record can carry.
pub const MAX_CONTENT_LEN: usize = 0xFFFF;

/// Request id 0 is the management channel (GET-VALUES and friends).
pub const NULL_REQUEST_ID: u16 = 0;

pub const FLAG_KEEP_CONNECTION: u8 = 1;

// Variables for the RecordType::GetValues and GetValuesResult records.
pub const FCGI_MAX_CONNS: &str = "FCGI_MAX_CONNS";
pub const FCGI_MAX_REQS: &str = "FCGI_MAX_REQS";
pub const FCGI_MPXS_CONNS: &str = "FCGI_MPXS_CONNS";

// END-REQUEST application statuses.
pub const APP_STATUS_OK: u32 = 0;
pub const APP_STATUS_ERROR: u32 = 1;

enum_from_primitive! {
    #[repr(u8)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum RecordType {
        BeginRequest = 1,
        AbortRequest = 2,
        EndRequest = 3,
        Params = 4,
        Stdin = 5,
        Stdout = 6,
        Stderr = 7,
        Data = 8,
        GetValues = 9,
        GetValuesResult = 10,
        UnknownType = 11,
    }
}

enum_from_primitive! {
    #[repr(u16)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Role {
        Responder = 1,
        Authorizer = 2,
        Filter = 3,
    }
}

enum_from_primitive! {
    #[repr(u8)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ProtocolStatus {
        RequestComplete = 0,
        CantMultiplexConnections = 1,
        Overloaded = 2,
        UnknownRole = 3,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FastcgiRecordHeader {
    pub version: u8,
    pub record_type: u8,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
}

impl FastcgiRecordHeader {
    /// Reads a header from the first `HEADER_LEN` bytes of `bytes`.
    pub fn read(bytes: &[u8]) -> Option<FastcgiRecordHeader> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        Some(FastcgiRecordHeader {
            version: bytes[0],
            record_type: bytes[1],
            request_id: NetworkEndian::read_u16(&bytes[2..4]),
            content_length: NetworkEndian::read_u16(&bytes[4..6]),
            padding_length: bytes[6],
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.version;
        out[1] = self.record_type;
        NetworkEndian::write_u16(&mut out[2..4], self.request_id);
        NetworkEndian::write_u16(&mut out[4..6], self.content_length);
        out[6] = self.padding_length;
        // out[7] is reserved
        out
    }

    /// Total bytes occupied on the wire by the record this header starts.
    pub fn record_len(&self) -> usize {
        HEADER_LEN + self.content_length as usize + self.padding_length as usize
    }
}

/// Body of an FCGI_BEGIN_REQUEST record. The role is kept raw so that the
/// caller can report the value it didn't understand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BeginRequestBody {
    pub role: u16,
    pub flags: u8,
}

impl BeginRequestBody {
    /// role (2) + flags (1); the 5 reserved bytes are optional.
    pub const MIN_LEN: usize = 3;

    pub fn read(bytes: &[u8]) -> Option<BeginRequestBody> {
        if bytes.len() < Self::MIN_LEN {
            return None;
        }
        Some(BeginRequestBody {
            role: NetworkEndian::read_u16(&bytes[0..2]),
            flags: bytes[2],
        })
    }

    pub fn keep_connection(&self) -> bool {
        self.flags & FLAG_KEEP_CONNECTION != 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndRequestBody {
    pub app_status: u32,
    pub protocol_status: ProtocolStatus,
}

impl EndRequestBody {
    pub const LEN: usize = 8;

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        NetworkEndian::write_u32(&mut out[0..4], self.app_status);
        out[4] = self.protocol_status as u8;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enum_primitive::FromPrimitive;

    #[test]
    fn header_layout() {
        let header = FastcgiRecordHeader {
            version: FASTCGI_VERSION,
            record_type: RecordType::Stdout as u8,
            request_id: 0x0102,
            content_length: 0x0304,
            padding_length: 4,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes, [1, 6, 1, 2, 3, 4, 4, 0]);
        assert_eq!(FastcgiRecordHeader::read(&bytes), Some(header));
        assert_eq!(header.record_len(), 8 + 0x0304 + 4);
    }

    #[test]
    fn short_header() {
        assert_eq!(FastcgiRecordHeader::read(&[1, 1, 0, 1, 0, 8, 0]), None);
    }

    #[test]
    fn begin_request_flags() {
        let body = BeginRequestBody::read(&[0, 1, 1, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(Role::from_u16(body.role), Some(Role::Responder));
        assert!(body.keep_connection());

        let body = BeginRequestBody::read(&[0, 3, 0]).unwrap();
        assert_eq!(Role::from_u16(body.role), Some(Role::Filter));
        assert!(!body.keep_connection());

        assert_eq!(BeginRequestBody::read(&[0, 1]), None);
    }

    #[test]
    fn end_request_layout() {
        let body = EndRequestBody {
            app_status: 0x0102_0304,
            protocol_status: ProtocolStatus::UnknownRole,
        };
        assert_eq!(body.to_bytes(), [1, 2, 3, 4, 3, 0, 0, 0]);
    }

    #[test]
    fn record_types() {
        assert_eq!(RecordType::from_u8(11), Some(RecordType::UnknownType));
        assert_eq!(RecordType::from_u8(12), None);
        assert_eq!(RecordType::from_u8(0), None);
    }
}
