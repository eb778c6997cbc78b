use crate::hi::handler::HandlerError;
use crate::s11n::RecordType;

use std::io;

/// Everything that can go wrong while serving FastCGI.
///
/// Protocol and transport errors are fatal to the connection they occur on: the stream can't be
/// resynchronized, so the connection is closed right after the error is reported. Application
/// errors are reported too, but the request still gets a 500 reply and the connection lives on.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("protocol version mismatch: expected 1, got {0}")]
    ProtocolVersionMismatch(u8),

    #[error("received duplicate BEGIN-REQUEST for #{0}")]
    DuplicateRequest(u16),

    #[error("received {record_type:?} record on un-begun request #{request_id}")]
    UnknownRequest { record_type: RecordType, request_id: u16 },

    #[error("only the RESPONDER role is supported, got role {0}")]
    UnsupportedRole(u16),

    #[error("unexpected record type {record_type} on request #{request_id}")]
    UnexpectedFrameType { record_type: u8, request_id: u16 },

    #[error("malformed record: {0}")]
    MalformedFrame(String),

    #[error("record type {record_type} content not fully consumed ({remaining} bytes left)")]
    ContentNotConsumed { record_type: u8, remaining: usize },

    #[error("broken pipe or closed connection")]
    BrokenPipe,

    #[error("response for request #{0} does not have a body")]
    MissingBody(u16),

    #[error("handler failed to produce a response: {0}")]
    BadResponse(#[source] HandlerError),

    #[error("deferred response was rejected: {0}")]
    AsyncHandlerRejected(#[source] HandlerError),

    #[error("name-value pair length {0:#x} can't be encoded")]
    NameValueTooLong(usize),

    #[error("could not bind listen socket to {addr}: {source}")]
    Bind { addr: String, #[source] source: io::Error },

    #[error("could not accept() connection: {0}")]
    Accept(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether the connection the error happened on has to be closed.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::ProtocolVersionMismatch(_)
                | Error::BadResponse(_)
                | Error::AsyncHandlerRejected(_) => false,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatality() {
        assert!(Error::DuplicateRequest(1).is_fatal());
        assert!(Error::BrokenPipe.is_fatal());
        assert!(Error::MissingBody(1).is_fatal());
        assert!(!Error::ProtocolVersionMismatch(2).is_fatal());
        assert!(!Error::BadResponse("nope".into()).is_fatal());
        assert!(!Error::AsyncHandlerRejected("nope".into()).is_fatal());
    }

    #[test]
    fn messages() {
        let e = Error::UnknownRequest { record_type: RecordType::Stdin, request_id: 4 };
        assert_eq!(e.to_string(), "received Stdin record on un-begun request #4");
        assert_eq!(Error::DuplicateRequest(9).to_string(), "received duplicate BEGIN-REQUEST for #9");
    }
}
