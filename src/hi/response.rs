use crate::error::Error;
use crate::lowlevel::FastcgiFrame;
use crate::s11n::*;

use bytes::{Bytes, BytesMut};
use http::StatusCode;

/// An HTTP response as the application hands it over. Headers keep their insertion order and
/// casing; a header may appear more than once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Pre-formatted `Set-Cookie` values.
    pub cookies: Vec<String>,
    pub body: Option<Bytes>,
}

impl Response {
    pub fn new<B: Into<Bytes>>(body: B) -> Response {
        Response {
            status: 200,
            headers: vec![],
            cookies: vec![],
            body: Some(body.into()),
        }
    }

    /// A response with no body at all. Serializing it fails; see `Error::MissingBody`.
    pub fn without_body() -> Response {
        Response {
            status: 200,
            headers: vec![],
            cookies: vec![],
            body: None,
        }
    }

    /// The reply sent on behalf of a handler that failed.
    pub fn internal_server_error() -> Response {
        Response::new("500 Internal Server Error").with_status(500)
    }

    pub fn with_status(mut self, status: u16) -> Response {
        self.status = status;
        self
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Response {
        self.set_header(name, value);
        self
    }

    pub fn with_cookie<C: Into<String>>(mut self, cookie: C) -> Response {
        self.cookies.push(cookie.into());
        self
    }

    /// Adds a header line, keeping any existing ones with the same name.
    pub fn set_header<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) {
        self.headers.push((name.into(), value.into()));
    }

    /// Removes every header with this name, compared case-insensitively.
    pub fn clear_header(&mut self, name: &str) {
        self.headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
    }

    fn status_line(&self) -> String {
        let reason = StatusCode::from_u16(self.status)
            .ok()
            .and_then(|code| code.canonical_reason());
        match reason {
            Some(reason) => format!("Status: {} {}\r\n", self.status, reason),
            None => format!("Status: {}\r\n", self.status),
        }
    }
}

/// Turns a response into the records that carry it: STDOUT chunks of at most 0xFFFF bytes, the
/// empty STDOUT that ends the stream, and END-REQUEST with `app_status`.
pub fn serialize(request_id: u16, app_status: u32, response: &Response)
    -> Result<Vec<FastcgiFrame>, Error>
{
    let body = match response.body {
        Some(ref body) => body,
        None => return Err(Error::MissingBody(request_id)),
    };

    let mut stdout = BytesMut::with_capacity(body.len() + 64);
    stdout.extend_from_slice(response.status_line().as_bytes());
    for (key, value) in &response.headers {
        stdout.extend_from_slice(key.as_bytes());
        stdout.extend_from_slice(b": ");
        stdout.extend_from_slice(value.as_bytes());
        stdout.extend_from_slice(b"\r\n");
    }
    for cookie in &response.cookies {
        stdout.extend_from_slice(b"Set-Cookie: ");
        stdout.extend_from_slice(cookie.as_bytes());
        stdout.extend_from_slice(b"\r\n");
    }
    stdout.extend_from_slice(b"\r\n");
    stdout.extend_from_slice(body);

    debug!("request #{}: {} bytes of stdout", request_id, stdout.len());

    let mut frames: Vec<FastcgiFrame> = stdout
        .chunks(MAX_CONTENT_LEN)
        .map(|chunk| FastcgiFrame::new(RecordType::Stdout, request_id, chunk))
        .collect();

    frames.push(FastcgiFrame::empty(RecordType::Stdout, request_id));

    let end = EndRequestBody {
        app_status,
        protocol_status: ProtocolStatus::RequestComplete,
    };
    frames.push(FastcgiFrame::new(RecordType::EndRequest, request_id, &end.to_bytes()[..]));

    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdout_of(frames: &[FastcgiFrame]) -> Vec<u8> {
        frames.iter()
            .filter(|f| f.record_type() == Some(RecordType::Stdout))
            .flat_map(|f| f.content.iter().cloned())
            .collect()
    }

    #[test]
    fn hi() {
        let frames = serialize(1, APP_STATUS_OK, &Response::new("hi")).unwrap();
        assert_eq!(frames.len(), 3);

        assert_eq!(frames[0].record_type(), Some(RecordType::Stdout));
        assert_eq!(frames[0].request_id, 1);
        assert_eq!(&frames[0].content[..], b"Status: 200 OK\r\n\r\nhi");

        assert_eq!(frames[1].record_type(), Some(RecordType::Stdout));
        assert!(frames[1].content.is_empty());

        assert_eq!(frames[2].record_type(), Some(RecordType::EndRequest));
        assert_eq!(&frames[2].content[..], &[0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn headers_and_cookies() {
        let response = Response::new("{}")
            .with_status(201)
            .with_header("Content-Type", "application/json")
            .with_header("X-Thing", "a")
            .with_header("X-Thing", "b")
            .with_cookie("id=1; Path=/")
            .with_cookie("theme=dark");
        let frames = serialize(9, APP_STATUS_OK, &response).unwrap();
        assert_eq!(stdout_of(&frames),
                   &b"Status: 201 Created\r\n\
                      Content-Type: application/json\r\n\
                      X-Thing: a\r\n\
                      X-Thing: b\r\n\
                      Set-Cookie: id=1; Path=/\r\n\
                      Set-Cookie: theme=dark\r\n\
                      \r\n\
                      {}"[..]);
    }

    #[test]
    fn clear_header_ignores_case() {
        let mut response = Response::new("").with_header("X-A", "1").with_header("x-b", "2");
        response.clear_header("x-a");
        assert_eq!(response.headers, vec![("x-b".to_owned(), "2".to_owned())]);
    }

    #[test]
    fn unknown_status_has_no_reason() {
        let frames = serialize(1, APP_STATUS_OK, &Response::new("").with_status(599)).unwrap();
        assert_eq!(&frames[0].content[..], b"Status: 599\r\n\r\n");
    }

    #[test]
    fn error_reply() {
        let frames = serialize(4, APP_STATUS_ERROR, &Response::internal_server_error()).unwrap();
        assert_eq!(&frames[0].content[..],
                   &b"Status: 500 Internal Server Error\r\n\r\n500 Internal Server Error"[..]);
        assert_eq!(&frames[2].content[..4], &[0, 0, 0, 1]);
        assert_eq!(frames[2].content[4], ProtocolStatus::RequestComplete as u8);
    }

    #[test]
    fn large_bodies_are_chunked() {
        let body = vec![b'z'; 0x1_0000 * 2];
        let frames = serialize(2, APP_STATUS_OK, &Response::new(body.clone())).unwrap();
        let head_len = b"Status: 200 OK\r\n\r\n".len();
        let total = head_len + body.len();

        // 3 STDOUT chunks, empty STDOUT, END-REQUEST
        assert_eq!(frames.len(), 5);
        assert_eq!(frames[0].content.len(), 0xFFFF);
        assert_eq!(frames[1].content.len(), 0xFFFF);
        assert_eq!(frames[2].content.len(), total - 2 * 0xFFFF);
        assert!(frames[3].content.is_empty());
        assert_eq!(frames[4].record_type(), Some(RecordType::EndRequest));
        assert_eq!(stdout_of(&frames).len(), total);

        let mut wire = BytesMut::new();
        for frame in &frames {
            frame.serialize(&mut wire).unwrap();
        }
        assert_eq!(wire.len() % 8, 0);
    }

    #[test]
    fn missing_body() {
        match serialize(5, APP_STATUS_OK, &Response::without_body()) {
            Err(Error::MissingBody(5)) => (),
            other => panic!("unexpected {:?}", other),
        }
    }
}
