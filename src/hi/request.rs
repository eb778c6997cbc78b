use crate::params::NameValuePairs;
use crate::s11n::Role;

use bytes::Bytes;

use std::collections::HashMap;

pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// A fully assembled request: the CGI environment from the PARAMS stream plus the STDIN body, with
/// the usual HTTP bits already picked out of it.
#[derive(Debug, Clone)]
pub struct Request {
    pub request_id: u16,
    pub role: Role,
    pub keep_alive: bool,
    /// The CGI environment (`REQUEST_METHOD`, `REQUEST_URI`, `HTTP_*`, ...).
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    /// Decoded body fields. Only filled for `application/x-www-form-urlencoded` bodies.
    pub form: HashMap<String, String>,
    /// The raw body, always present even when `form` was parsed out of it.
    pub body: Bytes,
}

impl Request {
    pub fn from_parts(
        request_id: u16,
        role: Role,
        keep_alive: bool,
        params: NameValuePairs,
        body: Bytes,
        ) -> Request
    {
        let params: HashMap<String, String> = params
            .into_iter()
            .map(|(name, value)| {
                (String::from_utf8_lossy(&name).into_owned(),
                 String::from_utf8_lossy(&value).into_owned())
            })
            .collect();

        let query = if let Some(query_string) = params.get("QUERY_STRING") {
            parse_query(query_string)
        } else if let Some(uri) = params.get("REQUEST_URI") {
            match uri.find('?') {
                Some(pos) => parse_query(&uri[pos + 1..]),
                None => HashMap::new(),
            }
        } else {
            HashMap::new()
        };

        let cookies = params.get("HTTP_COOKIE")
            .map(|header| parse_cookies(header))
            .unwrap_or_default();

        let form = match params.get("CONTENT_TYPE") {
            Some(content_type) if content_type == FORM_URLENCODED => {
                parse_query(&String::from_utf8_lossy(&body))
            }
            // multipart bodies are left to the application
            _ => HashMap::new(),
        };

        Request {
            request_id,
            role,
            keep_alive,
            params,
            query,
            cookies,
            form,
            body,
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(|s| s.as_str())
    }

    pub fn method(&self) -> Option<&str> {
        self.param("REQUEST_METHOD")
    }

    pub fn uri(&self) -> Option<&str> {
        self.param("REQUEST_URI")
    }
}

/// Parses `a=1&b=two` style strings. Later keys win; a key without `=` maps to "".
pub fn parse_query(s: &str) -> HashMap<String, String> {
    s.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let name = parts.next().unwrap_or("");
            let value = parts.next().unwrap_or("");
            (url_decode(name), url_decode(value))
        })
        .filter(|(name, _)| !name.is_empty())
        .collect()
}

/// Parses a `Cookie` header: `;`-separated, split on the first `=`, trimmed, then url-decoded.
pub fn parse_cookies(header: &str) -> HashMap<String, String> {
    header.split(';')
        .filter_map(|cookie| {
            let mut parts = cookie.splitn(2, '=');
            let name = url_decode(parts.next().unwrap_or("").trim());
            let value = url_decode(parts.next().unwrap_or("").trim());
            if name.is_empty() {
                None
            } else {
                Some((name, value))
            }
        })
        .collect()
}

/// Form-style percent decoding: `+` is a space, and malformed escapes are kept verbatim.
/// Invalid UTF-8 is replaced rather than rejected.
pub fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        decoded.push((hi << 4) | lo);
                        i += 3;
                        continue;
                    }
                    _ => decoded.push(b'%'),
                }
            }
            b'+' => decoded.push(b' '),
            b => decoded.push(b),
        }
        i += 1;
    }

    String::from_utf8_lossy(&decoded).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
