//! Core HTTP protocol types and utilities

use crate::errors::Error;
use std::fmt;

#[inline(always)]
pub(crate) fn slice_to_usize(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }

    let mut result: usize = 0;
    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }

        result = result
            .checked_mul(10)?
            .checked_add((byte - b'0') as usize)?;
    }

    Some(result)
}

// METHOD

/// HTTP request methods
///
/// # References
///
/// - [RFC 7231, Section 4](https://datatracker.ietf.org/doc/html/rfc7231#section-4)
/// - [RFC 5789](https://datatracker.ietf.org/doc/html/rfc5789) (PATCH method)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Trace,
}

impl Method {
    pub const ALL: [Method; 8] = [
        Method::Get,
        Method::Head,
        Method::Post,
        Method::Put,
        Method::Patch,
        Method::Delete,
        Method::Options,
        Method::Trace,
    ];

    /// Recognizes the method token at the start of a request line.
    ///
    /// The first byte picks the method, except for `P` where the second byte
    /// decides between POST, PUT and PATCH. The rest of the token and the
    /// space after it are verified. Returns the method and the number of
    /// bytes to skip, space included.
    #[inline]
    pub(crate) fn from_bytes(src: &[u8]) -> Result<(Self, usize), Error> {
        let method = match src {
            [b'G', ..] => Method::Get,
            [b'H', ..] => Method::Head,
            [b'P', b'O', ..] => Method::Post,
            [b'P', b'U', ..] => Method::Put,
            [b'P', b'A', ..] => Method::Patch,
            [b'D', ..] => Method::Delete,
            [b'O', ..] => Method::Options,
            [b'T', ..] => Method::Trace,
            _ => return Err(Error::InvalidMethod),
        };

        let token = method.as_str().as_bytes();
        match src.get(token.len()) {
            Some(b' ') if src.starts_with(token) => Ok((method, token.len() + 1)),
            _ => Err(Error::InvalidMethod),
        }
    }

    /// `false` once the bytes seen so far cannot begin any method token.
    #[inline]
    pub(crate) fn is_prefix(src: &[u8]) -> bool {
        Self::ALL.iter().any(|method| {
            let token = method.as_str().as_bytes();
            let n = src.len().min(token.len());

            src[..n] == token[..n] && src.get(token.len()).map_or(true, |&b| b == b' ')
        })
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// VERSION

/// HTTP protocol version named on the request line
///
/// Only the head of an `HTTP/2.0` request line is understood; there is no
/// HTTP/2 framing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    /// [RFC 1945](https://tools.ietf.org/html/rfc1945)
    Http10,
    /// [RFC 7230](https://tools.ietf.org/html/rfc7230) and related
    Http11,
    /// [RFC 7540](https://tools.ietf.org/html/rfc7540)
    Http20,
}

impl Version {
    /// Parses the protocol token. Only the fixed positions are inspected:
    /// `HTTP/1.<minor>` or `HTTP/2...`.
    #[inline]
    pub(crate) const fn from_bytes(src: &[u8]) -> Result<Self, Error> {
        match src {
            [b'H', b'T', b'T', b'P', b'/', b'1', b'.', b'1', ..] => Ok(Self::Http11),
            [b'H', b'T', b'T', b'P', b'/', b'1', b'.', b'0', ..] => Ok(Self::Http10),
            [b'H', b'T', b'T', b'P', b'/', b'2', ..] => Ok(Self::Http20),
            _ => Err(Error::InvalidVersion),
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
            Version::Http20 => "HTTP/2.0",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// STATUS_CODE

macro_rules! set_status_codes {
    ($(
        $(#[$docs:meta])*
        $name:ident = ($num:literal, $str:literal);
    )+) => {
        /// Well-known HTTP status codes
        ///
        /// A [`Response`](crate::Response) accepts any `u16`; these are the
        /// codes whose wire form is cached ahead of time.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode { $(
            #[doc = concat!(stringify!($num), " ", $str)]
            $(#[$docs])*
            $name = $num,
        )+ }

        impl StatusCode {
            pub const ALL: &'static [StatusCode] = &[$(StatusCode::$name,)+];

            #[inline]
            pub const fn as_u16(&self) -> u16 {
                *self as u16
            }

            #[inline]
            pub const fn reason(&self) -> &'static str {
                match self { $(
                    StatusCode::$name => $str,
                )+ }
            }

            #[inline]
            pub const fn from_u16(code: u16) -> Option<Self> {
                match code { $(
                    $num => Some(StatusCode::$name),
                )+
                    _ => None,
                }
            }
        }
    }
}

set_status_codes! {
    Continue = (100, "Continue");
    SwitchingProtocols = (101, "Switching Protocols");

    Ok = (200, "OK");
    Created = (201, "Created");
    Accepted = (202, "Accepted");
    NoContent = (204, "No Content");
    PartialContent = (206, "Partial Content");

    MovedPermanently = (301, "Moved Permanently");
    Found = (302, "Found");
    SeeOther = (303, "See Other");
    NotModified = (304, "Not Modified");
    TemporaryRedirect = (307, "Temporary Redirect");
    PermanentRedirect = (308, "Permanent Redirect");

    BadRequest = (400, "Bad Request");
    Unauthorized = (401, "Unauthorized");
    Forbidden = (403, "Forbidden");
    NotFound = (404, "Not Found");
    MethodNotAllowed = (405, "Method Not Allowed");
    RequestTimeout = (408, "Request Timeout");
    Conflict = (409, "Conflict");
    Gone = (410, "Gone");
    LengthRequired = (411, "Length Required");
    PayloadTooLarge = (413, "Payload Too Large");
    UriTooLong = (414, "URI Too Long");
    UnsupportedMediaType = (415, "Unsupported Media Type");
    /// Even if IANA reuses this code, the teapot stays.
    ImaTeapot = (418, "I'm a teapot");
    UnprocessableEntity = (422, "Unprocessable Entity");
    TooManyRequests = (429, "Too Many Requests");
    RequestHeaderFieldsTooLarge = (431, "Request Header Fields Too Large");

    InternalServerError = (500, "Internal Server Error");
    NotImplemented = (501, "Not Implemented");
    BadGateway = (502, "Bad Gateway");
    ServiceUnavailable = (503, "Service Unavailable");
    GatewayTimeout = (504, "Gateway Timeout");
    HttpVersionNotSupported = (505, "HTTP Version Not Supported");
}

impl From<StatusCode> for u16 {
    #[inline(always)]
    fn from(status: StatusCode) -> u16 {
        status.as_u16()
    }
}

// PARAMS

/// Multi-valued string map used for headers and query parameters.
///
/// Keys keep their first-seen spelling and order; repeated keys append to
/// the value list instead of overwriting it. Header maps compare keys
/// ASCII case-insensitively, query maps compare them exactly.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Params {
    entries: Vec<(String, Vec<String>)>,
    fold_case: bool,
}

impl Params {
    #[inline]
    pub fn headers() -> Self {
        Self {
            entries: Vec::new(),
            fold_case: true,
        }
    }

    #[inline]
    pub fn query() -> Self {
        Self {
            entries: Vec::new(),
            fold_case: false,
        }
    }

    #[inline]
    fn position(&self, key: &str) -> Option<usize> {
        match self.fold_case {
            true => self
                .entries
                .iter()
                .position(|(k, _)| k.eq_ignore_ascii_case(key)),
            false => self.entries.iter().position(|(k, _)| k == key),
        }
    }

    /// Appends `value` to the values of `key`.
    pub fn append<K: Into<String> + AsRef<str>, V: Into<String>>(&mut self, key: K, value: V) {
        match self.position(key.as_ref()) {
            Some(i) => self.entries[i].1.push(value.into()),
            None => self.entries.push((key.into(), vec![value.into()])),
        }
    }

    /// First value of `key`.
    #[inline]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_all(key).first().map(String::as_str)
    }

    /// Every value of `key` in arrival order.
    #[inline]
    pub fn get_all(&self, key: &str) -> &[String] {
        match self.position(key) {
            Some(i) => &self.entries[i].1,
            None => &[],
        }
    }

    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Iterates over keys with all of their values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of distinct keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
