//! Response wire format.
//!
//! ```text
//! HTTP/1.1 <code>\r\n
//! Server: hipshot\r\n
//! Content-Length: <len>\r\n        (unless set by the handler)
//! <name>: <value>\r\n              (once per value)
//! \r\n
//! <body>
//! ```

use crate::{
    buffer::Buffer,
    errors::Error,
    http::{
        response::{number_to_bytes, SealedResponse},
        types::StatusCode,
    },
};
use dashmap::DashMap;
use once_cell::sync::Lazy;

const SERVER: &[u8] = b"Server: hipshot\r\n";
const CONTENT_LENGTH: &[u8] = b"Content-Length: ";

// Status lines and `<name>: ` prefixes, shared by every reactor. Entries are
// derived from their key, so concurrent inserts of one key are equal.
static STATUS_LINES: Lazy<DashMap<u16, Box<[u8]>>> = Lazy::new(|| {
    StatusCode::ALL
        .iter()
        .map(|status| (status.as_u16(), status_line(status.as_u16())))
        .collect()
});

static HEADER_KEYS: Lazy<DashMap<Box<str>, Box<[u8]>>> = Lazy::new(DashMap::new);

fn status_line(code: u16) -> Box<[u8]> {
    let (digits, start) = number_to_bytes(code as u128);

    [b"HTTP/1.1 ", &digits[start..], b"\r\n"].concat().into_boxed_slice()
}

fn header_key(name: &str) -> Box<[u8]> {
    [name.as_bytes(), b": "].concat().into_boxed_slice()
}

#[inline]
fn with_status_line<R>(code: u16, f: impl FnOnce(&[u8]) -> R) -> R {
    if let Some(line) = STATUS_LINES.get(&code) {
        return f(&line);
    }

    f(&STATUS_LINES.entry(code).or_insert_with(|| status_line(code)))
}

#[inline]
fn with_header_key<R>(name: &str, f: impl FnOnce(&[u8]) -> R) -> R {
    if let Some(key) = HEADER_KEYS.get(name) {
        return f(&key);
    }

    f(&HEADER_KEYS
        .entry(name.into())
        .or_insert_with(|| header_key(name)))
}

/// Number of bytes [`encode`] writes for `resp`.
pub fn encoded_len(resp: &SealedResponse) -> usize {
    let body = resp.body().map_or(0, <[u8]>::len);
    let mut size = with_status_line(resp.status(), <[u8]>::len) + SERVER.len();

    if !resp.headers().contains("Content-Length") {
        let (_, start) = number_to_bytes(body as u128);
        size += CONTENT_LENGTH.len() + (39 - start) + 2;
    }

    for (name, values) in resp.headers().iter() {
        let key = with_header_key(name, <[u8]>::len);
        size += values.iter().map(|v| key + v.len() + 2).sum::<usize>();
    }

    size + 2 + body
}

/// Writes `resp` after the readable bytes of `out`.
///
/// All or nothing: if the encoded response does not fit the free space,
/// `out` is left untouched and [`Error::ResponseTooLarge`] is returned.
///
/// # Examples
/// ```
/// use hipshot::{encoder, Buffer, Response};
/// use std::sync::mpsc;
///
/// let (tx, rx) = mpsc::channel();
/// Response::new(move |sealed| tx.send(sealed).unwrap())
///     .header("Content-Type", "text/plain")
///     .body("Hi")
///     .send();
///
/// let mut out = Buffer::with_capacity(256);
/// encoder::encode(&rx.recv().unwrap(), &mut out).unwrap();
///
/// assert_eq!(
///     out.readable(),
///     b"HTTP/1.1 200\r\nServer: hipshot\r\nContent-Length: 2\r\n\
///       Content-Type: text/plain\r\n\r\nHi"
/// );
/// ```
pub fn encode(resp: &SealedResponse, out: &mut Buffer) -> Result<(), Error> {
    let size = encoded_len(resp);
    if size > out.remaining() {
        return Err(Error::ResponseTooLarge {
            size,
            capacity: out.remaining(),
        });
    }

    let body = resp.body().unwrap_or_default();

    with_status_line(resp.status(), |line| out.put(line))?;
    out.put(SERVER)?;

    if !resp.headers().contains("Content-Length") {
        let (digits, start) = number_to_bytes(body.len() as u128);

        out.put(CONTENT_LENGTH)?;
        out.put(&digits[start..])?;
        out.put(b"\r\n")?;
    }

    for (name, values) in resp.headers().iter() {
        for value in values {
            with_header_key(name, |key| out.put(key))?;
            out.put(value.as_bytes())?;
            out.put(b"\r\n")?;
        }
    }

    out.put(b"\r\n")?;
    out.put(body)
}
