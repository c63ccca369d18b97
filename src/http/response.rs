//! Response builder and the sealed value handed to the encoder.

use crate::http::types::{Params, StatusCode};
use log::warn;
use std::{borrow::Cow, fmt, mem, rc::Rc, sync::Arc};

pub use write::{BodyWriter, WriteBuffer};

type Hook = Box<dyn FnOnce(SealedResponse) + Send>;

/// HTTP response builder.
///
/// Every handler receives a fresh `Response` and must finish it with
/// [`send`](Response::send), either before returning or later from any
/// thread. Methods consume and return the builder, so the calls chain:
///
/// # Examples
/// ```
/// use hipshot::{Response, StatusCode};
///
/// let resp = Response::new(|sealed| {
///     assert_eq!(sealed.status(), 404);
///     assert_eq!(sealed.body(), Some(&b"<h1>Not here</h1>"[..]));
/// });
///
/// resp.status(StatusCode::NotFound)
///     .header("Content-Type", "text/html")
///     .body("<h1>Not here</h1>")
///     .send();
/// ```
///
/// `Content-Length` is computed by the encoder unless set explicitly.
///
/// # Dropping
/// A response dropped without `send` is answered with
/// `500 Internal server error` and logged as a warning.
///
/// # Panics
/// [`header`](Response::header) checks in `debug` mode that the name and
/// value cannot break the header block.
pub struct Response {
    status: u16,
    headers: Params,
    body: Option<Vec<u8>>,
    close: bool,
    hook: Option<Hook>,
}

impl Response {
    /// Creates a `200` response that hands its sealed form to `hook` when
    /// sent.
    pub fn new<F: FnOnce(SealedResponse) + Send + 'static>(hook: F) -> Self {
        Self {
            status: StatusCode::Ok.as_u16(),
            headers: Params::headers(),
            body: None,
            close: false,
            hook: Some(Box::new(hook)),
        }
    }

    /// Sets the status code. Any `u16` is accepted.
    ///
    /// # Examples
    /// ```
    /// use hipshot::{Response, StatusCode};
    ///
    /// let resp = Response::new(|_| {}).status(StatusCode::Created);
    /// assert_eq!(resp.status_code(), 201);
    ///
    /// let resp = resp.status(299u16);
    /// assert_eq!(resp.status_code(), 299);
    /// # resp.send();
    /// ```
    #[inline]
    pub fn status<S: Into<u16>>(mut self, status: S) -> Self {
        self.status = status.into();
        self
    }

    /// Adds a header value. Repeated names keep every value in order.
    ///
    /// # Examples
    /// ```
    /// use hipshot::Response;
    ///
    /// let resp = Response::new(|_| {})
    ///     .header("Set-Cookie", "a=1")
    ///     .header("set-cookie", "b=2")
    ///     .header("X-Request-Id", 128)
    ///     .header("X-Cache", true);
    ///
    /// assert_eq!(resp.headers().get_all("Set-Cookie"), ["a=1", "b=2"]);
    /// assert_eq!(resp.headers().get("x-request-id"), Some("128"));
    /// # resp.send();
    /// ```
    ///
    /// # Panics
    /// Error messages:
    /// - `Invalid header name`
    /// - `Header value cannot contain line breaks`
    ///
    /// Panics in `debug` mode when the name is empty or contains `:`, `\r`
    /// or `\n`, or when the value contains `\r` or `\n`.
    #[inline]
    #[track_caller]
    pub fn header<V: WriteBuffer>(mut self, name: &str, value: V) -> Self {
        debug_assert!(
            !name.is_empty() && !name.contains([':', '\r', '\n']),
            "Invalid header name"
        );

        let value = text(&value);
        debug_assert!(
            !value.contains(['\r', '\n']),
            "Header value cannot contain line breaks"
        );

        self.headers.append(name, value);
        self
    }

    /// Sets the body, replacing any previous one.
    ///
    /// # Examples
    /// ```
    /// use hipshot::Response;
    ///
    /// let resp = Response::new(|_| {}).body("Hello, World!");
    /// assert_eq!(resp.body_bytes(), Some(&b"Hello, World!"[..]));
    ///
    /// let resp = resp.body(-1234);
    /// assert_eq!(resp.body_bytes(), Some(&b"-1234"[..]));
    /// # resp.send();
    /// ```
    #[inline]
    pub fn body<T: WriteBuffer>(mut self, data: T) -> Self {
        let mut body = Vec::new();
        data.write_to(&mut body);

        self.body = Some(body);
        self
    }

    /// Writes the body through a closure, replacing any previous one.
    ///
    /// # Examples
    /// ```
    /// use hipshot::Response;
    /// use std::io::Write;
    ///
    /// let resp = Response::new(|_| {})
    ///     .header("Content-Type", "application/json")
    ///     .body_with(|w| {
    ///         write!(w, r#"{{"id": {}, "#, 42).unwrap();
    ///         w.write(r#""ok": "#);
    ///         w.write(true);
    ///         w.write('}');
    ///     });
    ///
    /// assert_eq!(resp.body_bytes(), Some(&br#"{"id": 42, "ok": true}"#[..]));
    /// # resp.send();
    /// ```
    #[inline]
    pub fn body_with<F: FnOnce(&mut BodyWriter)>(mut self, f: F) -> Self {
        let mut body = Vec::new();
        f(&mut BodyWriter(&mut body));

        self.body = Some(body);
        self
    }

    /// Closes the connection once this response is written.
    #[inline]
    pub fn close(mut self) -> Self {
        if !self.close {
            self.close = true;
            self.headers.append("Connection", "close");
        }
        self
    }

    #[inline(always)]
    pub const fn status_code(&self) -> u16 {
        self.status
    }

    #[inline(always)]
    pub const fn headers(&self) -> &Params {
        &self.headers
    }

    #[inline(always)]
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Seals the response and hands it to the connection for writing.
    pub fn send(mut self) {
        if let Some(hook) = self.hook.take() {
            hook(self.seal());
        }
    }

    #[inline]
    fn seal(&mut self) -> SealedResponse {
        SealedResponse {
            status: self.status,
            headers: mem::take(&mut self.headers),
            body: self.body.take(),
            close: self.close,
        }
    }
}

impl Drop for Response {
    fn drop(&mut self) {
        if let Some(hook) = self.hook.take() {
            warn!("Response dropped without send(), answering 500");
            hook(SealedResponse::internal_error());
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body.as_ref().map(Vec::len))
            .field("close", &self.close)
            .field("sent", &self.hook.is_none())
            .finish()
    }
}

/// An immutable, finished response waiting for the encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedResponse {
    status: u16,
    headers: Params,
    body: Option<Vec<u8>>,
    close: bool,
}

impl SealedResponse {
    pub(crate) fn internal_error() -> Self {
        Self::plain(StatusCode::InternalServerError, "Internal server error")
    }

    fn plain(status: StatusCode, body: &str) -> Self {
        let mut headers = Params::headers();
        headers.append("Content-Type", "text/plain");

        Self {
            status: status.as_u16(),
            headers,
            body: Some(body.as_bytes().to_vec()),
            close: false,
        }
    }

    #[inline(always)]
    pub const fn status(&self) -> u16 {
        self.status
    }

    #[inline(always)]
    pub const fn headers(&self) -> &Params {
        &self.headers
    }

    #[inline(always)]
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// `true` if the connection must close after this response.
    #[inline(always)]
    pub const fn closes_connection(&self) -> bool {
        self.close
    }
}

// Header values are text; byte values that are not UTF-8 are replaced lossily
fn text<V: WriteBuffer>(value: &V) -> String {
    let mut bytes = Vec::new();
    value.write_to(&mut bytes);

    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// Formats `n` in decimal at the end of a fixed array. Returns the array
/// and the index of the first digit.
#[inline]
pub(crate) const fn number_to_bytes(mut n: u128) -> ([u8; 39], usize) {
    let mut buffer = [b'0'; 39];
    let mut i = 39;

    if n == 0 {
        return (buffer, 38);
    }

    while n > 0 {
        i -= 1;
        buffer[i] = b'0' + (n % 10) as u8;
        n /= 10;
    }

    (buffer, i)
}

pub mod write {
    use super::*;

    /// Writer for constructing the response body.
    /// Used in [body_with](Response::body_with).
    ///
    /// # Examples
    ///
    /// With [WriteBuffer]:
    /// ```
    /// use hipshot::Response;
    ///
    /// let resp = Response::new(|_| {}).body_with(|w| {
    ///     w.write("total: ");
    ///     w.write(3u8);
    /// });
    /// assert_eq!(resp.body_bytes(), Some(&b"total: 3"[..]));
    /// # resp.send();
    /// ```
    /// With [std::io::Write]:
    /// ```
    /// use hipshot::Response;
    /// use std::io::Write;
    ///
    /// let resp = Response::new(|_| {}).body_with(|w| {
    ///     write!(w, "{} - {} = {}", 6, 2, 4).unwrap();
    /// });
    /// assert_eq!(resp.body_bytes(), Some(&b"6 - 2 = 4"[..]));
    /// # resp.send();
    /// ```
    #[derive(Debug)]
    pub struct BodyWriter<'a>(pub(crate) &'a mut Vec<u8>);

    impl BodyWriter<'_> {
        /// Appends content to the response body.
        #[inline]
        pub fn write<T: WriteBuffer>(&mut self, value: T) {
            value.write_to(self.0);
        }
    }

    impl std::io::Write for BodyWriter<'_> {
        #[inline]
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        #[inline]
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Values that can be written into a response header or body.
    ///
    /// Implemented for strings, bytes, booleans, chars and integers.
    /// Floating-point numbers are left out to avoid locale-dependent and
    /// precision-dependent output; format them to a string first.
    ///
    /// # Example
    /// ```
    /// use hipshot::{Response, WriteBuffer};
    ///
    /// struct UserId(u32);
    ///
    /// impl WriteBuffer for UserId {
    ///     fn write_to(&self, buffer: &mut Vec<u8>) {
    ///         buffer.extend_from_slice(b"user-");
    ///         self.0.write_to(buffer);
    ///     }
    /// }
    ///
    /// let resp = Response::new(|_| {}).header("X-User", UserId(7));
    /// assert_eq!(resp.headers().get("X-User"), Some("user-7"));
    /// # resp.send();
    /// ```
    pub trait WriteBuffer {
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! impl_write_buffer {
        (bytes, $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let closure = $conn;
                    closure(self, buffer);
                }
            })*
        };
        (number($type:ty), $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    $conn(*self as $type, buffer);
                }
            })*
        };
    }

    impl<T: WriteBuffer + ?Sized> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl WriteBuffer for str {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self.as_bytes());
        }
    }
    impl WriteBuffer for [u8] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
    impl_write_buffer! {
        bytes, |value: &str, buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value.as_bytes());
        } => String, Box<str>, Cow<'_, str>, Arc<str>, Rc<str>
    }
    impl_write_buffer! {
        bytes, |value: &[u8], buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value);
        } => Vec<u8>, Box<[u8]>, Cow<'_, [u8]>, Arc<[u8]>, Rc<[u8]>
    }
    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
    impl_write_buffer! {
        number(u128), write_u128 => u8, u16, u32, u64, u128, usize
    }
    impl_write_buffer! {
        number(i128), write_i128 => i8, i16, i32, i64, i128, isize
    }
    impl WriteBuffer for bool {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(match self {
                true => b"true",
                false => b"false",
            });
        }
    }
    impl WriteBuffer for char {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            let mut buf = [0u8; 4];
            buffer.extend_from_slice(self.encode_utf8(&mut buf).as_bytes());
        }
    }

    #[inline(always)]
    fn write_u128(value: u128, buffer: &mut Vec<u8>) {
        let (arr, start) = number_to_bytes(value);
        buffer.extend_from_slice(&arr[start..]);
    }

    #[inline(always)]
    fn write_i128(value: i128, buffer: &mut Vec<u8>) {
        if value < 0 {
            buffer.push(b'-');
        }

        let (arr, start) = number_to_bytes(value.unsigned_abs());
        buffer.extend_from_slice(&arr[start..]);
    }
}

#[cfg(test)]
mod send_tests {
    use super::*;
    use std::sync::mpsc;

    fn capture() -> (Response, mpsc::Receiver<SealedResponse>) {
        let (tx, rx) = mpsc::channel();
        let resp = Response::new(move |sealed| {
            let _ = tx.send(sealed);
        });

        (resp, rx)
    }

    #[test]
    fn defaults() {
        let (resp, rx) = capture();
        assert_eq!(resp.status_code(), 200);
        assert!(resp.headers().is_empty());
        assert_eq!(resp.body_bytes(), None);

        resp.send();
        let sealed = rx.try_recv().unwrap();
        assert_eq!(sealed.status(), 200);
        assert_eq!(sealed.body(), None);
        assert!(!sealed.closes_connection());
    }

    #[test]
    fn sealed_keeps_everything() {
        let (resp, rx) = capture();

        resp.status(StatusCode::Created)
            .header("Location", "/users/7")
            .header("X-Tag", "a")
            .header("x-tag", "b")
            .body("created")
            .send();

        let sealed = rx.try_recv().unwrap();
        assert_eq!(sealed.status(), 201);
        assert_eq!(sealed.headers().get("location"), Some("/users/7"));
        assert_eq!(sealed.headers().get_all("X-Tag"), ["a", "b"]);
        assert_eq!(sealed.body(), Some(&b"created"[..]));

        // Hook fires exactly once
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn drop_without_send() {
        let (resp, rx) = capture();
        drop(resp.status(204u16));

        let sealed = rx.try_recv().unwrap();
        assert_eq!(sealed, SealedResponse::internal_error());
        assert_eq!(sealed.status(), 500);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn send_from_another_thread() {
        let (resp, rx) = capture();

        std::thread::spawn(move || resp.body("late").send())
            .join()
            .unwrap();

        assert_eq!(rx.try_recv().unwrap().body(), Some(&b"late"[..]));
    }

    #[test]
    fn close() {
        let (resp, rx) = capture();
        resp.close().close().send();

        let sealed = rx.try_recv().unwrap();
        assert!(sealed.closes_connection());
        assert_eq!(sealed.headers().get_all("Connection"), ["close"]);
    }
}

#[cfg(test)]
mod header_tests {
    use super::*;

    #[test]
    fn values() {
        #[rustfmt::skip]
        let cases: [(Response, &str); 6] = [
            (Response::new(|_| {}).header("name", "value"),        "value"),
            (Response::new(|_| {}).header("name", ""),             ""),
            (Response::new(|_| {}).header("name", 123),            "123"),
            (Response::new(|_| {}).header("name", -123),           "-123"),
            (Response::new(|_| {}).header("name", vec![35, 33, 43]), "#!+"),
            (Response::new(|_| {}).header("name", false),          "false"),
        ];

        for (resp, expected) in cases {
            assert_eq!(resp.headers().get("NAME"), Some(expected));
            resp.send();
        }
    }

    #[test]
    fn lossy_bytes() {
        let resp = Response::new(|_| {}).header("name", &b"a\xffb"[..]);
        assert_eq!(resp.headers().get("name"), Some("a\u{fffd}b"));
        resp.send();
    }

    #[test]
    #[should_panic(expected = "Invalid header name")]
    fn colon_in_name() {
        Response::new(|_| {}).header("Bad: name", "value").send();
    }

    #[test]
    #[should_panic(expected = "Invalid header name")]
    fn empty_name() {
        Response::new(|_| {}).header("", "value").send();
    }

    #[test]
    #[should_panic(expected = "Header value cannot contain line breaks")]
    fn line_break_in_value() {
        Response::new(|_| {}).header("X", "a\r\nInjected: yes").send();
    }
}

#[cfg(test)]
mod body_tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn body() {
        #[rustfmt::skip]
        let cases: [(Response, &str); 5] = [
            (Response::new(|_| {}).body("sample body"),   "sample body"),
            (Response::new(|_| {}).body(true),            "true"),
            (Response::new(|_| {}).body(-1234),           "-1234"),
            (Response::new(|_| {}).body(u128::MAX),       "340282366920938463463374607431768211455"),
            (Response::new(|_| {}).body("a").body("b"),   "b"),
        ];

        for (resp, expected) in cases {
            assert_eq!(str(resp.body_bytes()), Some(expected));
            resp.send();
        }
    }

    #[test]
    fn body_with() {
        let resp = Response::new(|_| {}).body_with(|w| {
            w.write("qwe");
            w.write(vec![23u8 + 10, 34, 56]);
            w.write(String::from("body"));
            w.write(i128::MIN);
        });

        assert_eq!(
            str(resp.body_bytes()),
            Some("qwe!\"8body-170141183460469231731687303715884105728")
        );
        resp.send();
    }

    #[test]
    fn numbers() {
        #[rustfmt::skip]
        let cases = [
            (0u128,      "0"),
            (7,          "7"),
            (10,         "10"),
            (8192,       "8192"),
        ];

        for (n, expected) in cases {
            let (arr, start) = number_to_bytes(n);
            assert_eq!(str_op(&arr[start..]), expected);
        }
    }
}
