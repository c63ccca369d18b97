use crate::http::types::{Method, Params, Version};
use std::{cell::Cell, collections::HashMap, fmt};

/// Receives the payloads of a chunked request body as they are decoded.
///
/// Each slice points into the connection's input buffer and is only valid
/// for the duration of the call; copy it to keep it.
///
/// Closures taking `&[u8]` implement this trait, so a handler can simply
/// write `req.on_chunk(|chunk: &[u8]| { ... })`.
pub trait ChunkConsumer {
    fn on_chunk(&mut self, chunk: &[u8]);

    /// Called once after the terminating zero-size chunk.
    fn on_end(&mut self) {}
}

impl<F: FnMut(&[u8])> ChunkConsumer for F {
    #[inline(always)]
    fn on_chunk(&mut self, chunk: &[u8]) {
        self(chunk)
    }
}

pub(crate) type ConsumerSlot = Cell<Option<Box<dyn ChunkConsumer>>>;

/// Body of a decoded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Body<'b> {
    /// No `Content-Length` and no chunked encoding.
    Empty,
    /// `Content-Length` bytes, borrowed from the input buffer.
    Full(&'b [u8]),
    /// Chunks follow; register a [`ChunkConsumer`] to receive them.
    Chunked,
}

/// Request line and headers, built up by the decoder.
#[derive(Debug)]
pub(crate) struct Head {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) version: Version,
    pub(crate) query: Params,
    pub(crate) headers: Params,
}

/// A decoded HTTP request.
///
/// # Input data requirements
///
/// #### General designations
/// - `SP`: ASCII space (0x20)
/// - `CRLF`: `"\r\n"`; a bare `\n` is accepted as well
///
/// ## First line
/// ```text
/// [METHOD] SP [PATH] ["?" QUERY] SP "HTTP/" [VERSION] CRLF
/// ```
/// Where:
/// - `[METHOD]`: one of [Method](crate::Method)
/// - `[VERSION]`: `1.0`, `1.1` or `2.0`; anything after the version up
///   to the end of the line is ignored
///
/// ## Header
/// ```text
/// [NAME] ":" [SP] [VALUE] CRLF
/// ```
/// One space after the colon is dropped, anything else is kept:
/// ```text
/// Content-Type: plain/text\r\n    // `plain/text`
/// X-Empty:\r\n                    // `` (empty)
/// Name:   spaced  \r\n            // `  spaced  `
/// ```
///
/// ## Body
///
/// | Header                       | Body                                        |
/// |------------------------------|---------------------------------------------|
/// | `Content-Length: N`          | [`Body::Full`] with exactly `N` bytes       |
/// | `Transfer-Encoding: chunked` | [`Body::Chunked`], see [`on_chunk`](Request::on_chunk) |
/// | neither                      | [`Body::Empty`]                             |
///
/// `Content-Length` wins when both are present. The request line, query
/// string and header lines must be `UTF-8`; the body is raw bytes.
///
/// # Lifetime
///
/// `'b` ties the request to the connection's input buffer: the body is a
/// view into that buffer and cannot outlive the handler call.
pub struct Request<'b> {
    method: Method,
    path: String,
    version: Version,
    headers: Params,
    query: Params,
    path_params: HashMap<String, String>,
    body: Body<'b>,
    consumer: &'b ConsumerSlot,
}

impl<'b> Request<'b> {
    #[inline]
    pub(crate) fn new(head: Head, body: Body<'b>, consumer: &'b ConsumerSlot) -> Self {
        Self {
            method: head.method,
            path: head.path,
            version: head.version,
            headers: head.headers,
            query: head.query,
            path_params: HashMap::new(),
            body,
            consumer,
        }
    }

    #[inline]
    pub(crate) fn set_path_param(&mut self, name: &str, value: String) {
        self.path_params.insert(name.to_owned(), value);
    }
}

// Public API
impl<'b> Request<'b> {
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Path without the query string, e.g. `/users/42`.
    #[inline(always)]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Protocol as written on the wire, e.g. `HTTP/1.1`.
    #[inline(always)]
    pub const fn protocol(&self) -> &'static str {
        self.version.as_str()
    }

    #[inline(always)]
    pub const fn headers(&self) -> &Params {
        &self.headers
    }

    /// Returns the first header value with case-insensitive name matching
    /// (per [RFC 7230](https://tools.ietf.org/html/rfc7230#section-3.2)).
    #[inline(always)]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    #[inline(always)]
    pub const fn query(&self) -> &Params {
        &self.query
    }

    /// First value of the query parameter `name`.
    #[inline(always)]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name)
    }

    /// Parameters captured by `{name}` route segments.
    #[inline(always)]
    pub const fn path_params(&self) -> &HashMap<String, String> {
        &self.path_params
    }

    #[inline(always)]
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    #[inline(always)]
    pub const fn body_kind(&self) -> Body<'b> {
        self.body
    }

    /// Fixed-length body, if any.
    #[inline(always)]
    pub const fn body(&self) -> Option<&'b [u8]> {
        match self.body {
            Body::Full(bytes) => Some(bytes),
            _ => None,
        }
    }

    #[inline(always)]
    pub const fn is_chunked(&self) -> bool {
        matches!(self.body, Body::Chunked)
    }

    /// Registers the consumer for the chunks of this request's body.
    ///
    /// Chunks are delivered by later reads on the same connection, after the
    /// handler has returned. A second call replaces the first consumer.
    /// Without a consumer, chunks are read and discarded.
    ///
    /// # Examples
    /// ```no_run
    /// use hipshot::{ChunkConsumer, Request, Response};
    ///
    /// struct Upload {
    ///     received: Vec<u8>,
    ///     response: Option<Response>,
    /// }
    ///
    /// impl ChunkConsumer for Upload {
    ///     fn on_chunk(&mut self, chunk: &[u8]) {
    ///         self.received.extend_from_slice(chunk);
    ///     }
    ///
    ///     fn on_end(&mut self) {
    ///         if let Some(resp) = self.response.take() {
    ///             resp.body(self.received.len().to_string()).send();
    ///         }
    ///     }
    /// }
    ///
    /// fn upload(req: &mut Request<'_>, resp: Response) {
    ///     req.on_chunk(Upload { received: Vec::new(), response: Some(resp) });
    /// }
    /// ```
    #[inline]
    pub fn on_chunk<C: ChunkConsumer + 'static>(&self, consumer: C) {
        self.consumer.set(Some(Box::new(consumer)));
    }
}

impl fmt::Debug for Request<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("query", &self.query)
            .field("path_params", &self.path_params)
            .field("body", &self.body)
            .finish()
    }
}

#[cfg(test)]
impl Head {
    pub(crate) fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_owned(),
            version: Version::Http11,
            query: Params::query(),
            headers: Params::headers(),
        }
    }
}
