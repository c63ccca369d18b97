//! Resumable HTTP/1.1 request decoder.
//!
//! ```text
//! RequestLine -> Headers -> Body        -> Done
//!                        \-> ChunkedBody -> Done
//!                        \-----------------> Done
//! ```
//!
//! Every step either completes and commits the bytes it consumed, or
//! leaves the buffer's read cursor exactly where the step started. The
//! caller appends more bytes behind the unread ones and calls
//! [`Decoder::decode`] again.

use crate::{
    buffer::Buffer,
    errors::Error,
    http::{
        query::Query,
        request::{Body, ConsumerSlot, Head, Request},
        types::{self, Method, Params, Version},
    },
};
use memchr::memchr;
use std::{fmt, mem};

/// Observable decoder state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    RequestLine,
    Headers,
    Body,
    ChunkedBody,
    /// The last request is complete; the next call starts a new one.
    Done,
}

enum Stage {
    RequestLine,
    Headers(Head),
    Body(Head, usize),
    ChunkedBody,
    Done,
}

enum Framing {
    None,
    Length(usize),
    Chunked,
}

/// Per-connection request decoder.
///
/// One instance serves every request of a keep-alive connection in turn
/// and is never shared between connections.
///
/// # Examples
/// ```
/// use hipshot::{Buffer, Decoder, Method};
///
/// let mut decoder = Decoder::new();
/// let mut buffer = Buffer::with_capacity(1024);
///
/// buffer.put(b"GET /test?fo").unwrap();
/// assert!(decoder.decode(&mut buffer).unwrap().is_none());
///
/// buffer.compact();
/// buffer.put(b"o=bar HTTP/1.1\r\n\r\n").unwrap();
/// let request = decoder.decode(&mut buffer).unwrap().unwrap();
///
/// assert_eq!(request.method(), Method::Get);
/// assert_eq!(request.path(), "/test");
/// assert_eq!(request.query_param("foo"), Some("bar"));
/// ```
pub struct Decoder {
    stage: Stage,
    body_limit: usize,
    consumer: ConsumerSlot,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_body_limit(usize::MAX)
    }

    /// Decoder rejecting `Content-Length` values above `limit`.
    /// The buffer capacity is always an upper bound as well.
    pub fn with_body_limit(limit: usize) -> Self {
        Self {
            stage: Stage::RequestLine,
            body_limit: limit,
            consumer: ConsumerSlot::default(),
        }
    }

    pub fn state(&self) -> State {
        match self.stage {
            Stage::RequestLine => State::RequestLine,
            Stage::Headers(_) => State::Headers,
            Stage::Body(..) => State::Body,
            Stage::ChunkedBody => State::ChunkedBody,
            Stage::Done => State::Done,
        }
    }

    /// Drops any partial request and the chunk consumer.
    pub fn reset(&mut self) {
        self.stage = Stage::RequestLine;
        self.consumer.take();
    }

    /// Advances the decoder over the readable bytes of `buffer`.
    ///
    /// Returns a request once its head, and for `Content-Length` requests
    /// its whole body, is available. A chunked request is returned as soon
    /// as its head is known; later calls feed its chunks to the consumer
    /// registered with [`Request::on_chunk`] and return `Ok(None)`.
    ///
    /// `Ok(None)` also means more bytes are needed. Bytes of an unfinished
    /// step are never consumed, so nothing is lost between calls.
    ///
    /// After an error the decoder state is unspecified; the connection is
    /// expected to be closed.
    pub fn decode<'b>(&'b mut self, buffer: &'b mut Buffer) -> Result<Option<Request<'b>>, Error> {
        if let Stage::Done = self.stage {
            self.reset();
        }

        loop {
            self.stage = match mem::replace(&mut self.stage, Stage::Done) {
                Stage::RequestLine => match parse_request_line(buffer)? {
                    Some(head) => Stage::Headers(head),
                    None => {
                        self.stage = Stage::RequestLine;
                        return Ok(None);
                    }
                },
                Stage::Headers(mut head) => {
                    if !parse_headers(buffer, &mut head.headers)? {
                        self.stage = Stage::Headers(head);
                        return Ok(None);
                    }

                    let limit = self.body_limit.min(buffer.capacity());
                    match framing(&head.headers, limit)? {
                        Framing::Length(0) => {
                            self.stage = Stage::Done;
                            return Ok(Some(Request::new(head, Body::Full(&[]), &self.consumer)));
                        }
                        Framing::Length(length) => Stage::Body(head, length),
                        Framing::Chunked => {
                            self.stage = Stage::ChunkedBody;
                            return Ok(Some(Request::new(head, Body::Chunked, &self.consumer)));
                        }
                        Framing::None => {
                            self.stage = Stage::Done;
                            return Ok(Some(Request::new(head, Body::Empty, &self.consumer)));
                        }
                    }
                }
                Stage::Body(head, length) => {
                    if buffer.len() < length {
                        self.stage = Stage::Body(head, length);
                        return Ok(None);
                    }

                    let start = buffer.position();
                    buffer.advance(length);
                    self.stage = Stage::Done;

                    let buffer: &'b Buffer = buffer;
                    let body = Body::Full(buffer.span(start, start + length));
                    return Ok(Some(Request::new(head, body, &self.consumer)));
                }
                Stage::ChunkedBody => {
                    self.stage = match self.read_chunks(buffer)? {
                        true => Stage::Done,
                        false => Stage::ChunkedBody,
                    };
                    return Ok(None);
                }
                Stage::Done => return Ok(None),
            };
        }
    }

    /// Feeds every complete chunk to the consumer. Returns `true` once the
    /// terminating chunk and the empty line after it are consumed.
    fn read_chunks(&mut self, buffer: &mut Buffer) -> Result<bool, Error> {
        loop {
            let mark = buffer.position();
            let Some((line, consumed)) = next_line(buffer.readable()) else {
                return Ok(false);
            };

            let size = types::slice_to_usize(line).ok_or(Error::InvalidChunkSize)?;
            // Size line, payload and CRLF must fit the buffer at once
            if size > buffer.capacity().saturating_sub(consumed + 2) {
                return Err(Error::ChunkTooLarge {
                    size,
                    capacity: buffer.capacity(),
                });
            }
            buffer.advance(consumed);

            if size == 0 {
                // Trailer lines are skipped up to the empty line
                loop {
                    let Some((line, consumed)) = next_line(buffer.readable()) else {
                        buffer.rewind(mark);
                        return Ok(false);
                    };

                    let empty = line.is_empty();
                    buffer.advance(consumed);
                    if empty {
                        break;
                    }
                }

                if let Some(mut consumer) = self.consumer.take() {
                    consumer.on_end();
                }
                return Ok(true);
            }

            let data = buffer.readable();
            if data.len() < size + 2 {
                buffer.rewind(mark);
                return Ok(false);
            }
            if &data[size..size + 2] != b"\r\n" {
                return Err(Error::InvalidChunkTerminator);
            }

            let mut consumer = self.consumer.take();
            if let Some(consumer) = consumer.as_mut() {
                consumer.on_chunk(&data[..size]);
            }
            self.consumer.set(consumer);

            buffer.advance(size + 2);
        }
    }
}

impl fmt::Debug for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoder")
            .field("state", &self.state())
            .field("body_limit", &self.body_limit)
            .finish()
    }
}

// Finds the next line. Returns it without `\r\n` (or a bare `\n`) and the
// number of bytes including the terminator.
#[inline]
fn next_line(data: &[u8]) -> Option<(&[u8], usize)> {
    let lf = memchr(b'\n', data)?;
    let line = &data[..lf];
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    Some((line, lf + 1))
}

#[inline]
fn utf8(bytes: &[u8]) -> Result<&str, Error> {
    simdutf8::basic::from_utf8(bytes).map_err(|_| Error::InvalidEncoding)
}

fn parse_request_line(buffer: &mut Buffer) -> Result<Option<Head>, Error> {
    // Blank lines ahead of a request line are ignored (RFC 7230, 3.5)
    let blank = buffer
        .readable()
        .iter()
        .take_while(|&&b| b == b'\r' || b == b'\n')
        .count();
    buffer.advance(blank);

    let data = buffer.readable();
    let Some((line, consumed)) = next_line(data) else {
        return match Method::is_prefix(data) {
            true => Ok(None),
            false => Err(Error::InvalidMethod),
        };
    };

    let (method, skip) = Method::from_bytes(line)?;
    let rest = &line[skip..];

    let target_end = memchr(b' ', rest).ok_or(Error::MalformedRequestLine)?;
    let target = utf8(&rest[..target_end])?;
    if target.is_empty() {
        return Err(Error::MalformedRequestLine);
    }

    let version = Version::from_bytes(&rest[target_end + 1..])?;

    let mut query = Params::query();
    let path = match target.split_once('?') {
        Some((path, raw)) => {
            Query::parse_into(&mut query, raw);
            path
        }
        None => target,
    };

    let head = Head {
        method,
        path: path.to_owned(),
        version,
        query,
        headers: Params::headers(),
    };

    buffer.advance(consumed);
    Ok(Some(head))
}

// Consumes complete header lines one at a time. Returns `true` after the
// empty line that ends the block.
fn parse_headers(buffer: &mut Buffer, headers: &mut Params) -> Result<bool, Error> {
    while let Some((line, consumed)) = next_line(buffer.readable()) {
        if line.is_empty() {
            buffer.advance(consumed);
            return Ok(true);
        }

        let line = utf8(line)?;
        let (name, value) = line.split_once(':').ok_or(Error::InvalidHeader)?;
        if name.is_empty() {
            return Err(Error::InvalidHeader);
        }

        let value = value.strip_prefix(' ').unwrap_or(value);
        // Stray carriage returns inside a value are dropped
        match value.contains('\r') {
            true => headers.append(name, value.replace('\r', "")),
            false => headers.append(name, value),
        }
        buffer.advance(consumed);
    }

    Ok(false)
}

fn framing(headers: &Params, limit: usize) -> Result<Framing, Error> {
    if let Some(value) = headers.get("Content-Length") {
        let size =
            types::slice_to_usize(value.trim().as_bytes()).ok_or(Error::InvalidContentLength)?;

        if size > limit {
            return Err(Error::BodyTooLarge { size, limit });
        }
        return Ok(Framing::Length(size));
    }

    let chunked = headers
        .get_all("Transfer-Encoding")
        .iter()
        .flat_map(|value| value.split(','))
        .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"));

    Ok(match chunked {
        true => Framing::Chunked,
        false => Framing::None,
    })
}


#[cfg(test)]
mod fragmentation_tests {
    use super::*;
    use std::{cell::RefCell, rc::Rc};

    #[derive(Debug, PartialEq)]
    struct Snapshot {
        method: Method,
        path: String,
        protocol: &'static str,
        headers: Vec<(String, Vec<String>)>,
        query: Vec<(String, Vec<String>)>,
        body: Option<Vec<u8>>,
        chunked: bool,
    }

    impl Snapshot {
        fn of(req: &Request<'_>) -> Self {
            let owned = |params: &Params| -> Vec<(String, Vec<String>)> {
                params
                    .iter()
                    .map(|(k, v)| (k.to_owned(), v.to_vec()))
                    .collect()
            };

            Self {
                method: req.method(),
                path: req.path().to_owned(),
                protocol: req.protocol(),
                headers: owned(req.headers()),
                query: owned(req.query()),
                body: req.body().map(<[u8]>::to_vec),
                chunked: req.is_chunked(),
            }
        }
    }

    // Feeds fragments one by one, decoding until no progress is made, the
    // way a connection does after every read.
    fn decode_fragments(fragments: &[&[u8]]) -> (Vec<Snapshot>, Vec<Vec<u8>>, State) {
        let mut decoder = Decoder::new();
        let mut buffer = Buffer::with_capacity(1024);
        let mut requests = Vec::new();
        let chunks = Rc::new(RefCell::new(Vec::new()));

        for fragment in fragments {
            buffer.compact();
            buffer.put(fragment).unwrap();

            loop {
                let before = (buffer.len(), decoder.state());
                let snapshot = decoder.decode(&mut buffer).unwrap().map(|req| {
                    let sink = Rc::clone(&chunks);
                    req.on_chunk(move |chunk: &[u8]| sink.borrow_mut().push(chunk.to_vec()));
                    Snapshot::of(&req)
                });

                match snapshot {
                    Some(snapshot) => requests.push(snapshot),
                    None if before == (buffer.len(), decoder.state()) => break,
                    None => {}
                }
            }
        }

        let chunks = chunks.borrow().clone();
        (requests, chunks, decoder.state())
    }

    fn assert_split_invariant(input: &[u8]) {
        let whole = decode_fragments(&[&input[..]]);
        assert!(!whole.0.is_empty());

        for split in 0..=input.len() {
            let (a, b) = input.split_at(split);
            assert_eq!(decode_fragments(&[a, b]), whole, "split at {split}");
        }

        let bytes: Vec<&[u8]> = input.chunks(1).collect();
        assert_eq!(decode_fragments(&bytes), whole, "byte by byte");
    }

    #[test]
    fn query_request() {
        assert_split_invariant(b"GET /test?foo=bar HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn headers_request() {
        assert_split_invariant(
            b"GET /test HTTP/1.1\r\nAccept: text/plain\r\nKeep-Alive: timeout=5, max=1000\r\n\r\n",
        );
    }

    #[test]
    fn body_request() {
        assert_split_invariant(
            b"POST /test?foo=bar HTTP/1.1\r\nContent-Length: 13\r\n\r\nHello, world!\r\n",
        );
    }

    #[test]
    fn chunked_request() {
        let input = b"POST /test HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n7\r\nHello, \r\n6\r\nworld!\r\n0\r\n\r\n";
        assert_split_invariant(input);

        let (requests, chunks, state) = decode_fragments(&[&input[..]]);
        assert_eq!(requests.len(), 1);
        assert!(requests[0].chunked);
        assert_eq!(chunks, [b"Hello, ".to_vec(), b"world!".to_vec()]);
        assert_eq!(state, State::RequestLine);
    }

    #[test]
    fn pipelined_requests() {
        let input = b"POST /a HTTP/1.1\r\nContent-Length: 2\r\n\r\nhiGET /b?x=1 HTTP/1.1\r\n\r\nPOST /c HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n1\r\nz\r\n0\r\n\r\nDELETE /d HTTP/1.0\r\n\r\n";
        assert_split_invariant(input);

        let (requests, chunks, _) = decode_fragments(&[&input[..]]);
        let paths: Vec<_> = requests.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, ["/a", "/b", "/c", "/d"]);
        assert_eq!(chunks, [b"z".to_vec()]);
    }
}
