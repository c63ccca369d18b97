use crate::{
    buffer::{Buffer, PooledBuffer},
    errors::Error,
    http::{
        decoder::{Decoder, State},
        encoder,
        request::Request,
        response::{Response, SealedResponse},
        types::Version,
    },
    server::{
        ring::{Completion, ConnId, Ring},
        server_impl::Handler,
    },
};
use log::{debug, error, trace, warn};
use std::{
    collections::BTreeMap,
    io,
    net::SocketAddr,
    panic::{self, AssertUnwindSafe},
    time::{Duration, Instant},
};
use tokio::{
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    task::JoinHandle,
};

/// What the reactor should do with a connection after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Next {
    Open,
    Close,
}

/// State of one accepted socket.
///
/// Requests are numbered in arrival order. Handlers may answer in any
/// order, even from other threads, but responses are written strictly by
/// number: a finished response waits in `ready` until every earlier one
/// has been encoded.
///
/// At most one read and one write are in flight. While an operation runs,
/// the socket half and the buffer it uses are owned by the ring, so
/// `source`/`sink` are `None`.
pub(crate) struct Connection {
    id: ConnId,
    peer: SocketAddr,
    source: Option<(OwnedReadHalf, PooledBuffer)>,
    sink: Option<(OwnedWriteHalf, PooledBuffer)>,
    read_task: Option<JoinHandle<()>>,
    decoder: Decoder,

    next_seq: u64,
    next_write: u64,
    ready: BTreeMap<u64, SealedResponse>,

    /// No new requests are started; the connection closes once every
    /// started one is answered.
    closing: bool,
    /// Canned error response written after the last regular one.
    trailer: Option<&'static [u8]>,
    last_read: Instant,
}

impl Connection {
    pub(crate) fn new(
        id: ConnId,
        stream: TcpStream,
        peer: SocketAddr,
        input: PooledBuffer,
        output: PooledBuffer,
        decoder: Decoder,
    ) -> Self {
        let (reader, writer) = stream.into_split();

        Self {
            id,
            peer,
            source: Some((reader, input)),
            sink: Some((writer, output)),
            read_task: None,
            decoder,

            next_seq: 0,
            next_write: 0,
            ready: BTreeMap::new(),

            closing: false,
            trailer: None,
            last_read: Instant::now(),
        }
    }

    #[inline]
    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queues the next read unless one is in flight or no more input is wanted.
    pub(crate) fn start_read(&mut self, ring: &Ring) {
        if !self.wants_input() {
            return;
        }

        if let Some((reader, input)) = self.source.take() {
            self.read_task = Some(ring.queue_read(self.id, reader, input));
        }
    }

    pub(crate) fn on_read<H: Handler>(
        &mut self,
        ring: &Ring,
        handler: &H,
        reader: OwnedReadHalf,
        mut input: PooledBuffer,
        result: io::Result<usize>,
    ) -> Next {
        self.read_task = None;

        match result {
            Err(e) => {
                debug!("{}: read failed: {e}", self.peer);
                self.source = Some((reader, input));
                return Next::Close;
            }
            Ok(0) => {
                trace!("{}: peer finished sending", self.peer);
                self.closing = true;
                self.decoder.reset();
            }
            Ok(n) => {
                trace!("{}: read {n} bytes", self.peer);
                self.last_read = Instant::now();

                match self.process(ring, handler, &mut input) {
                    Err(e) => self.fail(e),
                    Ok(()) => {
                        input.compact();
                        if input.is_full() && self.wants_input() {
                            self.fail(Error::HeadTooLarge(input.capacity()));
                        }
                    }
                }
            }
        }

        self.source = Some((reader, input));
        self.start_read(ring);
        self.flush(ring)
    }

    /// Decodes and dispatches every complete request in `input`.
    fn process<H: Handler>(&mut self, ring: &Ring, handler: &H, input: &mut Buffer) -> Result<(), Error> {
        let mut panicked = false;

        while self.wants_input() {
            let (state, len) = (self.decoder.state(), input.len());

            let dispatched = match self.decoder.decode(input)? {
                Some(mut req) => {
                    let seq = self.next_seq;
                    self.next_seq += 1;

                    if wants_close(&req) {
                        self.closing = true;
                    }

                    let (id, sender) = (self.id, ring.sender());
                    let resp = Response::new(move |response| {
                        sender.complete(Completion::Response { id, seq, response })
                    });

                    trace!("{}: #{seq} {} {}", self.peer, req.method(), req.path());
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&mut req, resp)));

                    if outcome.is_err() {
                        error!("{}: #{seq}: {}", self.peer, Error::HandlerPanicked);
                        self.closing = true;
                        panicked = true;
                    }
                    true
                }
                None => false,
            };

            // Nothing more is read for a request whose handler panicked
            if panicked {
                self.decoder.reset();
                break;
            }
            if !dispatched && state == self.decoder.state() && len == input.len() {
                break;
            }
        }

        Ok(())
    }

    /// Stops reading and answers with the canned response of `error` once
    /// every earlier request has been answered.
    fn fail(&mut self, error: Error) {
        warn!("{}: {error}", self.peer);

        self.trailer = error.as_http();
        self.closing = true;
        self.decoder.reset();
    }

    pub(crate) fn on_response(&mut self, ring: &Ring, seq: u64, response: SealedResponse) -> Next {
        // Answers to requests abandoned after a closing response
        if seq < self.next_write || seq >= self.next_seq {
            trace!("{}: #{seq} discarded", self.peer);
            return Next::Open;
        }

        self.ready.insert(seq, response);
        self.flush(ring)
    }

    pub(crate) fn on_written(
        &mut self,
        ring: &Ring,
        writer: OwnedWriteHalf,
        mut output: PooledBuffer,
        result: io::Result<()>,
    ) -> Next {
        output.clear();
        self.sink = Some((writer, output));

        if let Err(e) = result {
            debug!("{}: write failed: {e}", self.peer);
            return Next::Close;
        }

        self.flush(ring)
    }

    /// Encodes ready responses in order and queues a write if anything was
    /// encoded. Returns [`Next::Close`] once a closing connection has
    /// nothing left to write.
    fn flush(&mut self, ring: &Ring) -> Next {
        let Some((writer, mut output)) = self.sink.take() else {
            // A write is in flight; its completion flushes again
            return Next::Open;
        };

        while let Some(response) = self.ready.remove(&self.next_write) {
            match encoder::encode(&response, &mut output) {
                Ok(()) => {}
                Err(Error::ResponseTooLarge { .. }) if !output.is_empty() => {
                    self.ready.insert(self.next_write, response);
                    break;
                }
                Err(e) => {
                    error!("{}: #{}: {e}", self.peer, self.next_write);
                    self.trailer = e.as_http();
                    self.abandon_after(self.next_write);
                    break;
                }
            }

            self.next_write += 1;
            if response.closes_connection() {
                self.abandon_after(self.next_write - 1);
            }
        }

        let settled = self.next_write == self.next_seq;
        if settled && self.closing {
            if let Some(trailer) = self.trailer {
                // A trailer that cannot fit an empty buffer is dropped
                if output.put(trailer).is_ok() || output.is_empty() {
                    self.trailer = None;
                }
            }
        }

        if !output.is_empty() {
            trace!("{}: writing {} bytes", self.peer, output.len());
            ring.queue_write(self.id, writer, output);
            return Next::Open;
        }

        self.sink = Some((writer, output));
        match self.closing && settled && self.trailer.is_none() {
            true => Next::Close,
            false => Next::Open,
        }
    }

    // Drops every request after `seq`, answered or not.
    fn abandon_after(&mut self, seq: u64) {
        self.closing = true;
        self.decoder.reset();
        self.ready.clear();
        self.next_seq = seq + 1;
        self.next_write = self.next_write.max(seq + 1);
    }

    /// `true` when nothing was read for `ttl` and nothing is owed to the
    /// peer. A stalled chunked upload counts as idle.
    pub(crate) fn is_idle(&self, now: Instant, ttl: Duration) -> bool {
        let owes = self.next_write != self.next_seq && self.decoder.state() != State::ChunkedBody;

        !ttl.is_zero()
            && !owes
            && self.sink.is_some()
            && now.saturating_duration_since(self.last_read) >= ttl
    }

    pub(crate) fn close(mut self, ring: &Ring) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }

        let reader = self.source.take().map(|(reader, _)| reader);
        let writer = self.sink.take().map(|(writer, _)| writer);
        ring.queue_close(self.id, reader, writer);
    }

    #[inline]
    fn wants_input(&self) -> bool {
        !self.closing || self.decoder.state() == State::ChunkedBody
    }
}

// Persistence per RFC 7230 section 6.3
fn wants_close(req: &Request<'_>) -> bool {
    match req.header("Connection").map(str::trim) {
        Some(value) if value.eq_ignore_ascii_case("close") => true,
        Some(value) if value.eq_ignore_ascii_case("keep-alive") => false,
        _ => req.version() == Version::Http10,
    }
}
