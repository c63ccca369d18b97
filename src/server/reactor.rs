use crate::{
    buffer::BufferPool,
    http::decoder::Decoder,
    limits::ConnLimits,
    server::{
        connection::{Connection, Next},
        ring::{Completion, ConnId, Ring},
        server_impl::Handler,
    },
};
use log::{debug, info, trace, warn};
use std::{
    collections::HashMap,
    io,
    net::SocketAddr,
    rc::Rc,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    net::{TcpListener, TcpStream},
    time::{self, MissedTickBehavior},
};

/// State shared by every reactor of one server.
pub(crate) struct Shared<H> {
    pub(crate) handler: H,
    pub(crate) input_pool: Arc<BufferPool>,
    pub(crate) output_pool: Arc<BufferPool>,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) body_limit: usize,
}

/// Event loop of one reactor thread.
///
/// Waits on the ring, applies each completion to its connection and
/// decides what to submit next. The listening socket is re-armed after
/// every event unless the ring is saturated.
pub(crate) struct Reactor<H: Handler> {
    index: usize,
    ring: Ring,
    listener: Rc<TcpListener>,
    shared: Arc<Shared<H>>,
    connections: HashMap<ConnId, Connection>,
    next_id: ConnId,
    accepting: bool,
}

impl<H: Handler> Reactor<H> {
    pub(crate) fn new(index: usize, ring: Ring, listener: TcpListener, shared: Arc<Shared<H>>) -> Self {
        Self {
            index,
            ring,
            listener: Rc::new(listener),
            shared,
            connections: HashMap::new(),
            next_id: 0,
            accepting: false,
        }
    }

    pub(crate) async fn run(mut self) {
        info!("reactor {} started", self.index);

        let ttl = self.shared.conn_limits.idle_ttl;
        let mut sweep = time::interval(self.shared.conn_limits.sweep_interval.max(Duration::from_millis(1)));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.arm_accept();
        loop {
            let event = tokio::select! {
                completion = self.ring.next() => Some(completion),
                _ = sweep.tick(), if !ttl.is_zero() => None,
            };

            match event {
                Some(Completion::Shutdown) => break,
                Some(completion) => self.complete(completion),
                None => self.sweep(ttl),
            }

            self.arm_accept();
        }

        info!(
            "reactor {} stopped, dropping {} connections",
            self.index,
            self.connections.len()
        );
        self.connections.clear();
    }

    fn arm_accept(&mut self) {
        if self.accepting {
            return;
        }

        if !self.ring.has_capacity() {
            trace!("reactor {}: ring saturated, accept deferred", self.index);
            return;
        }

        self.ring.queue_accept(&self.listener);
        self.accepting = true;
    }

    fn complete(&mut self, completion: Completion) {
        let shared = Arc::clone(&self.shared);

        match completion {
            Completion::Accepted(result) => {
                self.accepting = false;
                self.open(result);
            }
            Completion::Read { id, half, buffer, result } => {
                // Reads of closed connections end up here with their buffer
                if let Some(conn) = self.connections.get_mut(&id) {
                    let next = conn.on_read(&self.ring, &shared.handler, half, buffer, result);
                    self.apply(id, next);
                }
            }
            Completion::Written { id, half, buffer, result } => {
                if let Some(conn) = self.connections.get_mut(&id) {
                    let next = conn.on_written(&self.ring, half, buffer, result);
                    self.apply(id, next);
                }
            }
            Completion::Response { id, seq, response } => match self.connections.get_mut(&id) {
                Some(conn) => {
                    let next = conn.on_response(&self.ring, seq, response);
                    self.apply(id, next);
                }
                None => trace!("reactor {}: response for closed connection {id}", self.index),
            },
            Completion::Closed { id } => trace!("reactor {}: connection {id} closed", self.index),
            Completion::Shutdown => {}
        }
    }

    fn open(&mut self, result: io::Result<(TcpStream, SocketAddr)>) {
        let (stream, peer) = match result {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("reactor {}: accept failed: {e}", self.index);
                return;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("{peer}: TCP_NODELAY not set: {e}");
        }

        let id = self.next_id;
        self.next_id += 1;

        let mut conn = Connection::new(
            id,
            stream,
            peer,
            self.shared.input_pool.take(),
            self.shared.output_pool.take(),
            Decoder::with_body_limit(self.shared.body_limit),
        );
        conn.start_read(&self.ring);

        debug!("reactor {}: accepted {peer} as {id}", self.index);
        self.connections.insert(id, conn);
    }

    fn sweep(&mut self, ttl: Duration) {
        let now = Instant::now();
        let idle: Vec<ConnId> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.is_idle(now, ttl))
            .map(|(id, _)| *id)
            .collect();

        for id in idle {
            if let Some(conn) = self.connections.remove(&id) {
                warn!("{}: idle for {ttl:?}, closing", conn.peer());
                conn.close(&self.ring);
            }
        }
    }

    fn apply(&mut self, id: ConnId, next: Next) {
        if next == Next::Close {
            if let Some(conn) = self.connections.remove(&id) {
                debug!("{}: closing", conn.peer());
                conn.close(&self.ring);
            }
        }
    }
}
