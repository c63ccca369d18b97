//! Per-reactor completion queue.
//!
//! Every operation is submitted explicitly and reports back exactly once
//! through [`Ring::next`]. Nothing re-arms by itself: after a read
//! completes, the next read is only issued if the reactor queues it.
//! Operations own their socket half and buffer while in flight and hand
//! both back with the completion.

use crate::{buffer::PooledBuffer, http::response::SealedResponse};
use std::{
    cell::Cell,
    io,
    net::SocketAddr,
    rc::Rc,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::{self, JoinHandle},
};

pub(crate) type ConnId = u64;

pub(crate) enum Completion {
    Accepted(io::Result<(TcpStream, SocketAddr)>),
    Read {
        id: ConnId,
        half: OwnedReadHalf,
        buffer: PooledBuffer,
        result: io::Result<usize>,
    },
    Written {
        id: ConnId,
        half: OwnedWriteHalf,
        buffer: PooledBuffer,
        result: io::Result<()>,
    },
    Closed {
        id: ConnId,
    },
    /// A handler finished the response to request `seq`, possibly on
    /// another thread.
    Response {
        id: ConnId,
        seq: u64,
        response: SealedResponse,
    },
    Shutdown,
}

/// Sending side of a ring, usable from any thread.
#[derive(Debug, Clone)]
pub(crate) struct RingSender(UnboundedSender<Completion>);

impl RingSender {
    #[inline]
    pub(crate) fn complete(&self, completion: Completion) {
        // A stopped reactor has nothing left to deliver to
        let _ = self.0.send(completion);
    }
}

// Counts one in-flight operation until dropped, including when the task
// owning it is aborted.
struct InFlight(Rc<Cell<usize>>);

impl InFlight {
    fn enter(counter: &Rc<Cell<usize>>) -> Self {
        counter.set(counter.get() + 1);
        Self(Rc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

pub(crate) struct Ring {
    sender: UnboundedSender<Completion>,
    receiver: UnboundedReceiver<Completion>,
    in_flight: Rc<Cell<usize>>,
    depth: usize,
}

impl Ring {
    pub(crate) fn new(depth: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        Self {
            sender,
            receiver,
            in_flight: Rc::new(Cell::new(0)),
            depth: depth.max(1),
        }
    }

    #[inline]
    pub(crate) fn sender(&self) -> RingSender {
        RingSender(self.sender.clone())
    }

    #[inline]
    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.get()
    }

    /// `false` while `depth` operations are in flight.
    #[inline]
    pub(crate) fn has_capacity(&self) -> bool {
        self.in_flight.get() < self.depth
    }

    /// Waits for the next completion.
    pub(crate) async fn next(&mut self) -> Completion {
        // The ring keeps a sender of its own, so the channel never closes
        self.receiver.recv().await.unwrap_or(Completion::Shutdown)
    }

    pub(crate) fn queue_accept(&self, listener: &Rc<TcpListener>) {
        let guard = InFlight::enter(&self.in_flight);
        let listener = Rc::clone(listener);
        let sender = self.sender();

        task::spawn_local(async move {
            let result = listener.accept().await;
            drop(guard);

            sender.complete(Completion::Accepted(result));
        });
    }

    /// Reads into the writable part of `buffer`. The returned handle aborts
    /// the read; the half and buffer are then dropped with the task.
    pub(crate) fn queue_read(
        &self,
        id: ConnId,
        mut half: OwnedReadHalf,
        mut buffer: PooledBuffer,
    ) -> JoinHandle<()> {
        let guard = InFlight::enter(&self.in_flight);
        let sender = self.sender();

        task::spawn_local(async move {
            let result = half.read(buffer.writable()).await;
            if let Ok(n) = result {
                buffer.filled(n);
            }
            drop(guard);

            sender.complete(Completion::Read {
                id,
                half,
                buffer,
                result,
            });
        })
    }

    /// Writes every readable byte of `buffer`.
    pub(crate) fn queue_write(&self, id: ConnId, mut half: OwnedWriteHalf, buffer: PooledBuffer) {
        let guard = InFlight::enter(&self.in_flight);
        let sender = self.sender();

        task::spawn_local(async move {
            let result = half.write_all(buffer.readable()).await;
            drop(guard);

            sender.complete(Completion::Written {
                id,
                half,
                buffer,
                result,
            });
        });
    }

    /// Shuts the write side down and drops both halves.
    pub(crate) fn queue_close(
        &self,
        id: ConnId,
        reader: Option<OwnedReadHalf>,
        writer: Option<OwnedWriteHalf>,
    ) {
        let guard = InFlight::enter(&self.in_flight);
        let sender = self.sender();

        task::spawn_local(async move {
            if let Some(mut writer) = writer {
                let _ = writer.shutdown().await;
            }
            drop(reader);
            drop(guard);

            sender.complete(Completion::Closed { id });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use tokio::task::LocalSet;

    async fn pair(listener: &TcpListener) -> (TcpStream, TcpStream) {
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());

        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn read_write_close() {
        LocalSet::new()
            .run_until(async {
                let pool = BufferPool::new(64, 2);
                let mut ring = Ring::new(8);
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

                let (mut client, server) = pair(&listener).await;
                let (reader, writer) = server.into_split();

                ring.queue_read(1, reader, pool.take());
                assert_eq!(ring.in_flight(), 1);

                client.write_all(b"ping").await.unwrap();
                let Completion::Read { id, half, buffer, result } = ring.next().await else {
                    panic!("expected a read completion");
                };
                assert_eq!((id, result.unwrap()), (1, 4));
                assert_eq!(buffer.readable(), b"ping");
                assert_eq!(ring.in_flight(), 0);

                ring.queue_write(1, writer, buffer);
                let Completion::Written { half: writer, buffer, result, .. } = ring.next().await
                else {
                    panic!("expected a write completion");
                };
                result.unwrap();
                drop(buffer);
                assert_eq!(pool.available(), 2);

                let mut echoed = [0; 4];
                client.read_exact(&mut echoed).await.unwrap();
                assert_eq!(&echoed, b"ping");

                ring.queue_close(1, Some(half), Some(writer));
                assert!(matches!(ring.next().await, Completion::Closed { id: 1 }));
                assert_eq!(client.read(&mut echoed).await.unwrap(), 0);
            })
            .await;
    }

    #[tokio::test]
    async fn depth_and_abort() {
        LocalSet::new()
            .run_until(async {
                let pool = BufferPool::new(16, 1);
                let ring = Ring::new(2);
                let listener = Rc::new(TcpListener::bind("127.0.0.1:0").await.unwrap());

                let (_client, server) = pair(&listener).await;
                let (reader, _writer) = server.into_split();

                ring.queue_accept(&listener);
                assert!(ring.has_capacity());

                let read = ring.queue_read(7, reader, pool.take());
                assert!(!ring.has_capacity());
                assert_eq!(pool.available(), 0);

                read.abort();
                assert!(read.await.unwrap_err().is_cancelled());
                assert_eq!(ring.in_flight(), 1);
                assert_eq!(pool.available(), 1);
            })
            .await;
    }

    #[tokio::test]
    async fn sender_crosses_threads() {
        let mut ring = Ring::new(1);
        let sender = ring.sender();

        std::thread::spawn(move || sender.complete(Completion::Shutdown))
            .join()
            .unwrap();

        assert!(matches!(ring.next().await, Completion::Shutdown));
    }
}
