//! hipshot - completion-driven HTTP/1.1 server engine
//!
//! Each reactor thread owns a completion queue, its connections and their
//! buffers. Requests are decoded straight out of the connection's input
//! buffer by a resumable decoder, routed through a segment trie and
//! answered by handlers that may reply on any thread. Responses are
//! encoded into a per-connection output buffer in request order.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1**: keep-alive, pipelining, `Content-Length` and chunked request bodies
//! - **HTTP/1.0**: closes after each response unless `Connection: keep-alive` is sent
//!
//! # Characteristics
//!
//! - **Zero-copy requests** - fixed-length bodies are slices of the input buffer
//! - **Streaming uploads** - chunked bodies are fed to a [`ChunkConsumer`] as they arrive
//! - **Pooled buffers** - every connection borrows two fixed-size buffers from shared pools
//! - **Ordered responses** - handlers may answer out of order, the wire order never changes
//! - **Bounded queues** - the listening socket waits while a reactor's ring is saturated
//!
//! # Examples
//!
//! Quick start:
//! ```no_run
//! use hipshot::{Router, Server};
//!
//! let router = Router::new()
//!     .get("/", |_, resp| resp.body("Hello, world!").send())
//!     .get("/users/{id}", |req, resp| {
//!         let id = req.path_param("id").unwrap_or_default().to_owned();
//!         resp.body(id).send()
//!     });
//!
//! Server::builder()
//!     .port(8080)
//!     .handler(router)
//!     .build()
//!     .start()
//!     .unwrap()
//!     .join()
//!     .unwrap();
//! ```
//! Decoding without a server:
//! ```
//! use hipshot::{Body, Buffer, Decoder, Method};
//!
//! let mut decoder = Decoder::new();
//! let mut buffer = Buffer::from_slice(1024, "POST /echo HTTP/1.1\r\nContent-Length: 2\r\n\r\nhi");
//!
//! let request = decoder.decode(&mut buffer).unwrap().unwrap();
//! assert_eq!(request.method(), Method::Post);
//! assert_eq!(request.body_kind(), Body::Full(b"hi"));
//! ```

pub(crate) mod http {
    pub(crate) mod decoder;
    pub mod encoder;
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod reactor;
    pub(crate) mod ring;
    pub(crate) mod server_impl;
}
pub(crate) mod buffer;
pub(crate) mod errors;
pub mod limits;
pub(crate) mod router;

pub use crate::{
    buffer::{Buffer, BufferPool, PooledBuffer},
    errors::Error,
    http::{
        decoder::{Decoder, State},
        encoder, query,
        request::{Body, ChunkConsumer, Request},
        response::{
            write::{BodyWriter, WriteBuffer},
            Response, SealedResponse,
        },
        types::{Method, Params, StatusCode, Version},
    },
    router::Router,
    server::server_impl::{Handler, Server, ServerBuilder, ServerHandle},
};
