use crate::{
    buffer::BufferPool,
    errors::Error,
    http::{request::Request, response::Response},
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits},
    server::{
        reactor::{Reactor, Shared},
        ring::{Completion, Ring, RingSender},
    },
};
use log::{error, info};
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    net::{self, SocketAddr, ToSocketAddrs},
    sync::{mpsc, Arc},
    thread::{self, JoinHandle},
};
use tokio::{net::TcpListener, runtime, task::LocalSet};

/// A trait for handling HTTP requests.
///
/// The handler receives the request and a [`Response`] it owns. Calling
/// [`send`](Response::send) delivers the response; that may happen before
/// `handle` returns, or later from any thread. Responses are still written
/// to the connection in request order.
///
/// Closures with the matching signature implement this trait, and so does
/// [`Router`](crate::Router).
///
/// # Examples
///
/// Synchronous handler
/// ```
/// use hipshot::{Handler, Request, Response, StatusCode};
///
/// struct Echo;
///
/// impl Handler for Echo {
///     fn handle(&self, req: &mut Request<'_>, resp: Response) {
///         match req.body() {
///             Some(body) => resp.body(body).send(),
///             None => resp.status(StatusCode::NoContent).send(),
///         }
///     }
/// }
/// ```
/// Answering from another thread
/// ```
/// use hipshot::{Handler, Request, Response};
/// use std::{thread, time::Duration};
///
/// struct Slow;
///
/// impl Handler for Slow {
///     fn handle(&self, _: &mut Request<'_>, resp: Response) {
///         thread::spawn(move || {
///             thread::sleep(Duration::from_millis(10));
///             resp.body("done").send();
///         });
///     }
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    /// Handles one request.
    ///
    /// A `Response` dropped without being sent is answered with `500`. A
    /// panic is answered with `500` as well, and the connection is closed.
    fn handle(&self, req: &mut Request<'_>, resp: Response);
}

impl<F> Handler for F
where
    F: Fn(&mut Request<'_>, Response) + Send + Sync + 'static,
{
    #[inline(always)]
    fn handle(&self, req: &mut Request<'_>, resp: Response) {
        self(req, resp)
    }
}

/// An HTTP server running one reactor per thread.
///
/// # Examples
///
/// ```no_run
/// use hipshot::{Request, Response, Server};
///
/// fn hello(_: &mut Request<'_>, resp: Response) {
///     resp.body("Hello, world!").send()
/// }
///
/// let handle = Server::builder()
///     .host("127.0.0.1")
///     .port(8080)
///     .handler(hello)
///     .build()
///     .start()
///     .unwrap();
///
/// println!("listening on {}", handle.local_addr());
/// handle.join().unwrap();
/// ```
pub struct Server<H: Handler> {
    host: String,
    port: u16,
    handler: H,

    server_limits: ServerLimits,
    conn_limits: ConnLimits,
    request_limits: ReqLimits,
    response_limits: RespLimits,
}

impl<H: Handler> Server<H> {
    /// Creates a new builder for configuring the server instance.
    #[inline]
    pub fn builder() -> ServerBuilder<H> {
        ServerBuilder {
            host: None,
            port: None,
            handler: None,

            server_limits: None,
            request_limits: None,
            response_limits: None,
            connection_limits: None,
        }
    }

    /// Binds the listening socket and starts the reactor threads.
    ///
    /// Returns once every reactor is running. Binding errors, and failures
    /// to start a reactor, are returned here; nothing keeps running then.
    pub fn start(self) -> Result<ServerHandle, Error> {
        let listener = self.bind()?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(Shared {
            handler: self.handler,
            input_pool: BufferPool::new(self.request_limits.buffer_size, self.server_limits.buffer_pool_size),
            output_pool: BufferPool::new(self.response_limits.buffer_size, self.server_limits.buffer_pool_size),
            body_limit: self.request_limits.body_limit(),
            conn_limits: self.conn_limits,
        });

        let (ready_tx, ready_rx) = mpsc::channel();
        let mut handle = ServerHandle {
            local_addr,
            wakers: Vec::new(),
            workers: Vec::new(),
        };

        let mut failure: Option<Error> = None;
        for index in 0..self.server_limits.threads.max(1) {
            let shared = Arc::clone(&shared);
            let ready = ready_tx.clone();
            let depth = self.server_limits.ring_depth;

            let spawned = listener.try_clone().and_then(|listener| {
                thread::Builder::new()
                    .name(format!("hipshot-reactor-{index}"))
                    .spawn(move || worker(index, listener, shared, depth, ready))
            });

            match spawned {
                Ok(worker) => handle.workers.push(worker),
                Err(e) => {
                    failure = Some(e.into());
                    break;
                }
            }
        }
        drop(ready_tx);

        // Every started reactor reports once, or hangs up if it panicked
        // before reporting
        for _ in 0..handle.workers.len() {
            match ready_rx.recv() {
                Ok(Ok(waker)) => handle.wakers.push(waker),
                Ok(Err(e)) => {
                    failure.get_or_insert(e);
                }
                Err(_) => {
                    failure.get_or_insert(Error::WorkerPanicked);
                    break;
                }
            }
        }

        if let Some(e) = failure {
            error!("server failed to start: {e}");
            let _ = handle.stop();
            return Err(e);
        }

        info!(
            "listening on {local_addr} with {} reactors",
            handle.workers.len()
        );
        Ok(handle)
    }

    fn bind(&self) -> Result<net::TcpListener, Error> {
        let address = format!("{}:{}", self.host, self.port);
        let addr = address
            .to_socket_addrs()
            .map_err(|_| Error::InvalidAddress(address.clone()))?
            .next()
            .ok_or_else(|| Error::InvalidAddress(address.clone()))?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(self.server_limits.backlog)?;

        Ok(socket.into())
    }
}

fn worker<H: Handler>(
    index: usize,
    listener: net::TcpListener,
    shared: Arc<Shared<H>>,
    depth: usize,
    ready: mpsc::Sender<Result<RingSender, Error>>,
) {
    let runtime = match runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready.send(Err(e.into()));
            return;
        }
    };

    LocalSet::new().block_on(&runtime, async move {
        let listener = match TcpListener::from_std(listener) {
            Ok(listener) => listener,
            Err(e) => {
                error!("reactor {index}: {e}");
                let _ = ready.send(Err(e.into()));
                return;
            }
        };

        let ring = Ring::new(depth);
        if ready.send(Ok(ring.sender())).is_err() {
            return;
        }
        drop(ready);

        Reactor::new(index, ring, listener, shared).run().await;
    });
}

//

/// Builder for configuring and creating [`Server`] instances.
pub struct ServerBuilder<H: Handler> {
    host: Option<String>,
    port: Option<u16>,
    handler: Option<H>,

    server_limits: Option<ServerLimits>,
    request_limits: Option<ReqLimits>,
    response_limits: Option<RespLimits>,
    connection_limits: Option<ConnLimits>,
}

impl<H: Handler> ServerBuilder<H> {
    /// Address to listen on (default: `0.0.0.0`).
    #[inline(always)]
    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Port to listen on (default: `8080`). `0` picks a free port, see
    /// [`ServerHandle::local_addr`].
    #[inline(always)]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the request handler that will process incoming requests.
    ///
    /// **This is a required component.**
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use hipshot::{Router, Server};
    ///
    /// let server = Server::builder()
    ///     .handler(Router::new().get("/", |_, resp| resp.body("Hello").send()))
    ///     .build();
    /// ```
    #[inline(always)]
    pub fn handler(mut self, handler: H) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Configures reactor threads, ring depth and buffer pools.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use hipshot::{Router, Server, limits::ServerLimits};
    ///
    /// let server = Server::builder()
    ///     .handler(Router::new())
    ///     .server_limits(ServerLimits {
    ///         // Your changes
    ///         threads: 2,
    ///         ring_depth: 1024,
    ///         ..ServerLimits::default() // Required line
    ///     })
    ///     .build();
    /// ```
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures idle expiry.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use hipshot::{Router, Server, limits::ConnLimits};
    /// use std::time::Duration;
    ///
    /// let server = Server::builder()
    ///     .handler(Router::new())
    ///     .connection_limits(ConnLimits {
    ///         // Your changes
    ///         idle_ttl: Duration::from_secs(5),
    ///         ..ConnLimits::default() // Required line
    ///     })
    ///     .build();
    /// ```
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Configures the input buffer and the body size limit.
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Configures the output buffer.
    #[inline(always)]
    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.response_limits = Some(limits);
        self
    }

    /// Creates a [`Server`] instance from the builder configuration.
    ///
    /// # Panics
    ///
    /// If [`handler`](Self::handler) was not called.
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server<H> {
        Server {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_owned()),
            port: self.port.unwrap_or(8080),
            handler: self
                .handler
                .expect("The `handler` method must be called to create"),

            server_limits: self.server_limits.unwrap_or_default(),
            conn_limits: self.connection_limits.unwrap_or_default(),
            request_limits: self.request_limits.unwrap_or_default(),
            response_limits: self.response_limits.unwrap_or_default(),
        }
    }
}

//

/// A running server.
///
/// Dropping the handle leaves the reactors running; use
/// [`stop`](Self::stop) or [`join`](Self::join).
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    wakers: Vec<RingSender>,
    workers: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// Address the server is bound to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops every reactor and waits for their threads to exit. Open
    /// connections are dropped without further writes.
    pub fn stop(self) -> Result<(), Error> {
        for waker in &self.wakers {
            waker.complete(Completion::Shutdown);
        }

        self.join()
    }

    /// Blocks until every reactor has exited.
    pub fn join(self) -> Result<(), Error> {
        let mut result = Ok(());
        for worker in self.workers {
            if worker.join().is_err() {
                result = Err(Error::WorkerPanicked);
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        http::{request::ChunkConsumer, types::StatusCode},
        router::Router,
    };
    use std::{
        io::{BufRead, BufReader, Read, Write},
        net::TcpStream,
        time::Duration,
    };

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn serve<H: Handler>(handler: H) -> ServerHandle {
        serve_with(handler, ConnLimits::default())
    }

    fn serve_with<H: Handler>(handler: H, conn_limits: ConnLimits) -> ServerHandle {
        init_logger();

        Server::builder()
            .host("127.0.0.1")
            .port(0)
            .handler(handler)
            .server_limits(ServerLimits {
                threads: 2,
                buffer_pool_size: 4,
                ..ServerLimits::default()
            })
            .connection_limits(conn_limits)
            .request_limits(ReqLimits {
                buffer_size: 1024,
                ..ReqLimits::default()
            })
            .build()
            .start()
            .unwrap()
    }

    struct Client {
        stream: BufReader<TcpStream>,
    }

    impl Client {
        fn connect(handle: &ServerHandle) -> Self {
            let stream = TcpStream::connect(handle.local_addr()).unwrap();
            stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

            Self {
                stream: BufReader::new(stream),
            }
        }

        fn send(&mut self, data: &[u8]) -> &mut Self {
            self.stream.get_mut().write_all(data).unwrap();
            self
        }

        // Status code, headers and body of the next response
        fn response(&mut self) -> (u16, Vec<(String, String)>, String) {
            let mut line = String::new();
            self.stream.read_line(&mut line).unwrap();
            let status = line
                .trim_end()
                .strip_prefix("HTTP/1.1 ")
                .unwrap()
                .parse()
                .unwrap();

            let mut headers = Vec::new();
            loop {
                line.clear();
                self.stream.read_line(&mut line).unwrap();
                match line.trim_end().split_once(": ") {
                    Some((name, value)) => headers.push((name.to_owned(), value.to_owned())),
                    None => break,
                }
            }

            let length: usize = headers
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case("Content-Length"))
                .map(|(_, value)| value.parse().unwrap())
                .unwrap();

            let mut body = vec![0; length];
            self.stream.read_exact(&mut body).unwrap();

            (status, headers, String::from_utf8(body).unwrap())
        }

        fn closed(&mut self) -> bool {
            let mut rest = Vec::new();
            matches!(self.stream.read_to_end(&mut rest), Ok(0))
        }
    }

    fn router() -> Router {
        Router::new()
            .get("/", |_, resp| resp.body("Hello, world!").send())
            .get("/users/{id}", |req, resp| {
                let id = req.path_param("id").unwrap_or_default().to_owned();
                resp.body(format!("user {id}")).send()
            })
            .post("/echo", |req, resp| {
                let body = req.body().unwrap_or_default().to_vec();
                resp.body(body).send()
            })
            .get("/slow", |_, resp| {
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(100));
                    resp.body("slow").send();
                });
            })
            .get("/fast", |_, resp| resp.body("fast").send())
            .get("/panic", |_, _| panic!("handler failure"))
    }

    #[test]
    fn hello_world() {
        let handle = serve(router());
        let mut client = Client::connect(&handle);

        let (status, headers, body) = client.send(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").response();
        assert_eq!(status, 200);
        assert_eq!(body, "Hello, world!");
        assert!(headers.contains(&("Server".to_owned(), "hipshot".to_owned())));

        let (status, _, body) = client.send(b"GET /users/42 HTTP/1.1\r\n\r\n").response();
        assert_eq!((status, body.as_str()), (200, "user 42"));

        handle.stop().unwrap();
    }

    #[test]
    fn unknown_route() {
        let handle = serve(router());
        let mut client = Client::connect(&handle);

        let (status, _, body) = client.send(b"GET /missing HTTP/1.1\r\n\r\n").response();
        assert_eq!(status, StatusCode::NotFound.as_u16());
        assert_eq!(body, "Not found");

        handle.stop().unwrap();
    }

    #[test]
    fn pipelined_requests() {
        let handle = serve(router());
        let mut client = Client::connect(&handle);

        client.send(
            b"GET / HTTP/1.1\r\n\r\n\
              POST /echo HTTP/1.1\r\nContent-Length: 4\r\n\r\nping\
              GET /users/7 HTTP/1.1\r\n\r\n",
        );

        let bodies: Vec<String> = (0..3).map(|_| client.response().2).collect();
        assert_eq!(bodies, ["Hello, world!", "ping", "user 7"]);

        handle.stop().unwrap();
    }

    #[test]
    fn responses_keep_request_order() {
        let handle = serve(router());
        let mut client = Client::connect(&handle);

        client.send(b"GET /slow HTTP/1.1\r\n\r\nGET /fast HTTP/1.1\r\n\r\n");

        assert_eq!(client.response().2, "slow");
        assert_eq!(client.response().2, "fast");

        handle.stop().unwrap();
    }

    #[test]
    fn fragmented_request() {
        let handle = serve(router());
        let mut client = Client::connect(&handle);

        for part in [&b"POST /ec"[..], b"ho HTTP/1.1\r\nConte", b"nt-Length: 5\r\n\r\nhel", b"lo"] {
            client.send(part);
            thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(client.response().2, "hello");
        handle.stop().unwrap();
    }

    #[test]
    fn malformed_request() {
        let handle = serve(router());
        let mut client = Client::connect(&handle);

        let (status, headers, body) = client.send(b"BREW / HTTP/1.1\r\n\r\n").response();
        assert_eq!(status, 400);
        assert_eq!(body, "Invalid HTTP method");
        assert!(headers.contains(&("Connection".to_owned(), "close".to_owned())));
        assert!(client.closed());

        handle.stop().unwrap();
    }

    #[test]
    fn oversized_head() {
        let handle = serve(router());
        let mut client = Client::connect(&handle);

        // A header line as long as the whole input buffer, sent in full so
        // the close is clean
        let mut request = b"GET / HTTP/1.1\r\nX-Long: ".to_vec();
        request.resize(16 + 1024, b'a');

        let (status, _, _) = client.send(&request).response();
        assert_eq!(status, 431);
        assert!(client.closed());

        handle.stop().unwrap();
    }

    #[test]
    fn chunked_upload() {
        struct Upload {
            total: usize,
            resp: Option<Response>,
        }

        impl ChunkConsumer for Upload {
            fn on_chunk(&mut self, chunk: &[u8]) {
                self.total += chunk.len();
            }

            fn on_end(&mut self) {
                if let Some(resp) = self.resp.take() {
                    resp.body(self.total).send();
                }
            }
        }

        let router = router().post("/upload", |req, resp| {
            req.on_chunk(Upload {
                total: 0,
                resp: Some(resp),
            })
        });
        let handle = serve(router);
        let mut client = Client::connect(&handle);

        client.send(b"POST /upload HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n");
        thread::sleep(Duration::from_millis(20));
        client.send(b"8\r\n, world!\r\n0\r\n\r\n");

        assert_eq!(client.response().2, "13");
        assert_eq!(client.send(b"GET / HTTP/1.1\r\n\r\n").response().2, "Hello, world!");

        handle.stop().unwrap();
    }

    #[test]
    fn connection_close() {
        let handle = serve(router());
        let mut client = Client::connect(&handle);

        client.send(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\nGET /fast HTTP/1.1\r\n\r\n");

        assert_eq!(client.response().2, "Hello, world!");
        assert!(client.closed());

        handle.stop().unwrap();
    }

    #[test]
    fn http10_closes_by_default() {
        let handle = serve(router());
        let mut client = Client::connect(&handle);

        assert_eq!(client.send(b"GET / HTTP/1.0\r\n\r\n").response().0, 200);
        assert!(client.closed());

        handle.stop().unwrap();
    }

    #[test]
    fn idle_connections_expire() {
        let limits = ConnLimits {
            idle_ttl: Duration::from_millis(100),
            sweep_interval: Duration::from_millis(20),
            ..ConnLimits::default()
        };
        let handle = serve_with(router(), limits);
        let mut client = Client::connect(&handle);

        assert_eq!(client.send(b"GET / HTTP/1.1\r\n\r\n").response().0, 200);
        assert!(client.closed());

        handle.stop().unwrap();
    }

    #[test]
    fn oversized_chunk_size_closes_only_its_connection() {
        init_logger();

        let handle = Server::builder()
            .host("127.0.0.1")
            .port(0)
            .handler(router().post("/upload", |req, resp| {
                req.on_chunk(|_: &[u8]| {});
                resp.send()
            }))
            .server_limits(ServerLimits {
                threads: 1,
                ..ServerLimits::default()
            })
            .build()
            .start()
            .unwrap();

        let mut client = Client::connect(&handle);
        client.send(
            b"POST /upload HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
              18446744073709551615\r\n",
        );

        assert_eq!(client.response().0, 200);
        let (status, _, body) = client.response();
        assert_eq!((status, body.as_str()), (413, "Chunk too large"));
        assert!(client.closed());

        let mut other = Client::connect(&handle);
        assert_eq!(other.send(b"GET /fast HTTP/1.1\r\n\r\n").response().2, "fast");

        handle.stop().unwrap();
    }

    #[test]
    fn handler_panic() {
        let handle = serve(router());
        let mut client = Client::connect(&handle);

        let (status, _, body) = client.send(b"GET /panic HTTP/1.1\r\n\r\n").response();
        assert_eq!((status, body.as_str()), (500, "Internal server error"));
        assert!(client.closed());

        let mut other = Client::connect(&handle);
        assert_eq!(other.send(b"GET /fast HTTP/1.1\r\n\r\n").response().2, "fast");

        handle.stop().unwrap();
    }

    #[test]
    fn invalid_address() {
        init_logger();

        let result = Server::builder()
            .host("not an address")
            .handler(router())
            .build()
            .start();

        assert!(matches!(result, Err(Error::InvalidAddress(_))));
    }

    #[test]
    #[should_panic(expected = "The `handler` method must be called to create")]
    fn build_without_handler() {
        Server::<Router>::builder().build();
    }
}
