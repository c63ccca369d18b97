//! Route trie keyed by path segments.
//!
//! A pattern is split on `/` into segments:
//! - `users` matches exactly that segment
//! - `{id}` matches any single segment and captures it as `id`
//! - `*` matches any single segment without capturing it
//!
//! At each level a parameter child is tried first, then the wildcard, then
//! the literal children. There is no backtracking, so once `/users/{id}` is
//! registered, a sibling literal such as `/users/me` is never reached.
//! Parameter children share one slot per level: the first registered name
//! is the one captured.
//!
//! Empty segments are ignored, so `/users/` and `/users` are the same path.

use crate::{
    http::{
        request::Request,
        response::Response,
        types::{Method, StatusCode},
    },
    server::server_impl::Handler,
};
use log::trace;
use std::{collections::HashMap, fmt};

type Route = Box<dyn Fn(&mut Request<'_>, Response) + Send + Sync>;

#[derive(Default)]
struct Node {
    literals: HashMap<String, Node>,
    param: Option<(String, Box<Node>)>,
    wildcard: Option<Box<Node>>,
    routes: HashMap<Method, Route>,
}

impl Node {
    fn insert<'p>(&mut self, mut segments: impl Iterator<Item = &'p str>, method: Method, route: Route) {
        let Some(segment) = segments.next() else {
            self.routes.insert(method, route);
            return;
        };

        let child: &mut Node = match segment {
            "*" => self.wildcard.get_or_insert_with(Box::default),
            _ => match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => {
                    &mut self
                        .param
                        .get_or_insert_with(|| (name.to_owned(), Box::default()))
                        .1
                }
                None => self.literals.entry(segment.to_owned()).or_default(),
            },
        };

        child.insert(segments, method, route);
    }

    fn len(&self) -> usize {
        let children = self.literals.values().map(Node::len).sum::<usize>()
            + self.param.as_ref().map_or(0, |(_, node)| node.len())
            + self.wildcard.as_ref().map_or(0, |node| node.len());

        self.routes.len() + children
    }
}

#[inline]
fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Maps `(method, path)` to handlers.
///
/// Built once before the server starts; lookups afterwards only read.
///
/// # Examples
/// ```no_run
/// use hipshot::{Request, Response, Router, Server};
///
/// fn show_user(req: &mut Request<'_>, resp: Response) {
///     let id = req.path_param("id").unwrap_or_default().to_owned();
///     resp.body(format!("user {id}")).send();
/// }
///
/// let router = Router::new()
///     .get("/", |_, resp| resp.body("Hello, world!").send())
///     .get("/users/{id}", show_user)
///     .post("/users", |req, resp| {
///         let size = req.body().map_or(0, <[u8]>::len);
///         resp.status(201u16).body(size).send();
///     });
///
/// let handle = Server::builder().handler(router).build().start().unwrap();
/// handle.join().unwrap();
/// ```
#[derive(Default)]
pub struct Router {
    root: Node,
}

macro_rules! method_routes {
    ($($name:ident => $method:ident;)+) => {$(
        #[doc = concat!("Registers a `", stringify!($method), "` route, see [`route`](Router::route).")]
        #[inline]
        pub fn $name<F>(self, path: &str, handler: F) -> Self
        where
            F: Fn(&mut Request<'_>, Response) + Send + Sync + 'static,
        {
            self.route(Method::$method, path, handler)
        }
    )+};
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `method` on the `path` pattern.
    /// Registering the same method and pattern again replaces the handler.
    pub fn route<F>(mut self, method: Method, path: &str, handler: F) -> Self
    where
        F: Fn(&mut Request<'_>, Response) + Send + Sync + 'static,
    {
        self.root.insert(segments(path), method, Box::new(handler));
        self
    }

    method_routes! {
        get => Get;
        head => Head;
        post => Post;
        put => Put;
        patch => Patch;
        delete => Delete;
        options => Options;
        trace => Trace;
    }

    /// Number of registered `(method, pattern)` pairs.
    pub fn len(&self) -> usize {
        self.root.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finds the handler for `req`, records captured path parameters and
    /// invokes it. Unknown paths and methods are answered with `404`.
    pub fn dispatch(&self, req: &mut Request<'_>, resp: Response) {
        let mut node = &self.root;
        let mut captures = Vec::new();

        for segment in segments(req.path()) {
            node = if let Some((name, child)) = &node.param {
                captures.push((name.as_str(), segment.to_owned()));
                child
            } else if let Some(child) = &node.wildcard {
                child
            } else if let Some(child) = node.literals.get(segment) {
                child
            } else {
                return not_found(req, resp);
            };
        }

        let Some(route) = node.routes.get(&req.method()) else {
            return not_found(req, resp);
        };

        for (name, value) in captures {
            req.set_path_param(name, value);
        }

        trace!("{} {} matched", req.method(), req.path());
        route(req, resp);
    }
}

fn not_found(req: &Request<'_>, resp: Response) {
    trace!("{} {} has no route", req.method(), req.path());

    resp.status(StatusCode::NotFound)
        .header("Content-Type", "text/plain")
        .body("Not found")
        .send();
}

impl Handler for Router {
    #[inline]
    fn handle(&self, req: &mut Request<'_>, resp: Response) {
        self.dispatch(req, resp);
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router").field("routes", &self.len()).finish()
    }
}
