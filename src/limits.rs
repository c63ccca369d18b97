//! Server configuration: worker threads, buffers and connection lifetimes
//!
//! # Memory Consumption
//!
//! Every open connection holds exactly two buffers for its whole lifetime:
//!
//! `Total` = [`Input Buffer`](crate::limits::ReqLimits::buffer_size) +
//!           [`Output Buffer`](crate::limits::RespLimits::buffer_size) +
//!           `Decoder + bookkeeping`
//!
//! Buffers come from two process-wide pools and go back to them when the
//! connection closes, so a server under steady load stops allocating.
//!
//! # Examples
//!
//! ```no_run
//! use hipshot::{Router, Server, limits::{ConnLimits, ReqLimits, ServerLimits}};
//! use std::time::Duration;
//!
//! let handle = Server::builder()
//!     .port(8080)
//!     .handler(Router::new().get("/", |_, resp| resp.body("hello").send()))
//!     .server_limits(ServerLimits {
//!         threads: 4,
//!         ..ServerLimits::default()
//!     })
//!     .connection_limits(ConnLimits {
//!         idle_ttl: Duration::from_secs(10),
//!         ..ConnLimits::default()
//!     })
//!     .request_limits(ReqLimits {
//!         buffer_size: 16 * 1024, // larger heads and bodies
//!         ..ReqLimits::default()
//!     })
//!     .build()
//!     .start()
//!     .unwrap();
//!
//! handle.join().unwrap();
//! ```

use std::{thread, time::Duration};

/// Controls the reactor threads and their completion queues.
///
/// # Reactors
/// ```text
///                     [ listening socket ]
///                      //      ||      \\
///                     \/       \/       \/
///              [ reactor 0 ] [ ... ] [ reactor N-1 ]
///                   ||
///                   \/   accept / read / write / close completions
///              [ ring 0 ] -> decode -> route -> encode -> write
/// ```
///
/// Each reactor is an OS thread with its own single-threaded runtime. A
/// connection accepted by a reactor stays on it until it closes, so the
/// decoder and the buffers of that connection are never shared.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Number of reactor threads (default: available parallelism).
    pub threads: usize,

    /// Maximum number of in-flight operations per reactor (default: `8192`).
    ///
    /// While a ring is saturated the listening socket is not re-armed, so
    /// new connections wait in the kernel backlog instead of piling up.
    pub ring_depth: usize,

    /// Buffers pre-allocated in each of the input and output pools (default: `256`).
    ///
    /// When a pool runs dry a fresh buffer is allocated; on return, buffers
    /// beyond this count are dropped.
    pub buffer_pool_size: usize,

    /// Listen backlog handed to the kernel (default: `1024`).
    pub backlog: i32,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            threads: thread::available_parallelism().map_or(1, |n| n.get()),
            ring_depth: 8192,
            buffer_pool_size: 256,
            backlog: 1024,

            _priv: (),
        }
    }
}

/// Connection-level lifetimes.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum time a connection may stay without reading anything (default: `60 seconds`)
    ///
    /// Connections waiting on a handler response are never expired.
    /// [`Duration::ZERO`] disables the check.
    pub idle_ttl: Duration,

    /// How often each reactor looks for idle connections (default: `1 second`)
    pub sweep_interval: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(1),

            _priv: (),
        }
    }
}

/// Request decoding limits.
///
/// # Memory Allocation Strategy
///
/// The whole request head, and a fixed-length body, must fit in the input
/// buffer at once because bodies are handed out as slices of it:
///
/// ```text
/// [ request line | headers | CRLF | body ]  <=  buffer_size
/// ```
///
/// Chunked bodies are streamed chunk by chunk, so only a single chunk (plus
/// its size line and CRLF) has to fit.
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Size of the per-connection input buffer in bytes (default: `8 KB`)
    pub buffer_size: usize,

    /// Maximum `Content-Length` accepted (default: `None`, the buffer size)
    ///
    /// Values above the buffer size are clamped to it; such a body could
    /// never be contiguous.
    pub max_body_size: Option<usize>,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            buffer_size: 8 * 1024,
            max_body_size: None,

            _priv: (),
        }
    }
}

impl ReqLimits {
    #[inline(always)]
    pub(crate) fn body_limit(&self) -> usize {
        self.max_body_size
            .map_or(self.buffer_size, |max| max.min(self.buffer_size))
    }
}

/// Response encoding limits.
///
/// Responses are encoded whole into the output buffer; a response that does
/// not fit is answered with `500` instead.
#[derive(Debug, Clone)]
pub struct RespLimits {
    /// Size of the per-connection output buffer in bytes (default: `8 KB`)
    pub buffer_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            buffer_size: 8 * 1024,

            _priv: (),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_limit() {
        #[rustfmt::skip]
        let cases = [
            (8192, None,        8192),
            (8192, Some(100),   100),
            (8192, Some(10000), 8192),
            (16,   Some(0),     0),
        ];

        for (buffer_size, max_body_size, expected) in cases {
            let limits = ReqLimits {
                buffer_size,
                max_body_size,
                ..ReqLimits::default()
            };

            assert_eq!(limits.body_limit(), expected);
        }
    }

    #[test]
    fn defaults() {
        let server = ServerLimits::default();
        assert!(server.threads >= 1);
        assert_eq!(server.ring_depth, 8192);

        assert_eq!(ConnLimits::default().idle_ttl, Duration::from_secs(60));
        assert_eq!(ReqLimits::default().buffer_size, 8 * 1024);
        assert_eq!(RespLimits::default().buffer_size, 8 * 1024);
    }
}
