use std::io;
use thiserror::Error;

/// Errors produced while decoding, encoding or serving HTTP traffic.
///
/// Running out of input is not an error: [`Decoder::decode`](crate::Decoder::decode)
/// reports it as `Ok(None)`. Everything here is fatal for the connection
/// it happened on and never touches other connections.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unrecognized request method")]
    InvalidMethod,
    #[error("malformed request line")]
    MalformedRequestLine,
    #[error("unsupported protocol version")]
    InvalidVersion,
    #[error("malformed header line")]
    InvalidHeader,
    #[error("request head is not valid UTF-8")]
    InvalidEncoding,
    #[error("invalid Content-Length value")]
    InvalidContentLength,
    #[error("invalid chunk size line")]
    InvalidChunkSize,
    #[error("chunk payload is not followed by CRLF")]
    InvalidChunkTerminator,

    #[error("request body of {size} bytes exceeds the limit of {limit} bytes")]
    BodyTooLarge { size: usize, limit: usize },
    #[error("chunk of {size} bytes can never fit a buffer of {capacity} bytes")]
    ChunkTooLarge { size: usize, capacity: usize },
    #[error("request head does not fit a buffer of {0} bytes")]
    HeadTooLarge(usize),
    #[error("response of {size} bytes does not fit a buffer of {capacity} bytes")]
    ResponseTooLarge { size: usize, capacity: usize },
    #[error("buffer overflow: {needed} bytes needed, {available} available")]
    BufferOverflow { needed: usize, available: usize },
    #[error("request handler panicked")]
    HandlerPanicked,

    #[error("invalid bind address: {0}")]
    InvalidAddress(String),
    #[error("worker thread panicked")]
    WorkerPanicked,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

macro_rules! http_errors {
    ($($name:ident: $status:literal, $len:literal => $body:literal; )*) => {
        /// Canned response written before the connection is closed, if the
        /// error is one the peer should hear about.
        pub(crate) const fn as_http(&self) -> Option<&'static [u8]> {
            match self {
                $(Self::$name { .. } => Some(concat!(
                    "HTTP/1.1 ", $status, "\r\n",
                    "Server: hipshot\r\n",
                    "Connection: close\r\n",
                    "Content-Length: ", $len, "\r\n",
                    "\r\n",
                    $body
                ).as_bytes()),)*
                _ => None,
            }
        }
    };
}

impl Error {
    http_errors! {
        InvalidMethod: "400", "19" => "Invalid HTTP method";
        MalformedRequestLine: "400", "22" => "Malformed request line";
        InvalidVersion: "505", "24" => "Unsupported HTTP version";
        InvalidHeader: "400", "21" => "Invalid header format";
        InvalidEncoding: "400", "25" => "Request head is not UTF-8";
        InvalidContentLength: "400", "22" => "Invalid Content-Length";
        InvalidChunkSize: "400", "18" => "Invalid chunk size";
        InvalidChunkTerminator: "400", "24" => "Invalid chunk terminator";

        BodyTooLarge: "413", "22" => "Request body too large";
        ChunkTooLarge: "413", "15" => "Chunk too large";
        HeadTooLarge: "431", "22" => "Request head too large";

        ResponseTooLarge: "500", "21" => "Internal server error";
        BufferOverflow: "500", "21" => "Internal server error";
        HandlerPanicked: "500", "21" => "Internal server error";
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn content_length_matches_body() {
        let cases = [
            Error::InvalidMethod,
            Error::MalformedRequestLine,
            Error::InvalidVersion,
            Error::InvalidHeader,
            Error::InvalidEncoding,
            Error::InvalidContentLength,
            Error::InvalidChunkSize,
            Error::InvalidChunkTerminator,
            Error::BodyTooLarge { size: 1, limit: 0 },
            Error::ChunkTooLarge { size: 1, capacity: 0 },
            Error::HeadTooLarge(0),
            Error::ResponseTooLarge { size: 1, capacity: 0 },
            Error::BufferOverflow { needed: 1, available: 0 },
            Error::HandlerPanicked,
        ];

        for error in cases {
            let raw = str_op(error.as_http().unwrap());
            let (head, body) = raw.split_once("\r\n\r\n").unwrap();

            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("Content-Length: "))
                .unwrap();

            assert_eq!(length.parse::<usize>().unwrap(), body.len(), "{error}");
            assert!(head.starts_with("HTTP/1.1 "));
            assert!(head.contains("Connection: close"));
        }
    }

    #[test]
    fn status_per_class() {
        #[rustfmt::skip]
        let cases = [
            (Error::InvalidMethod,                        "HTTP/1.1 400\r\n"),
            (Error::InvalidVersion,                       "HTTP/1.1 505\r\n"),
            (Error::BodyTooLarge { size: 9, limit: 1 },   "HTTP/1.1 413\r\n"),
            (Error::HeadTooLarge(8192),                   "HTTP/1.1 431\r\n"),
            (Error::HandlerPanicked,                      "HTTP/1.1 500\r\n"),
        ];

        for (error, status_line) in cases {
            assert!(str_op(error.as_http().unwrap()).starts_with(status_line));
        }
    }

    #[test]
    fn transport_errors_are_silent() {
        let io = Error::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));

        assert!(io.as_http().is_none());
        assert!(Error::WorkerPanicked.as_http().is_none());
        assert!(Error::InvalidAddress("nope".into()).as_http().is_none());
    }
}
