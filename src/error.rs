//! Server-level error type.

use thiserror::Error;

/// The error type returned by the HTTP host's fallible operations.
///
/// Application-level failures (404, 403, a handler error) are expressed as
/// [`Response`](crate::Response) values, not as `Error`s. This type surfaces
/// infrastructure failures: binding to a port, reading a socket address.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid listen address `{addr}`: {source}")]
    Address {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },
}
