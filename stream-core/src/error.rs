//! The error taxonomy from the design doc, each variant carrying the stable
//! integer code used in log lines and (by `streamd`) in the HTML reply it
//! composes for the client.

use thiserror::Error;

/// A single recovery policy attaches to each variant:
///  - request-fatal variants (`InvalidPath`, `MissingSidecar`, ...) end the
///    request before any bytes are sent, and the caller is free to retry or
///    compose an error page.
///  - `ClientDisconnect` ends the session after bytes may already be on the
///    wire; it is not a failure, just an early exit.
///  - `OutOfMemory` is fatal to the whole server and should propagate past
///    the session boundary.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown video id or not a directory: {0}")]
    InvalidPath(String),

    #[error("missing sidecar for {0}")]
    MissingSidecar(String),

    #[error("malformed sidecar for {0}: {1}")]
    MalformedSidecar(String, String),

    #[error("missing variant file: {0}")]
    MissingVariant(String),

    #[error("invalid iframe offsets in variant: {0}")]
    InvalidOffsets(String),

    #[error("no streams available for {0}")]
    NoStreamsAvailable(String),

    #[error("invalid signature for {0}")]
    InvalidSignature(String),

    #[error("client disconnected after {0} bytes")]
    ClientDisconnect(u64),

    #[error("out of memory: cache budget exceeded")]
    OutOfMemory,
}

impl Error {
    /// Stable integer code for logging, matching the taxonomy in the design
    /// doc (not the original C `EMSG_*`/`ECOD_*` numbering, which was never
    /// stable across server versions).
    pub fn code(&self) -> i32 {
        match self {
            Error::InvalidPath(_) => 1,
            Error::MissingSidecar(_) => 2,
            Error::MalformedSidecar(_, _) => 3,
            Error::MissingVariant(_) => 4,
            Error::InvalidOffsets(_) => 5,
            Error::NoStreamsAvailable(_) => 6,
            Error::InvalidSignature(_) => 7,
            Error::ClientDisconnect(_) => 8,
            Error::OutOfMemory => 9,
        }
    }

    /// Whether this error is fatal to the request (vs. absorbed at variant
    /// granularity inside `VideoCache::acquire`, or a normal session end).
    pub fn is_request_fatal(&self) -> bool {
        !matches!(self, Error::ClientDisconnect(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
