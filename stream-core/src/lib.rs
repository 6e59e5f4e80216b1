//! Core of the adaptive video streaming engine: the sidecar codec, the
//! container-derived data model, the in-memory video cache, and the
//! session/chunker/adaptive-control-loop that serves one client.
//!
//! Everything outside this crate — the TCP accept loop, HTTP request
//! parsing, and static file serving — lives in `streamd`; the offline
//! indexer that produces the sidecars this crate reads lives in `chopper`.

pub mod cache;
pub mod error;
pub mod session;
pub mod sidecar;
pub mod signature;
pub mod video;

pub use cache::{VideoCache, VideoHandle};
pub use error::{Error, Result};
pub use session::{RequestParams, Session, SessionIo, SessionResult};
pub use video::{ContainerType, Variant, Video};
