//! TCP accept loop, worker-pool dispatch, and the `TcpStream` glue that lets
//! `stream_core::Session` drive a real socket. Everything in this module is
//! an out-of-scope collaborator from the engine's point of view: it only
//! ever sees the engine through `stream_core::Error` and the `SessionIo`
//! trait.

use crate::http;
use crate::statics::StaticFiles;
use log::{info, warn};
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use stream_core::{Error, Session, SessionIo, VideoCache};

const REQUEST_BUFFER_SIZE: usize = 1024;

struct TcpSessionIo {
    stream: TcpStream,
}

impl SessionIo for TcpSessionIo {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(buf)
    }

    fn try_read_reconfig(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.set_nonblocking(true)?;
        let result = match self.stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        };
        self.stream.set_nonblocking(false)?;
        result
    }

    fn set_write_timeout(&mut self, timeout: Duration) {
        if let Err(e) = self.stream.set_write_timeout(Some(timeout)) {
            warn!("failed to adjust send timeout: {}", e);
        }
    }
}

/// Runs `num_workers` accept loops concurrently, each pinned to one OS
/// thread for the lifetime of every connection it serves, per the
/// design's one-session-per-worker-thread scheduling model. A single
/// `accept_lock` serializes the `accept()` call itself across workers to
/// avoid a thundering herd.
pub fn serve(
    listener: TcpListener,
    cache: VideoCache,
    statics: Arc<StaticFiles>,
    num_workers: usize,
    configured_timeout: Duration,
    shutdown: Arc<AtomicBool>,
) {
    let accept_lock = Arc::new(Mutex::new(()));
    let mut handles = Vec::with_capacity(num_workers);
    for worker_id in 0..num_workers {
        let listener = listener.try_clone().expect("clone listener fd");
        let accept_lock = accept_lock.clone();
        let cache = cache.clone();
        let statics = statics.clone();
        let shutdown = shutdown.clone();
        handles.push(std::thread::spawn(move || {
            worker_loop(worker_id, listener, accept_lock, cache, statics, configured_timeout, shutdown)
        }));
    }
    for h in handles {
        let _ = h.join();
    }
}

fn worker_loop(
    worker_id: usize,
    listener: TcpListener,
    accept_lock: Arc<Mutex<()>>,
    cache: VideoCache,
    statics: Arc<StaticFiles>,
    configured_timeout: Duration,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        let accepted = {
            let _guard = accept_lock.lock();
            listener.accept()
        };
        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!("worker {}: accept failed: {}", worker_id, e);
                continue;
            }
        };
        if let Err(e) = handle_connection(stream, &cache, &statics, configured_timeout) {
            warn!("worker {}: connection from {} ended with: {}", worker_id, peer, e);
        }
    }
}

fn handle_connection(
    mut stream: TcpStream,
    cache: &VideoCache,
    statics: &StaticFiles,
    configured_timeout: Duration,
) -> std::io::Result<()> {
    stream.set_nodelay(true).ok();

    let line = match read_request_line(&mut stream)? {
        Some(l) => l,
        None => return send_error_page(&mut stream, 400, "Bad Request"),
    };
    let (path, query) = match http::parse_request_line(&line) {
        Some(pq) => pq,
        None => return send_error_page(&mut stream, 400, "Bad Request"),
    };

    if let Some(video_id) = http::path_video_id(path) {
        let bag = http::parse_query(query);
        return serve_video(stream, cache, video_id, &bag, configured_timeout);
    }

    let name = path.trim_start_matches('/');
    match statics.get(name) {
        Some((content_type, body)) => send_ok_page(&mut stream, content_type, &body),
        None => send_error_page(&mut stream, 404, "Not Found"),
    }
}

/// Reads up to `REQUEST_BUFFER_SIZE` bytes and extracts the first line.
/// Requests that don't fit a single line within that budget, or that send
/// nothing at all (a closed connection), yield `Ok(None)`.
fn read_request_line(stream: &mut TcpStream) -> std::io::Result<Option<String>> {
    let mut buf = [0u8; REQUEST_BUFFER_SIZE];
    let n = stream.read(&mut buf)?;
    if n == 0 {
        return Ok(None);
    }
    let text = String::from_utf8_lossy(&buf[..n]);
    match text.find('\n') {
        Some(idx) => Ok(Some(text[..idx].to_owned())),
        None => Ok(None),
    }
}

fn serve_video(
    mut stream: TcpStream,
    cache: &VideoCache,
    video_id: i64,
    bag: &http::ParamBag,
    configured_timeout: Duration,
) -> std::io::Result<()> {
    let handle = match cache.acquire(video_id, bag.sign.as_deref()) {
        Ok(h) => h,
        Err(e) => {
            warn!("video {}: {} (code {})", video_id, e, e.code());
            return send_error_page(&mut stream, status_for(&e), reason_for(&e));
        }
    };

    if let Err(e) = stream.set_write_timeout(Some(configured_timeout)) {
        warn!("video {}: failed to set initial send timeout: {}", video_id, e);
    }

    let params = bag.to_request_params();
    let session = Session::new(handle, params.clone(), configured_timeout);
    let mut io = TcpSessionIo { stream };
    match session.run(&mut io, params) {
        Ok(result) => {
            info!(
                "video {}: sent {} bytes (disconnect={})",
                video_id, result.total_bytes_sent, result.ended_by_disconnect
            );
            Ok(())
        }
        Err(e) => {
            warn!("video {}: session error: {}", video_id, e);
            Ok(())
        }
    }
}

/// Maps an engine error, returned before any response bytes have gone out,
/// to the HTTP status the calling layer is responsible for choosing.
fn status_for(e: &Error) -> u16 {
    match e {
        Error::InvalidPath(_)
        | Error::MissingSidecar(_)
        | Error::MalformedSidecar(_, _)
        | Error::MissingVariant(_)
        | Error::InvalidOffsets(_)
        | Error::NoStreamsAvailable(_) => 404,
        Error::InvalidSignature(_) => 403,
        Error::OutOfMemory => 503,
        Error::ClientDisconnect(_) => 404,
    }
}

fn reason_for(e: &Error) -> &'static str {
    match status_for(e) {
        403 => "Forbidden",
        503 => "Service Unavailable",
        _ => "Not Found",
    }
}

fn send_ok_page(stream: &mut TcpStream, content_type: &str, body: &[u8]) -> std::io::Result<()> {
    let prolog = render_reply_prolog(200, "OK", content_type, "no-cache", body.len());
    stream.write_all(prolog.as_bytes())?;
    stream.write_all(body)
}

fn send_error_page(stream: &mut TcpStream, status: u16, reason: &str) -> std::io::Result<()> {
    let body = format!(
        "<HTML><HEAD><meta http-equiv=\"content-type\" content=\"text/html\"><TITLE>{} {}</TITLE></HEAD><BODY>{} {}</BODY></HTML>\r\n\r\n",
        status, reason, status, reason,
    );
    let prolog = render_reply_prolog(status, reason, "text/html", "no-cache", body.len());
    stream.write_all(prolog.as_bytes())?;
    stream.write_all(body.as_bytes())
}

fn render_reply_prolog(status: u16, reason: &str, content_type: &str, cache_control: &str, content_length: usize) -> String {
    let mut out = String::new();
    out.push_str(&format!("HTTP/1.1 {} {}\r\n", status, reason));
    out.push_str("Server: chopstream/1.0\r\n");
    out.push_str(&format!("Date: {}\r\n", httpdate::fmt_http_date(SystemTime::now())));
    out.push_str(&format!("Content-Type: {}\r\n", content_type));
    out.push_str(&format!("Content-Length: {}\r\n", content_length));
    out.push_str("Connection: close\r\n");
    out.push_str(&format!("Cache-Control: {}\r\n", cache_control));
    out.push_str("Expires: -1\r\n");
    out.push_str("\r\n");
    out
}
