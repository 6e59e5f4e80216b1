//! The chunked sender & timing, adaptive control loop, and mid-stream
//! reconfiguration channel: together, "the session".
//!
//! This module is transport-agnostic — it writes bytes through a
//! [`SessionIo`] the caller implements over whatever socket type it has
//! (`streamd` uses a `TcpStream`; tests use an in-memory buffer) rather than
//! opening or accepting connections itself.

use crate::cache::VideoHandle;
use crate::error::Error;
use crate::video::ContainerType;
use std::time::{Duration, Instant, SystemTime};

pub const CHUNK_SIZE: usize = 1024;
pub const UPPER_LIMIT_TIME: i64 = 2_000_000_000;
pub const LOWER_LIMIT_TIME: i64 = 1_500_000_000;
const NANOS_PER_SECOND: i64 = 1_000_000_000;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
pub const MIN_TIMEOUT: Duration = Duration::from_secs(60);

/// `SO_SNDBUF` applied before the first write of a session.
pub const SEND_BUFFER_SIZE: usize = 524_288;

/// Mid-stream reconfiguration payloads longer than this are truncated.
pub const RECONFIG_MAX_BYTES: usize = 512;

/// Everything a session needs from the transport, kept minimal enough that a
/// test can implement it over a `Vec<u8>` instead of a real socket.
pub trait SessionIo {
    /// Writes `buf` in full; an `Err` (including a short write the
    /// implementation chooses to treat as fatal) ends the session.
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    /// Non-blocking read of any reconfiguration bytes currently buffered on
    /// the socket. Returns `Ok(0)` (not `WouldBlock`) when nothing is
    /// pending right now — callers should not treat zero as a disconnect
    /// here, only `write_all` failures end a session.
    fn try_read_reconfig(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Refreshes the socket's send timeout to track observed throughput, as
    /// computed by the adaptive loop below.
    fn set_write_timeout(&mut self, timeout: Duration);
}

/// The subset of request parameters the session cares about; parsing the
/// HTTP request line and query string into this shape is an out-of-scope
/// collaborator (`streamd::http`).
#[derive(Debug, Clone, Default)]
pub struct RequestParams {
    pub quality: Option<usize>,
    pub pos: Option<usize>,
    pub cache_control: Option<String>,
}

/// Outcome of a completed session, regardless of how it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionResult {
    pub total_bytes_sent: u64,
    pub ended_by_disconnect: bool,
}

fn clamp_quality(requested: Option<usize>, variant_count: usize) -> usize {
    match requested {
        Some(q) if q < variant_count => q,
        _ => variant_count / 2,
    }
}

fn clamp_pos(requested: Option<usize>, iframe_num: usize) -> usize {
    match requested {
        Some(p) if p < iframe_num => p,
        _ => 0,
    }
}

/// Renders the HTTP/1.1 response prolog (status line + headers) described in
/// the design doc. `content_length` selects `Content-Length` framing (fast
/// path) vs. `Transfer-Encoding: chunked` (adaptive path) when `None`.
pub fn render_prolog(
    container: ContainerType,
    content_length: Option<u64>,
    cache_control: &str,
    server_ident: &str,
    now: SystemTime,
) -> String {
    let mut out = String::new();
    out.push_str("HTTP/1.1 200 OK\r\n");
    out.push_str(&format!("Server: {}\r\n", server_ident));
    out.push_str(&format!("Date: {}\r\n", httpdate::fmt_http_date(now)));
    out.push_str(&format!("Content-Type: {}\r\n", container.content_type()));
    match content_length {
        Some(n) => out.push_str(&format!("Content-Length: {}\r\n", n)),
        None => out.push_str("Transfer-Encoding: chunked\r\n"),
    }
    out.push_str("Connection: close\r\n");
    out.push_str(&format!("Cache-Control: {}\r\n", cache_control));
    out.push_str("Expires: -1\r\n");
    out.push_str("\r\n");
    out
}

/// Frames one adaptive-path chunk: `CRLF || HEX(len) || CRLF || payload`.
/// The very first chunk of a response omits the leading CRLF, since it
/// directly follows the header-terminating blank line.
fn chunk_frame(payload: &[u8], first: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 16);
    if !first {
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("{:x}", payload.len()).as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(payload);
    out
}

const TERMINAL_CHUNK: &[u8] = b"\r\n0\r\n\r\n";

/// A single in-progress streaming session. Owns the timing accumulators and
/// the current (variant, keyframe-cursor) playback position; `run` drives it
/// to completion against a `SessionIo`.
pub struct Session {
    video: VideoHandle,
    variant_pos: usize,
    cursor: usize,
    cached_time: i64,
    spent_time: u128,
    total_bytes_sent: u64,
    configured_timeout: Duration,
}

impl Session {
    pub fn new(video: VideoHandle, params: RequestParams, configured_timeout: Duration) -> Session {
        let variant_count = video.variants.len();
        let variant_pos = clamp_quality(params.quality, variant_count);
        let iframe_num = video.variants[variant_pos].iframe_num();
        let cursor = clamp_pos(params.pos, iframe_num);
        let configured_timeout = if configured_timeout < MIN_TIMEOUT {
            MIN_TIMEOUT
        } else {
            configured_timeout
        };
        Session {
            video,
            variant_pos,
            cursor,
            cached_time: 0,
            spent_time: 0,
            total_bytes_sent: 0,
            configured_timeout,
        }
    }

    fn quality_pinned(&self, params: &RequestParams) -> bool {
        params.quality.is_some()
    }

    /// Runs the session to completion: fast path if there's exactly one
    /// variant or the client pinned a quality, adaptive path otherwise.
    pub fn run(mut self, io: &mut impl SessionIo, params: RequestParams) -> Result<SessionResult, Error> {
        let cache_control = params.cache_control.as_deref().unwrap_or("no-cache");
        let fast_path = self.video.variants.len() == 1 || self.quality_pinned(&params);
        if fast_path {
            self.run_fast_path(io, cache_control)
        } else {
            self.run_adaptive_path(io, cache_control)
        }
    }

    fn run_fast_path(mut self, io: &mut impl SessionIo, cache_control: &str) -> Result<SessionResult, Error> {
        let variant_pos = self.variant_pos;
        let cursor = self.cursor;
        let (container, start, total_len) = {
            let variant = &self.video.variants[variant_pos];
            (variant.container, variant.iframe_offset[cursor] as usize, variant.data.len())
        };
        let prolog = render_prolog(
            container,
            Some((total_len - start) as u64),
            cache_control,
            "chopstream/1.0",
            SystemTime::now(),
        );
        if write_all_checked(io, prolog.as_bytes()).is_err() {
            return Ok(self.finish(true));
        }

        let mut offset = start;
        while offset < total_len {
            let end = (offset + CHUNK_SIZE).min(total_len);
            let result = {
                let variant = &self.video.variants[variant_pos];
                write_all_checked(io, &variant.data[offset..end])
            };
            if result.is_err() {
                return Ok(self.finish(true));
            }
            self.total_bytes_sent += (end - offset) as u64;
            offset = end;
        }
        Ok(self.finish(false))
    }

    fn run_adaptive_path(mut self, io: &mut impl SessionIo, cache_control: &str) -> Result<SessionResult, Error> {
        let prolog = render_prolog(
            self.video.variants[self.variant_pos].container,
            None,
            cache_control,
            "chopstream/1.0",
            SystemTime::now(),
        );
        if write_all_checked(io, prolog.as_bytes()).is_err() {
            return Ok(self.finish(true));
        }

        let mut first_chunk = true;
        // The very first interval of a session spans two keyframe intervals
        // rather than one, so a client always starts with enough buffered
        // video to ride out the first round-trip; every interval after that
        // is a single GOP.
        let mut first_interval = true;
        loop {
            // A variant switch reuses the same keyframe index as a logical
            // cursor with no time-based realignment (a documented
            // limitation); clamp it to the new variant's range rather than
            // index out of bounds.
            let variant_len = self.video.variants[self.variant_pos].iframe_num();
            if self.cursor >= variant_len {
                self.cursor = variant_len - 1;
            }
            let jump = if first_interval { 2 } else { 1 };
            let next_cursor = self.video.variants[self.variant_pos].get_next_offset(self.cursor, jump);
            let end_of_variant = next_cursor >= variant_len;

            let (start, end) = {
                let variant = &self.video.variants[self.variant_pos];
                let start = variant.iframe_offset[self.cursor] as usize;
                let end = if end_of_variant {
                    variant.data.len()
                } else {
                    variant.iframe_offset[next_cursor] as usize
                };
                (start, end)
            };

            let interval_start = Instant::now();
            {
                let variant = &self.video.variants[self.variant_pos];
                let interval_data = &variant.data[start..end];
                for slice in interval_data.chunks(CHUNK_SIZE) {
                    let frame = chunk_frame(slice, first_chunk);
                    first_chunk = false;
                    let write_start = Instant::now();
                    if write_all_checked(io, &frame).is_err() {
                        return Ok(self.finish(true));
                    }
                    self.spent_time += write_start.elapsed().as_nanos();
                    self.total_bytes_sent += slice.len() as u64;
                }
            }
            let elapsed_ns = interval_start.elapsed().as_nanos() as i64;
            self.cached_time += NANOS_PER_SECOND - elapsed_ns;

            if self.total_bytes_sent > 0 {
                let spent_secs = self.spent_time / NANOS_PER_SECOND as u128;
                let timeout_secs = (spent_secs as f64 / self.total_bytes_sent as f64
                    * CHUNK_SIZE as f64)
                    .ceil() as u64;
                io.set_write_timeout(
                    Duration::from_secs(timeout_secs) + self.configured_timeout,
                );
            }

            if end_of_variant {
                break;
            }

            self.apply_adaptive_step();
            self.cursor = next_cursor;
            first_interval = false;

            let mut buf = [0u8; RECONFIG_MAX_BYTES];
            if let Ok(n) = io.try_read_reconfig(&mut buf) {
                if n > 0 {
                    self.apply_reconfig(&buf[..n.min(RECONFIG_MAX_BYTES)]);
                }
            }
        }

        if write_all_checked(io, TERMINAL_CHUNK).is_err() {
            return Ok(self.finish(true));
        }
        Ok(self.finish(false))
    }

    fn apply_adaptive_step(&mut self) {
        let variant_count = self.video.variants.len();
        if self.cached_time > UPPER_LIMIT_TIME && self.variant_pos < variant_count - 1 {
            self.variant_pos += 1;
        } else if self.cached_time < LOWER_LIMIT_TIME && self.variant_pos > 0 {
            self.variant_pos -= 1;
        }
    }

    fn apply_reconfig(&mut self, payload: &[u8]) {
        let text = String::from_utf8_lossy(payload);
        for pair in text.split('&') {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next().unwrap_or("");
            let value = match parts.next() {
                Some(v) => v,
                None => continue,
            };
            match key {
                "quality" => {
                    if let Ok(q) = value.parse::<usize>() {
                        let variant_count = self.video.variants.len();
                        self.variant_pos = q.min(variant_count - 1);
                    }
                }
                "pos" => {
                    if let Ok(p) = value.parse::<usize>() {
                        let iframe_num = self.video.variants[self.variant_pos].iframe_num();
                        if p > 0 && p < iframe_num {
                            self.cursor = p;
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn finish(self, disconnect: bool) -> SessionResult {
        if disconnect {
            log::info!(
                "video {}: client disconnected after {} bytes (code {})",
                self.video.id,
                self.total_bytes_sent,
                Error::ClientDisconnect(self.total_bytes_sent).code(),
            );
        }
        SessionResult {
            total_bytes_sent: self.total_bytes_sent,
            ended_by_disconnect: disconnect,
        }
    }
}

fn write_all_checked(io: &mut impl SessionIo, buf: &[u8]) -> std::io::Result<()> {
    io.write_all(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::VideoCache;
    use crate::sidecar::{Sidecar, SidecarVariant};
    use std::fs;

    struct MemIo {
        out: Vec<u8>,
        fail_after: Option<usize>,
    }

    impl MemIo {
        fn new() -> MemIo {
            MemIo { out: Vec::new(), fail_after: None }
        }
    }

    impl SessionIo for MemIo {
        fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
            if let Some(limit) = self.fail_after {
                if self.out.len() + buf.len() > limit {
                    return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "test disconnect"));
                }
            }
            self.out.extend_from_slice(buf);
            Ok(())
        }
        fn try_read_reconfig(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }
        fn set_write_timeout(&mut self, _timeout: Duration) {}
    }

    fn write_fixture(dir: &std::path::Path, filename: &str, data: &[u8], offsets: &[i64]) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(filename), data).unwrap();
        let sidecar = Sidecar {
            path: dir.display().to_string(),
            sign: "a".repeat(40),
            variants: vec![SidecarVariant {
                filename: filename.to_owned(),
                iframe_offset: offsets.to_vec(),
            }],
        };
        fs::write(dir.join("data.txt"), crate::sidecar::write(&sidecar)).unwrap();
    }

    #[test]
    fn single_variant_fast_path_sends_whole_body() {
        let tmp = tempfile::tempdir().unwrap();
        write_fixture(&tmp.path().join("100"), "a.flv", b"0123456789", &[0]);
        let cache = VideoCache::new(tmp.path(), 1 << 30, false);
        let handle = cache.acquire(100, None).unwrap();

        let session = Session::new(handle, RequestParams::default(), DEFAULT_TIMEOUT);
        let mut io = MemIo::new();
        let result = session.run(&mut io, RequestParams::default()).unwrap();

        assert_eq!(result.total_bytes_sent, 10);
        assert!(!result.ended_by_disconnect);
        let text = String::from_utf8_lossy(&io.out);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 10\r\n"));
        assert!(!text.contains("Transfer-Encoding"));
        assert!(text.ends_with("0123456789"));
    }

    #[test]
    fn adaptive_path_frames_first_chunk_without_leading_crlf() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("100");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("small.flv"), b"AAAA BBBB CCCC").unwrap();
        fs::write(dir.join("large.flv"), b"AAAAAAAAAA BBBBBBBBBB CCCCCCCCCC").unwrap();
        let sidecar = Sidecar {
            path: tmp.path().join("100").display().to_string(),
            sign: "a".repeat(40),
            variants: vec![
                SidecarVariant { filename: "small.flv".into(), iframe_offset: vec![0, 5, 10] },
                SidecarVariant { filename: "large.flv".into(), iframe_offset: vec![0, 11, 22] },
            ],
        };
        fs::write(dir.join("data.txt"), crate::sidecar::write(&sidecar)).unwrap();

        let cache = VideoCache::new(tmp.path(), 1 << 30, false);
        let handle = cache.acquire(100, None).unwrap();
        let session = Session::new(handle, RequestParams::default(), DEFAULT_TIMEOUT);
        let mut io = MemIo::new();
        session.run(&mut io, RequestParams::default()).unwrap();

        let text = String::from_utf8_lossy(&io.out);
        assert!(text.contains("Transfer-Encoding: chunked\r\n"));
        // No quality pin with two variants defaults to the midpoint (index
        // 1, the larger of the two once sorted by size). The very first
        // interval of a session spans two keyframe intervals rather than
        // one, so the first chunk covers offsets [0, 22) = 22 bytes; framed
        // with no leading CRLF since it's the very first chunk of the body.
        let body_start = text.find("\r\n\r\n").unwrap() + 4;
        assert!(text[body_start..].starts_with("16\r\nAAAAAAAAAA BBBBBBBBBB "));
        // The remaining keyframe interval (offset 22 to end) follows as a
        // normal, single-GOP chunk.
        assert!(text.contains("\r\na\r\nCCCCCCCCCC"));
        assert!(text.ends_with("0\r\n\r\n"));
    }

    #[test]
    fn quality_param_pins_fast_path_even_with_multiple_variants() {
        let tmp = tempfile::tempdir().unwrap();
        let sidecar = Sidecar {
            path: tmp.path().join("100").display().to_string(),
            sign: "a".repeat(40),
            variants: vec![
                SidecarVariant { filename: "small.flv".into(), iframe_offset: vec![0] },
                SidecarVariant { filename: "large.flv".into(), iframe_offset: vec![0] },
            ],
        };
        fs::create_dir_all(tmp.path().join("100")).unwrap();
        fs::write(tmp.path().join("100").join("small.flv"), b"short").unwrap();
        fs::write(tmp.path().join("100").join("large.flv"), b"muchlonger").unwrap();
        fs::write(tmp.path().join("100").join("data.txt"), crate::sidecar::write(&sidecar)).unwrap();

        let cache = VideoCache::new(tmp.path(), 1 << 30, false);
        let handle = cache.acquire(100, None).unwrap();
        let params = RequestParams { quality: Some(1), pos: None, cache_control: None };
        let session = Session::new(handle, params.clone(), DEFAULT_TIMEOUT);
        let mut io = MemIo::new();
        let result = session.run(&mut io, params).unwrap();

        let text = String::from_utf8_lossy(&io.out);
        assert!(text.contains("Content-Length: 10\r\n"));
        assert_eq!(result.total_bytes_sent, 10);
    }

    #[test]
    fn disconnect_mid_body_reports_bytes_sent_so_far() {
        let tmp = tempfile::tempdir().unwrap();
        write_fixture(&tmp.path().join("100"), "a.flv", &[0u8; 3000], &[0]);
        let cache = VideoCache::new(tmp.path(), 1 << 30, false);
        let handle = cache.acquire(100, None).unwrap();
        let session = Session::new(handle, RequestParams::default(), DEFAULT_TIMEOUT);
        let mut io = MemIo::new();
        io.fail_after = Some(100);
        let result = session.run(&mut io, RequestParams::default()).unwrap();

        assert!(result.ended_by_disconnect);
        assert!(result.total_bytes_sent < 3000);
    }

    #[test]
    fn out_of_range_quality_falls_back_to_midpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let sidecar = Sidecar {
            path: tmp.path().join("100").display().to_string(),
            sign: "a".repeat(40),
            variants: vec![
                SidecarVariant { filename: "a.flv".into(), iframe_offset: vec![0] },
                SidecarVariant { filename: "b.flv".into(), iframe_offset: vec![0] },
                SidecarVariant { filename: "c.flv".into(), iframe_offset: vec![0] },
            ],
        };
        fs::create_dir_all(tmp.path().join("100")).unwrap();
        fs::write(tmp.path().join("100").join("a.flv"), b"1").unwrap();
        fs::write(tmp.path().join("100").join("b.flv"), b"22").unwrap();
        fs::write(tmp.path().join("100").join("c.flv"), b"333").unwrap();
        fs::write(tmp.path().join("100").join("data.txt"), crate::sidecar::write(&sidecar)).unwrap();

        let cache = VideoCache::new(tmp.path(), 1 << 30, false);
        let handle = cache.acquire(100, None).unwrap();
        let params = RequestParams { quality: Some(99), pos: None, cache_control: None };
        let session = Session::new(handle, params, DEFAULT_TIMEOUT);
        assert_eq!(session.variant_pos, 1);
    }
}
