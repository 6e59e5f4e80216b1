//! Entry point for the streaming daemon: CLI, logging, signal handling,
//! and wiring together the video cache, static file set, and accept loop.
//! Everything the engine itself needs stays in `stream-core`; this binary
//! only supplies the collaborators the design doc keeps out of scope.

mod http;
mod net;
mod statics;

use failure::{format_err, Error};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stream_core::VideoCache;
use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(name = "streamd")]
struct Opt {
    /// Root directory of numerically-named video directories.
    #[structopt(long, parse(from_os_str))]
    videos: PathBuf,

    /// Directory holding crossdomain.xml, player.html, robots.txt.
    #[structopt(long, parse(from_os_str))]
    static_dir: PathBuf,

    /// Address to listen on, e.g. 0.0.0.0:1935.
    #[structopt(long, default_value = "0.0.0.0:1935")]
    listen: String,

    /// Number of worker threads, each serving one connection at a time
    /// for its entire lifetime.
    #[structopt(long, default_value = "32")]
    workers: usize,

    /// Total bytes the video cache may hold before acquire starts
    /// reporting OutOfMemory.
    #[structopt(long, default_value = "1073741824")]
    mem_budget: i64,

    /// Require a matching `sign` query parameter on every stream request.
    #[structopt(long)]
    signed_auth: bool,

    /// Socket send timeout floor, in seconds (raised to MIN_TIMEOUT if
    /// lower).
    #[structopt(long, default_value = "300")]
    timeout_secs: u64,
}

fn parse_fmt<S: AsRef<str>>(fmt: S) -> Option<mylog::Format> {
    match fmt.as_ref() {
        "google" => Some(mylog::Format::Google),
        "google-systemd" => Some(mylog::Format::GoogleSystemd),
        _ => None,
    }
}

/// Spawns a thread that blocks on SIGINT/SIGTERM and flips `shutdown` when
/// either arrives. No graceful drain: in-flight sessions are left to
/// finish naturally, matching the design doc's explicit non-goal of a
/// graceful shutdown sequence.
fn install_signal_handler(shutdown: Arc<AtomicBool>) -> Result<(), Error> {
    let mut signals = signal_hook::iterator::Signals::new(&[SIGINT, SIGTERM])
        .map_err(|e| format_err!("failed to register signal handler: {}", e))?;
    std::thread::spawn(move || {
        for sig in signals.forever() {
            log::info!("received signal {}, shutting down", sig);
            shutdown.store(true, Ordering::Relaxed);
            std::process::exit(0);
        }
    });
    Ok(())
}

fn run(opt: &Opt) -> Result<(), Error> {
    let cache = VideoCache::new(opt.videos.clone(), opt.mem_budget, opt.signed_auth);
    let statics = Arc::new(statics::StaticFiles::new(opt.static_dir.clone()));
    let listener = TcpListener::bind(&opt.listen)
        .map_err(|e| format_err!("failed to bind {}: {}", opt.listen, e))?;
    log::info!("listening on {} with {} workers", opt.listen, opt.workers);

    let shutdown = Arc::new(AtomicBool::new(false));
    install_signal_handler(shutdown.clone())?;

    let configured_timeout = Duration::from_secs(opt.timeout_secs);
    net::serve(listener, cache, statics, opt.workers, configured_timeout, shutdown);
    Ok(())
}

fn main() {
    let mut h = mylog::Builder::new()
        .set_format(
            std::env::var("CHOPSTREAM_FORMAT")
                .ok()
                .and_then(parse_fmt)
                .unwrap_or(mylog::Format::Google),
        )
        .set_spec(&std::env::var("CHOPSTREAM_LOG").unwrap_or_else(|_| "info".to_owned()))
        .build();
    h.clone().install().unwrap();
    let _a = h.r#async();

    let opt = Opt::from_args();
    if let Err(e) = run(&opt) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
