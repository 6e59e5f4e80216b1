//! Offline indexer: walks a directory of numerically-named video
//! directories, extracts I-frame byte offsets from each variant file, and
//! writes the `data.txt` sidecar the streaming engine reads at serve time.

use failure::{format_err, Error};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use structopt::StructOpt;

mod video;

const MIN_DIR_ID: i64 = 100;
const MAX_DIR_ID: i64 = 99999;

#[derive(StructOpt)]
#[structopt(name = "chopper")]
struct Opt {
    /// Root path containing numerically-named video directories.
    #[structopt(short, long, parse(from_os_str))]
    path: PathBuf,

    /// Suppress the per-directory progress line.
    #[structopt(short, long)]
    quiet: bool,
}

fn parse_fmt<S: AsRef<str>>(fmt: S) -> Option<mylog::Format> {
    match fmt.as_ref() {
        "google" => Some(mylog::Format::Google),
        "google-systemd" => Some(mylog::Format::GoogleSystemd),
        _ => None,
    }
}

/// Lists the subdirectories of `root` whose name parses to an integer in
/// `[MIN_DIR_ID, MAX_DIR_ID]`, in alphabetically sorted order (matching the
/// original's `scandir(..., alphasort)`).
fn list_video_dirs(root: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut entries: Vec<_> = fs::read_dir(root)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter(|e| {
            e.file_name()
                .to_str()
                .and_then(|s| s.parse::<i64>().ok())
                .map(|id| (MIN_DIR_ID..=MAX_DIR_ID).contains(&id))
                .unwrap_or(false)
        })
        .map(|e| e.path())
        .collect();
    entries.sort();
    Ok(entries)
}

/// Indexes one video directory: finds its recognized-extension variant
/// files, extracts I-frame offsets from each, and writes `data.txt`.
/// Returns `Ok(false)` (no error, no sidecar) for a directory with no
/// recognized video files — not every numbered directory holds a video.
fn index_directory(dir: &Path) -> Result<bool, Error> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| stream_core::video::ALLOWED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    entries.sort();

    if entries.is_empty() {
        return Ok(false);
    }

    let mut variants = Vec::with_capacity(entries.len());
    for path in &entries {
        match video::extract_variant(path) {
            Ok(v) => variants.push(v),
            Err(e) => log::warn!("skipping {}: {}", path.display(), e),
        }
    }
    if variants.is_empty() {
        return Ok(false);
    }

    // Stable sort: ties in data_size retain the filesystem-enumeration
    // order established above.
    variants.sort_by_key(|v| v.data_size);

    let total_bytes: u64 = variants.iter().map(|v| v.data_size as u64).sum();
    let sign = stream_core::video::compute_signature(&dir.display().to_string(), total_bytes);

    let sidecar = stream_core::sidecar::Sidecar {
        path: dir.display().to_string(),
        sign,
        variants: variants
            .into_iter()
            .map(|v| stream_core::sidecar::SidecarVariant {
                filename: v.filename,
                iframe_offset: v.iframe_offset,
            })
            .collect(),
    };
    fs::write(dir.join("data.txt"), stream_core::sidecar::write(&sidecar))?;
    Ok(true)
}

fn run(opt: &Opt) -> Result<usize, Error> {
    ffmpeg_next::init().map_err(|e| format_err!("ffmpeg init failed: {}", e))?;

    let dirs = list_video_dirs(&opt.path)?;
    let mut written = 0;
    for dir in dirs {
        if !opt.quiet {
            print!("Loading video from {}... ", dir.display());
            use std::io::Write;
            std::io::stdout().flush().ok();
        }
        match index_directory(&dir) {
            Ok(true) => {
                written += 1;
                if !opt.quiet {
                    println!("Done");
                }
            }
            Ok(false) => {
                if !opt.quiet {
                    println!("skip (no videos)");
                }
            }
            Err(e) => {
                log::error!("scanning directory {} failed: {}", dir.display(), e);
                if !opt.quiet {
                    println!("failed");
                }
            }
        }
    }
    Ok(written)
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
    let started = SystemTime::now();
    match run(&opt) {
        Ok(0) => {
            eprintln!("no sidecars written under {}", opt.path.display());
            std::process::exit(1);
        }
        Ok(n) => {
            log::info!(
                "wrote {} sidecar(s) in {:?}",
                n,
                started.elapsed().unwrap_or_default()
            );
        }
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
