//! `Variant` and `Video`: the in-memory representation of one encoded file
//! and of a logical asset made of several of them, plus the disk-loading
//! routine that turns a sidecar into a `Video`.

use crate::error::Error;
use crate::sidecar;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Recognized container tags. Anything else is rejected by the indexer and
/// falls back to `Other` (served as `text/plain`) in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerType {
    Flv,
    Mp4,
    Other,
}

pub const ALLOWED_EXTENSIONS: &[&str] = &["flv", "mp4", "m4v", "mov", "ogv", "webm"];

impl ContainerType {
    pub fn from_extension(ext: &str) -> ContainerType {
        match ext.to_ascii_lowercase().as_str() {
            "flv" => ContainerType::Flv,
            "mp4" | "m4v" | "mov" | "ogv" | "webm" => ContainerType::Mp4,
            _ => ContainerType::Other,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ContainerType::Flv => "video/x-flv",
            ContainerType::Mp4 => "video/mp4",
            ContainerType::Other => "text/plain",
        }
    }
}

/// One encoded file at a particular quality.
pub struct Variant {
    pub container: ContainerType,
    pub data: Vec<u8>,
    pub iframe_offset: Vec<i64>,
}

impl Variant {
    pub fn data_size(&self) -> i64 {
        self.data.len() as i64
    }

    pub fn iframe_num(&self) -> usize {
        self.iframe_offset.len()
    }

    pub fn avg_size(&self) -> i64 {
        self.data_size() / self.iframe_num() as i64
    }

    /// `get_next_offset(k, jump)`: advances `jump` keyframes past `k`, then
    /// walks forward while the offset there equals the offset at `k` — a run
    /// of duplicate offsets (an artifact of how the indexer records
    /// `prev_offset`) is treated as a single boundary.
    pub fn get_next_offset(&self, k: usize, jump: usize) -> usize {
        let mut next = k + jump;
        while next < self.iframe_offset.len() && self.iframe_offset[next] == self.iframe_offset[k] {
            next += 1;
        }
        next
    }
}

/// A logical asset: one directory, several `Variant`s sorted by size.
pub struct Video {
    pub id: i64,
    pub path: String,
    pub sign: String,
    pub variants: Vec<Variant>,
    pub size: i64,
}

impl Video {
    pub fn new(id: i64, path: String, sign: String, mut variants: Vec<Variant>) -> Result<Video, Error> {
        if variants.is_empty() {
            return Err(Error::NoStreamsAvailable(path));
        }
        variants.sort_by_key(|v| v.data_size());
        let size = variants.iter().map(|v| v.data_size()).sum();
        Ok(Video {
            id,
            path,
            sign,
            variants,
            size,
        })
    }
}

/// Loads a `Video` from its on-disk directory: reads `data.txt`, then each
/// variant file it names. Variants with a missing file or malformed offsets
/// are dropped with a warning rather than failing the whole load; the load
/// only fails if zero variants survive.
pub fn load(id: i64, dir: &Path) -> Result<Video, Error> {
    let sidecar_path = dir.join("data.txt");
    let contents = std::fs::read_to_string(&sidecar_path)
        .map_err(|_| Error::MissingSidecar(sidecar_path.display().to_string()))?;
    let parsed = sidecar::parse(&contents, &sidecar_path.display().to_string())?;

    let mut variants = Vec::with_capacity(parsed.variants.len());
    for v in &parsed.variants {
        let file_path = dir.join(&v.filename);
        let data = match std::fs::read(&file_path) {
            Ok(d) => d,
            Err(_) => {
                log::warn!("missing variant file {}", file_path.display());
                continue;
            }
        };
        let data_size = data.len() as i64;
        if v.iframe_offset.is_empty() || *v.iframe_offset.last().unwrap() >= data_size {
            log::warn!("invalid iframe offsets in {}", file_path.display());
            continue;
        }
        if !v.iframe_offset.windows(2).all(|w| w[0] <= w[1]) {
            log::warn!("non-monotonic iframe offsets in {}", file_path.display());
            continue;
        }
        let ext = file_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        variants.push(Variant {
            container: ContainerType::from_extension(ext),
            data,
            iframe_offset: v.iframe_offset.clone(),
        });
    }

    Video::new(id, parsed.path, parsed.sign, variants)
}

/// `SHA1(path || epoch_seconds || total_bytes)` computed at index time for a
/// directory about to be written out as a sidecar.
pub fn compute_signature(path: &str, total_bytes: u64) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    crate::signature::compute(path, now, total_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(offsets: Vec<i64>, size: usize) -> Variant {
        Variant {
            container: ContainerType::Flv,
            data: vec![0u8; size],
            iframe_offset: offsets,
        }
    }

    #[test]
    fn sorts_variants_by_size_ascending() {
        let v = Video::new(
            1,
            "/v/1".into(),
            "s".repeat(40),
            vec![variant(vec![0], 100), variant(vec![0], 10), variant(vec![0], 50)],
        )
        .unwrap();
        let sizes: Vec<i64> = v.variants.iter().map(|x| x.data_size()).collect();
        assert_eq!(sizes, vec![10, 50, 100]);
    }

    #[test]
    fn zero_variants_fails_construction() {
        let err = Video::new(1, "/v/1".into(), "s".repeat(40), vec![]).unwrap_err();
        assert!(matches!(err, Error::NoStreamsAvailable(_)));
    }

    #[test]
    fn get_next_offset_skips_duplicate_runs() {
        let v = variant(vec![0, 10, 10, 10, 30], 40);
        // From k=1 (offset 10), the next position is 2 (also offset 10, a
        // duplicate of k's offset), so it keeps walking until it reaches a
        // genuinely different offset at index 4.
        assert_eq!(v.get_next_offset(1, 1), 4);
    }

    #[test]
    fn avg_size_divides_evenly() {
        let v = variant(vec![0, 10], 100);
        assert_eq!(v.avg_size(), 50);
    }
}
