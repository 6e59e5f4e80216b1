//! The process-wide video cache: a sorted-by-id collection of `Video`s,
//! reference counted, guarded by a single mutex.
//!
//! The mutex is released during the expensive disk load between a miss
//! detection and the post-load insert (see `acquire`); the insert step
//! re-checks for a racing peer that inserted the same id first and discards
//! the loser's load, exactly as the design doc requires.
//!
//! `release` removes a Video the instant its `ref_count` hits zero, so no
//! zero-refcount entry is ever sitting in `entries` for a proactive eviction
//! pass to reclaim. `mem_budget` is kept as exact bookkeeping against
//! `mem_used` rather than as an enforcement threshold.

use crate::error::Error;
use crate::video::{self, Video};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

struct Entry {
    video: Arc<Video>,
    ref_count: u32,
}

struct Inner {
    /// Kept sorted by `video.id` to permit binary search, as the design doc
    /// requires.
    entries: Vec<Entry>,
    mem_used: i64,
    mem_budget: i64,
}

/// The process-wide cache. Cheaply `Clone`d (an `Arc` around the shared
/// state) so every worker thread can hold its own handle.
#[derive(Clone)]
pub struct VideoCache {
    inner: Arc<Mutex<Inner>>,
    root: PathBuf,
    signed_auth: bool,
}

/// A checked-out reference to a `Video`. Dropping it releases the cache's
/// hold (decrementing `ref_count`, and evicting at zero) the same way the
/// original's `unload_video` did, but driven by Rust's `Drop` instead of a
/// call the caller has to remember to make.
pub struct VideoHandle {
    cache: VideoCache,
    id: i64,
    video: Arc<Video>,
}

impl std::ops::Deref for VideoHandle {
    type Target = Video;
    fn deref(&self) -> &Video {
        &self.video
    }
}

impl Drop for VideoHandle {
    fn drop(&mut self) {
        self.cache.release(self.id);
    }
}

impl VideoCache {
    pub fn new(root: impl Into<PathBuf>, mem_budget: i64, signed_auth: bool) -> VideoCache {
        VideoCache {
            inner: Arc::new(Mutex::new(Inner {
                entries: Vec::new(),
                mem_used: 0,
                mem_budget,
            })),
            root: root.into(),
            signed_auth,
        }
    }

    pub fn mem_used(&self) -> i64 {
        self.inner.lock().mem_used
    }

    pub fn mem_budget(&self) -> i64 {
        self.inner.lock().mem_budget
    }

    /// Acquires a handle to the video named `id`, authenticating `sign`
    /// against the stored signature when `signed_auth` is enabled.
    pub fn acquire(&self, id: i64, sign: Option<&str>) -> Result<VideoHandle, Error> {
        {
            let mut inner = self.inner.lock();
            if let Ok(idx) = inner.entries.binary_search_by_key(&id, |e| e.video.id) {
                let sign_ok = !self.signed_auth
                    || sign.map(|s| s == inner.entries[idx].video.sign).unwrap_or(false);
                if !sign_ok {
                    return Err(Error::InvalidSignature(inner.entries[idx].video.path.clone()));
                }
                inner.entries[idx].ref_count += 1;
                let video = inner.entries[idx].video.clone();
                return Ok(VideoHandle { cache: self.clone(), id, video });
            }
        }

        // Miss: load without holding the mutex.
        let dir = self.root.join(id.to_string());
        if !dir.is_dir() {
            return Err(Error::InvalidPath(dir.display().to_string()));
        }
        let loaded = video::load(id, &dir)?;
        if self.signed_auth {
            let sign_ok = sign.map(|s| s == loaded.sign).unwrap_or(false);
            if !sign_ok {
                return Err(Error::InvalidSignature(loaded.path));
            }
        }
        let loaded_size = loaded.size;
        let loaded = Arc::new(loaded);

        let mut inner = self.inner.lock();
        // Re-check: a racing peer may have inserted the same id while the
        // mutex was released for disk I/O. Keep the first-inserted copy and
        // behave as a hit with our freshly loaded copy discarded.
        if let Ok(idx) = inner.entries.binary_search_by_key(&id, |e| e.video.id) {
            inner.entries[idx].ref_count += 1;
            let video = inner.entries[idx].video.clone();
            return Ok(VideoHandle { cache: self.clone(), id, video });
        }

        inner.mem_used += loaded_size;
        let insert_at = inner.entries.partition_point(|e| e.video.id < id);
        inner.entries.insert(
            insert_at,
            Entry {
                video: loaded.clone(),
                ref_count: 1,
            },
        );

        Ok(VideoHandle { cache: self.clone(), id, video: loaded })
    }

    fn release(&self, id: i64) {
        let mut inner = self.inner.lock();
        if let Ok(idx) = inner.entries.binary_search_by_key(&id, |e| e.video.id) {
            inner.entries[idx].ref_count -= 1;
            if inner.entries[idx].ref_count == 0 {
                let entry = inner.entries.remove(idx);
                inner.mem_used -= entry.video.size;
            }
        }
    }
}

pub fn default_dir_in_range(id: i64) -> bool {
    (100..1_000_000_000).contains(&id)
}

pub fn is_video_dir(root: &Path, name: &str) -> Option<i64> {
    let id: i64 = name.parse().ok()?;
    if !default_dir_in_range(id) {
        return None;
    }
    if root.join(name).is_dir() {
        Some(id)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::ContainerType;
    use std::fs;

    fn write_fixture(dir: &Path, filename: &str, data: &[u8], offsets: &[i64]) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(filename), data).unwrap();
        let sidecar = crate::sidecar::Sidecar {
            path: dir.display().to_string(),
            sign: "a".repeat(40),
            variants: vec![crate::sidecar::SidecarVariant {
                filename: filename.to_owned(),
                iframe_offset: offsets.to_vec(),
            }],
        };
        fs::write(dir.join("data.txt"), crate::sidecar::write(&sidecar)).unwrap();
    }

    #[test]
    fn miss_then_hit_shares_the_same_buffer() {
        let tmp = tempfile::tempdir().unwrap();
        write_fixture(&tmp.path().join("100"), "a.flv", b"0123456789", &[0, 5]);

        let cache = VideoCache::new(tmp.path(), 1 << 30, false);
        let h1 = cache.acquire(100, None).unwrap();
        assert_eq!(h1.variants[0].container, ContainerType::Flv);
        let h2 = cache.acquire(100, None).unwrap();
        assert!(Arc::ptr_eq(&h1.video, &h2.video));
        assert_eq!(cache.mem_used(), 10);
        drop(h1);
        assert_eq!(cache.mem_used(), 10, "still referenced by h2");
        drop(h2);
        assert_eq!(cache.mem_used(), 0, "evicted once refcount hits zero");
    }

    #[test]
    fn missing_directory_is_invalid_path() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = VideoCache::new(tmp.path(), 1 << 30, false);
        let err = cache.acquire(404, None).unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));
    }

    #[test]
    fn signature_mismatch_is_fatal_but_does_not_evict() {
        let tmp = tempfile::tempdir().unwrap();
        write_fixture(&tmp.path().join("100"), "a.flv", b"0123456789", &[0, 5]);
        let cache = VideoCache::new(tmp.path(), 1 << 30, true);
        let err = cache.acquire(100, Some("wrong")).unwrap_err();
        assert!(matches!(err, Error::InvalidSignature(_)));
        // A subsequent acquire with no signature also fails, but the
        // video was never inserted by the failed attempt.
        assert_eq!(cache.mem_used(), 0);
    }

    #[test]
    fn mem_used_tracks_live_videos_exactly() {
        let tmp = tempfile::tempdir().unwrap();
        write_fixture(&tmp.path().join("100"), "a.flv", b"0123456789", &[0, 5]);
        write_fixture(&tmp.path().join("101"), "b.flv", b"01234", &[0, 2]);
        let cache = VideoCache::new(tmp.path(), 1 << 30, false);
        let h1 = cache.acquire(100, None).unwrap();
        let h2 = cache.acquire(101, None).unwrap();
        assert_eq!(cache.mem_used(), 15);
        drop(h1);
        assert_eq!(cache.mem_used(), 5);
        drop(h2);
        assert_eq!(cache.mem_used(), 0);
    }
}
