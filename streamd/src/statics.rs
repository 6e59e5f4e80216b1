//! Serves the handful of fixed, non-video files a player expects at the
//! root of the site: `crossdomain.xml`, `player.html`, `robots.txt`. Each
//! request resolves to a file inside a single configured directory — no
//! per-id variants, no directory traversal.

use std::path::PathBuf;

pub struct StaticFiles {
    root: PathBuf,
}

struct Entry {
    name: &'static str,
    content_type: &'static str,
}

const SUPPORTED: &[Entry] = &[
    Entry { name: "crossdomain.xml", content_type: "text/xml" },
    Entry { name: "player.html", content_type: "text/html" },
    Entry { name: "robots.txt", content_type: "text/plain" },
];

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> StaticFiles {
        StaticFiles { root: root.into() }
    }

    /// Looks up `name` (the request path with its leading slash stripped)
    /// against the supported set, and if matched, reads it from disk.
    /// Returns `None` for anything not in the supported set or missing on
    /// disk — the caller falls back to a 404.
    pub fn get(&self, name: &str) -> Option<(&'static str, Vec<u8>)> {
        let entry = SUPPORTED.iter().find(|e| e.name == name)?;
        let contents = std::fs::read(self.file_path(entry.name)).ok()?;
        Some((entry.content_type, contents))
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

pub fn is_static_name(name: &str) -> bool {
    SUPPORTED.iter().any(|e| e.name == name)
}
