//! Sidecar (`data.txt`) codec.
//!
//! Line-oriented, ASCII-only, single writer (the offline indexer) / multiple
//! readers (the streaming engine). Grammar:
//!
//! ```text
//! <directory_path>
//! <40-char lowercase hex signature>
//! <variant_count>
//! repeat variant_count times:
//!   <variant_filename>
//!   <iframe_count>
//!   <offset_1> <offset_2> ... <offset_n>
//! ```
//!
//! The parser is intentionally strict: any framing anomaly yields
//! `Error::MalformedSidecar` rather than best-effort recovery.

use crate::error::Error;

pub const SIGN_LEN: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarVariant {
    pub filename: String,
    pub iframe_offset: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sidecar {
    pub path: String,
    pub sign: String,
    pub variants: Vec<SidecarVariant>,
}

fn malformed(path: &str, why: impl Into<String>) -> Error {
    Error::MalformedSidecar(path.to_owned(), why.into())
}

/// Parses the contents of a `data.txt` file.
///
/// `context` is used only for error messages (typically the sidecar's path
/// on disk); it is not interpreted.
pub fn parse(contents: &str, context: &str) -> Result<Sidecar, Error> {
    let mut lines = contents.lines();

    let path = lines
        .next()
        .ok_or_else(|| malformed(context, "missing path line"))?
        .to_owned();

    let sign = lines
        .next()
        .ok_or_else(|| malformed(context, "missing signature line"))?
        .to_owned();
    if sign.len() != SIGN_LEN || !sign.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
    {
        return Err(malformed(context, "signature is not 40 lowercase hex chars"));
    }

    let variant_count: usize = lines
        .next()
        .ok_or_else(|| malformed(context, "missing variant count line"))?
        .trim()
        .parse()
        .map_err(|_| malformed(context, "variant count is not an integer"))?;
    if variant_count < 1 {
        return Err(malformed(context, "variant count must be >= 1"));
    }

    let mut variants = Vec::with_capacity(variant_count);
    for _ in 0..variant_count {
        let filename = lines
            .next()
            .ok_or_else(|| malformed(context, "missing variant filename"))?;
        if filename.contains('/') {
            return Err(malformed(context, "variant filename contains a slash"));
        }

        let iframe_count: usize = lines
            .next()
            .ok_or_else(|| malformed(context, "missing iframe count"))?
            .trim()
            .parse()
            .map_err(|_| malformed(context, "iframe count is not an integer"))?;
        if iframe_count < 1 {
            return Err(malformed(context, "iframe count must be >= 1"));
        }

        let offset_line = lines
            .next()
            .ok_or_else(|| malformed(context, "missing offset line"))?;
        let iframe_offset: Vec<i64> = offset_line
            .split_ascii_whitespace()
            .map(|tok| tok.parse::<i64>())
            .collect::<Result<_, _>>()
            .map_err(|_| malformed(context, "offset line contains a non-integer token"))?;
        if iframe_offset.len() != iframe_count {
            return Err(malformed(context, "offset count does not match iframe count"));
        }

        variants.push(SidecarVariant {
            filename: filename.to_owned(),
            iframe_offset,
        });
    }

    Ok(Sidecar { path, sign, variants })
}

/// Renders a `Sidecar` back into the on-disk text format.
pub fn write(sidecar: &Sidecar) -> String {
    let mut out = String::new();
    out.push_str(&sidecar.path);
    out.push('\n');
    out.push_str(&sidecar.sign);
    out.push('\n');
    out.push_str(&sidecar.variants.len().to_string());
    out.push('\n');
    for v in &sidecar.variants {
        out.push_str(&v.filename);
        out.push('\n');
        out.push_str(&v.iframe_offset.len().to_string());
        out.push('\n');
        let offsets: Vec<String> = v.iframe_offset.iter().map(|o| o.to_string()).collect();
        out.push_str(&offsets.join(" "));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Sidecar {
        Sidecar {
            path: "/videos/100".to_owned(),
            sign: "a".repeat(40),
            variants: vec![
                SidecarVariant {
                    filename: "low.flv".to_owned(),
                    iframe_offset: vec![0, 5, 10],
                },
                SidecarVariant {
                    filename: "high.flv".to_owned(),
                    iframe_offset: vec![0, 20, 40, 60],
                },
            ],
        }
    }

    #[test]
    fn round_trips() {
        let s = sample();
        let text = write(&s);
        let parsed = parse(&text, "test").unwrap();
        assert_eq!(s, parsed);
    }

    #[test]
    fn tolerates_runs_of_spaces_between_offsets() {
        let text = "/v/1\n".to_owned()
            + &"b".repeat(40)
            + "\n1\nonly.flv\n3\n0   5\t10\n";
        let parsed = parse(&text, "test").unwrap();
        assert_eq!(parsed.variants[0].iframe_offset, vec![0, 5, 10]);
    }

    #[test]
    fn rejects_uppercase_signature() {
        let text = "/v/1\n".to_owned() + &"B".repeat(40) + "\n1\nf.flv\n1\n0\n";
        assert!(parse(&text, "test").is_err());
    }

    #[test]
    fn rejects_truncated_file() {
        let text = "/v/1\nsign\n1\n";
        assert!(parse(text, "test").is_err());
    }

    #[test]
    fn ignores_trailing_content() {
        let mut text = write(&sample());
        text.push_str("garbage trailer\nmore garbage\n");
        let parsed = parse(&text, "test").unwrap();
        assert_eq!(parsed, sample());
    }
}
