//! Content signature: `SHA1(path || decimal_epoch_seconds || decimal_total_bytes)`,
//! rendered as 40 lowercase hex characters. No delimiters between the three
//! concatenated fields.

use sha1::{Digest, Sha1};

pub fn compute(path: &str, epoch_seconds: u64, total_bytes: u64) -> String {
    let mut hasher = Sha1::new();
    hasher.update(path.as_bytes());
    hasher.update(epoch_seconds.to_string().as_bytes());
    hasher.update(total_bytes.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Byte-for-byte comparison against the stored signature. Missing/absent
/// signatures should be handled by the caller before reaching this point;
/// this function assumes both arguments are present strings.
pub fn verify(stored: &str, supplied: &str) -> bool {
    stored == supplied
}
