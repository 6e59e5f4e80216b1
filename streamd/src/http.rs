//! Minimal HTTP/1.x request-line and query-string parsing: just enough to
//! turn `GET /<video_id>?quality=1&pos=3&sign=... HTTP/1.1` into the
//! parameter bag `stream_core::Session` consumes. No headers are parsed;
//! the engine doesn't need any of them.

use stream_core::RequestParams;

/// The raw parameter bag the HTTP contract promises the engine: every value
/// alphanumeric and at most 64 bytes, or absent.
#[derive(Debug, Default, Clone)]
pub struct ParamBag {
    pub video_id: Option<i64>,
    pub sign: Option<String>,
    pub quality: Option<usize>,
    pub pos: Option<usize>,
    pub cache: Option<String>,
}

const MAX_VALUE_LEN: usize = 64;

fn is_clean_value(v: &str) -> bool {
    !v.is_empty() && v.len() <= MAX_VALUE_LEN && v.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Parses `GET <target> HTTP/1.x\r\n` (the first line of the request) into
/// the path component and its query string. Returns `None` for anything
/// that isn't a well-formed `GET` request line.
pub fn parse_request_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_end_matches("\r\n").trim_end_matches('\n');
    let mut parts = line.split(' ');
    let method = parts.next()?;
    if method != "GET" {
        return None;
    }
    let target = parts.next()?;
    let version = parts.next()?;
    if !version.starts_with("HTTP/1.") {
        return None;
    }
    match target.find('?') {
        Some(idx) => Some((&target[..idx], &target[idx + 1..])),
        None => Some((target, "")),
    }
}

/// The video id is the path with its leading slash stripped: `/100` ->
/// `100`. Anything else (nested paths, non-numeric ids) isn't a stream
/// request — the caller falls back to static file serving.
pub fn path_video_id(path: &str) -> Option<i64> {
    let trimmed = path.strip_prefix('/')?;
    if trimmed.is_empty() || trimmed.contains('/') {
        return None;
    }
    trimmed.parse().ok()
}

/// Parses a query string of `k1=v1&k2=v2` pairs into a `ParamBag`, dropping
/// (not erroring on) any value that isn't clean alphanumeric, <= 64 bytes.
pub fn parse_query(query: &str) -> ParamBag {
    let mut bag = ParamBag::default();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let mut it = pair.splitn(2, '=');
        let key = it.next().unwrap_or("");
        let value = match it.next() {
            Some(v) if is_clean_value(v) => v,
            _ => continue,
        };
        match key {
            "video_id" => bag.video_id = value.parse().ok(),
            "sign" => bag.sign = Some(value.to_owned()),
            "quality" => bag.quality = value.parse().ok(),
            "pos" => bag.pos = value.parse().ok(),
            "cache" => bag.cache = Some(value.to_owned()),
            _ => {}
        }
    }
    bag
}

impl ParamBag {
    pub fn to_request_params(&self) -> RequestParams {
        RequestParams {
            quality: self.quality,
            pos: self.pos,
            cache_control: self.cache.as_deref().map(|v| format!("max-age={}", v)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_get_request_line() {
        let (path, query) = parse_request_line("GET /100?quality=1&pos=3 HTTP/1.1\r\n").unwrap();
        assert_eq!(path, "/100");
        assert_eq!(query, "quality=1&pos=3");
    }

    #[test]
    fn rejects_non_get_methods() {
        assert!(parse_request_line("POST /100 HTTP/1.1\r\n").is_none());
    }

    #[test]
    fn path_without_query_has_empty_query_string() {
        let (path, query) = parse_request_line("GET /crossdomain.xml HTTP/1.0\r\n").unwrap();
        assert_eq!(path, "/crossdomain.xml");
        assert_eq!(query, "");
    }

    #[test]
    fn extracts_numeric_video_id_from_path() {
        assert_eq!(path_video_id("/100"), Some(100));
        assert_eq!(path_video_id("/player.html"), None);
        assert_eq!(path_video_id("/100/extra"), None);
    }

    #[test]
    fn query_parsing_drops_oversized_and_non_alphanumeric_values() {
        let long = "a".repeat(65);
        let query = format!("sign=abc123&quality={}&pos=3", long);
        let bag = parse_query(&query);
        assert_eq!(bag.sign.as_deref(), Some("abc123"));
        assert_eq!(bag.quality, None);
        assert_eq!(bag.pos, Some(3));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let bag = parse_query("bogus=1&quality=2");
        assert_eq!(bag.quality, Some(2));
    }

    #[test]
    fn cache_param_is_echoed_into_max_age() {
        let bag = parse_query("cache=60");
        assert_eq!(bag.to_request_params().cache_control.as_deref(), Some("max-age=60"));
    }

    #[test]
    fn absent_cache_param_leaves_cache_control_unset() {
        let bag = parse_query("quality=1");
        assert_eq!(bag.to_request_params().cache_control, None);
    }
}
