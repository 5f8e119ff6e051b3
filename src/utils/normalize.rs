// src/utils/normalize.rs
use url::Url;

/// Resolve `raw` against `base` into an absolute http(s) URL without fragment.
///
/// Query strings are kept. Non-web schemes (`javascript:`, `mailto:`, `tel:`,
/// `data:`) yield `None`.
pub fn normalize_url(base: &Url, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }

    let mut url = base.join(raw).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

/// Dedup key for a URL string: parsed, fragment stripped, host lowercased.
/// Unparseable input is returned trimmed as-is.
pub fn normalized_key(raw: &str) -> String {
    match Url::parse(raw.trim()) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw.trim().to_string(),
    }
}

/// Scheme, host and port all match
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}
