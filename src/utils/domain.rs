// src/utils/domain.rs
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static DOMAIN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}$").unwrap()
});

/// Second-level labels under which registrations happen (example.co.uk)
const MULTI_PART_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "com.au", "net.au", "org.au",
    "co.jp", "co.nz", "com.br", "com.mx", "co.in", "co.za", "com.cn",
];

/// Extract the registrable domain from a URL or host name.
///
/// `https://app.example.com/login` and `app.example.com` both yield `example.com`.
pub fn extract_domain(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let host = if trimmed.contains("://") {
        Url::parse(trimmed).ok()?.host_str()?.to_string()
    } else {
        trimmed
            .split(['/', '?', '#'])
            .next()?
            .split(':')
            .next()?
            .to_string()
    };

    let host = host.trim_end_matches('.').to_lowercase();
    if !is_valid_domain(&host) {
        return None;
    }

    let labels: Vec<&str> = host.split('.').collect();
    let keep = if labels.len() >= 3
        && MULTI_PART_SUFFIXES.contains(&labels[labels.len() - 2..].join(".").as_str())
    {
        3
    } else {
        2
    };

    Some(labels[labels.len().saturating_sub(keep)..].join("."))
}

/// True when `host` is `domain` itself or any name below it
pub fn is_subdomain(host: &str, domain: &str) -> bool {
    let host = host.trim_end_matches('.').to_lowercase();
    let domain = domain.trim_end_matches('.').to_lowercase();
    host == domain || host.ends_with(&format!(".{}", domain))
}

pub fn is_valid_domain(name: &str) -> bool {
    name.len() <= 253 && DOMAIN_REGEX.is_match(name)
}

/// Make a string safe to use as a file name
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
