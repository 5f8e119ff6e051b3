// src/tools/decode.rs
use std::collections::{BTreeMap, BTreeSet};
use chrono::Utc;
use serde::{Deserialize, Deserializer};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::core::{
    DiscoveredUrl, DiscoveryChannel, DnsRecords, LiveService, OpenPort, SecurityHeaders,
    Technology, TlsInfo,
};
use crate::utils::normalized_key;

/// Records decoded from one tool run plus the number of malformed lines skipped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded<T> {
    pub records: T,
    pub warnings: usize,
}

/// Parse each non-blank line as JSON, handing good records to `accept`.
/// Returns the number of lines that failed to parse.
fn decode_lines<R, F>(tool: &str, output: &str, mut accept: F) -> usize
where
    R: DeserializeOwned,
    F: FnMut(R),
{
    let mut warnings = 0;
    for (index, line) in output.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<R>(line) {
            Ok(record) => accept(record),
            Err(e) => {
                warnings += 1;
                warn!("Skipping malformed {} output line {}: {}", tool, index + 1, e);
            }
        }
    }
    warnings
}

/// Collection fields: an explicit `null` reads the same as a missing key
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Newline-separated host names: comments dropped, scheme/path/port stripped,
/// lowercased, deduplicated and sorted.
pub fn decode_hostnames(output: &str) -> Vec<String> {
    let mut names = BTreeSet::new();
    for line in output.lines() {
        let mut line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") || line.starts_with(';') {
            continue;
        }
        if let Some((_, rest)) = line.split_once("://") {
            line = rest;
        }
        if let Some((host, _)) = line.split_once('/') {
            line = host;
        }
        // a single colon is a port, several mean IPv6
        if line.matches(':').count() == 1 {
            if let Some((host, _)) = line.split_once(':') {
                line = host;
            }
        }
        let name = line.trim_end_matches('.').to_lowercase();
        if !name.is_empty() {
            names.insert(name);
        }
    }
    debug!("Decoded {} host names", names.len());
    names.into_iter().collect()
}

#[derive(Debug, Deserialize)]
struct RawDns {
    #[serde(default)]
    host: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    a: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    aaaa: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    mx: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    txt: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    ns: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    cname: Vec<String>,
}

/// DNS resolver output, merged per host
pub fn decode_dns(output: &str) -> Decoded<BTreeMap<String, DnsRecords>> {
    let mut records: BTreeMap<String, DnsRecords> = BTreeMap::new();
    let warnings = decode_lines("dnsx", output, |raw: RawDns| {
        let Some(host) = raw.host.filter(|h| !h.trim().is_empty()) else {
            debug!("Dropping DNS record without host");
            return;
        };
        records.entry(host.trim().to_lowercase()).or_default().merge(DnsRecords {
            a: raw.a,
            aaaa: raw.aaaa,
            mx: raw.mx,
            txt: raw.txt,
            ns: raw.ns,
            cname: raw.cname.into_iter().next(),
        });
    });
    Decoded { records, warnings }
}

#[derive(Debug, Deserialize)]
struct RawPort {
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    port: Option<Value>,
    #[serde(default)]
    protocol: Option<String>,
    #[serde(default)]
    service: Option<String>,
}

fn port_number(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.trim().parse().ok(),
        // older scanners nest the number as {"Port": 80}
        Value::Object(map) => map.get("Port").or_else(|| map.get("port")).and_then(port_number),
        _ => None,
    }
}

/// Port scanner output, merged per host (by `host`, falling back to `ip`)
pub fn decode_ports(output: &str) -> Decoded<BTreeMap<String, Vec<OpenPort>>> {
    let mut records: BTreeMap<String, Vec<OpenPort>> = BTreeMap::new();
    let warnings = decode_lines("naabu", output, |raw: RawPort| {
        let key = raw.host.clone()
            .filter(|h| !h.trim().is_empty())
            .or_else(|| raw.ip.clone())
            .map(|k| k.trim().to_lowercase());
        let (Some(key), Some(port)) = (key, raw.port.as_ref().and_then(port_number)) else {
            debug!("Dropping port record without host or port");
            return;
        };

        let mut open = OpenPort::tcp(port);
        if let Some(protocol) = raw.protocol.filter(|p| !p.is_empty()) {
            open.protocol = protocol.to_lowercase();
        }
        open.service = raw.service;
        open.ip = raw.ip;

        let ports = records.entry(key).or_default();
        if !ports.iter().any(|p| p.port == open.port && p.protocol == open.protocol) {
            ports.push(open);
        }
    });
    Decoded { records, warnings }
}

#[derive(Debug, Deserialize)]
struct RawProbe {
    #[serde(default)]
    url: Option<String>,
    #[serde(default, alias = "status-code")]
    status_code: Option<u16>,
    #[serde(default)]
    input: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    webserver: Option<String>,
    #[serde(default, alias = "content-length")]
    content_length: Option<u64>,
    #[serde(default, deserialize_with = "null_as_default")]
    tech: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    header: BTreeMap<String, Value>,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    final_url: Option<String>,
    #[serde(default)]
    tls: Option<Value>,
}

/// HTTP prober output, one service per valid line
pub fn decode_probe(output: &str) -> Decoded<Vec<LiveService>> {
    let mut records = Vec::new();
    let warnings = decode_lines("httpx", output, |raw: RawProbe| {
        match probe_to_service(raw) {
            Some(service) => records.push(service),
            None => debug!("Dropping probe record without url or status"),
        }
    });
    Decoded { records, warnings }
}

fn probe_to_service(raw: RawProbe) -> Option<LiveService> {
    let url = raw.url.filter(|u| !u.is_empty())?;
    let status_code = raw.status_code.filter(|s| *s > 0)?;

    let host = Url::parse(&url).ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .or_else(|| raw.input.as_deref().map(|i| decode_hostnames(i).into_iter().next().unwrap_or_default()))
        .filter(|h| !h.is_empty())?;

    let redirects_to = raw.final_url.filter(|f| !f.is_empty() && *f != url);

    Some(LiveService {
        url,
        host,
        status_code,
        title: raw.title.filter(|t| !t.is_empty()),
        server: raw.webserver.filter(|s| !s.is_empty()),
        content_length: raw.content_length,
        technologies: raw.tech.iter().filter_map(|t| parse_technology(t)).collect(),
        security_headers: parse_security_headers(&raw.header),
        tls: raw.tls.as_ref().and_then(parse_tls),
        response_time_ms: raw.time.as_deref().and_then(parse_response_time),
        redirects_to,
        discovered_at: Utc::now(),
    })
}

/// `name[:version]` as reported by tech detection
pub fn parse_technology(raw: &str) -> Option<Technology> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (name, version) = match raw.split_once(':') {
        Some((name, version)) => (name.trim(), Some(version.trim().to_string()).filter(|v| !v.is_empty())),
        None => (raw, None),
    };

    Some(Technology {
        name: name.to_string(),
        version,
        category: categorize_technology(name).to_string(),
        confidence: 0.8,
        detected_from: vec!["headers".to_string(), "response".to_string()],
    })
}

fn categorize_technology(name: &str) -> &'static str {
    const CATEGORIES: &[(&str, &[&str])] = &[
        ("web_server", &["nginx", "apache", "iis", "caddy", "lighttpd"]),
        ("framework", &["express", "django", "flask", "rails", "laravel", "spring", "aspnet", "next.js", "nextjs", "nuxt"]),
        ("cms", &["wordpress", "drupal", "joomla", "magento", "shopify", "wix"]),
        ("cdn", &["cloudflare", "akamai", "fastly", "cloudfront"]),
        ("javascript", &["jquery", "react", "vue", "angular", "bootstrap"]),
    ];
    let lower = name.to_lowercase();
    CATEGORIES.iter()
        .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
        .map(|(category, _)| *category)
        .unwrap_or("other")
}

fn header_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let joined: Vec<String> = items.iter().filter_map(|v| v.as_str().map(String::from)).collect();
            (!joined.is_empty()).then(|| joined.join(", "))
        }
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Only returns a snapshot when at least one security header is present
fn parse_security_headers(headers: &BTreeMap<String, Value>) -> Option<SecurityHeaders> {
    let normalized: BTreeMap<String, String> = headers.iter()
        .filter_map(|(k, v)| header_value(v).map(|v| (k.to_lowercase().replace('_', "-"), v)))
        .collect();
    let get = |name: &str| normalized.get(name).cloned();

    let snapshot = SecurityHeaders {
        content_security_policy: get("content-security-policy"),
        strict_transport_security: get("strict-transport-security"),
        x_frame_options: get("x-frame-options"),
        x_content_type_options: get("x-content-type-options"),
        x_xss_protection: get("x-xss-protection"),
        referrer_policy: get("referrer-policy"),
        permissions_policy: get("permissions-policy"),
    };
    (!snapshot.is_empty()).then_some(snapshot)
}

fn parse_tls(value: &Value) -> Option<TlsInfo> {
    let tls = value.as_object()?;
    if tls.is_empty() {
        return None;
    }
    // certificate fields are flat in newer prober versions, nested in older ones
    let cert = tls.get("certificate").and_then(Value::as_object).unwrap_or(tls);
    let text = |map: &serde_json::Map<String, Value>, key: &str| {
        map.get(key).and_then(Value::as_str).map(String::from)
    };

    Some(TlsInfo {
        version: text(tls, "tls_version"),
        cipher: text(tls, "cipher"),
        issuer: text(cert, "issuer_cn"),
        subject: text(cert, "subject_cn"),
        not_after: text(cert, "not_after"),
        san: cert.get("subject_an")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default(),
        self_signed: cert.get("self_signed").and_then(Value::as_bool).unwrap_or(false),
    })
}

/// `"250ms"`, `"1.5s"` or a bare number of milliseconds
pub fn parse_response_time(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let parsed = if let Some(ms) = raw.strip_suffix("ms") {
        ms.trim().parse::<f64>().ok()
    } else if let Some(s) = raw.strip_suffix('s') {
        s.trim().parse::<f64>().ok().map(|s| s * 1000.0)
    } else {
        raw.parse::<f64>().ok()
    };
    if parsed.is_none() {
        warn!("Failed to parse response time '{}'", raw);
    }
    parsed
}

#[derive(Debug, Default, Deserialize)]
struct RawCrawlRequest {
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    method: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCrawlResponse {
    #[serde(default)]
    status_code: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct RawCrawl {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    request: Option<RawCrawlRequest>,
    #[serde(default)]
    response: Option<RawCrawlResponse>,
}

/// Fast crawler output in either flat or request/response form
pub fn decode_crawl(output: &str) -> Decoded<Vec<DiscoveredUrl>> {
    let mut records = Vec::new();
    let mut seen = BTreeSet::new();
    let warnings = decode_lines("katana", output, |raw: RawCrawl| {
        let request = raw.request.unwrap_or_default();
        let Some(url) = request.endpoint.or(raw.url).filter(|u| !u.is_empty()) else {
            debug!("Dropping crawl record without url");
            return;
        };
        let key = normalized_key(&url);
        if !seen.insert(key.clone()) {
            return;
        }

        let mut record = DiscoveredUrl::new(key, DiscoveryChannel::FastCrawl, 0);
        record.method = request.method.or(raw.method)
            .filter(|m| !m.is_empty())
            .map(|m| m.to_uppercase())
            .unwrap_or_else(|| "GET".to_string());
        record.status_code = raw.response.and_then(|r| r.status_code);
        record.javascript = raw.source.as_deref() == Some("javascript");
        if let Ok(parsed) = Url::parse(&record.url) {
            for (key, value) in parsed.query_pairs() {
                record.parameters.entry(key.into_owned()).or_insert_with(|| value.into_owned());
            }
        }
        record.source_page = raw.source.filter(|s| s.starts_with("http"));
        records.push(record);
    });
    Decoded { records, warnings }
}
