// src/core/model.rs
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// Pipeline stages, in execution order.
///
/// Doubles as the run status: the derived ordering is what keeps status
/// transitions monotonic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initialized,
    PassiveDiscovery,
    PortDiscovery,
    ActiveDiscovery,
    DeepDiscovery,
    Enrichment,
    AuthenticatedDiscovery,
    Completed,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Initialized => "initialized",
            Stage::PassiveDiscovery => "passive_discovery",
            Stage::PortDiscovery => "port_discovery",
            Stage::ActiveDiscovery => "active_discovery",
            Stage::DeepDiscovery => "deep_discovery",
            Stage::Enrichment => "enrichment",
            Stage::AuthenticatedDiscovery => "authenticated_discovery",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        }
    }

    /// A failure in this stage aborts the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Stage::PassiveDiscovery | Stage::ActiveDiscovery)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Liveness of a host as determined by HTTP probing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Live,
    Dead,
    #[default]
    Unknown,
}

/// DNS record bundle for one host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DnsRecords {
    pub a: Vec<String>,
    pub aaaa: Vec<String>,
    pub mx: Vec<String>,
    pub txt: Vec<String>,
    pub ns: Vec<String>,
    pub cname: Option<String>,
}

impl DnsRecords {
    /// Accumulate another line's records for the same host
    pub fn merge(&mut self, other: DnsRecords) {
        extend_unique(&mut self.a, other.a);
        extend_unique(&mut self.aaaa, other.aaaa);
        extend_unique(&mut self.mx, other.mx);
        extend_unique(&mut self.txt, other.txt);
        extend_unique(&mut self.ns, other.ns);
        if self.cname.is_none() {
            self.cname = other.cname;
        }
    }

    /// Resolved addresses, IPv4 first
    pub fn ips(&self) -> Vec<String> {
        self.a.iter().chain(self.aaaa.iter()).cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
            && self.aaaa.is_empty()
            && self.mx.is_empty()
            && self.txt.is_empty()
            && self.ns.is_empty()
            && self.cname.is_none()
    }
}

fn extend_unique(target: &mut Vec<String>, values: Vec<String>) {
    for value in values {
        if !target.contains(&value) {
            target.push(value);
        }
    }
}

/// An open port on a discovered host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenPort {
    pub port: u16,
    pub protocol: String,
    pub state: String,
    pub service: Option<String>,
    pub version: Option<String>,
    pub ip: Option<String>,
    pub discovered_at: DateTime<Utc>,
}

impl OpenPort {
    pub fn tcp(port: u16) -> Self {
        Self {
            port,
            protocol: "tcp".to_string(),
            state: "open".to_string(),
            service: None,
            version: None,
            ip: None,
            discovered_at: Utc::now(),
        }
    }
}

/// A host (subdomain) found during passive discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredHost {
    pub name: String,
    pub ips: Vec<String>,
    pub dns_records: Option<DnsRecords>,
    pub status: HostStatus,
    pub open_ports: Vec<OpenPort>,
    pub cloud_provider: Option<String>,
    pub cdn: Option<String>,
    pub discovered_via: Stage,
    pub discovered_at: DateTime<Utc>,
}

impl DiscoveredHost {
    pub fn new(name: impl Into<String>, discovered_via: Stage) -> Self {
        Self {
            name: name.into(),
            ips: Vec::new(),
            dns_records: None,
            status: HostStatus::Unknown,
            open_ports: Vec::new(),
            cloud_provider: None,
            cdn: None,
            discovered_via,
            discovered_at: Utc::now(),
        }
    }

    pub fn open_ports_count(&self) -> usize {
        self.open_ports.len()
    }

    /// Append a port, ignoring repeats of the same port/protocol
    pub fn add_port(&mut self, port: OpenPort) -> bool {
        let exists = self.open_ports.iter()
            .any(|p| p.port == port.port && p.protocol == port.protocol);
        if exists {
            return false;
        }
        self.open_ports.push(port);
        true
    }
}

/// Detected technology/framework
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Technology {
    pub name: String,
    pub version: Option<String>,
    pub category: String,
    pub confidence: f32,
    pub detected_from: Vec<String>,
}

/// Snapshot of the security-relevant response headers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SecurityHeaders {
    pub content_security_policy: Option<String>,
    pub strict_transport_security: Option<String>,
    pub x_frame_options: Option<String>,
    pub x_content_type_options: Option<String>,
    pub x_xss_protection: Option<String>,
    pub referrer_policy: Option<String>,
    pub permissions_policy: Option<String>,
}

impl SecurityHeaders {
    pub fn is_empty(&self) -> bool {
        self.content_security_policy.is_none()
            && self.strict_transport_security.is_none()
            && self.x_frame_options.is_none()
            && self.x_content_type_options.is_none()
            && self.x_xss_protection.is_none()
            && self.referrer_policy.is_none()
            && self.permissions_policy.is_none()
    }
}

/// TLS certificate details reported by the prober
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TlsInfo {
    pub version: Option<String>,
    pub cipher: Option<String>,
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub not_after: Option<String>,
    pub san: Vec<String>,
    pub self_signed: bool,
}

/// A live HTTP(S) service on a discovered host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveService {
    pub url: String,
    pub host: String,
    pub status_code: u16,
    pub title: Option<String>,
    pub server: Option<String>,
    pub content_length: Option<u64>,
    pub technologies: Vec<Technology>,
    pub security_headers: Option<SecurityHeaders>,
    pub tls: Option<TlsInfo>,
    pub response_time_ms: Option<f64>,
    pub redirects_to: Option<String>,
    pub discovered_at: DateTime<Utc>,
}

/// How a URL was found
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryChannel {
    FastCrawl,
    BrowserCrawl,
    Form,
}

impl DiscoveryChannel {
    /// Records from the rendering crawler carry richer metadata
    pub fn is_rendered(&self) -> bool {
        matches!(self, DiscoveryChannel::BrowserCrawl | DiscoveryChannel::Form)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveredUrl {
    pub url: String,
    pub method: String,
    pub depth: u32,
    pub source_page: Option<String>,
    pub parameters: BTreeMap<String, String>,
    pub channel: DiscoveryChannel,
    pub status_code: Option<u16>,
    pub javascript: bool,
    pub authenticated: bool,
    pub discovered_at: DateTime<Utc>,
}

impl DiscoveredUrl {
    pub fn new(url: impl Into<String>, channel: DiscoveryChannel, depth: u32) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            depth,
            source_page: None,
            parameters: BTreeMap::new(),
            channel,
            status_code: None,
            javascript: false,
            authenticated: false,
            discovered_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormField {
    pub name: String,
    pub field_type: String,
    pub required: bool,
}

/// Form captured alongside a discovered URL
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormRecord {
    pub action: String,
    pub method: String,
    pub fields: Vec<FormField>,
    pub source_page: Option<String>,
    pub authenticated: bool,
}

impl FormRecord {
    /// Identity used for deduplication: action, method and sorted field names
    pub fn signature(&self) -> String {
        let mut names: Vec<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();
        names.sort_unstable();
        format!("{} {} [{}]", self.method.to_uppercase(), self.action, names.join(","))
    }
}

/// Variable path segment mined from authenticated URLs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathParameter {
    pub name: String,
    pub pattern: String,
    pub position: usize,
    pub example_values: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub stage: Stage,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub details: BTreeMap<String, serde_json::Value>,
}

/// Cloud/CDN classification produced by enrichment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Infrastructure {
    /// Provider -> host names
    pub cloud_providers: BTreeMap<String, BTreeSet<String>>,
    /// CDN -> service URLs
    pub cdn_providers: BTreeMap<String, BTreeSet<String>>,
    pub summary: BTreeMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_matches_pipeline() {
        assert!(Stage::Initialized < Stage::PassiveDiscovery);
        assert!(Stage::PassiveDiscovery < Stage::PortDiscovery);
        assert!(Stage::PortDiscovery < Stage::ActiveDiscovery);
        assert!(Stage::DeepDiscovery < Stage::Enrichment);
        assert!(Stage::AuthenticatedDiscovery < Stage::Completed);
        assert!(Stage::PassiveDiscovery.is_fatal());
        assert!(Stage::ActiveDiscovery.is_fatal());
        assert!(!Stage::PortDiscovery.is_fatal());
        assert!(!Stage::DeepDiscovery.is_fatal());
    }

    #[test]
    fn test_dns_records_merge() {
        let mut records = DnsRecords {
            a: vec!["1.1.1.1".to_string()],
            ..Default::default()
        };
        records.merge(DnsRecords {
            a: vec!["1.1.1.1".to_string(), "2.2.2.2".to_string()],
            mx: vec!["mx.example.com".to_string()],
            cname: Some("edge.example.net".to_string()),
            ..Default::default()
        });

        assert_eq!(records.a, vec!["1.1.1.1", "2.2.2.2"]);
        assert_eq!(records.mx, vec!["mx.example.com"]);
        assert_eq!(records.cname.as_deref(), Some("edge.example.net"));
    }

    #[test]
    fn test_host_ports_are_append_only_and_unique() {
        let mut host = DiscoveredHost::new("a.example.com", Stage::PassiveDiscovery);
        assert!(host.add_port(OpenPort::tcp(80)));
        assert!(host.add_port(OpenPort::tcp(443)));
        assert!(!host.add_port(OpenPort::tcp(80)));
        assert_eq!(host.open_ports_count(), 2);
    }

    #[test]
    fn test_form_signature_ignores_field_order() {
        let field = |name: &str| FormField {
            name: name.to_string(),
            field_type: "text".to_string(),
            required: false,
        };
        let a = FormRecord {
            action: "https://site.test/login".to_string(),
            method: "post".to_string(),
            fields: vec![field("user"), field("pass")],
            source_page: None,
            authenticated: false,
        };
        let mut b = a.clone();
        b.fields.reverse();
        b.method = "POST".to_string();

        assert_eq!(a.signature(), b.signature());
    }
}
