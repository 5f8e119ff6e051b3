// src/core/result.rs
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use tracing::debug;

use super::model::{
    DiscoveredHost, DiscoveredUrl, DnsRecords, FormRecord, HostStatus, Infrastructure,
    LiveService, OpenPort, PathParameter, Stage, TimelineEvent,
};
use crate::config::Depth;
use crate::utils::normalize::normalized_key;

/// Metadata about one discovery run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub target: String,
    pub run_id: String,
    pub depth: Depth,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub status: Stage,
    pub error: Option<String>,
}

impl RunMetadata {
    /// Move the run forward to `next`.
    ///
    /// Returns false (and leaves the status untouched) for backwards moves
    /// and for any move out of a terminal state.
    pub fn advance(&mut self, next: Stage) -> bool {
        if self.status.is_terminal() || next <= self.status {
            return false;
        }
        self.status = next;
        true
    }
}

/// Summary statistics, always derived from the final collections
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Statistics {
    pub total_subdomains: usize,
    pub resolved_hosts: usize,
    pub live_hosts: usize,
    pub open_ports: usize,
    pub live_services: usize,
    pub technologies_detected: usize,
    pub urls_discovered: usize,
    pub forms_discovered: usize,
    pub authenticated_urls: usize,
    pub path_parameters: usize,
    pub cloud_hosts: usize,
    pub cdn_services: usize,
    pub coverage_completeness: f64,
}

impl Statistics {
    pub fn compute(result: &RunResult) -> Self {
        let technologies: HashSet<String> = result.services.iter()
            .flat_map(|s| s.technologies.iter().map(|t| t.name.to_lowercase()))
            .collect();
        let cloud_hosts: BTreeSet<&String> = result.infrastructure.cloud_providers.values()
            .flatten()
            .collect();
        let cdn_services: BTreeSet<&String> = result.infrastructure.cdn_providers.values()
            .flatten()
            .collect();

        let mut stats = Statistics {
            total_subdomains: result.hosts.len(),
            resolved_hosts: result.hosts.iter().filter(|h| !h.ips.is_empty()).count(),
            live_hosts: result.hosts.iter().filter(|h| h.status == HostStatus::Live).count(),
            open_ports: result.hosts.iter().map(|h| h.open_ports_count()).sum(),
            live_services: result.services.len(),
            technologies_detected: technologies.len(),
            urls_discovered: result.urls.len(),
            forms_discovered: result.forms.len(),
            authenticated_urls: result.urls.iter().filter(|u| u.authenticated).count(),
            path_parameters: result.path_parameters.len(),
            cloud_hosts: cloud_hosts.len(),
            cdn_services: cdn_services.len(),
            coverage_completeness: 0.0,
        };

        let mut completeness: f64 = 0.0;
        if stats.total_subdomains > 0 {
            completeness += 0.3;
        }
        if stats.live_services > 0 {
            completeness += 0.3;
        }
        if stats.urls_discovered > 10 {
            completeness += 0.2;
        }
        if stats.technologies_detected > 0 {
            completeness += 0.2;
        }
        stats.coverage_completeness = completeness.min(1.0);

        stats
    }
}

/// Aggregate root of a discovery run. Owned and mutated only by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub metadata: RunMetadata,
    pub hosts: Vec<DiscoveredHost>,
    pub root_dns: Option<DnsRecords>,
    pub services: Vec<LiveService>,
    pub urls: Vec<DiscoveredUrl>,
    pub forms: Vec<FormRecord>,
    pub path_parameters: Vec<PathParameter>,
    pub infrastructure: Infrastructure,
    pub statistics: Statistics,
    pub timeline: Vec<TimelineEvent>,
}

impl RunResult {
    pub fn new(target: impl Into<String>, depth: Depth) -> Self {
        Self {
            metadata: RunMetadata {
                target: target.into(),
                run_id: uuid::Uuid::new_v4().to_string(),
                depth,
                start_time: Utc::now(),
                end_time: None,
                duration_seconds: None,
                status: Stage::Initialized,
                error: None,
            },
            hosts: Vec::new(),
            root_dns: None,
            services: Vec::new(),
            urls: Vec::new(),
            forms: Vec::new(),
            path_parameters: Vec::new(),
            infrastructure: Infrastructure::default(),
            statistics: Statistics::default(),
            timeline: Vec::new(),
        }
    }

    /// Append a timeline event
    pub fn record(
        &mut self,
        stage: Stage,
        message: impl Into<String>,
        details: BTreeMap<String, serde_json::Value>,
    ) {
        self.timeline.push(TimelineEvent {
            stage,
            timestamp: Utc::now(),
            message: message.into(),
            details,
        });
    }

    pub fn host(&self, name: &str) -> Option<&DiscoveredHost> {
        self.hosts.iter().find(|h| h.name == name)
    }

    /// Attach port results to their hosts. Ports for unknown hosts are dropped.
    pub fn merge_ports(&mut self, ports_by_host: BTreeMap<String, Vec<OpenPort>>) -> usize {
        let mut merged = 0;
        for (name, ports) in ports_by_host {
            match self.hosts.iter_mut().find(|h| h.name == name) {
                Some(host) => {
                    for port in ports {
                        if host.add_port(port) {
                            merged += 1;
                        }
                    }
                }
                None => debug!("Dropping ports for unknown host {}", name),
            }
        }
        merged
    }

    /// Attach live services and settle host liveness.
    ///
    /// A host with at least one service becomes live, every other host dead.
    pub fn merge_services(&mut self, services: Vec<LiveService>) -> usize {
        let mut merged = 0;
        for service in services {
            let Some(host) = self.hosts.iter_mut().find(|h| h.name == service.host) else {
                debug!("Dropping service {} for unknown host {}", service.url, service.host);
                continue;
            };
            host.status = HostStatus::Live;
            if self.services.iter().any(|s| s.url == service.url) {
                continue;
            }
            self.services.push(service);
            merged += 1;
        }
        for host in &mut self.hosts {
            if host.status != HostStatus::Live {
                host.status = HostStatus::Dead;
            }
        }
        merged
    }

    /// Merge URLs, deduplicated by normalized URL.
    ///
    /// Returns the number of URLs that were not already present.
    pub fn merge_urls(&mut self, urls: Vec<DiscoveredUrl>) -> usize {
        let mut index: HashMap<String, usize> = self.urls.iter()
            .enumerate()
            .map(|(i, u)| (u.url.clone(), i))
            .collect();
        let mut added = 0;

        for mut incoming in urls {
            incoming.url = normalized_key(&incoming.url);
            match index.get(&incoming.url) {
                Some(&i) => merge_url_record(&mut self.urls[i], incoming),
                None => {
                    index.insert(incoming.url.clone(), self.urls.len());
                    self.urls.push(incoming);
                    added += 1;
                }
            }
        }
        added
    }

    /// Merge forms, deduplicated by signature
    pub fn merge_forms(&mut self, forms: Vec<FormRecord>) -> usize {
        let mut seen: HashSet<String> = self.forms.iter().map(|f| f.signature()).collect();
        let mut added = 0;
        for form in forms {
            if seen.insert(form.signature()) {
                self.forms.push(form);
                added += 1;
            }
        }
        added
    }

    pub fn merge_path_parameters(&mut self, params: Vec<PathParameter>) {
        for param in params {
            match self.path_parameters.iter_mut()
                .find(|p| p.name == param.name && p.position == param.position)
            {
                Some(existing) => {
                    for value in param.example_values {
                        if !existing.example_values.contains(&value) {
                            existing.example_values.push(value);
                        }
                    }
                }
                None => self.path_parameters.push(param),
            }
        }
    }

    /// Re-derive statistics from the current collections
    pub fn update_statistics(&mut self) {
        self.statistics = Statistics::compute(self);
    }

    /// Stamp end time and duration, recompute statistics
    pub fn finalize(&mut self, status: Stage) {
        let end_time = Utc::now();
        let duration = (end_time - self.metadata.start_time).num_milliseconds() as f64 / 1000.0;
        self.metadata.end_time = Some(end_time);
        self.metadata.duration_seconds = Some(duration);
        self.metadata.advance(status);
        self.update_statistics();
    }
}

/// Merge rule for two records of the same normalized URL: the shallower
/// record wins; on equal depth a rendered-crawler record replaces a
/// fast-crawler one. Parameters are unioned either way.
fn merge_url_record(existing: &mut DiscoveredUrl, incoming: DiscoveredUrl) {
    let replace = incoming.depth < existing.depth
        || (incoming.depth == existing.depth
            && incoming.channel.is_rendered()
            && !existing.channel.is_rendered());

    let mut parameters = existing.parameters.clone();
    for (key, value) in &incoming.parameters {
        parameters.entry(key.clone()).or_insert_with(|| value.clone());
    }
    let authenticated = existing.authenticated || incoming.authenticated;
    let javascript = existing.javascript || incoming.javascript;
    let status_code = existing.status_code.or(incoming.status_code);

    if replace {
        *existing = incoming;
    }
    existing.parameters = parameters;
    existing.authenticated = authenticated;
    existing.javascript = javascript;
    existing.status_code = existing.status_code.or(status_code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::DiscoveryChannel;

    fn service(host: &str, url: &str) -> LiveService {
        LiveService {
            url: url.to_string(),
            host: host.to_string(),
            status_code: 200,
            title: None,
            server: None,
            content_length: None,
            technologies: Vec::new(),
            security_headers: None,
            tls: None,
            response_time_ms: None,
            redirects_to: None,
            discovered_at: Utc::now(),
        }
    }

    fn result_with_hosts(names: &[&str]) -> RunResult {
        let mut result = RunResult::new("example.com", Depth::Normal);
        for name in names {
            result.hosts.push(DiscoveredHost::new(*name, Stage::PassiveDiscovery));
        }
        result
    }

    #[test]
    fn test_status_is_monotonic() {
        let mut result = result_with_hosts(&[]);
        assert!(result.metadata.advance(Stage::PassiveDiscovery));
        assert!(result.metadata.advance(Stage::ActiveDiscovery));
        assert!(!result.metadata.advance(Stage::PortDiscovery));
        assert_eq!(result.metadata.status, Stage::ActiveDiscovery);
        assert!(result.metadata.advance(Stage::Failed));
        assert!(!result.metadata.advance(Stage::Completed));
        assert_eq!(result.metadata.status, Stage::Failed);
    }

    #[test]
    fn test_merge_ports_only_touches_known_hosts() {
        let mut result = result_with_hosts(&["a.example.com", "b.example.com"]);
        let mut ports = BTreeMap::new();
        ports.insert("a.example.com".to_string(), vec![OpenPort::tcp(80)]);
        ports.insert("ghost.example.com".to_string(), vec![OpenPort::tcp(22)]);

        assert_eq!(result.merge_ports(ports), 1);
        assert_eq!(result.host("a.example.com").unwrap().open_ports_count(), 1);
        assert_eq!(result.host("b.example.com").unwrap().open_ports_count(), 0);
    }

    #[test]
    fn test_merge_services_sets_liveness() {
        let mut result = result_with_hosts(&["a.example.com", "b.example.com"]);
        let merged = result.merge_services(vec![
            service("a.example.com", "https://a.example.com"),
            service("a.example.com", "https://a.example.com"),
            service("zzz.other.com", "https://zzz.other.com"),
        ]);

        assert_eq!(merged, 1);
        assert_eq!(result.host("a.example.com").unwrap().status, HostStatus::Live);
        assert_eq!(result.host("b.example.com").unwrap().status, HostStatus::Dead);
    }

    #[test]
    fn test_merge_urls_prefers_lower_depth_then_rendered() {
        let mut result = result_with_hosts(&[]);

        let mut fast = DiscoveredUrl::new("https://site.test/a#top", DiscoveryChannel::FastCrawl, 2);
        fast.parameters.insert("q".to_string(), String::new());
        fast.status_code = Some(200);
        assert_eq!(result.merge_urls(vec![fast]), 1);

        let browser = DiscoveredUrl::new("https://site.test/a", DiscoveryChannel::BrowserCrawl, 2);
        assert_eq!(result.merge_urls(vec![browser]), 0);
        assert_eq!(result.urls.len(), 1);
        assert_eq!(result.urls[0].channel, DiscoveryChannel::BrowserCrawl);
        assert_eq!(result.urls[0].status_code, Some(200));
        assert!(result.urls[0].parameters.contains_key("q"));

        let deeper_fast = DiscoveredUrl::new("https://site.test/a", DiscoveryChannel::FastCrawl, 5);
        result.merge_urls(vec![deeper_fast]);
        assert_eq!(result.urls[0].channel, DiscoveryChannel::BrowserCrawl);

        let shallow_fast = DiscoveredUrl::new("https://site.test/a", DiscoveryChannel::FastCrawl, 1);
        result.merge_urls(vec![shallow_fast]);
        assert_eq!(result.urls[0].depth, 1);
        assert_eq!(result.urls[0].channel, DiscoveryChannel::FastCrawl);
    }

    #[test]
    fn test_statistics_are_derived_from_collections() {
        let mut result = result_with_hosts(&["a.example.com", "b.example.com"]);
        result.hosts[0].ips.push("1.2.3.4".to_string());
        result.hosts[0].add_port(OpenPort::tcp(443));
        result.merge_services(vec![service("a.example.com", "https://a.example.com")]);
        result.finalize(Stage::Completed);

        let stats = &result.statistics;
        assert_eq!(stats.total_subdomains, 2);
        assert_eq!(stats.resolved_hosts, 1);
        assert_eq!(stats.live_hosts, 1);
        assert_eq!(stats.open_ports, 1);
        assert_eq!(stats.live_services, 1);
        assert!((stats.coverage_completeness - 0.6).abs() < f64::EPSILON);
        assert_eq!(result.metadata.status, Stage::Completed);
        assert!(result.metadata.duration_seconds.is_some());
    }
}
