// src/stages/enrichment.rs
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::str::FromStr;
use async_trait::async_trait;
use ipnetwork::IpNetwork;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use super::StageModule;
use crate::core::{DiscoveredHost, Infrastructure, LiveService, Stage};
use crate::error::DiscoveryResult;

/// Published address blocks of the major providers
static CLOUD_RANGES: Lazy<Vec<(&'static str, IpNetwork)>> = Lazy::new(|| {
    let table: &[(&str, &[&str])] = &[
        ("aws", &["3.0.0.0/8", "13.0.0.0/8", "18.0.0.0/8", "52.0.0.0/8", "54.0.0.0/8"]),
        ("gcp", &["34.64.0.0/10", "35.184.0.0/13"]),
        ("azure", &["13.64.0.0/11", "20.0.0.0/8", "40.64.0.0/10"]),
        ("cloudflare", &["104.16.0.0/12", "172.64.0.0/13", "173.245.48.0/20"]),
        ("digitalocean", &["104.131.0.0/16", "159.65.0.0/16", "167.99.0.0/16"]),
    ];
    table.iter()
        .flat_map(|(provider, ranges)| {
            ranges.iter().map(move |r| (*provider, IpNetwork::from_str(r).unwrap()))
        })
        .collect()
});

static CDN_SIGNATURES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("cloudflare", r"(?i)cloudflare|cf-ray|__cfduid"),
        ("akamai", r"(?i)akamai(hd)?"),
        ("fastly", r"(?i)fastly|x-fastly"),
        ("cloudfront", r"(?i)cloudfront|x-amz-cf"),
        ("maxcdn", r"(?i)maxcdn"),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).unwrap()))
    .collect()
});

/// Provider owning a public address. Overlapping blocks resolve to the
/// most specific one.
pub fn classify_ip(raw: &str) -> Option<&'static str> {
    let ip = IpAddr::from_str(raw.trim()).ok()?;
    let public = match ip {
        IpAddr::V4(v4) => !(v4.is_private() || v4.is_loopback() || v4.is_link_local()),
        IpAddr::V6(v6) => !v6.is_loopback(),
    };
    if !public {
        return None;
    }

    CLOUD_RANGES.iter()
        .filter(|(_, network)| network.contains(ip))
        .max_by_key(|(_, network)| network.prefix())
        .map(|(provider, _)| *provider)
}

/// First CDN whose signature matches any of the given strings
pub fn detect_cdn<'a>(evidence: impl IntoIterator<Item = &'a str>) -> Option<&'static str> {
    let evidence: Vec<&str> = evidence.into_iter().collect();
    CDN_SIGNATURES.iter()
        .find(|(_, re)| evidence.iter().any(|e| re.is_match(e)))
        .map(|(name, _)| *name)
}

#[derive(Debug, Clone, Default)]
pub struct EnrichmentInput {
    pub hosts: Vec<DiscoveredHost>,
    pub services: Vec<LiveService>,
}

#[derive(Debug, Clone, Default)]
pub struct EnrichmentOutput {
    pub infrastructure: Infrastructure,
    /// Host name -> cloud provider
    pub host_cloud: BTreeMap<String, String>,
    /// Host name -> CDN
    pub host_cdn: BTreeMap<String, String>,
}

/// Offline classification, no external tool involved
#[derive(Debug, Default)]
pub struct EnrichmentStage;

#[async_trait]
impl StageModule for EnrichmentStage {
    type Input = EnrichmentInput;
    type Output = EnrichmentOutput;

    fn stage(&self) -> Stage {
        Stage::Enrichment
    }

    async fn run(&self, input: &EnrichmentInput) -> DiscoveryResult<EnrichmentOutput> {
        info!("Classifying infrastructure for {} hosts", input.hosts.len());
        let mut output = EnrichmentOutput::default();
        let infra = &mut output.infrastructure;

        for host in &input.hosts {
            if let Some(provider) = host.ips.iter().find_map(|ip| classify_ip(ip)) {
                debug!("{} hosted on {}", host.name, provider);
                infra.cloud_providers.entry(provider.to_string())
                    .or_default()
                    .insert(host.name.clone());
                output.host_cloud.insert(host.name.clone(), provider.to_string());
            }
        }

        for service in &input.services {
            let cname = input.hosts.iter()
                .find(|h| h.name == service.host)
                .and_then(|h| h.dns_records.as_ref())
                .and_then(|d| d.cname.as_deref());
            let evidence = service.server.as_deref().into_iter()
                .chain(service.technologies.iter().map(|t| t.name.as_str()))
                .chain(cname);

            if let Some(cdn) = detect_cdn(evidence) {
                debug!("{} served through {}", service.url, cdn);
                infra.cdn_providers.entry(cdn.to_string())
                    .or_default()
                    .insert(service.url.clone());
                output.host_cdn.entry(service.host.clone()).or_insert_with(|| cdn.to_string());
            }
        }

        let summary = &mut infra.summary;
        summary.insert("total_cloud_hosts".to_string(), output.host_cloud.len());
        summary.insert(
            "total_cdn_services".to_string(),
            infra.cdn_providers.values().map(|s| s.len()).sum(),
        );
        summary.insert("cloud_providers_count".to_string(), infra.cloud_providers.len());
        summary.insert("cdn_providers_count".to_string(), infra.cdn_providers.len());

        info!(
            "Enrichment complete: {} cloud hosts, {} CDN services",
            summary["total_cloud_hosts"],
            summary["total_cdn_services"]
        );
        Ok(output)
    }
}
