// src/crawler/extract.rs
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::core::{FormField, FormRecord};
use crate::utils::{normalize_url, same_origin};

static LINK_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("a[href], area[href], iframe[src], frame[src]").unwrap()
});
static META_REFRESH_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("meta[http-equiv][content]").unwrap());
static FORM_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("form").unwrap());
static FIELD_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("input[name], textarea[name], select[name]").unwrap());
static HANDLER_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("[onclick], [onsubmit], [onmousedown]").unwrap()
});

static REFRESH_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?i)url\s*=\s*['"]?([^'";\s]+)"#).unwrap());
static HANDLER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"https?://[^\s'"<>)]+"#,
        r#"location(?:\.href)?\s*=\s*['"]([^'"]+)['"]"#,
        r#"window\.open\(\s*['"]([^'"]+)['"]"#,
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

const HANDLER_ATTRIBUTES: [&str; 3] = ["onclick", "onsubmit", "onmousedown"];

/// Links and forms found on one page, already absolute and fragment-free
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLinks {
    pub links: Vec<Url>,
    pub forms: Vec<FormRecord>,
}

impl PageLinks {
    fn push_link(&mut self, url: Url) {
        if !self.links.contains(&url) {
            self.links.push(url);
        }
    }
}

/// Extract anchors, frames, meta refreshes, forms and inline-handler targets.
///
/// Handler targets are a heuristic and are kept only when same-origin.
pub fn extract_links(page_url: &Url, html: &str) -> PageLinks {
    let document = Html::parse_document(html);
    let mut out = PageLinks::default();

    for element in document.select(&LINK_SELECTOR) {
        let attr = element.value().attr("href").or_else(|| element.value().attr("src"));
        if let Some(url) = attr.and_then(|raw| normalize_url(page_url, raw)) {
            out.push_link(url);
        }
    }

    for element in document.select(&META_REFRESH_SELECTOR) {
        let is_refresh = element.value().attr("http-equiv")
            .map(|v| v.eq_ignore_ascii_case("refresh"))
            .unwrap_or(false);
        let target = element.value().attr("content")
            .and_then(|content| REFRESH_URL.captures(content))
            .and_then(|caps| normalize_url(page_url, &caps[1]));
        if let (true, Some(url)) = (is_refresh, target) {
            out.push_link(url);
        }
    }

    for element in document.select(&FORM_SELECTOR) {
        out.forms.push(extract_form(page_url, element));
    }

    for element in document.select(&HANDLER_SELECTOR) {
        for attr in HANDLER_ATTRIBUTES {
            let Some(script) = element.value().attr(attr) else { continue };
            for url in handler_targets(page_url, script) {
                out.push_link(url);
            }
        }
    }

    out
}

fn extract_form(page_url: &Url, form: ElementRef<'_>) -> FormRecord {
    let action = form.value().attr("action")
        .filter(|a| !a.trim().is_empty())
        .and_then(|a| normalize_url(page_url, a))
        .unwrap_or_else(|| {
            let mut url = page_url.clone();
            url.set_fragment(None);
            url
        });
    let method = form.value().attr("method")
        .map(|m| m.trim().to_uppercase())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "GET".to_string());

    let fields = form.select(&FIELD_SELECTOR)
        .filter_map(|field| {
            let element = field.value();
            let name = element.attr("name")?.trim();
            if name.is_empty() {
                return None;
            }
            let field_type = match element.name() {
                "input" => element.attr("type").unwrap_or("text").to_lowercase(),
                other => other.to_string(),
            };
            Some(FormField {
                name: name.to_string(),
                field_type,
                required: element.attr("required").is_some(),
            })
        })
        .collect();

    FormRecord {
        action: action.to_string(),
        method,
        fields,
        source_page: Some(page_url.to_string()),
        authenticated: false,
    }
}

fn handler_targets(page_url: &Url, script: &str) -> Vec<Url> {
    HANDLER_PATTERNS.iter()
        .flat_map(|pattern| pattern.captures_iter(script).collect::<Vec<_>>())
        .filter_map(|caps| {
            let raw = caps.get(1).or_else(|| caps.get(0))?.as_str();
            normalize_url(page_url, raw)
        })
        .filter(|url| same_origin(page_url, url))
        .collect()
}
