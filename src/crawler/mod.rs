// src/crawler/mod.rs
mod crawl;
mod extract;
mod loader;

pub use crawl::{CrawlLimits, CrawlOutcome, DepthBoundedCrawler};
pub use extract::{extract_links, PageLinks};
pub use loader::{BrowserLoader, HttpLoader, LoadedPage, PageLoader};
