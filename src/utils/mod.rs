pub mod domain;
pub mod normalize;

pub use domain::{extract_domain, is_subdomain, is_valid_domain, sanitize_filename};
pub use normalize::{normalize_url, normalized_key, same_origin};
