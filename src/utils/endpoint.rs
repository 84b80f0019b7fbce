// SPDX-License-Identifier: GPL-3.0-only
use anyhow::{Context, Result};
use url::Url;

/// Maximum allowed base URL length
const MAX_URL_LENGTH: usize = 2048;

/// Validate the remote state service base URL
///
/// Checks:
/// - Only allows http/https schemes
/// - Requires a host
/// - Rejects query strings and fragments (paths are appended to the base)
/// - Validates URL length
pub fn validate_base_url(url_str: &str) -> Result<Url> {
    if url_str.len() > MAX_URL_LENGTH {
        return Err(anyhow::anyhow!("URL exceeds maximum length of {} characters", MAX_URL_LENGTH));
    }

    let url = Url::parse(url_str)
        .context("Invalid URL format")?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(anyhow::anyhow!(
                "Invalid URL scheme: {} (only http and https are allowed)",
                scheme
            ));
        }
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(anyhow::anyhow!("URL must have a host"));
    }

    if url.query().is_some() || url.fragment().is_some() {
        return Err(anyhow::anyhow!("Base URL must not carry a query or fragment"));
    }

    Ok(url)
}

/// Append percent-encoded path segments to a base URL
///
/// A trailing slash on the base is ignored, so `http://host/api` and
/// `http://host/api/` produce the same endpoint.
pub fn endpoint_url(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("URL cannot be a base: {}", base))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
