//! Target URL validation shared by the fetch and browser tools

use crate::error::{Error, Result};
use reqwest::Url;

/// Validate a user-supplied target.
///
/// Surrounding whitespace is trimmed and `https://` is assumed when no scheme
/// is given. Only `http`/`https` URLs with a host are accepted.
pub fn normalize_url(raw: &str) -> Result<String> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(Error::InvalidUrl("url is required".to_string()));
    }

    let value = if value.contains("://") {
        value.to_string()
    } else {
        format!("https://{}", value)
    };

    let parsed = Url::parse(&value)
        .map_err(|e| Error::InvalidUrl(format!("{}: {}", value, e)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::InvalidUrl(format!(
            "only http/https urls are supported: {}",
            value
        )));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(Error::InvalidUrl(format!("url host is required: {}", value)));
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_is_prepended() {
        assert_eq!(normalize_url("  example.com ").unwrap(), "https://example.com");
        assert_eq!(
            normalize_url("example.com/path?q=1").unwrap(),
            "https://example.com/path?q=1"
        );
    }

    #[test]
    fn test_http_and_https_are_accepted() {
        assert_eq!(normalize_url("http://localhost:8080/x").unwrap(), "http://localhost:8080/x");
        assert!(normalize_url("HTTPS://Example.com").is_ok());
    }

    #[test]
    fn test_rejected_targets() {
        for raw in ["", "   ", "ftp://example.com", "file:///etc/passwd", "https://", "javascript://alert(1)"] {
            assert!(
                matches!(normalize_url(raw), Err(Error::InvalidUrl(_))),
                "{:?} should be rejected",
                raw
            );
        }
    }
}
