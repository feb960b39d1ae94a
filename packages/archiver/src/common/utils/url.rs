//! URL helpers shared by job submission and the worker.

use thiserror::Error;
use url::Url;

/// Rejection reasons for a URL submitted for archiving.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlValidationError {
    #[error("invalid URL: {0}")]
    Malformed(String),

    #[error("only HTTP and HTTPS URLs are allowed, got {0}")]
    UnsupportedScheme(String),

    #[error("URL has no host")]
    NoHost,
}

/// Parse and validate a URL before any job work begins.
pub fn validate_archive_url(input: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(input.trim()).map_err(|e| UrlValidationError::Malformed(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(UrlValidationError::UnsupportedScheme(other.to_string())),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlValidationError::NoHost);
    }

    Ok(url)
}

/// Normalize a URL or bare host to the domain key used for Website records.
///
/// Lowercases the host and strips a leading `www.`. Input without a scheme is
/// treated as https.
pub fn normalize_domain(input: &str) -> String {
    let trimmed = input.trim();

    match Url::parse(&with_scheme(trimmed)) {
        Ok(url) if url.host_str().is_some() => {
            let host = url.host_str().unwrap_or_default().to_lowercase();
            host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
        }
        _ => {
            let without_scheme = trimmed
                .trim_start_matches("https://")
                .trim_start_matches("http://");
            let without_www = without_scheme.strip_prefix("www.").unwrap_or(without_scheme);
            without_www
                .split('/')
                .next()
                .unwrap_or_default()
                .to_lowercase()
        }
    }
}

/// Path component of an archived URL, `/` when the URL has none.
pub fn extract_path(input: &str) -> String {
    let trimmed = input.trim();

    match Url::parse(&with_scheme(trimmed)) {
        Ok(url) => {
            let path = url.path();
            if path.is_empty() {
                "/".to_string()
            } else {
                path.to_string()
            }
        }
        Err(_) => trimmed
            .find('/')
            .map(|idx| trimmed[idx..].to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "/".to_string()),
    }
}

fn with_scheme(input: &str) -> String {
    if input.contains("://") {
        input.to_string()
    } else {
        format!("https://{}", input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_domain_strips_www_and_case() {
        assert_eq!(normalize_domain("https://WWW.Example.com/about"), "example.com");
        assert_eq!(normalize_domain("example.com"), "example.com");
        assert_eq!(normalize_domain("  http://blog.example.com  "), "blog.example.com");
    }

    #[test]
    fn test_normalize_domain_same_for_different_paths() {
        assert_eq!(
            normalize_domain("https://example.com/a"),
            normalize_domain("https://www.example.com/b?q=1")
        );
    }

    #[test]
    fn test_extract_path() {
        assert_eq!(extract_path("https://example.com"), "/");
        assert_eq!(extract_path("https://example.com/"), "/");
        assert_eq!(extract_path("https://example.com/docs/intro?x=1"), "/docs/intro");
        assert_eq!(extract_path("example.com/pricing"), "/pricing");
    }

    #[test]
    fn test_validate_archive_url() {
        assert!(validate_archive_url("https://example.com/page").is_ok());
        assert_eq!(
            validate_archive_url("ftp://example.com/file"),
            Err(UrlValidationError::UnsupportedScheme("ftp".to_string()))
        );
        assert!(matches!(
            validate_archive_url("not a url"),
            Err(UrlValidationError::Malformed(_))
        ));
    }
}
