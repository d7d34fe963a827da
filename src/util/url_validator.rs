use thiserror::Error;
use url::Url;

/// Errors that can occur while validating a source base URL.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
    /// The URL carries a query or fragment; paths and query parameters are
    /// configured separately.
    #[error("Base URL must not contain a query or fragment")]
    UnexpectedQuery,
}

/// Validates a configured base URL for a remote source.
///
/// Rejects non-HTTP(S) schemes (e.g. `file://`), URLs without a host, and
/// base URLs that already carry a query string or fragment.
///
/// # Examples
///
/// ```
/// use tidemark::util::validate_base_url;
///
/// let url = validate_base_url("https://api.spacexdata.com/v3").unwrap();
/// assert_eq!(url.host_str(), Some("api.spacexdata.com"));
///
/// assert!(validate_base_url("file:///etc/passwd").is_err());
/// assert!(validate_base_url("https://xkcd.com/?page=2").is_err());
/// ```
pub fn validate_base_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str)?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(UrlValidationError::MissingHost);
    }

    if url.query().is_some() || url.fragment().is_some() {
        return Err(UrlValidationError::UnexpectedQuery);
    }

    Ok(url)
}

/// Join a base URL and a path without doubling or dropping the slash.
///
/// `Url::join` would discard the last base path segment (`/v3`), so the two
/// parts are concatenated as strings instead.
pub fn join_path(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.is_empty() {
        return base.to_string();
    }
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_http_and_https() {
        assert!(validate_base_url("https://xkcd.com").is_ok());
        assert!(validate_base_url("http://127.0.0.1:8080/api").is_ok());
    }

    #[test]
    fn test_rejects_other_schemes() {
        assert!(matches!(
            validate_base_url("ftp://example.com"),
            Err(UrlValidationError::UnsupportedScheme(s)) if s == "ftp"
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            validate_base_url("not a url"),
            Err(UrlValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_rejects_query_and_fragment() {
        assert!(matches!(
            validate_base_url("https://example.com/api?x=1"),
            Err(UrlValidationError::UnexpectedQuery)
        ));
        assert!(matches!(
            validate_base_url("https://example.com/api#top"),
            Err(UrlValidationError::UnexpectedQuery)
        ));
    }

    #[test]
    fn test_join_path_keeps_base_segments() {
        assert_eq!(
            join_path("https://api.spacexdata.com/v3", "/launches"),
            "https://api.spacexdata.com/v3/launches"
        );
        assert_eq!(
            join_path("https://api.spacexdata.com/v3/", "launches/latest"),
            "https://api.spacexdata.com/v3/launches/latest"
        );
        assert_eq!(join_path("https://xkcd.com", ""), "https://xkcd.com");
    }
}
