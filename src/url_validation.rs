use url::Url;

use crate::error::{Result, StudioError};

/// Result URLs come back from the remote service; only http(s) is fetched.
pub fn validate_http_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(StudioError::generation("result url is empty"));
    }
    let parsed = Url::parse(trimmed)
        .map_err(|err| StudioError::generation(format!("invalid result url {trimmed}: {err}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(StudioError::generation(format!(
            "unsupported result url scheme: {scheme}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_http_and_https() {
        assert!(validate_http_url("https://replicate.delivery/a/out-0.png").is_ok());
        assert!(validate_http_url(" http://127.0.0.1:9000/x.webp ").is_ok());
    }

    #[test]
    fn rejects_other_schemes_and_garbage() {
        assert!(validate_http_url("").is_err());
        assert!(validate_http_url("file:///etc/passwd").is_err());
        assert!(validate_http_url("not a url").is_err());
    }
}
