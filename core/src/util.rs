//! Small helpers shared by the HTTP-facing parts of the crate

use anyhow::{bail, Context, Result};

/// Check that an API key can be sent in a header (as a bearer token or
/// a `key=` query parameter).
pub fn validate_api_key(api_key: &str) -> Result<String> {
    let trimmed = api_key.trim();

    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
        bail!("API key is empty or set to 'none'");
    }

    if let Some((index, ch)) = trimmed
        .char_indices()
        .find(|(_, ch)| ch.is_control() || *ch == '\u{7f}')
    {
        bail!(
            "API key contains a control character at position {} ({:?})",
            index,
            ch
        );
    }

    format!("Bearer {}", trimmed)
        .parse::<reqwest::header::HeaderValue>()
        .with_context(|| {
            format!(
                "API key results in an invalid Authorization header ({} characters)",
                trimmed.len()
            )
        })?;

    Ok(trimmed.to_string())
}

/// Validate a provider base URL and strip trailing slashes.
pub fn sanitize_base_url(url: &str, field_name: &str) -> Result<String> {
    let trimmed = url.trim();

    if trimmed.is_empty() {
        bail!("{} cannot be empty", field_name);
    }

    // Encoded separators mean the value was encoded twice somewhere upstream.
    if trimmed.contains("%2F") || trimmed.contains("%3D") || trimmed.contains("%20") {
        bail!(
            "{} appears to contain URL-encoded characters (e.g. %2F, %3D, %20)",
            field_name
        );
    }

    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        bail!(
            "{} must start with 'http://' or 'https://'. Got: {}",
            field_name,
            trimmed
        );
    }

    Ok(trimmed.trim_end_matches('/').to_string())
}

/// Host part of a URL, used as the rate limiter key.
pub fn host_of(url: &str) -> &str {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    rest.split(['/', '?', '#']).next().unwrap_or(rest)
}

/// Char-boundary safe preview of a string for log lines.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_api_key() {
        assert!(validate_api_key("sk-test123").is_ok());
        assert_eq!(validate_api_key("  AIza-key  ").unwrap(), "AIza-key");
        assert!(validate_api_key("").is_err());
        assert!(validate_api_key("none").is_err());
        assert!(validate_api_key("NONE").is_err());
        assert!(validate_api_key("abc\u{1}def").is_err());
    }

    #[test]
    fn test_sanitize_base_url() {
        assert_eq!(
            sanitize_base_url("https://generativelanguage.googleapis.com/", "url").unwrap(),
            "https://generativelanguage.googleapis.com"
        );
        assert!(sanitize_base_url("http://localhost:11434/v1", "url").is_ok());
        assert!(sanitize_base_url("", "url").is_err());
        assert!(sanitize_base_url("invalid-url", "url").is_err());
        assert!(sanitize_base_url("https://api.example%2Fcom", "url").is_err());
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://html.duckduckgo.com/html/?q=x"), "html.duckduckgo.com");
        assert_eq!(host_of("http://localhost:8080"), "localhost:8080");
        assert_eq!(host_of("example.com/path"), "example.com");
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        assert_eq!(preview("hello", 10), "hello");
        assert_eq!(preview("héllo wörld", 4), "héll...");
    }
}
