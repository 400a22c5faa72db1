//! Input validation performed before anything touches the database

use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::error::{Error, Result};

/// SQL identifier shape accepted by the RLS facade and sort columns
static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"));

/// Email template key shape: dot-namespaced lowercase identifier
static TEMPLATE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_.]*$").expect("template key regex"));

/// Valid API-key / OAuth scopes
pub const SCOPES: &[&str] = &["*", "readonly", "readwrite"];

/// Check a SQL identifier (table, column, policy, schema, role name)
pub fn identifier(name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(Error::bad_request(format!("invalid identifier: {name:?}")))
    }
}

/// Quote an already-validated identifier for interpolation into DDL
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name)
}

/// Check an email template key
pub fn template_key(key: &str) -> Result<()> {
    if TEMPLATE_KEY.is_match(key) {
        Ok(())
    } else {
        Err(Error::bad_request(format!("invalid template key: {key:?}")))
    }
}

/// Check a scope value
pub fn scope(value: &str) -> Result<()> {
    if SCOPES.contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidScope)
    }
}

/// Parse a UUID URL parameter, mapping syntax errors to 400
pub fn uuid_param(raw: &str) -> Result<Uuid> {
    raw.parse()
        .map_err(|_| Error::bad_request(format!("invalid uuid: {raw:?}")))
}

/// Validate an email address as a bare addr-spec.
///
/// Rules: exactly one `@`, no whitespace or CRLF, the domain contains a
/// dot, and neither part has leading/trailing/consecutive dots.
pub fn email(address: &str) -> Result<()> {
    let err = || Error::bad_request(format!("invalid email address: {address:?}"));

    if address.is_empty()
        || address.len() > 254
        || address.chars().any(|c| c.is_whitespace() || c == '\r' || c == '\n')
    {
        return Err(err());
    }
    let (local, domain) = address.split_once('@').ok_or_else(err)?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(err());
    }
    if !domain.contains('.') {
        return Err(err());
    }
    for part in [local, domain] {
        if part.starts_with('.') || part.ends_with('.') || part.contains("..") {
            return Err(err());
        }
    }
    Ok(())
}

/// Validate an OAuth redirect URI.
///
/// HTTPS is required except for localhost / 127.0.0.1, and fragments are
/// forbidden per RFC 6749 §3.1.2.
pub fn redirect_uri(uri: &str) -> Result<()> {
    let err = |msg: &str| Error::bad_request(format!("invalid redirect uri {uri:?}: {msg}"));

    if uri.contains('#') {
        return Err(err("fragment not allowed"));
    }
    if let Some(rest) = uri.strip_prefix("https://") {
        if rest.is_empty() {
            return Err(err("missing host"));
        }
        return Ok(());
    }
    if let Some(rest) = uri.strip_prefix("http://") {
        let host_port = rest.split(['/', '?']).next().unwrap_or("");
        let host = host_port.split(':').next().unwrap_or("");
        if host == "localhost" || host == "127.0.0.1" {
            return Ok(());
        }
        return Err(err("http only allowed for localhost"));
    }
    Err(err("scheme must be https"))
}

/// Normalise a phone number to E.164: `+` followed by 8–15 digits.
///
/// Accepts common punctuation (spaces, dashes, dots, parentheses) and
/// strips it; anything else is rejected.
pub fn e164(raw: &str) -> Result<String> {
    let err = || Error::bad_request(format!("invalid phone number: {raw:?}"));

    let trimmed = raw.trim();
    let rest = trimmed.strip_prefix('+').ok_or_else(err)?;
    let digits: String = rest
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(err());
    }
    if !(8..=15).contains(&digits.len()) {
        return Err(err());
    }
    Ok(format!("+{digits}"))
}

/// Check an E.164 number against a country-code allowlist; empty allows all
pub fn country_allowed(e164: &str, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let digits = e164.trim_start_matches('+');
    allowed.iter().any(|code| digits.starts_with(code.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_accepts_ascii() {
        for ok in ["users", "_internal", "Table_2", "a"] {
            assert!(identifier(ok).is_ok(), "{ok}");
        }
    }

    #[test]
    fn identifier_rejects_injection_candidates() {
        for bad in [
            "",
            "users; DROP TABLE users",
            "users--",
            "us ers",
            "\"users\"",
            "users'",
            "users/*",
            "usérs",
            "таблица",
            "1users",
        ] {
            assert!(identifier(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn email_accepts_plain_addresses() {
        for ok in ["a@b.co", "charlie@example.com", "x.y+z@sub.example.org"] {
            assert!(email(ok).is_ok(), "{ok}");
        }
    }

    #[test]
    fn email_rejects_malformed() {
        for bad in [
            "",
            "no-at-sign",
            "a@b",
            "a b@example.com",
            "a@exa mple.com",
            "a@@example.com",
            ".a@example.com",
            "a.@example.com",
            "a..b@example.com",
            "a@example..com",
            "a@example.com\r\nBcc: x@y.com",
        ] {
            assert!(email(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn redirect_uri_rules() {
        assert!(redirect_uri("https://app.example.com/cb").is_ok());
        assert!(redirect_uri("http://localhost/cb").is_ok());
        assert!(redirect_uri("http://localhost:3000/cb").is_ok());
        assert!(redirect_uri("http://127.0.0.1:8080/cb").is_ok());
        assert!(redirect_uri("http://app.example.com/cb").is_err());
        assert!(redirect_uri("https://app.example.com/cb#frag").is_err());
        assert!(redirect_uri("ftp://example.com").is_err());
        assert!(redirect_uri("https://").is_err());
    }

    #[test]
    fn scope_set() {
        assert!(scope("*").is_ok());
        assert!(scope("readonly").is_ok());
        assert!(scope("readwrite").is_ok());
        assert!(matches!(scope("admin"), Err(Error::InvalidScope)));
        assert!(matches!(scope(""), Err(Error::InvalidScope)));
    }

    #[test]
    fn e164_normalisation() {
        assert_eq!(e164("+14155552671").unwrap(), "+14155552671");
        assert_eq!(e164("+1 (415) 555-2671").unwrap(), "+14155552671");
        assert_eq!(e164(" +44 20 7946 0958 ").unwrap(), "+442079460958");
        assert!(e164("14155552671").is_err());
        assert!(e164("+1-800-FLOWERS").is_err());
        assert!(e164("+123").is_err());
        assert!(e164("+12345678901234567").is_err());
    }

    #[test]
    fn country_allowlist() {
        let allowed = vec!["1".to_string(), "44".to_string()];
        assert!(country_allowed("+14155552671", &allowed));
        assert!(country_allowed("+442079460958", &allowed));
        assert!(!country_allowed("+81312345678", &allowed));
        assert!(country_allowed("+81312345678", &[]));
    }

    #[test]
    fn template_keys() {
        assert!(template_key("auth.magic_link").is_ok());
        assert!(template_key("welcome").is_ok());
        assert!(template_key("Auth.Welcome").is_err());
        assert!(template_key("1welcome").is_err());
        assert!(template_key("").is_err());
    }

    #[test]
    fn uuid_param_syntax() {
        assert!(uuid_param("8d8ac610-566d-4ef0-9c22-186b2a5ed793").is_ok());
        assert!(uuid_param("not-a-uuid").is_err());
        assert!(uuid_param("8d8ac610566d4ef09c22186b2a5ed793").is_ok());
    }
}
