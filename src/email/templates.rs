//! Email template store: built-in system keys with per-key overrides
//!
//! Rendering uses minijinja with strict undefined behavior (a missing
//! variable is a 400, not an empty string) and HTML auto-escaping on the
//! body template.

use chrono::{DateTime, Utc};
use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use sqlx::PgPool;

use crate::error::{Error, Result};
use crate::validate;

/// Subject template size cap
pub const MAX_SUBJECT_LEN: usize = 1000;

/// HTML template size cap
pub const MAX_HTML_LEN: usize = 256 * 1024;

/// Built-in fallbacks for system keys
const BUILTINS: &[(&str, &str, &str)] = &[
    (
        "auth.magic_link",
        "Sign in to {{ app_name }}",
        "<p>Hello,</p><p>Click <a href=\"{{ link }}\">here</a> to sign in to {{ app_name }}. \
         This link expires in 15 minutes.</p>",
    ),
    (
        "auth.welcome",
        "Welcome to {{ app_name }}",
        "<p>Welcome, {{ email }}!</p><p>Your account is ready.</p>",
    ),
    (
        "auth.password_reset",
        "Reset your {{ app_name }} password",
        "<p>Hello,</p><p>Click <a href=\"{{ link }}\">here</a> to reset your password.</p>",
    ),
];

/// Where the effective template came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateSource {
    Builtin,
    Custom,
}

/// A template as listed/returned by the admin API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailTemplate {
    pub key: String,
    pub subject: String,
    pub html: String,
    pub enabled: bool,
    pub source: TemplateSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A rendered message
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[derive(sqlx::FromRow)]
struct OverrideRow {
    key: String,
    subject: String,
    html: String,
    enabled: bool,
    updated_at: DateTime<Utc>,
}

/// Render a subject/html pair with variables.
///
/// The subject is treated as plain text; the HTML body auto-escapes
/// interpolated values. Parse errors and missing variables are 400s.
pub fn render(subject: &str, html: &str, vars: &serde_json::Value) -> Result<RenderedEmail> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.add_template("subject.txt", subject)
        .map_err(|e| Error::bad_request(format!("invalid subject template: {e}")))?;
    env.add_template("body.html", html)
        .map_err(|e| Error::bad_request(format!("invalid html template: {e}")))?;

    let subject = env
        .get_template("subject.txt")
        .expect("registered template")
        .render(vars)
        .map_err(|e| Error::bad_request(format!("subject render failed: {e}")))?;
    let html = env
        .get_template("body.html")
        .expect("registered template")
        .render(vars)
        .map_err(|e| Error::bad_request(format!("html render failed: {e}")))?;
    let text = strip_tags(&html);

    Ok(RenderedEmail {
        subject,
        html,
        text,
    })
}

/// Plain-text fallback: drop tags, unescape the entities we emit
fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                if !out.ends_with(char::is_whitespace) && !out.is_empty() {
                    out.push(' ');
                }
            }
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .trim()
        .to_string()
}

/// Template storage: custom rows over the builtin set
#[derive(Clone)]
pub struct TemplateStore {
    pool: PgPool,
}

impl TemplateStore {
    /// Create the store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn builtin(key: &str) -> Option<EmailTemplate> {
        BUILTINS
            .iter()
            .find(|(k, _, _)| *k == key)
            .map(|(key, subject, html)| EmailTemplate {
                key: key.to_string(),
                subject: subject.to_string(),
                html: html.to_string(),
                enabled: true,
                source: TemplateSource::Builtin,
                updated_at: None,
            })
    }

    async fn fetch_override(&self, key: &str) -> Result<Option<OverrideRow>> {
        Ok(sqlx::query_as(
            "SELECT key, subject, html, enabled, updated_at FROM _ayb_email_templates WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Merge builtins with overrides; customs shadow builtins of the
    /// same key and unknown custom keys are listed too.
    pub async fn list(&self) -> Result<Vec<EmailTemplate>> {
        let overrides: Vec<OverrideRow> = sqlx::query_as(
            "SELECT key, subject, html, enabled, updated_at FROM _ayb_email_templates ORDER BY key",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut items: Vec<EmailTemplate> = overrides
            .into_iter()
            .map(|row| EmailTemplate {
                key: row.key,
                subject: row.subject,
                html: row.html,
                enabled: row.enabled,
                source: TemplateSource::Custom,
                updated_at: Some(row.updated_at),
            })
            .collect();

        for (key, subject, html) in BUILTINS {
            if !items.iter().any(|t| t.key == *key) {
                items.push(EmailTemplate {
                    key: key.to_string(),
                    subject: subject.to_string(),
                    html: html.to_string(),
                    enabled: true,
                    source: TemplateSource::Builtin,
                    updated_at: None,
                });
            }
        }
        items.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(items)
    }

    /// The template that would actually be used for a key: the custom
    /// override when present and enabled, else the builtin.
    pub async fn get_effective(&self, key: &str) -> Result<EmailTemplate> {
        if let Some(row) = self.fetch_override(key).await? {
            if row.enabled {
                return Ok(EmailTemplate {
                    key: row.key,
                    subject: row.subject,
                    html: row.html,
                    enabled: true,
                    source: TemplateSource::Custom,
                    updated_at: Some(row.updated_at),
                });
            }
        }
        Self::builtin(key).ok_or_else(|| Error::NotFound(format!("template {key:?} not found")))
    }

    /// Create or replace an override
    pub async fn upsert(&self, key: &str, subject: &str, html: &str) -> Result<EmailTemplate> {
        validate::template_key(key)?;
        if subject.len() > MAX_SUBJECT_LEN {
            return Err(Error::bad_request(format!(
                "subject template exceeds {MAX_SUBJECT_LEN} bytes"
            )));
        }
        if html.len() > MAX_HTML_LEN {
            return Err(Error::bad_request(format!(
                "html template exceeds {MAX_HTML_LEN} bytes"
            )));
        }
        // parse errors surface now, not at send time
        let mut env = Environment::new();
        env.add_template("subject.txt", subject)
            .map_err(|e| Error::bad_request(format!("invalid subject template: {e}")))?;
        env.add_template("body.html", html)
            .map_err(|e| Error::bad_request(format!("invalid html template: {e}")))?;

        let row: OverrideRow = sqlx::query_as(
            r#"
            INSERT INTO _ayb_email_templates (key, subject, html, enabled)
            VALUES ($1, $2, $3, true)
            ON CONFLICT (key) DO UPDATE
                SET subject = EXCLUDED.subject, html = EXCLUDED.html, updated_at = now()
            RETURNING key, subject, html, enabled, updated_at
            "#,
        )
        .bind(key)
        .bind(subject)
        .bind(html)
        .fetch_one(&self.pool)
        .await?;

        Ok(EmailTemplate {
            key: row.key,
            subject: row.subject,
            html: row.html,
            enabled: row.enabled,
            source: TemplateSource::Custom,
            updated_at: Some(row.updated_at),
        })
    }

    /// Enable or disable an override
    pub async fn set_enabled(&self, key: &str, enabled: bool) -> Result<()> {
        let result =
            sqlx::query("UPDATE _ayb_email_templates SET enabled = $2, updated_at = now() WHERE key = $1")
                .bind(key)
                .bind(enabled)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("template {key:?} not found")));
        }
        Ok(())
    }

    /// Remove an override; the builtin (if any) takes effect again
    pub async fn delete(&self, key: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM _ayb_email_templates WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("template {key:?} not found")));
        }
        Ok(())
    }

    /// Render the effective template for a key
    pub async fn render_key(&self, key: &str, vars: &serde_json::Value) -> Result<RenderedEmail> {
        let template = self.get_effective(key).await?;
        render(&template.subject, &template.html, vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_binds_variables() {
        let rendered = render(
            "Hello {{ name }}",
            "<p>Hi {{ name }}</p>",
            &serde_json::json!({"name": "Charlie"}),
        )
        .unwrap();
        assert_eq!(rendered.subject, "Hello Charlie");
        assert_eq!(rendered.html, "<p>Hi Charlie</p>");
        assert_eq!(rendered.text, "Hi Charlie");
    }

    #[test]
    fn html_is_escaped() {
        let rendered = render(
            "s",
            "<p>{{ payload }}</p>",
            &serde_json::json!({"payload": "<script>alert(1)</script>"}),
        )
        .unwrap();
        assert!(!rendered.html.contains("<script>"));
        assert!(rendered.html.contains("&lt;script&gt;"));
    }

    #[test]
    fn missing_variable_is_an_error() {
        let result = render("Hi {{ name }}", "<p>x</p>", &serde_json::json!({}));
        assert!(result.is_err());
    }

    #[test]
    fn parse_error_is_bad_request() {
        let result = render("{{ unclosed", "<p>x</p>", &serde_json::json!({}));
        match result {
            Err(e) => assert_eq!(e.status(), axum::http::StatusCode::BAD_REQUEST),
            Ok(_) => panic!("expected parse failure"),
        }
    }

    #[test]
    fn builtin_lookup() {
        assert!(TemplateStore::builtin("auth.magic_link").is_some());
        assert!(TemplateStore::builtin("auth.welcome").is_some());
        assert!(TemplateStore::builtin("nonexistent.key").is_none());
    }

    #[test]
    fn tag_stripping() {
        assert_eq!(strip_tags("<p>one</p><p>two</p>"), "one two");
        assert_eq!(strip_tags("no tags"), "no tags");
        assert_eq!(strip_tags("<a href=\"x\">link</a>"), "link");
        assert_eq!(strip_tags("a &amp; b"), "a & b");
    }

    #[test]
    fn builtin_templates_render() {
        for (_, subject, html) in BUILTINS {
            let vars = serde_json::json!({
                "app_name": "aybase",
                "link": "https://example.com/x",
                "email": "a@b.co",
            });
            assert!(render(subject, html, &vars).is_ok(), "{subject}");
        }
    }
}
