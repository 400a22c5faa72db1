//! SMTP transport seam
//!
//! The mailer exists when SMTP is configured; handlers treat an absent
//! mailer as 503, never as a silent drop.

use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::EmailConfig;
use crate::email::templates::RenderedEmail;
use crate::error::{Error, Result};
use crate::validate;

/// Outbound email transport
#[derive(Clone)]
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl Mailer {
    /// Build from configuration; `None` when SMTP is not configured
    pub fn from_config(config: &EmailConfig) -> Option<Self> {
        let host = config.smtp_host.as_deref()?;
        let from = config.from_address.as_deref()?.parse().ok()?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .ok()?
            .port(config.smtp_port);
        if let (Some(username), Some(password)) =
            (config.smtp_username.clone(), config.smtp_password.clone())
        {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Some(Self {
            transport: builder.build(),
            from,
        })
    }

    /// Send a rendered message
    pub async fn send(&self, to: &str, rendered: &RenderedEmail) -> Result<()> {
        validate::email(to)?;
        let to: Mailbox = to
            .parse()
            .map_err(|_| Error::bad_request(format!("invalid recipient {to:?}")))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&rendered.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(rendered.text.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(rendered.html.clone()),
                    ),
            )
            .map_err(|e| Error::internal(format!("message build failed: {e}")))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| Error::internal(format!("smtp send failed: {e}")))?;
        Ok(())
    }
}
