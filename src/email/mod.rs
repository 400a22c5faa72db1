//! Email: template store, renderer and SMTP transport

pub mod mailer;
pub mod templates;

pub use mailer::Mailer;
pub use templates::{render, EmailTemplate, RenderedEmail, TemplateSource, TemplateStore};
