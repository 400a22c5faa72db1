//! At-least-once webhook delivery

pub mod dispatcher;
pub mod store;

pub use dispatcher::{Dispatcher, Outcome, MAX_ATTEMPTS, SIGNATURE_HEADER};
pub use store::{Delivery, DeliveryStatus, Webhook, WebhookStore};
