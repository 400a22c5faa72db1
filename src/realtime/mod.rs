//! Realtime fan-out: the hub and its SSE surface

pub mod hub;
pub mod sse;

pub use hub::{Action, ChangeEvent, Hub, Subscription};
