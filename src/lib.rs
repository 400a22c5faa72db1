//! # aybase
//!
//! Backend-as-a-service core: a single HTTP server that turns a
//! PostgreSQL database into a secure, multi-tenant, realtime API
//! surface.
//!
//! - auto-generated CRUD endpoints from live schema introspection
//! - JWT / API-key / admin-token authentication with rotatable secrets
//! - SSE realtime fan-out of row changes
//! - durable webhook deliveries with retries and pruning
//! - a persistent job queue with cron schedules
//! - an admin control plane down to raw SQL
//!
//! ## Example
//!
//! ```rust,no_run
//! use aybase::{config::Config, server::Server, state::AppState, telemetry};
//!
//! #[tokio::main]
//! async fn main() -> aybase::error::Result<()> {
//!     let config = Config::load()?;
//!     let logs = telemetry::LogBuffer::new();
//!     telemetry::init(logs.clone());
//!
//!     let pool = aybase::database::connect(&config.database).await?;
//!     aybase::database::migrate(&pool).await?;
//!
//!     let state = AppState::build(config, pool, logs).await?;
//!     let app = aybase::routes::build(state.clone());
//!     Server::new(state).serve(app).await
//! }
//! ```

pub mod admin;
pub mod apps;
pub mod auth;
pub mod config;
pub mod crud;
pub mod database;
pub mod email;
pub mod error;
pub mod http;
pub mod jobs;
pub mod keystore;
pub mod messaging;
pub mod ratelimit;
pub mod realtime;
pub mod responses;
pub mod routes;
pub mod schema;
pub mod server;
pub mod state;
pub mod storage;
pub mod telemetry;
pub mod validate;
pub mod webhooks;
