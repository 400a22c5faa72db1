//! Authentication kernel
//!
//! Credential types and their verification paths: passwords (argon2),
//! JWTs (HS256 against the keystore), API keys (`ayb_…`, hash at rest),
//! OAuth clients, and the per-boot admin HMAC token. `bearer` holds the
//! fallthrough that turns an `Authorization` header into an identity.

pub mod api_keys;
pub mod bearer;
pub mod jwt;
pub mod oauth_clients;
pub mod password;
pub mod service;

pub use api_keys::{ApiKey, ApiKeyStore, CreateKeyOptions};
pub use bearer::Identity;
pub use jwt::{Claims, TokenService};
pub use oauth_clients::{ClientType, OAuthClient, OAuthClientStore, RegisterClient};
pub use password::PasswordHasher;
pub use service::{AuthService, TokenPair, User};
