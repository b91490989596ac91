//! Deploy Engine Library
//!
//! Thin orchestration facade: renders fixed deployment descriptors and
//! forwards them to a Portainer-style orchestration manager and to
//! Cloudflare's DNS and tunnel APIs, with an in-process session-token cache
//! as the only stateful component.

pub mod auth;
pub mod cloudflare;
pub mod config;
pub mod error;
pub mod portainer;
pub mod routes;
pub mod session;
pub mod templates;

pub use config::Config;
pub use error::ApiError;
pub use routes::AppState;
pub use session::{Authenticator, SessionCache};
