//! # foreman-api
//!
//! The HTTP surface of the Foreman control plane: webhook receiver,
//! cascade and orchestrator routes, goal/session/lock CRUD, all over
//! the engine in `foreman-engine`.
//!
//! Authentication here is webhook-HMAC only; operator identity and
//! rate limiting sit in front of this service.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod config;
pub mod context;
pub mod error;
pub mod openapi;
pub mod routes;
pub mod server;
pub mod signature;

pub use config::Config;
pub use error::{ApiError, ApiErrorBody, ApiResult};
pub use server::{router, serve, AppState};
