//! HTTP plumbing shared by the conversational endpoint and the supervisor
//! control endpoint.

pub mod error;
pub mod server;

pub use error::ApiError;
pub use server::{bind, health_check, serve, shutdown_signal};
