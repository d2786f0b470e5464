//! HTTP surface: the admission-gated endpoint and health check.

mod handlers;
mod server;

pub use handlers::{action, admission_middleware, health, TOO_MANY_REQUESTS_MESSAGE};
pub use server::{build_router, HttpServer};
