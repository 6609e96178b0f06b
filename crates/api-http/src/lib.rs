//! Control API
//!
//! HTTP/JSON front of the job queue: submit, inspect and cancel jobs,
//! report backend and worker health, list the registered modules.

pub mod error;
pub mod handler;
pub mod rate_limiter;
pub mod server;
pub mod types;

pub use handler::AppState;
pub use server::{router, HttpServer, HttpServerConfig};
