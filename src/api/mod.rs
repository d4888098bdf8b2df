//! HTTP API Module
//!
//! Operator-facing surface: readiness, status, and remote shutdown.

mod http;

pub use http::HttpServer;
