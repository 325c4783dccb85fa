//! HTTP middleware stack: CORS, per-request tracing and session identity.

pub mod cors;
pub mod session;
pub mod trace;

pub use session::SessionId;
