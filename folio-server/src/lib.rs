//! # Folio Server
//!
//! Portfolio-first generative image server. The HTTP layer is thin glue:
//! handlers translate requests into operations on the core scheduler,
//! generation service, and event bus from `folio-core`.

/// Error types and HTTP mapping
pub mod errors;

/// Request handlers
pub mod handlers;

/// Application state, configuration, and startup wiring
pub mod infra;

/// Route organization
pub mod routes;
