//! # plughub-adapter-http-axum
//!
//! HTTP adapter built on [axum](https://docs.rs/axum).
//!
//! ## Responsibilities
//! - Serve a **JSON API** over the hub: config entries and their flows,
//!   entities, service calls and backups (`/api/config_entries`,
//!   `/api/entities`, `/api/services/{service}`, `/api/backup/...`)
//! - Stream domain events to clients as Server-Sent Events
//! - Map HTTP requests into application service calls (driving adapter)
//! - Map application results and errors into HTTP responses
//!
//! ## Dependency rule
//! Depends on `plughub-app` (for port traits and services) and
//! `plughub-domain` (for domain types used in request/response mapping).
//! Never leaks axum types into the domain.

pub mod api;
pub mod error;
pub mod router;
pub mod state;

#[cfg(test)]
mod testing;
