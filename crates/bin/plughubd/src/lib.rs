//! # plughubd: plughub daemon
//!
//! Composition root that wires all adapters together.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Initialize the `SQLite` connection pool and run migrations
//! - Construct repository implementations (adapters)
//! - Construct one config entry manager per enabled integration and
//!   register them with the hub
//! - Build the axum state served by `main`
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer: no domain logic belongs here.

pub mod config;
pub mod wiring;
