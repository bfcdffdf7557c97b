//! # plughub-domain
//!
//! Pure domain model for the plughub integration host.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions, timestamps
//! - Define **Config entries** (persisted, user-created integration instances)
//! - Define **Entities** (capabilities exposed by a loaded entry: media players, switches, …)
//! - Define **Flows** (the outcome of a user/reauth/options wizard step)
//! - Define **Backups** (metadata exchanged with backup agents)
//! - Define **Services** and **Events**
//! - Contain all invariant enforcement and domain logic
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod slug;
pub mod time;

pub mod backup;
pub mod config_entry;
pub mod entity;
pub mod event;
pub mod flow;
pub mod service;
