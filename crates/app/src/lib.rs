//! # plughub-app
//!
//! Application layer: use-cases and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement (driven/outbound ports):
//!   - `ConfigEntryRepository`: persistence of config entries
//!   - `EntityRepository`: the entity registry
//!   - `EventPublisher`: publish domain events
//!   - `Integration`: config flow, entry setup/unload and service calls
//!     for one external system
//!   - `BackupAgent`: list/get/upload/download/delete backups on a remote store
//! - Define **driving/inbound ports** as use-case structs/traits:
//!   - `ConfigEntries`: per-integration entry lifecycle (flows, setup, retry, unload)
//!   - `Hub`: routes API calls to the right integration
//!   - `EntityService`: upsert, list, mark unavailable, remove
//!   - `BackupManager`: aggregate backups across every registered agent
//! - Provide **in-process infrastructure** (event bus, backup agent registry)
//!
//! ## Dependency rule
//! Depends on `plughub-domain` only (plus `tokio` for channels and timers).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod backup_registry;
pub mod event_bus;
pub mod ports;
pub mod services;

#[cfg(test)]
pub(crate) mod testing;
