//! Application services: use-case implementations.
//!
//! Each service struct accepts port trait implementations via generic parameters
//! (constructor injection), keeping this layer decoupled from concrete adapters.

pub mod backup_manager;
pub mod config_entries;
pub mod entity_service;
pub mod hub;
pub mod integration_context;
