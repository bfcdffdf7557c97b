//! Integration port: config flow, entry lifecycle and service calls.
//!
//! An integration bridges one external system (a cloud object store, a
//! media server, a line protocol) into plughub. The host owns config
//! entries; the integration only knows how to validate connection
//! parameters, turn an entry into a live runtime handle, publish entities
//! through an [`EntityContext`] and forward service calls.

use std::future::Future;
use std::sync::Arc;

use plughub_domain::config_entry::{ConfigEntry, EntryData};
use plughub_domain::entity::Entity;
use plughub_domain::error::{PlugHubError, SetupError};
use plughub_domain::event::Event;
use plughub_domain::flow::FlowError;
use plughub_domain::id::EntryId;
use plughub_domain::service::ServiceCall;

use crate::ports::backup::BackupAgent;

/// Context handed to an integration for one loaded config entry.
///
/// This is a **port**; integrations call it to publish the entities they
/// expose. The app crate provides
/// [`ServiceContext`](crate::services::integration_context::ServiceContext),
/// backed by `EntityService`.
pub trait EntityContext: Send + Sync {
    /// Entry every entity published through this context belongs to.
    fn entry_id(&self) -> EntryId;

    /// Create or update an entity by `unique_id`.
    ///
    /// Publishes `EntityAdded` / `StateChanged` events when appropriate.
    fn upsert_entity(
        &self,
        entity: Entity,
    ) -> impl Future<Output = Result<Entity, PlugHubError>> + Send;

    /// Drop an entity whose backing capability disappeared.
    fn remove_entity(
        &self,
        unique_id: &str,
    ) -> impl Future<Output = Result<(), PlugHubError>> + Send;

    /// Publish a domain event to the event bus.
    fn publish(&self, event: Event) -> impl Future<Output = Result<(), PlugHubError>> + Send;

    /// Entities of this entry known from earlier runs, in any state.
    ///
    /// Contexts without a registry report none.
    fn registered_entities(&self) -> impl Future<Output = Result<Vec<Entity>, PlugHubError>> + Send {
        async { Ok(Vec::new()) }
    }
}

/// What a successful config-flow validation produces.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedEntry {
    pub title: String,
    /// Identity used to detect duplicates, `None` for single-instance setups.
    pub unique_id: Option<String>,
    /// Normalised connection parameters to persist.
    pub data: EntryData,
}

/// A pluggable integration.
///
/// The entry manager drives the lifecycle:
///
/// 1. [`validate_input`](Self::validate_input): one round trip during a flow
/// 2. [`setup_entry`](Self::setup_entry): open the connection, return the runtime
/// 3. (service calls via [`handle_service_call`](Self::handle_service_call))
/// 4. [`unload_entry`](Self::unload_entry): close the connection
pub trait Integration: Send + Sync + 'static {
    /// Live connection state owned by a loaded entry.
    type Runtime: Send + Sync + 'static;

    /// Integration name stored on each config entry (e.g. `"backblaze"`).
    fn domain(&self) -> &'static str;

    /// Validate user input with one round trip to the external system.
    fn validate_input(
        &self,
        input: &EntryData,
    ) -> impl Future<Output = Result<ValidatedEntry, FlowError>> + Send;

    /// Open a connection for `entry` and publish its entities via `ctx`.
    fn setup_entry<C>(
        &self,
        entry: &ConfigEntry,
        ctx: C,
    ) -> impl Future<Output = Result<Self::Runtime, SetupError>> + Send
    where
        C: EntityContext + Clone + 'static;

    /// Tear down the runtime handle (sockets closed, tasks aborted).
    fn unload_entry(
        &self,
        runtime: Arc<Self::Runtime>,
    ) -> impl Future<Output = Result<(), PlugHubError>> + Send;

    /// Handle a service call for an entity owned by `runtime`.
    ///
    /// State changes flow back through the [`EntityContext`] given at setup.
    fn handle_service_call(
        &self,
        runtime: &Self::Runtime,
        entity: &Entity,
        call: &ServiceCall,
    ) -> impl Future<Output = Result<(), PlugHubError>> + Send;

    /// Options of a loaded entry changed. The default ignores the change.
    fn options_updated(
        &self,
        _runtime: &Self::Runtime,
        _entry: &ConfigEntry,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// Backup agent exposed by a loaded entry, if this integration stores backups.
    fn backup_agent(
        &self,
        _runtime: &Arc<Self::Runtime>,
        _entry: &ConfigEntry,
    ) -> Option<Arc<dyn BackupAgent>> {
        None
    }
}
