//! Config entry manager: flows and lifecycle for one integration.
//!
//! ```text
//! not_loaded ──setup──▶ setup_in_progress ──ok──▶ loaded ──unload──▶ not_loaded
//!                              │                                   (failed_unload)
//!                              ├─ NotReady ──▶ setup_retry ──(5s·2ⁿ)──▶ setup
//!                              └─ AuthFailed / Fatal ──▶ setup_error
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::AbortHandle;

use plughub_domain::config_entry::{ConfigEntry, EntryData, EntryState};
use plughub_domain::entity::Entity;
use plughub_domain::error::{NotFoundError, PlugHubError, SetupError};
use plughub_domain::event::{Event, EventType};
use plughub_domain::flow::{AbortReason, FlowResult, FlowStep};
use plughub_domain::id::EntryId;
use plughub_domain::service::ServiceCall;
use plughub_domain::time::now;

use crate::backup_registry::BackupAgentRegistry;
use crate::ports::{ConfigEntryRepository, EntityRepository, EventPublisher, Integration};
use crate::services::entity_service::EntityService;
use crate::services::integration_context::ServiceContext;

/// First retry delay after a `NotReady` setup failure.
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(5);

/// Retry delays double up to `base · 2^MAX_RETRY_EXPONENT`.
const MAX_RETRY_EXPONENT: u32 = 4;

struct PendingRetry {
    attempts: u32,
    handle: Option<AbortHandle>,
}

struct Inner<I: Integration, CR, ER, EP> {
    integration: I,
    entries: CR,
    entity_service: Arc<EntityService<ER, EP>>,
    publisher: EP,
    backups: Arc<BackupAgentRegistry>,
    loaded: Mutex<HashMap<EntryId, Arc<I::Runtime>>>,
    retries: Mutex<HashMap<EntryId, PendingRetry>>,
    lifecycle: Mutex<HashMap<EntryId, Arc<tokio::sync::Mutex<()>>>>,
    flow_lock: tokio::sync::Mutex<()>,
    retry_base: Duration,
}

/// Owns every config entry of integration `I` and their runtime handles.
///
/// Cheap to clone; clones share the same state.
pub struct ConfigEntries<I: Integration, CR, ER, EP> {
    inner: Arc<Inner<I, CR, ER, EP>>,
}

impl<I: Integration, CR, ER, EP> Clone for ConfigEntries<I, CR, ER, EP> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I, CR, ER, EP> ConfigEntries<I, CR, ER, EP>
where
    I: Integration,
    CR: ConfigEntryRepository + Send + Sync + 'static,
    ER: EntityRepository + Send + Sync + 'static,
    EP: EventPublisher + Clone + Send + Sync + 'static,
{
    /// Create a manager for `integration`.
    pub fn new(
        integration: I,
        entries: CR,
        entity_service: Arc<EntityService<ER, EP>>,
        publisher: EP,
        backups: Arc<BackupAgentRegistry>,
    ) -> Self {
        Self::with_retry_base(
            integration,
            entries,
            entity_service,
            publisher,
            backups,
            DEFAULT_RETRY_BASE,
        )
    }

    /// Same as [`new`](Self::new) with a custom first retry delay.
    pub fn with_retry_base(
        integration: I,
        entries: CR,
        entity_service: Arc<EntityService<ER, EP>>,
        publisher: EP,
        backups: Arc<BackupAgentRegistry>,
        retry_base: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                integration,
                entries,
                entity_service,
                publisher,
                backups,
                loaded: Mutex::new(HashMap::new()),
                retries: Mutex::new(HashMap::new()),
                lifecycle: Mutex::new(HashMap::new()),
                flow_lock: tokio::sync::Mutex::new(()),
                retry_base,
            }),
        }
    }

    #[must_use]
    pub fn domain(&self) -> &'static str {
        self.inner.integration.domain()
    }

    /// Whether `entry_id` currently owns a runtime handle.
    #[must_use]
    pub fn is_loaded(&self, entry_id: EntryId) -> bool {
        self.loaded().contains_key(&entry_id)
    }

    /// Run the `user` step: validate, reject duplicates, create and set up.
    ///
    /// # Errors
    ///
    /// Only storage failures are errors; validation failures come back as
    /// [`FlowResult::Form`] and duplicates as [`FlowResult::Abort`].
    #[tracing::instrument(skip_all, fields(domain = self.domain()))]
    pub async fn start_user_flow(&self, input: EntryData) -> Result<FlowResult, PlugHubError> {
        let _guard = self.inner.flow_lock.lock().await;
        let validated = match self.inner.integration.validate_input(&input).await {
            Ok(validated) => validated,
            Err(err) => {
                tracing::info!(code = %err.code, field = err.field, "user flow rejected");
                return Ok(FlowResult::form_error(FlowStep::User, &err));
            }
        };
        if let Some(unique_id) = validated.unique_id.as_deref() {
            let existing = self
                .inner
                .entries
                .find_by_unique_id(self.domain(), unique_id)
                .await?;
            if existing.is_some() {
                tracing::info!(unique_id, "user flow aborted, already configured");
                return Ok(FlowResult::abort(AbortReason::AlreadyConfigured));
            }
        }

        let mut builder = ConfigEntry::builder()
            .domain(self.domain())
            .title(validated.title)
            .data(validated.data);
        if let Some(unique_id) = validated.unique_id {
            builder = builder.unique_id(unique_id);
        }
        let entry = self.inner.entries.create(builder.build()?).await?;
        tracing::info!(entry_id = %entry.entry_id, title = %entry.title, "config entry created");

        let entry = self.setup(entry.entry_id).await?;
        Ok(FlowResult::CreateEntry {
            entry: Box::new(entry),
        })
    }

    /// Run the `reauth` step: merge `input` over the stored data, validate,
    /// check the identity did not change, persist and reload.
    ///
    /// # Errors
    ///
    /// Returns [`PlugHubError::NotFound`] for an unknown entry, or a storage error.
    #[tracing::instrument(skip(self, input), fields(domain = self.domain()))]
    pub async fn start_reauth_flow(
        &self,
        entry_id: EntryId,
        input: EntryData,
    ) -> Result<FlowResult, PlugHubError> {
        let mut entry = self.get_entry(entry_id).await?;
        let mut data = entry.data.clone();
        data.extend(input);

        let validated = match self.inner.integration.validate_input(&data).await {
            Ok(validated) => validated,
            Err(err) => {
                tracing::info!(code = %err.code, "reauth flow rejected");
                return Ok(FlowResult::form_error(FlowStep::Reauth, &err));
            }
        };
        if let (Some(current), Some(new)) = (&entry.unique_id, &validated.unique_id)
            && current != new
        {
            tracing::warn!(current, new, "reauth flow aborted, unique id mismatch");
            return Ok(FlowResult::abort(AbortReason::UniqueIdMismatch));
        }

        entry.data = validated.data;
        entry.modified_at = now();
        self.inner.entries.update(entry).await?;
        self.reload(entry_id).await?;
        Ok(FlowResult::abort(AbortReason::ReauthSuccessful))
    }

    /// Replace the options of an entry and notify its runtime when loaded.
    ///
    /// # Errors
    ///
    /// Returns [`PlugHubError::NotFound`] for an unknown entry, or a storage error.
    pub async fn update_options(
        &self,
        entry_id: EntryId,
        options: EntryData,
    ) -> Result<ConfigEntry, PlugHubError> {
        let mut entry = self.get_entry(entry_id).await?;
        entry.options = options;
        entry.modified_at = now();
        let entry = self.inner.entries.update(entry).await?;
        if let Some(runtime) = self.runtime(entry_id) {
            self.inner
                .integration
                .options_updated(&runtime, &entry)
                .await;
        }
        tracing::info!(%entry_id, "config entry options updated");
        Ok(entry)
    }

    /// Set up one entry. Already-loaded entries are returned unchanged.
    ///
    /// Setup failures are not errors: they are recorded on the entry
    /// (`setup_retry` with a scheduled retry, or `setup_error`).
    ///
    /// # Errors
    ///
    /// Returns [`PlugHubError::NotFound`] for an unknown entry, or a storage error.
    #[tracing::instrument(skip(self), fields(domain = self.domain()))]
    pub async fn setup(&self, entry_id: EntryId) -> Result<ConfigEntry, PlugHubError> {
        let _lifecycle = self.lock_lifecycle(entry_id).await;
        let mut entry = self.get_entry(entry_id).await?;
        if self.is_loaded(entry_id) {
            return Ok(entry);
        }
        self.transition(&mut entry, EntryState::SetupInProgress, None)
            .await?;

        let ctx = ServiceContext::new(
            entry_id,
            Arc::clone(&self.inner.entity_service),
            self.inner.publisher.clone(),
        );
        match self.inner.integration.setup_entry(&entry, ctx).await {
            Ok(runtime) => {
                let runtime = Arc::new(runtime);
                if let Some(agent) = self.inner.integration.backup_agent(&runtime, &entry) {
                    self.inner.backups.register(self.agent_id(entry_id), agent);
                }
                self.loaded().insert(entry_id, runtime);
                self.clear_retry(entry_id);
                self.transition(&mut entry, EntryState::Loaded, None).await?;
                tracing::info!(%entry_id, "config entry loaded");
            }
            Err(err) => {
                let state = EntryState::after_setup_failure(&err);
                self.transition(&mut entry, state, Some(err.reason().to_string()))
                    .await?;
                if err.is_retryable() {
                    let delay = self.schedule_retry(entry_id);
                    tracing::warn!(%entry_id, error = %err, retry_in = ?delay, "config entry not ready");
                } else {
                    self.clear_retry(entry_id);
                    tracing::error!(%entry_id, error = %err, "config entry setup failed");
                }
            }
        }
        Ok(entry)
    }

    /// Unload one entry: cancel retries, drop its backup agent, hand the
    /// runtime back to the integration and mark its entities unavailable.
    ///
    /// # Errors
    ///
    /// Returns [`PlugHubError::NotFound`] for an unknown entry, or a storage error.
    #[tracing::instrument(skip(self), fields(domain = self.domain()))]
    pub async fn unload(&self, entry_id: EntryId) -> Result<ConfigEntry, PlugHubError> {
        self.clear_retry(entry_id);
        let _lifecycle = self.lock_lifecycle(entry_id).await;
        let mut entry = self.get_entry(entry_id).await?;
        let runtime = self.loaded().remove(&entry_id);
        let Some(runtime) = runtime else {
            if entry.state != EntryState::NotLoaded {
                self.transition(&mut entry, EntryState::NotLoaded, None)
                    .await?;
            }
            return Ok(entry);
        };

        self.inner.backups.unregister(&self.agent_id(entry_id));
        self.transition(&mut entry, EntryState::UnloadInProgress, None)
            .await?;
        let result = self.inner.integration.unload_entry(runtime).await;
        self.inner
            .entity_service
            .mark_entry_unavailable(entry_id)
            .await?;
        match result {
            Ok(()) => {
                self.transition(&mut entry, EntryState::NotLoaded, None)
                    .await?;
                tracing::info!(%entry_id, "config entry unloaded");
            }
            Err(err) => {
                tracing::warn!(%entry_id, error = %err, "config entry failed to unload");
                self.transition(&mut entry, EntryState::FailedUnload, Some(err.to_string()))
                    .await?;
            }
        }
        Ok(entry)
    }

    /// Unload then set up again.
    ///
    /// # Errors
    ///
    /// Returns [`PlugHubError::NotFound`] for an unknown entry, or a storage error.
    pub async fn reload(&self, entry_id: EntryId) -> Result<ConfigEntry, PlugHubError> {
        self.unload(entry_id).await?;
        self.setup(entry_id).await
    }

    /// Unload an entry, then delete it together with its entities.
    ///
    /// # Errors
    ///
    /// Returns [`PlugHubError::NotFound`] for an unknown entry, or a storage error.
    pub async fn remove(&self, entry_id: EntryId) -> Result<(), PlugHubError> {
        self.unload(entry_id).await?;
        self.inner
            .entity_service
            .remove_entry_entities(entry_id)
            .await?;
        self.inner.entries.delete(entry_id).await?;
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .remove(&entry_id);
        tracing::info!(%entry_id, "config entry removed");
        Ok(())
    }

    /// Set up every stored entry of this integration (startup).
    ///
    /// # Errors
    ///
    /// Returns a storage error when the entries cannot be listed.
    pub async fn setup_all(&self) -> Result<(), PlugHubError> {
        let entries = self.inner.entries.find_by_domain(self.domain()).await?;
        tracing::info!(domain = self.domain(), count = entries.len(), "setting up entries");
        for entry in entries {
            if let Err(err) = self.setup(entry.entry_id).await {
                tracing::error!(entry_id = %entry.entry_id, error = %err, "entry setup aborted");
            }
        }
        Ok(())
    }

    /// Unload every loaded entry (shutdown).
    pub async fn unload_all(&self) {
        let ids: Vec<EntryId> = self.loaded().keys().copied().collect();
        let pending: Vec<EntryId> = self.retries().keys().copied().collect();
        for entry_id in pending {
            self.clear_retry(entry_id);
        }
        for entry_id in ids {
            if let Err(err) = self.unload(entry_id).await {
                tracing::error!(%entry_id, error = %err, "entry unload aborted");
            }
        }
    }

    /// Forward a service call to the runtime owning `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`PlugHubError::Setup`] when the entry is not loaded, or the
    /// integration's own error.
    #[tracing::instrument(skip(self, entity), fields(entity_id = %entity.entity_id))]
    pub async fn call_service(
        &self,
        entity: &Entity,
        call: &ServiceCall,
    ) -> Result<(), PlugHubError> {
        let runtime = self.runtime(entity.entry_id).ok_or_else(|| {
            SetupError::NotReady(format!("config entry {} is not loaded", entity.entry_id))
        })?;
        self.inner
            .integration
            .handle_service_call(&runtime, entity, call)
            .await
    }

    /// Load an entry, reporting unknown ids as [`PlugHubError::NotFound`].
    ///
    /// # Errors
    ///
    /// Returns [`PlugHubError::NotFound`] or a storage error.
    pub async fn get_entry(&self, entry_id: EntryId) -> Result<ConfigEntry, PlugHubError> {
        self.inner
            .entries
            .get_by_id(entry_id)
            .await?
            .filter(|entry| entry.domain == self.domain())
            .ok_or_else(|| {
                NotFoundError {
                    entity: "ConfigEntry",
                    id: entry_id.to_string(),
                }
                .into()
            })
    }

    fn agent_id(&self, entry_id: EntryId) -> String {
        BackupAgentRegistry::agent_id(self.domain(), entry_id)
    }

    fn runtime(&self, entry_id: EntryId) -> Option<Arc<I::Runtime>> {
        self.loaded().get(&entry_id).cloned()
    }

    fn loaded(&self) -> std::sync::MutexGuard<'_, HashMap<EntryId, Arc<I::Runtime>>> {
        self.inner
            .loaded
            .lock()
            .unwrap_or_else(|err| err.into_inner())
    }

    /// Setup and unload of one entry never overlap.
    async fn lock_lifecycle(&self, entry_id: EntryId) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = Arc::clone(
            self.inner
                .lifecycle
                .lock()
                .unwrap_or_else(|err| err.into_inner())
                .entry(entry_id)
                .or_default(),
        );
        lock.lock_owned().await
    }

    fn retries(&self) -> std::sync::MutexGuard<'_, HashMap<EntryId, PendingRetry>> {
        self.inner
            .retries
            .lock()
            .unwrap_or_else(|err| err.into_inner())
    }

    async fn transition(
        &self,
        entry: &mut ConfigEntry,
        state: EntryState,
        reason: Option<String>,
    ) -> Result<(), PlugHubError> {
        let previous = entry.state;
        entry.set_state(state, reason);
        *entry = self.inner.entries.update(entry.clone()).await?;
        self.inner
            .publisher
            .publish(
                Event::new(
                    EventType::EntryStateChanged,
                    serde_json::json!({
                        "domain": entry.domain,
                        "from": previous,
                        "to": state,
                        "reason": entry.reason,
                    }),
                )
                .with_entry(entry.entry_id),
            )
            .await
    }

    /// Schedule another setup attempt and return its delay.
    fn schedule_retry(&self, entry_id: EntryId) -> Duration {
        let mut retries = self.retries();
        let retry = retries.entry(entry_id).or_insert(PendingRetry {
            attempts: 0,
            handle: None,
        });
        let delay = retry_delay(self.inner.retry_base, retry.attempts);
        retry.attempts += 1;
        if let Some(previous) = retry.handle.take() {
            previous.abort();
        }
        let manager = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            manager.detach_retry(entry_id);
            if let Err(err) = manager.setup(entry_id).await {
                tracing::error!(%entry_id, error = %err, "scheduled setup aborted");
            }
        });
        retry.handle = Some(task.abort_handle());
        delay
    }

    /// The retry task is running; it must not be aborted by its own setup.
    fn detach_retry(&self, entry_id: EntryId) {
        if let Some(retry) = self.retries().get_mut(&entry_id) {
            retry.handle = None;
        }
    }

    fn clear_retry(&self, entry_id: EntryId) {
        if let Some(retry) = self.retries().remove(&entry_id)
            && let Some(handle) = retry.handle
        {
            handle.abort();
        }
    }
}

/// Object-safe view of a [`ConfigEntries`] manager, so the [`Hub`] can hold
/// integrations with different runtime types side by side.
///
/// [`Hub`]: crate::services::hub::Hub
pub trait IntegrationHandle: Send + Sync {
    fn domain(&self) -> &'static str;

    fn start_user_flow(&self, input: EntryData) -> BoxFuture<'_, Result<FlowResult, PlugHubError>>;

    fn start_reauth_flow(
        &self,
        entry_id: EntryId,
        input: EntryData,
    ) -> BoxFuture<'_, Result<FlowResult, PlugHubError>>;

    fn update_options(
        &self,
        entry_id: EntryId,
        options: EntryData,
    ) -> BoxFuture<'_, Result<ConfigEntry, PlugHubError>>;

    fn reload(&self, entry_id: EntryId) -> BoxFuture<'_, Result<ConfigEntry, PlugHubError>>;

    fn remove(&self, entry_id: EntryId) -> BoxFuture<'_, Result<(), PlugHubError>>;

    fn setup_all(&self) -> BoxFuture<'_, Result<(), PlugHubError>>;

    fn unload_all(&self) -> BoxFuture<'_, ()>;

    fn call_service<'a>(
        &'a self,
        entity: &'a Entity,
        call: &'a ServiceCall,
    ) -> BoxFuture<'a, Result<(), PlugHubError>>;
}

impl<I, CR, ER, EP> IntegrationHandle for ConfigEntries<I, CR, ER, EP>
where
    I: Integration,
    CR: ConfigEntryRepository + Send + Sync + 'static,
    ER: EntityRepository + Send + Sync + 'static,
    EP: EventPublisher + Clone + Send + Sync + 'static,
{
    fn domain(&self) -> &'static str {
        ConfigEntries::domain(self)
    }

    fn start_user_flow(&self, input: EntryData) -> BoxFuture<'_, Result<FlowResult, PlugHubError>> {
        Box::pin(ConfigEntries::start_user_flow(self, input))
    }

    fn start_reauth_flow(
        &self,
        entry_id: EntryId,
        input: EntryData,
    ) -> BoxFuture<'_, Result<FlowResult, PlugHubError>> {
        Box::pin(ConfigEntries::start_reauth_flow(self, entry_id, input))
    }

    fn update_options(
        &self,
        entry_id: EntryId,
        options: EntryData,
    ) -> BoxFuture<'_, Result<ConfigEntry, PlugHubError>> {
        Box::pin(ConfigEntries::update_options(self, entry_id, options))
    }

    fn reload(&self, entry_id: EntryId) -> BoxFuture<'_, Result<ConfigEntry, PlugHubError>> {
        Box::pin(ConfigEntries::reload(self, entry_id))
    }

    fn remove(&self, entry_id: EntryId) -> BoxFuture<'_, Result<(), PlugHubError>> {
        Box::pin(ConfigEntries::remove(self, entry_id))
    }

    fn setup_all(&self) -> BoxFuture<'_, Result<(), PlugHubError>> {
        Box::pin(ConfigEntries::setup_all(self))
    }

    fn unload_all(&self) -> BoxFuture<'_, ()> {
        Box::pin(ConfigEntries::unload_all(self))
    }

    fn call_service<'a>(
        &'a self,
        entity: &'a Entity,
        call: &'a ServiceCall,
    ) -> BoxFuture<'a, Result<(), PlugHubError>> {
        Box::pin(ConfigEntries::call_service(self, entity, call))
    }
}

/// Delay before the next attempt after `attempts` failed retries.
#[must_use]
pub fn retry_delay(base: Duration, attempts: u32) -> Duration {
    base * 2_u32.pow(attempts.min(MAX_RETRY_EXPONENT))
}
