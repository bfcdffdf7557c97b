//! Assemble the hub from configuration.

use std::sync::Arc;

use anyhow::Context;

use plughub_adapter_backblaze::BackblazeIntegration;
use plughub_adapter_http_axum::state::AppState;
use plughub_adapter_mpris::MprisIntegration;
use plughub_adapter_owntone::OwnToneIntegration;
use plughub_adapter_remote_dir::{LocalFs, RemoteDirIntegration};
use plughub_adapter_storage_sqlite_sqlx::{
    Config as StorageConfig, SqliteConfigEntryRepository, SqliteEntityRepository,
};
use plughub_adapter_tonewinner::TonewinnerIntegration;
use plughub_app::backup_registry::BackupAgentRegistry;
use plughub_app::event_bus::InProcessEventBus;
use plughub_app::ports::Integration;
use plughub_app::services::backup_manager::BackupManager;
use plughub_app::services::config_entries::{ConfigEntries, IntegrationHandle};
use plughub_app::services::entity_service::EntityService;
use plughub_app::services::hub::Hub;

use crate::config::{Config, KNOWN_INTEGRATIONS};

pub type Entries = Arc<SqliteConfigEntryRepository>;
pub type Bus = Arc<InProcessEventBus>;
pub type State = AppState<Entries, SqliteEntityRepository, Bus>;

/// Everything the config entry managers share.
struct Shared {
    entries: Entries,
    entities: Arc<EntityService<SqliteEntityRepository, Bus>>,
    bus: Bus,
    registry: Arc<BackupAgentRegistry>,
}

impl Shared {
    fn manage<I: Integration>(&self, integration: I) -> Arc<dyn IntegrationHandle> {
        Arc::new(ConfigEntries::new(
            integration,
            Arc::clone(&self.entries),
            Arc::clone(&self.entities),
            Arc::clone(&self.bus),
            Arc::clone(&self.registry),
        ))
    }

    fn integration(&self, domain: &str) -> anyhow::Result<Arc<dyn IntegrationHandle>> {
        let handle = match domain {
            plughub_adapter_backblaze::DOMAIN => self.manage(BackblazeIntegration::default()),
            plughub_adapter_remote_dir::DOMAIN => self.manage(RemoteDirIntegration::<LocalFs>::default()),
            plughub_adapter_owntone::DOMAIN => self.manage(OwnToneIntegration::default()),
            plughub_adapter_tonewinner::DOMAIN => self.manage(TonewinnerIntegration::default()),
            plughub_adapter_mpris::DOMAIN => self.manage(MprisIntegration::default()),
            other => anyhow::bail!("unknown integration {other:?}"),
        };
        Ok(handle)
    }
}

/// Open the database and build the hub with every enabled integration.
///
/// Stored entries are not set up yet; call [`Hub::setup_all`] once the
/// state is built.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or migrated, or if an
/// enabled integration is unknown.
pub async fn build(config: &Config) -> anyhow::Result<State> {
    let db = StorageConfig {
        database_url: config.database_url().to_string(),
    }
    .build()
    .await
    .with_context(|| format!("failed to open database {}", config.database_url()))?;

    let bus = Arc::new(InProcessEventBus::new(config.integrations.event_bus_capacity));
    let shared = Shared {
        entries: Arc::new(SqliteConfigEntryRepository::new(db.pool().clone())),
        entities: Arc::new(EntityService::new(
            SqliteEntityRepository::new(db.pool().clone()),
            Arc::clone(&bus),
        )),
        bus: Arc::clone(&bus),
        registry: Arc::new(BackupAgentRegistry::new()),
    };

    let mut hub = Hub::new(
        Arc::clone(&shared.entries),
        Arc::clone(&shared.entities),
        BackupManager::new(Arc::clone(&shared.registry)),
    );
    for domain in KNOWN_INTEGRATIONS {
        if config.is_enabled(domain) {
            hub = hub.with_integration(shared.integration(domain)?);
        } else {
            tracing::debug!(domain, "integration disabled");
        }
    }
    tracing::debug!(domains = ?hub.domains(), "integrations enabled");

    Ok(AppState::new(Arc::new(hub), bus))
}
