//! Registry of backup agents exposed by loaded config entries.
//!
//! Agent ids are `"{domain}.{entry_id}"`. The entry manager registers an
//! agent once its entry is loaded and unregisters it before unloading.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tokio::sync::watch;

use crate::ports::BackupAgent;

/// Thread-safe map of agent id to agent, with change notification.
pub struct BackupAgentRegistry {
    agents: RwLock<BTreeMap<String, Arc<dyn BackupAgent>>>,
    changes: watch::Sender<Vec<String>>,
}

impl Default for BackupAgentRegistry {
    fn default() -> Self {
        let (changes, _) = watch::channel(Vec::new());
        Self {
            agents: RwLock::new(BTreeMap::new()),
            changes,
        }
    }
}

impl BackupAgentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Agent id for a config entry.
    #[must_use]
    pub fn agent_id(domain: &str, entry_id: impl std::fmt::Display) -> String {
        format!("{domain}.{entry_id}")
    }

    /// Add or replace an agent.
    pub fn register(&self, agent_id: String, agent: Arc<dyn BackupAgent>) {
        let ids = {
            let mut agents = self.agents.write().unwrap_or_else(|err| err.into_inner());
            agents.insert(agent_id.clone(), agent);
            agents.keys().cloned().collect::<Vec<_>>()
        };
        tracing::info!(agent_id, "backup agent registered");
        self.changes.send_replace(ids);
    }

    /// Remove an agent. Returns whether it was registered.
    pub fn unregister(&self, agent_id: &str) -> bool {
        let (removed, ids) = {
            let mut agents = self.agents.write().unwrap_or_else(|err| err.into_inner());
            let removed = agents.remove(agent_id).is_some();
            (removed, agents.keys().cloned().collect::<Vec<_>>())
        };
        if removed {
            tracing::info!(agent_id, "backup agent unregistered");
            self.changes.send_replace(ids);
        }
        removed
    }

    #[must_use]
    pub fn get(&self, agent_id: &str) -> Option<Arc<dyn BackupAgent>> {
        let agents = self.agents.read().unwrap_or_else(|err| err.into_inner());
        agents.get(agent_id).cloned()
    }

    /// Snapshot of every registered agent, ordered by id.
    #[must_use]
    pub fn agents(&self) -> Vec<(String, Arc<dyn BackupAgent>)> {
        let agents = self.agents.read().unwrap_or_else(|err| err.into_inner());
        agents
            .iter()
            .map(|(id, agent)| (id.clone(), Arc::clone(agent)))
            .collect()
    }

    #[must_use]
    pub fn agent_ids(&self) -> Vec<String> {
        let agents = self.agents.read().unwrap_or_else(|err| err.into_inner());
        agents.keys().cloned().collect()
    }

    /// Receive the list of agent ids every time it changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Vec<String>> {
        self.changes.subscribe()
    }
}
