//! Backup manager: one view over every registered backup agent.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;

use plughub_domain::backup::AgentBackup;
use plughub_domain::error::{NotFoundError, PlugHubError};

use crate::backup_registry::BackupAgentRegistry;
use crate::ports::{BackupAgentError, ByteStream};

/// Where a backup is stored, as seen by one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentBackupStatus {
    pub size: u64,
    pub protected: bool,
}

/// A backup and every agent that holds a copy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagerBackup {
    #[serde(flatten)]
    pub backup: AgentBackup,
    pub agents: BTreeMap<String, AgentBackupStatus>,
}

/// Result of listing backups across agents.
///
/// A failing agent does not fail the listing: its error is reported in
/// `agent_errors` and the other agents' backups are still returned.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackupInfo {
    pub backups: Vec<ManagerBackup>,
    pub agent_errors: BTreeMap<String, String>,
}

/// Aggregates the agents of the [`BackupAgentRegistry`].
#[derive(Clone)]
pub struct BackupManager {
    registry: Arc<BackupAgentRegistry>,
}

impl BackupManager {
    #[must_use]
    pub fn new(registry: Arc<BackupAgentRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<BackupAgentRegistry> {
        &self.registry
    }

    /// Ids and display names of the registered agents.
    #[must_use]
    pub fn agents(&self) -> Vec<(String, String)> {
        self.registry
            .agents()
            .into_iter()
            .map(|(id, agent)| {
                let name = agent.name().to_string();
                (id, name)
            })
            .collect()
    }

    /// List backups of every agent, merged by `backup_id`.
    pub async fn list_backups(&self) -> BackupInfo {
        let agents = self.registry.agents();
        let results = join_all(agents.iter().map(|(_, agent)| agent.list_backups())).await;

        let mut merged: BTreeMap<String, ManagerBackup> = BTreeMap::new();
        let mut agent_errors = BTreeMap::new();
        for ((agent_id, _), result) in agents.iter().zip(results) {
            match result {
                Ok(backups) => {
                    for backup in backups {
                        let status = AgentBackupStatus {
                            size: backup.size,
                            protected: backup.protected,
                        };
                        merged
                            .entry(backup.backup_id.clone())
                            .or_insert_with(|| ManagerBackup {
                                backup,
                                agents: BTreeMap::new(),
                            })
                            .agents
                            .insert(agent_id.clone(), status);
                    }
                }
                Err(err) => {
                    tracing::warn!(agent_id, error = %err, "backup agent failed to list backups");
                    agent_errors.insert(agent_id.clone(), err.to_string());
                }
            }
        }

        let mut backups: Vec<ManagerBackup> = merged.into_values().collect();
        backups.sort_by(|a, b| b.backup.date.cmp(&a.backup.date));
        BackupInfo {
            backups,
            agent_errors,
        }
    }

    /// One backup and the agents holding it.
    ///
    /// # Errors
    ///
    /// Returns [`PlugHubError::NotFound`] when no agent holds the backup.
    pub async fn get_backup(&self, backup_id: &str) -> Result<ManagerBackup, PlugHubError> {
        let agents = self.registry.agents();
        let results = join_all(agents.iter().map(|(_, agent)| agent.get_backup(backup_id))).await;

        let mut found: Option<ManagerBackup> = None;
        for ((agent_id, _), result) in agents.iter().zip(results) {
            match result {
                Ok(backup) => {
                    let status = AgentBackupStatus {
                        size: backup.size,
                        protected: backup.protected,
                    };
                    found
                        .get_or_insert_with(|| ManagerBackup {
                            backup,
                            agents: BTreeMap::new(),
                        })
                        .agents
                        .insert(agent_id.clone(), status);
                }
                Err(BackupAgentError::NotFound(_)) => {}
                Err(err) => {
                    tracing::warn!(agent_id, backup_id, error = %err, "backup agent failed to get backup");
                }
            }
        }
        found.ok_or_else(|| backup_not_found(backup_id))
    }

    /// Delete a backup from every agent holding it.
    ///
    /// Agents that do not hold the backup are skipped. Returns the errors of
    /// agents that failed, keyed by agent id.
    pub async fn delete_backup(&self, backup_id: &str) -> BTreeMap<String, String> {
        let agents = self.registry.agents();
        let results =
            join_all(agents.iter().map(|(_, agent)| agent.delete_backup(backup_id))).await;

        let mut agent_errors = BTreeMap::new();
        for ((agent_id, _), result) in agents.iter().zip(results) {
            match result {
                Ok(()) => tracing::info!(agent_id, backup_id, "backup deleted"),
                Err(BackupAgentError::NotFound(_)) => {}
                Err(err) => {
                    tracing::warn!(agent_id, backup_id, error = %err, "backup agent failed to delete backup");
                    agent_errors.insert(agent_id.clone(), err.to_string());
                }
            }
        }
        agent_errors
    }

    /// Upload one archive to several agents. `open_stream` is called once
    /// per agent so each gets its own reader.
    ///
    /// # Errors
    ///
    /// Returns [`PlugHubError::NotFound`] for an unknown agent id. Upload
    /// failures are reported per agent in the returned map.
    pub async fn upload_backup<F>(
        &self,
        agent_ids: &[String],
        backup: &AgentBackup,
        open_stream: F,
    ) -> Result<BTreeMap<String, String>, PlugHubError>
    where
        F: Fn() -> ByteStream,
    {
        backup.validate()?;
        let mut targets = Vec::with_capacity(agent_ids.len());
        for agent_id in agent_ids {
            let agent = self.registry.get(agent_id).ok_or_else(|| agent_not_found(agent_id))?;
            targets.push((agent_id, agent));
        }
        let results = join_all(
            targets
                .iter()
                .map(|(_, agent)| agent.upload_backup(open_stream(), backup.clone())),
        )
        .await;

        let mut agent_errors = BTreeMap::new();
        for ((agent_id, _), result) in targets.iter().zip(results) {
            match result {
                Ok(()) => tracing::info!(agent_id, backup_id = %backup.backup_id, "backup uploaded"),
                Err(err) => {
                    tracing::error!(agent_id, backup_id = %backup.backup_id, error = %err, "backup upload failed");
                    agent_errors.insert((*agent_id).clone(), err.to_string());
                }
            }
        }
        Ok(agent_errors)
    }

    /// Stream one upload into a single agent.
    ///
    /// # Errors
    ///
    /// Returns [`PlugHubError::Validation`] for incomplete metadata,
    /// [`PlugHubError::NotFound`] for an unknown agent and
    /// [`PlugHubError::Integration`] when the agent fails to store it.
    pub async fn upload_to_agent(
        &self,
        agent_id: &str,
        backup: AgentBackup,
        stream: ByteStream,
    ) -> Result<(), PlugHubError> {
        backup.validate()?;
        let agent = self.registry.get(agent_id).ok_or_else(|| agent_not_found(agent_id))?;
        let backup_id = backup.backup_id.clone();
        agent.upload_backup(stream, backup).await.inspect_err(|err| {
            tracing::error!(agent_id, backup_id, error = %err, "backup upload failed");
        })?;
        tracing::info!(agent_id, backup_id, "backup uploaded");
        Ok(())
    }

    /// Stream a backup archive from one agent.
    ///
    /// # Errors
    ///
    /// Returns [`PlugHubError::NotFound`] for an unknown agent or backup.
    pub async fn download_backup(
        &self,
        agent_id: &str,
        backup_id: &str,
    ) -> Result<(AgentBackup, ByteStream), PlugHubError> {
        let agent = self.registry.get(agent_id).ok_or_else(|| agent_not_found(agent_id))?;
        let backup = agent.get_backup(backup_id).await?;
        let stream = agent.download_backup(backup_id).await?;
        Ok((backup, stream))
    }
}

fn agent_not_found(agent_id: &str) -> PlugHubError {
    NotFoundError {
        entity: "BackupAgent",
        id: agent_id.to_string(),
    }
    .into()
}

fn backup_not_found(backup_id: &str) -> PlugHubError {
    NotFoundError {
        entity: "Backup",
        id: backup_id.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryBackupAgent, backup};
    use bytes::Bytes;
    use futures::{StreamExt, TryStreamExt};

    fn manager_with(agents: Vec<(&str, MemoryBackupAgent)>) -> (BackupManager, Vec<Arc<MemoryBackupAgent>>) {
        let registry = Arc::new(BackupAgentRegistry::new());
        let mut handles = Vec::new();
        for (id, agent) in agents {
            let agent = Arc::new(agent);
            registry.register(id.to_string(), Arc::clone(&agent) as _);
            handles.push(agent);
        }
        (BackupManager::new(registry), handles)
    }

    #[tokio::test]
    async fn should_merge_same_backup_across_agents() {
        let (manager, _) = manager_with(vec![
            ("backblaze.a", MemoryBackupAgent::with_backup(backup("b1"), b"data")),
            ("remote_dir.b", MemoryBackupAgent::with_backup(backup("b1"), b"data")),
        ]);

        let info = manager.list_backups().await;

        assert_eq!(info.backups.len(), 1);
        let agents: Vec<&String> = info.backups[0].agents.keys().collect();
        assert_eq!(agents, vec!["backblaze.a", "remote_dir.b"]);
        assert!(info.agent_errors.is_empty());
    }

    #[tokio::test]
    async fn should_report_failing_agent_without_hiding_others() {
        let (manager, _) = manager_with(vec![
            ("backblaze.a", MemoryBackupAgent::failing()),
            ("remote_dir.b", MemoryBackupAgent::with_backup(backup("b1"), b"data")),
        ]);

        let info = manager.list_backups().await;

        assert_eq!(info.backups.len(), 1);
        assert_eq!(
            info.agent_errors.get("backblaze.a").map(String::as_str),
            Some("Failed to list backups")
        );
    }

    #[tokio::test]
    async fn should_return_not_found_when_no_agent_holds_backup() {
        let (manager, _) = manager_with(vec![("backblaze.a", MemoryBackupAgent::default())]);
        let result = manager.get_backup("missing").await;
        assert!(matches!(result, Err(PlugHubError::NotFound(_))));
    }

    #[tokio::test]
    async fn should_delete_backup_from_every_holder() {
        let (manager, agents) = manager_with(vec![
            ("backblaze.a", MemoryBackupAgent::with_backup(backup("b1"), b"data")),
            ("remote_dir.b", MemoryBackupAgent::default()),
        ]);

        let errors = manager.delete_backup("b1").await;

        assert!(errors.is_empty());
        assert!(!agents[0].contains("b1"));
    }

    #[tokio::test]
    async fn should_upload_to_each_agent_with_fresh_stream() {
        let (manager, agents) = manager_with(vec![
            ("backblaze.a", MemoryBackupAgent::default()),
            ("remote_dir.b", MemoryBackupAgent::default()),
        ]);
        let ids = vec!["backblaze.a".to_string(), "remote_dir.b".to_string()];

        let errors = manager
            .upload_backup(&ids, &backup("b1"), || {
                futures::stream::iter([Ok(Bytes::from_static(b"da")), Ok(Bytes::from_static(b"ta"))])
                    .boxed()
            })
            .await
            .unwrap();

        assert!(errors.is_empty());
        assert!(agents.iter().all(|agent| agent.contains("b1")));
        let (_, stream) = manager.download_backup("remote_dir.b", "b1").await.unwrap();
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"data");
    }

    #[tokio::test]
    async fn should_reject_upload_to_unknown_agent() {
        let (manager, _) = manager_with(vec![]);
        let result = manager
            .upload_backup(&["nope.x".to_string()], &backup("b1"), || {
                futures::stream::empty().boxed()
            })
            .await;
        assert!(matches!(result, Err(PlugHubError::NotFound(_))));
    }

    #[tokio::test]
    async fn should_stream_single_upload_into_agent() {
        let (manager, agents) = manager_with(vec![("remote_dir.b", MemoryBackupAgent::default())]);
        let stream = futures::stream::iter([Ok(Bytes::from_static(b"te")), Ok(Bytes::from_static(b"st"))]).boxed();

        manager
            .upload_to_agent("remote_dir.b", backup("b1"), stream)
            .await
            .unwrap();

        assert!(agents[0].contains("b1"));
        let (_, stream) = manager.download_backup("remote_dir.b", "b1").await.unwrap();
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"test");
    }

    #[tokio::test]
    async fn should_reject_single_upload_without_name() {
        let (manager, agents) = manager_with(vec![("remote_dir.b", MemoryBackupAgent::default())]);
        let mut nameless = backup("b1");
        nameless.name = String::new();

        let result = manager
            .upload_to_agent("remote_dir.b", nameless, futures::stream::empty().boxed())
            .await;

        assert!(matches!(result, Err(PlugHubError::Validation(_))));
        assert!(!agents[0].contains("b1"));
    }

    #[tokio::test]
    async fn should_return_not_found_when_downloading_from_unknown_agent() {
        let (manager, _) = manager_with(vec![]);
        let result = manager.download_backup("nope.x", "b1").await;
        assert!(matches!(result, Err(PlugHubError::NotFound(_))));
    }
}
