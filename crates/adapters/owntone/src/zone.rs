//! Services of a zone, one per server output.

use plughub_domain::error::{NotFoundError, PlugHubError};
use plughub_domain::service::ServiceCall;

use crate::api::{OwnToneClient, Output};
use crate::state::{DEFAULT_UNMUTE_VOLUME, Shared, volume_from_level};

pub struct Zone<'a> {
    pub client: &'a OwnToneClient,
    pub shared: &'a Shared,
    pub output_id: &'a str,
}

impl Zone<'_> {
    fn output(&self) -> Result<Output, NotFoundError> {
        self.shared
            .snapshot()
            .outputs
            .iter()
            .find(|output| output.id == self.output_id)
            .cloned()
            .ok_or_else(|| NotFoundError {
                entity: "Output",
                id: self.output_id.to_string(),
            })
    }

    /// # Errors
    ///
    /// Returns [`NotFoundError`] when the output is gone, a validation error
    /// for unknown services and an integration error when the server rejects
    /// the command.
    #[tracing::instrument(skip_all, fields(output_id = self.output_id, service = %call.service))]
    pub async fn handle(&self, call: &ServiceCall) -> Result<(), PlugHubError> {
        let output = self.output()?;
        match call.service.as_str() {
            "turn_on" => self.select(true).await?,
            "turn_off" => self.select(false).await?,
            "toggle" => self.select(!output.selected).await?,
            "volume_set" => {
                let level: f64 = call.param("volume_level")?;
                self.set_volume(volume_from_level(level)).await?;
            }
            "volume_mute" => {
                let muted: bool = call.param("is_volume_muted")?;
                if muted && output.volume == 0 {
                    return Ok(());
                }
                let volume = {
                    let mut snapshot = self.shared.snapshot();
                    if muted {
                        snapshot
                            .zone_last_volume
                            .insert(self.output_id.to_string(), output.volume);
                        0
                    } else {
                        snapshot
                            .zone_last_volume
                            .remove(self.output_id)
                            .unwrap_or(DEFAULT_UNMUTE_VOLUME)
                    }
                };
                self.set_volume(volume).await?;
            }
            _ => return Err(call.unsupported().into()),
        }
        Ok(())
    }

    async fn select(&self, selected: bool) -> Result<(), PlugHubError> {
        self.client
            .change_output(self.output_id, Some(selected), None)
            .await?;
        Ok(())
    }

    async fn set_volume(&self, volume: u8) -> Result<(), PlugHubError> {
        self.client.set_volume(volume, Some(self.output_id)).await?;
        Ok(())
    }
}
