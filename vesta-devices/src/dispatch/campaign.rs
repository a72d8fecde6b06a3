use tokio::sync::watch;
use vesta_core::{CampaignId, DeviceId, ParameterName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CampaignStatus {
    Pending,
    Acknowledged,
    /// Cancelled explicitly or superseded by a newer command for the same
    /// parameter. Not a failure.
    Cancelled,
    /// Attempt budget or deadline ran out without an acknowledgement.
    Exhausted,
}

impl CampaignStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CampaignStatus::Pending)
    }
}

/// Point-in-time view of an active campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignSnapshot {
    pub id: CampaignId,
    pub parameter: ParameterName,
    pub value: Box<str>,
    pub attempts: u32,
    pub status: CampaignStatus,
}

/// Caller's side of a reliable send.
#[derive(Debug, Clone)]
pub struct CampaignHandle {
    id: CampaignId,
    parameter: ParameterName,
    status: watch::Receiver<CampaignStatus>,
}

impl CampaignHandle {
    pub(crate) fn new(
        id: CampaignId,
        parameter: ParameterName,
        status: watch::Receiver<CampaignStatus>,
    ) -> Self {
        Self {
            id,
            parameter,
            status,
        }
    }

    pub fn id(&self) -> CampaignId {
        self.id
    }

    pub fn parameter(&self) -> &ParameterName {
        &self.parameter
    }

    pub fn status(&self) -> CampaignStatus {
        *self.status.borrow()
    }

    /// Waits until the campaign reaches a terminal status. If the owning
    /// dispatcher goes away first, the last known status is returned.
    pub async fn finished(&mut self) -> CampaignStatus {
        let finished = self
            .status
            .wait_for(CampaignStatus::is_terminal)
            .await
            .map(|status| *status);

        match finished {
            Ok(status) => status,
            Err(_) => *self.status.borrow(),
        }
    }
}

/// A reliable command that ran out of attempts or time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "command {parameter}={value} to device {device_id} not acknowledged after {attempts} attempts"
)]
pub struct DeliveryFailure {
    pub campaign_id: CampaignId,
    pub device_id: DeviceId,
    pub parameter: ParameterName,
    pub value: Box<str>,
    pub attempts: u32,
}
