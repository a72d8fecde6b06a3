//! Reliable command delivery.
//!
//! Each device owns one [`Dispatcher`]. It keeps at most one active campaign
//! per parameter: a campaign resends its command on the [`RetryPolicy`]
//! schedule until it is acknowledged, cancelled, superseded by a newer
//! command for the same parameter, or runs out of attempts or time.
//!
//! All campaign state lives in a single table behind a mutex. Retry tasks
//! re-check their campaign id under that lock before every send, so a
//! supersede or cancel can never interleave with an in-flight retry.

mod campaign;
mod policy;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vesta_core::{CampaignId, Command, DeviceId, MeasurementValue, ParameterName};

use crate::transport::Transport;

pub use campaign::{CampaignHandle, CampaignSnapshot, CampaignStatus, DeliveryFailure};
pub use policy::RetryPolicy;

/// Upper bound for a single retry wait when the configured delay does not
/// fit in an `Instant`.
const MAX_RETRY_WAIT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

fn retry_at(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay).unwrap_or_else(|| now + MAX_RETRY_WAIT)
}

struct ActiveCampaign {
    id: CampaignId,
    value: Box<str>,
    attempts: u32,
    policy: RetryPolicy,
    next_retry_at: Instant,
    deadline: Option<Instant>,
    cancel: CancellationToken,
    status: watch::Sender<CampaignStatus>,
}

impl ActiveCampaign {
    fn next_wake(&self) -> Instant {
        match self.deadline {
            Some(deadline) => deadline.min(self.next_retry_at),
            None => self.next_retry_at,
        }
    }

    fn finish(self, status: CampaignStatus) {
        self.cancel.cancel();
        self.status.send_replace(status);
    }

    fn snapshot(&self, parameter: &ParameterName) -> CampaignSnapshot {
        CampaignSnapshot {
            id: self.id,
            parameter: parameter.clone(),
            value: self.value.clone(),
            attempts: self.attempts,
            status: *self.status.borrow(),
        }
    }
}

type CampaignTable = HashMap<ParameterName, ActiveCampaign>;

#[derive(Clone)]
pub struct Dispatcher {
    device_id: DeviceId,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    failures: Option<mpsc::UnboundedSender<DeliveryFailure>>,
    campaigns: Arc<Mutex<CampaignTable>>,
}

impl Dispatcher {
    pub fn new(device_id: DeviceId, transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            device_id,
            transport,
            policy,
            failures: None,
            campaigns: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Exhausted campaigns are reported on `failures`.
    pub fn with_failures(mut self, failures: mpsc::UnboundedSender<DeliveryFailure>) -> Self {
        self.failures = Some(failures);
        self
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Single attempt, no retry bookkeeping.
    pub fn send_once(&self, parameter: impl Into<ParameterName>, value: impl Into<Box<str>>) {
        let command = Command {
            device_id: self.device_id,
            parameter: parameter.into(),
            value: value.into(),
        };
        debug!(device_id = %self.device_id, parameter = %command.parameter, value = %command.value, "sending command once");
        self.transport.send(&command);
    }

    /// Starts a campaign with the dispatcher's default policy.
    pub fn send_reliably(
        &self,
        parameter: impl Into<ParameterName>,
        value: impl Into<Box<str>>,
    ) -> CampaignHandle {
        self.send_reliably_with(parameter, value, self.policy.clone())
    }

    /// Replaces any active campaign for `parameter`, sends the first attempt
    /// immediately and schedules the rest. Must be called within a tokio
    /// runtime.
    pub fn send_reliably_with(
        &self,
        parameter: impl Into<ParameterName>,
        value: impl Into<Box<str>>,
        policy: RetryPolicy,
    ) -> CampaignHandle {
        let parameter = parameter.into();
        let value = value.into();
        let id = CampaignId::new();
        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(CampaignStatus::Pending);

        {
            let mut table = self.table();

            if let Some(previous) = table.remove(&parameter) {
                info!(
                    device_id = %self.device_id,
                    %parameter,
                    campaign_id = %previous.id,
                    superseded_by = %id,
                    "reliable command superseded"
                );
                previous.finish(CampaignStatus::Cancelled);
            }

            let now = Instant::now();
            self.transport.send(&Command {
                device_id: self.device_id,
                parameter: parameter.clone(),
                value: value.clone(),
            });
            debug!(device_id = %self.device_id, %parameter, %value, campaign_id = %id, attempt = 1, "reliable command sent");

            table.insert(
                parameter.clone(),
                ActiveCampaign {
                    id,
                    value,
                    attempts: 1,
                    next_retry_at: retry_at(now, policy.delay_for_attempt(1)),
                    // A deadline past the end of time is no deadline.
                    deadline: policy.deadline.and_then(|d| now.checked_add(d)),
                    policy,
                    cancel: cancel.clone(),
                    status: status_tx,
                },
            );
        }

        tokio::spawn(self.clone().drive(parameter.clone(), id, cancel));

        CampaignHandle::new(id, parameter, status_rx)
    }

    /// Stops the active campaign for `parameter`, if any. Returns whether a
    /// campaign was cancelled; calling this with nothing active is a no-op.
    pub fn cancel_reliable(&self, parameter: &str) -> bool {
        let Some(campaign) = self.table().remove(parameter) else {
            return false;
        };

        info!(device_id = %self.device_id, parameter, campaign_id = %campaign.id, "reliable command cancelled");
        campaign.finish(CampaignStatus::Cancelled);
        true
    }

    /// Transport-level acknowledgement for `parameter`. Late acknowledgements
    /// for campaigns that already ended are ignored.
    pub fn acknowledge(&self, parameter: &str) -> bool {
        let Some(campaign) = self.table().remove(parameter) else {
            debug!(device_id = %self.device_id, parameter, "acknowledgement without active campaign");
            return false;
        };

        info!(device_id = %self.device_id, parameter, campaign_id = %campaign.id, attempts = campaign.attempts, "reliable command acknowledged");
        campaign.finish(CampaignStatus::Acknowledged);
        true
    }

    /// Treats a fresh observation that reproduces the commanded value as an
    /// acknowledgement.
    pub fn observe(&self, parameter: &str, value: &MeasurementValue) -> bool {
        let mut table = self.table();

        let satisfied = table
            .get(parameter)
            .is_some_and(|campaign| value.satisfies(&campaign.value));
        if !satisfied {
            return false;
        }

        if let Some(campaign) = table.remove(parameter) {
            info!(device_id = %self.device_id, parameter, campaign_id = %campaign.id, attempts = campaign.attempts, "reliable command confirmed by measurement");
            campaign.finish(CampaignStatus::Acknowledged);
        }
        true
    }

    pub fn campaign_for(&self, parameter: &str) -> Option<CampaignSnapshot> {
        self.table()
            .get_key_value(parameter)
            .map(|(parameter, campaign)| campaign.snapshot(parameter))
    }

    pub fn active_campaigns(&self) -> Vec<CampaignSnapshot> {
        self.table()
            .iter()
            .map(|(parameter, campaign)| campaign.snapshot(parameter))
            .collect()
    }

    /// Cancels every active campaign, e.g. when the device goes away.
    pub fn cancel_all(&self) {
        let drained: Vec<_> = self.table().drain().collect();
        for (parameter, campaign) in drained {
            debug!(device_id = %self.device_id, %parameter, campaign_id = %campaign.id, "reliable command dropped");
            campaign.finish(CampaignStatus::Cancelled);
        }
    }

    fn table(&self) -> MutexGuard<'_, CampaignTable> {
        self.campaigns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn drive(self, parameter: ParameterName, id: CampaignId, cancel: CancellationToken) {
        loop {
            let wake_at = match self.table().get(&parameter) {
                Some(campaign) if campaign.id == id => campaign.next_wake(),
                _ => return,
            };

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep_until(wake_at) => {}
            }

            if !self.tick(&parameter, id) {
                return;
            }
        }
    }

    /// One scheduler step for campaign `id`. Returns `false` once the
    /// campaign is no longer active.
    fn tick(&self, parameter: &ParameterName, id: CampaignId) -> bool {
        let mut table = self.table();

        let Some(campaign) = table.get_mut(parameter).filter(|c| c.id == id) else {
            return false;
        };

        let now = Instant::now();
        let past_deadline = campaign.deadline.is_some_and(|deadline| now >= deadline);
        let out_of_attempts = now >= campaign.next_retry_at
            && campaign.attempts >= campaign.policy.max_attempts;

        if past_deadline || out_of_attempts {
            let Some(campaign) = table.remove(parameter) else {
                return false;
            };
            drop(table);
            self.exhaust(parameter, campaign);
            return false;
        }

        if now < campaign.next_retry_at {
            return true;
        }

        campaign.attempts += 1;
        let delay = campaign.policy.delay_for_attempt(campaign.attempts);
        campaign.next_retry_at = retry_at(now, delay);
        debug!(device_id = %self.device_id, %parameter, campaign_id = %id, attempt = campaign.attempts, "reliable command retried");
        self.transport.send(&Command {
            device_id: self.device_id,
            parameter: parameter.clone(),
            value: campaign.value.clone(),
        });

        true
    }

    fn exhaust(&self, parameter: &ParameterName, campaign: ActiveCampaign) {
        let failure = DeliveryFailure {
            campaign_id: campaign.id,
            device_id: self.device_id,
            parameter: parameter.clone(),
            value: campaign.value.clone(),
            attempts: campaign.attempts,
        };
        warn!(device_id = %self.device_id, %parameter, campaign_id = %campaign.id, attempts = campaign.attempts, "reliable command exhausted");
        campaign.finish(CampaignStatus::Exhausted);

        if let Some(failures) = &self.failures
            && failures.send(failure).is_err()
        {
            debug!(device_id = %self.device_id, %parameter, "delivery failure receiver dropped");
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("device_id", &self.device_id)
            .field("policy", &self.policy)
            .field("active", &self.table().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use tokio::sync::mpsc;
    use vesta_core::{Command, DeviceId, MeasurementValue};

    use super::{CampaignStatus, Dispatcher, RetryPolicy};
    use crate::transport::Transport;

    #[derive(Default)]
    struct DroppingTransport {
        sent: Mutex<Vec<Command>>,
    }

    impl DroppingTransport {
        fn sent(&self) -> Vec<Command> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Transport for DroppingTransport {
        fn send(&self, command: &Command) {
            self.sent.lock().unwrap().push(command.clone());
        }
    }

    fn dispatcher() -> (Dispatcher, Arc<DroppingTransport>) {
        let transport = Arc::new(DroppingTransport::default());
        let policy = RetryPolicy::fixed(3, Duration::from_secs(1));
        (
            Dispatcher::new(DeviceId::new(), transport.clone(), policy),
            transport,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts() {
        let (dispatcher, transport) = dispatcher();
        let (failures_tx, mut failures) = mpsc::unbounded_channel();
        let dispatcher = dispatcher.with_failures(failures_tx);

        let mut handle = dispatcher.send_reliably("outletStatus", "1");
        assert_eq!(handle.finished().await, CampaignStatus::Exhausted);

        assert_eq!(transport.sent().len(), 3);
        assert!(dispatcher.campaign_for("outletStatus").is_none());

        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.campaign_id, handle.id());
        assert_eq!(failure.attempts, 3);
        assert_eq!(&*failure.value, "1");

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.sent().len(), 3);
        assert!(failures.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn late_acknowledgement_after_exhaustion_is_ignored() {
        let (dispatcher, transport) = dispatcher();
        let (failures_tx, mut failures) = mpsc::unbounded_channel();
        let dispatcher = dispatcher.with_failures(failures_tx);

        let mut handle = dispatcher.send_reliably("outletStatus", "1");
        assert_eq!(handle.finished().await, CampaignStatus::Exhausted);
        assert!(failures.recv().await.is_some());

        assert!(!dispatcher.acknowledge("outletStatus"));
        assert!(!dispatcher.observe("outletStatus", &MeasurementValue::Bool(true)));
        assert_eq!(handle.status(), CampaignStatus::Exhausted);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(failures.try_recv().is_err());
        assert_eq!(transport.sent().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn supersede_at_retry_instant_silences_old_campaign() {
        let (dispatcher, transport) = dispatcher();
        let (failures_tx, mut failures) = mpsc::unbounded_channel();
        let dispatcher = dispatcher.with_failures(failures_tx);

        let mut first = dispatcher.send_reliably("outletStatus", "1");
        tokio::time::sleep(Duration::from_secs(1)).await;
        let second = dispatcher.send_reliably("outletStatus", "0");

        assert_eq!(first.finished().await, CampaignStatus::Cancelled);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        // The old retry due at t=1 either ran before the supersede or not at
        // all; nothing from it follows the first "0".
        let values: Vec<String> = transport.sent().iter().map(|c| c.value.to_string()).collect();
        let ones = values.iter().take_while(|v| *v == "1").count();
        assert!((1..=2).contains(&ones), "{values:?}");
        assert_eq!(&values[ones..], ["0", "0"]);

        assert_eq!(second.status(), CampaignStatus::Pending);
        assert_eq!(dispatcher.active_campaigns().len(), 1);
        assert!(failures.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_policy_durations_do_not_overflow() {
        let transport = Arc::new(DroppingTransport::default());
        let policy = RetryPolicy::fixed(3, Duration::MAX).with_deadline(Duration::MAX);
        let dispatcher = Dispatcher::new(DeviceId::new(), transport.clone(), policy);

        let handle = dispatcher.send_reliably("outletStatus", "1");
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(handle.status(), CampaignStatus::Pending);
        assert_eq!(transport.sent().len(), 1);
        assert!(dispatcher.cancel_reliable("outletStatus"));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cuts_campaign_short() {
        let transport = Arc::new(DroppingTransport::default());
        let policy = RetryPolicy::fixed(100, Duration::from_secs(1))
            .with_deadline(Duration::from_millis(2500));
        let dispatcher = Dispatcher::new(DeviceId::new(), transport.clone(), policy);

        let mut handle = dispatcher.send_reliably("outletStatus", "0");
        assert_eq!(handle.finished().await, CampaignStatus::Exhausted);

        // t=0, t=1, t=2; the deadline fires before t=3.
        assert_eq!(transport.sent().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledgement_stops_retries() {
        let (dispatcher, transport) = dispatcher();

        let mut handle = dispatcher.send_reliably("outletStatus", "1");
        assert!(dispatcher.acknowledge("outletStatus"));
        assert_eq!(handle.finished().await, CampaignStatus::Acknowledged);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.sent().len(), 1);
        assert!(!dispatcher.acknowledge("outletStatus"));
    }

    #[tokio::test(start_paused = true)]
    async fn matching_observation_acknowledges() {
        let (dispatcher, _transport) = dispatcher();

        let handle = dispatcher.send_reliably("outletStatus", "1");
        assert!(!dispatcher.observe("outletStatus", &MeasurementValue::Bool(false)));
        assert_eq!(handle.status(), CampaignStatus::Pending);

        assert!(dispatcher.observe("outletStatus", &MeasurementValue::Bool(true)));
        assert_eq!(handle.status(), CampaignStatus::Acknowledged);
        assert!(dispatcher.active_campaigns().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_command_supersedes() {
        let (dispatcher, transport) = dispatcher();

        let mut first = dispatcher.send_reliably("outletStatus", "1");
        let second = dispatcher.send_reliably("outletStatus", "0");

        assert_eq!(first.finished().await, CampaignStatus::Cancelled);
        assert_eq!(second.status(), CampaignStatus::Pending);

        let active = dispatcher.active_campaigns();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id());
        assert_eq!(&*active[0].value, "0");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let values: Vec<String> = transport.sent().iter().map(|c| c.value.to_string()).collect();
        assert_eq!(values, vec!["1", "0", "0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let (dispatcher, transport) = dispatcher();

        assert!(!dispatcher.cancel_reliable("outletStatus"));

        let mut handle = dispatcher.send_reliably("outletStatus", "1");
        assert!(dispatcher.cancel_reliable("outletStatus"));
        assert!(!dispatcher.cancel_reliable("outletStatus"));
        assert_eq!(handle.finished().await, CampaignStatus::Cancelled);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn campaigns_are_keyed_by_parameter() {
        let (dispatcher, _transport) = dispatcher();

        let status = dispatcher.send_reliably("outletStatus", "1");
        let level = dispatcher.send_reliably("currentLevel", "40");

        assert_eq!(dispatcher.active_campaigns().len(), 2);
        assert!(dispatcher.cancel_reliable("currentLevel"));
        assert_eq!(status.status(), CampaignStatus::Pending);
        assert_eq!(level.status(), CampaignStatus::Cancelled);

        dispatcher.cancel_all();
        assert_eq!(status.status(), CampaignStatus::Cancelled);
    }
}
