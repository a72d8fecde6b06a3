use vesta_core::{DeviceId, DeviceType, MeasurementValue, ParameterName};

use crate::{
    dispatch::{CampaignHandle, Dispatcher, RetryPolicy},
    error::DeviceError,
    store::{MeasurementStore, Sample},
};

/// State shared by every device type: identity, connectivity flags, the
/// measurement history and the command dispatcher.
#[derive(Debug)]
pub struct Device {
    id: DeviceId,
    device_type: DeviceType,
    description: Box<str>,
    connected: bool,
    controllable: bool,
    store: MeasurementStore,
    dispatcher: Dispatcher,
}

impl Device {
    pub fn new(
        device_type: DeviceType,
        description: impl Into<Box<str>>,
        store: MeasurementStore,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            id: dispatcher.device_id(),
            device_type,
            description: description.into(),
            connected: true,
            controllable: true,
            store,
            dispatcher,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn can_control(&self) -> bool {
        self.controllable
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn set_controllable(&mut self, controllable: bool) {
        self.controllable = controllable;
    }

    pub fn store(&self) -> &MeasurementStore {
        &self.store
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn begin_cycle(&mut self) {
        self.store.begin_cycle();
    }

    /// Stores an observation. When it becomes the newest value of its
    /// parameter it is also offered to the dispatcher, so a pending
    /// campaign whose command it reproduces counts as delivered.
    pub fn record(
        &mut self,
        parameter: impl Into<ParameterName>,
        value: MeasurementValue,
        timestamp: jiff::Timestamp,
    ) {
        let parameter = parameter.into();
        let observed = value.clone();

        if self.store.record(parameter.clone(), value, timestamp) {
            self.dispatcher.observe(parameter.as_str(), &observed);
        }
    }

    pub fn latest(&self, parameter: &str) -> Option<&Sample> {
        self.store.latest(parameter)
    }

    pub fn was_updated_this_cycle(&self, parameter: &str) -> bool {
        self.store.was_updated_this_cycle(parameter)
    }

    pub fn has_parameter(&self, parameter: &str) -> bool {
        self.store.contains(parameter)
    }

    pub fn latest_bool(&self, parameter: &str) -> Option<bool> {
        self.latest(parameter).and_then(|s| s.value.as_bool())
    }

    pub fn latest_number(&self, parameter: &str) -> Option<f64> {
        self.latest(parameter).and_then(|s| s.value.as_number())
    }

    /// True only if `parameter` was reported this cycle and its latest value
    /// is `expected`. A matching value without a fresh report is not a
    /// transition.
    pub fn just_became(&self, parameter: &str, expected: bool) -> bool {
        self.was_updated_this_cycle(parameter) && self.latest_bool(parameter) == Some(expected)
    }

    pub fn send_once(
        &self,
        parameter: impl Into<ParameterName>,
        value: impl Into<Box<str>>,
    ) -> Result<(), DeviceError> {
        self.ensure_controllable()?;
        self.dispatcher.send_once(parameter, value);
        Ok(())
    }

    pub fn send_reliably(
        &self,
        parameter: impl Into<ParameterName>,
        value: impl Into<Box<str>>,
    ) -> Result<CampaignHandle, DeviceError> {
        self.ensure_controllable()?;
        Ok(self.dispatcher.send_reliably(parameter, value))
    }

    pub fn send_reliably_with(
        &self,
        parameter: impl Into<ParameterName>,
        value: impl Into<Box<str>>,
        policy: RetryPolicy,
    ) -> Result<CampaignHandle, DeviceError> {
        self.ensure_controllable()?;
        Ok(self.dispatcher.send_reliably_with(parameter, value, policy))
    }

    /// No-op when nothing is in flight for `parameter`.
    pub fn cancel_reliable(&self, parameter: &str) -> bool {
        self.dispatcher.cancel_reliable(parameter)
    }

    fn ensure_controllable(&self) -> Result<(), DeviceError> {
        if self.controllable {
            Ok(())
        } else {
            Err(DeviceError::NotControllable(self.id))
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.dispatcher.cancel_all();
    }
}

/// Saved value used for save/restore semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Snapshot<T> {
    #[default]
    Empty,
    Captured(T),
}

impl<T> Snapshot<T> {
    /// Overwrites any previous capture.
    pub fn capture(&mut self, value: T) {
        *self = Snapshot::Captured(value);
    }

    /// Consumes the captured value, leaving the snapshot empty.
    pub fn take(&mut self) -> Option<T> {
        match std::mem::take(self) {
            Snapshot::Captured(value) => Some(value),
            Snapshot::Empty => None,
        }
    }

    pub fn is_captured(&self) -> bool {
        matches!(self, Snapshot::Captured(_))
    }

    pub fn get(&self) -> Option<&T> {
        match self {
            Snapshot::Captured(value) => Some(value),
            Snapshot::Empty => None,
        }
    }
}
