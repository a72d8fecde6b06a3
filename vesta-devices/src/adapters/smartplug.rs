use tracing::info;
use vesta_core::{DeviceType, MeasurementValue};

use crate::{
    device::{Device, Snapshot},
    dispatch::CampaignHandle,
    error::DeviceError,
};

#[derive(Debug)]
pub struct Smartplug {
    device: Device,
    saved: Snapshot<bool>,
}

impl Smartplug {
    pub const DEVICE_TYPES: &'static [DeviceType] = &[DeviceType(10035)];

    pub const OUTLET_STATUS: &'static str = "outletStatus";
    pub const POWER: &'static str = "power";
    pub const ENERGY: &'static str = "energy";

    pub fn new(device: Device) -> Self {
        Self {
            device,
            saved: Snapshot::Empty,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    pub fn is_command(&self, parameter: &str) -> bool {
        parameter == Self::OUTLET_STATUS
    }

    pub fn is_light(&self) -> bool {
        false
    }

    pub fn can_control_brightness(&self) -> bool {
        false
    }

    pub fn can_measure_power(&self) -> bool {
        self.device.has_parameter(Self::POWER)
    }

    pub fn can_measure_energy(&self) -> bool {
        self.device.has_parameter(Self::ENERGY)
    }

    pub fn is_on(&self) -> bool {
        self.device.latest_bool(Self::OUTLET_STATUS) == Some(true)
    }

    pub fn is_off(&self) -> bool {
        self.device.latest_bool(Self::OUTLET_STATUS) == Some(false)
    }

    /// Turned on during the current cycle.
    pub fn did_turn_on(&self) -> bool {
        self.device.just_became(Self::OUTLET_STATUS, true)
    }

    /// Turned off during the current cycle.
    pub fn did_turn_off(&self) -> bool {
        self.device.just_became(Self::OUTLET_STATUS, false)
    }

    pub fn current_power(&self) -> Option<f64> {
        self.device.latest_number(Self::POWER)
    }

    pub fn current_energy(&self) -> Option<f64> {
        self.device.latest_number(Self::ENERGY)
    }

    pub fn saved_state(&self) -> Option<bool> {
        self.saved.get().copied()
    }

    /// Turns the outlet on. With `reliably`, the command is retried until the
    /// plug reports it and replaces any earlier reliable command.
    pub fn on(&self, reliably: bool) -> Result<Option<CampaignHandle>, DeviceError> {
        self.switch(true, reliably)
    }

    pub fn off(&self, reliably: bool) -> Result<Option<CampaignHandle>, DeviceError> {
        self.switch(false, reliably)
    }

    /// Remembers the current outlet status for a later [`Smartplug::restore`].
    /// An outlet that never reported is saved as off.
    pub fn save(&mut self) -> Result<bool, DeviceError> {
        if !self.device.is_connected() {
            return Err(DeviceError::NotConnected(self.device.id()));
        }

        let state = self.is_on();
        self.saved.capture(state);

        info!(
            device_id = %self.device.id(),
            description = self.device.description(),
            saved_state = state,
            "smart plug state saved"
        );
        Ok(state)
    }

    /// Puts the outlet back into the saved state. The snapshot is consumed,
    /// so a second restore without a new save fails with `NothingSaved`.
    pub fn restore(&mut self, reliably: bool) -> Result<Option<CampaignHandle>, DeviceError> {
        if !self.device.can_control() {
            return Err(DeviceError::NotControllable(self.device.id()));
        }

        let state = self
            .saved
            .take()
            .ok_or(DeviceError::NothingSaved(self.device.id()))?;

        info!(device_id = %self.device.id(), restored_state = state, reliably, "restoring smart plug");
        self.switch(state, reliably)
    }

    /// Applies a raw value addressed to one of this plug's parameters.
    /// Returns `false` when the parameter is not a command.
    pub fn raw_command(&self, parameter: &str, value: &MeasurementValue) -> Result<bool, DeviceError> {
        if !self.is_command(parameter) {
            return Ok(false);
        }

        self.switch(value.as_bool().unwrap_or(false), false)?;
        Ok(true)
    }

    fn switch(&self, on: bool, reliably: bool) -> Result<Option<CampaignHandle>, DeviceError> {
        let value = if on { "1" } else { "0" };

        if reliably {
            self.device
                .send_reliably(Self::OUTLET_STATUS, value)
                .map(Some)
        } else {
            // A plain switch is still the newest command for the outlet.
            if self.device.can_control() {
                self.device.cancel_reliable(Self::OUTLET_STATUS);
            }
            self.device.send_once(Self::OUTLET_STATUS, value).map(|()| None)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use jiff::Timestamp;
    use vesta_core::{Command, DeviceId, DeviceType, MeasurementValue};

    use super::Smartplug;
    use crate::{
        device::Device,
        dispatch::{CampaignStatus, Dispatcher, RetryPolicy},
        error::DeviceError,
        store::MeasurementStore,
        transport::Transport,
    };

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Command>>,
    }

    impl RecordingTransport {
        fn values(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|c| c.value.to_string())
                .collect()
        }
    }

    impl Transport for RecordingTransport {
        fn send(&self, command: &Command) {
            self.sent.lock().unwrap().push(command.clone());
        }
    }

    fn plug() -> (Smartplug, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Dispatcher::new(
            DeviceId::new(),
            transport.clone(),
            RetryPolicy::fixed(3, Duration::from_secs(1)),
        );
        let device = Device::new(DeviceType(10035), "Lamp plug", MeasurementStore::new(), dispatcher);
        (Smartplug::new(device), transport)
    }

    fn report(plug: &mut Smartplug, parameter: &str, value: MeasurementValue, second: i64) {
        plug.device_mut()
            .record(parameter, value, Timestamp::from_second(second).unwrap());
    }

    #[test]
    fn unobserved_plug_is_neither_on_nor_off() {
        let (plug, _) = plug();
        assert!(!plug.is_on());
        assert!(!plug.is_off());
        assert!(!plug.did_turn_on());
        assert!(!plug.can_measure_power());
        assert_eq!(plug.current_power(), None);
        assert_eq!(plug.current_energy(), None);
    }

    #[test]
    fn status_and_power_views() {
        let (mut plug, _) = plug();
        report(&mut plug, Smartplug::OUTLET_STATUS, true.into(), 100);
        report(&mut plug, Smartplug::POWER, MeasurementValue::number(61.5).unwrap(), 100);

        assert!(plug.is_on());
        assert!(plug.did_turn_on());
        assert!(!plug.did_turn_off());
        assert!(plug.can_measure_power());
        assert!(!plug.can_measure_energy());
        assert_eq!(plug.current_power(), Some(61.5));

        report(&mut plug, Smartplug::OUTLET_STATUS, false.into(), 90);
        assert!(plug.is_on());

        plug.device_mut().begin_cycle();
        assert!(plug.is_on());
        assert!(!plug.did_turn_on());
    }

    #[test]
    fn on_and_off_send_raw_values() {
        let (plug, transport) = plug();
        assert!(plug.on(false).unwrap().is_none());
        assert!(plug.off(false).unwrap().is_none());
        assert_eq!(transport.values(), vec!["1", "0"]);
    }

    #[test]
    fn save_requires_connection() {
        let (mut plug, _) = plug();
        plug.device_mut().set_connected(false);
        assert_eq!(plug.save(), Err(DeviceError::NotConnected(plug.device().id())));
        assert_eq!(plug.saved_state(), None);
    }

    #[test]
    fn save_then_restore_acts_once() {
        let (mut plug, transport) = plug();
        report(&mut plug, Smartplug::OUTLET_STATUS, true.into(), 1);

        assert_eq!(plug.save(), Ok(true));
        report(&mut plug, Smartplug::OUTLET_STATUS, false.into(), 2);

        assert!(plug.restore(false).is_ok());
        assert_eq!(transport.values(), vec!["1"]);

        assert_eq!(
            plug.restore(false).unwrap_err(),
            DeviceError::NothingSaved(plug.device().id())
        );
        assert_eq!(transport.values(), vec!["1"]);
    }

    #[test]
    fn save_without_status_restores_off() {
        let (mut plug, transport) = plug();
        assert_eq!(plug.save(), Ok(false));
        plug.restore(false).unwrap();
        assert_eq!(transport.values(), vec!["0"]);
    }

    #[test]
    fn restore_requires_control() {
        let (mut plug, transport) = plug();
        plug.save().unwrap();
        plug.device_mut().set_controllable(false);

        assert!(matches!(plug.restore(false), Err(DeviceError::NotControllable(_))));
        assert!(transport.values().is_empty());
        assert_eq!(plug.saved_state(), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn reliable_off_supersedes_reliable_on() {
        let (mut plug, transport) = plug();

        let mut on = plug.on(true).unwrap().unwrap();
        let off = plug.off(true).unwrap().unwrap();
        assert_eq!(on.finished().await, CampaignStatus::Cancelled);

        report(&mut plug, Smartplug::OUTLET_STATUS, false.into(), 1);
        assert_eq!(off.status(), CampaignStatus::Acknowledged);
        assert!(plug.did_turn_off());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.values(), vec!["1", "0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn plain_off_cancels_pending_reliable_on() {
        let (plug, transport) = plug();

        let mut on = plug.on(true).unwrap().unwrap();
        assert!(plug.off(false).unwrap().is_none());
        assert_eq!(on.finished().await, CampaignStatus::Cancelled);
        assert!(plug.device().dispatcher().active_campaigns().is_empty());

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(transport.values(), vec!["1", "0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_plain_switch_keeps_reliable_campaign() {
        let (mut plug, _) = plug();

        let on = plug.on(true).unwrap().unwrap();
        plug.device_mut().set_controllable(false);
        let id = plug.device().id();
        assert!(matches!(plug.off(false), Err(DeviceError::NotControllable(refused)) if refused == id));
        assert_eq!(on.status(), CampaignStatus::Pending);
    }

    #[test]
    fn raw_command_maps_to_on_off() {
        let (plug, transport) = plug();
        assert_eq!(plug.raw_command(Smartplug::OUTLET_STATUS, &true.into()), Ok(true));
        assert_eq!(plug.raw_command(Smartplug::OUTLET_STATUS, &MeasurementValue::raw("0")), Ok(true));
        assert_eq!(plug.raw_command(Smartplug::POWER, &true.into()), Ok(false));
        assert_eq!(transport.values(), vec!["1", "0"]);
    }
}
