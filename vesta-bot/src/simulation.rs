//! Simulated devices for running the bot without real hardware.
//!
//! [`SimulatedTransport`] loses a configurable share of commands and queues
//! the rest. [`MockTelemetrySource`] applies the queued commands to its
//! simulated plugs and reports the resulting state, plus power, energy and
//! random button presses, once per cycle.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ordered_float::NotNan;
use rand::Rng;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use vesta_core::{Command, DeviceId, DeviceType, Measurement, MeasurementBatch, MeasurementValue};
use vesta_devices::{
    Button, ChannelTransport, DeviceRegistration, Gateway, Smartplug, TelemetrySource, Transport,
};

/// Transport that drops commands at random before they reach the
/// simulated devices.
pub struct SimulatedTransport {
    inner: ChannelTransport,
    drop_ratio: f64,
}

impl SimulatedTransport {
    pub fn new(drop_ratio: f64, queue_size: usize) -> (Self, mpsc::Receiver<Command>) {
        let (inner, rx) = ChannelTransport::new(queue_size.max(1));
        let drop_ratio = if drop_ratio.is_nan() {
            0.0
        } else {
            drop_ratio.clamp(0.0, 1.0)
        };
        let transport = Self { inner, drop_ratio };
        (transport, rx)
    }
}

impl Transport for SimulatedTransport {
    fn send(&self, command: &Command) {
        if rand::rng().random_bool(self.drop_ratio) {
            debug!(device_id = %command.device_id, parameter = %command.parameter, value = %command.value, "simulated transport lost command");
            return;
        }
        self.inner.send(command);
    }
}

#[derive(Debug, Error)]
pub enum MockTelemetryError {
    #[error("telemetry source already started")]
    AlreadyStarted,
}

struct MockPlug {
    device_id: DeviceId,
    on: bool,
    energy_kwh: f64,
    /// The plug reports its status when it changes and otherwise only
    /// every few cycles.
    report_status: bool,
}

impl MockPlug {
    fn apply(&mut self, command: &Command) {
        if command.parameter.as_str() != Smartplug::OUTLET_STATUS {
            return;
        }
        if let Some(on) = MeasurementValue::raw(command.value.clone()).as_bool() {
            self.report_status = true;
            self.on = on;
        }
    }

    fn generate(&mut self, rng: &mut impl Rng, now: jiff::Timestamp, out: &mut Vec<Measurement>) {
        let watts = if self.on {
            rng.random_range(40.0..120.0)
        } else {
            0.0
        };
        self.energy_kwh += watts / 3_600_000.0;

        if self.report_status || rng.random_ratio(1, 10) {
            out.push(measurement(self.device_id, Smartplug::OUTLET_STATUS, self.on.into(), now));
            self.report_status = false;
        }
        if let Some(value) = number(watts) {
            out.push(measurement(self.device_id, Smartplug::POWER, value, now));
        }
        if let Some(value) = number(self.energy_kwh) {
            out.push(measurement(self.device_id, Smartplug::ENERGY, value, now));
        }
    }
}

struct MockButton {
    device_id: DeviceId,
    pressed: bool,
}

impl MockButton {
    fn generate(&mut self, rng: &mut impl Rng, now: jiff::Timestamp, out: &mut Vec<Measurement>) {
        if self.pressed || rng.random_ratio(1, 20) {
            self.pressed = !self.pressed;
            out.push(measurement(self.device_id, Button::BUTTON_STATUS, self.pressed.into(), now));
        }
    }
}

fn measurement(
    device_id: DeviceId,
    parameter: &str,
    value: MeasurementValue,
    timestamp: jiff::Timestamp,
) -> Measurement {
    Measurement {
        device_id,
        parameter: parameter.into(),
        value,
        timestamp,
    }
}

fn number(value: f64) -> Option<MeasurementValue> {
    NotNan::new((value * 1000.0).round() / 1000.0)
        .ok()
        .map(MeasurementValue::Number)
}

/// Telemetry feed backed by simulated plugs, buttons and one gateway.
pub struct MockTelemetrySource {
    gateway: DeviceId,
    plugs: Vec<DeviceId>,
    buttons: Vec<DeviceId>,
    interval: Duration,
    commands: Mutex<Option<mpsc::Receiver<Command>>>,
}

impl MockTelemetrySource {
    pub fn new(
        plug_count: usize,
        button_count: usize,
        interval: Duration,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        Self {
            gateway: DeviceId::new(),
            plugs: (0..plug_count).map(|_| DeviceId::new()).collect(),
            buttons: (0..button_count).map(|_| DeviceId::new()).collect(),
            interval,
            commands: Mutex::new(Some(commands)),
        }
    }

    pub fn plugs(&self) -> &[DeviceId] {
        &self.plugs
    }

    pub fn buttons(&self) -> &[DeviceId] {
        &self.buttons
    }

    /// Registrations for every simulated device.
    pub fn registrations(&self) -> Vec<DeviceRegistration> {
        let gateway = registration(self.gateway, Gateway::DEVICE_TYPES[0], "Gateway".into());
        let plugs = self
            .plugs
            .iter()
            .enumerate()
            .map(|(i, id)| registration(*id, Smartplug::DEVICE_TYPES[0], format!("Plug {}", i + 1)));
        let buttons = self
            .buttons
            .iter()
            .enumerate()
            .map(|(i, id)| registration(*id, Button::DEVICE_TYPES[0], format!("Button {}", i + 1)));

        std::iter::once(gateway).chain(plugs).chain(buttons).collect()
    }
}

fn registration(id: DeviceId, device_type: DeviceType, description: String) -> DeviceRegistration {
    DeviceRegistration {
        id,
        device_type,
        description,
        connected: true,
        controllable: device_type != Gateway::DEVICE_TYPES[0],
    }
}

#[async_trait]
impl TelemetrySource for MockTelemetrySource {
    type Error = MockTelemetryError;

    async fn start(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<MeasurementBatch>, Self::Error> {
        let mut commands = self
            .commands
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
            .ok_or(MockTelemetryError::AlreadyStarted)?;

        let (tx, rx) = mpsc::channel(16);
        let interval = self.interval;

        let mut plugs: Vec<MockPlug> = self
            .plugs
            .iter()
            .map(|&device_id| MockPlug {
                device_id,
                on: false,
                energy_kwh: 0.0,
                report_status: true,
            })
            .collect();
        let mut buttons: Vec<MockButton> = self
            .buttons
            .iter()
            .map(|&device_id| MockButton {
                device_id,
                pressed: false,
            })
            .collect();

        info!(
            plug_count = plugs.len(),
            button_count = buttons.len(),
            interval_ms = interval.as_millis() as u64,
            "Starting mock telemetry source"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Mock telemetry source shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        while let Ok(command) = commands.try_recv() {
                            if let Some(plug) = plugs.iter_mut().find(|p| p.device_id == command.device_id) {
                                plug.apply(&command);
                            }
                        }

                        let batch = {
                            let mut rng = rand::rng();
                            let now = jiff::Timestamp::now();
                            let mut measurements = Vec::new();
                            for plug in plugs.iter_mut() {
                                plug.generate(&mut rng, now, &mut measurements);
                            }
                            for button in buttons.iter_mut() {
                                button.generate(&mut rng, now, &mut measurements);
                            }
                            MeasurementBatch {
                                measurements: measurements.into_boxed_slice(),
                                received_at: now,
                            }
                        };

                        if tx.send(batch).await.is_err() {
                            info!("Channel closed, mock telemetry source shutting down");
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}
