use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};
use vesta_core::{DeviceId, DeviceType, MeasurementBatch};

use crate::{
    adapters::AnyDevice,
    device::Device,
    dispatch::{DeliveryFailure, Dispatcher, RetryPolicy},
    error::RegistryError,
    store::MeasurementStore,
    transport::Transport,
};

/// Settings applied to every device created by the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub retry: RetryPolicy,
    pub history_limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct DeviceRegistration {
    pub id: DeviceId,
    pub device_type: DeviceType,
    pub description: String,
    pub connected: bool,
    pub controllable: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub recorded: usize,
    pub unknown_device: usize,
}

/// Devices by id, each behind its adapter. Writes (ingestion, registration,
/// flag updates) take the write lock, so a device sees a single writer while
/// readers share access.
#[derive(Clone)]
pub struct InMemoryDeviceRegistry {
    devices: Arc<RwLock<HashMap<DeviceId, AnyDevice>>>,
    transport: Arc<dyn Transport>,
    settings: DeviceSettings,
    failures: mpsc::UnboundedSender<DeliveryFailure>,
}

impl InMemoryDeviceRegistry {
    /// Returns the registry together with the channel on which exhausted
    /// reliable commands of all its devices are reported.
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: DeviceSettings,
    ) -> (Self, mpsc::UnboundedReceiver<DeliveryFailure>) {
        let (failures, failures_rx) = mpsc::unbounded_channel();
        let registry = Self {
            devices: Arc::new(RwLock::new(HashMap::new())),
            transport,
            settings,
            failures,
        };
        (registry, failures_rx)
    }

    pub async fn register(&self, registration: DeviceRegistration) -> Result<(), RegistryError> {
        let mut devices = self.devices.write().await;
        if devices.contains_key(&registration.id) {
            return Err(RegistryError::AlreadyRegistered(registration.id));
        }

        let dispatcher = Dispatcher::new(
            registration.id,
            Arc::clone(&self.transport),
            self.settings.retry.clone(),
        )
        .with_failures(self.failures.clone());

        let mut device = Device::new(
            registration.device_type,
            registration.description,
            MeasurementStore::with_capacity(self.settings.history_limit),
            dispatcher,
        );
        device.set_connected(registration.connected);
        device.set_controllable(registration.controllable);

        let device = AnyDevice::from_device(device);
        info!(
            device_id = %registration.id,
            device_type = registration.device_type.0,
            kind = ?device.kind(),
            "device registered"
        );
        devices.insert(registration.id, device);
        Ok(())
    }

    /// Removes the device and cancels its outstanding reliable commands.
    pub async fn unregister(&self, id: DeviceId) -> Result<(), RegistryError> {
        let removed = self.devices.write().await.remove(&id);
        match removed {
            Some(_) => {
                info!(device_id = %id, "device unregistered");
                Ok(())
            }
            None => Err(RegistryError::NotFound(id)),
        }
    }

    pub async fn set_flags(
        &self,
        id: DeviceId,
        connected: bool,
        controllable: bool,
    ) -> Result<(), RegistryError> {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))?
            .device_mut();

        if device.is_connected() != connected {
            info!(device_id = %id, connected, "device connectivity changed");
        }
        device.set_connected(connected);
        device.set_controllable(controllable);
        Ok(())
    }

    pub async fn with_device<R>(&self, id: DeviceId, f: impl FnOnce(&AnyDevice) -> R) -> Option<R> {
        let devices = self.devices.read().await;
        devices.get(&id).map(f)
    }

    pub async fn with_device_mut<R>(
        &self,
        id: DeviceId,
        f: impl FnOnce(&mut AnyDevice) -> R,
    ) -> Option<R> {
        let mut devices = self.devices.write().await;
        devices.get_mut(&id).map(f)
    }

    /// Runs one processing cycle: clears the changed-this-cycle markers of
    /// every device, then records the batch in arrival order. Measurements
    /// for unregistered devices are skipped.
    pub async fn ingest(&self, batch: MeasurementBatch) -> IngestReport {
        let mut devices = self.devices.write().await;
        let mut report = IngestReport::default();

        for device in devices.values_mut() {
            device.device_mut().begin_cycle();
        }

        for measurement in batch.measurements.into_vec() {
            match devices.get_mut(&measurement.device_id) {
                Some(device) => {
                    device.device_mut().record(
                        measurement.parameter,
                        measurement.value,
                        measurement.timestamp,
                    );
                    report.recorded += 1;
                }
                None => report.unknown_device += 1,
            }
        }

        debug!(
            recorded = report.recorded,
            unknown_device = report.unknown_device,
            received_at = %batch.received_at,
            "measurement batch ingested"
        );
        report
    }

    /// Transport-level acknowledgement of a reliable command.
    pub async fn acknowledge(&self, id: DeviceId, parameter: &str) -> bool {
        let devices = self.devices.read().await;
        devices
            .get(&id)
            .is_some_and(|device| device.device().dispatcher().acknowledge(parameter))
    }

    pub async fn count(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<_> = self.devices.read().await.keys().copied().collect();
        ids.sort();
        ids
    }
}
