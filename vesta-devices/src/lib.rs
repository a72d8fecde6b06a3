//! Device state and command delivery for smart-home devices.
//!
//! A [`Device`] keeps the measurement history reported by one physical
//! device and issues commands back to it through its [`Dispatcher`].
//! Type-specific views (button, gateway, smart plug) live in [`adapters`].

pub mod adapters;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod store;
pub mod telemetry;
pub mod transport;

pub use adapters::{AnyDevice, Button, DeviceKind, Gateway, Smartplug};
pub use device::{Device, Snapshot};
pub use dispatch::{
    CampaignHandle, CampaignSnapshot, CampaignStatus, DeliveryFailure, Dispatcher, RetryPolicy,
};
pub use error::{DeviceError, RegistryError};
pub use registry::{DeviceRegistration, DeviceSettings, InMemoryDeviceRegistry, IngestReport};
pub use store::{MeasurementStore, Sample};
pub use telemetry::TelemetrySource;
pub use transport::{ChannelTransport, Transport};
