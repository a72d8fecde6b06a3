use vesta_core::DeviceType;

use crate::device::Device;

/// Hub that bridges end devices onto the platform. It has no measurements
/// or commands of its own; only its connectivity matters.
#[derive(Debug)]
pub struct Gateway {
    device: Device,
}

impl Gateway {
    pub const DEVICE_TYPES: &'static [DeviceType] = &[DeviceType(10031)];

    pub fn new(device: Device) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    pub fn is_connected(&self) -> bool {
        self.device.is_connected()
    }
}
