use vesta_core::DeviceType;

use crate::device::Device;

/// Single push button reporting `buttonStatus`.
#[derive(Debug)]
pub struct Button {
    device: Device,
}

impl Button {
    pub const DEVICE_TYPES: &'static [DeviceType] = &[DeviceType(9014)];

    pub const BUTTON_STATUS: &'static str = "buttonStatus";

    pub fn new(device: Device) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    /// Whether the button is held down, as far as the last report goes.
    pub fn is_currently_pressed(&self) -> bool {
        self.device.latest_bool(Self::BUTTON_STATUS) == Some(true)
    }

    /// Pressed during the current cycle.
    pub fn is_single_button_pressed(&self) -> bool {
        self.device.just_became(Self::BUTTON_STATUS, true)
    }

    /// Released during the current cycle.
    pub fn is_single_button_released(&self) -> bool {
        self.device.just_became(Self::BUTTON_STATUS, false)
    }

    /// Timestamp of the most recent `buttonStatus` report.
    pub fn last_report_at(&self) -> Option<jiff::Timestamp> {
        self.device
            .latest(Self::BUTTON_STATUS)
            .map(|sample| sample.timestamp)
    }
}
