mod button;
mod gateway;
mod smartplug;

pub use button::Button;
pub use gateway::Gateway;
pub use smartplug::Smartplug;

use vesta_core::DeviceType;

use crate::device::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Button,
    Gateway,
    Smartplug,
    Generic,
}

impl DeviceKind {
    pub fn from_device_type(device_type: DeviceType) -> Self {
        if Button::DEVICE_TYPES.contains(&device_type) {
            DeviceKind::Button
        } else if Gateway::DEVICE_TYPES.contains(&device_type) {
            DeviceKind::Gateway
        } else if Smartplug::DEVICE_TYPES.contains(&device_type) {
            DeviceKind::Smartplug
        } else {
            DeviceKind::Generic
        }
    }
}

/// A registered device behind its type-specific adapter.
#[derive(Debug)]
pub enum AnyDevice {
    Button(Button),
    Gateway(Gateway),
    Smartplug(Smartplug),
    Generic(Device),
}

impl AnyDevice {
    /// Wraps `device` in the adapter matching its device type.
    pub fn from_device(device: Device) -> Self {
        match DeviceKind::from_device_type(device.device_type()) {
            DeviceKind::Button => AnyDevice::Button(Button::new(device)),
            DeviceKind::Gateway => AnyDevice::Gateway(Gateway::new(device)),
            DeviceKind::Smartplug => AnyDevice::Smartplug(Smartplug::new(device)),
            DeviceKind::Generic => AnyDevice::Generic(device),
        }
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            AnyDevice::Button(_) => DeviceKind::Button,
            AnyDevice::Gateway(_) => DeviceKind::Gateway,
            AnyDevice::Smartplug(_) => DeviceKind::Smartplug,
            AnyDevice::Generic(_) => DeviceKind::Generic,
        }
    }

    pub fn device(&self) -> &Device {
        match self {
            AnyDevice::Button(button) => button.device(),
            AnyDevice::Gateway(gateway) => gateway.device(),
            AnyDevice::Smartplug(plug) => plug.device(),
            AnyDevice::Generic(device) => device,
        }
    }

    pub fn device_mut(&mut self) -> &mut Device {
        match self {
            AnyDevice::Button(button) => button.device_mut(),
            AnyDevice::Gateway(gateway) => gateway.device_mut(),
            AnyDevice::Smartplug(plug) => plug.device_mut(),
            AnyDevice::Generic(device) => device,
        }
    }

    pub fn as_button(&self) -> Option<&Button> {
        match self {
            AnyDevice::Button(button) => Some(button),
            _ => None,
        }
    }

    pub fn as_smartplug(&self) -> Option<&Smartplug> {
        match self {
            AnyDevice::Smartplug(plug) => Some(plug),
            _ => None,
        }
    }

    pub fn as_smartplug_mut(&mut self) -> Option<&mut Smartplug> {
        match self {
            AnyDevice::Smartplug(plug) => Some(plug),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use vesta_core::DeviceType;

    use super::DeviceKind;

    #[test]
    fn device_types_map_to_adapters() {
        assert_eq!(DeviceKind::from_device_type(DeviceType(9014)), DeviceKind::Button);
        assert_eq!(DeviceKind::from_device_type(DeviceType(10031)), DeviceKind::Gateway);
        assert_eq!(DeviceKind::from_device_type(DeviceType(10035)), DeviceKind::Smartplug);
        assert_eq!(DeviceKind::from_device_type(DeviceType(10014)), DeviceKind::Generic);
    }
}
