use vesta_core::DeviceId;

/// Soft failures of device operations. None of these are faults; callers
/// decide whether to log, alert or ignore.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("device {0} cannot be controlled")]
    NotControllable(DeviceId),
    #[error("device {0} is not connected")]
    NotConnected(DeviceId),
    #[error("device {0} has no saved state to restore")]
    NothingSaved(DeviceId),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("device {0} is already registered")]
    AlreadyRegistered(DeviceId),
    #[error("device {0} not found")]
    NotFound(DeviceId),
}
