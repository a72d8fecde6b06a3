use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use vesta_core::Command;

/// Outbound path to physical devices.
///
/// Sends are fire-and-forget: there is no result and a command may be lost
/// without notice. Implementations must not block, since the dispatcher
/// calls `send` while holding its campaign table.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, command: &Command);
}

/// Transport that hands commands to a bounded channel and drops them when
/// the channel is full or closed.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<Command>,
}

impl ChannelTransport {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, command: &Command) {
        match self.tx.try_send(command.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                debug!(device_id = %dropped.device_id, parameter = %dropped.parameter, "outbound queue full, command dropped");
            }
            Err(TrySendError::Closed(dropped)) => {
                debug!(device_id = %dropped.device_id, parameter = %dropped.parameter, "outbound queue closed, command dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use vesta_core::{Command, DeviceId};

    use super::{ChannelTransport, Transport};

    #[tokio::test]
    async fn drops_when_full() {
        let (transport, mut rx) = ChannelTransport::new(1);
        let command = Command {
            device_id: DeviceId::new(),
            parameter: "outletStatus".into(),
            value: "1".into(),
        };

        transport.send(&command);
        transport.send(&command);

        assert_eq!(rx.recv().await, Some(command));
        assert!(rx.try_recv().is_err());
    }
}
