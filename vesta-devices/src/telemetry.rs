use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use vesta_core::MeasurementBatch;

/// Inbound telemetry feed. Each received batch is one processing cycle and
/// should be handed to [`InMemoryDeviceRegistry::ingest`] as a whole.
///
/// [`InMemoryDeviceRegistry::ingest`]: crate::registry::InMemoryDeviceRegistry::ingest
#[async_trait]
pub trait TelemetrySource {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Starts producing batches until `cancel` fires or the receiver is
    /// dropped.
    async fn start(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<MeasurementBatch>, Self::Error>;
}
