mod config;
mod simulation;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use vesta_core::{DeviceId, MeasurementBatch};
use vesta_devices::{DeliveryFailure, InMemoryDeviceRegistry, TelemetrySource};

use crate::config::Config;
use crate::simulation::{MockTelemetrySource, SimulatedTransport};

#[derive(Parser)]
#[command(name = "vesta-bot")]
#[command(about = "Vesta device bot")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "vesta-bot.toml")]
    config: PathBuf,

    /// Stop after this many processing cycles
    #[arg(long)]
    cycles: Option<u64>,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    let (transport, commands) =
        SimulatedTransport::new(config.transport.drop_ratio, config.transport.queue_size);
    let (registry, failures) =
        InMemoryDeviceRegistry::new(Arc::new(transport), config.device_settings());

    let source = MockTelemetrySource::new(
        config.simulation.plug_count,
        config.simulation.button_count,
        config.cycle.interval(),
        commands,
    );
    for registration in source.registrations() {
        registry.register(registration).await?;
    }

    let cancel = CancellationToken::new();
    let batches = source.start(cancel.clone()).await?;

    info!(
        devices = registry.count().await,
        drop_ratio = config.transport.drop_ratio,
        max_attempts = config.retry.max_attempts,
        "Bot started"
    );

    let bot = Bot {
        registry,
        plugs: source.plugs().to_vec(),
        buttons: source.buttons().to_vec(),
        toggle_every: config.simulation.toggle_every_cycles.max(1),
    };

    tokio::select! {
        _ = bot.run(batches, failures, cli.cycles) => {
            info!("Cycle limit reached, shutting down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }
    cancel.cancel();

    Ok(())
}

/// Automation side: reacts to each cycle's measurements and actuates the
/// plugs.
struct Bot {
    registry: InMemoryDeviceRegistry,
    plugs: Vec<DeviceId>,
    buttons: Vec<DeviceId>,
    toggle_every: u64,
}

impl Bot {
    async fn run(
        &self,
        mut batches: mpsc::Receiver<MeasurementBatch>,
        mut failures: mpsc::UnboundedReceiver<DeliveryFailure>,
        cycle_limit: Option<u64>,
    ) {
        let mut cycle: u64 = 0;

        loop {
            tokio::select! {
                batch = batches.recv() => {
                    let Some(batch) = batch else {
                        info!("Telemetry feed closed");
                        return;
                    };

                    cycle += 1;
                    let report = self.registry.ingest(batch).await;
                    info!(cycle, recorded = report.recorded, "Cycle processed");

                    self.observe().await;
                    if cycle % self.toggle_every == 0 {
                        self.toggle_plugs(cycle / self.toggle_every).await;
                    }

                    if cycle_limit.is_some_and(|limit| cycle >= limit) {
                        return;
                    }
                }
                Some(failure) = failures.recv() => {
                    warn!(
                        device_id = %failure.device_id,
                        parameter = %failure.parameter,
                        value = %failure.value,
                        attempts = failure.attempts,
                        "Command delivery failed"
                    );
                }
            }
        }
    }

    async fn observe(&self) {
        for &id in &self.plugs {
            let state = self
                .registry
                .with_device(id, |device| {
                    device.as_smartplug().map(|plug| {
                        (plug.did_turn_on(), plug.did_turn_off(), plug.current_power())
                    })
                })
                .await
                .flatten();

            match state {
                Some((true, _, power)) => info!(device_id = %id, ?power, "Plug turned on"),
                Some((_, true, _)) => info!(device_id = %id, "Plug turned off"),
                _ => {}
            }
        }

        for &id in &self.buttons {
            let pressed = self
                .registry
                .with_device(id, |device| {
                    device
                        .as_button()
                        .is_some_and(|button| button.is_single_button_pressed())
                })
                .await;

            if pressed == Some(true) {
                info!(device_id = %id, "Button pressed");
            }
        }
    }

    /// Odd rounds save the plug state and flip it, even rounds restore it.
    async fn toggle_plugs(&self, round: u64) {
        for &id in &self.plugs {
            let result = self
                .registry
                .with_device_mut(id, |device| {
                    let plug = device.as_smartplug_mut()?;
                    let result = if round % 2 == 1 {
                        plug.save().and_then(|was_on| {
                            if was_on {
                                plug.off(true)
                            } else {
                                plug.on(true)
                            }
                        })
                    } else {
                        plug.restore(true)
                    };
                    Some(result)
                })
                .await
                .flatten();

            match result {
                Some(Ok(Some(campaign))) => {
                    info!(device_id = %id, campaign_id = %campaign.id(), round, "Reliable command issued");
                }
                Some(Ok(None)) => {}
                Some(Err(e)) => warn!(device_id = %id, error = %e, "Plug command refused"),
                None => warn!(device_id = %id, "Plug not registered"),
            }
        }
    }
}
