//! RustRow - Rowing Monitor Companion
//!
//! Main entry point: connects to a rowing monitor and streams derived
//! metrics to the terminal.

use anyhow::Context;
use crossbeam::channel::RecvTimeoutError;
use rustrow::monitor::types::MonitorEvent;
use rustrow::monitor::MonitorManager;
use rustrow::storage::config::{load_settings, save_settings, MonitorSettings};
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting RustRow v{}", env!("CARGO_PKG_VERSION"));

    let mut settings = load_settings().context("failed to load settings")?;

    let mut manager = MonitorManager::new(settings.monitor_config());
    let events = manager.event_receiver();
    manager
        .initialize()
        .await
        .context("failed to initialize Bluetooth")?;

    // Silent reconnect to the last known monitor, then fall back to a scan.
    let mut connected = false;
    if settings.connection.auto_reconnect {
        if let Some(device_id) = settings.last_device_id.clone() {
            tracing::info!("Attempting silent reconnect to {}", device_id);
            connected = manager.connect(&device_id).await.is_ok();
        }
    }

    if !connected {
        manager
            .start_discovery()
            .await
            .context("failed to start scanning")?;

        let deadline = Instant::now() + manager_discovery_timeout(&settings);
        loop {
            match events.recv_timeout(Duration::from_millis(200)) {
                Ok(MonitorEvent::Discovered {
                    device_id, name, ..
                }) => {
                    tracing::info!("Found {} ({})", name, device_id);
                    manager.stop_discovery().await?;
                    manager
                        .connect(&device_id)
                        .await
                        .context("failed to connect")?;
                    settings.remember_device(&device_id, &name);
                    if let Err(e) = save_settings(&settings) {
                        tracing::warn!("Could not save settings: {}", e);
                    }
                    break;
                }
                Ok(event) => print_event(&settings, &event),
                Err(RecvTimeoutError::Timeout) => {
                    if Instant::now() >= deadline {
                        manager.stop_discovery().await?;
                        anyhow::bail!("no rowing monitor found");
                    }
                }
                Err(RecvTimeoutError::Disconnected) => anyhow::bail!("event channel closed"),
            }
        }
    }

    // Stream events until the channel closes.
    for event in events.iter() {
        print_event(&settings, &event);
    }

    manager.shutdown().await;
    Ok(())
}

fn manager_discovery_timeout(settings: &MonitorSettings) -> Duration {
    Duration::from_secs(settings.connection.discovery_timeout_secs)
}

fn print_event(settings: &MonitorSettings, event: &MonitorEvent) {
    match event {
        MonitorEvent::Metrics(metrics) => {
            if settings.metrics_as_json {
                match serde_json::to_string(metrics) {
                    Ok(json) => println!("{json}"),
                    Err(e) => tracing::warn!("Could not serialize metrics: {}", e),
                }
            } else {
                println!(
                    "{:7.1} m | {:4} strokes | {:5.1} spm | {:5.2} m/s | {:5.1} m/stroke | {:4} W | drag {:3}",
                    metrics.distance_m,
                    metrics.stroke_count,
                    metrics.stroke_rate_spm,
                    metrics.speed_mps,
                    metrics.dist_per_stroke_m,
                    metrics.avg_stroke_power,
                    metrics.drag_factor,
                );
            }
        }
        MonitorEvent::StatusChanged(status) => tracing::info!("Status: {}", status),
        MonitorEvent::Discovered { name, .. } => tracing::info!("Discovered: {}", name),
        MonitorEvent::CommandAck { opcode, success } => {
            if *success {
                tracing::info!("Command {} acknowledged", opcode);
            } else {
                tracing::warn!("Command {} rejected by device", opcode);
            }
        }
        MonitorEvent::StreamFailed { characteristic } => {
            tracing::warn!("The {} stream was dropped after repeated errors", characteristic);
        }
        MonitorEvent::Error(message) => tracing::error!("{}", message),
    }
}
