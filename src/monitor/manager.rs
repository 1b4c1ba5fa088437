//! Monitor connection management.
//!
//! Owns the BLE link to the rowing monitor: discovery, connection,
//! per-characteristic subscription, command writes, disconnect detection
//! and the passive reconnect watch. All transport errors are converted to
//! status changes and events here; nothing from this layer propagates into
//! the metrics pipeline as a panic or a fatal error.

use crate::monitor::commands::{
    encode_command, parse_command_response, CommandOpcode, CommandStatus,
};
use crate::monitor::forces::ForceCurveAssembler;
use crate::monitor::frames::{
    decode_battery_level, decode_extended_metrics, FrameDecoder, BATTERY_LEVEL_UUID,
    CSC_MEASUREMENT_UUID, CSC_SERVICE_UUID, CYCLING_POWER_CONTROL_POINT_UUID,
    CYCLING_POWER_MEASUREMENT_UUID, CYCLING_POWER_SERVICE_UUID, EXTENDED_METRICS_UUID,
    HANDLE_FORCE_UUID, SC_CONTROL_POINT_UUID,
};
use crate::monitor::metrics::MetricsEngine;
use crate::monitor::types::{
    ConnectionStatus, MonitorConfig, MonitorError, MonitorEvent, WireFormat,
};
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use crossbeam::channel::{Receiver, Sender};
use futures::stream::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use uuid::Uuid;

/// How long a command write waits for its acknowledgment notification.
const COMMAND_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Bounded retry state for one characteristic subscription.
///
/// Exhausting the budget terminates only that characteristic's stream; the
/// rest of the connection stays up.
#[derive(Debug, Clone, Copy)]
pub struct RetryBudget {
    remaining: u32,
    delay: Duration,
}

impl RetryBudget {
    /// A budget of `attempts` retries spaced `delay` apart.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            remaining: attempts,
            delay,
        }
    }

    /// Take one retry from the budget. Returns the backoff to wait before
    /// the attempt, or `None` once the budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.delay)
    }

    /// Retries left in the budget.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

/// Per-connection session state.
///
/// Created fresh by every successful connection attempt and dropped on
/// disconnect, so no accumulator or baseline state can leak from one
/// physical device into the next.
struct Session {
    device_id: String,
    peripheral: Peripheral,
    format: WireFormat,
    engine: Arc<Mutex<MetricsEngine>>,
    control_char: Option<Characteristic>,
    pending_ack: Arc<Mutex<Option<oneshot::Sender<CommandStatus>>>>,
}

/// Shared handles every spawned task needs.
#[derive(Clone)]
struct ManagerCtx {
    config: MonitorConfig,
    adapter: Adapter,
    event_tx: Option<Sender<MonitorEvent>>,
    status: Arc<Mutex<ConnectionStatus>>,
    session: Arc<Mutex<Option<Session>>>,
    /// Cancellation signal of the active connection attempt. Replaced with
    /// a fresh channel on every attempt; reusing a stale one across
    /// attempts is exactly the bug class this guards against.
    active_cancel: Arc<Mutex<Option<watch::Sender<bool>>>>,
    /// Set for the duration of a user-initiated disconnect so the
    /// disconnect watcher does not start a reconnect watch for it.
    user_disconnect: Arc<AtomicBool>,
    /// Feeds device ids to the reconnect supervisor, which re-runs the
    /// connection sequence outside the watcher tasks.
    reconnect_tx: mpsc::UnboundedSender<String>,
}

impl ManagerCtx {
    fn send_event(&self, event: MonitorEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    async fn set_status(&self, status: ConnectionStatus) {
        *self.status.lock().await = status.clone();
        self.send_event(MonitorEvent::StatusChanged(status));
    }
}

/// Manages discovery, connection and data streaming for one rowing monitor.
pub struct MonitorManager {
    config: MonitorConfig,
    adapter: Option<Adapter>,
    event_tx: Option<Sender<MonitorEvent>>,
    status: Arc<Mutex<ConnectionStatus>>,
    session: Arc<Mutex<Option<Session>>>,
    active_cancel: Arc<Mutex<Option<watch::Sender<bool>>>>,
    user_disconnect: Arc<AtomicBool>,
    reconnect_tx: Option<mpsc::UnboundedSender<String>>,
    is_scanning: Arc<Mutex<bool>>,
}

impl MonitorManager {
    /// Create a new manager.
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            adapter: None,
            event_tx: None,
            status: Arc::new(Mutex::new(ConnectionStatus::Disconnected)),
            session: Arc::new(Mutex::new(None)),
            active_cancel: Arc::new(Mutex::new(None)),
            user_disconnect: Arc::new(AtomicBool::new(false)),
            reconnect_tx: None,
            is_scanning: Arc::new(Mutex::new(false)),
        }
    }

    /// Create a new manager with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(MonitorConfig::default())
    }

    /// Initialize the BLE adapter. Must be called before any other
    /// operation.
    pub async fn initialize(&mut self) -> Result<(), MonitorError> {
        tracing::info!("Initializing MonitorManager");

        let manager = Manager::new()
            .await
            .map_err(|e| MonitorError::BleError(e.to_string()))?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|e| MonitorError::BleError(e.to_string()))?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(MonitorError::AdapterNotFound)?;

        tracing::info!("BLE adapter initialized");
        self.adapter = Some(adapter);

        let (reconnect_tx, reconnect_rx) = mpsc::unbounded_channel();
        self.reconnect_tx = Some(reconnect_tx);

        let ctx = self.ctx()?;
        tokio::spawn(async move {
            Self::reconnect_supervisor(ctx, reconnect_rx).await;
        });

        Ok(())
    }

    /// Get an event receiver for monitor events.
    pub fn event_receiver(&mut self) -> Receiver<MonitorEvent> {
        let (tx, rx) = crossbeam::channel::unbounded();
        self.event_tx = Some(tx);
        rx
    }

    /// Current connection status.
    pub async fn status(&self) -> ConnectionStatus {
        self.status.lock().await.clone()
    }

    fn ctx(&self) -> Result<ManagerCtx, MonitorError> {
        let adapter = self
            .adapter
            .as_ref()
            .ok_or(MonitorError::AdapterNotFound)?
            .clone();
        let reconnect_tx = self
            .reconnect_tx
            .as_ref()
            .ok_or(MonitorError::AdapterNotFound)?
            .clone();
        Ok(ManagerCtx {
            config: self.config.clone(),
            adapter,
            event_tx: self.event_tx.clone(),
            status: self.status.clone(),
            session: self.session.clone(),
            active_cancel: self.active_cancel.clone(),
            user_disconnect: self.user_disconnect.clone(),
            reconnect_tx,
        })
    }

    /// Start scanning for rowing monitors.
    pub async fn start_discovery(&mut self) -> Result<(), MonitorError> {
        let ctx = self.ctx()?;

        {
            let mut is_scanning = self.is_scanning.lock().await;
            if *is_scanning {
                return Ok(());
            }
            *is_scanning = true;
        }

        tracing::info!("Starting monitor discovery");

        let scan_filter = ScanFilter {
            services: vec![CYCLING_POWER_SERVICE_UUID, CSC_SERVICE_UUID],
        };

        ctx.adapter
            .start_scan(scan_filter)
            .await
            .map_err(|e| MonitorError::ScanFailed(e.to_string()))?;

        ctx.set_status(ConnectionStatus::Searching).await;

        let is_scanning = self.is_scanning.clone();
        tokio::spawn(async move {
            Self::process_discovery_events(ctx, is_scanning).await;
        });

        Ok(())
    }

    async fn process_discovery_events(ctx: ManagerCtx, is_scanning: Arc<Mutex<bool>>) {
        let mut events = match ctx.adapter.events().await {
            Ok(events) => events,
            Err(e) => {
                tracing::error!("Failed to get adapter events: {}", e);
                return;
            }
        };

        while let Some(event) = events.next().await {
            if !*is_scanning.lock().await {
                break;
            }

            if let CentralEvent::DeviceDiscovered(id) = event {
                let peripherals = match ctx.adapter.peripherals().await {
                    Ok(p) => p,
                    Err(_) => continue,
                };

                for peripheral in peripherals {
                    if peripheral.id() != id {
                        continue;
                    }
                    if let Some((name, format, rssi)) = Self::classify_peripheral(&peripheral).await
                    {
                        ctx.send_event(MonitorEvent::Discovered {
                            device_id: peripheral.id().to_string(),
                            name,
                            format,
                            signal_strength: rssi,
                        });
                    }
                }
            }
        }
    }

    /// Classify a peripheral by its advertised rowing service.
    async fn classify_peripheral(
        peripheral: &Peripheral,
    ) -> Option<(String, WireFormat, Option<i16>)> {
        let properties = peripheral.properties().await.ok()??;

        let format = if properties.services.contains(&CYCLING_POWER_SERVICE_UUID) {
            WireFormat::CyclingPower
        } else if properties.services.contains(&CSC_SERVICE_UUID) {
            WireFormat::SpeedCadence
        } else {
            return None;
        };

        let name = properties
            .local_name
            .unwrap_or_else(|| "Rowing Monitor".to_string());

        Some((name, format, properties.rssi))
    }

    /// Stop scanning for monitors.
    pub async fn stop_discovery(&mut self) -> Result<(), MonitorError> {
        let ctx = self.ctx()?;

        {
            let mut is_scanning = self.is_scanning.lock().await;
            if !*is_scanning {
                return Ok(());
            }
            *is_scanning = false;
        }

        tracing::info!("Stopping monitor discovery");

        ctx.adapter
            .stop_scan()
            .await
            .map_err(|e| MonitorError::ScanFailed(e.to_string()))?;

        if self.session.lock().await.is_none() {
            ctx.set_status(ConnectionStatus::Disconnected).await;
        }

        Ok(())
    }

    /// Connect to a monitor by device ID.
    pub async fn connect(&mut self, device_id: &str) -> Result<(), MonitorError> {
        let ctx = self.ctx()?;
        Self::establish(ctx, device_id.to_string()).await
    }

    /// The full connection sequence. Also used by the reconnect watch,
    /// which is why it takes a cloned context instead of `&self`.
    async fn establish(ctx: ManagerCtx, device_id: String) -> Result<(), MonitorError> {
        tracing::info!("Connecting to monitor: {}", device_id);
        ctx.user_disconnect.store(false, Ordering::SeqCst);
        ctx.set_status(ConnectionStatus::Connecting).await;

        // Fresh cancellation signal for this attempt. Cancel any previous
        // attempt or reconnect watch first.
        let (cancel_tx, cancel_rx) = watch::channel(false);
        if let Some(old) = ctx.active_cancel.lock().await.replace(cancel_tx) {
            let _ = old.send(true);
        }

        let result = Self::establish_inner(&ctx, &device_id, cancel_rx).await;

        if let Err(e) = &result {
            tracing::warn!("Connection to {} failed: {}", device_id, e);
            ctx.send_event(MonitorEvent::Error(e.to_string()));
            ctx.set_status(ConnectionStatus::Disconnected).await;
        }

        result
    }

    async fn establish_inner(
        ctx: &ManagerCtx,
        device_id: &str,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<(), MonitorError> {
        let peripherals = ctx
            .adapter
            .peripherals()
            .await
            .map_err(|e| MonitorError::BleError(e.to_string()))?;

        let peripheral = peripherals
            .into_iter()
            .find(|p| p.id().to_string() == device_id)
            .ok_or_else(|| MonitorError::DeviceNotFound(device_id.to_string()))?;

        peripheral
            .connect()
            .await
            .map_err(|e| MonitorError::ConnectionFailed(e.to_string()))?;

        peripheral
            .discover_services()
            .await
            .map_err(|e| MonitorError::ConnectionFailed(e.to_string()))?;

        let format = if peripheral
            .services()
            .iter()
            .any(|s| s.uuid == CYCLING_POWER_SERVICE_UUID)
        {
            WireFormat::CyclingPower
        } else if peripheral
            .services()
            .iter()
            .any(|s| s.uuid == CSC_SERVICE_UUID)
        {
            WireFormat::SpeedCadence
        } else {
            let _ = peripheral.disconnect().await;
            return Err(MonitorError::ServiceMissing);
        };

        let device_name = peripheral
            .properties()
            .await
            .ok()
            .flatten()
            .and_then(|p| p.local_name)
            .unwrap_or_else(|| "Rowing Monitor".to_string());

        let (measurement_uuid, control_uuid) = match format {
            WireFormat::CyclingPower => {
                (CYCLING_POWER_MEASUREMENT_UUID, CYCLING_POWER_CONTROL_POINT_UUID)
            }
            WireFormat::SpeedCadence => (CSC_MEASUREMENT_UUID, SC_CONTROL_POINT_UUID),
        };

        let characteristics = peripheral.characteristics();
        let find = |uuid: Uuid| characteristics.iter().find(|c| c.uuid == uuid).cloned();

        let measurement_char = find(measurement_uuid).ok_or(MonitorError::ServiceMissing)?;
        let extended_char = find(EXTENDED_METRICS_UUID);
        let force_char = find(HANDLE_FORCE_UUID);
        let battery_char = find(BATTERY_LEVEL_UUID);
        let control_char = find(control_uuid);

        // The firmware cannot service characteristic subscriptions
        // back-to-back right after GATT connect; space them out and retry
        // each one independently so a flaky characteristic does not take
        // the whole connection down.
        let mut subscriptions: Vec<(&Characteristic, &'static str)> =
            vec![(&measurement_char, "measurement")];
        if let Some(c) = &extended_char {
            subscriptions.push((c, "extended metrics"));
        }
        if let Some(c) = &force_char {
            subscriptions.push((c, "handle force"));
        }
        if let Some(c) = &battery_char {
            subscriptions.push((c, "battery"));
        }
        if let Some(c) = &control_char {
            subscriptions.push((c, "control point"));
        }

        for (characteristic, name) in subscriptions {
            tokio::time::sleep(ctx.config.subscribe_spacing).await;
            let result = Self::subscribe_with_retry(
                ctx,
                &peripheral,
                characteristic,
                battery_char.as_ref(),
                name,
                cancel_rx.clone(),
            )
            .await;

            match result {
                Ok(()) => {}
                // Losing the measurement stream makes the connection
                // useless; everything else degrades gracefully.
                Err(e) if name == "measurement" => {
                    let _ = peripheral.disconnect().await;
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!("Subscription to {} dropped: {}", name, e);
                    ctx.send_event(MonitorEvent::StreamFailed {
                        characteristic: name,
                    });
                }
            }
        }

        let engine = Arc::new(Mutex::new(MetricsEngine::new(ctx.config.heartbeat_window)));
        let pending_ack: Arc<Mutex<Option<oneshot::Sender<CommandStatus>>>> =
            Arc::new(Mutex::new(None));

        *ctx.session.lock().await = Some(Session {
            device_id: device_id.to_string(),
            peripheral: peripheral.clone(),
            format,
            engine: engine.clone(),
            control_char: control_char.clone(),
            pending_ack: pending_ack.clone(),
        });

        ctx.set_status(ConnectionStatus::Connected {
            device_name: device_name.clone(),
        })
        .await;
        tracing::info!("Connected to {} ({})", device_name, format);

        let pump_ctx = ctx.clone();
        let pump_peripheral = peripheral.clone();
        let pump_cancel = cancel_rx.clone();
        let control_uuid_for_pump = control_char.as_ref().map(|c| c.uuid);
        tokio::spawn(async move {
            Self::pump_notifications(
                pump_ctx,
                pump_peripheral,
                format,
                measurement_uuid,
                control_uuid_for_pump,
                engine,
                pending_ack,
                pump_cancel,
            )
            .await;
        });

        let watch_ctx = ctx.clone();
        let watch_id = peripheral.id();
        let watch_device_id = device_id.to_string();
        tokio::spawn(async move {
            Self::watch_disconnect(watch_ctx, watch_id, watch_device_id, cancel_rx).await;
        });

        Ok(())
    }

    /// Subscribe to one characteristic with bounded retry and fixed
    /// backoff. Each retry also re-touches the battery characteristic: the
    /// firmware's BLE stack recovers from transient "unknown" GATT errors
    /// when the battery service is poked. That behavior is empirical, not
    /// principled; it is kept because this firmware needs it, not because
    /// battery access is a general keep-alive.
    async fn subscribe_with_retry(
        ctx: &ManagerCtx,
        peripheral: &Peripheral,
        characteristic: &Characteristic,
        battery_char: Option<&Characteristic>,
        name: &'static str,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> Result<(), MonitorError> {
        let mut budget = RetryBudget::new(ctx.config.retry_attempts, ctx.config.retry_delay);
        let mut last_error;

        match peripheral.subscribe(characteristic).await {
            Ok(()) => {
                tracing::debug!("Subscribed to {}", name);
                return Ok(());
            }
            Err(e) => last_error = e.to_string(),
        }

        while let Some(delay) = budget.next_delay() {
            tracing::warn!(
                "Subscription to {} failed ({}), retrying in {:?} ({} left)",
                name,
                last_error,
                delay,
                budget.remaining()
            );

            tokio::select! {
                _ = cancel_rx.changed() => return Err(MonitorError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            if let Some(battery) = battery_char {
                if let Err(e) = peripheral.read(battery).await {
                    tracing::debug!("Battery liveness probe failed: {}", e);
                }
            }

            match peripheral.subscribe(characteristic).await {
                Ok(()) => {
                    tracing::debug!("Subscribed to {} after retry", name);
                    return Ok(());
                }
                Err(e) => last_error = e.to_string(),
            }
        }

        Err(MonitorError::SubscriptionFailed {
            characteristic: name,
            reason: last_error,
        })
    }

    /// Route notifications from the merged peripheral stream into the
    /// decoders and the metrics engine. Decode failures are logged and
    /// swallowed; the last-known-good value stays in effect.
    #[allow(clippy::too_many_arguments)]
    async fn pump_notifications(
        ctx: ManagerCtx,
        peripheral: Peripheral,
        format: WireFormat,
        measurement_uuid: Uuid,
        control_uuid: Option<Uuid>,
        engine: Arc<Mutex<MetricsEngine>>,
        pending_ack: Arc<Mutex<Option<oneshot::Sender<CommandStatus>>>>,
        mut cancel_rx: watch::Receiver<bool>,
    ) {
        let mut stream = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Failed to get notification stream: {}", e);
                return;
            }
        };

        let mut decoder = FrameDecoder::new(format);
        let mut assembler = ForceCurveAssembler::new();

        loop {
            let notification = tokio::select! {
                _ = cancel_rx.changed() => break,
                n = stream.next() => match n {
                    Some(n) => n,
                    None => break,
                },
            };

            let uuid = notification.uuid;
            let data = notification.value;
            let now = Instant::now();

            if uuid == measurement_uuid {
                match decoder.decode_measurement(&data) {
                    Ok(sample) => {
                        if let Some(metrics) = engine.lock().await.on_counter_sample(sample, now) {
                            ctx.send_event(MonitorEvent::Metrics(metrics));
                        }
                    }
                    Err(e) => tracing::debug!("Measurement frame dropped: {}", e),
                }
            } else if uuid == EXTENDED_METRICS_UUID {
                match decode_extended_metrics(&data) {
                    Ok(ext) => {
                        let metrics = engine.lock().await.on_extended(ext, now);
                        ctx.send_event(MonitorEvent::Metrics(metrics));
                    }
                    Err(e) => tracing::debug!("Extended frame dropped: {}", e),
                }
            } else if uuid == HANDLE_FORCE_UUID {
                match assembler.push_frame(&data) {
                    Ok(Some(curve)) => engine.lock().await.on_force_curve(&curve),
                    Ok(None) => {}
                    Err(e) => tracing::debug!("Force frame dropped: {}", e),
                }
            } else if uuid == BATTERY_LEVEL_UUID {
                match decode_battery_level(&data) {
                    Ok(percent) => engine.lock().await.on_battery(percent),
                    Err(e) => tracing::debug!("Battery frame dropped: {}", e),
                }
            } else if Some(uuid) == control_uuid {
                match parse_command_response(&data) {
                    Ok(status) => {
                        if let Some(tx) = pending_ack.lock().await.take() {
                            let _ = tx.send(status);
                        }
                    }
                    Err(e) => tracing::debug!("Control response dropped: {}", e),
                }
            }
        }

        tracing::debug!("Notification pump ended");
    }

    /// Watch for the link dropping. A device-initiated disconnect starts a
    /// passive reconnect watch: the adapter keeps listening for the same
    /// peripheral's advertisement and reconnects without a user gesture.
    async fn watch_disconnect(
        ctx: ManagerCtx,
        peripheral_id: btleplug::platform::PeripheralId,
        device_id: String,
        mut cancel_rx: watch::Receiver<bool>,
    ) {
        let mut events = match ctx.adapter.events().await {
            Ok(events) => events,
            Err(e) => {
                tracing::error!("Failed to get adapter events: {}", e);
                return;
            }
        };

        let mut watching_for_return = false;

        loop {
            let event = tokio::select! {
                _ = cancel_rx.changed() => return,
                e = events.next() => match e {
                    Some(e) => e,
                    None => return,
                },
            };

            if !watching_for_return {
                if matches!(&event, CentralEvent::DeviceDisconnected(id) if *id == peripheral_id) {
                    if ctx.user_disconnect.load(Ordering::SeqCst) {
                        return;
                    }

                    tracing::warn!("Monitor disconnected unexpectedly");
                    *ctx.session.lock().await = None;
                    ctx.send_event(MonitorEvent::Error("Monitor disconnected".to_string()));
                    ctx.set_status(ConnectionStatus::ReconnectWatching).await;
                    watching_for_return = true;
                }
                continue;
            }

            let seen = match &event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                    *id == peripheral_id
                }
                _ => false,
            };

            if seen {
                tracing::info!("Monitor advertising again");
                // The supervisor re-runs the connection sequence and
                // spawns a fresh watcher on success, so this one ends.
                let _ = ctx.reconnect_tx.send(device_id);
                return;
            }
        }
    }

    /// Runs reconnect attempts requested by the watchers. A failed attempt
    /// re-arms the advertisement watch so the system keeps trying silently
    /// until the user disconnects.
    async fn reconnect_supervisor(ctx: ManagerCtx, mut rx: mpsc::UnboundedReceiver<String>) {
        while let Some(device_id) = rx.recv().await {
            if ctx.user_disconnect.load(Ordering::SeqCst) {
                continue;
            }

            tracing::info!("Reconnecting to {}", device_id);
            if let Err(e) = Self::establish(ctx.clone(), device_id.clone()).await {
                tracing::warn!("Silent reconnect failed: {}", e);
                ctx.set_status(ConnectionStatus::ReconnectWatching).await;

                let cancel_rx = ctx
                    .active_cancel
                    .lock()
                    .await
                    .as_ref()
                    .map(|tx| tx.subscribe());
                if let Some(cancel_rx) = cancel_rx {
                    let watch_ctx = ctx.clone();
                    tokio::spawn(async move {
                        Self::watch_advertisement(watch_ctx, device_id, cancel_rx).await;
                    });
                }
            }
        }
    }

    /// Passive advertisement watch for a device we failed to reach: asks
    /// the supervisor for another attempt next time it is seen.
    async fn watch_advertisement(
        ctx: ManagerCtx,
        device_id: String,
        mut cancel_rx: watch::Receiver<bool>,
    ) {
        let mut events = match ctx.adapter.events().await {
            Ok(events) => events,
            Err(e) => {
                tracing::error!("Failed to get adapter events: {}", e);
                return;
            }
        };

        loop {
            let event = tokio::select! {
                _ = cancel_rx.changed() => return,
                e = events.next() => match e {
                    Some(e) => e,
                    None => return,
                },
            };

            let seen = match &event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                    id.to_string() == device_id
                }
                _ => false,
            };

            if seen {
                let _ = ctx.reconnect_tx.send(device_id);
                return;
            }
        }
    }

    /// User-initiated disconnect: cancels pending retries, in-flight
    /// connection attempts and any reconnect watch, then tears the link
    /// down.
    pub async fn disconnect(&mut self) -> Result<(), MonitorError> {
        tracing::info!("Disconnecting from monitor");
        self.user_disconnect.store(true, Ordering::SeqCst);

        if let Some(cancel) = self.active_cancel.lock().await.take() {
            let _ = cancel.send(true);
        }

        if let Some(session) = self.session.lock().await.take() {
            session
                .peripheral
                .disconnect()
                .await
                .map_err(|e| MonitorError::BleError(e.to_string()))?;
        }

        *self.status.lock().await = ConnectionStatus::Disconnected;
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(MonitorEvent::StatusChanged(ConnectionStatus::Disconnected));
        }

        Ok(())
    }

    /// Re-baseline the session and push one zeroed metrics broadcast.
    pub async fn reset_session(&self) -> Result<(), MonitorError> {
        let session = self.session.lock().await;
        let session = session
            .as_ref()
            .ok_or_else(|| MonitorError::DeviceNotFound("no active session".to_string()))?;

        let metrics = session.engine.lock().await.reset(Instant::now());
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(MonitorEvent::Metrics(metrics));
        }
        Ok(())
    }

    /// Write a settings command and wait for the device acknowledgment.
    pub async fn send_command(
        &self,
        opcode: CommandOpcode,
        value: u8,
    ) -> Result<CommandStatus, MonitorError> {
        let (peripheral, control_char, pending_ack) = {
            let session = self.session.lock().await;
            let session = session
                .as_ref()
                .ok_or_else(|| MonitorError::DeviceNotFound("no active session".to_string()))?;
            let control = session
                .control_char
                .clone()
                .ok_or(MonitorError::ServiceMissing)?;
            (
                session.peripheral.clone(),
                control,
                session.pending_ack.clone(),
            )
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        *pending_ack.lock().await = Some(ack_tx);

        let frame = encode_command(opcode, value);
        peripheral
            .write(&control_char, &frame, WriteType::WithResponse)
            .await
            .map_err(|e| MonitorError::WriteFailed(e.to_string()))?;

        let status = tokio::time::timeout(COMMAND_ACK_TIMEOUT, ack_rx)
            .await
            .map_err(|_| MonitorError::CommandTimeout)?
            .map_err(|_| MonitorError::CommandTimeout)?;

        if let Some(tx) = &self.event_tx {
            let _ = tx.send(MonitorEvent::CommandAck {
                opcode: opcode as u8,
                success: status.is_success(),
            });
        }

        Ok(status)
    }

    /// The wire format of the active connection, if any.
    pub async fn active_format(&self) -> Option<WireFormat> {
        self.session.lock().await.as_ref().map(|s| s.format)
    }

    /// Device id of the active connection, if any.
    pub async fn connected_device_id(&self) -> Option<String> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.device_id.clone())
    }

    /// Shutdown: stop scanning and drop any connection.
    pub async fn shutdown(&mut self) {
        tracing::info!("Shutting down MonitorManager");
        let _ = self.stop_discovery().await;
        let _ = self.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_budget_exhausts_after_configured_attempts() {
        let mut budget = RetryBudget::new(4, Duration::from_secs(2));

        for _ in 0..4 {
            assert_eq!(budget.next_delay(), Some(Duration::from_secs(2)));
        }
        // Fifth consecutive failure finds the budget empty
        assert_eq!(budget.next_delay(), None);
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn retry_budget_counts_down() {
        let mut budget = RetryBudget::new(4, Duration::from_millis(100));
        budget.next_delay();
        budget.next_delay();
        assert_eq!(budget.remaining(), 2);
    }

    #[test]
    fn zero_budget_never_retries() {
        let mut budget = RetryBudget::new(0, Duration::from_secs(2));
        assert_eq!(budget.next_delay(), None);
    }
}
