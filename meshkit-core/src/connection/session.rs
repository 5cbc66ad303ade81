use anyhow::{Context, Result};
use meshtastic::api::state::{Configured, Connected};
use meshtastic::api::{ConnectedStreamApi, StreamApi};
use meshtastic::packet::PacketReceiver;
use meshtastic::protobufs;
use meshtastic::utils;
use std::ops::AsyncFnOnce;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::processor::{self, AckWaiters, DeliveryStatus};
use crate::error::SessionError;
use crate::state::{DeviceState, ReceivedMessage};
use crate::target::ConnectionTarget;

/// Messages buffered per subscriber before the slowest one starts lagging
const MESSAGE_BUFFER: usize = 64;

/// An open, configured connection to one radio.
///
/// The device is held until [`DeviceSession::close`] runs; prefer
/// [`run_session`], which closes on every exit path.
pub struct DeviceSession {
    target: ConnectionTarget,
    api: Option<ConnectedStreamApi<Configured>>,
    device_state: Arc<Mutex<DeviceState>>,
    packet_processor: Option<JoinHandle<()>>,
    config_complete: watch::Receiver<u32>,
    config_id: u32,
    messages: broadcast::Receiver<ReceivedMessage>,
    ack_waiters: AckWaiters,
}

impl DeviceSession {
    /// Open the stream, start the config handshake and wait until the device
    /// has sent its full configuration
    pub async fn open(target: ConnectionTarget, timeout: Duration) -> Result<Self> {
        info!("Establishing connection to Meshtastic device via {target}...");

        let (packet_receiver, connected_api) = tokio::time::timeout(timeout, open_stream(&target))
            .await
            .map_err(|_| SessionError::Timeout(timeout))??;

        info!("Configuring connection...");
        let config_id = utils::generate_rand_id();
        let configured_api = connected_api
            .configure(config_id)
            .await
            .map_err(|e| SessionError::Connection(format!("configure request failed: {e}")))?;

        let device_state = Arc::new(Mutex::new(DeviceState::new()));
        let (config_tx, config_rx) = watch::channel(0u32);
        let (message_tx, message_rx) = broadcast::channel(MESSAGE_BUFFER);
        let ack_waiters = AckWaiters::default();

        let handle = tokio::spawn(processor::run(
            packet_receiver,
            device_state.clone(),
            config_tx,
            message_tx,
            ack_waiters.clone(),
        ));

        let mut session = Self {
            target,
            api: Some(configured_api),
            device_state,
            packet_processor: Some(handle),
            config_complete: config_rx,
            config_id,
            messages: message_rx,
            ack_waiters,
        };

        if let Err(e) = session.wait_for_config(timeout).await {
            // Release the device before reporting
            if let Err(close_err) = session.close().await {
                warn!("Failed to close session: {close_err:#}");
            }
            return Err(e);
        }

        info!("Connection established and configured successfully");
        Ok(session)
    }

    /// Ask the device to resend its configuration and wait for it to arrive
    pub async fn refresh(&mut self, timeout: Duration) -> Result<()> {
        let config_id = utils::generate_rand_id();
        debug!("Requesting config {config_id}");
        self.config_id = config_id;

        self.get_api()?
            .send_to_radio_packet(Some(protobufs::to_radio::PayloadVariant::WantConfigId(
                config_id,
            )))
            .await
            .context("Failed to request configuration")?;

        self.wait_for_config(timeout).await
    }

    /// Wait until the device has finished sending the configuration last
    /// requested by [`Self::open`] or [`Self::refresh`]
    pub async fn wait_for_config(&mut self, timeout: Duration) -> Result<()> {
        let config_id = self.config_id;
        let wait = self.config_complete.wait_for(|id| *id == config_id);
        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(SessionError::Connection(
                "device stream closed before configuration finished".to_string(),
            )
            .into()),
            Err(_) => Err(SessionError::Timeout(timeout).into()),
        }
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    pub fn is_connected(&self) -> bool {
        self.api.is_some()
            && self
                .packet_processor
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    /// Release the device. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(processor) = self.packet_processor.take() {
            processor.abort();
        }

        if let Some(api) = self.api.take() {
            info!("Closing connection to {target}", target = self.target);
            api.disconnect()
                .await
                .context("Failed to disconnect from device")?;
        }

        Ok(())
    }

    pub fn get_api(&mut self) -> Result<&mut ConnectedStreamApi<Configured>> {
        self.api
            .as_mut()
            .ok_or_else(|| SessionError::NotConnected.into())
    }

    pub async fn get_device_state(&self) -> DeviceState {
        self.device_state.lock().await.clone()
    }

    pub async fn my_node_num(&self) -> Result<u32> {
        self.device_state
            .lock()
            .await
            .my_node_num()
            .ok_or_else(|| {
                SessionError::Connection("device did not report its node number".into()).into()
            })
    }

    /// Display name of channel `index`, without cloning the whole state
    pub async fn channel_name(&self, index: u32) -> String {
        self.with_state(|state| state.channel_name(index)).await
    }

    /// Read the cached state under its lock
    pub async fn with_state<R>(&self, f: impl FnOnce(&DeviceState) -> R) -> R {
        f(&*self.device_state.lock().await)
    }

    /// Apply a local change to the cached state, e.g. after a write the
    /// device does not echo back
    pub async fn update_state<R>(&self, f: impl FnOnce(&mut DeviceState) -> R) -> R {
        f(&mut *self.device_state.lock().await)
    }

    /// Register interest in the delivery report of `packet_id`. Call before
    /// sending so a fast ack is not missed.
    pub async fn expect_delivery(&self, packet_id: u32) -> oneshot::Receiver<DeliveryStatus> {
        let (tx, rx) = oneshot::channel();
        self.ack_waiters.lock().await.insert(packet_id, tx);
        rx
    }

    /// Wait up to `timeout` for a report registered with [`Self::expect_delivery`]
    pub async fn await_delivery(
        &self,
        packet_id: u32,
        report: oneshot::Receiver<DeliveryStatus>,
        timeout: Duration,
    ) -> DeliveryStatus {
        match tokio::time::timeout(timeout, report).await {
            Ok(Ok(status)) => status,
            // Sender dropped with the processor, or no report in time
            Ok(Err(_)) | Err(_) => {
                self.ack_waiters.lock().await.remove(&packet_id);
                debug!("No delivery report for packet {packet_id}");
                DeliveryStatus::TimedOut
            }
        }
    }

    /// Receive text messages heard from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ReceivedMessage> {
        self.messages.resubscribe()
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if let Some(processor) = self.packet_processor.take() {
            processor.abort();
        }
        if self.api.is_some() {
            debug!("Session dropped without close; the stream is released with the runtime");
        }
    }
}

/// Open a session, run `f` and close the session on every exit path.
///
/// An error from `f` takes precedence over a failure while closing.
pub async fn run_session<T, F>(target: ConnectionTarget, timeout: Duration, f: F) -> Result<T>
where
    F: AsyncFnOnce(&mut DeviceSession) -> Result<T>,
{
    let mut session = DeviceSession::open(target, timeout).await?;
    let outcome = f(&mut session).await;
    let closed = session.close().await;
    settle(outcome, closed)
}

/// Combine the work's outcome with the close result; the work's error wins
fn settle<T>(outcome: Result<T>, closed: Result<()>) -> Result<T> {
    match (outcome, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_err)) => {
            warn!("Failed to close session after error: {close_err:#}");
            Err(e)
        }
    }
}

async fn open_stream(
    target: &ConnectionTarget,
) -> Result<(PacketReceiver, ConnectedStreamApi<Connected>)> {
    let stream_api = StreamApi::new();

    let connected = match target {
        ConnectionTarget::Ble(_name) => {
            #[cfg(feature = "bluetooth")]
            {
                info!("Connecting via Bluetooth to {name}", name = _name);
                // Try as MAC address first, then as name
                let ble_id = utils::stream::BleId::from_mac_address(_name)
                    .unwrap_or_else(|_| utils::stream::BleId::from_name(_name));
                let stream = utils::stream::build_ble_stream(&ble_id, Duration::from_secs(10))
                    .await
                    .map_err(|e| SessionError::Connection(format!("bluetooth: {e}")))?;
                stream_api.connect(stream).await
            }
            #[cfg(not(feature = "bluetooth"))]
            {
                return Err(SessionError::Connection(
                    "Bluetooth support not compiled. Build with --features bluetooth".into(),
                )
                .into());
            }
        }

        ConnectionTarget::Tcp(address) => {
            info!("Connecting via TCP to {address}");
            let stream = utils::stream::build_tcp_stream(address.clone())
                .await
                .context("Failed to connect via TCP")
                .map_err(|e| SessionError::Connection(format!("{e:#}")))?;
            stream_api.connect(stream).await
        }

        ConnectionTarget::Serial(port) => {
            ensure_device_node(port)?;
            info!("Connecting via serial port {port}");
            let stream = utils::stream::build_serial_stream(
                port.clone(),
                None, // Use default baud rate
                None, // Use default DTR
                None, // Use default RTS
            )
            .context("Failed to connect via serial")
            .map_err(|e| SessionError::classify_open_error(port, &e))?;
            stream_api.connect(stream).await
        }

        ConnectionTarget::AutoDetect => {
            info!("Auto-detecting serial port...");
            let port = detect_serial_port()?;
            info!("Using auto-detected port: {port}");

            let stream = utils::stream::build_serial_stream(port.clone(), None, None, None)
                .context("Failed to connect to auto-detected serial port")
                .map_err(|e| SessionError::classify_open_error(&port, &e))?;
            stream_api.connect(stream).await
        }
    };

    Ok(connected)
}

/// Serial ports the OS reports, in its order
pub fn list_serial_ports() -> Result<Vec<String>> {
    utils::stream::available_serial_ports()
        .map_err(|e| SessionError::Connection(format!("failed to list serial ports: {e}")).into())
}

/// First serial port the OS reports
pub fn detect_serial_port() -> Result<String> {
    list_serial_ports()?.into_iter().next().ok_or_else(|| {
        SessionError::DeviceNotFound {
            path: "any serial port (use --port or --host)".to_string(),
        }
        .into()
    })
}

/// Fail early on a missing device node; opening it is left to the library
fn ensure_device_node(port: &str) -> Result<(), SessionError> {
    if cfg!(unix) && port.starts_with('/') && !Path::new(port).exists() {
        return Err(SessionError::DeviceNotFound {
            path: port.to_string(),
        });
    }
    Ok(())
}
