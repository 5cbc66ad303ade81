use crate::channel::find_channel_by_name;
use crate::connection::{DeliveryStatus, DeviceSession};
use crate::error::SessionError;
use crate::state::{DeviceState, ReceivedMessage};
use anyhow::{Result, ensure};
use meshtastic::protobufs;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

/// Largest text payload the firmware accepts
pub const MAX_TEXT_LEN: usize = 200;

/// Destination address of a broadcast
pub const BROADCAST_ADDR: u32 = 0xffff_ffff;

#[derive(Debug, Clone, Serialize)]
pub struct SentMessage {
    pub text: String,
    pub destination: String,
    pub channel: u32,
    pub packet_id: u32,
    pub delivery: Option<DeliveryStatus>,
}

/// Send a text message to the mesh network.
///
/// With `ack_timeout` set, waits for the delivery report; broadcasts are
/// acknowledged implicitly when the first neighbour rebroadcasts them.
pub async fn send_text_message(
    session: &mut DeviceSession,
    text: &str,
    destination: Option<u32>,
    channel: u32,
    ack_timeout: Option<Duration>,
) -> Result<SentMessage> {
    ensure!(!text.is_empty(), "Message text is empty");
    ensure!(
        text.len() <= MAX_TEXT_LEN,
        "Message is {} bytes, the limit is {MAX_TEXT_LEN}",
        text.len()
    );

    let packet = text_packet(text, destination, channel, ack_timeout.is_some());
    let packet_id = packet.id;
    // Registered before sending so a fast ack is not missed
    let report = match ack_timeout {
        Some(_) => Some(session.expect_delivery(packet_id).await),
        None => None,
    };

    session
        .get_api()?
        .send_to_radio_packet(Some(protobufs::to_radio::PayloadVariant::Packet(packet)))
        .await?;
    debug!("Text message {packet_id} sent to {destination:?} on channel {channel}");

    let delivery = match (report, ack_timeout) {
        (Some(report), Some(timeout)) => {
            Some(session.await_delivery(packet_id, report, timeout).await)
        }
        _ => None,
    };

    Ok(SentMessage {
        text: text.to_string(),
        destination: destination
            .map(crate::state::node_id)
            .unwrap_or_else(|| "Broadcast".to_string()),
        channel,
        packet_id,
        delivery,
    })
}

/// Mesh packet carrying `text`. Its `id` is what routing acks refer to in
/// `request_id`.
pub fn text_packet(
    text: &str,
    destination: Option<u32>,
    channel: u32,
    want_ack: bool,
) -> protobufs::MeshPacket {
    protobufs::MeshPacket {
        payload_variant: Some(protobufs::mesh_packet::PayloadVariant::Decoded(
            protobufs::Data {
                portnum: protobufs::PortNum::TextMessageApp as i32,
                payload: text.as_bytes().to_vec(),
                ..Default::default()
            },
        )),
        // 0 lets the radio fill in the local node
        from: 0,
        to: destination.unwrap_or(BROADCAST_ADDR),
        channel,
        id: rand::random::<u32>().max(1),
        want_ack,
        ..Default::default()
    }
}

/// Resolve a channel given by display name or by index
pub fn resolve_channel(state: &DeviceState, channel: &str) -> Result<u32, SessionError> {
    if let Some(index) = find_channel_by_name(state, channel) {
        return Ok(index);
    }
    channel
        .parse::<u32>()
        .ok()
        .filter(|index| state.channel(*index).is_some_and(|ch| !ch.is_disabled()))
        .ok_or_else(|| SessionError::Channel(format!("channel '{channel}' not found")))
}

/// What [`collect_messages`] gathered before it stopped
#[derive(Debug, Clone, Default)]
pub struct Collected {
    pub messages: Vec<ReceivedMessage>,
    /// The device went away before `limit` or `duration` was reached
    pub stream_closed: bool,
}

impl Collected {
    /// The messages, or a connection error if the device went away
    pub fn into_result(self) -> Result<Vec<ReceivedMessage>, SessionError> {
        if self.stream_closed {
            Err(SessionError::stream_closed())
        } else {
            Ok(self.messages)
        }
    }
}

/// Collect messages until `limit` arrive, `duration` passes or the device
/// goes away
pub async fn collect_messages(
    receiver: &mut broadcast::Receiver<ReceivedMessage>,
    from_node: Option<u32>,
    limit: Option<usize>,
    duration: Duration,
) -> Collected {
    let mut collected = Collected::default();
    let target_count = limit.unwrap_or(usize::MAX);

    // Timing out is the normal way out
    let _ = tokio::time::timeout(duration, async {
        while collected.messages.len() < target_count {
            match next_message(receiver, from_node).await {
                Some(msg) => collected.messages.push(msg),
                None => {
                    collected.stream_closed = true;
                    break;
                }
            }
        }
    })
    .await;

    collected
}

/// Call `callback` for every message until the callback fails. Returns a
/// connection error once the device goes away.
pub async fn monitor_messages<F>(
    receiver: &mut broadcast::Receiver<ReceivedMessage>,
    from_node: Option<u32>,
    mut callback: F,
) -> Result<()>
where
    F: FnMut(ReceivedMessage) -> Result<()>,
{
    while let Some(msg) = next_message(receiver, from_node).await {
        callback(msg)?;
    }
    Err(SessionError::stream_closed().into())
}

/// Next message matching the sender filter; `None` once the stream closed
pub async fn next_message(
    receiver: &mut broadcast::Receiver<ReceivedMessage>,
    from_node: Option<u32>,
) -> Option<ReceivedMessage> {
    loop {
        match receiver.recv().await {
            Ok(msg) if from_node.is_none_or(|node| node == msg.from_node) => return Some(msg),
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => warn!("Skipped {skipped} messages"),
            Err(RecvError::Closed) => return None,
        }
    }
}
