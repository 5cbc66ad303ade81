use chrono::Utc;
use meshtastic::packet::PacketReceiver;
use meshtastic::{Message, protobufs};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, oneshot, watch};
use tracing::{debug, info, warn};

use crate::state::{DeviceState, MyNodeInfo, NodeInfo, ReceivedMessage, User, node_id};

/// Something a listener outside the state cache cares about
#[derive(Debug, Clone, PartialEq)]
pub enum PacketEvent {
    ConfigComplete(u32),
    TextMessage(ReceivedMessage),
    Delivery { request_id: u32, status: DeliveryStatus },
    Rebooted,
}

/// Outcome of a packet sent with `want_ack`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Failed(String),
    TimedOut,
}

pub(crate) type AckWaiters = Arc<Mutex<HashMap<u32, oneshot::Sender<DeliveryStatus>>>>;

/// Decode incoming packets into `device_state` until the stream closes
pub(crate) async fn run(
    mut receiver: PacketReceiver,
    device_state: Arc<Mutex<DeviceState>>,
    config_complete: watch::Sender<u32>,
    messages: broadcast::Sender<ReceivedMessage>,
    ack_waiters: AckWaiters,
) {
    info!("Starting packet processing loop");

    while let Some(packet) = receiver.recv().await {
        let event = {
            let mut state = device_state.lock().await;
            apply_from_radio(&mut state, packet)
        };

        match event {
            Some(PacketEvent::ConfigComplete(id)) => {
                debug!("Device finished sending config {id}");
                config_complete.send_replace(id);
            }
            Some(PacketEvent::TextMessage(message)) => {
                // No subscribers is fine; the message stays in the state cache
                let _ = messages.send(message);
            }
            Some(PacketEvent::Delivery { request_id, status }) => {
                if let Some(waiter) = ack_waiters.lock().await.remove(&request_id) {
                    debug!("Delivery report for packet {request_id}: {status:?}");
                    let _ = waiter.send(status);
                }
            }
            Some(PacketEvent::Rebooted) => warn!("Device reported a reboot"),
            None => {}
        }
    }

    info!("Packet processing loop ended, device stream closed");
}

/// Fold one `FromRadio` packet into the cached state
pub fn apply_from_radio(
    state: &mut DeviceState,
    from_radio: protobufs::FromRadio,
) -> Option<PacketEvent> {
    use protobufs::from_radio::PayloadVariant;

    if let Some(message) = extract_text_message(state, &from_radio) {
        debug!("Received text message from {}", message.from);
        state.add_message(message.clone());
        return Some(PacketEvent::TextMessage(message));
    }

    match from_radio.payload_variant? {
        PayloadVariant::MyInfo(my_info) => {
            state.set_my_node_info(MyNodeInfo {
                node_num: my_info.my_node_num,
                node_id: node_id(my_info.my_node_num),
                reboot_count: my_info.reboot_count,
                min_app_version: my_info.min_app_version,
                device_id: hex::encode(my_info.device_id),
            });
            debug!("Updated my node info");
            None
        }

        PayloadVariant::NodeInfo(node_info) => {
            let user = node_info.user.clone().unwrap_or_default();
            state.update_node(
                node_info.num,
                NodeInfo {
                    id: node_id(node_info.num),
                    num: node_info.num,
                    user: User {
                        id: user.id.clone(),
                        long_name: user.long_name.clone(),
                        short_name: user.short_name.clone(),
                        hw_model: Some(format!("{:?}", user.hw_model())),
                    },
                    last_heard: (node_info.last_heard > 0).then_some(node_info.last_heard as u64),
                    snr: Some(node_info.snr),
                },
            );
            debug!("Updated node info for {:08x}", node_info.num);
            None
        }

        PayloadVariant::Channel(channel) => {
            debug!("Updated channel {}", channel.index);
            state.apply_channel(channel);
            None
        }

        PayloadVariant::Config(config) => {
            state.apply_config(config);
            None
        }

        PayloadVariant::ConfigCompleteId(id) => {
            state.config_complete = true;
            Some(PacketEvent::ConfigComplete(id))
        }

        PayloadVariant::Rebooted(_) => {
            state.config_complete = false;
            Some(PacketEvent::Rebooted)
        }

        PayloadVariant::Packet(mesh_packet) => process_mesh_packet(state, mesh_packet),

        _ => None,
    }
}

fn process_mesh_packet(
    state: &mut DeviceState,
    mesh_packet: protobufs::MeshPacket,
) -> Option<PacketEvent> {
    let Some(protobufs::mesh_packet::PayloadVariant::Decoded(data)) = &mesh_packet.payload_variant
    else {
        // Can't process encrypted packets
        return None;
    };

    match data.portnum() {
        protobufs::PortNum::AdminApp => {
            // Replies to config reads carry the fresh section
            if let Ok(admin_msg) = protobufs::AdminMessage::decode(data.payload.as_slice())
                && let Some(protobufs::admin_message::PayloadVariant::GetConfigResponse(config)) =
                    admin_msg.payload_variant
            {
                state.apply_config(config);
            }
            None
        }

        protobufs::PortNum::RoutingApp if data.request_id != 0 => {
            let routing = protobufs::Routing::decode(data.payload.as_slice()).ok()?;
            let status = match routing.variant {
                Some(protobufs::routing::Variant::ErrorReason(0)) | None => {
                    DeliveryStatus::Delivered
                }
                Some(protobufs::routing::Variant::ErrorReason(reason)) => DeliveryStatus::Failed(
                    protobufs::routing::Error::try_from(reason)
                        .map(|e| format!("{e:?}"))
                        .unwrap_or_else(|_| format!("routing error {reason}")),
                ),
                // Route requests/replies are traceroute traffic
                Some(_) => return None,
            };
            Some(PacketEvent::Delivery {
                request_id: data.request_id,
                status,
            })
        }

        _ => None,
    }
}

/// The text message carried by `from_radio`, if it is a decoded text packet
pub fn extract_text_message(
    state: &DeviceState,
    from_radio: &protobufs::FromRadio,
) -> Option<ReceivedMessage> {
    let Some(protobufs::from_radio::PayloadVariant::Packet(packet)) = &from_radio.payload_variant
    else {
        return None;
    };
    match &packet.payload_variant {
        Some(protobufs::mesh_packet::PayloadVariant::Decoded(data))
            if data.portnum() == protobufs::PortNum::TextMessageApp =>
        {
            Some(text_message(state, packet, data))
        }
        _ => None,
    }
}

fn text_message(
    state: &DeviceState,
    packet: &protobufs::MeshPacket,
    data: &protobufs::Data,
) -> ReceivedMessage {
    let received_at = chrono::DateTime::from_timestamp(packet.rx_time as i64, 0)
        .filter(|_| packet.rx_time > 0)
        .unwrap_or_else(Utc::now);

    ReceivedMessage {
        from: node_id(packet.from),
        from_node: packet.from,
        to: node_id(packet.to),
        to_node: packet.to,
        channel: packet.channel,
        channel_name: state.channel_name(packet.channel),
        text: String::from_utf8_lossy(&data.payload).to_string(),
        snr: (packet.rx_snr != 0.0).then_some(packet.rx_snr),
        rssi: (packet.rx_rssi != 0).then_some(packet.rx_rssi),
        received_at: received_at.to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    fn from_radio(variant: protobufs::from_radio::PayloadVariant) -> protobufs::FromRadio {
        protobufs::FromRadio {
            payload_variant: Some(variant),
            ..Default::default()
        }
    }

    fn text_packet(from: u32, channel: u32, text: &str) -> protobufs::FromRadio {
        from_radio(protobufs::from_radio::PayloadVariant::Packet(
            protobufs::MeshPacket {
                from,
                to: 0xffff_ffff,
                channel,
                rx_time: 1_700_000_000,
                rx_snr: 6.25,
                rx_rssi: -90,
                payload_variant: Some(protobufs::mesh_packet::PayloadVariant::Decoded(
                    protobufs::Data {
                        portnum: protobufs::PortNum::TextMessageApp as i32,
                        payload: text.as_bytes().to_vec(),
                        ..Default::default()
                    },
                )),
                ..Default::default()
            },
        ))
    }

    #[test]
    fn config_download_fills_state() -> Result<()> {
        use protobufs::from_radio::PayloadVariant;

        let mut state = DeviceState::new();
        let packets = vec![
            PayloadVariant::MyInfo(protobufs::MyNodeInfo {
                my_node_num: 0xdeadbeef,
                reboot_count: 3,
                ..Default::default()
            }),
            PayloadVariant::Channel(protobufs::Channel {
                index: 0,
                settings: Some(protobufs::ChannelSettings {
                    psk: vec![1],
                    ..Default::default()
                }),
                role: protobufs::channel::Role::Primary as i32,
            }),
            PayloadVariant::Config(protobufs::Config {
                payload_variant: Some(protobufs::config::PayloadVariant::Lora(
                    protobufs::config::LoRaConfig {
                        region: protobufs::config::lo_ra_config::RegionCode::Us as i32,
                        ..Default::default()
                    },
                )),
            }),
        ];

        for packet in packets {
            assert_eq!(apply_from_radio(&mut state, from_radio(packet)), None);
        }
        let event = apply_from_radio(&mut state, from_radio(PayloadVariant::ConfigCompleteId(42)));

        assert_eq!(event, Some(PacketEvent::ConfigComplete(42)));
        assert!(state.config_complete);
        assert_eq!(state.my_node_num(), Some(0xdeadbeef));
        let channel = state.channel(0).context("channel 0 missing")?;
        assert_eq!(channel.name, "Unnamed channel 0");
        assert_eq!(channel.role, "Primary");
        assert!(channel.has_psk);
        let lora = state.lora_config.as_ref().context("lora missing")?;
        assert_eq!(
            lora.region(),
            protobufs::config::lo_ra_config::RegionCode::Us
        );
        Ok(())
    }

    #[test]
    fn text_message_uses_channel_name() -> Result<()> {
        let mut state = DeviceState::new();
        state.apply_channel(protobufs::Channel {
            index: 1,
            settings: Some(protobufs::ChannelSettings {
                name: "ops".to_string(),
                ..Default::default()
            }),
            role: protobufs::channel::Role::Secondary as i32,
        });

        let Some(PacketEvent::TextMessage(message)) =
            apply_from_radio(&mut state, text_packet(0x0a0b0c0d, 1, "hello mesh"))
        else {
            anyhow::bail!("expected a text message");
        };

        assert_eq!(message.text, "hello mesh");
        assert_eq!(message.from, "!0a0b0c0d");
        assert_eq!(message.channel_name, "ops");
        assert_eq!(message.snr, Some(6.25));
        assert_eq!(message.rssi, Some(-90));
        assert!(message.received_at.starts_with("2023-11-14"));
        assert_eq!(state.messages.len(), 1);
        Ok(())
    }

    #[test]
    fn unknown_channel_gets_unnamed_label() {
        let mut state = DeviceState::new();
        let event = apply_from_radio(&mut state, text_packet(1, 5, "hi"));
        let Some(PacketEvent::TextMessage(message)) = event else {
            panic!("expected a text message");
        };
        assert_eq!(message.channel_name, "Unnamed channel 5");
    }

    #[test]
    fn non_text_packets_are_ignored() {
        let mut state = DeviceState::new();
        let packet = from_radio(protobufs::from_radio::PayloadVariant::Packet(
            protobufs::MeshPacket {
                payload_variant: Some(protobufs::mesh_packet::PayloadVariant::Encrypted(vec![
                    1, 2, 3,
                ])),
                ..Default::default()
            },
        ));
        assert_eq!(apply_from_radio(&mut state, packet), None);
        assert_eq!(apply_from_radio(&mut state, protobufs::FromRadio::default()), None);
        assert!(state.messages.is_empty());
    }

    #[test]
    fn extraction_leaves_state_alone() {
        let state = DeviceState::new();
        let message = extract_text_message(&state, &text_packet(9, 0, "ping"));
        assert_eq!(message.map(|m| m.text), Some("ping".to_string()));
        assert!(state.messages.is_empty());
        assert_eq!(extract_text_message(&state, &routing_packet(1, 0)), None);
    }

    fn routing_packet(request_id: u32, reason: i32) -> protobufs::FromRadio {
        let routing = protobufs::Routing {
            variant: Some(protobufs::routing::Variant::ErrorReason(reason)),
        };
        from_radio(protobufs::from_radio::PayloadVariant::Packet(
            protobufs::MeshPacket {
                payload_variant: Some(protobufs::mesh_packet::PayloadVariant::Decoded(
                    protobufs::Data {
                        portnum: protobufs::PortNum::RoutingApp as i32,
                        payload: routing.encode_to_vec(),
                        request_id,
                        ..Default::default()
                    },
                )),
                ..Default::default()
            },
        ))
    }

    #[test]
    fn routing_reports_delivery() {
        let mut state = DeviceState::new();
        assert_eq!(
            apply_from_radio(&mut state, routing_packet(77, 0)),
            Some(PacketEvent::Delivery {
                request_id: 77,
                status: DeliveryStatus::Delivered
            })
        );

        let Some(PacketEvent::Delivery { status, .. }) =
            apply_from_radio(&mut state, routing_packet(78, 5))
        else {
            panic!("expected a delivery report");
        };
        assert!(matches!(status, DeliveryStatus::Failed(_)));

        // Unsolicited routing traffic is not a delivery report
        assert_eq!(apply_from_radio(&mut state, routing_packet(0, 0)), None);
    }

    #[test]
    fn reboot_clears_config_flag() {
        let mut state = DeviceState::new();
        state.config_complete = true;
        let event = apply_from_radio(
            &mut state,
            from_radio(protobufs::from_radio::PayloadVariant::Rebooted(true)),
        );
        assert_eq!(event, Some(PacketEvent::Rebooted));
        assert!(!state.config_complete);
    }
}
