#[cfg(test)]
mod provisioning_tests {
    use crate::connection::apply_from_radio;
    use crate::provision::{self, ProvisionStep};
    use crate::psk::Psk;
    use crate::region::{DeviceRole, Region};
    use crate::settings::{self, InitSettings};
    use crate::state::DeviceState;
    use crate::{Message, protobufs};
    use anyhow::{Context, Result};
    use protobufs::from_radio::PayloadVariant;
    use std::collections::HashMap;

    const MY_NODE: u32 = 0x1234_abcd;

    /// What a freshly flashed node sends during the config handshake
    fn fresh_device() -> DeviceState {
        let packets = vec![
            PayloadVariant::MyInfo(protobufs::MyNodeInfo {
                my_node_num: MY_NODE,
                ..Default::default()
            }),
            PayloadVariant::NodeInfo(protobufs::NodeInfo {
                num: MY_NODE,
                user: Some(protobufs::User {
                    long_name: "Meshtastic abcd".to_string(),
                    short_name: "abcd".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            PayloadVariant::Config(protobufs::Config {
                payload_variant: Some(protobufs::config::PayloadVariant::Lora(
                    protobufs::config::LoRaConfig {
                        use_preset: true,
                        hop_limit: 3,
                        tx_enabled: true,
                        ..Default::default()
                    },
                )),
            }),
            PayloadVariant::Config(protobufs::Config {
                payload_variant: Some(protobufs::config::PayloadVariant::Position(
                    protobufs::config::PositionConfig {
                        position_broadcast_secs: 900,
                        gps_update_interval: 120,
                        ..Default::default()
                    },
                )),
            }),
            PayloadVariant::Channel(protobufs::Channel {
                index: 0,
                settings: Some(protobufs::ChannelSettings {
                    psk: vec![1],
                    ..Default::default()
                }),
                role: protobufs::channel::Role::Primary as i32,
            }),
            PayloadVariant::ConfigCompleteId(7),
        ];

        let mut state = DeviceState::new();
        for variant in packets {
            apply_from_radio(
                &mut state,
                protobufs::FromRadio {
                    payload_variant: Some(variant),
                    ..Default::default()
                },
            );
        }
        state
    }

    fn env(pairs: &[(&str, &str)]) -> Result<InitSettings> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Ok(InitSettings::from_lookup(|name| map.get(name).cloned())?)
    }

    #[test]
    fn test_fresh_device_handshake() -> Result<()> {
        let state = fresh_device();
        assert!(state.config_complete);
        let me = state.my_node().context("own node missing")?;
        assert_eq!(me.user.short_name, "abcd");
        assert_eq!(me.id, "!1234abcd");
        Ok(())
    }

    #[test]
    fn test_first_boot_provisioning() -> Result<()> {
        let settings = env(&[
            (settings::ENV_REGION, "EU_868"),
            (settings::ENV_OWNER_LONG, "Hilltop Relay"),
            (settings::ENV_OWNER_SHORT, "HTR"),
            (settings::ENV_DEVICE_ROLE, "ROUTER"),
            (settings::ENV_POSITION_BROADCAST, "false"),
            (settings::ENV_CHANNEL_NAME, "hilltop"),
            (settings::ENV_CHANNEL_PSK, "0x000102030405060708090a0b0c0d0e0f"),
        ])?;
        let state = fresh_device();

        let plan = provision::plan(&settings, &state);
        let kinds: Vec<_> = plan
            .changes
            .iter()
            .map(|step| match step {
                ProvisionStep::SetOwner { .. } => "owner",
                ProvisionStep::SetRegion(_) => "region",
                ProvisionStep::SetRole(_) => "role",
                ProvisionStep::SetPositionBroadcast { .. } => "position",
                ProvisionStep::SetWifi { .. } => "wifi",
                ProvisionStep::SetChannel { .. } => "channel",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["owner", "region", "role", "position", "channel"]
        );

        // The region write keeps the modem settings the device already had
        let region = plan
            .changes
            .iter()
            .find(|step| matches!(step, ProvisionStep::SetRegion(_)))
            .context("no region step")?;
        let message = provision::step_message(region, &state);
        let bytes = message.encode_to_vec();
        let decoded = protobufs::AdminMessage::decode(bytes.as_slice())?;
        let Some(protobufs::admin_message::PayloadVariant::SetConfig(config)) =
            decoded.payload_variant
        else {
            anyhow::bail!("expected set_config, got {:?}", decoded.payload_variant);
        };
        let Some(protobufs::config::PayloadVariant::Lora(lora)) = config.payload_variant else {
            anyhow::bail!("expected lora section");
        };
        assert_eq!(
            lora.region(),
            protobufs::config::lo_ra_config::RegionCode::Eu868
        );
        assert!(lora.use_preset);
        assert_eq!(lora.hop_limit, 3);
        Ok(())
    }

    #[test]
    fn test_position_disable_keeps_gps_interval() -> Result<()> {
        let state = fresh_device();
        let message = provision::step_message(
            &ProvisionStep::SetPositionBroadcast { secs: 0 },
            &state,
        );
        let Some(protobufs::admin_message::PayloadVariant::SetConfig(config)) =
            message.payload_variant
        else {
            anyhow::bail!("expected set_config");
        };
        let Some(protobufs::config::PayloadVariant::Position(position)) = config.payload_variant
        else {
            anyhow::bail!("expected position section");
        };
        assert_eq!(position.position_broadcast_secs, 0);
        assert_eq!(position.gps_update_interval, 120);
        Ok(())
    }

    #[test]
    fn test_second_run_is_idempotent() -> Result<()> {
        let settings = InitSettings {
            owner_long: Some("Hilltop Relay".to_string()),
            owner_short: Some("HTR".to_string()),
            region: Some(Region::Eu868),
            role: Some(DeviceRole::Router),
            position_broadcast: Some(false),
            channel_name: Some("hilltop".to_string()),
            channel_psk: Some(Psk::passphrase("correct horse")),
            ..Default::default()
        };
        let mut state = fresh_device();

        // Apply every planned step locally, the way the device would
        let first = provision::plan(&settings, &state);
        assert!(!first.is_noop());
        for step in &first.changes {
            let message = provision::step_message(step, &state);
            match message.payload_variant.context("empty admin message")? {
                protobufs::admin_message::PayloadVariant::SetConfig(config) => {
                    state.apply_config(config)
                }
                protobufs::admin_message::PayloadVariant::SetChannel(channel) => {
                    state.apply_channel(channel)
                }
                protobufs::admin_message::PayloadVariant::SetOwner(user) => {
                    let node = state.nodes.get_mut(&MY_NODE).context("own node missing")?;
                    node.user.long_name = user.long_name;
                    node.user.short_name = user.short_name;
                }
                other => anyhow::bail!("unexpected admin message {other:?}"),
            }
        }

        let second = provision::plan(&settings, &state);
        assert!(second.is_noop(), "still planned: {:?}", second.changes);
        assert_eq!(second.skipped.len(), 5);
        Ok(())
    }

    #[test]
    fn test_bad_settings_stop_before_planning() {
        let err = env(&[(settings::ENV_REGION, "MARS")]).unwrap_err();
        assert!(err.to_string().contains("MARS"));
    }
}

#[cfg(test)]
mod message_tests {
    use crate::connection::{PacketEvent, apply_from_radio};
    use crate::message::resolve_channel;
    use crate::protobufs;
    use crate::state::DeviceState;
    use anyhow::{Context, Result};

    #[test]
    fn test_heard_message_is_cached_and_resolvable() -> Result<()> {
        let mut state = DeviceState::new();
        state.apply_channel(protobufs::Channel {
            index: 2,
            settings: Some(protobufs::ChannelSettings {
                name: "ops".to_string(),
                ..Default::default()
            }),
            role: protobufs::channel::Role::Secondary as i32,
        });

        let packet = protobufs::FromRadio {
            payload_variant: Some(protobufs::from_radio::PayloadVariant::Packet(
                protobufs::MeshPacket {
                    from: 0x0000_00aa,
                    to: 0xffff_ffff,
                    channel: 2,
                    payload_variant: Some(protobufs::mesh_packet::PayloadVariant::Decoded(
                        protobufs::Data {
                            portnum: protobufs::PortNum::TextMessageApp as i32,
                            payload: b"radio check".to_vec(),
                            ..Default::default()
                        },
                    )),
                    ..Default::default()
                },
            )),
            ..Default::default()
        };

        let event = apply_from_radio(&mut state, packet).context("no event")?;
        let PacketEvent::TextMessage(message) = event else {
            anyhow::bail!("expected a text message, got {event:?}");
        };
        assert_eq!(message.channel_name, "ops");
        assert_eq!(message.from, "!000000aa");
        assert_eq!(state.messages.len(), 1);
        assert_eq!(resolve_channel(&state, &message.channel_name)?, 2);
        Ok(())
    }
}

#[cfg(test)]
mod state_tests {
    use crate::state::{DeviceState, MESSAGE_HISTORY, ReceivedMessage, node_id};
    use anyhow::{Context, Result};

    fn message(n: usize) -> ReceivedMessage {
        ReceivedMessage {
            from: node_id(1),
            from_node: 1,
            to: node_id(0xffff_ffff),
            to_node: 0xffff_ffff,
            channel: 0,
            channel_name: "Unnamed channel 0".to_string(),
            text: format!("message {n}"),
            snr: None,
            rssi: None,
            received_at: "2024-01-01T00:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn test_message_history_is_bounded() -> Result<()> {
        let mut state = DeviceState::new();
        for n in 0..MESSAGE_HISTORY + 10 {
            state.add_message(message(n));
        }

        assert_eq!(state.messages.len(), MESSAGE_HISTORY);
        let oldest = state.messages.front().context("history empty")?;
        assert_eq!(oldest.text, "message 10");
        let newest = state.messages.back().context("history empty")?;
        assert_eq!(newest.text, format!("message {}", MESSAGE_HISTORY + 9));
        Ok(())
    }
}
