use crate::connection::DeviceSession;
use anyhow::Result;
use meshtastic::{Message, protobufs};
use tracing::debug;

use protobufs::admin_message::PayloadVariant as Admin;

pub fn set_owner(long_name: &str, short_name: &str) -> protobufs::AdminMessage {
    wrap(Admin::SetOwner(protobufs::User {
        long_name: long_name.to_string(),
        short_name: short_name.to_string(),
        ..Default::default()
    }))
}

pub fn set_config(payload: protobufs::config::PayloadVariant) -> protobufs::AdminMessage {
    wrap(Admin::SetConfig(protobufs::Config {
        payload_variant: Some(payload),
    }))
}

pub fn set_channel(channel: protobufs::Channel) -> protobufs::AdminMessage {
    wrap(Admin::SetChannel(channel))
}

/// Hold config writes until commit so the node reboots at most once
pub fn begin_edit() -> protobufs::AdminMessage {
    wrap(Admin::BeginEditSettings(true))
}

pub fn commit_edit() -> protobufs::AdminMessage {
    wrap(Admin::CommitEditSettings(true))
}

fn wrap(variant: Admin) -> protobufs::AdminMessage {
    protobufs::AdminMessage {
        payload_variant: Some(variant),
        session_passkey: Vec::new(),
    }
}

/// Wrap an admin message in a mesh packet addressed to the local node
pub fn to_mesh_packet(
    admin_msg: &protobufs::AdminMessage,
    my_node_num: u32,
) -> protobufs::MeshPacket {
    protobufs::MeshPacket {
        payload_variant: Some(protobufs::mesh_packet::PayloadVariant::Decoded(
            protobufs::Data {
                portnum: protobufs::PortNum::AdminApp as i32,
                payload: admin_msg.encode_to_vec(),
                want_response: true,
                ..Default::default()
            },
        )),
        from: 0,
        to: my_node_num,
        id: rand::random::<u32>(),
        want_ack: true,
        priority: protobufs::mesh_packet::Priority::Reliable as i32,
        ..Default::default()
    }
}

/// Send an admin message to the local node
pub async fn send(session: &mut DeviceSession, admin_msg: protobufs::AdminMessage) -> Result<()> {
    let my_node_num = session.my_node_num().await?;
    let mesh_packet = to_mesh_packet(&admin_msg, my_node_num);
    debug!(
        "Sending admin message {:?} as packet {}",
        admin_msg.payload_variant.as_ref().map(variant_name),
        mesh_packet.id
    );

    session
        .get_api()?
        .send_to_radio_packet(Some(protobufs::to_radio::PayloadVariant::Packet(
            mesh_packet,
        )))
        .await?;

    Ok(())
}

fn variant_name(variant: &Admin) -> &'static str {
    match variant {
        Admin::SetOwner(_) => "set_owner",
        Admin::SetConfig(_) => "set_config",
        Admin::SetChannel(_) => "set_channel",
        Admin::BeginEditSettings(_) => "begin_edit_settings",
        Admin::CommitEditSettings(_) => "commit_edit_settings",
        _ => "other",
    }
}
