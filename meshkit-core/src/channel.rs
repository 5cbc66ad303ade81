use crate::admin;
use crate::connection::DeviceSession;
use crate::error::SessionError;
use crate::psk::Psk;
use crate::state::{DeviceState, MAX_CHANNELS};
use anyhow::Result;
use meshtastic::protobufs;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChannelSummary {
    pub index: u32,
    pub name: String,
    pub role: String,
    pub has_psk: bool,
    pub uplink_enabled: bool,
    pub downlink_enabled: bool,
}

/// Enabled channels, in slot order
pub fn summarize(state: &DeviceState) -> Vec<ChannelSummary> {
    state
        .channels
        .iter()
        .filter(|ch| !ch.is_disabled())
        .map(|ch| ChannelSummary {
            index: ch.index,
            name: ch.name.clone(),
            role: ch.role.clone(),
            has_psk: ch.has_psk,
            uplink_enabled: ch.settings.as_ref().is_some_and(|s| s.uplink_enabled),
            downlink_enabled: ch.settings.as_ref().is_some_and(|s| s.downlink_enabled),
        })
        .collect()
}

/// List all channels configured on the device
pub async fn list_channels(session: &DeviceSession) -> Result<Vec<ChannelSummary>> {
    let state = session.get_device_state().await;
    Ok(summarize(&state))
}

/// Index of the enabled channel whose display name matches `name`
pub fn find_channel_by_name(state: &DeviceState, name: &str) -> Option<u32> {
    state
        .channels
        .iter()
        .find(|ch| !ch.is_disabled() && ch.name == name)
        .map(|ch| ch.index)
}

/// First secondary slot not in use
pub fn next_free_index(state: &DeviceState) -> Result<u32, SessionError> {
    (1..MAX_CHANNELS)
        .find(|index| state.channel(*index).is_none_or(|ch| ch.is_disabled()))
        .ok_or_else(|| {
            SessionError::Channel(format!("all {MAX_CHANNELS} channel slots are in use"))
        })
}

/// Build the channel to write for `index`, keeping whatever the device
/// already has for fields that are not being changed
pub fn build_channel(
    state: &DeviceState,
    index: u32,
    name: Option<&str>,
    psk: Option<&Psk>,
) -> protobufs::Channel {
    let mut settings = state
        .channel(index)
        .and_then(|ch| ch.settings.clone())
        .unwrap_or_default();

    if let Some(name) = name {
        settings.name = name.to_string();
    }
    if let Some(psk) = psk {
        settings.psk = psk.to_bytes();
    }

    let role = if index == 0 {
        protobufs::channel::Role::Primary
    } else {
        protobufs::channel::Role::Secondary
    };

    protobufs::Channel {
        index: index as i32,
        settings: Some(settings),
        role: role as i32,
    }
}

/// Add a secondary channel and return its slot
pub async fn add_channel(
    session: &mut DeviceSession,
    name: &str,
    psk: &Psk,
    uplink_enabled: bool,
    downlink_enabled: bool,
) -> Result<u32> {
    let state = session.get_device_state().await;

    if find_channel_by_name(&state, name).is_some() {
        return Err(SessionError::Channel(format!("channel '{name}' already exists")).into());
    }
    let index = next_free_index(&state)?;

    let mut channel = build_channel(&state, index, Some(name), Some(psk));
    if let Some(settings) = channel.settings.as_mut() {
        settings.uplink_enabled = uplink_enabled;
        settings.downlink_enabled = downlink_enabled;
    }

    info!("Adding channel '{name}' at index {index}");
    write_channel(session, channel).await?;
    Ok(index)
}

/// Rename and/or rekey the channel at `index`
pub async fn set_channel(
    session: &mut DeviceSession,
    index: u32,
    name: Option<&str>,
    psk: Option<&Psk>,
) -> Result<()> {
    if index >= MAX_CHANNELS {
        return Err(SessionError::Channel(format!("channel index {index} out of range")).into());
    }

    let state = session.get_device_state().await;
    let channel = build_channel(&state, index, name, psk);

    info!(
        "Configuring channel {index} name={} psk={}",
        name.unwrap_or("(unchanged)"),
        if psk.is_some() { "(provided)" } else { "(unchanged)" }
    );
    write_channel(session, channel).await
}

async fn write_channel(session: &mut DeviceSession, channel: protobufs::Channel) -> Result<()> {
    admin::send(session, admin::set_channel(channel.clone())).await?;

    // The device does not push channel updates, keep the cache in step
    session
        .update_state(|state| state.apply_channel(channel))
        .await;
    Ok(())
}
