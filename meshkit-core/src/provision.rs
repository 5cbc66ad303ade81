//! Bring a device in line with [`InitSettings`].
//!
//! Planning is pure: it compares the desired settings with the cached
//! device state and keeps only the writes that change something. Execution
//! sends the writes inside one edit transaction so the node applies them
//! together.

use crate::admin;
use crate::channel::build_channel;
use crate::connection::DeviceSession;
use crate::error::SessionError;
use crate::psk::Psk;
use crate::region::{DeviceRole, Region};
use crate::settings::InitSettings;
use crate::state::DeviceState;
use anyhow::Result;
use meshtastic::protobufs;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

use protobufs::admin_message::PayloadVariant as Admin;

/// Broadcast interval used when position broadcasting gets switched on
pub const POSITION_BROADCAST_SECS: u32 = 15;

#[derive(Debug, Clone, PartialEq)]
pub enum ProvisionStep {
    SetOwner { long_name: String, short_name: String },
    SetRegion(Region),
    SetRole(DeviceRole),
    SetPositionBroadcast { secs: u32 },
    SetWifi { ssid: String, psk: String },
    SetChannel {
        index: u32,
        name: Option<String>,
        psk: Option<Psk>,
    },
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetOwner {
                long_name,
                short_name,
            } => write!(f, "owner long='{long_name}' short='{short_name}'"),
            Self::SetRegion(region) => write!(f, "region {region}"),
            Self::SetRole(role) => write!(f, "device role {role}"),
            Self::SetPositionBroadcast { secs: 0 } => f.write_str("position broadcast OFF"),
            Self::SetPositionBroadcast { secs } => write!(f, "position broadcast every {secs}s"),
            Self::SetWifi { ssid, .. } => write!(f, "Wi-Fi ssid='{ssid}'"),
            Self::SetChannel { index, name, psk } => write!(
                f,
                "channel index={index} name={} psk={}",
                name.as_deref().unwrap_or("(unchanged)"),
                if psk.is_some() { "(provided)" } else { "(none)" }
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Skipped {
    pub setting: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub changes: Vec<ProvisionStep>,
    pub skipped: Vec<Skipped>,
}

impl Plan {
    fn skip(&mut self, setting: &'static str, reason: impl Into<String>) {
        self.skipped.push(Skipped {
            setting,
            reason: reason.into(),
        });
    }

    pub fn is_noop(&self) -> bool {
        self.changes.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
    pub applied: Vec<String>,
    pub skipped: Vec<Skipped>,
    /// The device resent its configuration after the writes
    pub verified: bool,
}

/// Work out which writes `settings` needs on a device in `state`
pub fn plan(settings: &InitSettings, state: &DeviceState) -> Plan {
    let mut plan = Plan::default();

    plan_owner(&mut plan, settings, state);

    match settings.region {
        None => plan.skip("region", "no region specified"),
        Some(region) => {
            let current = state
                .lora_config
                .as_ref()
                .and_then(|lora| Region::from_code(lora.region()));
            if current == Some(region) {
                plan.skip("region", format!("already set to {region}"));
            } else {
                plan.changes.push(ProvisionStep::SetRegion(region));
            }
        }
    }

    if let Some(role) = settings.role {
        let current = state.device_config.as_ref().map(|device| device.role());
        if current == Some(role.role()) {
            plan.skip("role", format!("already {role}"));
        } else {
            plan.changes.push(ProvisionStep::SetRole(role));
        }
    }

    if let Some(enabled) = settings.position_broadcast {
        let current = state
            .position_config
            .as_ref()
            .map(|position| position.position_broadcast_secs)
            .unwrap_or_default();
        if enabled == (current > 0) {
            plan.skip("position_broadcast", "already in the desired state");
        } else {
            plan.changes.push(ProvisionStep::SetPositionBroadcast {
                secs: if enabled { POSITION_BROADCAST_SECS } else { 0 },
            });
        }
    }

    if let Some(ssid) = &settings.wifi_ssid {
        let psk = settings.wifi_psk.clone().unwrap_or_default();
        let unchanged = state.network_config.as_ref().is_some_and(|network| {
            network.wifi_enabled && network.wifi_ssid == *ssid && network.wifi_psk == psk
        });
        if unchanged {
            plan.skip("wifi", format!("already joined to '{ssid}'"));
        } else {
            plan.changes.push(ProvisionStep::SetWifi {
                ssid: ssid.clone(),
                psk,
            });
        }
    }

    plan_channel(&mut plan, settings, state);

    plan
}

fn plan_owner(plan: &mut Plan, settings: &InitSettings, state: &DeviceState) {
    if settings.owner_long.is_none() && settings.owner_short.is_none() {
        return;
    }

    let current = state.my_node().map(|node| &node.user);
    let long_name = settings
        .owner_long
        .clone()
        .or_else(|| current.map(|user| user.long_name.clone()))
        .unwrap_or_default();
    let short_name = settings
        .owner_short
        .clone()
        .or_else(|| current.map(|user| user.short_name.clone()))
        .unwrap_or_default();

    let unchanged =
        current.is_some_and(|user| user.long_name == long_name && user.short_name == short_name);
    if unchanged {
        plan.skip("owner", "already set");
    } else {
        plan.changes.push(ProvisionStep::SetOwner {
            long_name,
            short_name,
        });
    }
}

fn plan_channel(plan: &mut Plan, settings: &InitSettings, state: &DeviceState) {
    if settings.channel_name.is_none() && settings.channel_psk.is_none() {
        return;
    }

    let index = settings.channel_index;
    let current = state.channel(index).and_then(|ch| ch.settings.as_ref());
    let name_matches = settings
        .channel_name
        .as_ref()
        .is_none_or(|name| current.is_some_and(|s| s.name == *name));
    let psk_matches = settings
        .channel_psk
        .as_ref()
        .is_none_or(|psk| current.is_some_and(|s| s.psk == psk.to_bytes()));

    if name_matches && psk_matches {
        plan.skip("channel", format!("channel {index} already configured"));
    } else {
        plan.changes.push(ProvisionStep::SetChannel {
            index,
            name: settings.channel_name.clone(),
            psk: settings.channel_psk.clone(),
        });
    }
}

/// Admin message for `step`, merged into the device's current config so
/// untouched fields keep their values
pub fn step_message(step: &ProvisionStep, state: &DeviceState) -> protobufs::AdminMessage {
    use protobufs::config::PayloadVariant;

    match step {
        ProvisionStep::SetOwner {
            long_name,
            short_name,
        } => admin::set_owner(long_name, short_name),

        ProvisionStep::SetRegion(region) => {
            let mut lora = state.lora_config.clone().unwrap_or_default();
            lora.set_region(region.code());
            admin::set_config(PayloadVariant::Lora(lora))
        }

        ProvisionStep::SetRole(role) => {
            let mut device = state.device_config.clone().unwrap_or_default();
            device.set_role(role.role());
            admin::set_config(PayloadVariant::Device(device))
        }

        ProvisionStep::SetPositionBroadcast { secs } => {
            let mut position = state.position_config.clone().unwrap_or_default();
            position.position_broadcast_secs = *secs;
            admin::set_config(PayloadVariant::Position(position))
        }

        ProvisionStep::SetWifi { ssid, psk } => {
            let mut network = state.network_config.clone().unwrap_or_default();
            network.wifi_enabled = true;
            network.wifi_ssid = ssid.clone();
            network.wifi_psk = psk.clone();
            admin::set_config(PayloadVariant::Network(network))
        }

        ProvisionStep::SetChannel { index, name, psk } => admin::set_channel(build_channel(
            state,
            *index,
            name.as_deref(),
            psk.as_ref(),
        )),
    }
}

/// Send the planned writes and wait for the device to settle
pub async fn execute(
    session: &mut DeviceSession,
    plan: Plan,
    settle_timeout: Duration,
) -> Result<ProvisionReport> {
    let Plan { changes, skipped } = plan;

    for skip in &skipped {
        info!("Skipping {}: {}", skip.setting, skip.reason);
    }

    if changes.is_empty() {
        info!("Device already matches the requested settings");
        return Ok(ProvisionReport {
            applied: Vec::new(),
            skipped,
            verified: true,
        });
    }

    let state = session.get_device_state().await;
    let failed = |step: &str, e: anyhow::Error| SessionError::Provision(format!("{step}: {e:#}"));

    admin::send(session, admin::begin_edit())
        .await
        .map_err(|e| failed("begin edit", e))?;

    let mut applied = Vec::with_capacity(changes.len());
    for step in &changes {
        info!("Setting {step}");
        let message = step_message(step, &state);
        let written_channel = match &message.payload_variant {
            Some(Admin::SetChannel(channel)) => Some(channel.clone()),
            _ => None,
        };
        admin::send(session, message)
            .await
            .map_err(|e| failed(&step.to_string(), e))?;

        // Channel writes are not echoed back until the next config download
        if let Some(channel) = written_channel {
            session
                .update_state(|state| state.apply_channel(channel))
                .await;
        }
        applied.push(step.to_string());
    }

    admin::send(session, admin::commit_edit())
        .await
        .map_err(|e| failed("commit", e))?;

    info!("Waiting for config to flush to device...");
    let verified = match session.refresh(settle_timeout).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Device did not resend its configuration ({e:#}); it may be rebooting");
            false
        }
    };

    Ok(ProvisionReport {
        applied,
        skipped,
        verified,
    })
}
