use anyhow::Result;
use comfy_table::Cell;
use meshkit_core::DeviceSession;
use meshkit_core::channel::{ChannelSummary, list_channels};
use meshkit_core::connection::list_serial_ports;
use meshkit_core::region::Region;
use serde::Serialize;

use crate::output::{OutputFormat, create_table, print_json};
use crate::utils::print_info;

#[derive(Debug, Serialize)]
struct NodeSummary {
    pub node_id: String,
    pub node_num: u32,
    pub long_name: String,
    pub short_name: String,
    pub hardware_model: Option<String>,
    pub region: Option<String>,
    pub role: Option<String>,
    pub position_broadcast_secs: Option<u32>,
    pub num_channels: usize,
    pub nodes_heard: usize,
    pub connection: String,
}

pub async fn handle_info(session: &mut DeviceSession, format: OutputFormat) -> Result<()> {
    let state = session.get_device_state().await;
    let node_num = session.my_node_num().await?;
    let me = state.my_node();

    let summary = NodeSummary {
        node_id: meshkit_core::state::node_id(node_num),
        node_num,
        long_name: me.map(|n| n.user.long_name.clone()).unwrap_or_default(),
        short_name: me.map(|n| n.user.short_name.clone()).unwrap_or_default(),
        hardware_model: me.and_then(|n| n.user.hw_model.clone()),
        region: state.lora_config.as_ref().map(|lora| {
            Region::from_code(lora.region())
                .map(|r| r.to_string())
                .unwrap_or_else(|| "UNSET".to_string())
        }),
        role: state
            .device_config
            .as_ref()
            .map(|device| format!("{:?}", device.role())),
        position_broadcast_secs: state
            .position_config
            .as_ref()
            .map(|position| position.position_broadcast_secs),
        num_channels: meshkit_core::channel::summarize(&state).len(),
        nodes_heard: state.nodes.len().saturating_sub(1),
        connection: session.target().to_string(),
    };

    match format {
        OutputFormat::Json => print_json(&summary),
        OutputFormat::Table => {
            let unknown = || "unknown".to_string();
            let mut table = create_table();
            table.set_header(vec![Cell::new("Property"), Cell::new("Value")]);
            table.add_row(vec![Cell::new("Node ID"), Cell::new(&summary.node_id)]);
            table.add_row(vec![Cell::new("Node Number"), Cell::new(summary.node_num)]);
            table.add_row(vec![Cell::new("Long Name"), Cell::new(&summary.long_name)]);
            table.add_row(vec![Cell::new("Short Name"), Cell::new(&summary.short_name)]);
            table.add_row(vec![
                Cell::new("Hardware Model"),
                Cell::new(summary.hardware_model.clone().unwrap_or_else(unknown)),
            ]);
            table.add_row(vec![
                Cell::new("Region"),
                Cell::new(summary.region.clone().unwrap_or_else(unknown)),
            ]);
            table.add_row(vec![
                Cell::new("Role"),
                Cell::new(summary.role.clone().unwrap_or_else(unknown)),
            ]);
            table.add_row(vec![
                Cell::new("Position Broadcast"),
                Cell::new(match summary.position_broadcast_secs {
                    Some(0) => "off".to_string(),
                    Some(secs) => format!("every {secs}s"),
                    None => unknown(),
                }),
            ]);
            table.add_row(vec![Cell::new("Channels"), Cell::new(summary.num_channels)]);
            table.add_row(vec![Cell::new("Nodes Heard"), Cell::new(summary.nodes_heard)]);
            table.add_row(vec![Cell::new("Connection"), Cell::new(&summary.connection)]);
            println!("{table}");
        }
    }
    Ok(())
}

pub async fn handle_channels(session: &mut DeviceSession, format: OutputFormat) -> Result<()> {
    let channels = list_channels(session).await?;

    match format {
        OutputFormat::Json => print_json(&channels),
        OutputFormat::Table => {
            if channels.is_empty() {
                print_info("No channels configured");
            } else {
                println!("{}", channel_table(&channels, None));
            }
        }
    }
    Ok(())
}

/// Channel table; `current` gets a marker in the first column
pub fn channel_table(channels: &[ChannelSummary], current: Option<u32>) -> comfy_table::Table {
    let mut table = create_table();
    table.set_header(vec![
        Cell::new(""),
        Cell::new("Index"),
        Cell::new("Name"),
        Cell::new("Role"),
        Cell::new("PSK"),
        Cell::new("Uplink"),
        Cell::new("Downlink"),
    ]);

    let yes_no = |flag: bool| if flag { "Yes" } else { "No" };
    for channel in channels {
        table.add_row(vec![
            Cell::new(if current == Some(channel.index) { "*" } else { "" }),
            Cell::new(channel.index),
            Cell::new(&channel.name),
            Cell::new(&channel.role),
            Cell::new(yes_no(channel.has_psk)),
            Cell::new(yes_no(channel.uplink_enabled)),
            Cell::new(yes_no(channel.downlink_enabled)),
        ]);
    }
    table
}

pub fn handle_regions(format: OutputFormat) -> Result<()> {
    let regions: Vec<String> = Region::all().iter().map(ToString::to_string).collect();

    match format {
        OutputFormat::Json => print_json(&regions),
        OutputFormat::Table => println!("{}", regions.join("\n")),
    }
    Ok(())
}

pub fn handle_ports(format: OutputFormat) -> Result<()> {
    let ports = list_serial_ports()?;

    match format {
        OutputFormat::Json => print_json(&ports),
        OutputFormat::Table => {
            if ports.is_empty() {
                print_info("No serial ports found");
            }
            for port in ports {
                println!("{port}");
            }
        }
    }
    Ok(())
}
