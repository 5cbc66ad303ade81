use meshtastic::protobufs;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Number of channel slots a Meshtastic node exposes
pub const MAX_CHANNELS: u32 = 8;

/// Recent text messages kept in the cache; listeners get every message
/// through the session's broadcast channel
pub const MESSAGE_HISTORY: usize = 64;

/// Cached device state from received packets
#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    pub my_node_info: Option<MyNodeInfo>,
    pub nodes: HashMap<u32, NodeInfo>,
    pub channels: Vec<ChannelInfo>,
    pub messages: VecDeque<ReceivedMessage>,
    pub device_config: Option<protobufs::config::DeviceConfig>,
    pub position_config: Option<protobufs::config::PositionConfig>,
    pub lora_config: Option<protobufs::config::LoRaConfig>,
    pub network_config: Option<protobufs::config::NetworkConfig>,
    pub config_complete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MyNodeInfo {
    pub node_num: u32,
    pub node_id: String,
    pub reboot_count: u32,
    pub min_app_version: u32,
    pub device_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub num: u32,
    pub user: User,
    pub last_heard: Option<u64>,
    pub snr: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub long_name: String,
    pub short_name: String,
    pub hw_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub index: u32,
    pub name: String,
    pub role: String,
    pub has_psk: bool,
    pub settings: Option<protobufs::ChannelSettings>,
}

impl ChannelInfo {
    pub fn is_disabled(&self) -> bool {
        self.role == "Disabled"
    }
}

/// A text message heard on the mesh
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReceivedMessage {
    pub from: String,
    pub from_node: u32,
    pub to: String,
    pub to_node: u32,
    pub channel: u32,
    pub channel_name: String,
    pub text: String,
    pub snr: Option<f32>,
    pub rssi: Option<i32>,
    pub received_at: String,
}

/// Display name of a channel slot; unnamed slots follow the firmware's
/// "Unnamed channel N" convention
pub fn channel_display_name(index: u32, name: &str) -> String {
    if name.is_empty() {
        format!("Unnamed channel {index}")
    } else {
        name.to_string()
    }
}

/// `!` prefixed hex id used by Meshtastic for node numbers
pub fn node_id(num: u32) -> String {
    format!("!{num:08x}")
}

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_node(&mut self, node_num: u32, node_info: NodeInfo) {
        self.nodes.insert(node_num, node_info);
    }

    pub fn add_message(&mut self, message: ReceivedMessage) {
        if self.messages.len() == MESSAGE_HISTORY {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }

    pub fn update_channel(&mut self, channel: ChannelInfo) {
        if let Some(existing) = self.channels.iter_mut().find(|c| c.index == channel.index) {
            *existing = channel;
        } else {
            self.channels.push(channel);
            self.channels.sort_by_key(|c| c.index);
        }
    }

    pub fn set_my_node_info(&mut self, info: MyNodeInfo) {
        self.my_node_info = Some(info);
    }

    pub fn my_node_num(&self) -> Option<u32> {
        self.my_node_info.as_ref().map(|info| info.node_num)
    }

    /// The local node's own entry in the node database
    pub fn my_node(&self) -> Option<&NodeInfo> {
        self.my_node_num().and_then(|num| self.nodes.get(&num))
    }

    pub fn get_node_by_num(&self, node_num: u32) -> Option<&NodeInfo> {
        self.nodes.get(&node_num)
    }

    pub fn channel(&self, index: u32) -> Option<&ChannelInfo> {
        self.channels.iter().find(|c| c.index == index)
    }

    /// Resolve the display name for a channel index, falling back to the
    /// unnamed convention when the slot is unknown
    pub fn channel_name(&self, index: u32) -> String {
        self.channel(index)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| channel_display_name(index, ""))
    }

    pub fn apply_config(&mut self, config: protobufs::Config) {
        use protobufs::config::PayloadVariant;

        match config.payload_variant {
            Some(PayloadVariant::Device(c)) => self.device_config = Some(c),
            Some(PayloadVariant::Position(c)) => self.position_config = Some(c),
            Some(PayloadVariant::Lora(c)) => self.lora_config = Some(c),
            Some(PayloadVariant::Network(c)) => self.network_config = Some(c),
            // Sections meshkit never edits are not cached
            _ => {}
        }
    }

    pub fn apply_channel(&mut self, channel: protobufs::Channel) {
        let index = channel.index as u32;
        let name = channel
            .settings
            .as_ref()
            .map(|s| s.name.as_str())
            .unwrap_or_default();

        self.update_channel(ChannelInfo {
            index,
            name: channel_display_name(index, name),
            role: format!("{:?}", channel.role()),
            has_psk: channel
                .settings
                .as_ref()
                .is_some_and(|s| !s.psk.is_empty()),
            settings: channel.settings,
        });
    }
}
