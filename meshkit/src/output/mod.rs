use colored::*;
use comfy_table::Table;
use meshkit_core::state::ReceivedMessage;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Json,
    Table,
}

impl OutputFormat {
    pub fn from_flag(json: bool) -> Self {
        if json { Self::Json } else { Self::Table }
    }
}

/// Pretty JSON for `--json`
pub fn print_json<T: Serialize>(data: T) {
    if let Ok(json) = serde_json::to_string_pretty(&data) {
        println!("{json}");
    }
}

pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(comfy_table::presets::UTF8_FULL)
        .apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS);
    table
}

/// One received message, as a JSON line or a coloured text line
pub fn print_message(msg: &ReceivedMessage, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string(msg) {
                println!("{json}");
            }
        }
        OutputFormat::Table => {
            println!("{}", format_message(msg));
            if let (Some(snr), Some(rssi)) = (msg.snr, msg.rssi) {
                println!(
                    "  {label} SNR: {snr:.1} dB, RSSI: {rssi} dBm",
                    label = "Signal:".dimmed()
                );
            }
        }
    }
}

pub fn format_message(msg: &ReceivedMessage) -> String {
    format!(
        "{from} [{channel}]: {text}",
        from = msg.from.blue().bold(),
        channel = msg.channel_name,
        text = msg.text
    )
}
