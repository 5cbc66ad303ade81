use anyhow::{Result, bail};
use meshkit_core::connection::DeliveryStatus;
use meshkit_core::message::{
    Collected, collect_messages, monitor_messages, resolve_channel, send_text_message,
};
use meshkit_core::DeviceSession;
use std::time::Duration;

use crate::output::{OutputFormat, print_json, print_message};
use crate::utils::{parse_node_id, print_info, print_success, print_warning};

pub async fn handle_send(
    session: &mut DeviceSession,
    text: &str,
    channel: &str,
    dest: Option<&str>,
    ack: bool,
    ack_timeout: Duration,
    format: OutputFormat,
) -> Result<()> {
    let state = session.get_device_state().await;
    let channel = resolve_channel(&state, channel)?;
    let destination = dest.map(parse_node_id).transpose()?;

    if ack && format == OutputFormat::Table {
        print_info("Waiting for acknowledgment...");
    }
    let sent = send_text_message(session, text, destination, channel, ack.then_some(ack_timeout))
        .await?;

    match format {
        OutputFormat::Json => print_json(&sent),
        OutputFormat::Table => print_success(&format!(
            "Message sent to {destination} on {channel}",
            destination = sent.destination,
            channel = state.channel_name(channel)
        )),
    }

    match sent.delivery {
        Some(DeliveryStatus::Failed(reason)) => {
            bail!("Message {id} was not delivered: {reason}", id = sent.packet_id)
        }
        Some(DeliveryStatus::TimedOut) => {
            print_warning(&format!("No acknowledgment within {ack_timeout:?}"));
        }
        Some(DeliveryStatus::Delivered) if format == OutputFormat::Table => {
            print_success("Acknowledged");
        }
        _ => {}
    }

    Ok(())
}

pub async fn handle_listen(
    session: &mut DeviceSession,
    duration: Duration,
    count: Option<usize>,
    from: Option<&str>,
    follow: bool,
    format: OutputFormat,
) -> Result<()> {
    let from = from.map(parse_node_id).transpose()?;
    let mut receiver = session.subscribe();

    if follow {
        print_info("Monitoring messages... Press Ctrl+C to stop");
        tokio::select! {
            result = monitor_messages(&mut receiver, from, |msg| {
                print_message(&msg, format);
                Ok(())
            }) => result?,
            _ = tokio::signal::ctrl_c() => {}
        }
        return Ok(());
    }

    print_info(&format!(
        "Listening for {}...",
        humantime::format_duration(duration)
    ));
    let collected = collect_messages(&mut receiver, from, count, duration).await;
    print_collected(&collected, format);
    collected.into_result()?;
    Ok(())
}

/// Show what arrived, including anything heard before the device went away
fn print_collected(collected: &Collected, format: OutputFormat) {
    let messages = &collected.messages;
    if messages.is_empty() {
        if !collected.stream_closed {
            print_info("No messages received");
        }
        return;
    }

    match format {
        OutputFormat::Json => print_json(messages),
        OutputFormat::Table => {
            for msg in messages {
                print_message(msg, format);
            }
        }
    }
}
