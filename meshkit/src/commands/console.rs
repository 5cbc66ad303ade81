//! Interactive session: chat on a channel while typed commands run
//! against the same connection.

use anyhow::{Context, Result, bail};
use colored::*;
use meshkit_core::{DeviceSession, SessionError};
use meshkit_core::channel::{add_channel, list_channels};
use meshkit_core::message::{next_message, resolve_channel, send_text_message};
use meshkit_core::provision;
use meshkit_core::psk::Psk;
use meshkit_core::region::Region;
use meshkit_core::settings::{ENV_REGION, InitSettings, parse_bool};
use std::io::{BufRead, Write};
use std::time::Duration;
use tokio::sync::mpsc;

use super::info::channel_table;
use crate::output::{OutputFormat, print_message};
use crate::utils::{print_error, print_info, print_success, print_warning};

const HELP: &str = "\
Commands:
  send <message>                         send to the current channel
  set_channel <name|index>               switch the current channel
  add_channel <name> <psk> <on|off> <on|off>
                                         add a channel (psk, uplink, downlink)
  list                                   show channels
  set_region <code>                      change the LoRa region
  list_regions                           show region codes
  help                                   show this help
  exit                                   leave the console";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Send(String),
    SetChannel(String),
    AddChannel {
        name: String,
        psk: String,
        uplink: bool,
        downlink: bool,
    },
    List,
    SetRegion(String),
    ListRegions,
    Help,
    Exit,
    Empty,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (verb, rest) = line
            .split_once(char::is_whitespace)
            .map(|(verb, rest)| (verb, rest.trim()))
            .unwrap_or((line, ""));

        let command = match verb.to_ascii_lowercase().as_str() {
            "" => Self::Empty,
            "send" => {
                if rest.is_empty() {
                    bail!("usage: send <message>");
                }
                Self::Send(rest.to_string())
            }
            "set_channel" => {
                if rest.is_empty() {
                    bail!("usage: set_channel <name|index>");
                }
                Self::SetChannel(rest.to_string())
            }
            "add_channel" => {
                let args: Vec<&str> = rest.split_whitespace().collect();
                let &[name, psk, uplink, downlink] = args.as_slice() else {
                    bail!("usage: add_channel <name> <psk> <on|off> <on|off>");
                };
                Self::AddChannel {
                    name: name.to_string(),
                    psk: psk.to_string(),
                    uplink: parse_bool("uplink", uplink)?,
                    downlink: parse_bool("downlink", downlink)?,
                }
            }
            "list" => Self::List,
            "set_region" => {
                if rest.is_empty() {
                    bail!("usage: set_region <code>");
                }
                Self::SetRegion(rest.to_string())
            }
            "list_regions" => Self::ListRegions,
            "help" | "?" => Self::Help,
            "exit" | "quit" => Self::Exit,
            other => bail!("unknown command '{other}', type 'help'"),
        };
        Ok(command)
    }
}

pub async fn handle_console(session: &mut DeviceSession, timeout: Duration) -> Result<()> {
    bootstrap_region(session, timeout).await?;

    let mut channel = 0u32;
    show_channels(session, channel).await?;
    println!("{HELP}");

    let mut messages = session.subscribe();
    let mut lines = spawn_stdin_reader();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    prompt(session, channel).await;

    'console: loop {
        tokio::select! {
            line = lines.recv() => {
                // EOF ends the session like `exit`
                let Some(line) = line.transpose().context("Failed to read from stdin")? else {
                    println!();
                    break;
                };
                match ConsoleCommand::parse(&line) {
                    Ok(ConsoleCommand::Exit) => break,
                    Ok(command) => {
                        let work = run_command(session, &mut channel, command, timeout);
                        let outcome = tokio::select! {
                            outcome = work => outcome,
                            _ = &mut ctrl_c => {
                                println!();
                                break 'console;
                            }
                        };
                        if let Err(e) = outcome {
                            print_error(&format!("{e:#}"));
                            if !session.is_connected() {
                                return Err(SessionError::stream_closed().into());
                            }
                        }
                    }
                    Err(e) => print_error(&format!("{e:#}")),
                }
                prompt(session, channel).await;
            }
            message = next_message(&mut messages, None) => {
                let Some(message) = message else {
                    return Err(SessionError::stream_closed().into());
                };
                println!();
                print_message(&message, OutputFormat::Table);
                prompt(session, channel).await;
            }
            _ = &mut ctrl_c => {
                println!();
                break;
            }
        }
    }

    print_info("Leaving console");
    Ok(())
}

/// Read stdin on a plain thread; a pending read on tokio's stdin would keep
/// the runtime from shutting down after Ctrl-C
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn run_command(
    session: &mut DeviceSession,
    channel: &mut u32,
    command: ConsoleCommand,
    timeout: Duration,
) -> Result<()> {
    match command {
        ConsoleCommand::Send(text) => {
            let sent = send_text_message(session, &text, None, *channel, None).await?;
            println!(
                "{you} [{name}]: {text}",
                you = "you".green().bold(),
                name = session.channel_name(*channel).await,
                text = sent.text
            );
        }

        ConsoleCommand::SetChannel(name) => {
            *channel = session
                .with_state(|state| resolve_channel(state, &name))
                .await?;
            print_success(&format!("Now on {}", session.channel_name(*channel).await));
        }

        ConsoleCommand::AddChannel {
            name,
            psk,
            uplink,
            downlink,
        } => {
            let random = psk.eq_ignore_ascii_case("random");
            let psk = Psk::resolve(&psk)?;
            let index = add_channel(session, &name, &psk, uplink, downlink).await?;
            print_success(&format!("Channel '{name}' added at index {index}"));
            if random {
                // Other nodes need the generated key to join
                print_info(&format!("Channel key: {}", psk.to_base64()));
            }
        }

        ConsoleCommand::List => show_channels(session, *channel).await?,

        ConsoleCommand::SetRegion(code) => {
            set_region(session, Region::parse(&code)?, timeout).await?;
        }

        ConsoleCommand::ListRegions => {
            let regions: Vec<String> = Region::all().iter().map(ToString::to_string).collect();
            println!("{}", regions.join(", "));
        }

        ConsoleCommand::Help => println!("{HELP}"),

        ConsoleCommand::Exit | ConsoleCommand::Empty => {}
    }
    Ok(())
}

/// Apply `MESHTASTIC_REGION` when the device is on a different region
async fn bootstrap_region(session: &mut DeviceSession, timeout: Duration) -> Result<()> {
    let Some(raw) = std::env::var(ENV_REGION)
        .ok()
        .filter(|v| !v.trim().is_empty())
    else {
        return Ok(());
    };
    set_region(session, Region::parse(&raw)?, timeout).await
}

async fn set_region(session: &mut DeviceSession, region: Region, timeout: Duration) -> Result<()> {
    let settings = InitSettings {
        region: Some(region),
        ..Default::default()
    };
    let plan = provision::plan(&settings, &session.get_device_state().await);
    if plan.is_noop() {
        print_info(&format!("Region already {region}"));
        return Ok(());
    }

    print_info(&format!("Setting region {region}..."));
    let report = provision::execute(session, plan, timeout).await?;
    if report.verified {
        print_success(&format!("Region set to {region}"));
    } else {
        print_warning(&format!(
            "Region set to {region}; the device has not reconnected yet"
        ));
    }
    Ok(())
}

async fn show_channels(session: &DeviceSession, current: u32) -> Result<()> {
    let channels = list_channels(session).await?;
    if channels.is_empty() {
        print_info("No channels configured");
    } else {
        println!("{}", channel_table(&channels, Some(current)));
    }
    Ok(())
}

async fn prompt(session: &DeviceSession, channel: u32) {
    let name = session.channel_name(channel).await;
    print!("{} ", format!("[{name}]>").cyan());
    // A failed flush only delays the prompt
    let _ = std::io::stdout().flush();
}
