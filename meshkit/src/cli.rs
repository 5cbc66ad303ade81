use clap::{Parser, Subcommand};
use meshkit_core::settings::{ENV_HOST, ENV_SERIAL};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ENV_FILE: &str = ".env";

#[derive(Parser, Debug)]
#[command(name = "meshkit")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Serial port (e.g., /dev/ttyUSB0 or COM3); auto-detected when omitted
    #[arg(short, long, global = true, env = ENV_SERIAL)]
    pub port: Option<String>,

    /// Network-connected radio (e.g., 192.168.1.100 or meshtastic.local:4403)
    #[arg(short = 'H', long, global = true, env = ENV_HOST)]
    pub host: Option<String>,

    /// Bluetooth device name or MAC address
    #[arg(short = 'b', long, global = true)]
    pub ble: Option<String>,

    /// Output in JSON format
    #[arg(short = 'j', long, global = true)]
    pub json: bool,

    /// Connection timeout (e.g., 30s, 2m)
    #[arg(
        short = 't',
        long,
        global = true,
        default_value = "30s",
        value_parser = humantime::parse_duration
    )]
    pub timeout: Duration,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Enable verbose logging
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// File with MESHTASTIC_* settings, loaded before anything else
    #[arg(long, global = true, value_name = "PATH", default_value = DEFAULT_ENV_FILE)]
    pub env_file: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision the radio from MESHTASTIC_* settings
    Init {
        /// Show what would change without writing to the device
        #[arg(long)]
        dry_run: bool,
    },

    /// Interactive session: chat, switch and add channels, change region
    Console,

    /// Send a text message
    Send {
        /// Message text to send
        #[arg(short = 'm', long)]
        text: String,

        /// Channel name or index
        #[arg(short = 'c', long, default_value = "0")]
        channel: String,

        /// Destination node (!a1b2c3d4, 0xa1b2c3d4 or decimal); broadcast if not specified
        #[arg(short = 'd', long)]
        dest: Option<String>,

        /// Wait for acknowledgment
        #[arg(short = 'a', long)]
        ack: bool,
    },

    /// Print text messages as they arrive
    Listen {
        /// How long to listen (e.g., 30s, 5m)
        #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
        duration: Duration,

        /// Stop after this many messages
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Only show messages from this node
        #[arg(short = 'f', long)]
        from: Option<String>,

        /// Keep listening until interrupted
        #[arg(long, conflicts_with_all = ["duration", "count"])]
        follow: bool,
    },

    /// Display channel configuration
    Channels,

    /// Display local node information
    Info,

    /// List supported region codes
    Regions,

    /// List serial ports
    Ports,
}

impl Commands {
    /// Whether the command talks to a radio
    pub fn needs_device(&self) -> bool {
        !matches!(self, Self::Regions | Self::Ports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn send_arguments() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "meshkit", "send", "-m", "hello", "-c", "ops", "-d", "!a1b2c3d4", "--ack", "-t", "2m",
        ])?;
        assert_eq!(cli.timeout, Duration::from_secs(120));
        let Commands::Send {
            text,
            channel,
            dest,
            ack,
        } = cli.command
        else {
            anyhow::bail!("expected send");
        };
        assert_eq!(text, "hello");
        assert_eq!(channel, "ops");
        assert_eq!(dest.as_deref(), Some("!a1b2c3d4"));
        assert!(ack);
        Ok(())
    }

    #[test]
    fn listen_defaults() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(["meshkit", "listen", "-n", "3"])?;
        let Commands::Listen {
            duration, count, ..
        } = cli.command
        else {
            anyhow::bail!("expected listen");
        };
        assert_eq!(duration, Duration::from_secs(30));
        assert_eq!(count, Some(3));
        Ok(())
    }

    #[test]
    fn offline_commands() -> anyhow::Result<()> {
        assert!(!Cli::try_parse_from(["meshkit", "regions"])?.command.needs_device());
        assert!(!Cli::try_parse_from(["meshkit", "ports"])?.command.needs_device());
        assert!(Cli::try_parse_from(["meshkit", "info"])?.command.needs_device());
        Ok(())
    }
}
