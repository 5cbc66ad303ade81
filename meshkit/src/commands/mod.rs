mod console;
mod info;
mod init;
mod message;

use anyhow::Result;
use meshkit_core::settings::InitSettings;
use meshkit_core::{ConnectionTarget, DeviceSession, SessionError, run_session};
use tracing::{debug, warn};

use crate::cli::{Cli, Commands};
use crate::output::OutputFormat;
use crate::utils::spinner;

pub async fn handle_command(cli: Cli) -> Result<()> {
    // Determine output format
    let output_format = OutputFormat::from_flag(cli.json);

    if !cli.command.needs_device() {
        return match cli.command {
            Commands::Ports => info::handle_ports(output_format),
            _ => info::handle_regions(output_format),
        };
    }

    // Bad settings should fail before the radio is touched
    let init_settings = match &cli.command {
        Commands::Init { .. } => Some(InitSettings::from_env()?),
        _ => None,
    };

    let target = ConnectionTarget::resolve(
        cli.port.as_deref(),
        cli.host.as_deref(),
        cli.ble.as_deref(),
    );
    let timeout = cli.timeout;
    let command = cli.command;
    debug!("Resolved connection target: {target}");

    let progress = match output_format {
        OutputFormat::Table if !matches!(command, Commands::Console) => {
            Some(spinner(format!("Connecting via {target}...")))
        }
        _ => None,
    };
    let connected = progress.clone();

    // These two treat Ctrl-C as the normal way to stop
    let own_interrupt = matches!(
        command,
        Commands::Console | Commands::Listen { follow: true, .. }
    );

    let result = run_session(target, timeout, async move |session: &mut DeviceSession| {
        if let Some(pb) = &connected {
            pb.finish_and_clear();
        }

        // Handle the specific command
        let work = async {
            match command {
                Commands::Init { dry_run } => {
                    let settings = init_settings.unwrap_or_default();
                    init::handle_init(session, settings, dry_run, timeout, output_format).await
                }
                Commands::Console => console::handle_console(session, timeout).await,
                Commands::Send {
                    text,
                    channel,
                    dest,
                    ack,
                } => {
                    message::handle_send(
                        session,
                        &text,
                        &channel,
                        dest.as_deref(),
                        ack,
                        timeout,
                        output_format,
                    )
                    .await
                }
                Commands::Listen {
                    duration,
                    count,
                    from,
                    follow,
                } => {
                    let from = from.as_deref();
                    message::handle_listen(session, duration, count, from, follow, output_format)
                        .await
                }
                Commands::Channels => info::handle_channels(session, output_format).await,
                Commands::Info => info::handle_info(session, output_format).await,
                Commands::Regions | Commands::Ports => Ok(()),
            }
        };

        if own_interrupt {
            work.await
        } else {
            interruptible(work, ctrl_c()).await
        }
    })
    .await;

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    result
}

/// Run `work` unless `interrupt` resolves first. The session stays with
/// `run_session`, so it is still closed after an interrupt.
async fn interruptible<T>(
    work: impl Future<Output = Result<T>>,
    interrupt: impl Future<Output = ()>,
) -> Result<T> {
    tokio::select! {
        result = work => result,
        () = interrupt => {
            debug!("Interrupted, closing the session");
            Err(SessionError::Interrupted.into())
        }
    }
}

/// Resolves on Ctrl-C, or never if the handler cannot be installed
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
