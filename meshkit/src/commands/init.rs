use anyhow::Result;
use comfy_table::Cell;
use meshkit_core::DeviceSession;
use meshkit_core::provision::{self, Plan, ProvisionReport, ProvisionStep, Skipped};
use meshkit_core::settings::InitSettings;
use serde::Serialize;
use std::time::Duration;

use crate::output::{OutputFormat, create_table, print_json};
use crate::utils::{print_info, print_success, print_warning, spinner};

#[derive(Debug, Serialize)]
struct PlannedChanges<'a> {
    changes: Vec<String>,
    skipped: &'a [Skipped],
}

#[derive(Debug, Serialize)]
struct InitOutput<'a> {
    #[serde(flatten)]
    report: &'a ProvisionReport,
    /// Base64 of a generated channel key; other nodes need it to join
    #[serde(skip_serializing_if = "Option::is_none")]
    channel_key: Option<String>,
}

pub async fn handle_init(
    session: &mut DeviceSession,
    settings: InitSettings,
    dry_run: bool,
    settle_timeout: Duration,
    format: OutputFormat,
) -> Result<()> {
    if settings.is_empty() {
        print_warning("No MESHTASTIC_* settings found; only checking the device");
    }

    let state = session.get_device_state().await;
    let plan = provision::plan(&settings, &state);

    if dry_run {
        print_plan(&plan, format);
        return Ok(());
    }

    let channel_key = generated_channel_key(&settings, &plan);
    let progress = match format {
        OutputFormat::Table if !plan.is_noop() => {
            Some(spinner(format!("Applying {} change(s)...", plan.changes.len())))
        }
        _ => None,
    };
    let report = provision::execute(session, plan, settle_timeout).await;
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    print_report(
        &InitOutput {
            report: &report?,
            channel_key,
        },
        format,
    );
    Ok(())
}

/// The key written by a channel step, when it was generated for this run
fn generated_channel_key(settings: &InitSettings, plan: &Plan) -> Option<String> {
    if !settings.channel_psk_generated {
        return None;
    }
    plan.changes.iter().find_map(|step| match step {
        ProvisionStep::SetChannel { psk: Some(psk), .. } => Some(psk.to_base64()),
        _ => None,
    })
}

fn print_plan(plan: &Plan, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(PlannedChanges {
            changes: plan.changes.iter().map(ToString::to_string).collect(),
            skipped: &plan.skipped,
        }),
        OutputFormat::Table => {
            if plan.is_noop() {
                print_info("Device already matches the requested settings");
            }
            let mut table = create_table();
            table.set_header(vec![Cell::new("Action"), Cell::new("Detail")]);
            for step in &plan.changes {
                table.add_row(vec![Cell::new("set"), Cell::new(step)]);
            }
            for skip in &plan.skipped {
                table.add_row(vec![
                    Cell::new("skip"),
                    Cell::new(format!("{}: {}", skip.setting, skip.reason)),
                ]);
            }
            println!("{table}");
        }
    }
}

fn print_report(output: &InitOutput<'_>, format: OutputFormat) {
    let report = output.report;
    match format {
        OutputFormat::Json => print_json(output),
        OutputFormat::Table => {
            for skip in &report.skipped {
                print_info(&format!("Skipped {}: {}", skip.setting, skip.reason));
            }
            for applied in &report.applied {
                print_success(&format!("Set {applied}"));
            }
            if report.applied.is_empty() {
                print_success("Nothing to change");
            } else if report.verified {
                print_success("Device confirmed the new configuration");
            } else {
                print_warning(
                    "Device did not confirm the new configuration; it may still be rebooting",
                );
            }
            if let Some(key) = &output.channel_key {
                print_info(&format!("Channel key: {key}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshkit_core::psk::Psk;

    fn channel_plan(psk: Psk) -> Plan {
        Plan {
            changes: vec![ProvisionStep::SetChannel {
                index: 0,
                name: None,
                psk: Some(psk),
            }],
            skipped: Vec::new(),
        }
    }

    #[test]
    fn generated_key_is_shown() {
        let psk = Psk::random();
        let expected = psk.to_base64();
        let settings = InitSettings {
            channel_psk: Some(psk.clone()),
            channel_psk_generated: true,
            ..Default::default()
        };
        assert_eq!(
            generated_channel_key(&settings, &channel_plan(psk)),
            Some(expected)
        );
    }

    #[test]
    fn known_keys_are_not_echoed() {
        let psk = Psk::passphrase("correct horse");
        let settings = InitSettings {
            channel_psk: Some(psk.clone()),
            ..Default::default()
        };
        assert_eq!(generated_channel_key(&settings, &channel_plan(psk)), None);

        let generated = InitSettings {
            channel_psk_generated: true,
            ..Default::default()
        };
        assert_eq!(generated_channel_key(&generated, &Plan::default()), None);
    }
}
