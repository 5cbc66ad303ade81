use anyhow::{Context, Result, bail};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub fn print_error(message: &str) {
    eprintln!("{prefix} {message}", prefix = "Error:".red().bold());
}

pub fn print_success(message: &str) {
    eprintln!("{prefix} {message}", prefix = "✓".green().bold());
}

pub fn print_warning(message: &str) {
    eprintln!("{prefix} {message}", prefix = "⚠".yellow().bold());
}

pub fn print_info(message: &str) {
    eprintln!("{prefix} {message}", prefix = "ℹ".blue().bold());
}

/// Spinner on stderr; hidden when stderr is not a terminal
pub fn spinner(message: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Parse a node number written as `!a1b2c3d4`, `0xa1b2c3d4` or decimal
pub fn parse_node_id(raw: &str) -> Result<u32> {
    let raw = raw.trim();
    if let Some(hex) = raw.strip_prefix('!').or_else(|| raw.strip_prefix("0x")) {
        return u32::from_str_radix(hex, 16)
            .with_context(|| format!("'{raw}' is not a valid node id"));
    }
    match raw.parse::<u32>() {
        Ok(num) => Ok(num),
        Err(_) => bail!("'{raw}' is not a valid node id (use !a1b2c3d4, 0xa1b2c3d4 or a number)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_forms() -> Result<()> {
        assert_eq!(parse_node_id("!a1b2c3d4")?, 0xa1b2_c3d4);
        assert_eq!(parse_node_id("0x0000002a")?, 42);
        assert_eq!(parse_node_id(" 42 ")?, 42);
        assert!(parse_node_id("!xyz").is_err());
        assert!(parse_node_id("node-7").is_err());
        Ok(())
    }
}
