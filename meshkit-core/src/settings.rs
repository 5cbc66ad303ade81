//! Provisioning settings read from `MESHTASTIC_*` environment variables.

use crate::error::SessionError;
use crate::psk::Psk;
use crate::region::{DeviceRole, Region};
use anyhow::{Context, Result};
use std::path::Path;
use tracing::debug;

pub const ENV_SERIAL: &str = "MESHTASTIC_SERIAL";
pub const ENV_HOST: &str = "MESHTASTIC_HOST";
pub const ENV_REGION: &str = "MESHTASTIC_REGION";
pub const ENV_OWNER_LONG: &str = "MESHTASTIC_OWNER_LONG";
pub const ENV_OWNER_SHORT: &str = "MESHTASTIC_OWNER_SHORT";
pub const ENV_CHANNEL_NAME: &str = "MESHTASTIC_CHANNEL_NAME";
pub const ENV_CHANNEL_PSK: &str = "MESHTASTIC_CHANNEL_PSK";
pub const ENV_CHANNEL_INDEX: &str = "MESHTASTIC_CHANNEL_INDEX";
pub const ENV_DEVICE_ROLE: &str = "MESHTASTIC_DEVICE_ROLE";
pub const ENV_POSITION_BROADCAST: &str = "MESHTASTIC_POSITION_BROADCAST";
pub const ENV_WIFI_SSID: &str = "MESHTASTIC_WIFI_SSID";
pub const ENV_WIFI_PSK: &str = "MESHTASTIC_WIFI_PSK";
pub const ENV_VERBOSE: &str = "MESHTASTIC_VERBOSE";

/// Longest short name the firmware displays
pub const MAX_SHORT_NAME_LEN: usize = 4;

/// Desired device settings. `None` leaves the device untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitSettings {
    pub owner_long: Option<String>,
    pub owner_short: Option<String>,
    pub region: Option<Region>,
    pub role: Option<DeviceRole>,
    pub position_broadcast: Option<bool>,
    pub wifi_ssid: Option<String>,
    pub wifi_psk: Option<String>,
    pub channel_index: u32,
    pub channel_name: Option<String>,
    pub channel_psk: Option<Psk>,
    /// `channel_psk` was generated here, so nobody else knows it yet
    pub channel_psk_generated: bool,
}

impl InitSettings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self, SessionError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SessionError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let owner_short = get(ENV_OWNER_SHORT);
        if let Some(short) = &owner_short
            && short.chars().count() > MAX_SHORT_NAME_LEN
        {
            return Err(SessionError::settings(
                ENV_OWNER_SHORT,
                format!("'{short}' is longer than {MAX_SHORT_NAME_LEN} characters"),
            ));
        }

        let channel_index = match get(ENV_CHANNEL_INDEX) {
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|i| *i < crate::state::MAX_CHANNELS)
                .ok_or_else(|| {
                    SessionError::settings(ENV_CHANNEL_INDEX, format!("'{raw}' is not 0-7"))
                })?,
            None => 0,
        };

        let channel_psk_raw = get(ENV_CHANNEL_PSK);
        let settings = Self {
            owner_long: get(ENV_OWNER_LONG),
            owner_short,
            region: get(ENV_REGION).as_deref().map(Region::parse).transpose()?,
            role: get(ENV_DEVICE_ROLE)
                .as_deref()
                .map(DeviceRole::parse)
                .transpose()?,
            position_broadcast: get(ENV_POSITION_BROADCAST)
                .map(|raw| parse_bool(ENV_POSITION_BROADCAST, &raw))
                .transpose()?,
            wifi_ssid: get(ENV_WIFI_SSID),
            wifi_psk: get(ENV_WIFI_PSK),
            channel_index,
            channel_name: get(ENV_CHANNEL_NAME),
            channel_psk: channel_psk_raw
                .as_deref()
                .map(Psk::resolve)
                .transpose()?,
            channel_psk_generated: channel_psk_raw
                .as_deref()
                .is_some_and(|raw| raw.eq_ignore_ascii_case("random")),
        };

        debug!(
            "Loaded provisioning settings: region={:?} role={:?} channel={}",
            settings.region, settings.role, settings.channel_index
        );
        Ok(settings)
    }

    pub fn is_empty(&self) -> bool {
        self.owner_long.is_none()
            && self.owner_short.is_none()
            && self.region.is_none()
            && self.role.is_none()
            && self.position_broadcast.is_none()
            && self.wifi_ssid.is_none()
            && self.channel_name.is_none()
            && self.channel_psk.is_none()
    }
}

/// Parse `1/true/yes/on` and `0/false/no/off`, case-insensitively
pub fn parse_bool(name: &str, raw: &str) -> Result<bool, SessionError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(SessionError::settings(
            name,
            format!("'{other}' is not a boolean"),
        )),
    }
}

/// Whether an environment flag is set to a true value; junk counts as false
pub fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| parse_bool(name, &v).ok())
        .unwrap_or(false)
}

/// Load a `.env` file into the process environment without overriding
/// variables that are already set. A missing file is not an error.
pub fn load_env_file(path: &Path) -> Result<bool> {
    if !path.exists() {
        debug!("No env file at {}", path.display());
        return Ok(false);
    }

    dotenvy::from_path(path).with_context(|| format!("Failed to load {}", path.display()))?;
    debug!("Loaded environment from {}", path.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn empty_environment_requests_nothing() -> Result<()> {
        let settings = InitSettings::from_lookup(lookup(&[]))?;
        assert!(settings.is_empty());
        assert_eq!(settings.channel_index, 0);
        Ok(())
    }

    #[test]
    fn full_environment() -> Result<()> {
        let settings = InitSettings::from_lookup(lookup(&[
            (ENV_OWNER_LONG, "Base Camp"),
            (ENV_OWNER_SHORT, "BC"),
            (ENV_REGION, "eu"),
            (ENV_DEVICE_ROLE, "router"),
            (ENV_POSITION_BROADCAST, "yes"),
            (ENV_WIFI_SSID, "camp"),
            (ENV_WIFI_PSK, "hunter22"),
            (ENV_CHANNEL_INDEX, "2"),
            (ENV_CHANNEL_NAME, "ops"),
            (ENV_CHANNEL_PSK, "none"),
        ]))?;

        assert_eq!(settings.owner_long.as_deref(), Some("Base Camp"));
        assert_eq!(settings.region, Some(Region::Eu868));
        assert_eq!(settings.role, Some(DeviceRole::Router));
        assert_eq!(settings.position_broadcast, Some(true));
        assert_eq!(settings.channel_index, 2);
        assert_eq!(settings.channel_psk, Some(Psk::None));
        assert!(!settings.is_empty());
        Ok(())
    }

    #[test]
    fn random_channel_key_is_flagged() -> Result<()> {
        let settings = InitSettings::from_lookup(lookup(&[(ENV_CHANNEL_PSK, "Random")]))?;
        assert!(settings.channel_psk_generated);
        assert_eq!(settings.channel_psk.map(|psk| psk.to_bytes().len()), Some(32));

        let settings = InitSettings::from_lookup(lookup(&[(ENV_CHANNEL_PSK, "hunter22")]))?;
        assert!(!settings.channel_psk_generated);
        Ok(())
    }

    #[test]
    fn blank_values_are_unset() -> Result<()> {
        let settings =
            InitSettings::from_lookup(lookup(&[(ENV_REGION, "  "), (ENV_OWNER_LONG, "")]))?;
        assert!(settings.region.is_none());
        assert!(settings.owner_long.is_none());
        Ok(())
    }

    #[test]
    fn invalid_values_are_reported_by_name() {
        let err = InitSettings::from_lookup(lookup(&[(ENV_OWNER_SHORT, "TOOLONG")])).unwrap_err();
        assert!(err.to_string().contains(ENV_OWNER_SHORT));

        let err = InitSettings::from_lookup(lookup(&[(ENV_CHANNEL_INDEX, "9")])).unwrap_err();
        assert!(err.to_string().contains(ENV_CHANNEL_INDEX));

        let err =
            InitSettings::from_lookup(lookup(&[(ENV_POSITION_BROADCAST, "maybe")])).unwrap_err();
        assert!(err.to_string().contains("maybe"));
    }

    #[test]
    fn bools() {
        for raw in ["1", "TRUE", "Yes", "on"] {
            assert!(parse_bool("X", raw).unwrap());
        }
        for raw in ["0", "false", "NO", "off"] {
            assert!(!parse_bool("X", raw).unwrap());
        }
    }

    #[test]
    fn env_file_is_loaded() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "# radio defaults")?;
        writeln!(file, "MESHKIT_TEST_ENV_FILE_REGION=\"US\"")?;

        assert!(load_env_file(file.path())?);
        assert_eq!(
            std::env::var("MESHKIT_TEST_ENV_FILE_REGION").ok().as_deref(),
            Some("US")
        );
        Ok(())
    }

    #[test]
    fn malformed_env_file_is_an_error() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "MESHKIT_TEST_BROKEN=\"unterminated")?;
        assert!(load_env_file(file.path()).is_err());
        Ok(())
    }

    #[test]
    fn missing_env_file_is_fine() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(!load_env_file(&dir.path().join(".env"))?);
        Ok(())
    }
}
