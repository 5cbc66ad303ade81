//! LoRa region codes and device roles accepted on the command line and in
//! the environment.

use crate::error::SessionError;
use meshtastic::protobufs::config::device_config::Role;
use meshtastic::protobufs::config::lo_ra_config::RegionCode;
use serde::Serialize;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter, Serialize)]
#[strum(ascii_case_insensitive)]
pub enum Region {
    #[strum(to_string = "US", serialize = "US915")]
    Us,
    #[strum(to_string = "EU_433", serialize = "EU433")]
    Eu433,
    #[strum(to_string = "EU_868", serialize = "EU868", serialize = "EU")]
    Eu868,
    #[strum(to_string = "CN")]
    Cn,
    #[strum(to_string = "JP")]
    Jp,
    #[strum(to_string = "ANZ", serialize = "AU", serialize = "AU915")]
    Anz,
    #[strum(to_string = "KR")]
    Kr,
    #[strum(to_string = "TW")]
    Tw,
    #[strum(to_string = "RU")]
    Ru,
    #[strum(to_string = "IN")]
    In,
    #[strum(to_string = "NZ_865", serialize = "NZ865")]
    Nz865,
    #[strum(to_string = "TH")]
    Th,
    #[strum(to_string = "LORA_24", serialize = "LORA24")]
    Lora24,
    #[strum(to_string = "UA_433", serialize = "UA433")]
    Ua433,
    #[strum(to_string = "UA_868", serialize = "UA868", serialize = "UA")]
    Ua868,
    #[strum(to_string = "MY_433", serialize = "MY433")]
    My433,
    #[strum(to_string = "MY_919", serialize = "MY919")]
    My919,
    #[strum(to_string = "SG_923", serialize = "SG923")]
    Sg923,
}

impl Region {
    pub fn parse(value: &str) -> Result<Self, SessionError> {
        value.trim().parse().map_err(|_| {
            SessionError::settings(
                "region",
                format!("unknown region '{value}' (see 'meshkit regions')"),
            )
        })
    }

    pub fn code(self) -> RegionCode {
        match self {
            Self::Us => RegionCode::Us,
            Self::Eu433 => RegionCode::Eu433,
            Self::Eu868 => RegionCode::Eu868,
            Self::Cn => RegionCode::Cn,
            Self::Jp => RegionCode::Jp,
            Self::Anz => RegionCode::Anz,
            Self::Kr => RegionCode::Kr,
            Self::Tw => RegionCode::Tw,
            Self::Ru => RegionCode::Ru,
            Self::In => RegionCode::In,
            Self::Nz865 => RegionCode::Nz865,
            Self::Th => RegionCode::Th,
            Self::Lora24 => RegionCode::Lora24,
            Self::Ua433 => RegionCode::Ua433,
            Self::Ua868 => RegionCode::Ua868,
            Self::My433 => RegionCode::My433,
            Self::My919 => RegionCode::My919,
            Self::Sg923 => RegionCode::Sg923,
        }
    }

    /// Reverse of [`Region::code`]; `Unset` and codes newer than this list map to `None`
    pub fn from_code(code: RegionCode) -> Option<Self> {
        Self::iter().find(|r| r.code() == code)
    }

    pub fn all() -> Vec<Self> {
        Self::iter().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter, Serialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum DeviceRole {
    Client,
    ClientMute,
    Router,
    RouterClient,
    Repeater,
    Tracker,
    Sensor,
    Tak,
    ClientHidden,
    LostAndFound,
    TakTracker,
}

impl DeviceRole {
    pub fn parse(value: &str) -> Result<Self, SessionError> {
        value
            .trim()
            .replace(['-', ' '], "_")
            .parse()
            .map_err(|_| SessionError::settings("role", format!("unknown device role '{value}'")))
    }

    pub fn role(self) -> Role {
        match self {
            Self::Client => Role::Client,
            Self::ClientMute => Role::ClientMute,
            Self::Router => Role::Router,
            Self::RouterClient => Role::RouterClient,
            Self::Repeater => Role::Repeater,
            Self::Tracker => Role::Tracker,
            Self::Sensor => Role::Sensor,
            Self::Tak => Role::Tak,
            Self::ClientHidden => Role::ClientHidden,
            Self::LostAndFound => Role::LostAndFound,
            Self::TakTracker => Role::TakTracker,
        }
    }
}
