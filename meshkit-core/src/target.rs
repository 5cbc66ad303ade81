use serde::Serialize;
use std::fmt;

/// Default TCP port of the Meshtastic network API
pub const DEFAULT_TCP_PORT: u16 = 4403;

/// Where to find the radio
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "address", rename_all = "snake_case")]
pub enum ConnectionTarget {
    Serial(String),
    Tcp(String),
    Ble(String),
    AutoDetect,
}

impl ConnectionTarget {
    /// Pick a target from the user's inputs. A host beats a serial port,
    /// and an explicit Bluetooth name beats both.
    pub fn resolve(port: Option<&str>, host: Option<&str>, ble: Option<&str>) -> Self {
        fn non_empty(v: Option<&str>) -> Option<&str> {
            v.map(str::trim).filter(|v| !v.is_empty())
        }

        if let Some(name) = non_empty(ble) {
            return Self::Ble(name.to_string());
        }
        if let Some(host) = non_empty(host) {
            return Self::Tcp(with_default_port(host));
        }
        match non_empty(port) {
            // "host:port" is accepted through --port as well
            Some(port) if looks_like_network_address(port) => Self::Tcp(with_default_port(port)),
            Some(port) => Self::Serial(port.to_string()),
            None => Self::AutoDetect,
        }
    }

    pub fn is_serial(&self) -> bool {
        matches!(self, Self::Serial(_) | Self::AutoDetect)
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial(path) => write!(f, "serial {path}"),
            Self::Tcp(addr) => write!(f, "tcp {addr}"),
            Self::Ble(name) => write!(f, "bluetooth {name}"),
            Self::AutoDetect => f.write_str("auto-detected serial port"),
        }
    }
}

fn looks_like_network_address(port: &str) -> bool {
    if port.starts_with('/') || port.to_ascii_uppercase().starts_with("COM") {
        return false;
    }
    port.contains(':') || port.parse::<std::net::IpAddr>().is_ok()
}

fn with_default_port(host: &str) -> String {
    // IPv6 literals need brackets before a port can be appended
    if host.parse::<std::net::Ipv6Addr>().is_ok() {
        return format!("[{host}]:{DEFAULT_TCP_PORT}");
    }
    if host.rsplit_once(':').is_some_and(|(_, p)| p.parse::<u16>().is_ok()) {
        host.to_string()
    } else {
        format!("{host}:{DEFAULT_TCP_PORT}")
    }
}
