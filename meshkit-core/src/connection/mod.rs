//! Device session lifecycle: open, configure, process packets, close.

mod processor;
mod session;

pub use processor::{DeliveryStatus, PacketEvent, apply_from_radio, extract_text_message};
pub use session::{DeviceSession, detect_serial_port, list_serial_ports, run_session};
