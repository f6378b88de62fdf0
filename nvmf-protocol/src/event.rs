//! Asynchronous event completion decoding.
//!
//! An Asynchronous Event Request completes with the event packed into
//! CQE dword 0: type in bits 2:0, information in bits 15:8, and the log
//! page to read for details in bits 23:16.

use std::fmt;

/// Asynchronous event type (DW0 bits 2:0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncEventType {
    ErrorStatus,
    SmartHealth,
    Notice,
    Immediate,
    OneShot,
    IoCommandSpecific,
    VendorSpecific,
    Unknown(u8),
}

impl AsyncEventType {
    pub fn from_u8(value: u8) -> Self {
        match value & 0x7 {
            0x00 => Self::ErrorStatus,
            0x01 => Self::SmartHealth,
            0x02 => Self::Notice,
            0x03 => Self::Immediate,
            0x04 => Self::OneShot,
            0x06 => Self::IoCommandSpecific,
            0x07 => Self::VendorSpecific,
            other => Self::Unknown(other),
        }
    }
}

/// Notice event information codes (type 02h).
pub mod notice {
    pub const NAMESPACE_ATTRIBUTE_CHANGED: u8 = 0x00;
    pub const FIRMWARE_ACTIVATION_STARTING: u8 = 0x01;
    pub const TELEMETRY_LOG_CHANGED: u8 = 0x02;
    pub const ANA_CHANGE: u8 = 0x03;
    pub const DISCOVERY_LOG_CHANGED: u8 = 0xF0;
}

/// A decoded asynchronous event notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncEvent {
    pub event_type: AsyncEventType,
    /// Event information code (DW0 bits 15:8), meaning depends on the type.
    pub info: u8,
    /// Log page to read for details (DW0 bits 23:16).
    pub log_page_id: u8,
    /// Raw completion dword 0.
    pub raw: u32,
    /// Event-specific parameter from dword 1, when non-zero.
    pub param: Option<u32>,
}

impl AsyncEvent {
    /// Decodes an AEN completion from CQE dwords 0 and 1.
    pub fn from_completion(dw0: u32, dw1: u32) -> Self {
        Self {
            event_type: AsyncEventType::from_u8(dw0 as u8),
            info: (dw0 >> 8) as u8,
            log_page_id: (dw0 >> 16) as u8,
            raw: dw0,
            param: if dw1 != 0 { Some(dw1) } else { None },
        }
    }

    /// Human-readable description of the event.
    pub fn description(&self) -> String {
        match self.event_type {
            AsyncEventType::ErrorStatus => {
                format!("error status event (info {:#04x})", self.info)
            }
            AsyncEventType::SmartHealth => {
                let detail = match self.info {
                    0x00 => "NVM subsystem reliability",
                    0x01 => "temperature threshold",
                    0x02 => "spare capacity below threshold",
                    _ => "unknown SMART condition",
                };
                format!("SMART/health event: {detail}")
            }
            AsyncEventType::Notice => {
                let detail = match self.info {
                    notice::NAMESPACE_ATTRIBUTE_CHANGED => "namespace attribute changed",
                    notice::FIRMWARE_ACTIVATION_STARTING => "firmware activation starting",
                    notice::TELEMETRY_LOG_CHANGED => "telemetry log changed",
                    notice::ANA_CHANGE => "asymmetric namespace access change",
                    notice::DISCOVERY_LOG_CHANGED => "discovery log changed",
                    _ => "unknown notice",
                };
                format!("notice: {detail} (log page {:#04x})", self.log_page_id)
            }
            AsyncEventType::Immediate => format!("immediate event (info {:#04x})", self.info),
            AsyncEventType::OneShot => format!("one-shot event (info {:#04x})", self.info),
            AsyncEventType::IoCommandSpecific => {
                format!("I/O command set event (info {:#04x})", self.info)
            }
            AsyncEventType::VendorSpecific => {
                format!("vendor specific event (info {:#04x})", self.info)
            }
            AsyncEventType::Unknown(t) => {
                format!("unknown event type {t:#x} (info {:#04x})", self.info)
            }
        }
    }

    pub fn is_notice(&self) -> bool {
        self.event_type == AsyncEventType::Notice
    }
}

impl fmt::Display for AsyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_namespace_changed_notice() {
        // Type=Notice, info=namespace attribute changed, log page 0x04
        let dw0 = 0x02 | 0x00 << 8 | 0x04 << 16;
        let event = AsyncEvent::from_completion(dw0, 0);
        assert_eq!(event.event_type, AsyncEventType::Notice);
        assert_eq!(event.info, notice::NAMESPACE_ATTRIBUTE_CHANGED);
        assert_eq!(event.log_page_id, 0x04);
        assert!(event.is_notice());
        assert!(event.description().contains("namespace attribute changed"));
        assert_eq!(event.param, None);
    }

    #[test]
    fn test_decode_ana_change_notice() {
        let dw0 = 0x02 | 0x03 << 8 | 0x0C << 16;
        let event = AsyncEvent::from_completion(dw0, 7);
        assert_eq!(event.info, notice::ANA_CHANGE);
        assert_eq!(event.log_page_id, 0x0C);
        assert_eq!(event.param, Some(7));
    }

    #[test]
    fn test_unknown_event_type() {
        let event = AsyncEvent::from_completion(0x05, 0);
        assert_eq!(event.event_type, AsyncEventType::Unknown(5));
    }

    #[test]
    fn test_raw_preserved() {
        let dw0 = 0xAABB_CC02;
        assert_eq!(AsyncEvent::from_completion(dw0, 0).raw, dw0);
    }
}
