//! Settings/command channel framing.
//!
//! Outbound control writes are two-byte `[opcode, value]` frames on the
//! control point characteristic of the active rowing service. The device
//! acknowledges with a notification whose third byte is a status code.

use crate::monitor::types::DecodeError;

/// Opcodes accepted by the monitor's control point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandOpcode {
    /// Change the firmware log level (value: 0-6)
    SetLogLevel = 17,
    /// Switch between the Cycling Power and Speed/Cadence services
    /// (takes effect after device restart)
    ChangeBleService = 18,
    /// Toggle SD-card logging (value: 0/1)
    SetSdCardLogging = 19,
    /// Toggle websocket delta-time logging (value: 0/1)
    SetDeltaTimeLogging = 20,
}

/// Status code the device reports for a control write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Accepted and applied
    Success,
    /// Opcode not supported by this firmware
    UnsupportedOpcode,
    /// Value out of range for the opcode
    InvalidParameter,
    /// Device-specific failure code
    Failed(u8),
}

impl CommandStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, CommandStatus::Success)
    }
}

/// Encode a control frame.
pub fn encode_command(opcode: CommandOpcode, value: u8) -> [u8; 2] {
    [opcode as u8, value]
}

/// Interpret a control point response notification.
///
/// Byte 2 carries the status: 0x01 is success, everything else a defined
/// error code.
pub fn parse_command_response(data: &[u8]) -> Result<CommandStatus, DecodeError> {
    if data.len() < 3 {
        return Err(DecodeError::TooShort {
            got: data.len(),
            need: 3,
        });
    }

    Ok(match data[2] {
        0x01 => CommandStatus::Success,
        0x02 => CommandStatus::UnsupportedOpcode,
        0x03 => CommandStatus::InvalidParameter,
        other => CommandStatus::Failed(other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_log_level() {
        assert_eq!(encode_command(CommandOpcode::SetLogLevel, 4), [17, 4]);
    }

    #[test]
    fn encode_service_switch() {
        assert_eq!(encode_command(CommandOpcode::ChangeBleService, 1), [18, 1]);
    }

    #[test]
    fn parse_success_response() {
        let status = parse_command_response(&[0x80, 17, 0x01]).unwrap();
        assert!(status.is_success());
    }

    #[test]
    fn parse_failure_responses() {
        assert_eq!(
            parse_command_response(&[0x80, 17, 0x02]).unwrap(),
            CommandStatus::UnsupportedOpcode
        );
        assert_eq!(
            parse_command_response(&[0x80, 17, 0x7F]).unwrap(),
            CommandStatus::Failed(0x7F)
        );
    }

    #[test]
    fn short_response_rejected() {
        assert!(parse_command_response(&[0x80, 17]).is_err());
    }
}
