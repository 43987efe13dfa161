use std::fmt;

use crate::error::ProtocolError;

pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const ACK: u8 = 0x06;

/// Fixed token the device grammar expects in place of a checksum.
pub const CHECKSUM_PLACEHOLDER: &str = ":XX";

/// Address of the controller on the serial bus.
pub const DEFAULT_ADDRESS: u8 = 0;

const MIN_RESPONSE_LEN: usize = 3;

/// One `<axis>.1<op>` instruction. Several of them joined by spaces form
/// the body of a single frame, which the device applies together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubCommand {
    SystemStatus,
    WritePosition { axis: u8, steps: i64 },
    MoveRelative { axis: u8, steps: i64 },
    Activate(u8),
    Deactivate(u8),
    SetFrequency { axis: u8, value: i64 },
    SetRampFrequency { axis: u8, value: i64 },
    SetStepResolution { axis: u8, code: u8 },
    SetRunCurrent { axis: u8, value: i64 },
    ReadPosition(u8),
    ReadFrequency(u8),
    ReadRampFrequency(u8),
    ReadStepResolution(u8),
    ReadRunCurrent(u8),
    Status(u8),
    Stop(u8),
}

impl fmt::Display for SubCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SubCommand::SystemStatus => write!(f, "S"),
            SubCommand::WritePosition { axis, steps } => write!(f, "{axis}.1P20S{steps:+}"),
            SubCommand::MoveRelative { axis, steps } => write!(f, "{axis}.1{steps:+}"),
            SubCommand::Activate(axis) => write!(f, "{axis}.1MA"),
            SubCommand::Deactivate(axis) => write!(f, "{axis}.1MD"),
            SubCommand::SetFrequency { axis, value } => write!(f, "{axis}.1P14S{value:+}"),
            SubCommand::SetRampFrequency { axis, value } => write!(f, "{axis}.1P15S{value:+}"),
            SubCommand::SetStepResolution { axis, code } => {
                write!(f, "{axis}.1P45S{:+}", i64::from(code))
            }
            SubCommand::SetRunCurrent { axis, value } => write!(f, "{axis}.1P41S{value:+}"),
            SubCommand::ReadPosition(axis) => write!(f, "{axis}.1P20R"),
            SubCommand::ReadFrequency(axis) => write!(f, "{axis}.1P14R"),
            SubCommand::ReadRampFrequency(axis) => write!(f, "{axis}.1P15R"),
            SubCommand::ReadStepResolution(axis) => write!(f, "{axis}.1P45R"),
            SubCommand::ReadRunCurrent(axis) => write!(f, "{axis}.1P41R"),
            SubCommand::Status(axis) => write!(f, "{axis}.1!=H"),
            SubCommand::Stop(axis) => write!(f, "{axis}.1S"),
        }
    }
}

pub fn join(commands: &[SubCommand]) -> String {
    commands
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Wraps `body` as `STX address body :XX ETX`.
pub fn encode(address: u8, body: &str) -> Vec<u8> {
    let address = address.to_string();
    let mut frame =
        Vec::with_capacity(2 + address.len() + body.len() + CHECKSUM_PLACEHOLDER.len());

    frame.push(STX);
    frame.extend_from_slice(address.as_bytes());
    frame.extend_from_slice(body.as_bytes());
    frame.extend_from_slice(CHECKSUM_PLACEHOLDER.as_bytes());
    frame.push(ETX);

    frame
}

/// Checks the envelope and returns everything after the STX byte, cut at
/// the first ETX.
fn acknowledged_body(raw: &[u8]) -> Result<&str, ProtocolError> {
    let trimmed = raw.split(|&b| b == ETX).next().unwrap_or_default();

    if trimmed.len() < MIN_RESPONSE_LEN {
        return Err(ProtocolError::Malformed(format!(
            "response is too short ({} bytes)",
            trimmed.len()
        )));
    }

    if !trimmed.is_ascii() {
        return Err(ProtocolError::Malformed(
            "response contains non-ASCII bytes".to_string(),
        ));
    }

    if trimmed[0] != STX {
        return Err(ProtocolError::Malformed(format!(
            "unexpected envelope byte 0x{:02X}",
            trimmed[0]
        )));
    }

    let text = std::str::from_utf8(&trimmed[1..])
        .map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    if trimmed[1] != ACK {
        return Err(ProtocolError::NotAcknowledged {
            discriminator: trimmed[1],
            payload: text[1..].to_string(),
        });
    }

    Ok(text)
}

/// Decodes a single-value reply: the payload between the ACK byte and the
/// first `:`.
pub fn decode(raw: &[u8]) -> Result<String, ProtocolError> {
    let body = acknowledged_body(raw)?;
    let payload = &body[1..];

    Ok(payload.split(':').next().unwrap_or_default().to_string())
}

/// Decodes a bulk reply carrying one ACK-prefixed value per queried axis,
/// in request order.
pub fn decode_values(raw: &[u8]) -> Result<Vec<String>, ProtocolError> {
    let body = acknowledged_body(raw)?;

    Ok(body
        .split(ACK as char)
        .skip(1)
        .map(|value| value.split(':').next().unwrap_or_default().trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect())
}

pub fn parse_int(axis: u8, payload: &str) -> Result<i64, ProtocolError> {
    payload.trim().parse::<i64>().map_err(|_| {
        ProtocolError::Malformed(format!("axis {axis}: expected an integer, got {payload:?}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_wraps_body() {
        let frame = encode(DEFAULT_ADDRESS, "1.1P20R");
        assert_eq!(frame, b"\x0201.1P20R:XX\x03".to_vec());
    }

    #[test]
    fn test_subcommands_use_explicit_sign() {
        let body = join(&[
            SubCommand::WritePosition { axis: 2, steps: 1234 },
            SubCommand::MoveRelative { axis: 1, steps: -50 },
            SubCommand::MoveRelative { axis: 3, steps: 0 },
            SubCommand::SetStepResolution { axis: 1, code: 10 },
        ]);
        assert_eq!(body, "2.1P20S+1234 1.1-50 3.1+0 1.1P45S+10");
    }

    #[test]
    fn test_query_forms() {
        assert_eq!(SubCommand::Status(4).to_string(), "4.1!=H");
        assert_eq!(SubCommand::Stop(2).to_string(), "2.1S");
        assert_eq!(SubCommand::Activate(1).to_string(), "1.1MA");
        assert_eq!(SubCommand::Deactivate(1).to_string(), "1.1MD");
        assert_eq!(SubCommand::SystemStatus.to_string(), "S");
    }

    #[test]
    fn test_position_write_then_ack_round_trip() {
        let command = SubCommand::WritePosition { axis: 2, steps: 1234 };
        let frame = encode(DEFAULT_ADDRESS, &command.to_string());
        assert_eq!(frame, b"\x0202.1P20S+1234:XX\x03".to_vec());

        let value = decode(b"\x02\x061234:XX\x03").unwrap();
        assert_eq!(parse_int(2, &value).unwrap(), 1234);
    }

    #[test]
    fn test_decode_ignores_bytes_after_terminator() {
        let value = decode(b"\x02\x06E:XX\x03\x02\x06N:XX\x03").unwrap();
        assert_eq!(value, "E");
    }

    #[test]
    fn test_decode_empty_payload() {
        assert_eq!(decode(b"\x02\x06:XX\x03").unwrap(), "");
    }

    #[test]
    fn test_decode_too_short() {
        assert!(matches!(decode(b"\x02\x06"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(decode(b""), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_decode_nak() {
        let err = decode(b"\x02\x15?:XX\x03").unwrap_err();
        assert_eq!(
            err,
            ProtocolError::NotAcknowledged {
                discriminator: 0x15,
                payload: "?:XX".to_string()
            }
        );
    }

    #[test]
    fn test_decode_bad_envelope() {
        assert!(matches!(
            decode(b"X\x06123:XX\x03"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_values_colon_separated() {
        let values = decode_values(b"\x02\x06100:\x06-50:\x06200:\x03").unwrap();
        assert_eq!(values, vec!["100", "-50", "200"]);
    }

    #[test]
    fn test_decode_values_trailing_checksum() {
        let values = decode_values(b"\x02\x06100\x06-50\x06200:XX\x03").unwrap();
        assert_eq!(values, vec!["100", "-50", "200"]);
    }

    #[test]
    fn test_parse_int_rejects_garbage() {
        assert!(parse_int(1, "12a").is_err());
        assert_eq!(parse_int(1, " -7 ").unwrap(), -7);
    }
}
