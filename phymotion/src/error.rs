use std::{io, time::Duration};

/// Failures decoding a reply frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Command not acknowledged (discriminator 0x{discriminator:02X}): {payload:?}")]
    NotAcknowledged { discriminator: u8, payload: String },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Axis {axis}: target {target} steps is outside the travel window ({min}, {max})")]
    MotorOutOfRange {
        axis: u8,
        target: i64,
        min: f64,
        max: f64,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No response from controller within {0:?}")]
    TransportTimeout(Duration),

    #[error("Axis {axis} does not exist, controller has axes 1..={count}")]
    InvalidAxis { axis: u8, count: u8 },

    #[error("Axis {axis} still moving after {waited:?}")]
    MotionTimeout { axis: u8, waited: Duration },

    #[error("Wait cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Io(error) => error,
            Error::TransportTimeout(_) | Error::MotionTimeout { .. } => {
                io::Error::new(io::ErrorKind::TimedOut, error.to_string())
            }
            Error::Protocol(_) => io::Error::new(io::ErrorKind::InvalidData, error.to_string()),
            Error::MotorOutOfRange { .. } | Error::InvalidAxis { .. } => {
                io::Error::new(io::ErrorKind::InvalidInput, error.to_string())
            }
            Error::Cancelled => io::Error::new(io::ErrorKind::Interrupted, error.to_string()),
            Error::Configuration(_) => io::Error::other(error.to_string()),
        }
    }
}
