//! Driver for Phytron phyMOTION stepper controllers speaking the ASCII
//! `STX address command :XX ETX` protocol.

pub mod axis;
pub mod boundary;
pub mod codec;
pub mod controller;
pub mod error;
pub mod store;
pub mod transport;

pub use axis::{AxisConfig, AxisSettings, StepResolution};
pub use boundary::{Boundary, BoundaryTable, MachineProfile, TravelLimit};
pub use controller::{ControllerOptions, MotionController, PositionWrite};
pub use error::{Error, ProtocolError, Result};
pub use store::{MemoryStore, PositionStore};
pub use transport::{CancelToken, SerialLink, SessionTiming, TransportSession};

#[cfg(feature = "serial")]
pub use transport::SerialPortLink;
