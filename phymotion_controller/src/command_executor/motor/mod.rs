use std::{io, net::ToSocketAddrs as _};

use commands::MotionCommand;
use phymotion::{
    AxisSettings, CancelToken, MotionController, PositionWrite, SerialLink, SerialPortLink,
};
use tracing::info;
use utilities::{
    command_executor::DeviceHandler,
    lazy_tcp::{LazyTcpStream, TcpTimeouts},
};

use crate::{
    command_executor::{CONNECT_TIMEOUT, WRITE_TIMEOUT},
    config::{Config, LinkConfig},
    store::FilePositionStore,
};

pub mod command_sender;
pub mod commands;

pub type Link = Box<dyn SerialLink + Send>;

pub struct PhyMotionHandler {
    controller: MotionController<Link, FilePositionStore>,
}

impl DeviceHandler for PhyMotionHandler {
    type Command = MotionCommand;
}

/// Opens the configured byte stream. TCP links connect lazily on first use.
pub fn open_link(link: &LinkConfig, config: &Config) -> io::Result<Link> {
    let read_timeout = config.controller.session.read_timeout;

    match link {
        LinkConfig::Tcp {
            host,
            port,
            max_retries,
        } => {
            let addr = (host.as_str(), *port)
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::AddrNotAvailable,
                        format!("cannot resolve {host}:{port}"),
                    )
                })?;

            info!(%addr, "Using serial-over-TCP link");
            let timeouts = TcpTimeouts {
                read: read_timeout,
                write: WRITE_TIMEOUT,
                connect: CONNECT_TIMEOUT,
            };
            Ok(Box::new(LazyTcpStream::new(addr, *max_retries, timeouts)))
        }
        LinkConfig::Serial { path, baud_rate } => {
            info!(path = %path, baud_rate, "Opening serial port");
            Ok(Box::new(SerialPortLink::open(path, *baud_rate, read_timeout)?))
        }
    }
}

impl PhyMotionHandler {
    pub fn new(controller: MotionController<Link, FilePositionStore>) -> Self {
        Self { controller }
    }

    /// Connects with the configured link and store, then applies the
    /// configured axis settings.
    pub fn connect(config: &Config) -> io::Result<Self> {
        let link = open_link(&config.link, config)?;
        let store = FilePositionStore::new(&config.positions_dir);

        let mut controller = MotionController::connect(link, store, config.controller.clone())?;
        controller.apply_axis_settings(&config.axes)?;

        Ok(Self::new(controller))
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.controller.cancel_token()
    }

    pub fn configure(&mut self, settings: &[AxisSettings]) -> io::Result<()> {
        Ok(self.controller.apply_axis_settings(settings)?)
    }

    pub fn move_relative(&mut self, moves: &[(u8, f64)]) -> io::Result<()> {
        Ok(self.controller.move_relative(moves)?)
    }

    pub fn move_absolute(&mut self, moves: &[(u8, f64)], record_history: bool) -> io::Result<()> {
        Ok(self.controller.move_absolute(moves, record_history)?)
    }

    pub fn read_position(&mut self, axis: u8) -> io::Result<f64> {
        Ok(self.controller.read_position(axis)?)
    }

    pub fn read_all(&mut self) -> io::Result<Vec<i64>> {
        Ok(self.controller.read_multiple_position(false)?)
    }

    pub fn stop(&mut self, axis: u8) -> io::Result<()> {
        Ok(self.controller.stop(axis)?)
    }

    pub fn stop_all(&mut self) -> io::Result<()> {
        Ok(self.controller.stop_all()?)
    }

    pub fn zero(&mut self, axis: u8) -> io::Result<PositionWrite> {
        Ok(self.controller.set_as_zero_position(axis)?)
    }

    pub fn zero_all(&mut self) -> io::Result<Vec<PositionWrite>> {
        Ok(self.controller.set_all_zero()?)
    }
}
