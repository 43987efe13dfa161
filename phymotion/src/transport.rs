use std::{
    io::{self, ErrorKind, Read, Write},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use utilities::lazy_tcp::LazyTcpStream;

use crate::{
    codec,
    error::{Error, Result},
};

/// Byte stream to the controller with an "input pending" signal.
pub trait SerialLink: Read + Write {
    fn bytes_to_read(&mut self) -> io::Result<usize>;
    fn clear_input(&mut self) -> io::Result<()>;
}

impl<T: SerialLink + ?Sized> SerialLink for Box<T> {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        (**self).bytes_to_read()
    }

    fn clear_input(&mut self) -> io::Result<()> {
        (**self).clear_input()
    }
}

impl SerialLink for LazyTcpStream {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        LazyTcpStream::bytes_to_read(self)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        LazyTcpStream::clear_input(self)
    }
}

#[cfg(feature = "serial")]
pub use serial::SerialPortLink;

#[cfg(feature = "serial")]
mod serial {
    use std::{
        io::{self, Read, Write},
        time::Duration,
    };

    use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};

    use super::SerialLink;

    pub struct SerialPortLink {
        port: Box<dyn SerialPort>,
    }

    impl SerialPortLink {
        /// Opens `path` as 8N1 at `baud_rate`.
        pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> io::Result<Self> {
            let port = serialport::new(path, baud_rate)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .timeout(timeout)
                .open()?;

            Ok(Self { port })
        }
    }

    impl Read for SerialPortLink {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.port.read(buf)
        }
    }

    impl Write for SerialPortLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.port.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.port.flush()
        }
    }

    impl SerialLink for SerialPortLink {
        fn bytes_to_read(&mut self) -> io::Result<usize> {
            Ok(self.port.bytes_to_read()? as usize)
        }

        fn clear_input(&mut self) -> io::Result<()> {
            Ok(self.port.clear(ClearBuffer::Input)?)
        }
    }
}

/// Shared flag that aborts blocking waits.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTiming {
    /// Upper bound on the wait for the first byte of a reply.
    #[serde(with = "millis")]
    pub read_timeout: Duration,
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Extra wait after the first byte so the rest of the reply arrives.
    #[serde(with = "millis")]
    pub settle_delay: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(10),
            settle_delay: Duration::from_millis(20),
        }
    }
}

pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

pub(crate) mod optional_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.serialize_some(&(value.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

/// Owns the link and serialises request/response exchanges.
pub struct TransportSession<S: SerialLink> {
    link: S,
    address: u8,
    timing: SessionTiming,
    cancel: CancelToken,
}

impl<S: SerialLink> TransportSession<S> {
    pub fn new(link: S, timing: SessionTiming) -> Self {
        Self {
            link,
            address: codec::DEFAULT_ADDRESS,
            timing,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn timing(&self) -> SessionTiming {
        self.timing
    }

    pub fn write(&mut self, frame: &[u8]) -> io::Result<()> {
        trace!(frame = ?String::from_utf8_lossy(frame), "write");
        self.link.write_all(frame)?;
        self.link.flush()
    }

    /// Polls for the first byte until `timeout` elapses, waits the settle
    /// delay, then drains whatever is buffered. Empty on silence.
    pub fn read_available(&mut self, timeout: Duration) -> io::Result<Vec<u8>> {
        let start = Instant::now();

        while start.elapsed() < timeout
            && !self.cancel.is_cancelled()
            && self.link.bytes_to_read()? == 0
        {
            thread::sleep(self.timing.poll_interval);
        }

        thread::sleep(self.timing.settle_delay);

        let pending = self.link.bytes_to_read()?;
        if pending == 0 {
            return Ok(Vec::new());
        }

        let mut buffer = vec![0; pending];
        let mut filled = 0;
        while filled < pending {
            match self.link.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        buffer.truncate(filled);

        trace!(reply = ?String::from_utf8_lossy(&buffer), "read");
        Ok(buffer)
    }

    pub fn clear_input(&mut self) -> io::Result<()> {
        self.link.clear_input()
    }

    /// Sends `body` as one frame and returns the raw reply.
    pub fn exchange(&mut self, body: &str) -> Result<Vec<u8>> {
        debug!(command = body, "send");
        let frame = codec::encode(self.address, body);
        self.write(&frame)?;

        let reply = self.read_available(self.timing.read_timeout)?;
        if reply.is_empty() {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            return Err(Error::TransportTimeout(self.timing.read_timeout));
        }

        Ok(reply)
    }

    pub fn transact(&mut self, body: &str) -> Result<String> {
        let reply = self.exchange(body)?;
        Ok(codec::decode(&reply)?)
    }

    pub fn transact_values(&mut self, body: &str) -> Result<Vec<String>> {
        let reply = self.exchange(body)?;
        Ok(codec::decode_values(&reply)?)
    }

    pub fn into_inner(self) -> S {
        self.link
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Link that delivers a queued reply only after a number of polls.
    #[derive(Default)]
    struct DelayedLink {
        written: Vec<u8>,
        reply: VecDeque<u8>,
        polls_before_reply: usize,
        polls: usize,
    }

    impl Read for DelayedLink {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.reply.len());
            for (slot, byte) in buf.iter_mut().zip(self.reply.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl Write for DelayedLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SerialLink for DelayedLink {
        fn bytes_to_read(&mut self) -> io::Result<usize> {
            self.polls += 1;
            if self.polls > self.polls_before_reply {
                Ok(self.reply.len())
            } else {
                Ok(0)
            }
        }

        fn clear_input(&mut self) -> io::Result<()> {
            self.reply.clear();
            Ok(())
        }
    }

    fn timing() -> SessionTiming {
        SessionTiming {
            read_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(5),
            settle_delay: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_silent_link_waits_full_window() {
        let mut session = TransportSession::new(DelayedLink::default(), timing());

        let start = Instant::now();
        let reply = session.read_available(Duration::from_millis(100)).unwrap();
        let elapsed = start.elapsed();

        assert!(reply.is_empty());
        assert!(elapsed >= Duration::from_millis(120), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(250), "{elapsed:?}");
    }

    #[test]
    fn test_reply_drained_after_first_byte() {
        let link = DelayedLink {
            reply: b"\x02\x06E:XX\x03".iter().copied().collect(),
            polls_before_reply: 3,
            ..Default::default()
        };
        let mut session = TransportSession::new(link, timing());

        let start = Instant::now();
        let reply = session.read_available(Duration::from_millis(100)).unwrap();

        assert_eq!(reply, b"\x02\x06E:XX\x03".to_vec());
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_exchange_reports_timeout() {
        let mut session = TransportSession::new(DelayedLink::default(), timing());

        let err = session.transact("1.1P20R").unwrap_err();
        assert!(matches!(err, Error::TransportTimeout(_)));

        let link = session.into_inner();
        assert_eq!(link.written, b"\x0201.1P20R:XX\x03".to_vec());
    }

    #[test]
    fn test_cancelled_wait_returns_early() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut session =
            TransportSession::new(DelayedLink::default(), timing()).with_cancel_token(cancel);

        let start = Instant::now();
        let reply = session.read_available(Duration::from_secs(5)).unwrap();

        assert!(reply.is_empty());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_cancelled_exchange_is_not_a_timeout() {
        let cancel = CancelToken::new();
        let mut session = TransportSession::new(DelayedLink::default(), timing())
            .with_cancel_token(cancel.clone());
        cancel.cancel();

        let start = Instant::now();
        let err = session.transact("1.1!=H").unwrap_err();

        assert!(matches!(err, Error::Cancelled), "{err:?}");
        assert!(start.elapsed() < Duration::from_millis(100));

        cancel.reset();
        assert!(matches!(
            session.transact("1.1!=H"),
            Err(Error::TransportTimeout(_))
        ));
    }
}
