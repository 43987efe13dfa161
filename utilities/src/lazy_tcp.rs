use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

const PEEK_BUFFER: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct TcpTimeouts {
    pub read: Duration,
    pub write: Duration,
    pub connect: Duration,
}

impl Default for TcpTimeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_millis(500),
            write: Duration::from_millis(100),
            connect: Duration::from_secs(1),
        }
    }
}

/// TCP stream to a serial-over-Ethernet gateway that connects on first use
/// and reconnects once when the peer resets the connection.
pub struct LazyTcpStream {
    addr: SocketAddr,
    stream: Option<TcpStream>,
    max_retries: u32,
    timeouts: TcpTimeouts,
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
    )
}

impl LazyTcpStream {
    pub fn new(addr: SocketAddr, max_retries: u32, timeouts: TcpTimeouts) -> Self {
        LazyTcpStream {
            addr,
            stream: None,
            max_retries,
            timeouts,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn connect(&mut self) -> io::Result<&mut TcpStream> {
        let mut last_error = None;

        for _ in 0..=self.max_retries {
            match TcpStream::connect_timeout(&self.addr, self.timeouts.connect) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeouts.read))?;
                    stream.set_write_timeout(Some(self.timeouts.write))?;
                    stream.set_nodelay(true)?;
                    return Ok(self.stream.insert(stream));
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| io::Error::other("Max connection retries reached")))
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        if self.stream.is_none() {
            return self.connect();
        }
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::from(ErrorKind::NotConnected))
    }

    pub fn reconnect(&mut self) -> io::Result<()> {
        self.disconnect();
        self.connect().map(|_| ())
    }

    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Runs `op` on the stream, retrying once on a fresh connection if the
    /// peer dropped it.
    fn with_stream<T>(
        &mut self,
        mut op: impl FnMut(&mut TcpStream) -> io::Result<T>,
    ) -> io::Result<T> {
        match op(self.stream()?) {
            Err(e) if is_disconnect(&e) => {
                self.disconnect();
                op(self.connect()?)
            }
            result => result,
        }
    }

    /// Number of bytes that can be read without blocking.
    pub fn bytes_to_read(&mut self) -> io::Result<usize> {
        let stream = self.stream()?;
        stream.set_nonblocking(true)?;

        let mut buf = [0; PEEK_BUFFER];
        let result = stream.peek(&mut buf);
        stream.set_nonblocking(false)?;

        match result {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) if is_disconnect(&e) => {
                self.disconnect();
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    /// Discards everything already received.
    pub fn clear_input(&mut self) -> io::Result<()> {
        let stream = self.stream()?;
        stream.set_nonblocking(true)?;

        let mut buf = [0; PEEK_BUFFER];
        let result = loop {
            match stream.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        stream.set_nonblocking(false)?;

        result
    }
}

impl Read for LazyTcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.with_stream(|stream| stream.read(buf))
    }
}

impl Write for LazyTcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_stream(|stream| stream.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_stream(|stream| stream.flush())
    }
}
