//! Serial byte channel

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;

/// Line-oriented channel to the motion firmware
#[async_trait]
pub trait SerialTransport: Send {
    /// Open the channel; reads time out after `read_timeout`
    async fn open(&mut self, port: &str, baud_rate: u32, read_timeout: Duration) -> io::Result<()>;

    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    async fn flush(&mut self) -> io::Result<()>;

    /// Read one line including its terminator.
    ///
    /// Returns `Ok(None)` when the read timeout elapses before a full line
    /// arrives; partial data is kept for the next call.
    async fn read_line(&mut self) -> io::Result<Option<Vec<u8>>>;

    /// Close the channel. Closing a channel that is not open succeeds.
    async fn close(&mut self) -> io::Result<()>;

    fn is_open(&self) -> bool;
}

/// Serial port transport backed by `tokio-serial`
#[derive(Default)]
pub struct TokioSerialTransport {
    port: Option<BufReader<SerialStream>>,
    pending: Vec<u8>,
    read_timeout: Duration,
}

impl TokioSerialTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn port_mut(&mut self) -> io::Result<&mut BufReader<SerialStream>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port is not open"))
    }
}

#[async_trait]
impl SerialTransport for TokioSerialTransport {
    async fn open(&mut self, port: &str, baud_rate: u32, read_timeout: Duration) -> io::Result<()> {
        debug!("Opening serial port {} at {} baud", port, baud_rate);
        let stream = tokio_serial::new(port, baud_rate)
            .timeout(read_timeout)
            .open_native_async()
            .map_err(io::Error::from)?;
        self.port = Some(BufReader::new(stream));
        self.pending.clear();
        self.read_timeout = read_timeout;
        Ok(())
    }

    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port_mut()?.get_mut().write_all(bytes).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.port_mut()?.get_mut().flush().await
    }

    async fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        let read_timeout = self.read_timeout;
        let Some(port) = self.port.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "serial port is not open"));
        };

        match timeout(read_timeout, port.read_until(b'\n', &mut self.pending)).await {
            Err(_) => Ok(None),
            Ok(Ok(0)) => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "serial port closed")),
            Ok(Ok(_)) => Ok(Some(std::mem::take(&mut self.pending))),
            Ok(Err(e)) => Err(e),
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        if let Some(mut port) = self.port.take() {
            port.get_mut().flush().await?;
            debug!("Serial port closed");
        }
        self.pending.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}
