//! Serial line handling for the radar sensor: opening the port, issuing
//! the startup configuration sequence, and reading newline-delimited lines
//! with a bounded timeout, with its own reconnect/timeout bookkeeping.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Fixed configuration command sequence issued once on startup. Each
/// command gets a 1s response window; failures are logged and do not
/// abort startup.
const STARTUP_COMMANDS: &[&str] = &["{\"mode\":\"json\"}", "{\"alerts\":\"on\"}"];

#[derive(Debug, Error)]
pub enum RadarSerialError {
    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serial read error: {0}")]
    Read(#[source] std::io::Error),
}

pub struct RadarPort {
    reader: BufReader<SerialStream>,
    line_buf: Vec<u8>,
}

impl RadarPort {
    pub async fn open(path: &str, baud_rate: u32) -> Result<Self, RadarSerialError> {
        let mut port = tokio_serial::new(path, baud_rate)
            .timeout(Duration::from_secs(1))
            .open_native_async()
            .map_err(|e| RadarSerialError::Open {
                port: path.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })?;

        for command in STARTUP_COMMANDS {
            let line = format!("{command}\r\n");
            match tokio::time::timeout(Duration::from_secs(1), port.write_all(line.as_bytes()))
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(command, error = %e, "radar startup command failed"),
                Err(_) => tracing::warn!(command, "radar startup command timed out"),
            }
        }

        Ok(Self {
            reader: BufReader::new(port),
            line_buf: Vec::with_capacity(256),
        })
    }

    /// Read one newline-delimited line. Invalid UTF-8 is tolerated via
    /// lossy conversion rather than failing the read.
    pub async fn read_line(&mut self) -> Result<String, RadarSerialError> {
        self.line_buf.clear();
        let n = tokio::time::timeout(
            Duration::from_secs(1),
            self.reader.read_until(b'\n', &mut self.line_buf),
        )
        .await
        .map_err(|_| RadarSerialError::Read(std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out")))?
        .map_err(RadarSerialError::Read)?;

        if n == 0 {
            return Err(RadarSerialError::Read(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "serial port closed",
            )));
        }

        Ok(String::from_utf8_lossy(&self.line_buf).trim_end().to_string())
    }
}
