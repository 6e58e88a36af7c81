use crate::adapters::LineAdapter;
use crate::config::SerialLinkConfig;
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;
#[cfg(feature = "instrument_serial")]
use std::sync::Arc;
#[cfg(feature = "instrument_serial")]
use tokio::sync::Mutex;

/// One serial link to the jet controller or a sensor bridge.
///
/// `serialport` is blocking, so every exchange runs on Tokio's blocking pool
/// with the port held for the whole command/response pair.
pub struct SerialAdapter {
    port_name: String,
    baud_rate: u32,
    /// Time allowed for one response line
    timeout: Duration,
    line_terminator: String,
    response_delimiter: u8,

    #[cfg(feature = "instrument_serial")]
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialAdapter {
    /// Link on `port_name` with CR/LF commands and LF-terminated responses.
    pub fn new(port_name: String, baud_rate: u32) -> Self {
        Self {
            port_name,
            baud_rate,
            timeout: Duration::from_secs(1),
            line_terminator: "\r\n".to_string(),
            response_delimiter: b'\n',
            #[cfg(feature = "instrument_serial")]
            port: None,
        }
    }

    /// Create an adapter from a configured link.
    pub fn from_config(config: &SerialLinkConfig) -> Self {
        Self::new(config.port.clone(), config.baud_rate).with_timeout(config.timeout)
    }

    /// Set the read timeout for one response line.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn link_error(&self, message: impl Into<String>) -> DaqError {
        DaqError::device(self.port_name.clone(), message)
    }

    #[cfg(feature = "instrument_serial")]
    fn port(&self) -> AppResult<Arc<Mutex<Box<dyn SerialPort>>>> {
        self.port.clone().ok_or(DaqError::SerialPortNotConnected)
    }
}

#[async_trait]
impl LineAdapter for SerialAdapter {
    fn name(&self) -> &str {
        &self.port_name
    }

    async fn connect(&mut self) -> AppResult<()> {
        #[cfg(feature = "instrument_serial")]
        {
            // Short internal timeout; the overall line timeout is enforced in `query`
            let port = serialport::new(&self.port_name, self.baud_rate)
                .timeout(Duration::from_millis(100))
                .open()
                .map_err(|e| {
                    self.link_error(format!(
                        "failed to open serial port at {} baud: {e}",
                        self.baud_rate
                    ))
                })?;

            self.port = Some(Arc::new(Mutex::new(port)));
            debug!(
                "Serial port '{}' opened at {} baud",
                self.port_name, self.baud_rate
            );
            Ok(())
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            Err(DaqError::SerialFeatureDisabled)
        }
    }

    async fn disconnect(&mut self) -> AppResult<()> {
        #[cfg(feature = "instrument_serial")]
        {
            if self.port.take().is_some() {
                debug!("Serial port '{}' closed", self.port_name);
            }
        }
        Ok(())
    }

    async fn send(&mut self, command: &str) -> AppResult<()> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = self.port()?;
            let line = format!("{}{}", command, self.line_terminator);
            let device = self.port_name.clone();
            tokio::task::spawn_blocking(move || {
                let mut port = port.blocking_lock();
                write_line(&mut **port, &device, &line)
            })
            .await
            .map_err(|_| self.link_error("serial I/O task panicked"))?
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = command;
            Err(DaqError::SerialFeatureDisabled)
        }
    }

    async fn query(&mut self, query: &str) -> AppResult<String> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = self.port()?;
            let line = format!("{}{}", query, self.line_terminator);
            let (delimiter, timeout) = (self.response_delimiter, self.timeout);
            let device = self.port_name.clone();
            tokio::task::spawn_blocking(move || {
                let mut port = port.blocking_lock();
                write_line(&mut **port, &device, &line)?;
                read_line(&mut **port, &device, delimiter, timeout)
            })
            .await
            .map_err(|_| self.link_error("serial I/O task panicked"))?
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = query;
            Err(DaqError::SerialFeatureDisabled)
        }
    }
}

#[cfg(feature = "instrument_serial")]
fn write_line(port: &mut dyn SerialPort, device: &str, line: &str) -> AppResult<()> {
    use std::io::Write;

    port.write_all(line.as_bytes())
        .and_then(|_| port.flush())
        .map_err(|e| DaqError::device(device, format!("serial write failed: {e}")))?;
    debug!(port = device, "-> {}", line.trim_end());
    Ok(())
}

/// Read bytes until `delimiter`, giving up once `timeout` has passed.
#[cfg(feature = "instrument_serial")]
fn read_line(
    port: &mut dyn SerialPort,
    device: &str,
    delimiter: u8,
    timeout: Duration,
) -> AppResult<String> {
    use std::io::Read;

    let deadline = std::time::Instant::now() + timeout;
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    while std::time::Instant::now() < deadline {
        match port.read(&mut byte) {
            Ok(0) => return Err(DaqError::device(device, "serial port closed mid-line")),
            Ok(_) if byte[0] == delimiter => {
                let line = String::from_utf8_lossy(&line).trim().to_string();
                debug!(port = device, "<- {}", line);
                return Ok(line);
            }
            Ok(_) => line.push(byte[0]),
            // the port's own timeout is shorter than the line timeout
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => return Err(DaqError::device(device, format!("serial read error: {e}"))),
        }
    }
    Err(DaqError::device(
        device,
        format!("no response line within {timeout:?}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_adapter_creation() {
        let adapter = SerialAdapter::new("/dev/ttyACM0".to_string(), 38400);
        assert_eq!(adapter.name(), "/dev/ttyACM0");
        assert_eq!(adapter.baud_rate, 38400);
        assert_eq!(adapter.line_terminator, "\r\n");
    }

    #[test]
    fn test_from_config() {
        let mut config = SerialLinkConfig::on("COM3");
        config.timeout = Duration::from_millis(250);
        let adapter = SerialAdapter::from_config(&config);
        assert_eq!(adapter.name(), "COM3");
        assert_eq!(adapter.timeout, Duration::from_millis(250));
    }

    #[cfg(feature = "instrument_serial")]
    #[tokio::test]
    async fn test_query_before_connect_fails() {
        let mut adapter = SerialAdapter::new("/dev/null-port".to_string(), 9600);
        let err = adapter.query("FRAME?").await.unwrap_err();
        assert!(err.is_device_failure());
    }
}
