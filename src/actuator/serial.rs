use super::{frame_command, ActuatorError};
use log::{debug, info, warn};
use std::io::Write;
use std::time::Duration;

/// Substring that marks a serial adapter as the actuator when no port is
/// configured.
const AUTO_SELECT_MARKER: &str = "USB";

/// Pick the port to open: the configured one, else the first available name
/// containing "USB".
pub fn select_port(configured: Option<&str>, available: &[String]) -> Option<String> {
    if let Some(port) = configured.filter(|p| !p.is_empty()) {
        return Some(port.to_string());
    }
    available
        .iter()
        .find(|name| name.contains(AUTO_SELECT_MARKER))
        .cloned()
}

/// Names of the serial adapters the OS reports.
#[cfg(feature = "serial")]
pub fn available_port_names() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            warn!("Failed to enumerate serial ports: {}", e);
            Vec::new()
        }
    }
}

#[cfg(not(feature = "serial"))]
pub fn available_port_names() -> Vec<String> {
    Vec::new()
}

/// Write side of the actuator serial connection. An unopened line is inert:
/// every write reports [`ActuatorError::NotOpen`].
pub struct SerialLine {
    name: Option<String>,
    writer: Option<Box<dyn Write + Send>>,
}

#[cfg(feature = "serial")]
struct PortWriter(Box<dyn serialport::SerialPort>);

#[cfg(feature = "serial")]
impl Write for PortWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl SerialLine {
    pub fn inert() -> Self {
        Self {
            name: None,
            writer: None,
        }
    }

    /// Wrap an arbitrary writer, e.g. a pty or an in-memory buffer.
    pub fn from_writer(name: impl Into<String>, writer: Box<dyn Write + Send>) -> Self {
        Self {
            name: Some(name.into()),
            writer: Some(writer),
        }
    }

    /// Open `port` at `baud_rate`, 8N1, no flow control. The timeout bounds
    /// each write.
    #[cfg(feature = "serial")]
    pub fn open(port: &str, baud_rate: u32, write_timeout: Duration) -> Result<Self, ActuatorError> {
        let handle = serialport::new(port, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(write_timeout)
            .open()
            .map_err(|e| ActuatorError::Open {
                port: port.to_string(),
                reason: e.to_string(),
            })?;
        info!("Serial port {} opened at {} baud", port, baud_rate);
        Ok(Self::from_writer(port, Box::new(PortWriter(handle))))
    }

    #[cfg(not(feature = "serial"))]
    pub fn open(port: &str, _baud_rate: u32, _write_timeout: Duration) -> Result<Self, ActuatorError> {
        Err(ActuatorError::Open {
            port: port.to_string(),
            reason: "serial support not compiled in".to_string(),
        })
    }

    /// Resolve the port (configured or auto-selected) and open it. Any
    /// failure yields an inert line so the endpoint keeps serving.
    pub fn connect(configured: Option<&str>, baud_rate: u32, write_timeout: Duration) -> Self {
        let available = if configured.is_some() {
            Vec::new()
        } else {
            let names = available_port_names();
            debug!("Serial adapters: {:?}", names);
            names
        };
        let Some(port) = select_port(configured, &available) else {
            warn!("No serial adapter matching \"{}\" found; actuator disabled", AUTO_SELECT_MARKER);
            return Self::inert();
        };
        match Self::open(&port, baud_rate, write_timeout) {
            Ok(line) => line,
            Err(e) => {
                warn!("{} (actuator disabled)", e);
                Self::inert()
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Write one framed command and wait for it to drain.
    pub fn write_command(&mut self, channel: u8, value: i64) -> Result<(), ActuatorError> {
        let writer = self.writer.as_mut().ok_or(ActuatorError::NotOpen)?;
        writer.write_all(frame_command(channel, value).as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for SerialLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLine")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .finish()
    }
}
