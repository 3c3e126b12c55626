//! # Actuator Bridge
//!
//! The light outputs are driven by a microcontroller on a serial line. Each
//! accepted update becomes one ASCII line:
//!
//! ```text
//! <channel> <value>\n
//! ```
//!
//! No acknowledgement is read back. Writes are best-effort: a failed or
//! timed-out write is logged and counted in [`crate::metrics`], never retried.
//!
//! Resources only see the [`OutputSink`] trait. The production sink is an
//! [`ActuatorHandle`], which hands commands to a writer task so the blocking
//! serial write never runs while the registry lock is held.

mod serial;

pub use serial::{available_port_names, select_port, SerialLine};

use crate::metrics;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("serial line is not open")]
    NotOpen,

    #[error("failed to open serial port {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("serial write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Destination for output commands produced by resource updates.
pub trait OutputSink: Send + Sync {
    fn set_output(&self, channel: u8, value: i64);
}

/// Text framing of one output command.
pub fn frame_command(channel: u8, value: i64) -> String {
    format!("{} {}\n", channel, value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputCommand {
    pub channel: u8,
    pub value: i64,
}

/// Cloneable sender side of the actuator writer task.
#[derive(Debug, Clone)]
pub struct ActuatorHandle {
    tx: mpsc::UnboundedSender<OutputCommand>,
}

impl OutputSink for ActuatorHandle {
    fn set_output(&self, channel: u8, value: i64) {
        if self.tx.send(OutputCommand { channel, value }).is_err() {
            warn!("Actuator writer gone; dropping output {} {}", channel, value);
            metrics::inc_actuator_failures();
        }
    }
}

/// Spawn the writer task that owns `line`. Must be called inside a Tokio
/// runtime. The task ends once every handle is dropped.
pub fn start_actuator(line: SerialLine) -> ActuatorHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputCommand>();
    if line.is_open() {
        info!("Actuator writer started on {}", line.name().unwrap_or("?"));
    } else {
        info!("Actuator writer started without a serial line; outputs are ignored");
    }
    let line = Arc::new(Mutex::new(line));

    tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            let line = line.clone();
            let result = tokio::task::spawn_blocking(move || {
                line.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .write_command(cmd.channel, cmd.value)
            })
            .await;
            match result {
                Ok(Ok(())) => {
                    metrics::inc_actuator_writes();
                    debug!("Output {} set to {}", cmd.channel, cmd.value);
                }
                Ok(Err(ActuatorError::NotOpen)) => {
                    debug!("No serial line; output {} {} not written", cmd.channel, cmd.value);
                }
                Ok(Err(e)) => {
                    metrics::inc_actuator_failures();
                    warn!("Output {} {} not written: {}", cmd.channel, cmd.value, e);
                }
                Err(e) => {
                    metrics::inc_actuator_failures();
                    warn!("Actuator write task failed: {}", e);
                }
            }
        }
        debug!("actuator writer terminated");
    });

    ActuatorHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Wire(Arc<Mutex<Vec<u8>>>);

    impl Write for Wire {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn frames_channel_and_value() {
        assert_eq!(frame_command(1, 128), "1 128\n");
        assert_eq!(frame_command(3, 0), "3 0\n");
    }

    #[tokio::test]
    async fn writer_task_writes_one_line_per_command() {
        let wire = Wire::default();
        let handle = start_actuator(SerialLine::from_writer("test", Box::new(wire.clone())));
        handle.set_output(1, 200);
        handle.set_output(2, 7);

        let expected = b"1 200\n2 7\n".to_vec();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while *wire.0.lock().unwrap() != expected && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*wire.0.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn inert_line_swallows_commands() {
        let handle = start_actuator(SerialLine::inert());
        handle.set_output(1, 5);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
