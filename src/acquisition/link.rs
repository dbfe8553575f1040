//! Serial link to the gait device.
//!
//! The link is opened with `tokio-serial` and split into a read half, owned
//! by the [`SampleDispatcher`](super::SampleDispatcher), and a write half
//! wrapped in a [`CommandWriter`] for outbound commands.

use std::pin::Pin;

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_serial::{SerialPortBuilderExt, SerialPortType, SerialStream};
use tracing::{debug, info};

/// Link-level errors. Any of these leaves the link closed.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Failed to open {port} at {baud} baud: {source}")]
    Open {
        port: String,
        baud: u32,
        #[source]
        source: tokio_serial::Error,
    },

    #[error("Failed to enumerate serial ports: {0}")]
    Enumerate(#[source] tokio_serial::Error),

    #[error("Write to {port} failed: {source}")]
    Write {
        port: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command must be a single line without a newline: {0:?}")]
    InvalidCommand(String),
}

/// Open `port` at `baud` (8N1, no flow control).
pub fn open_serial(port: &str, baud: u32) -> Result<SerialStream, LinkError> {
    let stream = tokio_serial::new(port, baud)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|source| LinkError::Open {
            port: port.to_string(),
            baud,
            source,
        })?;
    info!(port, baud, "Serial port opened");
    Ok(stream)
}

/// A serial port visible to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub description: String,
}

/// Enumerate available serial ports, e.g. for `gaitscope list-ports`.
pub fn list_ports() -> Result<Vec<PortInfo>, LinkError> {
    let ports = tokio_serial::available_ports().map_err(LinkError::Enumerate)?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let description = match p.port_type {
                SerialPortType::UsbPort(usb) => match (usb.manufacturer, usb.product) {
                    (Some(m), Some(prod)) => format!("USB {m} {prod}"),
                    (_, Some(prod)) => format!("USB {prod}"),
                    _ => format!("USB {:04x}:{:04x}", usb.vid, usb.pid),
                },
                SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                SerialPortType::PciPort => "PCI".to_string(),
                SerialPortType::Unknown => "Unknown".to_string(),
            };
            PortInfo {
                name: p.port_name,
                description,
            }
        })
        .collect())
}

type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Write half of the link. Each command is written and flushed as one unit.
pub struct CommandWriter {
    port: String,
    inner: Mutex<BoxedWriter>,
}

impl CommandWriter {
    pub fn new<W>(port: impl Into<String>, writer: W) -> Self
    where
        W: AsyncWrite + Send + 'static,
    {
        Self {
            port: port.into(),
            inner: Mutex::new(Box::pin(writer)),
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Write `command` followed by `\n`, then flush.
    pub async fn send(&self, command: &str) -> Result<(), LinkError> {
        if command.contains(['\n', '\r']) {
            return Err(LinkError::InvalidCommand(command.to_string()));
        }
        let mut frame = Vec::with_capacity(command.len() + 1);
        frame.extend_from_slice(command.as_bytes());
        frame.push(b'\n');

        let mut writer = self.inner.lock().await;
        let result = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        }
        .await;
        result.map_err(|source| LinkError::Write {
            port: self.port.clone(),
            source,
        })?;

        debug!(port = %self.port, command, "Command sent");
        Ok(())
    }

    /// Flush and shut down the write half.
    pub async fn close(&self) {
        let mut writer = self.inner.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!(port = %self.port, error = %e, "Write half shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_command_is_newline_terminated() {
        let (client, mut device) = tokio::io::duplex(64);
        let writer = CommandWriter::new("test", client);
        writer.send("gc").await.expect("send");
        writer.send("gcs").await.expect("send");

        let mut buf = [0u8; 7];
        device.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"gc\ngcs\n");
    }

    #[tokio::test]
    async fn test_embedded_newline_rejected() {
        let (client, _device) = tokio::io::duplex(64);
        let writer = CommandWriter::new("test", client);
        let err = writer.send("gc\ngcs").await.expect_err("must reject");
        assert!(matches!(err, LinkError::InvalidCommand(_)));
    }

    #[tokio::test]
    async fn test_write_to_closed_peer_fails() {
        let (client, device) = tokio::io::duplex(64);
        drop(device);
        let writer = CommandWriter::new("gone", client);
        let err = writer.send("az").await.expect_err("peer closed");
        assert!(matches!(err, LinkError::Write { .. }));
    }
}
