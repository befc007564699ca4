//! Native serial port implementation using the `serialport` crate.

use {
    crate::{
        error::Result,
        port::{BridgeKind, Port, PortInfo, SerialConfig},
    },
    log::{debug, trace},
    serialport::SerialPortType,
    std::{
        io::{self, Read, Write},
        time::Duration,
    },
};

/// Serial port opened for the bootloader protocol.
///
/// Reads use a zero timeout so [`Port::poll`] returns immediately; pacing is
/// left to the engine's tick loop.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    baud_rate: u32,
}

impl NativePort {
    /// Open a serial port with the given configuration (8N1, no flow control).
    pub fn open(config: &SerialConfig) -> Result<Self> {
        debug!(
            "Opening {} at {} baud",
            config.port_name, config.baud_rate
        );
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(Duration::ZERO)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()?;

        Ok(Self {
            port: Some(port),
            name: config.port_name.clone(),
            baud_rate: config.baud_rate,
        })
    }

    fn inner(&mut self) -> io::Result<&mut Box<dyn serialport::SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed"))
    }
}

impl Port for NativePort {
    fn name(&self) -> &str {
        &self.name
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            trace!("Closed {}", self.name);
        }
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner()?.read(buf)
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner()?.flush()
    }
}

/// List serial ports on the host, classifying USB bridges.
pub fn discover_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports()?;

    Ok(ports
        .into_iter()
        .map(|p| match p.port_type {
            SerialPortType::UsbPort(usb) => {
                let bridge = BridgeKind::from_vid_pid(usb.vid, usb.pid);
                trace!(
                    "Found USB port: {} (VID: {:04X}, PID: {:04X}, {})",
                    p.port_name,
                    usb.vid,
                    usb.pid,
                    bridge.name()
                );
                PortInfo {
                    name: p.port_name,
                    bridge,
                    vid: Some(usb.vid),
                    pid: Some(usb.pid),
                    manufacturer: usb.manufacturer,
                    product: usb.product,
                    serial_number: usb.serial_number,
                }
            },
            _ => PortInfo {
                name: p.port_name,
                bridge: BridgeKind::Unknown,
                vid: None,
                pid: None,
                manufacturer: None,
                product: None,
                serial_number: None,
            },
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_ports_does_not_panic() {
        let _ = discover_ports();
    }

    #[test]
    fn test_open_missing_port_fails() {
        let config = SerialConfig::new("/dev/blflash-does-not-exist", 115_200);
        assert!(NativePort::open(&config).is_err());
    }
}
