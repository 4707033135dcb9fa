// Pololu Maestro serial servo controller
//
// The Maestro generates the 50 Hz servo PWM itself; we only stream targets.
// Compact protocol: [Command, Params...]
// Pololu protocol:  [0xAA, Device, Command & 0x7F, Params...]
// Targets are in quarter-microseconds, split into two 7-bit bytes.

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

use super::hardware::{HardwareError, ServoBus, angle_to_pulse_us};

/// Default serial configuration (the USB virtual port ignores baud rate)
pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Start byte of the addressed Pololu protocol
const POLOLU_START: u8 = 0xAA;

/// Command set
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Command {
    SetTarget = 0x84,
    GetErrors = 0xA1,
}

pub type Result<T> = std::result::Result<T, HardwareError>;

/// Serial link to a Maestro controller
pub struct MaestroBus {
    port: Box<dyn SerialPort>,
    device: Option<u8>,
    channels: u8,
    attached: Vec<bool>,
}

impl MaestroBus {
    /// Open a controller with `channels` outputs using the compact protocol
    pub fn open(port_name: &str, channels: u8) -> Result<Self> {
        Self::open_with(port_name, DEFAULT_BAUDRATE, channels, None)
    }

    /// Open with custom baudrate and optional device number (Pololu protocol,
    /// needed when several controllers share one TTL line)
    pub fn open_with(
        port_name: &str,
        baudrate: u32,
        channels: u8,
        device: Option<u8>,
    ) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self {
            port,
            device,
            channels,
            attached: vec![false; channels as usize],
        })
    }

    /// Build a command frame for the configured protocol
    fn build_packet(device: Option<u8>, command: Command, params: &[u8]) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3 + params.len());
        match device {
            Some(id) => {
                packet.push(POLOLU_START);
                packet.push(id & 0x7F);
                packet.push(command as u8 & 0x7F);
            }
            None => packet.push(command as u8),
        }
        packet.extend_from_slice(params);
        packet
    }

    fn send(&mut self, command: Command, params: &[u8]) -> Result<()> {
        let packet = Self::build_packet(self.device, command, params);
        self.port.write_all(&packet)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.port.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn check_pin(&self, pin: u8) -> Result<()> {
        if pin >= self.channels {
            return Err(HardwareError::InvalidPin {
                pin,
                channels: self.channels,
            });
        }
        Ok(())
    }

    /// Set the raw target in quarter-microseconds (0 stops pulses)
    pub fn set_target(&mut self, pin: u8, quarter_us: u16) -> Result<()> {
        self.check_pin(pin)?;
        debug!("Set target on channel {}: {} qus", pin, quarter_us);
        self.send(Command::SetTarget, &[pin, lo7(quarter_us), hi7(quarter_us)])
    }

    /// Read (and clear) the controller error register
    pub fn get_errors(&mut self) -> Result<u16> {
        self.send(Command::GetErrors, &[])?;
        self.read_u16()
    }

    /// Verify the controller answers and reports no errors
    pub fn probe(&mut self) -> Result<()> {
        match self.get_errors()? {
            0 => Ok(()),
            code => Err(HardwareError::Device { code }),
        }
    }
}

impl ServoBus for MaestroBus {
    fn channel_count(&self) -> u8 {
        self.channels
    }

    fn attach(&mut self, pin: u8) -> Result<()> {
        self.check_pin(pin)?;
        // Pulses start with the first target; nothing goes on the wire yet
        self.attached[pin as usize] = true;
        Ok(())
    }

    fn detach(&mut self, pin: u8) -> Result<()> {
        self.check_pin(pin)?;
        self.set_target(pin, 0)?;
        self.attached[pin as usize] = false;
        Ok(())
    }

    fn set_angle(&mut self, pin: u8, degrees: f32) -> Result<()> {
        self.check_pin(pin)?;
        if !self.attached[pin as usize] {
            return Err(HardwareError::Detached { pin });
        }
        self.set_target(pin, angle_to_quarter_us(degrees))
    }
}

/// Servo angle to Maestro target units
fn angle_to_quarter_us(degrees: f32) -> u16 {
    (angle_to_pulse_us(degrees) * 4.0).round() as u16
}

fn lo7(value: u16) -> u8 {
    (value & 0x7F) as u8
}

fn hi7(value: u16) -> u8 {
    ((value >> 7) & 0x7F) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_compact_packet() {
        // Center (1500 us = 6000 qus) on channel 2
        let target = angle_to_quarter_us(90.0);
        assert_eq!(target, 6000);
        let packet =
            MaestroBus::build_packet(None, Command::SetTarget, &[2, lo7(target), hi7(target)]);
        assert_eq!(packet, vec![0x84, 0x02, 0x70, 0x2E]);
    }

    #[test]
    fn test_build_pololu_packet() {
        let packet = MaestroBus::build_packet(Some(12), Command::GetErrors, &[]);
        // Start byte + device + command with MSB cleared
        assert_eq!(packet, vec![0xAA, 12, 0x21]);
    }

    #[test]
    fn test_seven_bit_split() {
        let value: u16 = 0x3FFF;
        assert_eq!(lo7(value), 0x7F);
        assert_eq!(hi7(value), 0x7F);
        assert_eq!((hi7(6000) as u16) << 7 | lo7(6000) as u16, 6000);
    }

    #[test]
    fn test_angle_to_quarter_us_range() {
        assert_eq!(angle_to_quarter_us(0.0), 2000);
        assert_eq!(angle_to_quarter_us(180.0), 10000);
        // Out-of-range angles never produce a stop (0) target
        assert_eq!(angle_to_quarter_us(-45.0), 2000);
    }
}
