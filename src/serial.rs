//! Serial device setup.
//!
//! Opens the device file and configures the line the way both endpoints
//! expect it: raw, 8 data bits, 1 stop bit, no parity, no software flow
//! control. Read timeouts map onto the termios inter-byte timer.

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use log::info;
use nix::sys::termios;
use nix::sys::termios::BaudRate;
use nix::sys::termios::ControlFlags;
use nix::sys::termios::FlushArg;
use nix::sys::termios::InputFlags;
use nix::sys::termios::SetArg;
use nix::sys::termios::SpecialCharacterIndices;
use nix::sys::termios::Termios;

use crate::transport::SerialLine;

/// A serial device configured for the remote-drive line discipline.
#[derive(Debug)]
pub struct SerialPort {
    file: File,
    termios: Termios,
}

impl SerialPort {
    /// Opens `path` and configures it: raw 8N1, no XON/XOFF, the given
    /// speed, blocking reads.
    pub fn open(path: &Path, baud: u32) -> io::Result<SerialPort> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut t = termios::tcgetattr(&file).map_err(to_io)?;
        termios::cfmakeraw(&mut t);
        t.control_flags &= !(ControlFlags::CSTOPB | ControlFlags::PARENB);
        t.control_flags |= ControlFlags::CS8 | ControlFlags::CREAD | ControlFlags::CLOCAL;
        t.input_flags &= !(InputFlags::IXON | InputFlags::IXOFF | InputFlags::IXANY);
        t.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        t.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        termios::cfsetspeed(&mut t, baud_rate(baud)?).map_err(to_io)?;
        termios::tcsetattr(&file, SetArg::TCSANOW, &t).map_err(to_io)?;
        termios::tcflush(&file, FlushArg::TCIOFLUSH).map_err(to_io)?;
        info!("serial line {} configured at {baud} baud", path.display());
        Ok(SerialPort { file, termios: t })
    }
}

fn baud_rate(baud: u32) -> io::Result<BaudRate> {
    Ok(match baud {
        2400 => BaudRate::B2400,
        4800 => BaudRate::B4800,
        9600 => BaudRate::B9600,
        19200 => BaudRate::B19200,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        115200 => BaudRate::B115200,
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported baud rate {baud}"),
            ));
        }
    })
}

fn to_io(errno: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(errno as i32)
}

impl Read for SerialPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for SerialPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl SerialLine for SerialPort {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        // VTIME counts tenths of a second and saturates at 25.5 s; a timed
        // read asks for "any data or timer expiry" (VMIN = 0)
        let (vmin, vtime) = match timeout {
            Some(t) => (0, (t.as_millis() / 100).clamp(1, 255) as u8),
            None => (1, 0),
        };
        self.termios.control_chars[SpecialCharacterIndices::VMIN as usize] = vmin;
        self.termios.control_chars[SpecialCharacterIndices::VTIME as usize] = vtime;
        termios::tcsetattr(&self.file, SetArg::TCSANOW, &self.termios).map_err(to_io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_baud_rates() {
        assert_eq!(baud_rate(38400).unwrap(), BaudRate::B38400);
        assert_eq!(baud_rate(115200).unwrap(), BaudRate::B115200);
        let err = baud_rate(12345).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
