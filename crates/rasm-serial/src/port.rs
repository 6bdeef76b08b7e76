//! Raw termios serial port via `nix`.
//!
//! The port is put into raw 8N1 mode with `VMIN = 0` and a short `VTIME`,
//! so a `read` returns `Ok(0)` after an idle tick instead of blocking
//! forever. Callers build their own deadline on top of that tick.

use nix::sys::termios::{
    self, BaudRate, ControlFlags, FlushArg, SetArg, SpecialCharacterIndices, Termios,
};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use thiserror::Error;

/// Idle tick for a blocked read, in deciseconds (termios `VTIME` units).
const READ_TICK_DECISECONDS: u8 = 1;

#[derive(Error, Debug)]
pub enum SerialError {
    #[error("serial device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied opening {0} (is the user in the dialout group?)")]
    PermissionDenied(String),
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("unsupported baud rate: {0}")]
    UnsupportedBaud(u32),
    #[error("termios {op} failed: {source}")]
    Termios {
        op: &'static str,
        #[source]
        source: nix::Error,
    },
    #[error("serial i/o: {0}")]
    Io(#[from] io::Error),
    #[error("serial worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// An open tty configured for raw serial traffic.
///
/// The attributes found at open time are restored on drop.
pub struct TtyPort {
    file: File,
    saved: Termios,
    path: String,
}

impl TtyPort {
    /// Open `path` (e.g., "/dev/ttyACM0") at the given baud rate.
    pub fn open(path: &str, baud: u32) -> Result<Self, SerialError> {
        if !Path::new(path).exists() {
            return Err(SerialError::DeviceNotFound(path.to_string()));
        }
        let rate = baud_rate(baud)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::PermissionDenied => SerialError::PermissionDenied(path.to_string()),
                io::ErrorKind::NotFound => SerialError::DeviceNotFound(path.to_string()),
                _ => SerialError::Open {
                    path: path.to_string(),
                    source: e,
                },
            })?;

        let saved = termios::tcgetattr(&file).map_err(|source| SerialError::Termios {
            op: "tcgetattr",
            source,
        })?;

        let mut raw = saved.clone();
        termios::cfmakeraw(&mut raw);
        termios::cfsetspeed(&mut raw, rate).map_err(|source| SerialError::Termios {
            op: "cfsetspeed",
            source,
        })?;
        raw.control_flags |= ControlFlags::CLOCAL | ControlFlags::CREAD;
        raw.control_flags &= !ControlFlags::CSTOPB;
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = READ_TICK_DECISECONDS;

        termios::tcsetattr(&file, SetArg::TCSANOW, &raw).map_err(|source| {
            SerialError::Termios {
                op: "tcsetattr",
                source,
            }
        })?;
        // Drop whatever the board printed before we were listening.
        termios::tcflush(&file, FlushArg::TCIOFLUSH).map_err(|source| SerialError::Termios {
            op: "tcflush",
            source,
        })?;

        tracing::info!(device = path, baud, "opened serial port");

        Ok(Self {
            file,
            saved,
            path: path.to_string(),
        })
    }
}

impl Read for TtyPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for TtyPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    /// Blocks until every queued byte has been transmitted.
    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        termios::tcdrain(&self.file).map_err(io::Error::from)
    }
}

impl Drop for TtyPort {
    fn drop(&mut self) {
        if let Err(e) = termios::tcsetattr(&self.file, SetArg::TCSADRAIN, &self.saved) {
            tracing::warn!(device = %self.path, error = %e, "failed to restore tty attributes");
        }
        tracing::info!(device = %self.path, "closed serial port");
    }
}

/// Map a numeric baud rate onto the termios constant.
pub fn baud_rate(baud: u32) -> Result<BaudRate, SerialError> {
    let rate = match baud {
        1200 => BaudRate::B1200,
        2400 => BaudRate::B2400,
        4800 => BaudRate::B4800,
        9600 => BaudRate::B9600,
        19200 => BaudRate::B19200,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        115200 => BaudRate::B115200,
        230400 => BaudRate::B230400,
        other => return Err(SerialError::UnsupportedBaud(other)),
    };
    Ok(rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baud_rate_known() {
        assert_eq!(baud_rate(9600).unwrap(), BaudRate::B9600);
        assert_eq!(baud_rate(115200).unwrap(), BaudRate::B115200);
    }

    #[test]
    fn test_baud_rate_unsupported() {
        let err = baud_rate(9601).unwrap_err();
        assert!(matches!(err, SerialError::UnsupportedBaud(9601)));
    }

    #[test]
    fn test_open_missing_device() {
        let result = TtyPort::open("/dev/rasm-does-not-exist", 9600);
        assert!(matches!(result, Err(SerialError::DeviceNotFound(_))));
    }
}
