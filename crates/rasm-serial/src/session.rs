//! Line-oriented request/response session over a serial port.

use crate::port::{SerialError, TtyPort};
use std::borrow::Cow;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

/// Default device node of the controller board.
pub const DEFAULT_DEVICE: &str = "/dev/ttyACM0";
pub const DEFAULT_BAUD: u32 = 9600;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// Opening the port toggles DTR, which resets most boards. Give them time to boot.
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(2);

/// Connection parameters for a [`SerialSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub device: String,
    pub baud: u32,
    /// Upper bound on a whole [`SerialSession::read_reply`] call.
    pub timeout: Duration,
    pub settle: Duration,
    /// Byte that terminates a reply.
    pub delimiter: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            baud: DEFAULT_BAUD,
            timeout: DEFAULT_TIMEOUT,
            settle: DEFAULT_SETTLE,
            delimiter: b'\n',
        }
    }
}

/// One response read from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Raw bytes, including the delimiter when one arrived.
    pub bytes: Vec<u8>,
    /// True when the deadline passed before the delimiter was seen.
    pub timed_out: bool,
}

impl Reply {
    /// Decode as text, replacing invalid UTF-8 sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    pub fn is_utf8(&self) -> bool {
        std::str::from_utf8(&self.bytes).is_ok()
    }

    /// Text with one trailing line terminator removed.
    pub fn line(&self) -> Cow<'_, str> {
        match self.text() {
            Cow::Borrowed(s) => Cow::Borrowed(strip_terminator(s)),
            Cow::Owned(s) => Cow::Owned(strip_terminator(&s).to_string()),
        }
    }
}

/// An open serial connection with a single owner.
///
/// Generic over the port so the protocol can run against in-memory fakes.
/// A port's `read` may return `Ok(0)` to signal "nothing yet"; the session
/// keeps reading until the delimiter or the deadline.
pub struct SerialSession<P = TtyPort> {
    port: P,
    timeout: Duration,
    delimiter: u8,
    /// Bytes received after the last delimiter, kept for the next reply.
    pending: Vec<u8>,
}

impl SerialSession<TtyPort> {
    /// Open the configured device and wait out the board's reset.
    pub fn open(config: &SessionConfig) -> Result<Self, SerialError> {
        let port = TtyPort::open(&config.device, config.baud)?;
        if !config.settle.is_zero() {
            tracing::debug!(settle_ms = config.settle.as_millis() as u64, "waiting for board reset");
            std::thread::sleep(config.settle);
        }
        Ok(Self::with_port(port, config))
    }
}

impl<P: Read + Write> SerialSession<P> {
    /// Wrap an already-open port.
    pub fn with_port(port: P, config: &SessionConfig) -> Self {
        Self {
            port,
            timeout: config.timeout,
            delimiter: config.delimiter,
            pending: Vec::new(),
        }
    }

    /// Write `payload` verbatim and block until it has been transmitted.
    pub fn send(&mut self, payload: &[u8]) -> Result<(), SerialError> {
        self.port.write_all(payload)?;
        self.port.flush()?;
        tracing::trace!(bytes = payload.len(), "sent");
        Ok(())
    }

    /// Send a terminal line without its terminator; nothing else is added.
    pub fn send_line(&mut self, line: &str) -> Result<(), SerialError> {
        self.send(strip_terminator(line).as_bytes())
    }

    /// Read until the delimiter or until the timeout elapses.
    ///
    /// A timeout is not an error: the reply carries whatever arrived.
    pub fn read_reply(&mut self) -> Result<Reply, SerialError> {
        let deadline = Instant::now() + self.timeout;
        let mut bytes = Vec::new();
        let mut chunk = [0u8; 64];

        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == self.delimiter) {
                bytes.extend(self.pending.drain(..=pos));
                return Ok(Reply {
                    bytes,
                    timed_out: false,
                });
            }
            bytes.append(&mut self.pending);

            if Instant::now() >= deadline {
                tracing::debug!(received = bytes.len(), "reply timed out");
                return Ok(Reply {
                    bytes,
                    timed_out: true,
                });
            }

            match self.port.read(&mut chunk) {
                Ok(0) => std::thread::yield_now(),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if is_idle(&e) => continue,
                Err(e) => return Err(SerialError::Io(e)),
            }
        }
    }

    /// Send one line and wait for one reply.
    pub fn exchange(&mut self, line: &str) -> Result<Reply, SerialError> {
        self.send_line(line)?;
        self.read_reply()
    }

    pub fn port(&self) -> &P {
        &self.port
    }
}

fn is_idle(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Remove one trailing `\n` or `\r\n`.
pub fn strip_terminator(line: &str) -> &str {
    line.strip_suffix('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .unwrap_or(line)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// In-memory port: records writes, serves scripted read chunks, then idles.
    #[derive(Default)]
    pub(crate) struct FakePort {
        pub written: Vec<u8>,
        pub flushes: usize,
        pub incoming: VecDeque<Vec<u8>>,
        /// Reply queued after every flush, emulating an echoing board.
        pub echo_suffix: Option<Vec<u8>>,
        unflushed: Vec<u8>,
    }

    impl FakePort {
        pub(crate) fn scripted(chunks: &[&[u8]]) -> Self {
            Self {
                incoming: chunks.iter().map(|c| c.to_vec()).collect(),
                ..Default::default()
            }
        }

        pub(crate) fn echoing(suffix: &[u8]) -> Self {
            Self {
                echo_suffix: Some(suffix.to_vec()),
                ..Default::default()
            }
        }
    }

    impl Read for FakePort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some(mut chunk) = self.incoming.pop_front() else {
                return Ok(0);
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                self.incoming.push_front(chunk.split_off(n));
            }
            Ok(n)
        }
    }

    impl Write for FakePort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            self.unflushed.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            if let Some(suffix) = &self.echo_suffix {
                let mut reply = std::mem::take(&mut self.unflushed);
                reply.extend_from_slice(suffix);
                self.incoming.push_back(reply);
            }
            Ok(())
        }
    }

    pub(crate) fn quick_config() -> SessionConfig {
        SessionConfig {
            timeout: Duration::from_millis(50),
            settle: Duration::ZERO,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_default_config_matches_board() {
        let config = SessionConfig::default();
        assert_eq!(config.device, "/dev/ttyACM0");
        assert_eq!(config.baud, 9600);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.delimiter, b'\n');
    }

    #[test]
    fn test_send_line_is_plain_utf8() {
        let mut session = SerialSession::with_port(FakePort::default(), &quick_config());
        session.send_line("^+030 héllo\n").unwrap();
        assert_eq!(session.port().written, "^+030 héllo".as_bytes());
        assert_eq!(session.port().flushes, 1);
    }

    #[test]
    fn test_send_line_without_terminator_is_unchanged() {
        let mut session = SerialSession::with_port(FakePort::default(), &quick_config());
        session.send_line("ping").unwrap();
        assert_eq!(session.port().written, b"ping");
    }

    #[test]
    fn test_send_line_empty() {
        let mut session = SerialSession::with_port(FakePort::default(), &quick_config());
        session.send_line("").unwrap();
        assert!(session.port().written.is_empty());
    }

    #[test]
    fn test_read_reply_until_delimiter() {
        let port = FakePort::scripted(&[b"O", b"K\r", b"\n"]);
        let mut session = SerialSession::with_port(port, &quick_config());
        let reply = session.read_reply().unwrap();
        assert!(!reply.timed_out);
        assert_eq!(reply.bytes, b"OK\r\n");
        assert_eq!(reply.line(), "OK");
    }

    #[test]
    fn test_read_reply_keeps_bytes_after_delimiter() {
        let port = FakePort::scripted(&[b"one\ntwo\n"]);
        let mut session = SerialSession::with_port(port, &quick_config());
        assert_eq!(session.read_reply().unwrap().line(), "one");
        assert_eq!(session.read_reply().unwrap().line(), "two");
    }

    #[test]
    fn test_read_reply_timeout_returns_partial() {
        let port = FakePort::scripted(&[b"part"]);
        let mut session = SerialSession::with_port(port, &quick_config());
        let reply = session.read_reply().unwrap();
        assert!(reply.timed_out);
        assert_eq!(reply.bytes, b"part");
    }

    #[test]
    fn test_read_reply_respects_timeout_bound() {
        let mut session = SerialSession::with_port(FakePort::default(), &quick_config());
        let start = Instant::now();
        let reply = session.read_reply().unwrap();
        let elapsed = start.elapsed();
        assert!(reply.timed_out);
        assert!(reply.bytes.is_empty());
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_secs(2), "read blocked for {elapsed:?}");
    }

    #[test]
    fn test_exchange_round_trip() {
        let mut session = SerialSession::with_port(FakePort::echoing(b"\n"), &quick_config());
        let reply = session.exchange("status").unwrap();
        assert_eq!(reply.line(), "status");
        assert_eq!(session.port().written, b"status");
    }

    #[test]
    fn test_reply_invalid_utf8_is_lossy() {
        let reply = Reply {
            bytes: vec![b'a', 0xff, b'\n'],
            timed_out: false,
        };
        assert!(!reply.is_utf8());
        assert_eq!(reply.line(), "a\u{fffd}");
    }

    #[test]
    fn test_strip_terminator() {
        assert_eq!(strip_terminator("abc\r\n"), "abc");
        assert_eq!(strip_terminator("abc\n"), "abc");
        assert_eq!(strip_terminator("abc"), "abc");
        assert_eq!(strip_terminator("abc\n\n"), "abc\n");
    }
}
