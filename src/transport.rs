//! Framed serial transport.
//!
//! Raw communication channel between driver and server. A frame is a sync
//! preamble (a run of `Z` closed by one `X`), a 16-bit big-endian payload
//! length, and the payload; there is no checksum. The driver returns a
//! desynchronized peer to preamble scan by flooding sync bytes, see
//! [`Transport::resync`].

use std::io;
use std::io::Read;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use log::trace;
use log::warn;

use crate::ll::proto::PAYLOAD_MAX;

/// Sync filler byte opening every frame.
pub(crate) const SYNC_BYTE: u8 = b'Z';
/// Closes the sync run and announces the length field.
pub(crate) const SYNC_END: u8 = b'X';

/// Bytes flooded during recovery. Longer than any legal frame, so whatever
/// partial read the peer is in the middle of, the flood exhausts it and the
/// peer ends up scanning for a preamble again.
pub(crate) const SYNC_FLOOD: usize = PAYLOAD_MAX + 7;

const DRAIN_TIMEOUT: Duration = Duration::from_millis(5);

/// A byte stream a [`Transport`] can run over: the serial device in
/// production, a socket pair in tests.
pub trait SerialLine: Read + Write {
    /// Arms or clears the receive timeout. `None` blocks indefinitely.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

impl SerialLine for UnixStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        UnixStream::set_read_timeout(self, timeout)
    }
}

/// Framed transport over a serial line.
#[derive(Debug)]
pub struct Transport<S: SerialLine> {
    stream: S,
    timeout: Option<Duration>,
    recovering: bool,
}

impl<S: SerialLine> Transport<S> {
    /// A transport whose reads block until the peer speaks (server side).
    pub fn new(stream: S) -> Transport<S> {
        Transport {
            stream,
            timeout: None,
            recovering: false,
        }
    }

    /// A transport whose reads give up after `timeout` (driver side).
    pub fn with_timeout(mut stream: S, timeout: Duration) -> io::Result<Transport<S>> {
        stream.set_read_timeout(Some(timeout))?;
        Ok(Transport {
            stream,
            timeout: Some(timeout),
            recovering: false,
        })
    }

    /// Flags that the peer may be desynchronized; the next [`send`] will
    /// resync first.
    ///
    /// [`send`]: Transport::send
    pub(crate) fn mark_recovery(&mut self) {
        self.recovering = true;
    }

    #[cfg(test)]
    pub(crate) fn needs_recovery(&self) -> bool {
        self.recovering
    }

    /// Sends one frame. A pending recovery is performed first and clears
    /// once the frame is out.
    pub fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        debug_assert!(payload.len() <= PAYLOAD_MAX);
        if self.recovering {
            self.resync()?;
            self.recovering = false;
        }
        let mut header = [SYNC_BYTE, SYNC_BYTE, SYNC_BYTE, SYNC_END, 0, 0];
        header[4..].copy_from_slice(&(payload.len() as u16).to_be_bytes());
        self.stream.write_all(&header)?;
        self.stream.write_all(payload)?;
        self.stream.flush()?;
        trace!("sent frame, {} payload bytes", payload.len());
        Ok(())
    }

    /// Receives one frame into `buf`, returning the payload length.
    ///
    /// Bytes before the first `Z` are skipped. A sync run closed by
    /// anything other than `X`, or a length exceeding `buf`, yields
    /// `InvalidData` and leaves the stream positioned for a fresh scan.
    pub fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut b = self.read_byte()?;
            if b != SYNC_BYTE {
                continue;
            }
            while b == SYNC_BYTE {
                b = self.read_byte()?;
            }
            if b == SYNC_END {
                break;
            }
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("sync run closed by {b:#04x}, not {SYNC_END:#04x}"),
            ));
        }
        let len = usize::from(u16::from_be_bytes([self.read_byte()?, self.read_byte()?]));
        if len > buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {len} bytes exceeds the {} byte buffer", buf.len()),
            ));
        }
        self.read_full(&mut buf[..len])?;
        trace!("received frame, {len} payload bytes");
        Ok(len)
    }

    /// Floods sync bytes until the peer must be back in preamble scan,
    /// draining whatever it was still sending in between.
    pub(crate) fn resync(&mut self) -> io::Result<()> {
        warn!("resynchronizing peer with {SYNC_FLOOD} sync bytes");
        let chunk = [SYNC_BYTE; 256];
        let mut sent = 0;
        while sent < SYNC_FLOOD {
            let n = chunk.len().min(SYNC_FLOOD - sent);
            self.stream.write_all(&chunk[..n])?;
            self.stream.flush()?;
            sent += n;
            self.drain()?;
        }
        self.drain()
    }

    fn drain(&mut self) -> io::Result<()> {
        self.stream.set_read_timeout(Some(DRAIN_TIMEOUT))?;
        let mut sink = [0u8; 256];
        loop {
            match self.stream.read(&mut sink) {
                Ok(0) => break,
                Ok(n) => trace!("drained {n} stale bytes"),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if timed_out(&e) => break,
                Err(e) => {
                    self.stream.set_read_timeout(self.timeout)?;
                    return Err(e);
                }
            }
        }
        self.stream.set_read_timeout(self.timeout)
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        let mut byte = [0u8; 1];
        loop {
            match self.stream.read(&mut byte) {
                Ok(0) => return Err(self.eof_error()),
                Ok(_) => return Ok(byte[0]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if timed_out(&e) => return Err(io::ErrorKind::TimedOut.into()),
                Err(e) => return Err(e),
            }
        }
    }

    fn read_full(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut done = 0;
        while done < buf.len() {
            match self.stream.read(&mut buf[done..]) {
                Ok(0) => return Err(self.eof_error()),
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if timed_out(&e) => return Err(io::ErrorKind::TimedOut.into()),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    // A zero-length read is how a timed-out terminal read reports itself;
    // without an armed timeout it means the peer is gone.
    fn eof_error(&self) -> io::Error {
        if self.timeout.is_some() {
            io::ErrorKind::TimedOut.into()
        } else {
            io::ErrorKind::UnexpectedEof.into()
        }
    }
}

fn timed_out(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}
