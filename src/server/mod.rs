//! Host-side server: the request dispatch loop.
//!
//! One session serves one driver over one serial line, strictly in
//! lockstep: receive a request, execute it against the volume, send the
//! single response. Frame-level failures produce no response at all — the
//! partial frame is dropped and the scan restarts, leaving it to the
//! driver's timeout and sync flood to get the pair back in step.

mod ops;
mod tables;

use std::io;
use std::path::PathBuf;

use log::debug;
use log::info;
use log::warn;

use crate::dos::DosError;
use crate::ll::proto::PAYLOAD_MAX;
use crate::ll::reply::Response;
use crate::ll::request::Operation;
use crate::ll::request::RequestError;
use crate::transport::SerialLine;
use crate::transport::Transport;
use ops::Volume;

/// Server endpoint: serves one root directory over one line.
#[derive(Debug)]
pub struct Server<S: SerialLine> {
    transport: Transport<S>,
    volume: Volume,
}

impl<S: SerialLine> Server<S> {
    /// Creates a server executing requests against `root`.
    pub fn new(stream: S, root: PathBuf) -> Server<S> {
        Server {
            transport: Transport::new(stream),
            volume: Volume::new(root),
        }
    }

    /// Serves requests until the line reports end-of-file.
    pub fn serve(&mut self) -> io::Result<()> {
        let mut buf = vec![0u8; PAYLOAD_MAX];
        loop {
            let n = match self.transport.recv(&mut buf) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    warn!("dropping malformed frame: {e}");
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    info!("peer closed the line");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            let response = match Operation::parse(&buf[..n]) {
                Ok(op) => {
                    debug!("request {:#04x}, {n} payload bytes", buf[0]);
                    self.volume.execute(&op)
                }
                Err(e @ RequestError::UnknownCommand(_)) => {
                    warn!("{e}");
                    Response::new_res(Err(DosError::ILGPARM))
                }
                Err(e) => {
                    // an unparsable argument block has no response shape to
                    // answer in; let the driver time out and recover
                    warn!("dropping unparsable request: {e}");
                    continue;
                }
            };
            self.transport.send(response.bytes())?;
        }
    }
}
