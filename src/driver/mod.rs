//! Guest-side driver core.
//!
//! The guest OS invokes the driver synchronously for every filesystem call
//! on the remote drive. Each entry point packages its request, runs one
//! wire round-trip, and splices the response back into the guest's state.
//! Three things never behave naively: seeks are resolved locally against
//! the FCB-known file size, small writes coalesce in a local cache, and
//! directory enumerations are fetched in batches.
//!
//! A response that never arrives surfaces as [`DriverError::Timeout`] and
//! flags transport recovery; the next request is preceded by a sync flood
//! that returns the server to preamble scan.

mod cache;

use std::collections::HashMap;
use std::collections::VecDeque;
use std::error;
use std::fmt;
use std::io;
use std::time::Duration;

use log::debug;
use log::info;
use log::warn;
use zerocopy::IntoBytes;
use zerocopy::byteorder::big_endian::U16;
use zerocopy::byteorder::big_endian::U32;

use crate::dos::DosDate;
use crate::dos::DosError;
use crate::dos::DosTime;
use crate::ll::argument::ArgumentIterator;
use crate::ll::proto::CloseRequest;
use crate::ll::proto::CommandCode;
use crate::ll::proto::CreateRequest;
use crate::ll::proto::DATA_MAX;
use crate::ll::proto::DskfreResponse;
use crate::ll::proto::FiledateRequest;
use crate::ll::proto::FiledateResponse;
use crate::ll::proto::FilesInfo;
use crate::ll::proto::FilesRequest;
use crate::ll::proto::FilesResponseHeader;
use crate::ll::proto::NameBuf;
use crate::ll::proto::NfilesRequest;
use crate::ll::proto::OpenRequest;
use crate::ll::proto::OpenResponse;
use crate::ll::proto::PAYLOAD_MAX;
use crate::ll::proto::PathRequest;
use crate::ll::proto::ReadRequest;
use crate::ll::proto::ReadResponseHeader;
use crate::ll::proto::RenameRequest;
use crate::ll::proto::ResResponse;
use crate::ll::proto::WriteRequest;
use crate::ll::proto::WriteResponse;
use crate::ll::proto::ChmodRequest;
use crate::ll::reply::FILEDATE_ERROR;
use crate::transport::SerialLine;
use crate::transport::Transport;
use cache::ReadBlock;
use cache::WriteCache;

/// Error code placed in the guest request header when the server stops
/// answering (or answers garbage).
pub const GUEST_TIMEOUT_CODE: u16 = 0x1002;

/// Directory entries requested per `files`/`nfiles` round-trip.
const FILES_BATCH: u8 = 8;

/// Write buffers the driver keeps before forcing a flush.
const WRITE_BUFFERS: usize = 2;

/// Failure of one driver operation.
#[derive(Debug)]
pub enum DriverError {
    /// The server answered with a DOS error for the guest.
    Dos(DosError),
    /// No (complete) response arrived within the configured timeout.
    Timeout,
    /// A response frame or payload was malformed.
    Protocol,
    /// The serial line itself failed.
    Io(io::Error),
}

impl DriverError {
    /// The code stored in the guest request header's error field.
    ///
    /// DOS errors sign-extend their wire byte; everything else reports the
    /// line as stuck via [`GUEST_TIMEOUT_CODE`].
    pub fn guest_code(&self) -> u16 {
        match self {
            DriverError::Dos(e) => i16::from(e.code()) as u16,
            _ => GUEST_TIMEOUT_CODE,
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::Dos(e) => write!(f, "server reported {e}"),
            DriverError::Timeout => write!(f, "no response from server"),
            DriverError::Protocol => write!(f, "malformed response from server"),
            DriverError::Io(e) => write!(f, "serial line error: {e}"),
        }
    }
}

impl error::Error for DriverError {}

impl From<DosError> for DriverError {
    fn from(e: DosError) -> DriverError {
        DriverError::Dos(e)
    }
}

/// Driver configuration handed over from the guest's install line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Serial line speed.
    pub baud: u32,
    /// `0` registers the drive unconditionally; `1` registers only after a
    /// successful server probe.
    pub register_mode: u8,
    /// How long to wait for a response before giving up.
    pub timeout: Duration,
    /// Drive units to register, 1..=7.
    pub units: u8,
}

impl Default for DriverConfig {
    fn default() -> DriverConfig {
        DriverConfig {
            baud: 38400,
            register_mode: 0,
            timeout: Duration::from_secs(5),
            units: 1,
        }
    }
}

/// A rejected install option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidOption(String);

impl fmt::Display for InvalidOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid driver option: {}", self.0)
    }
}

impl error::Error for InvalidOption {}

impl DriverConfig {
    /// Parses guest install options: `/s<baud>`, `/r<mode>`, `/t<timeout
    /// in 100 ms units>`, `/u<units>`. Unrecognized or out-of-range
    /// options are rejected.
    pub fn parse<'a, I>(args: I) -> Result<DriverConfig, InvalidOption>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut config = DriverConfig::default();
        for arg in args {
            let reject = || InvalidOption(arg.to_string());
            let mut chars = arg.chars();
            if chars.next() != Some('/') {
                return Err(reject());
            }
            let letter = chars.next().ok_or_else(reject)?;
            let value: u32 = chars.as_str().parse().map_err(|_| reject())?;
            match letter.to_ascii_lowercase() {
                's' => config.baud = value,
                'r' if value <= 1 => config.register_mode = value as u8,
                't' if value > 0 => config.timeout = Duration::from_millis(u64::from(value) * 100),
                'u' if (1..=7).contains(&value) => config.units = value as u8,
                _ => return Err(reject()),
            }
        }
        Ok(config)
    }
}

/// The slice of the guest's file control block the driver maintains.
///
/// The guest owns the real 68-byte block; its address doubles as the
/// per-open-file key on both ends of the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fcb {
    /// Guest address of the block, used as an opaque key.
    pub key: u32,
    /// Open mode byte: 0 read, 1 write, 2 read/write.
    pub mode: u8,
    /// Current file position.
    pub pos: u32,
    /// File size as known to the guest, including unflushed writes.
    pub size: u32,
}

impl Fcb {
    /// A fresh block for `create`/`open`.
    pub fn new(key: u32, mode: u8) -> Fcb {
        Fcb {
            key,
            mode,
            pos: 0,
            size: 0,
        }
    }

    fn advance(&mut self, n: usize) {
        self.pos += n as u32;
        self.size = self.size.max(self.pos);
    }
}

/// Driver endpoint: one instance per served drive.
#[derive(Debug)]
pub struct Driver<S: SerialLine> {
    transport: Transport<S>,
    config: DriverConfig,
    wcache: WriteCache,
    rblock: Option<ReadBlock>,
    batches: HashMap<u32, VecDeque<FilesInfo>>,
    rbuf: Vec<u8>,
}

impl<S: SerialLine> Driver<S> {
    /// Creates a driver over `stream` with the given configuration.
    pub fn new(stream: S, config: DriverConfig) -> io::Result<Driver<S>> {
        let transport = Transport::with_timeout(stream, config.timeout)?;
        Ok(Driver {
            transport,
            config,
            wcache: WriteCache::new(WRITE_BUFFERS),
            rblock: None,
            batches: HashMap::new(),
            rbuf: vec![0; PAYLOAD_MAX],
        })
    }

    /// Announces the driver and, in registration mode 1, probes the server
    /// before the drive may be declared available.
    pub fn init(&mut self) -> Result<(), DriverError> {
        info!(
            "remote drive driver: {} baud, {} unit(s), timeout {:?}",
            self.config.baud, self.config.units, self.config.timeout
        );
        if self.config.register_mode == 1 {
            self.check()?;
            info!("server probe answered, registering drive");
        }
        Ok(())
    }

    /// Probes the server.
    pub fn check(&mut self) -> Result<(), DriverError> {
        let payload = [u8::from(CommandCode::Check)];
        let n = self.roundtrip(&payload)?;
        self.expect_res(n)
    }

    /// Verifies a directory exists on the served drive.
    pub fn chdir(&mut self, path: &NameBuf) -> Result<(), DriverError> {
        self.path_op(CommandCode::Chdir, path)
    }

    /// Creates a directory.
    pub fn mkdir(&mut self, path: &NameBuf) -> Result<(), DriverError> {
        self.path_op(CommandCode::Mkdir, path)
    }

    /// Removes an empty directory.
    pub fn rmdir(&mut self, path: &NameBuf) -> Result<(), DriverError> {
        self.path_op(CommandCode::Rmdir, path)
    }

    /// Deletes a file.
    pub fn delete(&mut self, path: &NameBuf) -> Result<(), DriverError> {
        self.path_op(CommandCode::Delete, path)
    }

    /// Renames or moves a file or directory.
    pub fn rename(&mut self, from: &NameBuf, to: &NameBuf) -> Result<(), DriverError> {
        let req = RenameRequest {
            cmd: CommandCode::Rename.into(),
            path_old: *from,
            path_new: *to,
        };
        let n = self.roundtrip(req.as_bytes())?;
        self.expect_res(n)
    }

    /// Reads (`attr == 0xFF`) or sets the attribute byte. Returns the
    /// attribute byte the server reported.
    pub fn chmod(&mut self, attr: u8, path: &NameBuf) -> Result<u8, DriverError> {
        let req = ChmodRequest {
            cmd: CommandCode::Chmod.into(),
            attr,
            path: *path,
        };
        let n = self.roundtrip(req.as_bytes())?;
        let resp: &ResResponse = ArgumentIterator::new(&self.rbuf[..n])
            .fetch()
            .ok_or(DriverError::Protocol)?;
        Ok(dos_result(resp.res)? as u8)
    }

    /// Begins a directory enumeration under the `filep` key and returns
    /// its first entry.
    pub fn files(&mut self, filep: u32, attr: u8, path: &NameBuf) -> Result<FilesInfo, DriverError> {
        self.batches.remove(&filep);
        let req = FilesRequest {
            cmd: CommandCode::Files.into(),
            attr,
            num: FILES_BATCH,
            filep: U32::new(filep),
            path: *path,
        };
        let n = self.roundtrip(req.as_bytes())?;
        self.take_batch(filep, n)
    }

    /// Returns the next enumeration entry, served from the local batch
    /// while one is pending.
    pub fn nfiles(&mut self, filep: u32) -> Result<FilesInfo, DriverError> {
        if let Some(queue) = self.batches.get_mut(&filep) {
            if let Some(info) = queue.pop_front() {
                if queue.is_empty() {
                    self.batches.remove(&filep);
                }
                return Ok(info);
            }
        }
        let req = NfilesRequest {
            cmd: CommandCode::Nfiles.into(),
            num: FILES_BATCH,
            filep: U32::new(filep),
        };
        let n = self.roundtrip(req.as_bytes())?;
        self.take_batch(filep, n)
    }

    /// Creates a file and installs the FCB on the server.
    pub fn create(&mut self, fcb: &mut Fcb, attr: u8, path: &NameBuf) -> Result<(), DriverError> {
        self.forget_file(fcb.key);
        let req = CreateRequest {
            cmd: CommandCode::Create.into(),
            attr,
            mode: fcb.mode,
            fcb: U32::new(fcb.key),
            path: *path,
        };
        let n = self.roundtrip(req.as_bytes())?;
        self.expect_res(n)?;
        fcb.pos = 0;
        fcb.size = 0;
        Ok(())
    }

    /// Opens a file and installs the FCB on the server; the FCB learns the
    /// file size from the response.
    pub fn open(&mut self, fcb: &mut Fcb, path: &NameBuf) -> Result<(), DriverError> {
        self.forget_file(fcb.key);
        let req = OpenRequest {
            cmd: CommandCode::Open.into(),
            mode: fcb.mode,
            fcb: U32::new(fcb.key),
            path: *path,
        };
        let n = self.roundtrip(req.as_bytes())?;
        let resp: &OpenResponse = ArgumentIterator::new(&self.rbuf[..n])
            .fetch()
            .ok_or(DriverError::Protocol)?;
        dos_result(resp.res)?;
        fcb.pos = 0;
        fcb.size = resp.size.get();
        Ok(())
    }

    /// Flushes pending writes and closes the file on the server.
    pub fn close(&mut self, fcb: &mut Fcb) -> Result<(), DriverError> {
        let flushed = self.flush(fcb.key);
        self.invalidate_read(fcb.key);
        let req = CloseRequest {
            cmd: CommandCode::Close.into(),
            fcb: U32::new(fcb.key),
        };
        let n = self.roundtrip(req.as_bytes())?;
        self.expect_res(n)?;
        flushed
    }

    /// Reads from the FCB position into `buf`. A short count means end of
    /// file. Sub-block reads are served from the read-ahead block.
    pub fn read(&mut self, fcb: &mut Fcb, buf: &mut [u8]) -> Result<usize, DriverError> {
        self.flush(fcb.key)?;
        let mut done = 0;
        while done < buf.len() {
            if let Some(chunk) = self.rblock.as_ref().and_then(|b| b.slice_from(fcb.key, fcb.pos)) {
                let n = chunk.len().min(buf.len() - done);
                buf[done..done + n].copy_from_slice(&chunk[..n]);
                fcb.pos += n as u32;
                done += n;
                continue;
            }
            if self.read_ahead(fcb.key, fcb.pos)? == 0 {
                break;
            }
        }
        Ok(done)
    }

    /// Writes `data` at the FCB position. Small writes coalesce locally;
    /// an empty `data` truncates the file at the current position.
    pub fn write(&mut self, fcb: &mut Fcb, data: &[u8]) -> Result<usize, DriverError> {
        self.invalidate_read(fcb.key);
        if data.is_empty() {
            self.flush(fcb.key)?;
            self.write_direct(fcb.key, fcb.pos, &[])?;
            fcb.size = fcb.pos;
            return Ok(0);
        }
        if self.wcache.absorb(fcb.key, fcb.pos, data) {
            fcb.advance(data.len());
            return Ok(data.len());
        }
        self.flush(fcb.key)?;
        if data.len() < DATA_MAX {
            if !self.wcache.absorb(fcb.key, fcb.pos, data) {
                // every buffer busy with another file; push out the oldest
                if let Some(old) = self.wcache.take_oldest() {
                    self.write_direct(old.fcb, old.base, old.bytes())?;
                }
                let absorbed = self.wcache.absorb(fcb.key, fcb.pos, data);
                debug_assert!(absorbed);
            }
            fcb.advance(data.len());
            return Ok(data.len());
        }
        let mut done = 0;
        while done < data.len() {
            let chunk = &data[done..(done + DATA_MAX).min(data.len())];
            let written = usize::from(self.write_direct(fcb.key, fcb.pos, chunk)?);
            fcb.advance(written);
            done += written;
            if written < chunk.len() {
                break;
            }
        }
        Ok(done)
    }

    /// Resolves a seek locally against the FCB-known size; never a wire
    /// exchange. Pending writes are flushed so the size is settled.
    pub fn seek(&mut self, fcb: &mut Fcb, whence: u8, offset: i32) -> Result<u32, DriverError> {
        let base = match whence {
            0 => 0,
            1 => i64::from(fcb.pos),
            2 => i64::from(fcb.size),
            _ => return Err(DosError::ILGPARM.into()),
        };
        let target = base + i64::from(offset);
        if target < 0 || target > i64::from(fcb.size) {
            return Err(DosError::CANTSEEK.into());
        }
        self.flush(fcb.key)?;
        fcb.pos = target as u32;
        Ok(fcb.pos)
    }

    /// Reads the file timestamp (both arguments zero) or sets it.
    pub fn filedate(
        &mut self,
        fcb: &Fcb,
        time: DosTime,
        date: DosDate,
    ) -> Result<(DosTime, DosDate), DriverError> {
        let req = FiledateRequest {
            cmd: CommandCode::Filedate.into(),
            fcb: U32::new(fcb.key),
            time: U16::new(time.0),
            date: U16::new(date.0),
        };
        let n = self.roundtrip(req.as_bytes())?;
        let resp: &FiledateResponse = ArgumentIterator::new(&self.rbuf[..n])
            .fetch()
            .ok_or(DriverError::Protocol)?;
        if resp.time.get() == FILEDATE_ERROR && resp.date.get() == FILEDATE_ERROR {
            return Err(DosError::BADF.into());
        }
        Ok((DosTime(resp.time.get()), DosDate(resp.date.get())))
    }

    /// Queries free space on the served drive.
    pub fn dskfre(&mut self) -> Result<DiskFree, DriverError> {
        let payload = [u8::from(CommandCode::Dskfre)];
        let n = self.roundtrip(&payload)?;
        let resp: &DskfreResponse = ArgumentIterator::new(&self.rbuf[..n])
            .fetch()
            .ok_or(DriverError::Protocol)?;
        let free = resp.res.get();
        if free < 0 {
            let code = i8::try_from(free).unwrap_or(DosError::ILGPARM.code());
            return Err(DriverError::Dos(
                DosError::try_from(code).unwrap_or(DosError::ILGPARM),
            ));
        }
        Ok(DiskFree {
            free_bytes: free,
            free_clusters: resp.freeclu.get(),
            total_clusters: resp.totalclu.get(),
            sectors_per_cluster: resp.clusect.get(),
            sector_size: resp.sectsize.get(),
        })
    }

    /// Guest entry points `0x51..0x58` (drvctrl, getdbp and friends) are
    /// answered locally; the server is never consulted.
    pub fn local_control(&self) -> i8 {
        0
    }

    fn path_op(&mut self, code: CommandCode, path: &NameBuf) -> Result<(), DriverError> {
        let req = PathRequest {
            cmd: code.into(),
            path: *path,
        };
        let n = self.roundtrip(req.as_bytes())?;
        self.expect_res(n)
    }

    fn roundtrip(&mut self, payload: &[u8]) -> Result<usize, DriverError> {
        self.transport.send(payload).map_err(DriverError::Io)?;
        match self.transport.recv(&mut self.rbuf) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.transport.mark_recovery();
                warn!("request {:#04x} failed: {e}", payload[0]);
                Err(match e.kind() {
                    io::ErrorKind::TimedOut => DriverError::Timeout,
                    io::ErrorKind::InvalidData => DriverError::Protocol,
                    _ => DriverError::Io(e),
                })
            }
        }
    }

    fn expect_res(&self, n: usize) -> Result<(), DriverError> {
        let resp: &ResResponse = ArgumentIterator::new(&self.rbuf[..n])
            .fetch()
            .ok_or(DriverError::Protocol)?;
        dos_result(resp.res)?;
        Ok(())
    }

    fn take_batch(&mut self, filep: u32, n: usize) -> Result<FilesInfo, DriverError> {
        let mut args = ArgumentIterator::new(&self.rbuf[..n]);
        let header: &FilesResponseHeader = args.fetch().ok_or(DriverError::Protocol)?;
        dos_result(header.res)?;
        let count = usize::from(header.num);
        let mut queue: VecDeque<FilesInfo> = args
            .fetch_slice::<FilesInfo>(count)
            .ok_or(DriverError::Protocol)?
            .to_vec()
            .into();
        let first = queue.pop_front().ok_or(DriverError::Protocol)?;
        debug!("enumeration {filep:#010x}: received {count} entries");
        if !queue.is_empty() {
            self.batches.insert(filep, queue);
        }
        Ok(first)
    }

    // One wire read of a full block, installed as the read-ahead block.
    fn read_ahead(&mut self, key: u32, pos: u32) -> Result<usize, DriverError> {
        let req = ReadRequest {
            cmd: CommandCode::Read.into(),
            fcb: U32::new(key),
            pos: U32::new(pos),
            len: U16::new(DATA_MAX as u16),
        };
        let n = self.roundtrip(req.as_bytes())?;
        let mut args = ArgumentIterator::new(&self.rbuf[..n]);
        let header: &ReadResponseHeader = args.fetch().ok_or(DriverError::Protocol)?;
        let len = usize::from(dos_result16(header.len.get())?);
        let data = args.fetch_all();
        if data.len() < len {
            return Err(DriverError::Protocol);
        }
        let block = ReadBlock {
            fcb: key,
            base: pos,
            data: data[..len].to_vec(),
        };
        self.rblock = Some(block);
        Ok(len)
    }

    fn write_direct(&mut self, key: u32, pos: u32, data: &[u8]) -> Result<u16, DriverError> {
        debug_assert!(data.len() <= DATA_MAX);
        let header = WriteRequest {
            cmd: CommandCode::Write.into(),
            fcb: U32::new(key),
            pos: U32::new(pos),
            len: U16::new(data.len() as u16),
        };
        let mut payload = Vec::with_capacity(size_of::<WriteRequest>() + data.len());
        payload.extend_from_slice(header.as_bytes());
        payload.extend_from_slice(data);
        let n = self.roundtrip(&payload)?;
        let resp: &WriteResponse = ArgumentIterator::new(&self.rbuf[..n])
            .fetch()
            .ok_or(DriverError::Protocol)?;
        dos_result16(resp.len.get())
    }

    /// Pushes any coalesced writes for `key` to the server.
    fn flush(&mut self, key: u32) -> Result<(), DriverError> {
        while let Some(entry) = self.wcache.take(key) {
            self.write_direct(entry.fcb, entry.base, entry.bytes())?;
        }
        Ok(())
    }

    fn invalidate_read(&mut self, key: u32) {
        if self.rblock.as_ref().is_some_and(|b| b.fcb == key) {
            self.rblock = None;
        }
    }

    // Drops cache state tied to a key being rebound to a new file.
    fn forget_file(&mut self, key: u32) {
        self.wcache.discard(key);
        self.invalidate_read(key);
    }
}

/// Free space as reported to the guest by [`Driver::dskfre`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskFree {
    /// Free bytes, saturated at `i32::MAX`.
    pub free_bytes: i32,
    /// Free 32 KiB clusters.
    pub free_clusters: u16,
    /// Total 32 KiB clusters, saturated independently of the free count.
    pub total_clusters: u16,
    /// Fixed cluster geometry: sectors per cluster.
    pub sectors_per_cluster: u16,
    /// Fixed cluster geometry: bytes per sector.
    pub sector_size: u16,
}

fn dos_result(res: i8) -> Result<i8, DriverError> {
    if res >= 0 {
        Ok(res)
    } else {
        Err(DriverError::Dos(
            DosError::try_from(res).unwrap_or(DosError::ILGPARM),
        ))
    }
}

fn dos_result16(len: i16) -> Result<u16, DriverError> {
    if len >= 0 {
        Ok(len as u16)
    } else {
        let code = i8::try_from(len).unwrap_or(DosError::ILGPARM.code());
        Err(DriverError::Dos(
            DosError::try_from(code).unwrap_or(DosError::ILGPARM),
        ))
    }
}
