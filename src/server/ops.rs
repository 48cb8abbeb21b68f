//! Command execution against the served root directory.
//!
//! A [`Volume`] owns the root path and the per-session tables. Every
//! operation decodes into host filesystem calls, captures the errno, and
//! encodes exactly one response; nothing here panics on a filesystem
//! error.

use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use log::debug;
use log::warn;
use nix::sys::stat::futimens;
use nix::sys::statvfs::statvfs;
use nix::sys::time::TimeSpec;

use super::tables::DirMatchTable;
use super::tables::OpenFileTable;
use crate::dos;
use crate::dos::Attributes;
use crate::dos::DosDate;
use crate::dos::DosError;
use crate::dos::DosTime;
use crate::encoding;
use crate::ll::proto::DATA_MAX;
use crate::ll::proto::FilesInfo;
use crate::ll::proto::NameBuf;
use crate::ll::reply::Response;
use crate::ll::request::Operation;
use crate::names;

/// Directory entries handed out per `files`/`nfiles` response, bounded so
/// the largest response still fits one frame.
const BATCH_MAX: usize = 32;

/// Cluster geometry reported by `dskfre`: 128 sectors of 1024 bytes.
const CLUSTER_SECTORS: u16 = 128;
const SECTOR_SIZE: u16 = 1024;

/// The served subtree plus all per-session state.
#[derive(Debug)]
pub(crate) struct Volume {
    root: PathBuf,
    files: OpenFileTable,
    matches: DirMatchTable,
}

impl Volume {
    pub(crate) fn new(root: PathBuf) -> Volume {
        Volume {
            root,
            files: OpenFileTable::default(),
            matches: DirMatchTable::default(),
        }
    }

    /// Executes one decoded request and produces its response.
    pub(crate) fn execute(&mut self, op: &Operation<'_>) -> Response {
        match *op {
            Operation::Check => Response::new_res(Ok(())),
            Operation::Chdir { path } => Response::new_res(self.chdir(path)),
            Operation::Mkdir { path } => Response::new_res(self.mkdir(path)),
            Operation::Rmdir { path } => Response::new_res(self.rmdir(path)),
            Operation::Rename { from, to } => Response::new_res(self.rename(from, to)),
            Operation::Delete { path } => Response::new_res(self.delete(path)),
            Operation::Chmod { attr, path } => Response::new_attr(match self.chmod(attr, path) {
                Ok(v) => v,
                Err(e) => e.code(),
            }),
            Operation::Files {
                attr,
                num,
                filep,
                path,
            } => match self.files(attr, num, filep, path) {
                Ok(batch) => Response::new_files(Ok(&batch)),
                Err(e) => Response::new_files(Err(e)),
            },
            Operation::Nfiles { num, filep } => match self.nfiles(num, filep) {
                Ok(batch) => Response::new_files(Ok(&batch)),
                Err(e) => Response::new_files(Err(e)),
            },
            Operation::Create {
                attr,
                mode,
                fcb,
                path,
            } => Response::new_res(self.create(attr, mode, fcb, path)),
            Operation::Open { mode, fcb, path } => Response::new_open(self.open(mode, fcb, path)),
            Operation::Close { fcb } => Response::new_res(self.close(fcb)),
            Operation::Read { fcb, pos, len } => match self.read(fcb, pos, len) {
                Ok(data) => Response::new_read(Ok(&data)),
                Err(e) => Response::new_read(Err(e)),
            },
            Operation::Write { fcb, pos, data } => Response::new_write(self.write(fcb, pos, data)),
            Operation::Filedate { fcb, time, date } => {
                Response::new_filedate(self.filedate(fcb, time, date))
            }
            Operation::Dskfre => self.dskfre(),
        }
    }

    fn chdir(&mut self, path: &NameBuf) -> Result<(), DosError> {
        let host = names::host_path(&self.root, path, true)?;
        // the server never changes its own directory; the guest only needs
        // to know the target exists
        match fs::metadata(&host) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(DosError::NODIR),
            Err(_) => Err(DosError::NODIR),
        }
    }

    fn mkdir(&mut self, path: &NameBuf) -> Result<(), DosError> {
        let host = names::host_path(&self.root, path, true)?;
        fs::create_dir(&host).map_err(|e| match e.raw_os_error() {
            Some(libc::EEXIST) => DosError::EXISTDIR,
            _ => DosError::from_io(&e),
        })
    }

    fn rmdir(&mut self, path: &NameBuf) -> Result<(), DosError> {
        let host = names::host_path(&self.root, path, true)?;
        fs::remove_dir(&host).map_err(|e| match e.raw_os_error() {
            // busy mount points and the current directory report EINVAL
            Some(libc::EINVAL) => DosError::ISCURDIR,
            _ => DosError::from_io(&e),
        })
    }

    fn rename(&mut self, from: &NameBuf, to: &NameBuf) -> Result<(), DosError> {
        let old = names::host_path(&self.root, from, true)?;
        let new = names::host_path(&self.root, to, true)?;
        fs::rename(&old, &new).map_err(|e| match e.raw_os_error() {
            Some(libc::ENOTEMPTY) => DosError::CANTREN,
            _ => DosError::from_io(&e),
        })
    }

    fn delete(&mut self, path: &NameBuf) -> Result<(), DosError> {
        let host = names::host_path(&self.root, path, true)?;
        fs::remove_file(&host).map_err(|e| DosError::from_io(&e))
    }

    // `0xFF` probes the current attribute byte; anything else sets or
    // clears host write permission from the read-only bit and reports
    // success as zero.
    fn chmod(&mut self, attr: u8, path: &NameBuf) -> Result<i8, DosError> {
        let host = names::host_path(&self.root, path, true)?;
        let meta = fs::metadata(&host).map_err(|e| DosError::from_io(&e))?;
        let current = Attributes::from_metadata(&meta);
        if attr == 0xff {
            return Ok(current.bits() as i8);
        }
        let mut perms = meta.permissions();
        if attr & Attributes::READ_ONLY.bits() != 0 {
            perms.set_mode(perms.mode() & !0o222);
        } else {
            perms.set_mode(perms.mode() | 0o200);
        }
        fs::set_permissions(&host, perms).map_err(|e| DosError::from_io(&e))?;
        Ok(0)
    }

    fn files(
        &mut self,
        attr: u8,
        num: u8,
        filep: u32,
        path: &NameBuf,
    ) -> Result<Vec<FilesInfo>, DosError> {
        let key = names::MatchKey::from_namebuf(path);
        let dir = names::host_path(&self.root, path, false)?;
        let mut found = Vec::new();
        if path.is_root()
            && attr & Attributes::VOLUME.bits() != 0
            && key.is_all_wildcards()
        {
            // the root's volume label is the served directory itself
            if let Some(label) = encoding::to_guest(&self.root.to_string_lossy()) {
                found.push(FilesInfo::new(
                    Attributes::VOLUME,
                    DosTime(0),
                    DosDate(0),
                    0,
                    &label,
                ));
            }
        }
        let mut matched = Vec::new();
        let entries = fs::read_dir(&dir).map_err(|e| DosError::from_io(&e))?;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("skipping unreadable entry in {}: {e}", dir.display());
                    continue;
                }
            };
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            let Some(candidate) = names::candidate(&name) else {
                continue;
            };
            if !key.matches(&candidate.packed) {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if meta.len() > u64::from(u32::MAX) {
                continue;
            }
            let file_attr = Attributes::from_metadata(&meta);
            if file_attr.bits() & attr == 0 {
                continue;
            }
            let secs = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_secs() as i64);
            let (date, time) = dos::stamp_from_unix(secs);
            matched.push(FilesInfo::new(
                file_attr,
                time,
                date,
                meta.len() as u32,
                &candidate.display,
            ));
        }
        // host directory order is arbitrary; hand the guest a stable one
        matched.sort_by(|a, b| a.name.cmp(&b.name));
        found.extend(matched);
        debug!("files {filep:#010x}: {} match(es)", found.len());
        if found.is_empty() {
            return Err(DosError::NOENT);
        }
        self.matches.insert(filep, found);
        self.next_batch(num, filep)
    }

    fn nfiles(&mut self, num: u8, filep: u32) -> Result<Vec<FilesInfo>, DosError> {
        self.next_batch(num, filep)
    }

    fn next_batch(&mut self, num: u8, filep: u32) -> Result<Vec<FilesInfo>, DosError> {
        let num = usize::from(num).clamp(1, BATCH_MAX);
        match self.matches.next_batch(filep, num) {
            Some(batch) if !batch.is_empty() => Ok(batch),
            _ => Err(DosError::NOMORE),
        }
    }

    fn create(&mut self, attr: u8, mode: u8, fcb: u32, path: &NameBuf) -> Result<(), DosError> {
        let host = names::host_path(&self.root, path, true)?;
        let mut opts = OpenOptions::new();
        opts.read(true).write(true).create(true).truncate(true);
        if mode == 0 {
            opts.create_new(true);
        }
        let file = opts.open(&host).map_err(|e| DosError::from_io(&e))?;
        // guest attribute bits beyond read-only have no host form; a fresh
        // file is writable until the guest chmods it
        let _ = attr;
        self.files.insert(fcb, file);
        Ok(())
    }

    fn open(&mut self, mode: u8, fcb: u32, path: &NameBuf) -> Result<u32, DosError> {
        let host = names::host_path(&self.root, path, true)?;
        let mut opts = OpenOptions::new();
        match mode {
            0 => opts.read(true),
            1 => opts.write(true),
            2 => opts.read(true).write(true),
            _ => return Err(DosError::ILGARG),
        };
        let file = opts.open(&host).map_err(|e| DosError::from_io(&e))?;
        let meta = file.metadata().map_err(|e| DosError::from_io(&e))?;
        if meta.is_dir() {
            return Err(DosError::ISDIR);
        }
        let size = meta.len().min(u64::from(u32::MAX)) as u32;
        self.files.insert(fcb, file);
        Ok(size)
    }

    fn close(&mut self, fcb: u32) -> Result<(), DosError> {
        match self.files.remove(fcb) {
            Some(_) => Ok(()),
            None => Err(DosError::BADF),
        }
    }

    fn read(&mut self, fcb: u32, pos: u32, len: u16) -> Result<Vec<u8>, DosError> {
        let want = usize::from(len).min(DATA_MAX);
        let entry = self.files.get_mut(fcb).ok_or(DosError::BADF)?;
        if entry.pos != u64::from(pos) {
            entry
                .file
                .seek(SeekFrom::Start(u64::from(pos)))
                .map_err(|e| DosError::from_io(&e))?;
            entry.pos = u64::from(pos);
        }
        let mut data = vec![0u8; want];
        let mut done = 0;
        while done < want {
            match entry.file.read(&mut data[done..]) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(DosError::from_io(&e)),
            }
        }
        data.truncate(done);
        entry.pos += done as u64;
        Ok(data)
    }

    fn write(&mut self, fcb: u32, pos: u32, data: &[u8]) -> Result<u16, DosError> {
        let entry = self.files.get_mut(fcb).ok_or(DosError::BADF)?;
        if entry.pos != u64::from(pos) {
            entry
                .file
                .seek(SeekFrom::Start(u64::from(pos)))
                .map_err(|e| DosError::from_io(&e))?;
            entry.pos = u64::from(pos);
        }
        if data.is_empty() {
            entry
                .file
                .set_len(entry.pos)
                .map_err(|e| DosError::from_io(&e))?;
            return Ok(0);
        }
        entry
            .file
            .write_all(data)
            .map_err(|e| DosError::from_io(&e))?;
        entry.pos += data.len() as u64;
        Ok(data.len() as u16)
    }

    fn filedate(&mut self, fcb: u32, time: u16, date: u16) -> Result<(DosTime, DosDate), DosError> {
        let entry = self.files.get_mut(fcb).ok_or(DosError::BADF)?;
        if time == 0 && date == 0 {
            let meta = entry.file.metadata().map_err(|e| DosError::from_io(&e))?;
            let secs = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_secs() as i64);
            let (date, time) = dos::stamp_from_unix(secs);
            Ok((time, date))
        } else {
            let secs = dos::stamp_to_unix(DosDate(date), DosTime(time));
            let stamp = TimeSpec::new(secs, 0);
            futimens(&entry.file, &stamp, &stamp)
                .map_err(|errno| DosError::from_errno(errno as i32))?;
            Ok((DosTime(time), DosDate(date)))
        }
    }

    fn dskfre(&self) -> Response {
        let stat = match statvfs(&self.root) {
            Ok(stat) => stat,
            Err(errno) => {
                let code = DosError::from_errno(errno as i32).code();
                return Response::new_dskfre(i32::from(code), 0, 0, 0, 0);
            }
        };
        // free and total saturate independently; on big disks freeclu can
        // exceed totalclu, which matches what guests have always been shown
        let frag = u128::from(stat.fragment_size());
        let free = saturate(u128::from(stat.blocks_available()) * frag);
        let total = saturate(u128::from(stat.blocks()) * frag);
        Response::new_dskfre(
            free as i32,
            (free / 32768) as u16,
            (total / 32768) as u16,
            CLUSTER_SECTORS,
            SECTOR_SIZE,
        )
    }

    #[cfg(test)]
    pub(crate) fn open_count(&self) -> usize {
        self.files.len()
    }

    #[cfg(test)]
    pub(crate) fn match_count(&self) -> usize {
        self.matches.len()
    }
}

fn saturate(bytes: u128) -> u64 {
    bytes.min(i32::MAX as u128) as u64
}
