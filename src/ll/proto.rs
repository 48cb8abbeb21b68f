//! Wire ABI.
//!
//! Types and packed layouts exchanged between the guest-side driver and the
//! host-side server. Both endpoints compile against these definitions, so
//! the command set is defined exactly once.
//!
//! Every multi-byte integer on the wire is big-endian, carried in
//! `zerocopy` byteorder fields with explicit widths; layouts contain no
//! implicit padding and no alignment requirement.

#![allow(missing_docs)]

use num_enum::IntoPrimitive;
use num_enum::TryFromPrimitive;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;
use zerocopy::byteorder::big_endian::I16;
use zerocopy::byteorder::big_endian::I32;
use zerocopy::byteorder::big_endian::U16;
use zerocopy::byteorder::big_endian::U32;

use crate::dos::Attributes;
use crate::dos::DosDate;
use crate::dos::DosTime;

/// Largest read/write body carried in one frame.
pub const DATA_MAX: usize = 1024;

/// Largest legal frame payload: a write request plus a full data body.
pub const PAYLOAD_MAX: usize = size_of::<WriteRequest>() + DATA_MAX;

/// Separator between components in [`NameBuf::path`].
pub(crate) const PATH_SEPARATOR: u8 = 0x09;

/// Request command codes, the first payload byte of every request.
///
/// `0x4E` (seek) is reserved: seeks are resolved inside the driver against
/// the FCB-known size and never cross the wire. `0x51..0x58` are guest
/// entry points the driver answers locally; they have no wire form at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum CommandCode {
    Check = 0x40,
    Chdir = 0x41,
    Mkdir = 0x42,
    Rmdir = 0x43,
    Rename = 0x44,
    Delete = 0x45,
    Chmod = 0x46,
    Files = 0x47,
    Nfiles = 0x48,
    Create = 0x49,
    Open = 0x4a,
    Close = 0x4b,
    Read = 0x4c,
    Write = 0x4d,
    Seek = 0x4e,
    Filedate = 0x4f,
    Dskfre = 0x50,
}

/// Guest path block as transmitted: drive, separator-delimited directory
/// path, and the split 8.3 (+10 extension bytes) file name. All name bytes
/// are in the guest encoding.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct NameBuf {
    pub flg: u8,
    pub drive: u8,
    /// Components separated by `0x09`, `0x00`-terminated overall.
    pub path: [u8; 65],
    pub name1: [u8; 8],
    pub ext: [u8; 3],
    /// Overflow of the main name past eight bytes; zero-filled when unused.
    pub name2: [u8; 10],
}

impl NameBuf {
    /// Assembles a name block the way the guest OS does: the main name is
    /// space-padded into `name1`, overflow lands in `name2`, the extension
    /// is space-padded.
    pub fn new(drive: u8, path: &[u8], name: &[u8], ext: &[u8]) -> NameBuf {
        let mut nb = NameBuf {
            flg: 0,
            drive,
            path: [0; 65],
            name1: [0x20; 8],
            ext: [0x20; 3],
            name2: [0; 10],
        };
        nb.path[..path.len()].copy_from_slice(path);
        let head = name.len().min(8);
        nb.name1[..head].copy_from_slice(&name[..head]);
        if name.len() > 8 {
            let tail = (name.len() - 8).min(10);
            nb.name2[..tail].copy_from_slice(&name[8..8 + tail]);
        }
        nb.ext[..ext.len().min(3)].copy_from_slice(&ext[..ext.len().min(3)]);
        nb
    }

    /// The directory-path bytes up to the terminating `0x00`.
    pub fn path_bytes(&self) -> &[u8] {
        match memchr::memchr(0, &self.path) {
            Some(end) => &self.path[..end],
            None => &self.path[..],
        }
    }

    /// True when the path names the drive root itself.
    pub fn is_root(&self) -> bool {
        self.path_bytes() == [PATH_SEPARATOR]
    }
}

/// Directory entry as returned to the guest by `files`/`nfiles`.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct FilesInfo {
    pub atr: u8,
    pub time: U16,
    pub date: U16,
    pub filelen: U32,
    /// `name.ext` in the guest encoding, `0x00`-terminated.
    pub name: [u8; 23],
}

impl FilesInfo {
    pub(crate) fn new(
        atr: Attributes,
        time: DosTime,
        date: DosDate,
        filelen: u32,
        name: &[u8],
    ) -> FilesInfo {
        let mut info = FilesInfo {
            atr: atr.bits(),
            time: U16::new(time.0),
            date: U16::new(date.0),
            filelen: U32::new(filelen),
            name: [0; 23],
        };
        let n = name.len().min(22);
        info.name[..n].copy_from_slice(&name[..n]);
        info
    }

    /// The display name up to the terminating `0x00`.
    pub fn name_bytes(&self) -> &[u8] {
        match memchr::memchr(0, &self.name) {
            Some(end) => &self.name[..end],
            None => &self.name[..],
        }
    }
}

// Request layouts. The command byte is part of the struct so a request is
// encoded and decoded as one unit.

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub(crate) struct PathRequest {
    pub(crate) cmd: u8,
    pub(crate) path: NameBuf,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub(crate) struct RenameRequest {
    pub(crate) cmd: u8,
    pub(crate) path_old: NameBuf,
    pub(crate) path_new: NameBuf,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub(crate) struct ChmodRequest {
    pub(crate) cmd: u8,
    pub(crate) attr: u8,
    pub(crate) path: NameBuf,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub(crate) struct FilesRequest {
    pub(crate) cmd: u8,
    pub(crate) attr: u8,
    /// Entries the driver is willing to take in one response.
    pub(crate) num: u8,
    pub(crate) filep: U32,
    pub(crate) path: NameBuf,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub(crate) struct NfilesRequest {
    pub(crate) cmd: u8,
    pub(crate) num: u8,
    pub(crate) filep: U32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub(crate) struct CreateRequest {
    pub(crate) cmd: u8,
    pub(crate) attr: u8,
    pub(crate) mode: u8,
    pub(crate) fcb: U32,
    pub(crate) path: NameBuf,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub(crate) struct OpenRequest {
    pub(crate) cmd: u8,
    pub(crate) mode: u8,
    pub(crate) fcb: U32,
    pub(crate) path: NameBuf,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub(crate) struct CloseRequest {
    pub(crate) cmd: u8,
    pub(crate) fcb: U32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub(crate) struct ReadRequest {
    pub(crate) cmd: u8,
    pub(crate) fcb: U32,
    pub(crate) pos: U32,
    pub(crate) len: U16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub(crate) struct WriteRequest {
    pub(crate) cmd: u8,
    pub(crate) fcb: U32,
    pub(crate) pos: U32,
    /// Body length; the data bytes follow the struct. Zero truncates.
    pub(crate) len: U16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub(crate) struct FiledateRequest {
    pub(crate) cmd: u8,
    pub(crate) fcb: U32,
    pub(crate) time: U16,
    pub(crate) date: U16,
}

// Response layouts. A response is correlated with the single outstanding
// request, so no command byte is echoed.

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub(crate) struct ResResponse {
    pub(crate) res: i8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub(crate) struct OpenResponse {
    pub(crate) res: i8,
    pub(crate) size: U32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub(crate) struct FilesResponseHeader {
    pub(crate) res: i8,
    /// Number of [`FilesInfo`] records following the header.
    pub(crate) num: u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub(crate) struct ReadResponseHeader {
    /// Bytes following the header; negative carries a DOS error code.
    pub(crate) len: I16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub(crate) struct WriteResponse {
    /// Bytes accepted; zero acknowledges a truncate; negative is an error.
    pub(crate) len: I16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub(crate) struct FiledateResponse {
    pub(crate) time: U16,
    pub(crate) date: U16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub(crate) struct DskfreResponse {
    pub(crate) res: I32,
    pub(crate) freeclu: U16,
    pub(crate) totalclu: U16,
    pub(crate) clusect: U16,
    pub(crate) sectsize: U16,
}
