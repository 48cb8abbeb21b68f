//! Guest-side DOS semantics: attribute bits, packed timestamps, error codes.
//!
//! Everything the guest understands about a file fits in a handful of packed
//! integers. Attribute bytes, 16-bit timestamps and the signed error codes
//! defined here travel over the wire verbatim, so their encodings are fixed.

use std::fmt;
use std::fs::Metadata;
use std::io;

use bitflags::bitflags;
use num_enum::IntoPrimitive;
use num_enum::TryFromPrimitive;

bitflags! {
    /// DOS file attribute byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Attributes: u8 {
        /// File may not be written to.
        const READ_ONLY = 0x01;
        /// Hidden from plain directory listings.
        const HIDDEN = 0x02;
        /// Guest system file.
        const SYSTEM = 0x04;
        /// Volume label pseudo-entry.
        const VOLUME = 0x08;
        /// Subdirectory.
        const DIRECTORY = 0x10;
        /// Regular file (archive bit).
        const ARCHIVE = 0x20;
    }
}

impl Attributes {
    /// Derives the guest attribute byte for a host file.
    pub fn from_metadata(meta: &Metadata) -> Attributes {
        let mut attr = if meta.is_dir() {
            Attributes::DIRECTORY
        } else {
            Attributes::ARCHIVE
        };
        if meta.permissions().readonly() {
            attr |= Attributes::READ_ONLY;
        }
        attr
    }
}

/// Packed DOS time of day: `hh << 11 | mm << 5 | ss / 2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DosTime(pub u16);

impl DosTime {
    /// Packs hours, minutes and seconds. Seconds lose their low bit.
    pub fn new(hour: u8, min: u8, sec: u8) -> DosTime {
        DosTime((u16::from(hour) << 11) | (u16::from(min) << 5) | (u16::from(sec) / 2))
    }

    /// Hours since midnight.
    pub fn hour(self) -> u8 {
        (self.0 >> 11) as u8
    }

    /// Minutes past the hour.
    pub fn minute(self) -> u8 {
        ((self.0 >> 5) & 0x3f) as u8
    }

    /// Seconds, always even.
    pub fn second(self) -> u8 {
        ((self.0 & 0x1f) * 2) as u8
    }
}

/// Packed DOS date: `(yyyy - 1980) << 9 | mm << 5 | dd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DosDate(pub u16);

impl DosDate {
    /// Packs a civil date. Years before 1980 are not representable.
    pub fn new(year: u16, month: u8, day: u8) -> DosDate {
        DosDate(((year - 1980) << 9) | (u16::from(month) << 5) | u16::from(day))
    }

    /// Calendar year.
    pub fn year(self) -> u16 {
        (self.0 >> 9) + 1980
    }

    /// Calendar month, 1..=12.
    pub fn month(self) -> u8 {
        ((self.0 >> 5) & 0x0f) as u8
    }

    /// Day of month, 1..=31.
    pub fn day(self) -> u8 {
        (self.0 & 0x1f) as u8
    }
}

// Civil-date arithmetic after Howard Hinnant's algorithms. Days are counted
// from the Unix epoch; the guest calendar is proleptic Gregorian in UTC.
fn days_from_civil(year: i64, month: u8, day: u8) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = i64::from(if month > 2 { month - 3 } else { month + 9 });
    let doy = (153 * mp + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}

fn civil_from_days(days: i64) -> (i64, u8, u8) {
    let z = days + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = z - era * 146097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u8;
    (if month <= 2 { y + 1 } else { y }, month, day)
}

/// Converts a Unix timestamp to the packed guest stamp.
///
/// The representable range is 1980-01-01 through 2107-12-31; timestamps
/// outside it clamp to the nearest bound.
pub(crate) fn stamp_from_unix(secs: i64) -> (DosDate, DosTime) {
    const MIN: i64 = 315532800; // 1980-01-01T00:00:00Z
    let secs = secs.clamp(MIN, days_from_civil(2108, 1, 1) * 86400 - 2);
    let days = secs.div_euclid(86400);
    let tod = secs.rem_euclid(86400);
    let (year, month, day) = civil_from_days(days);
    let date = DosDate::new(year as u16, month, day);
    let time = DosTime::new((tod / 3600) as u8, ((tod / 60) % 60) as u8, (tod % 60) as u8);
    (date, time)
}

/// Converts a packed guest stamp back to a Unix timestamp.
pub(crate) fn stamp_to_unix(date: DosDate, time: DosTime) -> i64 {
    let days = days_from_civil(i64::from(date.year()), date.month(), date.day());
    days * 86400
        + i64::from(time.hour()) * 3600
        + i64::from(time.minute()) * 60
        + i64::from(time.second())
}

/// Error codes understood by the guest DOS.
///
/// The numeric values are the guest's native DOS-call error codes and are
/// carried on the wire as a signed byte in the `res`/`len` response fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[allow(clippy::upper_case_acronyms)]
#[repr(i8)]
pub enum DosError {
    /// File not found.
    NOENT = -2,
    /// Directory not found.
    NODIR = -3,
    /// Too many open files.
    MFILE = -4,
    /// Tried to access a directory as a file.
    ISDIR = -5,
    /// Bad file handle.
    BADF = -6,
    /// Out of memory.
    NOMEM = -8,
    /// Invalid memory pointer.
    ILGMPTR = -9,
    /// Invalid executable format.
    ILGFMT = -11,
    /// Invalid access mode argument.
    ILGARG = -12,
    /// Invalid file name.
    ILGFNAME = -13,
    /// Invalid parameter.
    ILGPARM = -14,
    /// Invalid drive.
    ILGDRV = -15,
    /// Tried to remove the current directory.
    ISCURDIR = -16,
    /// Device does not support ioctrl.
    CANTIOC = -17,
    /// No more directory entries.
    NOMORE = -18,
    /// File is write protected.
    RDONLY = -19,
    /// Directory already exists.
    EXISTDIR = -20,
    /// Directory is not empty.
    NOTEMPTY = -21,
    /// File cannot be renamed.
    CANTREN = -22,
    /// Disk is full.
    DISKFULL = -23,
    /// Directory is full.
    DIRFULL = -24,
    /// Seek past the end of file.
    CANTSEEK = -25,
    /// File already exists.
    EXISTFILE = -80,
}

impl DosError {
    /// The wire representation of this error.
    pub fn code(self) -> i8 {
        self.into()
    }

    /// Maps a host errno to the guest error taxonomy.
    ///
    /// Operations with special cases (rmdir, rename, mkdir) adjust the
    /// result themselves; everything unrecognized degrades to `ILGPARM`.
    pub fn from_errno(errno: i32) -> DosError {
        match errno {
            libc::ENOENT => DosError::NOENT,
            libc::ENOTDIR => DosError::NODIR,
            libc::EMFILE => DosError::MFILE,
            libc::EISDIR => DosError::ISDIR,
            libc::EBADF => DosError::BADF,
            libc::ENOMEM => DosError::NOMEM,
            libc::EFAULT => DosError::ILGMPTR,
            libc::ENOEXEC => DosError::ILGFMT,
            libc::ENAMETOOLONG => DosError::ILGFNAME,
            libc::EINVAL => DosError::ILGPARM,
            libc::EXDEV => DosError::ILGDRV,
            libc::EACCES | libc::EPERM | libc::EROFS => DosError::RDONLY,
            libc::ENOTEMPTY => DosError::NOTEMPTY,
            libc::ENOSPC => DosError::DISKFULL,
            libc::EOVERFLOW => DosError::CANTSEEK,
            libc::EEXIST => DosError::EXISTFILE,
            _ => DosError::ILGPARM,
        }
    }

    /// Maps an `io::Error`, falling back on the error kind when no raw
    /// errno is attached.
    pub fn from_io(err: &io::Error) -> DosError {
        match err.raw_os_error() {
            Some(errno) => DosError::from_errno(errno),
            None => match err.kind() {
                io::ErrorKind::NotFound => DosError::NOENT,
                io::ErrorKind::PermissionDenied => DosError::RDONLY,
                io::ErrorKind::AlreadyExists => DosError::EXISTFILE,
                _ => DosError::ILGPARM,
            },
        }
    }
}

impl fmt::Display for DosError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_packing() {
        let t = DosTime::new(23, 59, 58);
        assert_eq!(t.hour(), 23);
        assert_eq!(t.minute(), 59);
        assert_eq!(t.second(), 58);
        // odd seconds round down
        assert_eq!(DosTime::new(0, 0, 59).second(), 58);
    }

    #[test]
    fn date_packing() {
        let d = DosDate::new(2021, 7, 23);
        assert_eq!(d.year(), 2021);
        assert_eq!(d.month(), 7);
        assert_eq!(d.day(), 23);
        assert_eq!(DosDate::new(1980, 1, 1).0, 0x0021);
    }

    #[test]
    fn epoch_of_dos_zero() {
        assert_eq!(stamp_to_unix(DosDate::new(1980, 1, 1), DosTime(0)), 315532800);
    }

    #[test]
    fn stamp_round_trip() {
        for &secs in &[315532800i64, 1000000000, 1626957296, 4102444798] {
            let even = secs - secs % 2;
            let (date, time) = stamp_from_unix(even);
            assert_eq!(stamp_to_unix(date, time), even);
        }
    }

    #[test]
    fn pre_epoch_clamps() {
        let (date, time) = stamp_from_unix(0);
        assert_eq!((date.year(), date.month(), date.day()), (1980, 1, 1));
        assert_eq!(time.0, 0);
    }

    #[test]
    fn errno_mapping() {
        assert_eq!(DosError::from_errno(libc::ENOENT), DosError::NOENT);
        assert_eq!(DosError::from_errno(libc::EROFS), DosError::RDONLY);
        assert_eq!(DosError::from_errno(libc::ENOTEMPTY), DosError::NOTEMPTY);
        // unknown errnos degrade to the generic parameter error
        assert_eq!(DosError::from_errno(libc::ELOOP), DosError::ILGPARM);
    }

    #[test]
    fn wire_code_round_trip() {
        assert_eq!(DosError::try_from(-18i8), Ok(DosError::NOMORE));
        assert_eq!(DosError::NOMORE.code(), -18);
        assert!(DosError::try_from(-1i8).is_err());
    }
}
