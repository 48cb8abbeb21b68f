//! Response payload encoding.
//!
//! Every executed command produces exactly one [`Response`]; the constructors
//! here are the only place response layouts are assembled, so the server's
//! operation handlers never touch raw bytes.

use smallvec::SmallVec;
use zerocopy::IntoBytes;
use zerocopy::byteorder::big_endian::I16;
use zerocopy::byteorder::big_endian::I32;
use zerocopy::byteorder::big_endian::U16;
use zerocopy::byteorder::big_endian::U32;

use super::proto::DskfreResponse;
use super::proto::FiledateResponse;
use super::proto::FilesInfo;
use super::proto::FilesResponseHeader;
use super::proto::OpenResponse;
use super::proto::ReadResponseHeader;
use super::proto::ResResponse;
use super::proto::WriteResponse;
use crate::dos::DosDate;
use crate::dos::DosError;
use crate::dos::DosTime;

const INLINE_DATA_THRESHOLD: usize = 16;
type ResponseBuf = SmallVec<[u8; INLINE_DATA_THRESHOLD]>;

/// Marker in both halves of a filedate response for a failed call.
pub(crate) const FILEDATE_ERROR: u16 = 0xffff;

/// An encoded response payload, ready for the transport.
#[derive(Debug)]
pub(crate) struct Response {
    buf: ResponseBuf,
}

impl Response {
    /// The payload bytes.
    pub(crate) fn bytes(&self) -> &[u8] {
        &self.buf
    }

    fn from_struct(data: &[u8]) -> Response {
        Response {
            buf: ResponseBuf::from_slice(data),
        }
    }

    /// A bare result byte: zero for success, the DOS code otherwise.
    pub(crate) fn new_res(result: Result<(), DosError>) -> Response {
        Response::new_attr(match result {
            Ok(()) => 0,
            Err(e) => e.code(),
        })
    }

    /// A raw signed result byte. Chmod replies with the attribute byte in
    /// the same field that otherwise carries an error code.
    pub(crate) fn new_attr(res: i8) -> Response {
        Response::from_struct(ResResponse { res }.as_bytes())
    }

    pub(crate) fn new_open(result: Result<u32, DosError>) -> Response {
        let (res, size) = match result {
            Ok(size) => (0, size),
            Err(e) => (e.code(), 0),
        };
        Response::from_struct(
            OpenResponse {
                res,
                size: U32::new(size),
            }
            .as_bytes(),
        )
    }

    pub(crate) fn new_files(result: Result<&[FilesInfo], DosError>) -> Response {
        match result {
            Ok(entries) => {
                let header = FilesResponseHeader {
                    res: 0,
                    num: entries.len() as u8,
                };
                let mut buf = ResponseBuf::from_slice(header.as_bytes());
                buf.extend_from_slice(entries.as_bytes());
                Response { buf }
            }
            Err(e) => Response::from_struct(
                FilesResponseHeader {
                    res: e.code(),
                    num: 0,
                }
                .as_bytes(),
            ),
        }
    }

    pub(crate) fn new_read(result: Result<&[u8], DosError>) -> Response {
        match result {
            Ok(data) => {
                let header = ReadResponseHeader {
                    len: I16::new(data.len() as i16),
                };
                let mut buf = ResponseBuf::from_slice(header.as_bytes());
                buf.extend_from_slice(data);
                Response { buf }
            }
            Err(e) => Response::from_struct(
                ReadResponseHeader {
                    len: I16::new(i16::from(e.code())),
                }
                .as_bytes(),
            ),
        }
    }

    pub(crate) fn new_write(result: Result<u16, DosError>) -> Response {
        let len = match result {
            Ok(n) => n as i16,
            Err(e) => i16::from(e.code()),
        };
        Response::from_struct(WriteResponse { len: I16::new(len) }.as_bytes())
    }

    pub(crate) fn new_filedate(result: Result<(DosTime, DosDate), DosError>) -> Response {
        let (time, date) = match result {
            Ok((time, date)) => (time.0, date.0),
            Err(_) => (FILEDATE_ERROR, FILEDATE_ERROR),
        };
        Response::from_struct(
            FiledateResponse {
                time: U16::new(time),
                date: U16::new(date),
            }
            .as_bytes(),
        )
    }

    pub(crate) fn new_dskfre(
        free: i32,
        freeclu: u16,
        totalclu: u16,
        clusect: u16,
        sectsize: u16,
    ) -> Response {
        Response::from_struct(
            DskfreResponse {
                res: I32::new(free),
                freeclu: U16::new(freeclu),
                totalclu: U16::new(totalclu),
                clusect: U16::new(clusect),
                sectsize: U16::new(sectsize),
            }
            .as_bytes(),
        )
    }
}
