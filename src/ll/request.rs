//! Typed view of an inbound request payload.
//!
//! The server decomposes every payload into an [`Operation`] before touching
//! the filesystem, so malformed frames are rejected at the parse layer and
//! never reach an operation handler.

use std::error;
use std::fmt;

use super::argument::ArgumentIterator;
use super::proto::ChmodRequest;
use super::proto::CloseRequest;
use super::proto::CommandCode;
use super::proto::CreateRequest;
use super::proto::FiledateRequest;
use super::proto::FilesRequest;
use super::proto::NameBuf;
use super::proto::NfilesRequest;
use super::proto::OpenRequest;
use super::proto::PathRequest;
use super::proto::ReadRequest;
use super::proto::RenameRequest;
use super::proto::WriteRequest;

/// Error that may occur while parsing a request payload.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RequestError {
    /// The payload carried no bytes at all.
    Empty,
    /// The first byte is not a servable command code.
    UnknownCommand(u8),
    /// The payload is shorter than the command's argument block.
    InsufficientData,
    /// A write body was shorter than its announced length.
    TruncatedData { announced: usize, got: usize },
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Empty => write!(f, "empty request payload"),
            RequestError::UnknownCommand(cmd) => write!(f, "unknown command ({cmd:#04x})"),
            RequestError::InsufficientData => write!(f, "insufficient argument data"),
            RequestError::TruncatedData { announced, got } => {
                write!(f, "truncated write body ({got} < {announced})")
            }
        }
    }
}

impl error::Error for RequestError {}

/// A single decoded request.
#[derive(Debug)]
pub(crate) enum Operation<'a> {
    Check,
    Chdir { path: &'a NameBuf },
    Mkdir { path: &'a NameBuf },
    Rmdir { path: &'a NameBuf },
    Rename { from: &'a NameBuf, to: &'a NameBuf },
    Delete { path: &'a NameBuf },
    Chmod { attr: u8, path: &'a NameBuf },
    Files { attr: u8, num: u8, filep: u32, path: &'a NameBuf },
    Nfiles { num: u8, filep: u32 },
    Create { attr: u8, mode: u8, fcb: u32, path: &'a NameBuf },
    Open { mode: u8, fcb: u32, path: &'a NameBuf },
    Close { fcb: u32 },
    Read { fcb: u32, pos: u32, len: u16 },
    Write { fcb: u32, pos: u32, data: &'a [u8] },
    Filedate { fcb: u32, time: u16, date: u16 },
    Dskfre,
}

impl<'a> Operation<'a> {
    /// Parses one request payload. The command byte is the first payload
    /// byte; the argument block (including that byte) follows the packed
    /// layouts in [`super::proto`].
    pub(crate) fn parse(payload: &'a [u8]) -> Result<Operation<'a>, RequestError> {
        let cmd = *payload.first().ok_or(RequestError::Empty)?;
        let code = CommandCode::try_from(cmd).map_err(|_| RequestError::UnknownCommand(cmd))?;
        let mut args = ArgumentIterator::new(payload);
        let op = match code {
            CommandCode::Check => Operation::Check,
            CommandCode::Chdir => {
                let req: &PathRequest = args.fetch().ok_or(RequestError::InsufficientData)?;
                Operation::Chdir { path: &req.path }
            }
            CommandCode::Mkdir => {
                let req: &PathRequest = args.fetch().ok_or(RequestError::InsufficientData)?;
                Operation::Mkdir { path: &req.path }
            }
            CommandCode::Rmdir => {
                let req: &PathRequest = args.fetch().ok_or(RequestError::InsufficientData)?;
                Operation::Rmdir { path: &req.path }
            }
            CommandCode::Rename => {
                let req: &RenameRequest = args.fetch().ok_or(RequestError::InsufficientData)?;
                Operation::Rename {
                    from: &req.path_old,
                    to: &req.path_new,
                }
            }
            CommandCode::Delete => {
                let req: &PathRequest = args.fetch().ok_or(RequestError::InsufficientData)?;
                Operation::Delete { path: &req.path }
            }
            CommandCode::Chmod => {
                let req: &ChmodRequest = args.fetch().ok_or(RequestError::InsufficientData)?;
                Operation::Chmod {
                    attr: req.attr,
                    path: &req.path,
                }
            }
            CommandCode::Files => {
                let req: &FilesRequest = args.fetch().ok_or(RequestError::InsufficientData)?;
                Operation::Files {
                    attr: req.attr,
                    num: req.num,
                    filep: req.filep.get(),
                    path: &req.path,
                }
            }
            CommandCode::Nfiles => {
                let req: &NfilesRequest = args.fetch().ok_or(RequestError::InsufficientData)?;
                Operation::Nfiles {
                    num: req.num,
                    filep: req.filep.get(),
                }
            }
            CommandCode::Create => {
                let req: &CreateRequest = args.fetch().ok_or(RequestError::InsufficientData)?;
                Operation::Create {
                    attr: req.attr,
                    mode: req.mode,
                    fcb: req.fcb.get(),
                    path: &req.path,
                }
            }
            CommandCode::Open => {
                let req: &OpenRequest = args.fetch().ok_or(RequestError::InsufficientData)?;
                Operation::Open {
                    mode: req.mode,
                    fcb: req.fcb.get(),
                    path: &req.path,
                }
            }
            CommandCode::Close => {
                let req: &CloseRequest = args.fetch().ok_or(RequestError::InsufficientData)?;
                Operation::Close { fcb: req.fcb.get() }
            }
            CommandCode::Read => {
                let req: &ReadRequest = args.fetch().ok_or(RequestError::InsufficientData)?;
                Operation::Read {
                    fcb: req.fcb.get(),
                    pos: req.pos.get(),
                    len: req.len.get(),
                }
            }
            CommandCode::Write => {
                let req: &WriteRequest = args.fetch().ok_or(RequestError::InsufficientData)?;
                let announced = usize::from(req.len.get());
                let data = args.fetch_all();
                if data.len() < announced {
                    return Err(RequestError::TruncatedData {
                        announced,
                        got: data.len(),
                    });
                }
                Operation::Write {
                    fcb: req.fcb.get(),
                    pos: req.pos.get(),
                    data: &data[..announced],
                }
            }
            CommandCode::Filedate => {
                let req: &FiledateRequest = args.fetch().ok_or(RequestError::InsufficientData)?;
                Operation::Filedate {
                    fcb: req.fcb.get(),
                    time: req.time.get(),
                    date: req.date.get(),
                }
            }
            CommandCode::Dskfre => Operation::Dskfre,
            // Seek is resolved inside the driver; receiving it is a peer bug.
            CommandCode::Seek => return Err(RequestError::UnknownCommand(cmd)),
        };
        Ok(op)
    }
}
