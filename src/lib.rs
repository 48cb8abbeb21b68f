//! Remote-drive bridge between a DOS-like guest machine and a host filesystem.
//!
//! A subtree of the host filesystem is served to the guest over an
//! asynchronous serial line. The guest-side **driver** packages filesystem
//! calls into framed requests; the host-side **server** executes them against
//! a root directory and answers with framed responses. Both endpoints are
//! strictly synchronous: one request, one response, no pipelining.
//!
//! The crate provides the shared wire ABI ([`NameBuf`], [`FilesInfo`],
//! [`CommandCode`]), the framed [`Transport`] with its sync-flood recovery,
//! the DOS semantic layer (8.3 wildcard matching, attribute and timestamp
//! encoding, error translation), and the two endpoint cores [`Driver`] and
//! [`Server`].

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub use crate::dos::Attributes;
pub use crate::dos::DosDate;
pub use crate::dos::DosError;
pub use crate::dos::DosTime;
pub use crate::driver::DiskFree;
pub use crate::driver::Driver;
pub use crate::driver::DriverConfig;
pub use crate::driver::DriverError;
pub use crate::driver::Fcb;
pub use crate::driver::GUEST_TIMEOUT_CODE;
pub use crate::driver::InvalidOption;
pub use crate::ll::proto::CommandCode;
pub use crate::ll::proto::DATA_MAX;
pub use crate::ll::proto::FilesInfo;
pub use crate::ll::proto::NameBuf;
pub use crate::ll::proto::PAYLOAD_MAX;
pub use crate::serial::SerialPort;
pub use crate::server::Server;
pub use crate::transport::SerialLine;
pub use crate::transport::Transport;

mod dos;
mod driver;
mod encoding;
mod ll;
mod names;
mod serial;
mod server;
mod transport;
