//! Low-level wire protocol shared by driver and server.
//!
//! [`proto`] is the single definition of every packed request and response
//! layout; [`request`] gives the server a typed view of inbound payloads;
//! [`reply`] builds outbound response payloads.

pub(crate) mod argument;
pub(crate) mod proto;
pub(crate) mod reply;
pub(crate) mod request;
