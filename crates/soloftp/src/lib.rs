//! soloftp is a small, single-session FTP server library.
//!
//! the server owns one control connection at a time and is driven by an
//! external loop calling [`FtpServer::tick`]; it never spawns threads of its
//! own. sockets, file storage, authentication and the clock are all consumed
//! through traits, so the whole protocol machine can be exercised against
//! in-memory fakes. data connections are passive-mode only.

pub mod code;
pub mod command;

#[cfg(feature = "tcp")]
pub mod tcp;

mod builder;
mod handler;
mod session;

pub use builder::*;
pub use handler::*;
pub use session::*;
