use std::net::Ipv4Addr;
use std::time::Duration;

use crate::handler::{Acceptor, Authenticator, Clock, Storage};
use crate::session::FtpServer;

/// configuration for an [`FtpServer`]. the defaults mirror a classic
/// embedded FTP server: 30 s to log in, 2 min idle, 10 s for the client to
/// open the data connection.
pub struct FtpBuilder {
    pub(crate) welcome: String,
    pub(crate) passive_addr: Ipv4Addr,
    pub(crate) passive_port: u16,
    pub(crate) auth_timeout: Duration,
    pub(crate) idle_timeout: Duration,
    pub(crate) data_timeout: Duration,
    pub(crate) max_line: usize,
    pub(crate) chunk_size: usize,
}

impl Default for FtpBuilder {
    fn default() -> Self {
        Self {
            welcome: concat!("Welcome to soloftp ", env!("CARGO_PKG_VERSION")).to_string(),
            passive_addr: Ipv4Addr::LOCALHOST,
            passive_port: 50009,
            auth_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(2 * 60),
            data_timeout: Duration::from_secs(10),
            // max filename plus room for the verb and separator
            max_line: 255 + 8,
            chunk_size: 4096,
        }
    }
}

impl FtpBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// greeting text sent in the `220` reply on connect.
    pub fn welcome(mut self, welcome: impl Into<String>) -> Self {
        self.welcome = welcome.into();
        self
    }

    /// address advertised in the `227` passive-mode reply. must be the
    /// address the client can actually reach the data acceptor on.
    pub fn passive_addr(mut self, addr: Ipv4Addr) -> Self {
        self.passive_addr = addr;
        self
    }

    /// port advertised in the `227` reply; must match the port the data
    /// acceptor is bound to.
    pub fn passive_port(mut self, port: u16) -> Self {
        self.passive_port = port;
        self
    }

    /// how long a freshly connected client has to finish logging in.
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// how long an authenticated session may sit idle before teardown.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// how long to wait for the client's data connection after a command
    /// that needs one.
    pub fn data_timeout(mut self, timeout: Duration) -> Self {
        self.data_timeout = timeout;
        self
    }

    /// maximum control-line length before the parser reports a syntax error.
    pub fn max_line(mut self, max: usize) -> Self {
        self.max_line = max;
        self
    }

    /// transfer chunk size moved per tick.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// assemble the server. `control` and `data` are the two listening
    /// endpoints; both must already be bound.
    pub fn build<S, A, C, L>(
        self,
        storage: S,
        auth: A,
        clock: C,
        control: L,
        data: L,
    ) -> FtpServer<S, A, C, L>
    where
        S: Storage,
        A: Authenticator,
        C: Clock,
        L: Acceptor,
    {
        FtpServer::from_builder(self, storage, auth, clock, control, data)
    }
}
