use std::time::{Duration, Instant};
use std::{fmt, io, path::Path};

use chrono::{DateTime, Utc};

/// two-step credential check, one call per authentication exchange.
///
/// `set_user` is consulted for USER, `check_pass` for the following PASS.
/// implementations may keep state between the two calls (the server always
/// calls them in order for a given session).
pub trait Authenticator {
    fn set_user(&mut self, name: &str) -> bool;
    fn check_pass(&mut self, pass: &str) -> bool;
}

/// the built-in authenticator: accepts exactly the `anonymous` identity
/// with any password.
pub struct Anonymous;

impl Authenticator for Anonymous {
    fn set_user(&mut self, name: &str) -> bool {
        name == "anonymous"
    }

    fn check_pass(&mut self, _pass: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub is_dir: bool,
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub meta: Metadata,
}

impl DirEntry {
    /// RFC 3659 machine-parsable listing line (MLSD).
    pub fn mlsd_line(&self) -> String {
        format!(
            "Size={};Modify={};Type={}; {}",
            self.meta.size,
            self.meta.modified.format("%Y%m%d%H%M%S"),
            if self.meta.is_dir { "dir" } else { "file" },
            self.name
        )
    }
}

// Unix `ls -l`-style line for LIST. permissions and ownership are
// placeholders; clients only care about the leading type character.
impl fmt::Display for DirEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let perms = if self.meta.is_dir {
            "drwxr-xr-x"
        } else {
            "-rw-r--r--"
        };
        write!(
            f,
            "{} 1 root root {} {} {}",
            perms,
            self.meta.size,
            self.meta.modified.format("%b %d %Y"),
            self.name
        )
    }
}

/// hierarchical storage backend. paths are absolute virtual paths rooted at
/// `/`; the server resolves the working directory before calling in here.
pub trait Storage {
    type File: io::Read + io::Write;

    fn open_read(&mut self, path: &Path) -> io::Result<Self::File>;
    fn open_write(&mut self, path: &Path) -> io::Result<Self::File>;
    fn metadata(&mut self, path: &Path) -> io::Result<Metadata>;
    fn list_dir(&mut self, path: &Path) -> io::Result<Vec<DirEntry>>;
    fn create_dir(&mut self, path: &Path) -> io::Result<()>;
    fn remove_file(&mut self, path: &Path) -> io::Result<()>;
    fn remove_dir(&mut self, path: &Path) -> io::Result<()>;
    fn rename(&mut self, from: &Path, to: &Path) -> io::Result<()>;

    fn exists(&mut self, path: &Path) -> bool {
        self.metadata(path).is_ok()
    }
}

/// monotonic time source for the session deadlines and the bounded wait in
/// the passive-connection accept loop.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// a non-blocking byte stream: either the control connection or one data
/// connection.
pub trait Conn {
    /// read whatever is available right now; `Ok(0)` means no bytes yet.
    /// a peer that went away is reported through [`Conn::is_connected`].
    fn poll_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    fn is_connected(&self) -> bool;

    fn close(&mut self);
}

/// a listening endpoint handing out connections without blocking.
pub trait Acceptor {
    type Conn: Conn;

    fn poll_accept(&mut self) -> io::Result<Option<Self::Conn>>;
}
