//! the session state machine: one control connection at a time, a passive
//! data channel negotiated per transfer, and chunked uploads/downloads, all
//! driven by an external loop calling [`FtpServer::tick`].

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::builder::FtpBuilder;
use crate::code::{Port, Reply, ReplyCode};
use crate::command::{Command, LineEvent, LineReader, Verb};
use crate::handler::{Acceptor, Authenticator, Clock, Conn, Storage};

static FEATURES: &[&str] = &["MLSD", "MDTM", "SIZE"];

/// how often the bounded data-connection wait re-polls the acceptor.
const DATA_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("control listener error: {0}")]
    Accept(#[source] io::Error),
}

/// where the session is in the login/command sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    AwaitingUser,
    AwaitingPass,
    Serving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferState {
    Idle,
    Retrieving,
    Storing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    /// orderly teardown: goodbye reply, then close.
    Quit,
    /// the peer is gone; tear down without writing anything.
    Disconnected,
}

#[derive(Clone, Copy)]
enum Listing {
    Long,
    Names,
    Machine,
}

/// everything owned by one accepted control connection. dropped wholesale on
/// teardown, which releases the file handle and data connection with it.
struct Session<F, D> {
    conn: D,
    reader: LineReader,
    state: SessionState,
    cwd: PathBuf,
    rename_from: Option<PathBuf>,
    transfer: TransferState,
    file: Option<F>,
    data: Option<D>,
    deadline: Instant,
    buf: Vec<u8>,
    bytes_moved: u64,
    started: Instant,
}

impl<F, D: Conn> Session<F, D> {
    fn new(conn: D, config: &FtpBuilder, now: Instant) -> Self {
        Self {
            conn,
            reader: LineReader::new(config.max_line),
            state: SessionState::AwaitingUser,
            cwd: PathBuf::from("/"),
            rename_from: None,
            transfer: TransferState::Idle,
            file: None,
            data: None,
            deadline: now + config.auth_timeout,
            buf: vec![0; config.chunk_size],
            bytes_moved: 0,
            started: now,
        }
    }

    /// write a reply to the control connection. a failed write means the
    /// peer is gone; the connection is closed and the next tick tears the
    /// session down.
    fn reply(&mut self, reply: Reply) {
        if self.conn.write_all(&reply.to_bytes()).is_err() {
            self.conn.close();
        }
    }

    fn reply_simple(&mut self, code: ReplyCode, msg: impl Into<String>) {
        self.reply(Reply::simple(code, msg));
    }

    fn data_live(&self) -> bool {
        self.data.as_ref().is_some_and(Conn::is_connected)
    }

    fn close_data(&mut self) {
        if let Some(mut data) = self.data.take() {
            data.close();
        }
    }
}

/// single-session FTP server. generic over storage, authentication, clock
/// and the listening endpoints; see the crate docs for the tick contract.
pub struct FtpServer<S, A, C, L>
where
    S: Storage,
    A: Authenticator,
    C: Clock,
    L: Acceptor,
{
    storage: S,
    auth: A,
    clock: C,
    control: L,
    data_acceptor: L,
    config: FtpBuilder,
    session: Option<Session<S::File, L::Conn>>,
}

impl<S, A, C, L> FtpServer<S, A, C, L>
where
    S: Storage,
    A: Authenticator,
    C: Clock,
    L: Acceptor,
{
    pub(crate) fn from_builder(
        config: FtpBuilder,
        storage: S,
        auth: A,
        clock: C,
        control: L,
        data_acceptor: L,
    ) -> Self {
        Self {
            storage,
            auth,
            clock,
            control,
            data_acceptor,
            config,
            session: None,
        }
    }

    /// advance the server by one step: accept a connection if none is
    /// active, otherwise parse at most one command and advance any running
    /// transfer by one chunk.
    pub fn tick(&mut self) -> Result<(), ServeError> {
        let Some(mut session) = self.session.take() else {
            if let Some(mut conn) = self.control.poll_accept().map_err(ServeError::Accept)? {
                tracing::info!("client connected");
                let greeting = Reply::Welcome(self.config.welcome.clone());
                if conn.write_all(&greeting.to_bytes()).is_ok() {
                    self.session = Some(Session::new(conn, &self.config, self.clock.now()));
                }
            }
            return Ok(());
        };

        match self.drive(&mut session) {
            Flow::Continue => self.session = Some(session),
            Flow::Quit => self.teardown(session, true),
            Flow::Disconnected => self.teardown(session, false),
        }

        Ok(())
    }

    fn drive(&mut self, s: &mut Session<S::File, L::Conn>) -> Flow {
        match self.read_line(s) {
            Some(LineEvent::Command(cmd)) => {
                tracing::debug!(token = %cmd.token, params = %cmd.params, "received command");
                let flow = match s.state {
                    SessionState::AwaitingUser => {
                        self.user_identity(s, &cmd);
                        Flow::Continue
                    }
                    SessionState::AwaitingPass => {
                        self.user_password(s, &cmd);
                        Flow::Continue
                    }
                    SessionState::Serving => {
                        let flow = self.dispatch(s, &cmd);
                        if flow == Flow::Continue {
                            s.deadline = self.clock.now() + self.config.idle_timeout;
                        }
                        flow
                    }
                };
                if flow != Flow::Continue {
                    return flow;
                }
            }
            Some(LineEvent::SyntaxError) => {
                s.reply_simple(ReplyCode::CommandUnrecognized, "Syntax error");
            }
            Some(LineEvent::Empty) => {}
            None => {
                if !s.conn.is_connected() {
                    tracing::info!("client disconnected");
                    return Flow::Disconnected;
                }
            }
        }

        if s.transfer != TransferState::Idle {
            // a transfer making progress counts as activity
            s.deadline = self.clock.now() + self.config.idle_timeout;
            self.drive_transfer(s);
        } else if self.clock.now() >= s.deadline {
            tracing::info!("client timeout");
            s.reply_simple(ReplyCode::NotLoggedIn, "Timeout");
            return Flow::Quit;
        }

        Flow::Continue
    }

    /// pull bytes off the control connection until a line event or nothing
    /// is left to read. at most one command is produced per tick.
    fn read_line(&mut self, s: &mut Session<S::File, L::Conn>) -> Option<LineEvent> {
        let mut byte = [0u8; 1];
        loop {
            match s.conn.poll_read(&mut byte) {
                Ok(0) => return None,
                Ok(_) => {
                    if let Some(event) = s.reader.push(byte[0]) {
                        return Some(event);
                    }
                }
                Err(_) => {
                    s.conn.close();
                    return None;
                }
            }
        }
    }

    fn user_identity(&mut self, s: &mut Session<S::File, L::Conn>, cmd: &Command) {
        if cmd.verb != Some(Verb::User) {
            s.reply_simple(ReplyCode::CommandUnrecognized, "Expect authentication");
        } else if !self.auth.set_user(&cmd.params) {
            tracing::warn!(user = %cmd.params, "unknown user");
            s.reply_simple(ReplyCode::NotLoggedIn, "User not found");
        } else {
            tracing::info!(user = %cmd.params, "logging on user");
            s.reply_simple(ReplyCode::NeedPassword, "OK. Password required");
            s.state = SessionState::AwaitingPass;
        }
    }

    fn user_password(&mut self, s: &mut Session<S::File, L::Conn>, cmd: &Command) {
        if cmd.verb != Some(Verb::Pass) {
            s.reply_simple(ReplyCode::CommandUnrecognized, "Expect authentication");
        } else if !self.auth.check_pass(&cmd.params) {
            tracing::warn!("incorrect password");
            s.reply_simple(ReplyCode::NotLoggedIn, "Incorrect password");
        } else {
            tracing::info!("user logged in, waiting for commands");
            s.reply_simple(ReplyCode::UserLoggedIn, "OK. Authenticated");
            s.state = SessionState::Serving;
            s.deadline = self.clock.now() + self.config.idle_timeout;
        }
    }

    fn dispatch(&mut self, s: &mut Session<S::File, L::Conn>, cmd: &Command) -> Flow {
        let params = cmd.params.as_str();

        match cmd.verb {
            Some(Verb::Cdup) => {
                s.cwd.pop();
                let msg = format!("Ok. Current directory is {}", s.cwd.display());
                s.reply_simple(ReplyCode::FileActionOk, msg);
            }

            Some(Verb::Cwd) => {
                if params == "." {
                    // `CWD .` doubles as PWD
                    s.reply(Reply::CurrentDirectory(s.cwd.display().to_string()));
                } else {
                    let target = resolve(&s.cwd, params);
                    // an empty parameter would resolve to the cwd itself;
                    // it names nothing, so it is not found
                    let is_dir = !params.is_empty()
                        && self
                            .storage
                            .metadata(&target)
                            .map(|m| m.is_dir)
                            .unwrap_or(false);
                    if is_dir {
                        s.cwd = target;
                        let msg = format!("Ok. Current directory is {}", s.cwd.display());
                        s.reply_simple(ReplyCode::FileActionOk, msg);
                    } else {
                        let msg = format!("Directory \"{}\" not found", params);
                        s.reply_simple(ReplyCode::FileUnavailable, msg);
                    }
                }
            }

            Some(Verb::Pwd) => {
                s.reply(Reply::CurrentDirectory(s.cwd.display().to_string()));
            }

            Some(Verb::Quit) => return Flow::Quit,

            Some(Verb::Mode) => {
                if params == "S" {
                    s.reply_simple(ReplyCode::Ok, "S Ok");
                } else {
                    s.reply_simple(
                        ReplyCode::ParameterNotImplemented,
                        "Only S(tream) mode is supported",
                    );
                }
            }

            Some(Verb::Stru) => {
                if params == "F" {
                    s.reply_simple(ReplyCode::Ok, "F Ok");
                } else {
                    s.reply_simple(
                        ReplyCode::ParameterNotImplemented,
                        "Only F(ile) structure is supported",
                    );
                }
            }

            Some(Verb::Type) => match params {
                "A" => s.reply_simple(ReplyCode::Ok, "TYPE is now ASCII"),
                "I" => s.reply_simple(ReplyCode::Ok, "TYPE is now 8-bit binary"),
                _ => s.reply_simple(ReplyCode::ParameterNotImplemented, "Unknown TYPE"),
            },

            Some(Verb::Pasv) => {
                s.close_data();
                s.reply(Reply::EnteringPassiveMode(
                    self.config.passive_addr,
                    Port(self.config.passive_port),
                ));
            }

            Some(Verb::Abor) => {
                self.abort_transfer(s);
                s.reply_simple(
                    ReplyCode::ClosingDataConnectionSuccessful,
                    "Data connection closed",
                );
            }

            Some(Verb::Dele) => {
                if params.is_empty() {
                    s.reply_simple(ReplyCode::SyntaxError, "No file name");
                } else {
                    let path = resolve(&s.cwd, params);
                    if self.storage.remove_file(&path).is_ok() {
                        tracing::info!(path = %path.display(), "deleted file");
                        s.reply_simple(ReplyCode::FileActionOk, format!("Deleted {}", params));
                    } else {
                        s.reply_simple(
                            ReplyCode::FileActionNotTaken,
                            format!("Can't delete {}", params),
                        );
                    }
                }
            }

            Some(Verb::List) => self.send_listing(s, Listing::Long),
            Some(Verb::Nlst) => self.send_listing(s, Listing::Names),
            Some(Verb::Mlsd) => self.send_listing(s, Listing::Machine),

            Some(Verb::Noop) => s.reply_simple(ReplyCode::Ok, "Zzz..."),

            Some(Verb::Syst) => s.reply(Reply::SystemType("UNIX Type: L8".to_string())),

            Some(Verb::Retr) => self.start_retrieve(s, params),
            Some(Verb::Stor) => self.start_store(s, params),

            Some(Verb::Mkd) => {
                let path = resolve(&s.cwd, params);
                if self.storage.create_dir(&path).is_ok() {
                    s.reply_simple(
                        ReplyCode::PathnameCreated,
                        format!("Create directory {}", params),
                    );
                } else {
                    s.reply_simple(ReplyCode::FileUnavailable, "Failed to create directory");
                }
            }

            Some(Verb::Rmd) => {
                let path = resolve(&s.cwd, params);
                if self.storage.remove_dir(&path).is_ok() {
                    s.reply_simple(
                        ReplyCode::FileActionOk,
                        format!("Removed Directory {}", params),
                    );
                } else {
                    s.reply_simple(ReplyCode::FileUnavailable, "Failed to remove directory");
                }
            }

            Some(Verb::Rnfr) => {
                if params.is_empty() {
                    s.reply_simple(ReplyCode::SyntaxError, "No file name");
                } else {
                    let from = resolve(&s.cwd, params);
                    if self.storage.exists(&from) {
                        tracing::debug!(from = %from.display(), "rename source accepted");
                        s.rename_from = Some(from);
                        s.reply_simple(
                            ReplyCode::FileActionPending,
                            "RNFR accepted - file exists, ready for destination",
                        );
                    } else {
                        s.rename_from = None;
                        s.reply_simple(
                            ReplyCode::FileUnavailable,
                            format!("File {} not found", params),
                        );
                    }
                }
            }

            Some(Verb::Rnto) => {
                // the pending source is spent by this command no matter how
                // it turns out
                let pending = s.rename_from.take();
                if params.is_empty() {
                    s.reply_simple(ReplyCode::SyntaxError, "No file name");
                } else {
                    match pending {
                        None => s.reply_simple(ReplyCode::BadSequence, "Need RNFR before RNTO"),
                        Some(from) => {
                            let to = resolve(&s.cwd, params);
                            if self.storage.exists(&to) {
                                s.reply_simple(
                                    ReplyCode::FilenameNotAllowed,
                                    "Target file/directory exists",
                                );
                            } else if self.storage.rename(&from, &to).is_ok() {
                                tracing::info!(
                                    from = %from.display(),
                                    to = %to.display(),
                                    "renamed"
                                );
                                s.reply_simple(
                                    ReplyCode::FileActionOk,
                                    "File successfully renamed or moved",
                                );
                            } else {
                                s.reply_simple(ReplyCode::FileUnavailable, "Rename/move failure");
                            }
                        }
                    }
                }
            }

            Some(Verb::Feat) => s.reply(Reply::Features(FEATURES)),

            Some(Verb::Mdtm) => {
                if params.is_empty() {
                    s.reply_simple(ReplyCode::SyntaxError, "No file name");
                } else {
                    let path = resolve(&s.cwd, params);
                    match self.storage.metadata(&path) {
                        Ok(meta) => {
                            let stamp = meta.modified.format("%Y%m%d%H%M%S").to_string();
                            s.reply_simple(ReplyCode::FileStatus, stamp);
                        }
                        Err(_) => s.reply_simple(
                            ReplyCode::FileUnavailable,
                            format!("File {} not found", params),
                        ),
                    }
                }
            }

            Some(Verb::Size) => {
                if params.is_empty() {
                    s.reply_simple(ReplyCode::SyntaxError, "No file name");
                } else {
                    let path = resolve(&s.cwd, params);
                    match self.storage.metadata(&path) {
                        Ok(meta) => {
                            s.reply_simple(ReplyCode::FileStatus, meta.size.to_string());
                        }
                        Err(_) => s.reply_simple(
                            ReplyCode::FileUnavailable,
                            format!("File {} not found", params),
                        ),
                    }
                }
            }

            // USER and PASS have no meaning once logged in
            Some(Verb::User) | Some(Verb::Pass) | None => {
                s.reply_simple(ReplyCode::CommandUnrecognized, "Unknown command");
            }
        }

        Flow::Continue
    }

    /// stream the working directory over a fresh data connection in the
    /// requested format, then report the match count on the control channel.
    fn send_listing(&mut self, s: &mut Session<S::File, L::Conn>, kind: Listing) {
        if !self.data_connect(s) {
            let msg = match kind {
                Listing::Machine => "No data connection MLSD",
                _ => "No data connection",
            };
            s.reply_simple(ReplyCode::CantOpenDataConnection, msg);
            return;
        }

        s.reply_simple(ReplyCode::OpeningDataConnection, "Accepted data connection");

        let entries = self.storage.list_dir(&s.cwd).unwrap_or_default();
        let mut matches = 0usize;
        if let Some(data) = s.data.as_mut() {
            for entry in &entries {
                let line = match kind {
                    Listing::Long => entry.to_string(),
                    Listing::Names => entry.name.clone(),
                    Listing::Machine => entry.mlsd_line(),
                };
                let _ = data.write_all(line.as_bytes());
                let _ = data.write_all(b"\r\n");
                matches += 1;
            }
        }

        s.reply_simple(
            ReplyCode::ClosingDataConnectionSuccessful,
            format!("{} matches total", matches),
        );
        s.close_data();
    }

    fn start_retrieve(&mut self, s: &mut Session<S::File, L::Conn>, params: &str) {
        if params.is_empty() {
            s.reply_simple(ReplyCode::SyntaxError, "No file name");
            return;
        }

        let path = resolve(&s.cwd, params);
        let size = match self.storage.metadata(&path) {
            Ok(meta) if !meta.is_dir => meta.size,
            _ => {
                s.reply_simple(
                    ReplyCode::FileUnavailable,
                    format!("File {} not found", params),
                );
                return;
            }
        };
        let file = match self.storage.open_read(&path) {
            Ok(file) => file,
            Err(_) => {
                s.reply_simple(
                    ReplyCode::FileUnavailable,
                    format!("File {} not found", params),
                );
                return;
            }
        };

        if !self.data_connect(s) {
            s.reply_simple(ReplyCode::CantOpenDataConnection, "No data connection");
            return;
        }

        tracing::info!(path = %path.display(), size, "sending file");
        s.file = Some(file);
        s.bytes_moved = 0;
        s.started = self.clock.now();
        s.transfer = TransferState::Retrieving;
        s.reply(Reply::DownloadStarting(size));
    }

    fn start_store(&mut self, s: &mut Session<S::File, L::Conn>, params: &str) {
        if params.is_empty() {
            s.reply_simple(ReplyCode::SyntaxError, "No file name");
            return;
        }

        let path = resolve(&s.cwd, params);
        let file = match self.storage.open_write(&path) {
            Ok(file) => file,
            Err(_) => {
                s.reply_simple(
                    ReplyCode::LocalError,
                    format!("Can't open/create {}", params),
                );
                return;
            }
        };

        if !self.data_connect(s) {
            s.reply_simple(ReplyCode::CantOpenDataConnection, "No data connection");
            return;
        }

        tracing::info!(path = %path.display(), "receiving file");
        s.file = Some(file);
        s.bytes_moved = 0;
        s.started = self.clock.now();
        s.transfer = TransferState::Storing;
        s.reply_simple(ReplyCode::OpeningDataConnection, "Data connection established");
    }

    /// wait (bounded) for the client to open its side of the passive data
    /// channel. any stale connection is discarded first. this is the only
    /// place the tick loop may block, for at most the configured timeout.
    fn data_connect(&mut self, s: &mut Session<S::File, L::Conn>) -> bool {
        s.close_data();

        let deadline = self.clock.now() + self.config.data_timeout;
        loop {
            match self.data_acceptor.poll_accept() {
                Ok(Some(conn)) => {
                    tracing::debug!("data connection accepted");
                    s.data = Some(conn);
                    return true;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "data listener failure");
                    return false;
                }
            }
            if self.clock.now() >= deadline {
                return false;
            }
            self.clock.sleep(DATA_POLL_INTERVAL);
        }
    }

    /// move at most one chunk. called exactly once per tick while a
    /// transfer is active, independent of command intake.
    fn drive_transfer(&mut self, s: &mut Session<S::File, L::Conn>) {
        match s.transfer {
            TransferState::Idle => {}

            TransferState::Retrieving => {
                if s.data_live() {
                    let n = match s.file.as_mut() {
                        Some(file) => file.read(&mut s.buf).unwrap_or(0),
                        None => 0,
                    };
                    if n > 0 {
                        if let Some(data) = s.data.as_mut() {
                            let _ = data.write_all(&s.buf[..n]);
                        }
                        s.bytes_moved += n as u64;
                        return;
                    }
                }
                // end of file, read fault or peer gone: all finalize alike
                self.close_transfer(s);
            }

            TransferState::Storing => {
                if s.data_live() {
                    let n = match s.data.as_mut() {
                        Some(data) => match data.poll_read(&mut s.buf) {
                            Ok(n) => n,
                            Err(_) => {
                                data.close();
                                0
                            }
                        },
                        None => 0,
                    };
                    if n > 0 {
                        if let Some(file) = s.file.as_mut() {
                            let _ = file.write_all(&s.buf[..n]);
                        }
                        s.bytes_moved += n as u64;
                    }
                    // uploads end when the peer closes the data connection
                    return;
                }
                self.close_transfer(s);
            }
        }
    }

    /// natural completion. note that a peer closing mid-transfer is
    /// indistinguishable from a finished one at this level, so 226 may be
    /// reported for a truncated file; clients cross-check with SIZE.
    fn close_transfer(&mut self, s: &mut Session<S::File, L::Conn>) {
        s.file = None;
        s.close_data();
        s.reply_simple(
            ReplyCode::ClosingDataConnectionSuccessful,
            "File successfully transferred",
        );
        s.transfer = TransferState::Idle;

        let elapsed = self.clock.now().duration_since(s.started);
        tracing::debug!(
            bytes = s.bytes_moved,
            seconds = elapsed.as_secs(),
            "transfer closed"
        );
    }

    /// release the file handle and data connection; safe to call when no
    /// transfer is running.
    fn abort_transfer(&mut self, s: &mut Session<S::File, L::Conn>) {
        if s.transfer != TransferState::Idle {
            s.file = None;
            s.close_data();
            s.reply_simple(ReplyCode::TransferAborted, "Transfer aborted");
            s.transfer = TransferState::Idle;
            tracing::warn!("transfer aborted");
        }
    }

    fn teardown(&mut self, mut s: Session<S::File, L::Conn>, polite: bool) {
        self.abort_transfer(&mut s);
        if polite {
            s.reply_simple(ReplyCode::ClosingControlConnection, "Goodbye");
        }
        s.conn.close();
        tracing::info!("session closed");
    }
}

/// relative parameters resolve against the working directory, absolute ones
/// bypass it.
fn resolve(cwd: &Path, param: &str) -> PathBuf {
    if param.starts_with('/') {
        PathBuf::from(param)
    } else {
        cwd.join(param)
    }
}
