use std::fmt::Write;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Port(pub u16);

impl Port {
    pub fn p1_p2(self) -> (u8, u8) {
        let p1 = (self.0 >> 8) as u8;
        let p2 = (self.0 & 0xFF) as u8;
        (p1, p2)
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyCode {
    OpeningDataConnection = 150,
    Ok = 200,
    FileStatus = 213,
    ClosingControlConnection = 221,
    ClosingDataConnectionSuccessful = 226,
    UserLoggedIn = 230,
    FileActionOk = 250,
    PathnameCreated = 257,
    NeedPassword = 331,
    FileActionPending = 350,
    CantOpenDataConnection = 425,
    TransferAborted = 426,
    FileActionNotTaken = 450,
    LocalError = 451,
    CommandUnrecognized = 500,
    SyntaxError = 501,
    BadSequence = 503,
    ParameterNotImplemented = 504,
    NotLoggedIn = 530,
    FileUnavailable = 550,
    FilenameNotAllowed = 553,
}

/// a reply line (or block) on the control connection.
#[repr(u16)]
#[derive(Debug, Clone, PartialEq, Eq, strum_macros::EnumDiscriminants)]
pub enum Reply {
    Simple(ReplyCode, String) = 0,
    Welcome(String) = 220,
    SystemType(String) = 215,
    EnteringPassiveMode(Ipv4Addr, Port) = 227,
    CurrentDirectory(String) = 257,
    /// the two-line 150 block sent when a RETR transfer starts.
    DownloadStarting(u64) = 150,
    Features(&'static [&'static str]) = 211,
}

impl Reply {
    pub fn simple(code: ReplyCode, msg: impl Into<String>) -> Self {
        Reply::Simple(code, msg.into())
    }

    pub fn code(&self) -> u16 {
        match self {
            Reply::Simple(code, _) => *code as u16,
            _ => ReplyDiscriminants::from(self) as u16,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::new();

        match self {
            Reply::Simple(code, msg) => {
                let _ = write!(out, "{} {}\r\n", *code as u16, msg);
            }

            Reply::Welcome(msg) => {
                let _ = write!(out, "220 {}\r\n", msg);
            }

            Reply::SystemType(msg) => {
                let _ = write!(out, "215 {}\r\n", msg);
            }

            Reply::EnteringPassiveMode(ip, port) => {
                let octets = ip.octets();
                let (p1, p2) = port.p1_p2();
                let _ = write!(
                    out,
                    "227 Entering Passive Mode ({},{},{},{},{},{}).\r\n",
                    octets[0], octets[1], octets[2], octets[3], p1, p2
                );
            }

            Reply::CurrentDirectory(path) => {
                let path = path.replace('"', r#"\""#);
                let _ = write!(out, "257 \"{}\" is your current directory\r\n", path);
            }

            Reply::DownloadStarting(size) => {
                let _ = write!(
                    out,
                    "150-Data connection established\r\n150 {} bytes to download\r\n",
                    size
                );
            }

            Reply::Features(exts) => {
                let _ = write!(out, "211-Extensions supported:\r\n");
                for ext in *exts {
                    let _ = write!(out, " {}\r\n", ext);
                }
                let _ = write!(out, "211 End.\r\n");
            }
        }

        out.into_bytes()
    }
}
