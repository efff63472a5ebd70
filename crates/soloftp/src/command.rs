//! control-line assembly and the fixed four-letter command vocabulary.
//!
//! FTP verbs are at most four characters long, and the parser enforces that
//! limit instead of accepting arbitrary tokens: anything longer can never be
//! a supported command, so it is reported as a syntax error straight away.

use std::str::FromStr;

use strum_macros::EnumString;

/// every verb the dispatcher knows. parsing is done on the uppercased token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Verb {
    User,
    Pass,
    Cdup,
    Cwd,
    Pwd,
    Quit,
    Mode,
    Stru,
    Type,
    Pasv,
    Abor,
    Dele,
    Mkd,
    Rmd,
    Rnfr,
    Rnto,
    List,
    Nlst,
    Mlsd,
    Retr,
    Stor,
    Feat,
    Mdtm,
    Size,
    Noop,
    Syst,
}

/// one parsed command line. `verb` is `None` for well-formed lines whose
/// token is not in the supported vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub token: String,
    pub verb: Option<Verb>,
    pub params: String,
}

/// what a completed line turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// zero-length line; ignored upstream.
    Empty,
    /// line overflowed the buffer or the token exceeded four characters.
    SyntaxError,
    Command(Command),
}

/// accumulates bytes from the control connection into command lines.
///
/// backslashes are normalized to `/` as they arrive, CR is ignored and LF
/// terminates the line. on overflow the buffer is reset immediately, so the
/// tail of an oversized line starts a fresh one.
pub struct LineReader {
    buf: Vec<u8>,
    max: usize,
}

impl LineReader {
    pub fn new(max: usize) -> Self {
        Self {
            buf: Vec::with_capacity(max),
            max,
        }
    }

    /// feed one byte; returns an event once a full line has been seen (or
    /// the buffer overflowed).
    pub fn push(&mut self, byte: u8) -> Option<LineEvent> {
        let byte = if byte == b'\\' { b'/' } else { byte };

        match byte {
            b'\r' => None,
            b'\n' => {
                if self.buf.is_empty() {
                    return Some(LineEvent::Empty);
                }
                let line = std::mem::take(&mut self.buf);
                Some(parse_line(&line))
            }
            _ => {
                if self.buf.len() < self.max {
                    self.buf.push(byte);
                    None
                } else {
                    self.buf.clear();
                    Some(LineEvent::SyntaxError)
                }
            }
        }
    }
}

/// split a complete line into token and parameters.
///
/// the first space separates the token from the rest; a space further than
/// four characters in, or a spaceless line longer than four characters, is a
/// syntax error. extra spaces before the parameters are skipped.
fn parse_line(line: &[u8]) -> LineEvent {
    let line = String::from_utf8_lossy(line);

    let (token, params) = match line.find(' ') {
        Some(at) if at > 4 => return LineEvent::SyntaxError,
        Some(at) => (&line[..at], line[at + 1..].trim_start_matches(' ')),
        None if line.len() > 4 => return LineEvent::SyntaxError,
        None => (line.as_ref(), ""),
    };

    let token = token.to_ascii_uppercase();
    let verb = Verb::from_str(&token).ok();

    LineEvent::Command(Command {
        token,
        verb,
        params: params.to_string(),
    })
}
