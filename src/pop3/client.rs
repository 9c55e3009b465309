//! Blocking POP3 client: greeting, USER/PASS, STAT, LIST, RETR, DELE, QUIT.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;

use super::{Mailbox, MailboxStat, MessageRef, DEFAULT_PORT};
use crate::error::{Error, Result};

/// An open POP3 session over any byte stream.
///
/// Construct with [`Pop3Session::open`] for a TCP connection, or
/// [`Pop3Session::handshake`] over an existing stream.
pub struct Pop3Session<S: Read + Write> {
    reader: BufReader<S>,
    server: String,
    line: Vec<u8>,
    greeting: String,
}

impl Pop3Session<TcpStream> {
    /// Connect to `server` (`host` or `host:port`) and log in.
    ///
    /// If the server rejects the credentials, a QUIT is still sent before the
    /// `Auth` error is returned.
    pub fn open(server: &str, user: &str, password: &str) -> Result<Self> {
        let (host, port) = parse_server(server)?;
        tracing::debug!(host = %host, port, "Connecting to POP3 server");

        let stream =
            TcpStream::connect((host.as_str(), port)).map_err(|source| Error::Connection {
                host: server.to_string(),
                source,
            })?;

        let mut session = Self::handshake(stream, server)?;
        tracing::info!(greeting = %session.greeting(), "Server welcome message");

        if let Err(e) = session.login(user, password) {
            if let Err(quit_err) = session.quit() {
                tracing::debug!(error = %quit_err, "QUIT after failed login");
            }
            return Err(e);
        }
        tracing::debug!(server, user, "Logged in");
        Ok(session)
    }
}

impl<S: Read + Write> Pop3Session<S> {
    /// Wrap a connected stream and read the server greeting.
    pub fn handshake(stream: S, server: impl Into<String>) -> Result<Self> {
        let mut session = Self {
            reader: BufReader::new(stream),
            server: server.into(),
            line: Vec::with_capacity(512),
            greeting: String::new(),
        };
        let status = session.read_status("greeting")?;
        session.greeting = status;
        Ok(session)
    }

    /// Text of the `+OK` greeting, without the status indicator.
    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    /// USER then PASS. Any rejection is reported as [`Error::Auth`].
    pub fn login(&mut self, user: &str, password: &str) -> Result<()> {
        let to_auth = |e: Error| match e {
            Error::Protocol { command, response } => {
                Error::Auth(format!("{command} rejected: {response}"))
            }
            other => other,
        };
        self.command(&format!("USER {user}"), "USER")
            .map_err(to_auth)?;
        self.command(&format!("PASS {password}"), "PASS")
            .map_err(to_auth)?;
        Ok(())
    }

    /// Send one command and read its status line. Returns the text after `+OK`.
    fn command(&mut self, line: &str, name: &str) -> Result<String> {
        self.send(line, name)?;
        self.read_status(name)
    }

    fn send(&mut self, line: &str, name: &str) -> Result<()> {
        // Never echo credentials into the log.
        if name == "PASS" {
            tracing::trace!("C: PASS ****");
        } else {
            tracing::trace!("C: {line}");
        }
        let stream = self.reader.get_mut();
        let result = stream
            .write_all(line.as_bytes())
            .and_then(|()| stream.write_all(b"\r\n"))
            .and_then(|()| stream.flush());
        result.map_err(|source| self.connection_error(source))
    }

    fn read_status(&mut self, name: &str) -> Result<String> {
        let line = String::from_utf8_lossy(self.read_line()?).into_owned();
        tracing::trace!("S: {line}");
        match line.strip_prefix("+OK") {
            Some(rest) => Ok(rest.trim().to_string()),
            None => Err(Error::protocol(name, line)),
        }
    }

    /// Read one line, without its CRLF terminator.
    fn read_line(&mut self) -> Result<&[u8]> {
        self.line.clear();
        let n = match self.reader.read_until(b'\n', &mut self.line) {
            Ok(n) => n,
            Err(source) => return Err(self.connection_error(source)),
        };
        if n == 0 {
            return Err(Error::UnexpectedEof);
        }

        let mut end = self.line.len();
        if self.line[..end].ends_with(b"\n") {
            end -= 1;
        }
        if self.line[..end].ends_with(b"\r") {
            end -= 1;
        }
        Ok(&self.line[..end])
    }

    /// Read a multi-line response body up to the lone `.` terminator.
    ///
    /// Lines starting with `.` are byte-stuffed by the server; the first dot
    /// is removed. Lines are rejoined with CRLF.
    fn read_multiline(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let line = self.read_line()?;
            if line == b"." {
                break;
            }
            let line = line.strip_prefix(b".").unwrap_or(line);
            out.extend_from_slice(line);
            out.extend_from_slice(b"\r\n");
        }
        Ok(out)
    }

    fn connection_error(&self, source: std::io::Error) -> Error {
        Error::Connection {
            host: self.server.clone(),
            source,
        }
    }
}

impl<S: Read + Write> Mailbox for Pop3Session<S> {
    fn stat(&mut self) -> Result<MailboxStat> {
        let rest = self.command("STAT", "STAT")?;
        let mut parts = rest.split_whitespace();
        let count = parts.next().and_then(|s| s.parse().ok());
        let total_size = parts.next().and_then(|s| s.parse().ok());
        match (count, total_size) {
            (Some(count), Some(total_size)) => Ok(MailboxStat { count, total_size }),
            _ => Err(Error::protocol("STAT", format!("malformed response '+OK {rest}'"))),
        }
    }

    fn list(&mut self) -> Result<Vec<MessageRef>> {
        self.command("LIST", "LIST")?;
        let body = self.read_multiline()?;

        let mut entries = Vec::new();
        for line in String::from_utf8_lossy(&body).lines() {
            let mut sp = line.split_whitespace();
            let number = sp.next().and_then(|s| s.parse::<u32>().ok());
            let size = sp.next().and_then(|s| s.parse::<u64>().ok());
            match (number, size) {
                (Some(number), Some(size)) if number > 0 => {
                    entries.push(MessageRef { number, size });
                }
                _ => tracing::warn!(line, "Ignoring malformed LIST entry"),
            }
        }
        Ok(entries)
    }

    fn retrieve(&mut self, number: u32) -> Result<Vec<u8>> {
        self.command(&format!("RETR {number}"), "RETR")?;
        self.read_multiline()
    }

    fn delete(&mut self, number: u32) -> Result<()> {
        self.command(&format!("DELE {number}"), "DELE")?;
        Ok(())
    }

    fn quit(mut self) -> Result<()> {
        self.command("QUIT", "QUIT")?;
        Ok(())
    }
}

/// Split `host[:port]` (or `[v6addr][:port]`) into host and port.
pub fn parse_server(server: &str) -> Result<(String, u16)> {
    let parse_port = |p: &str| {
        p.parse::<u16>()
            .map_err(|_| Error::InvalidConfig(format!("invalid port in mailserver '{server}'")))
    };

    if let Some(rest) = server.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| Error::InvalidConfig(format!("unterminated '[' in '{server}'")))?;
        let port = match tail.strip_prefix(':') {
            Some(p) => parse_port(p)?,
            None if tail.is_empty() => DEFAULT_PORT,
            None => {
                return Err(Error::InvalidConfig(format!(
                    "unexpected text after ']' in '{server}'"
                )))
            }
        };
        return Ok((host.to_string(), port));
    }

    match server.split_once(':') {
        Some((host, port)) if !port.contains(':') => Ok((host.to_string(), parse_port(port)?)),
        // Bare IPv6 address without brackets.
        _ => Ok((server.to_string(), DEFAULT_PORT)),
    }
}
