//! Minimal blocking IMAP4rev1 client session.
//!
//! Covers only what the quiz source needs: LOGIN, SELECT, SEARCH, FETCH of a
//! full body with `BODY.PEEK[]`, and LOGOUT. Literals (`{n}\r\n<bytes>`) are
//! read by length so binary-ish bodies survive intact.

use std::io::{BufRead, BufReader, Read, Write};

use crate::error::SourceError;

/// Tagged completion status of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    No,
    Bad,
}

/// Everything the server sent back for one command.
#[derive(Debug, Clone)]
pub struct Response {
    /// Untagged and continuation lines, lossily decoded, without CRLF.
    pub lines: Vec<String>,
    /// Literal payloads in the order they appeared.
    pub literals: Vec<Vec<u8>>,
    pub status: Status,
    /// Text after the tagged status (e.g. `LOGIN completed`).
    pub text: String,
}

impl Response {
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

/// A session over any byte stream (TLS in production, in-memory in tests).
pub struct ImapSession<S: Read + Write> {
    reader: BufReader<S>,
    tag_counter: u32,
}

impl<S: Read + Write> ImapSession<S> {
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::new(stream),
            tag_counter: 0,
        }
    }

    /// Read the server greeting. `* OK` and `* PREAUTH` are accepted.
    pub fn read_greeting(&mut self) -> Result<String, SourceError> {
        let line = self.read_line()?;
        let text = String::from_utf8_lossy(&line).trim_end().to_string();
        if text.starts_with("* OK") || text.starts_with("* PREAUTH") {
            Ok(text)
        } else {
            Err(SourceError::Protocol(format!("unexpected greeting: {text}")))
        }
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<Response, SourceError> {
        self.command(&format!(
            "LOGIN {} {}",
            quote(username),
            quote(password)
        ))
    }

    pub fn select(&mut self, mailbox: &str) -> Result<Response, SourceError> {
        self.command(&format!("SELECT {}", quote(mailbox)))
    }

    /// Run `SEARCH <criterion>` and return the matching sequence numbers, ascending.
    pub fn search(&mut self, criterion: &str) -> Result<Vec<u32>, SourceError> {
        let resp = self.command(&format!("SEARCH {criterion}"))?;
        if !resp.is_ok() {
            return Err(SourceError::Protocol(format!("SEARCH failed: {}", resp.text)));
        }
        let mut ids: Vec<u32> = resp
            .lines
            .iter()
            .filter_map(|l| l.strip_prefix("* SEARCH"))
            .flat_map(|rest| rest.split_whitespace())
            .filter_map(|n| n.parse().ok())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    /// Fetch the full RFC 822 body of one message without setting `\Seen`.
    pub fn fetch_body(&mut self, seq: u32) -> Result<Option<Vec<u8>>, SourceError> {
        let resp = self.command(&format!("FETCH {seq} BODY.PEEK[]"))?;
        if !resp.is_ok() {
            return Err(SourceError::Protocol(format!(
                "FETCH {seq} failed: {}",
                resp.text
            )));
        }
        Ok(resp.literals.into_iter().next())
    }

    pub fn logout(&mut self) -> Result<(), SourceError> {
        self.command("LOGOUT").map(|_| ())
    }

    /// Send a tagged command and collect the response up to its tagged completion.
    pub fn command(&mut self, cmd: &str) -> Result<Response, SourceError> {
        self.tag_counter += 1;
        let tag = format!("A{}", self.tag_counter);

        let stream = self.reader.get_mut();
        stream
            .write_all(format!("{tag} {cmd}\r\n").as_bytes())
            .and_then(|_| stream.flush())
            .map_err(|e| SourceError::Protocol(format!("write failed: {e}")))?;

        let tag_prefix = format!("{tag} ");
        let mut lines = Vec::new();
        let mut literals = Vec::new();
        loop {
            let raw = self.read_line()?;
            let line = String::from_utf8_lossy(&raw).trim_end().to_string();

            if let Some(rest) = line.strip_prefix(&tag_prefix) {
                let (status, text) = parse_status(rest)?;
                return Ok(Response {
                    lines,
                    literals,
                    status,
                    text,
                });
            }

            if let Some(len) = literal_length(&line) {
                let mut buf = vec![0u8; len];
                self.reader
                    .read_exact(&mut buf)
                    .map_err(|e| SourceError::Protocol(format!("literal read failed: {e}")))?;
                literals.push(buf);
            }
            lines.push(line);
        }
    }

    fn read_line(&mut self) -> Result<Vec<u8>, SourceError> {
        let mut buf = Vec::new();
        let n = self
            .reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| SourceError::Protocol(format!("read failed: {e}")))?;
        if n == 0 {
            return Err(SourceError::Protocol("IMAP connection closed".into()));
        }
        Ok(buf)
    }
}

/// Quote a string argument, escaping `\` and `"`.
fn quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// `{123}` at the end of a line announces a literal of 123 bytes.
fn literal_length(line: &str) -> Option<usize> {
    let inner = line.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].trim_end_matches('+').parse().ok()
}

fn parse_status(rest: &str) -> Result<(Status, String), SourceError> {
    let mut parts = rest.splitn(2, ' ');
    let status = match parts.next().unwrap_or("").to_ascii_uppercase().as_str() {
        "OK" => Status::Ok,
        "NO" => Status::No,
        "BAD" => Status::Bad,
        other => {
            return Err(SourceError::Protocol(format!(
                "unknown completion status: {other}"
            )));
        }
    };
    Ok((status, parts.next().unwrap_or("").to_string()))
}
