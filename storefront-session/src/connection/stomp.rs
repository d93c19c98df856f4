//! Minimal STOMP 1.2 framing for the realtime broker.
//!
//! Only what the session layer needs: the CONNECT/DISCONNECT frames it sends
//! and parsing of whatever the broker sends back.

use std::fmt::Write as _;

use crate::error::ConnectionError;

pub const ACCEPT_VERSION: &str = "1.2";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// Session-opening frame carrying the bearer credential
    pub fn connect(host: &str, token: &str) -> Self {
        Self::new("CONNECT")
            .header("accept-version", ACCEPT_VERSION)
            .header("host", host)
            .header("heart-beat", "0,0")
            .header("Authorization", format!("Bearer {}", token))
    }

    pub fn disconnect() -> Self {
        Self::new("DISCONNECT")
    }

    /// First value for `name`; repeated headers keep the first occurrence
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn is(&self, command: &str) -> bool {
        self.command == command
    }

    /// Text shown for an ERROR frame
    pub fn error_message(&self) -> String {
        match (self.get("message"), self.body.trim()) {
            (Some(message), "") => message.to_string(),
            (Some(message), body) => format!("{}: {}", message, body),
            (None, "") => "broker refused the session".to_string(),
            (None, body) => body.to_string(),
        }
    }

    /// CONNECT and CONNECTED frames are sent without header escaping
    pub fn encode(&self) -> String {
        let raw = matches!(self.command.as_str(), "CONNECT" | "CONNECTED");
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(&self.command);
        out.push('\n');
        for (name, value) in &self.headers {
            if raw {
                let _ = writeln!(out, "{}:{}", name, value);
            } else {
                let _ = writeln!(out, "{}:{}", escape(name), escape(value));
            }
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse one frame. `Ok(None)` for a heart-beat.
    pub fn parse(text: &str) -> Result<Option<Self>, ConnectionError> {
        let text = text.trim_start_matches(['\r', '\n']);
        if text.is_empty() {
            return Ok(None);
        }
        let text = text.strip_suffix('\0').unwrap_or(text);

        let (head, body) = text
            .split_once("\n\n")
            .or_else(|| text.split_once("\r\n\r\n"))
            .unwrap_or((text, ""));
        let mut lines = head.lines();
        let command = lines
            .next()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ConnectionError::Transport("empty STOMP frame".to_string()))?;

        let raw = command == "CONNECTED";
        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line.split_once(':').ok_or_else(|| {
                ConnectionError::Transport(format!("malformed STOMP header: {}", line))
            })?;
            if raw {
                headers.push((name.to_string(), value.to_string()));
            } else {
                headers.push((unescape(name), unescape(value)));
            }
        }

        Ok(Some(Self {
            command: command.to_string(),
            headers,
            body: body.to_string(),
        }))
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
