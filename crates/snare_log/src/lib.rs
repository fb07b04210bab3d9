#![forbid(unsafe_code)]
// Allow pedantic lints for early-stage API ergonomics.
#![allow(clippy::nursery)]
#![allow(clippy::pedantic)]

//! # Snare Log
//!
//! The credential log used by the snare SSH decoy.
//!
//! Every captured authentication attempt becomes exactly one line in an
//! append-only destination (a file or stdout). Three line formats are
//! supported:
//!
//! - **Json**: one JSON object per line (default)
//! - **Pretty**: human-readable output, colored when stdout is a terminal
//! - **Text**: plain `key=value` pairs (logfmt)
//!
//! ## Example
//!
//! ```rust
//! use chrono::Utc;
//! use snare_log::{CredentialLog, Format, Record};
//!
//! let log = CredentialLog::with_writer(Vec::new(), Format::Json);
//! log.record(&Record {
//!     time: Utc::now(),
//!     remote_addr: "203.0.113.7:51234",
//!     username: "root",
//!     password: "hunter2",
//! })
//! .unwrap();
//! ```

use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use colored::Colorize;
use serde::Serialize;
use thiserror::Error;

/// Line format of the credential log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// One JSON object per line (default).
    #[default]
    Json,
    /// Colored, human-readable output.
    Pretty,
    /// Plain logfmt `key=value` output.
    Text,
}

impl Format {
    /// Returns the canonical lowercase name of the format.
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Pretty => "pretty",
            Format::Text => "text",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Format {
    type Err = ParseFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Format::Json),
            "pretty" => Ok(Format::Pretty),
            "text" => Ok(Format::Text),
            _ => Err(ParseFormatError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown log format name.
///
/// Accepted names (case-insensitive) are `"json"`, `"pretty"` and `"text"`.
///
/// ```rust
/// use snare_log::Format;
/// use std::str::FromStr;
///
/// assert!(Format::from_str("JSON").is_ok());
/// assert!(Format::from_str("xml").is_err());
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid log format: {0:?} (expected json, pretty or text)")]
pub struct ParseFormatError(String);

impl ParseFormatError {
    /// Returns the rejected input.
    pub fn input(&self) -> &str {
        &self.0
    }
}

/// Standard keys used in credential records.
pub mod keys {
    /// Key for timestamp.
    pub const TIMESTAMP: &str = "time";
    /// Key for level.
    pub const LEVEL: &str = "level";
    /// Key for the emitting component.
    pub const COMPONENT: &str = "component";
    /// Key for the event kind.
    pub const EVENT: &str = "event";
    /// Key for the client address.
    pub const REMOTE_ADDR: &str = "remote_addr";
    /// Key for the submitted username.
    pub const USERNAME: &str = "username";
    /// Key for the submitted password.
    pub const PASSWORD: &str = "password";
    /// Key for message.
    pub const MESSAGE: &str = "msg";
}

/// Fixed values stamped on every record.
pub const LEVEL: &str = "info";
/// Component name stamped on every record.
pub const COMPONENT: &str = "auth";
/// Event name stamped on every record.
pub const EVENT: &str = "auth_attempt";
/// Human-readable message stamped on every record.
pub const MESSAGE: &str = "authentication attempt";

/// Where credential records are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Process standard output.
    Stdout,
    /// A file, opened in append mode and created if missing.
    File(PathBuf),
}

impl Output {
    /// Interprets a configured destination. The literal `stdout` selects the
    /// console; anything else is a file path.
    pub fn from_spec(spec: impl AsRef<str>) -> Self {
        let spec = spec.as_ref();
        if spec.eq_ignore_ascii_case("stdout") {
            Output::Stdout
        } else {
            Output::File(PathBuf::from(spec))
        }
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Stdout => f.write_str("stdout"),
            Output::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// One captured attempt, borrowed for the duration of a write.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    /// Server-side capture time.
    pub time: DateTime<Utc>,
    /// Client `host:port`.
    pub remote_addr: &'a str,
    /// Username exactly as submitted.
    pub username: &'a str,
    /// Password exactly as submitted.
    pub password: &'a str,
}

/// Callback invoked when a record cannot be written.
///
/// The failed write still returns its error to the caller; the handler is an
/// additional hook for alerting.
pub type ErrorHandler = Arc<dyn Fn(&io::Error) + Send + Sync>;

struct LogInner {
    writer: Box<dyn Write + Send>,
    format: Format,
    color: bool,
    error_handler: Option<ErrorHandler>,
    has_warned_io_failure: bool,
}

/// Append-only credential log.
///
/// Cloning is cheap and every clone writes to the same destination. Writes
/// are serialized, so concurrent callers never interleave within a line.
pub struct CredentialLog {
    inner: Arc<Mutex<LogInner>>,
    output: Output,
}

impl Clone for CredentialLog {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            output: self.output.clone(),
        }
    }
}

impl fmt::Debug for CredentialLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("CredentialLog")
            .field("output", &self.output)
            .field("format", &inner.format)
            .field("color", &inner.color)
            .finish()
    }
}

impl CredentialLog {
    /// Opens the configured destination.
    ///
    /// # Errors
    ///
    /// Returns an error if a file destination cannot be opened for appending.
    pub fn open(output: Output, format: Format) -> io::Result<Self> {
        let writer: Box<dyn Write + Send> = match &output {
            Output::Stdout => Box::new(io::stdout()),
            Output::File(path) => Box::new(open_append(path)?),
        };
        let color = default_color(&output, format, io::stdout().is_terminal());
        Ok(Self::from_parts(writer, format, color, output))
    }

    /// Creates a log over an arbitrary writer. Colors are off.
    pub fn with_writer<W>(writer: W, format: Format) -> Self
    where
        W: Write + Send + 'static,
    {
        Self::from_parts(Box::new(writer), format, false, Output::Stdout)
    }

    fn from_parts(
        writer: Box<dyn Write + Send>,
        format: Format,
        color: bool,
        output: Output,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LogInner {
                writer,
                format,
                color,
                error_handler: None,
                has_warned_io_failure: false,
            })),
            output,
        }
    }

    /// Enables or disables ANSI colors for the pretty format.
    #[must_use]
    pub fn with_color(self, color: bool) -> Self {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.color = color;
        drop(inner);
        self
    }

    /// Installs a callback for write failures.
    #[must_use]
    pub fn with_error_handler<F>(self, handler: F) -> Self
    where
        F: Fn(&io::Error) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.error_handler = Some(Arc::new(handler));
        drop(inner);
        self
    }

    /// Returns the destination this log writes to.
    pub fn output(&self) -> &Output {
        &self.output
    }

    /// Returns the line format.
    pub fn format(&self) -> Format {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).format
    }

    /// Writes one record as a single line and flushes it.
    ///
    /// Format and write happen under one lock so each record lands whole.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the line cannot be written or
    /// flushed.
    pub fn record(&self, record: &Record<'_>) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let line = match inner.format {
            Format::Json => format_json(record)?,
            Format::Pretty => format_pretty(record, inner.color),
            Format::Text => format_text(record),
        };

        let result = inner
            .writer
            .write_all(line.as_bytes())
            .and_then(|()| inner.writer.flush());

        if let Err(ref e) = result {
            if let Some(ref handler) = inner.error_handler {
                let handler = Arc::clone(handler);
                drop(inner);
                handler(e);
            } else if !inner.has_warned_io_failure {
                inner.has_warned_io_failure = true;
                drop(inner);
                let _ = io::stderr().write_all(format!("snare_log: write failed: {e}\n").as_bytes());
            }
        }

        result
    }
}

fn open_append(path: &Path) -> io::Result<std::fs::File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// RFC 3339 capture time in UTC, second precision.
pub fn format_timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Serialize)]
struct JsonLine<'a> {
    time: String,
    level: &'static str,
    component: &'static str,
    event: &'static str,
    remote_addr: &'a str,
    username: &'a str,
    password: &'a str,
    #[serde(rename = "msg")]
    message: &'static str,
}

fn format_json(record: &Record<'_>) -> io::Result<String> {
    let line = JsonLine {
        time: format_timestamp(&record.time),
        level: LEVEL,
        component: COMPONENT,
        event: EVENT,
        remote_addr: record.remote_addr,
        username: record.username,
        password: record.password,
        message: MESSAGE,
    };
    let mut out = serde_json::to_string(&line).map_err(io::Error::other)?;
    out.push('\n');
    Ok(out)
}

fn format_text(record: &Record<'_>) -> String {
    let mut output = String::new();
    let mut first = true;
    let time = format_timestamp(&record.time);

    write_logfmt_field(&mut output, keys::TIMESTAMP, &time, &mut first);
    write_logfmt_field(&mut output, keys::LEVEL, LEVEL, &mut first);
    write_logfmt_field(&mut output, keys::COMPONENT, COMPONENT, &mut first);
    write_logfmt_field(&mut output, keys::EVENT, EVENT, &mut first);
    write_logfmt_field(&mut output, keys::REMOTE_ADDR, record.remote_addr, &mut first);
    write_logfmt_field(&mut output, keys::USERNAME, record.username, &mut first);
    write_logfmt_field(&mut output, keys::PASSWORD, record.password, &mut first);
    write_logfmt_field(&mut output, keys::MESSAGE, MESSAGE, &mut first);

    output.push('\n');
    output
}

fn format_pretty(record: &Record<'_>, color: bool) -> String {
    let time = format_timestamp(&record.time);
    let level = "INF";
    let mut output = if color {
        format!("{} {} {}", time.dimmed(), level.green(), MESSAGE.bold())
    } else {
        format!("{time} {level} {MESSAGE}")
    };

    let fields = [
        (keys::COMPONENT, COMPONENT),
        (keys::EVENT, EVENT),
        (keys::REMOTE_ADDR, record.remote_addr),
        (keys::USERNAME, record.username),
        (keys::PASSWORD, record.password),
    ];
    for (key, value) in fields {
        output.push(' ');
        let value = quote_if_needed(value);
        if color {
            output.push_str(&format!("{}{}", format!("{key}=").cyan(), value));
        } else {
            output.push_str(key);
            output.push('=');
            output.push_str(&value);
        }
    }

    output.push('\n');
    output
}

fn quote_if_needed(value: &str) -> String {
    if needs_quoting(value) {
        format!("\"{}\"", escape_logfmt(value))
    } else {
        value.to_string()
    }
}

/// Writes a logfmt field.
fn write_logfmt_field(output: &mut String, key: &str, value: &str, first: &mut bool) {
    if !*first {
        output.push(' ');
    }
    output.push_str(key);
    output.push('=');
    output.push_str(&quote_if_needed(value));
    *first = false;
}

/// Checks if a value needs quoting in logfmt.
fn needs_quoting(s: &str) -> bool {
    s.is_empty()
        || s.chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '=' || c == '\\' || c.is_control())
}

/// Escapes a quoted logfmt value. Control characters become `\u{..}` so a
/// record never spans lines.
fn escape_logfmt(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            c if c.is_control() => result.push_str(&format!("\\u{{{:x}}}", c as u32)),
            c => result.push(c),
        }
    }
    result
}

/// Colors only for pretty lines going to an interactive console; a
/// redirected stdout is as durable as a file.
fn default_color(output: &Output, format: Format, stdout_is_terminal: bool) -> bool {
    matches!(output, Output::Stdout) && format == Format::Pretty && stdout_is_terminal
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_color_requires_terminal_stdout() {
        assert!(default_color(&Output::Stdout, Format::Pretty, true));
        assert!(!default_color(&Output::Stdout, Format::Pretty, false));
        assert!(!default_color(&Output::Stdout, Format::Json, true));
        assert!(!default_color(
            &Output::File(PathBuf::from("credentials.log")),
            Format::Pretty,
            true
        ));
    }

    fn sample(password: &str) -> Record<'_> {
        Record {
            time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
            remote_addr: "198.51.100.4:40022",
            username: "root",
            password,
        }
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("simulated failure"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::other("simulated failure"))
        }
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("json".parse::<Format>().unwrap(), Format::Json);
        assert_eq!("Pretty".parse::<Format>().unwrap(), Format::Pretty);
        assert_eq!("TEXT".parse::<Format>().unwrap(), Format::Text);
        assert!("yaml".parse::<Format>().is_err());
    }

    #[test]
    fn test_format_default_is_json() {
        assert_eq!(Format::default(), Format::Json);
    }

    #[test]
    fn test_output_from_spec() {
        assert_eq!(Output::from_spec("stdout"), Output::Stdout);
        assert_eq!(Output::from_spec("STDOUT"), Output::Stdout);
        assert_eq!(
            Output::from_spec("credentials.log"),
            Output::File(PathBuf::from("credentials.log"))
        );
    }

    #[test]
    fn test_format_timestamp_rfc3339() {
        let record = sample("x");
        assert_eq!(format_timestamp(&record.time), "2024-05-01T12:30:00Z");
    }

    #[test]
    fn test_text_line_shape() {
        let line = format_text(&sample("hunter2"));
        assert_eq!(
            line,
            "time=2024-05-01T12:30:00Z level=info component=auth event=auth_attempt \
             remote_addr=198.51.100.4:40022 username=root password=hunter2 \
             msg=\"authentication attempt\"\n"
        );
    }

    #[test]
    fn test_text_quotes_empty_and_control_values() {
        let line = format_text(&sample(""));
        assert!(line.contains("password=\"\""));

        let line = format_text(&sample("a\nb\u{7}"));
        assert!(line.contains("password=\"a\\nb\\u{7}\""));
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn test_pretty_without_color_is_plain() {
        let line = format_pretty(&sample("hunter2"), false);
        assert!(line.starts_with("2024-05-01T12:30:00Z INF authentication attempt"));
        assert!(line.contains("password=hunter2"));
        assert!(!line.contains('\u{1b}'));
    }

    #[test]
    fn test_needs_quoting() {
        assert!(needs_quoting(""));
        assert!(needs_quoting("a b"));
        assert!(needs_quoting("a=b"));
        assert!(needs_quoting("a\"b"));
        assert!(!needs_quoting("hunter2"));
    }

    #[test]
    fn test_error_handler_called_on_io_failure() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let error_count = Arc::new(AtomicUsize::new(0));
        let counter = error_count.clone();

        let log = CredentialLog::with_writer(FailingWriter, Format::Json).with_error_handler(
            move |_err| {
                counter.fetch_add(1, Ordering::Relaxed);
            },
        );

        assert!(log.record(&sample("pw")).is_err());
        assert_eq!(error_count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_default_behavior_warns_once() {
        let log = CredentialLog::with_writer(FailingWriter, Format::Text);

        assert!(log.record(&sample("one")).is_err());
        assert!(log.record(&sample("two")).is_err());

        let inner = log.inner.lock().unwrap();
        assert!(inner.has_warned_io_failure);
    }
}
