//! Logging façade for authentication events
//!
//! Every message about a login attempt goes through [`Logger::log`], which
//! renders one line of the form
//! `"<message> for '<user>' from <origin>: <error>"` and hands it to the sink
//! selected at startup: syslog in normal operation, stderr in debug mode.

use std::ffi::CString;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Longest line handed to a sink, in bytes
const MAX_LINE: usize = 511;

/// Syslog ident; must outlive every later `syslog(3)` call
const IDENT: &std::ffi::CStr = c"duo-gate";

/// Syslog severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum Priority {
    Emerg = 0,
    Alert = 1,
    Crit = 2,
    Err = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

impl Priority {
    /// Numeric syslog value
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i32())
    }
}

/// Where composed lines end up
#[derive(Debug, Clone)]
pub enum LogSink {
    /// The system log, facility AUTHPRIV
    Syslog,
    /// Standard error, each line prefixed with `[<priority>]`
    Stderr,
    /// In-process buffer of `(priority, line)` pairs, for embedding and tests
    Buffer(Arc<Mutex<Vec<(Priority, String)>>>),
}

/// Logger configuration, chosen once at process start and passed by reference
#[derive(Debug, Clone)]
pub struct Logger {
    sink: LogSink,
}

impl Logger {
    /// Create a logger for the given sink
    pub fn new(sink: LogSink) -> Self {
        if matches!(sink, LogSink::Syslog) {
            // SAFETY: IDENT is a 'static NUL-terminated string.
            unsafe {
                libc::openlog(IDENT.as_ptr(), libc::LOG_PID, libc::LOG_AUTHPRIV);
            }
        }
        Self { sink }
    }

    /// Syslog in normal operation, stderr when debugging
    pub fn from_debug_flag(debug: bool) -> Self {
        if debug {
            Self::new(LogSink::Stderr)
        } else {
            Self::new(LogSink::Syslog)
        }
    }

    /// A logger that keeps lines in memory; returns the shared buffer too
    pub fn buffered() -> (Self, Arc<Mutex<Vec<(Priority, String)>>>) {
        let buf = Arc::new(Mutex::new(Vec::new()));
        (Self::new(LogSink::Buffer(Arc::clone(&buf))), buf)
    }

    /// Log an authentication event
    pub fn log(
        &self,
        priority: Priority,
        msg: &str,
        user: Option<&str>,
        origin: Option<&str>,
        err: Option<&str>,
    ) {
        let line = compose_line(msg, user, origin, err);
        self.emit(priority, &line);
    }

    fn emit(&self, priority: Priority, line: &str) {
        match &self.sink {
            LogSink::Stderr => eprintln!("[{}] {}", priority, line),
            LogSink::Syslog => {
                // Interior NULs cannot cross into C; drop them.
                let Ok(c_line) = CString::new(line.replace('\0', "")) else {
                    return;
                };
                // SAFETY: both pointers are valid NUL-terminated strings and
                // the format consumes exactly one %s argument.
                unsafe {
                    libc::syslog(
                        libc::LOG_AUTHPRIV | priority.as_i32(),
                        c"%s".as_ptr(),
                        c_line.as_ptr(),
                    );
                }
            }
            LogSink::Buffer(buf) => {
                if let Ok(mut lines) = buf.lock() {
                    lines.push((priority, line.to_string()));
                }
            }
        }
    }
}

/// Compose a log line, omitting each clause whose value is absent
pub fn compose_line(
    msg: &str,
    user: Option<&str>,
    origin: Option<&str>,
    err: Option<&str>,
) -> String {
    let mut line = String::from(msg);
    if let Some(user) = user {
        line.push_str(&format!(" for '{}'", user));
    }
    if let Some(origin) = origin {
        line.push_str(&format!(" from {}", origin));
    }
    if let Some(err) = err {
        line.push_str(&format!(": {}", err));
    }

    if line.len() > MAX_LINE {
        let mut end = MAX_LINE;
        while !line.is_char_boundary(end) {
            end -= 1;
        }
        line.truncate(end);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_all_clauses() {
        assert_eq!(
            compose_line("Successful Duo login", Some("alice"), Some("10.0.0.5"), Some("ok")),
            "Successful Duo login for 'alice' from 10.0.0.5: ok"
        );
    }

    #[test]
    fn test_compose_omits_absent() {
        assert_eq!(compose_line("Starting", None, None, None), "Starting");
        assert_eq!(
            compose_line("Couldn't get groups", Some("bob"), None, Some("No such file")),
            "Couldn't get groups for 'bob': No such file"
        );
        assert_eq!(
            compose_line("Aborted", None, Some("localhost"), None),
            "Aborted from localhost"
        );
    }

    #[test]
    fn test_compose_bounded() {
        let long = "é".repeat(400);
        let line = compose_line(&long, None, None, None);
        assert!(line.len() <= MAX_LINE);
        assert!(line.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_buffer_sink() {
        let (logger, buf) = Logger::buffered();
        logger.log(Priority::Err, "Failed", Some("carol"), None, None);
        let lines = buf.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0], (Priority::Err, "Failed for 'carol'".to_string()));
    }

    #[test]
    fn test_priority_numbers() {
        assert_eq!(Priority::Err.to_string(), "3");
        assert_eq!(Priority::Info.as_i32(), 6);
    }
}
