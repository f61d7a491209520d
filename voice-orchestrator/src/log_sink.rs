//! Terminal log sink
//!
//! Append-only, line-oriented record of the conversation: user
//! transcripts, session lifecycle, status markers, tool activity,
//! results and spoken responses, each with a stable tag. Purely
//! observational; nothing feeds back into the controller.

use std::sync::{Arc, Mutex};

/// What a log line describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    /// User transcript as dispatched
    You,

    /// Agent announced itself
    Init,

    /// Status marker, flushed as it arrived
    Status,

    /// Tool invocation
    Tool,

    /// Tool result, success
    ResultOk,

    /// Tool result, error
    ResultErr,

    /// Final spoken text
    Speak,

    /// Session lifecycle (open, refresh, timeout, teardown)
    Session,

    /// Wake phrase detection
    Wake,

    /// Turn failure
    Error,
}

impl LogKind {
    pub fn tag(&self) -> &'static str {
        match self {
            LogKind::You => "[YOU]",
            LogKind::Init => "[INIT]",
            LogKind::Status => "[STATUS]",
            LogKind::Tool => "[TOOL]",
            LogKind::ResultOk => "[RESULT:OK]",
            LogKind::ResultErr => "[RESULT:ERR]",
            LogKind::Speak => "[SPEAK]",
            LogKind::Session => "[SESSION]",
            LogKind::Wake => "[WAKE]",
            LogKind::Error => "[ERROR]",
        }
    }
}

/// Append-only line sink.
pub trait LogSink: Send + Sync {
    fn line(&self, kind: LogKind, text: &str);
}

/// Production sink: timestamped lines on stdout.
#[derive(Default)]
pub struct StdoutLog;

impl StdoutLog {
    pub fn new() -> Self {
        Self
    }
}

impl LogSink for StdoutLog {
    fn line(&self, kind: LogKind, text: &str) {
        let now = chrono::Local::now().format("%H:%M:%S");
        println!("{} {} {}", now, kind.tag(), text);
    }
}

/// Buffer-backed sink for tests: captures (kind, text) in order.
#[derive(Default, Clone)]
pub struct MemoryLog {
    lines: Arc<Mutex<Vec<(LogKind, String)>>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(LogKind, String)> {
        self.lines.lock().unwrap().clone()
    }

    /// Texts of all lines of one kind, in order
    pub fn of_kind(&self, kind: LogKind) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, t)| t.clone())
            .collect()
    }
}

impl LogSink for MemoryLog {
    fn line(&self, kind: LogKind, text: &str) {
        self.lines.lock().unwrap().push((kind, text.to_string()));
    }
}
