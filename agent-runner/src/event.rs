//! Stream-event model and record parsing
//!
//! The agent emits newline-delimited JSON records on stdout, each with a
//! `type` discriminator. This module parses one record at a time, in
//! arrival order, into [`StreamEvent`]s. Events are never reordered or
//! coalesced: a status marker parsed from record N is yielded before
//! anything from record N+1.
//!
//! The record vocabulary:
//!
//! ```text
//! {"type":"system","subtype":"init","session_id":"...","tools":[...]}
//! {"type":"assistant","message":{"content":[{"type":"text","text":"..."}]}}
//! {"type":"assistant","message":{"content":[{"type":"tool_use","name":"Bash","input":{...}}]}}
//! {"type":"user","message":{"content":[{"type":"tool_result","content":"...","is_error":false}]}}
//! {"type":"stream_event","event":{"delta":{"type":"text_delta","text":"..."}}}
//! {"type":"result","subtype":"success","session_id":"...","result":"..."}
//! ```
//!
//! Spoken-response markup travels inside the text: `<STATUS>...</STATUS>`
//! tags are surfaced as they complete, and the final `<SPEAK>...</SPEAK>`
//! content becomes the spoken response.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, trace};

static STATUS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<STATUS>(.*?)</STATUS>").unwrap());
static SPEAK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<SPEAK>(.*?)</SPEAK>").unwrap());
static TAG_STRIP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<[A-Z_]+>.*?</[A-Z_]+>").unwrap());

/// Why a turn's error event was synthesized or reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnErrorKind {
    /// The agent itself reported a failure in its result record
    AgentReported,

    /// The agent exited without ever producing a final response
    NoResponse,

    /// The agent exceeded the tool-invocation cap
    TurnCapExceeded,

    /// A record was valid JSON but violated the protocol schema
    Protocol,
}

/// One unit of the agent's structured output stream, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The agent announced itself and its session identifier
    SessionInit { session_id: String, tool_count: usize },

    /// A status marker to surface immediately
    Status(String),

    /// The agent invoked a tool
    ToolInvocation { name: String, preview: String },

    /// A tool finished
    ToolResult { preview: String, is_error: bool },

    /// Incremental response text
    PartialResponse(String),

    /// The final spoken response, already stripped of markup
    FinalResponse(String),

    /// Continuation identifier for resuming this conversation
    SessionId(String),

    /// The turn failed; `message` is speakable
    Error { kind: TurnErrorKind, message: String },

    /// No further events will arrive for this turn
    StreamEnd,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawRecord {
    System {
        #[serde(default)]
        subtype: String,
        #[serde(default)]
        session_id: String,
        #[serde(default)]
        tools: Vec<serde_json::Value>,
    },
    Assistant {
        message: RawMessage,
    },
    User {
        message: RawMessage,
    },
    StreamEvent {
        #[serde(default)]
        event: serde_json::Value,
    },
    Result {
        #[serde(default)]
        subtype: String,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    content: Vec<RawBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        #[serde(default)]
        content: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Unknown,
}

/// Parses one turn's record stream into ordered events.
///
/// Each turn gets a fresh cursor: accumulated text, spoken statuses and
/// the final-response flag never leak between turns.
pub struct RecordCursor {
    accumulated_text: String,
    spoken_statuses: HashSet<String>,
    tool_invocations: usize,
    saw_final: bool,
}

impl RecordCursor {
    pub fn new() -> Self {
        Self {
            accumulated_text: String::new(),
            spoken_statuses: HashSet::new(),
            tool_invocations: 0,
            saw_final: false,
        }
    }

    /// Number of tool invocations seen so far this turn
    pub fn tool_invocations(&self) -> usize {
        self.tool_invocations
    }

    /// Whether a result record has arrived
    pub fn saw_final(&self) -> bool {
        self.saw_final
    }

    /// Feed one stdout line; returns the events it produced, in order.
    ///
    /// Lines that are not JSON are diagnostic noise from the agent and
    /// are skipped. Valid JSON that violates the record schema is a
    /// protocol error: the offending turn fails.
    pub fn feed_line(&mut self, line: &str) -> Vec<StreamEvent> {
        let line = line.trim();
        if line.is_empty() {
            return vec![];
        }

        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(_) => {
                debug!("Skipping non-JSON agent output: {}", truncate(line, 120));
                return vec![];
            }
        };

        let record: RawRecord = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                return vec![StreamEvent::Error {
                    kind: TurnErrorKind::Protocol,
                    message: format!("The agent sent a malformed record: {}", e),
                }];
            }
        };

        self.convert(record)
    }

    fn convert(&mut self, record: RawRecord) -> Vec<StreamEvent> {
        match record {
            RawRecord::System {
                subtype,
                session_id,
                tools,
            } => {
                if subtype == "init" {
                    vec![StreamEvent::SessionInit {
                        session_id,
                        tool_count: tools.len(),
                    }]
                } else {
                    trace!("Ignoring system record subtype {:?}", subtype);
                    vec![]
                }
            }

            RawRecord::Assistant { message } => {
                let mut events = Vec::new();
                for block in message.content {
                    match block {
                        RawBlock::Text { text } => {
                            self.accumulated_text.push_str(&text);
                            events.extend(self.drain_new_statuses());
                        }
                        RawBlock::ToolUse { name, input } => {
                            self.tool_invocations += 1;
                            let preview = format_tool_input(&name, &input);
                            events.push(StreamEvent::ToolInvocation { name, preview });
                        }
                        RawBlock::ToolResult { .. } | RawBlock::Unknown => {}
                    }
                }
                events
            }

            RawRecord::User { message } => {
                let mut events = Vec::new();
                for block in message.content {
                    if let RawBlock::ToolResult { content, is_error } = block {
                        let preview = truncate(&flatten_result(&content), 200);
                        events.push(StreamEvent::ToolResult { preview, is_error });
                    }
                }
                events
            }

            RawRecord::StreamEvent { event } => {
                let delta = &event["delta"];
                if delta["type"] == "text_delta" {
                    if let Some(text) = delta["text"].as_str() {
                        self.accumulated_text.push_str(text);
                        let mut events = vec![StreamEvent::PartialResponse(text.to_string())];
                        events.extend(self.drain_new_statuses());
                        return events;
                    }
                }
                vec![]
            }

            RawRecord::Result {
                subtype,
                session_id,
                result,
                error,
            } => {
                self.saw_final = true;
                let mut events = Vec::new();

                match subtype.as_str() {
                    "success" => {
                        let text = result.unwrap_or_default();
                        let source = if text.is_empty() {
                            self.accumulated_text.as_str()
                        } else {
                            text.as_str()
                        };
                        events.push(StreamEvent::FinalResponse(extract_speak(source)));
                    }
                    "error_max_turns" => {
                        events.push(StreamEvent::Error {
                            kind: TurnErrorKind::TurnCapExceeded,
                            message: "I hit the turn limit on that task.".to_string(),
                        });
                    }
                    _ => {
                        let detail = error
                            .or(result)
                            .unwrap_or_else(|| "unknown error".to_string());
                        events.push(StreamEvent::Error {
                            kind: TurnErrorKind::AgentReported,
                            message: format!("Something went wrong: {}", truncate(&detail, 200)),
                        });
                    }
                }

                if let Some(id) = session_id.filter(|id| !id.is_empty()) {
                    events.push(StreamEvent::SessionId(id));
                }

                events
            }

            RawRecord::Unknown => vec![StreamEvent::Error {
                kind: TurnErrorKind::Protocol,
                message: "The agent sent a record of unknown kind.".to_string(),
            }],
        }
    }

    /// Emit status events for tags that completed since the last call.
    fn drain_new_statuses(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for capture in STATUS_RE.captures_iter(&self.accumulated_text) {
            let status = capture[1].trim().to_string();
            if !status.is_empty() && self.spoken_statuses.insert(status.clone()) {
                events.push(StreamEvent::Status(status));
            }
        }
        events
    }
}

impl Default for RecordCursor {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull the spoken response out of the agent's final text.
///
/// Falls back gracefully when the agent ignored the markup: SPEAK tags
/// win, then the tag-stripped remainder (truncated so a long essay is
/// not read aloud), then a generic acknowledgement.
pub fn extract_speak(text: &str) -> String {
    if text.trim().is_empty() {
        return "Done.".to_string();
    }

    let speaks: Vec<String> = SPEAK_RE
        .captures_iter(text)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if !speaks.is_empty() {
        return speaks.join(" ");
    }

    let cleaned = TAG_STRIP_RE.replace_all(text, "");
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        return "Done.".to_string();
    }

    if cleaned.chars().count() > 400 {
        let head: String = cleaned.chars().take(397).collect();
        return format!("{}...", head);
    }

    cleaned.to_string()
}

/// Format tool input for readable terminal display
fn format_tool_input(tool_name: &str, input: &serde_json::Value) -> String {
    match tool_name {
        "Bash" => truncate(input["command"].as_str().unwrap_or(""), 120),
        "Read" | "Write" | "Edit" => input["file_path"]
            .as_str()
            .or_else(|| input["path"].as_str())
            .unwrap_or("?")
            .to_string(),
        "Grep" => format!("\"{}\"", input["pattern"].as_str().unwrap_or("?")),
        _ => truncate(&input.to_string(), 120),
    }
}

/// Normalize a tool-result payload to one line of text
fn flatten_result(content: &serde_json::Value) -> String {
    let text = match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| b["text"].as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    };
    text.replace('\n', " ")
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{}...", head)
    }
}
