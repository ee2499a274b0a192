//! Streaming and parsing of executor child-process output.
//!
//! Profile A emits one JSON object per line on stdout; profile B is opaque
//! but occasionally emits the same `{"type":"error",...}` envelope mixed
//! into stderr. The supervisor must not assume which stream carries the
//! terminal `result`/`error` envelope, so `OutputStreamer` is generic over
//! the underlying reader and is run once per stream.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::{Error, Result};

/// A line of executor stream-json output.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },

    Assistant {
        #[serde(default)]
        message: AssistantMessage,
    },

    User {
        #[serde(default)]
        message: AssistantMessage,
    },

    ToolUse {
        #[serde(default)]
        tool: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    ToolResult {
        #[serde(default)]
        output: String,
        #[serde(default)]
        is_error: bool,
    },

    /// Terminal success envelope.
    Result {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        usage: Option<Usage>,
        #[serde(default)]
        cost_usd: Option<f64>,
        #[serde(default)]
        duration_ms: Option<u64>,
    },

    /// Terminal failure envelope. Known `error.name` values classify as
    /// billing ("CreditsError", or a message containing "No payment
    /// method") or auth ("Unauthorized" in the message); anything else is
    /// reported unclassified.
    Error {
        error: ErrorEnvelope,
    },
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: Option<u64>,
    #[serde(default)]
    pub cache_write_tokens: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub data: Option<ErrorData>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ErrorData {
    #[serde(default)]
    pub message: Option<String>,
}

/// Classification of a terminal error envelope, per the known-message
/// table in the executor child-process contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Billing,
    Auth,
    Unclassified,
}

impl ErrorEnvelope {
    pub fn classify(&self) -> ErrorClass {
        let haystack = format!(
            "{} {}",
            self.name.as_deref().unwrap_or(""),
            self.data
                .as_ref()
                .and_then(|d| d.message.as_deref())
                .unwrap_or("")
        );
        if haystack.contains("CreditsError") || haystack.contains("No payment method") {
            ErrorClass::Billing
        } else if haystack.contains("Unauthorized") {
            ErrorClass::Auth
        } else {
            ErrorClass::Unclassified
        }
    }
}

/// Callbacks for one stream of executor output. A single `StreamHandler`
/// instance is shared across the stdout and stderr readers of one agent
/// (behind a lock), since either stream may carry the terminal envelope.
pub trait StreamHandler: Send {
    fn on_system(&mut self, _subtype: Option<&str>, _session_id: Option<&str>) {}

    fn on_assistant_text(&mut self, text: &str);

    fn on_tool_use(&mut self, _tool: &str, _input: &serde_json::Value) {}

    fn on_tool_result(&mut self, _output: &str, _is_error: bool) {}

    /// Terminal success: final session id, usage, and cost.
    fn on_complete(&mut self, _session_id: Option<&str>, _usage: Option<&Usage>, _cost_usd: Option<f64>) {}

    /// Terminal failure with its classification.
    fn on_error(&mut self, _envelope: &ErrorEnvelope, _class: ErrorClass) {}

    /// A line that did not parse as any known envelope. Profile B's
    /// ordinary output is opaque and expected to hit this path constantly;
    /// only lines that parse as `StreamMessage::Error` are meaningful.
    fn on_unrecognized_line(&mut self, _line: &str) {}
}

/// Prints assistant text to stdout; everything else to stderr when verbose.
pub struct PrintHandler {
    verbose: bool,
}

impl PrintHandler {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl StreamHandler for PrintHandler {
    fn on_system(&mut self, subtype: Option<&str>, _session_id: Option<&str>) {
        if self.verbose {
            if let Some(st) = subtype {
                eprintln!("[system: {}]", st);
            }
        }
    }

    fn on_assistant_text(&mut self, text: &str) {
        print!("{}", text);
    }

    fn on_tool_use(&mut self, tool: &str, input: &serde_json::Value) {
        if self.verbose {
            eprintln!("\n[tool: {} with input: {}]", tool, input);
        }
    }

    fn on_tool_result(&mut self, output: &str, is_error: bool) {
        if self.verbose {
            let prefix = if is_error { "error" } else { "result" };
            let display = if output.len() > 200 {
                format!("{}... ({} chars)", &output[..200], output.len())
            } else {
                output.to_string()
            };
            eprintln!("[{}: {}]", prefix, display);
        }
    }

    fn on_complete(&mut self, _session_id: Option<&str>, usage: Option<&Usage>, cost_usd: Option<f64>) {
        println!();
        if self.verbose {
            if let Some(u) = usage {
                eprintln!("[tokens: {} in, {} out]", u.input_tokens, u.output_tokens);
            }
            if let Some(c) = cost_usd {
                eprintln!("[cost: ${:.4}]", c);
            }
        }
    }

    fn on_error(&mut self, envelope: &ErrorEnvelope, class: ErrorClass) {
        eprintln!(
            "[agent error ({:?}): {}]",
            class,
            envelope
                .data
                .as_ref()
                .and_then(|d| d.message.as_deref())
                .unwrap_or("unknown")
        );
    }
}

/// Line-oriented reader over one output stream (stdout or stderr) of an
/// executor child process.
pub struct OutputStreamer<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> OutputStreamer<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
        }
    }

    /// Read to EOF, dispatching each line. Returns when the process closes
    /// this stream; the caller is responsible for racing stdout and stderr
    /// readers of the same agent against each other.
    pub async fn stream<H: StreamHandler>(&mut self, handler: &mut H) -> Result<()> {
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = self.reader.read_line(&mut line).await.map_err(Error::Io)?;

            if bytes_read == 0 {
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<StreamMessage>(trimmed) {
                Ok(msg) => Self::dispatch_message(handler, msg),
                Err(_) => handler.on_unrecognized_line(trimmed),
            }
        }

        Ok(())
    }

    fn dispatch_message<H: StreamHandler>(handler: &mut H, msg: StreamMessage) {
        match msg {
            StreamMessage::System {
                subtype,
                session_id,
            } => handler.on_system(subtype.as_deref(), session_id.as_deref()),
            StreamMessage::Assistant { message } | StreamMessage::User { message } => {
                handler.on_assistant_text(&message.content);
            }
            StreamMessage::ToolUse { tool, input } => handler.on_tool_use(&tool, &input),
            StreamMessage::ToolResult { output, is_error } => {
                handler.on_tool_result(&output, is_error);
            }
            StreamMessage::Result {
                session_id,
                usage,
                cost_usd,
                ..
            } => handler.on_complete(session_id.as_deref(), usage.as_ref(), cost_usd),
            StreamMessage::Error { error } => {
                let class = error.classify();
                handler.on_error(&error, class);
            }
        }
    }
}
