use std::io::{self, BufRead, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{trace, warn};

#[derive(Debug, Serialize, Deserialize)]
pub struct DapMessage {
    pub seq: u64,
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(flatten)]
    pub content: DapMessageContent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DapMessageContent {
    Request {
        command: String,
        arguments: Option<Value>,
    },
    Response {
        request_seq: u64,
        success: bool,
        command: String,
        message: Option<String>,
        body: Option<Value>,
    },
    Event {
        event: String,
        body: Option<Value>,
    },
}

/// Frames outgoing messages. Clones share the sink and the sequence counter,
/// so the request loop and the execution thread can both send.
#[derive(Clone)]
pub struct DapWriter {
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
    seq: Arc<AtomicU64>,
}

impl DapWriter {
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(sink))),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    pub fn send_response(&self, request_seq: u64, command: &str, body: Option<Value>) {
        self.send(DapMessageContent::Response {
            request_seq,
            success: true,
            command: command.to_string(),
            message: None,
            body,
        });
    }

    pub fn send_error(&self, request_seq: u64, command: &str, message: impl Into<String>) {
        self.send(DapMessageContent::Response {
            request_seq,
            success: false,
            command: command.to_string(),
            message: Some(message.into()),
            body: None,
        });
    }

    pub fn send_event(&self, event: &str, body: Option<Value>) {
        self.send(DapMessageContent::Event {
            event: event.to_string(),
            body,
        });
    }

    fn send(&self, content: DapMessageContent) {
        let msg_type = match content {
            DapMessageContent::Request { .. } => "request",
            DapMessageContent::Response { .. } => "response",
            DapMessageContent::Event { .. } => "event",
        };
        let msg = DapMessage {
            seq: self.seq.fetch_add(1, Ordering::SeqCst) + 1,
            msg_type: msg_type.to_string(),
            content,
        };
        if let Err(err) = self.write_message(&msg) {
            warn!(%err, "failed to send DAP message");
        }
    }

    fn write_message(&self, msg: &DapMessage) -> io::Result<()> {
        let json = serde_json::to_string(msg)?;
        let mut sink = self
            .sink
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "DAP writer poisoned"))?;
        write!(sink, "Content-Length: {}\r\n\r\n{}", json.len(), json)?;
        sink.flush()?;
        trace!(bytes = json.len(), "sent");
        Ok(())
    }
}

/// Reads one `Content-Length` framed message. Returns `None` at end of input.
pub fn read_message(reader: &mut impl BufRead) -> io::Result<Option<DapMessage>> {
    let mut content_length = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let line = line.trim_end();
        if line.is_empty() {
            if content_length.is_some() {
                break;
            }
            continue;
        }
        if let Some(value) = line.strip_prefix("Content-Length:") {
            let len = value.trim().parse::<usize>().map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidData, "bad Content-Length header")
            })?;
            content_length = Some(len);
        }
    }

    let mut buffer = vec![0u8; content_length.unwrap_or(0)];
    reader.read_exact(&mut buffer)?;
    let msg = serde_json::from_slice(&buffer)?;
    Ok(Some(msg))
}
