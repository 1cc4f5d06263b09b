use crate::errors::{WebClawError, WebClawResult};
use crate::llm::types::{StreamChunk, StreamChunkKind};

/// Splits a byte stream into SSE lines. Bytes are held until their line
/// ends, so a UTF-8 sequence split across network chunks decodes intact.
#[derive(Debug, Default)]
pub struct SseLineSplitter {
    pending: Vec<u8>,
}

impl SseLineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns the complete, trimmed, non-empty lines.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let complete: Vec<u8> = self.pending.drain(..=last_newline).collect();
        complete
            .split(|b| *b == b'\n')
            .map(|line| String::from_utf8_lossy(line).trim().to_string())
            .filter(|line| !line.is_empty())
            .collect()
    }
}

/// Parses a raw SSE line (OpenAI-compatible format) into a StreamChunk.
/// Returns None if the line is a keep-alive or non-data line.
pub fn parse_sse_line(line: &str) -> WebClawResult<Option<StreamChunk>> {
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    let data = if let Some(d) = line.strip_prefix("data:") {
        d.trim()
    } else {
        return Ok(None);
    };

    if data == "[DONE]" {
        return Ok(Some(StreamChunk {
            kind: StreamChunkKind::Done,
            content: String::new(),
        }));
    }

    let json: serde_json::Value =
        serde_json::from_str(data).map_err(|e| WebClawError::SseParsing(e.to_string()))?;

    if let Some(message) = json["error"]["message"].as_str() {
        return Ok(Some(StreamChunk {
            kind: StreamChunkKind::Error,
            content: message.to_string(),
        }));
    }

    if let Some(choices) = json["choices"].as_array() {
        if let Some(first) = choices.first() {
            let delta = &first["delta"];

            // Reasoning content (some models like DeepSeek expose this)
            if let Some(reasoning) = delta["reasoning_content"].as_str() {
                if !reasoning.is_empty() {
                    return Ok(Some(StreamChunk {
                        kind: StreamChunkKind::Reasoning,
                        content: reasoning.to_string(),
                    }));
                }
            }

            if let Some(tool_calls) = delta["tool_calls"].as_array() {
                if !tool_calls.is_empty() {
                    return Ok(Some(StreamChunk {
                        kind: StreamChunkKind::ToolCall,
                        content: serde_json::to_string(tool_calls)
                            .map_err(|e| WebClawError::SseParsing(e.to_string()))?,
                    }));
                }
            }

            if let Some(content) = delta["content"].as_str() {
                if !content.is_empty() {
                    return Ok(Some(StreamChunk {
                        kind: StreamChunkKind::Content,
                        content: content.to_string(),
                    }));
                }
            }

            if let Some(reason) = first["finish_reason"].as_str() {
                return Ok(Some(StreamChunk {
                    kind: StreamChunkKind::Finish,
                    content: reason.to_string(),
                }));
            }
        }
    }

    // Usage arrives in a trailing chunk with empty choices.
    if json["usage"].is_object() {
        return Ok(Some(StreamChunk {
            kind: StreamChunkKind::Usage,
            content: json["usage"].to_string(),
        }));
    }

    Ok(None)
}
