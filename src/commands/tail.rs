//! Observer client: follow a run over the pull endpoint.
//!
//! Opens `GET /runs/logs` with the run id header, prints every `data:` line
//! to the output, and returns once the server sends the `done` event.
//!
//! # Example
//!
//! ```bash
//! runstream tail run-42 --url http://localhost:5002
//! ```

use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::constants;
use crate::run_id::RunId;

/// One dispatched Server-Sent Events frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// `event:` field, if any.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
    /// `retry:` field in milliseconds, if any.
    pub retry: Option<u64>,
}

/// Incremental Server-Sent Events parser.
///
/// Accepts arbitrary byte chunks and returns complete frames. Comment lines
/// (keep-alives) are dropped; frames with no fields are not emitted.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    current: SseFrame,
    has_data: bool,
    has_field: bool,
}

impl SseParser {
    /// Empty parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning any frames it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);

            if line.is_empty() {
                if self.has_field {
                    frames.push(std::mem::take(&mut self.current));
                }
                self.has_data = false;
                self.has_field = false;
                continue;
            }
            self.field(&line);
        }
        frames
    }

    fn field(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match name {
            "data" => {
                if self.has_data {
                    self.current.data.push('\n');
                }
                self.current.data.push_str(value);
                self.has_data = true;
            }
            "event" => self.current.event = Some(value.to_string()),
            "retry" => self.current.retry = value.parse().ok(),
            _ => return,
        }
        self.has_field = true;
    }
}

/// Pull endpoint URL on the server at `base`.
#[must_use]
pub fn logs_url(base: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), constants::LOGS_PATH)
}

/// Print `run`'s log to stdout until the end marker.
pub async fn run(base_url: &str, run: &RunId, header: &str) -> Result<usize> {
    let mut output = tokio::io::stdout();
    follow(base_url, run, header, &mut output).await
}

/// Copy `run`'s log lines to `output` until the `done` event.
///
/// Returns the number of lines written. Fails if the server rejects the
/// request or the stream ends before `done`.
pub async fn follow<W: AsyncWrite + Unpin>(
    base_url: &str,
    run: &RunId,
    header: &str,
    output: &mut W,
) -> Result<usize> {
    let url = logs_url(base_url);
    let client = reqwest::Client::builder()
        .user_agent(constants::user_agent())
        .build()
        .context("Failed to build HTTP client")?;

    let response = client
        .get(&url)
        .header(header, run.as_str())
        .send()
        .await
        .with_context(|| format!("Failed to reach {url}"))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("Server rejected tail of run {run}: {status} {}", body.trim());
    }
    log::info!("[Tail] Following run {run} at {url}");

    let mut parser = SseParser::new();
    let mut body = response.bytes_stream();
    let mut lines = 0usize;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.context("Event stream read failed")?;
        for frame in parser.push(&chunk) {
            match frame.event.as_deref() {
                Some(constants::SSE_DONE_EVENT) => {
                    output.flush().await?;
                    log::info!("[Tail] Run {run} finished after {lines} lines");
                    return Ok(lines);
                }
                Some(other) => log::debug!("[Tail] Ignoring event {other:?}"),
                None if frame.retry.is_some() && frame.data.is_empty() => {}
                None => {
                    output.write_all(frame.data.as_bytes()).await?;
                    output.write_all(b"\n").await?;
                    output.flush().await?;
                    lines += 1;
                }
            }
        }
    }

    bail!("Event stream for run {run} ended before the end marker")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_frames() {
        let mut parser = SseParser::new();
        let frames = parser.push(b"retry: 3000\n\ndata: hello\n\nevent: done\ndata: {}\n\n");

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].retry, Some(3000));
        assert_eq!(frames[1].data, "hello");
        assert_eq!(frames[1].event, None);
        assert_eq!(frames[2].event.as_deref(), Some("done"));
        assert_eq!(frames[2].data, "{}");
    }

    #[test]
    fn test_parser_handles_split_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"da").is_empty());
        assert!(parser.push(b"ta: par").is_empty());
        assert!(parser.push(b"tial\r\n").is_empty());
        let frames = parser.push(b"\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "partial");
    }

    #[test]
    fn test_parser_skips_comments_and_joins_data() {
        let mut parser = SseParser::new();
        let frames = parser.push(b": keep-alive\n\ndata: a\ndata: b\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "a\nb");
    }

    #[test]
    fn test_parser_keeps_empty_data_line() {
        let mut parser = SseParser::new();
        let frames = parser.push(b"data:\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "");
    }

    #[test]
    fn test_logs_url() {
        assert_eq!(logs_url("http://localhost:5002/"), "http://localhost:5002/runs/logs");
    }

    #[tokio::test]
    async fn test_follow_unreachable_server_fails() {
        let run = RunId::parse("r1").unwrap();
        let mut out = Vec::new();
        let result = follow("http://127.0.0.1:1", &run, "X-RUN-ID", &mut out).await;
        assert!(result.is_err());
    }
}
